//! Optical-flow-guided temporal fusion of a raw burst into one low-noise
//! set of Bayer planes.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::common::Buffer2;
use crate::container::FrameContainer;
use crate::deinterleave::{deinterleave, DeinterleaveOptions};
use crate::error::{ProcessError, Result};
use crate::flow::{compute_flow, flow_std_dev, FlowConfig, FlowField};
use crate::frame::RawImageMetadata;
use crate::math::bilinear_u16;
use crate::wavelet::{
    estimate_noise, forward_transform, inverse_transform, plane_to_f32, InverseParams,
    WaveletLevel, WaveletPyramid,
};

// ============================================================================
// Weight selection
// ============================================================================

/// Per-candidate fusion weights, selected once from reference metadata and
/// the scene motion estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuseWeights {
    /// Scales the noise-relative dissimilarity threshold.
    pub difference_weight: f32,
    /// Contribution of the candidate to the accumulator.
    pub weight: f32,
}

/// Empirical weight regimes. The thresholds are part of the contract.
pub fn select_fuse_weights(reference: &RawImageMetadata, flow_std_dev: f32) -> FuseWeights {
    if reference.iso >= 800 && reference.exposure_time >= 8_000_000 && flow_std_dev < 10.0 {
        // Low light with little scene motion: trust the burst heavily.
        FuseWeights {
            difference_weight: 16.0,
            weight: 16.0,
        }
    } else if reference.iso <= 200 && reference.exposure_time <= 1_250_000 {
        // Bright scene, fast shutter: little noise to remove.
        FuseWeights {
            difference_weight: 4.0,
            weight: 4.0,
        }
    } else if flow_std_dev > 10.0 {
        // Heavy motion: be conservative about accepting candidates.
        FuseWeights {
            difference_weight: 2.0,
            weight: 8.0,
        }
    } else {
        FuseWeights {
            difference_weight: 16.0,
            weight: 8.0,
        }
    }
}

// ============================================================================
// Fusion kernel
// ============================================================================

/// Warp a candidate plane to the reference frame through the flow field.
pub(crate) fn warp_plane(plane: &Buffer2<u16>, flow: &FlowField) -> Buffer2<f32> {
    debug_assert_eq!(plane.width(), flow.width());
    debug_assert_eq!(plane.height(), flow.height());

    let width = plane.width();
    let mut warped = Buffer2::new_default(width, plane.height());
    warped
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let u = flow.u.get(x, y);
                let v = flow.v.get(x, y);
                *out = bilinear_u16(plane, x as f32 + u, y as f32 + v);
            }
        });
    warped
}

/// Blend a warped candidate pyramid into the accumulator.
///
/// Per coefficient: `alpha = t / (t + |cand - ref|)` with
/// `t = difference_weight * noise_sigma`, then
/// `out += weight * (alpha * cand + (1 - alpha) * ref)` and the weight
/// accumulator records the applied weight. `reset_output` seeds the
/// accumulator with the reference at the same weight.
pub fn fuse_pyramids(
    output: &mut WaveletPyramid,
    reference: &WaveletPyramid,
    candidate: &WaveletPyramid,
    noise_sigma: f32,
    weights: &FuseWeights,
    reset_output: bool,
) {
    let t = weights.difference_weight * noise_sigma;
    let w = weights.weight;

    for ((out_level, ref_level), cand_level) in output
        .levels_mut()
        .iter_mut()
        .zip(reference.levels())
        .zip(candidate.levels())
    {
        let WaveletLevel {
            bands: out_bands,
            weights: out_weights,
            ..
        } = out_level;

        for band in 0..4 {
            let ref_px = ref_level.bands[band].pixels();
            let cand_px = cand_level.bands[band].pixels();

            let values = out_bands[band].pixels_mut();
            let weights_px = out_weights[band].pixels_mut();

            values
                .par_iter_mut()
                .zip_eq(weights_px.par_iter_mut())
                .zip_eq(ref_px.par_iter().zip_eq(cand_px.par_iter()))
                .for_each(|((value, acc), (&r, &c))| {
                    if reset_output {
                        *value = w * r;
                        *acc = w;
                    }

                    let d = (c - r).abs();
                    let alpha = if d > 0.0 { t / (t + d) } else { 1.0 };

                    *value += w * (alpha * c + (1.0 - alpha) * r);
                    *acc += w;
                });
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Denoised output: four CFA planes in the expanded range, still padded.
#[derive(Debug)]
pub struct DenoiseOutput {
    pub planes: [Buffer2<u16>; 4],
    /// Number of frames in the merge set (reference included).
    pub frame_count: usize,
}

/// Fuse every mergeable frame of the container into the reference.
///
/// `on_fused` is invoked once per (channel, frame) unit of work for
/// progress reporting.
pub fn denoise(
    container: &dyn FrameContainer,
    on_fused: &mut dyn FnMut(),
) -> Result<DenoiseOutput> {
    let camera = container.camera_metadata();
    let settings = container.post_process_settings();
    let reference_id = container.reference_frame();

    let reference_buffer = container
        .load_frame(&reference_id)
        .map_err(|e| ProcessError::Container(e.to_string()))?;
    let reference = deinterleave(&reference_buffer, camera, &DeinterleaveOptions::default())?;

    let width = reference.width();
    let height = reference.height();
    info!(width, height, "denoising burst");

    // Decompose the reference and estimate per-channel noise from the
    // finest HH band.
    let mut ref_pyramids: Vec<WaveletPyramid> = Vec::with_capacity(4);
    let mut noise_sigma = [0.0f32; 4];

    for (c, plane) in reference.planes.iter().enumerate() {
        let mut pyramid = WaveletPyramid::new(width, height);
        forward_transform(&plane_to_f32(plane), &mut pyramid);
        noise_sigma[c] = estimate_noise(&pyramid);
        ref_pyramids.push(pyramid);
        on_fused();
    }
    debug!(?noise_sigma, "reference noise estimate");

    let ref_preview = reference.preview.clone();
    let ref_metadata = reference.metadata.clone();
    let ref_exposure_compensation = reference_buffer.metadata.exposure_compensation;

    // Raw planes are no longer needed once transformed.
    drop(reference);
    container.release_frame(&reference_id);

    // Frames with a different exposure compensation cannot be merged.
    let mut process_frames = Vec::new();
    for id in container.frames() {
        let frame = container
            .frame(&id)
            .map_err(|e| ProcessError::Container(e.to_string()))?;
        if frame.metadata.exposure_compensation == ref_exposure_compensation {
            process_frames.push(id);
        }
    }

    let mut out_pyramids: Vec<WaveletPyramid> = (0..4)
        .map(|_| WaveletPyramid::new(width, height))
        .collect();
    let mut reset_output = true;

    for id in &process_frames {
        if *id == reference_id {
            continue;
        }

        let buffer = container
            .load_frame(id)
            .map_err(|e| ProcessError::Container(e.to_string()))?;
        let current = deinterleave(&buffer, camera, &DeinterleaveOptions::default())?;

        if current.width() != width || current.height() != height {
            return Err(ProcessError::InvalidState(format!(
                "frame '{id}' is {}x{}, reference is {width}x{height}",
                current.width(),
                current.height()
            )));
        }

        let flow = compute_flow(&ref_preview, &current.preview, &FlowConfig::default());
        let motion = flow_std_dev(&flow);
        let weights = select_fuse_weights(&ref_metadata, motion);
        debug!(frame = %id, motion, ?weights, "fusing");

        for (c, plane) in current.planes.iter().enumerate() {
            let warped = warp_plane(plane, &flow);
            let mut cand_pyramid = WaveletPyramid::new(width, height);
            forward_transform(&warped, &mut cand_pyramid);

            fuse_pyramids(
                &mut out_pyramids[c],
                &ref_pyramids[c],
                &cand_pyramid,
                noise_sigma[c],
                &weights,
                reset_output,
            );
            on_fused();
        }

        container.release_frame(id);
        reset_output = false;
    }

    // A merge set of one means the reference pyramid is the output.
    let output_pyramids = if reset_output {
        ref_pyramids
    } else {
        out_pyramids
    };

    let frame_count = process_frames.len().max(1);

    let mut planes = Vec::with_capacity(4);
    for (c, pyramid) in output_pyramids.iter().enumerate() {
        let params = InverseParams {
            black_level: camera.black_level[c],
            white_level: camera.white_level,
            noise_sigma: noise_sigma[c],
            frame_count,
            spatial_weight: settings.spatial_denoise_aggressiveness,
        };
        planes.push(inverse_transform(pyramid, &params));
    }

    let planes: [Buffer2<u16>; 4] = planes.try_into().expect("exactly four planes");

    info!(frame_count, "denoise complete");
    Ok(DenoiseOutput {
        planes,
        frame_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawImageMetadata;

    fn metadata(iso: u32, exposure_ms: f64) -> RawImageMetadata {
        RawImageMetadata {
            iso,
            exposure_time: (exposure_ms * 1e6) as i64,
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------------
    // Weight regimes
    // ------------------------------------------------------------------------

    #[test]
    fn test_low_light_low_motion_regime() {
        let w = select_fuse_weights(&metadata(800, 8.0), 9.9);
        assert_eq!(
            w,
            FuseWeights {
                difference_weight: 16.0,
                weight: 16.0
            }
        );
    }

    #[test]
    fn test_low_light_with_motion_falls_back_to_high_motion() {
        let w = select_fuse_weights(&metadata(800, 8.0), 10.1);
        assert_eq!(
            w,
            FuseWeights {
                difference_weight: 2.0,
                weight: 8.0
            }
        );
    }

    #[test]
    fn test_bright_fast_shutter_regime() {
        let w = select_fuse_weights(&metadata(200, 1.25), 0.0);
        assert_eq!(
            w,
            FuseWeights {
                difference_weight: 4.0,
                weight: 4.0
            }
        );
    }

    #[test]
    fn test_high_motion_regime() {
        let w = select_fuse_weights(&metadata(400, 4.0), 10.1);
        assert_eq!(
            w,
            FuseWeights {
                difference_weight: 2.0,
                weight: 8.0
            }
        );
    }

    #[test]
    fn test_default_regime() {
        let w = select_fuse_weights(&metadata(400, 4.0), 5.0);
        assert_eq!(
            w,
            FuseWeights {
                difference_weight: 16.0,
                weight: 8.0
            }
        );
    }

    #[test]
    fn test_flow_exactly_at_threshold_is_default() {
        // 10.0 is neither < 10 nor > 10.
        let w = select_fuse_weights(&metadata(400, 4.0), 10.0);
        assert_eq!(
            w,
            FuseWeights {
                difference_weight: 16.0,
                weight: 8.0
            }
        );
    }

    #[test]
    fn test_iso_just_below_low_light_threshold() {
        let w = select_fuse_weights(&metadata(799, 8.0), 0.0);
        assert_eq!(
            w,
            FuseWeights {
                difference_weight: 16.0,
                weight: 8.0
            }
        );
    }

    // ------------------------------------------------------------------------
    // Fusion kernel
    // ------------------------------------------------------------------------

    fn constant_pyramid(width: usize, height: usize, value: f32) -> WaveletPyramid {
        let plane = Buffer2::new_filled(width, height, value);
        let mut pyramid = WaveletPyramid::new(width, height);
        forward_transform(&plane, &mut pyramid);
        pyramid
    }

    #[test]
    fn test_fuse_identical_pyramids_is_identity() {
        let reference = constant_pyramid(64, 64, 500.0);
        let candidate = reference.clone();
        let mut output = WaveletPyramid::new(64, 64);

        let weights = FuseWeights {
            difference_weight: 16.0,
            weight: 8.0,
        };
        fuse_pyramids(&mut output, &reference, &candidate, 1.0, &weights, true);

        // Normalized output equals the reference coefficients.
        for (out_level, ref_level) in output.levels().iter().zip(reference.levels()) {
            for band in 0..4 {
                for (o, (&w, &r)) in out_level.bands[band].pixels().iter().zip(
                    out_level.weights[band]
                        .pixels()
                        .iter()
                        .zip(ref_level.bands[band].pixels()),
                ) {
                    assert!((o / w - r).abs() < 1e-3, "{} vs {r}", o / w);
                }
            }
        }
    }

    #[test]
    fn test_fuse_large_difference_favors_reference() {
        let reference = constant_pyramid(64, 64, 100.0);
        let candidate = constant_pyramid(64, 64, 200.0);
        let mut output = WaveletPyramid::new(64, 64);

        // High-motion regime: small difference weight rejects mismatches.
        let weights = FuseWeights {
            difference_weight: 2.0,
            weight: 8.0,
        };
        fuse_pyramids(&mut output, &reference, &candidate, 1.0, &weights, true);

        // The LL coefficient at the coarsest level carries the mean; it must
        // sit close to the reference, far from the halfway point.
        let level = output.levels().last().unwrap();
        let value = level.bands[0].pixels()[0] / level.weights[0].pixels()[0];
        let ref_value = reference.levels().last().unwrap().bands[0].pixels()[0];

        let pull = (value - ref_value).abs() / ref_value;
        assert!(pull < 0.03, "candidate pulled the mean by {pull}");
    }

    #[test]
    fn test_fuse_accumulates_weights() {
        let reference = constant_pyramid(64, 64, 100.0);
        let candidate = constant_pyramid(64, 64, 100.0);
        let mut output = WaveletPyramid::new(64, 64);

        let weights = FuseWeights {
            difference_weight: 16.0,
            weight: 8.0,
        };
        fuse_pyramids(&mut output, &reference, &candidate, 1.0, &weights, true);
        fuse_pyramids(&mut output, &reference, &candidate, 1.0, &weights, false);

        // Reference seed + two candidates, each at weight 8.
        let acc = output.levels()[0].weights[0].pixels()[0];
        assert_eq!(acc, 24.0);
    }

    #[test]
    fn test_warp_plane_identity_flow() {
        let mut plane: Buffer2<u16> = Buffer2::new_default(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                plane.set(x, y, (y * 8 + x) as u16);
            }
        }
        let flow = FlowField {
            u: Buffer2::new_default(8, 8),
            v: Buffer2::new_default(8, 8),
        };

        let warped = warp_plane(&plane, &flow);
        for (w, &p) in warped.pixels().iter().zip(plane.pixels()) {
            assert_eq!(*w, p as f32);
        }
    }

    #[test]
    fn test_warp_plane_shifts() {
        let mut plane: Buffer2<u16> = Buffer2::new_default(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                plane.set(x, y, (x * 10) as u16);
            }
        }
        let flow = FlowField {
            u: Buffer2::new_filled(8, 8, 2.0),
            v: Buffer2::new_default(8, 8),
        };

        let warped = warp_plane(&plane, &flow);
        // warped(x) = plane(x + 2)
        assert_eq!(warped.get(0, 0), 20.0);
        assert_eq!(warped.get(3, 4), 50.0);
    }
}
