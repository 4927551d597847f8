//! Dense inverse-search optical flow between two luma previews.
//!
//! Coarse-to-fine patch search with inverse-compositional gradient descent,
//! spatial propagation, patch densification and Horn-Schunck style
//! variational refinement sweeps. The default settings are part of the
//! fusion contract; downstream motion heuristics depend on them.

use rayon::prelude::*;

use crate::common::Buffer2;
use crate::math::statistics::mean_std_dev;
use crate::math::bilinear_f32;

#[derive(Debug, Clone, Copy)]
pub struct FlowConfig {
    pub patch_size: usize,
    pub patch_stride: usize,
    pub use_spatial_propagation: bool,
    pub gradient_descent_iterations: usize,
    pub variational_refinement_iterations: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            patch_size: 16,
            patch_stride: 8,
            use_spatial_propagation: true,
            gradient_descent_iterations: 16,
            variational_refinement_iterations: 5,
        }
    }
}

/// Dense per-pixel displacement field mapping reference coordinates into
/// the candidate image.
#[derive(Debug, Clone)]
pub struct FlowField {
    pub u: Buffer2<f32>,
    pub v: Buffer2<f32>,
}

impl FlowField {
    fn zero(width: usize, height: usize) -> Self {
        Self {
            u: Buffer2::new_default(width, height),
            v: Buffer2::new_default(width, height),
        }
    }

    pub fn width(&self) -> usize {
        self.u.width()
    }

    pub fn height(&self) -> usize {
        self.u.height()
    }

    /// Bilinear sample of the displacement at a fractional position.
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> (f32, f32) {
        (bilinear_f32(&self.u, x, y), bilinear_f32(&self.v, x, y))
    }
}

/// Compute dense flow from `reference` to `candidate`.
pub fn compute_flow(
    reference: &Buffer2<u8>,
    candidate: &Buffer2<u8>,
    config: &FlowConfig,
) -> FlowField {
    assert_eq!(reference.width(), candidate.width(), "width mismatch");
    assert_eq!(reference.height(), candidate.height(), "height mismatch");

    let reference = to_f32(reference);
    let candidate = to_f32(candidate);

    if reference.width() < config.patch_size || reference.height() < config.patch_size {
        return FlowField::zero(reference.width(), reference.height());
    }

    // Gaussian-ish pyramid, coarsest level still holding a few patches.
    let mut ref_pyramid = vec![reference];
    let mut cand_pyramid = vec![candidate];
    while ref_pyramid.len() < 6 {
        let last = ref_pyramid.last().unwrap();
        if last.width() / 2 < config.patch_size * 2 || last.height() / 2 < config.patch_size * 2 {
            break;
        }
        ref_pyramid.push(downsample2(last));
        cand_pyramid.push(downsample2(cand_pyramid.last().unwrap()));
    }

    let mut flow: Option<FlowField> = None;
    for level in (0..ref_pyramid.len()).rev() {
        let r = &ref_pyramid[level];
        let c = &cand_pyramid[level];

        let init = match &flow {
            Some(coarse) => upsample2(coarse, r.width(), r.height()),
            None => FlowField::zero(r.width(), r.height()),
        };

        let mut dense = inverse_search(r, c, &init, config);
        for _ in 0..config.variational_refinement_iterations {
            refine(&mut dense, r, c);
        }
        flow = Some(dense);
    }

    flow.expect("pyramid has at least one level")
}

/// Standard deviation of the flow magnitude over a 4x downscaled field,
/// used to characterize scene motion.
pub fn flow_std_dev(flow: &FlowField) -> f32 {
    let bw = (flow.width() / 4).max(1);
    let bh = (flow.height() / 4).max(1);

    let mut magnitudes = Vec::with_capacity(bw * bh);
    for by in 0..bh {
        for bx in 0..bw {
            let mut u = 0.0;
            let mut v = 0.0;
            let mut count = 0;
            for dy in 0..4 {
                for dx in 0..4 {
                    let x = bx * 4 + dx;
                    let y = by * 4 + dy;
                    if x < flow.width() && y < flow.height() {
                        u += flow.u.get(x, y);
                        v += flow.v.get(x, y);
                        count += 1;
                    }
                }
            }
            let inv = 1.0 / count.max(1) as f32;
            u *= inv;
            v *= inv;
            magnitudes.push((u * u + v * v).sqrt());
        }
    }

    mean_std_dev(&magnitudes).1
}

// ============================================================================
// Patch search
// ============================================================================

struct PatchResult {
    u: f32,
    v: f32,
    cost: f32,
}

fn inverse_search(
    reference: &Buffer2<f32>,
    candidate: &Buffer2<f32>,
    init: &FlowField,
    config: &FlowConfig,
) -> FlowField {
    let w = reference.width();
    let h = reference.height();
    let ps = config.patch_size;

    let xs = patch_positions(w, ps, config.patch_stride);
    let ys = patch_positions(h, ps, config.patch_stride);

    let mut results: Vec<PatchResult> = Vec::with_capacity(xs.len() * ys.len());

    // Raster order so spatial propagation can read left/top results.
    for (pyi, &y0) in ys.iter().enumerate() {
        for (pxi, &x0) in xs.iter().enumerate() {
            let center_x = x0 as f32 + ps as f32 * 0.5;
            let center_y = y0 as f32 + ps as f32 * 0.5;

            let mut best = init.sample(center_x, center_y);
            let mut best_cost = patch_ssd(reference, candidate, x0, y0, ps, best);

            if config.use_spatial_propagation {
                if pxi > 0 {
                    let left = &results[pyi * xs.len() + pxi - 1];
                    let cost = patch_ssd(reference, candidate, x0, y0, ps, (left.u, left.v));
                    if cost < best_cost {
                        best = (left.u, left.v);
                        best_cost = cost;
                    }
                }
                if pyi > 0 {
                    let top = &results[(pyi - 1) * xs.len() + pxi];
                    let cost = patch_ssd(reference, candidate, x0, y0, ps, (top.u, top.v));
                    if cost < best_cost {
                        best = (top.u, top.v);
                        best_cost = cost;
                    }
                }
            }

            let refined = descend_patch(reference, candidate, x0, y0, ps, best, config);
            let refined_cost = patch_ssd(reference, candidate, x0, y0, ps, refined);

            let (u, v, cost) = if refined_cost < best_cost {
                (refined.0, refined.1, refined_cost)
            } else {
                (best.0, best.1, best_cost)
            };

            results.push(PatchResult { u, v, cost });
        }
    }

    densify(&results, &xs, &ys, ps, w, h)
}

fn patch_positions(extent: usize, patch_size: usize, stride: usize) -> Vec<usize> {
    let max = extent - patch_size;
    let mut positions: Vec<usize> = (0..).map(|i| i * stride).take_while(|&p| p <= max).collect();
    if positions.last() != Some(&max) {
        positions.push(max);
    }
    positions
}

fn patch_ssd(
    reference: &Buffer2<f32>,
    candidate: &Buffer2<f32>,
    x0: usize,
    y0: usize,
    ps: usize,
    (u, v): (f32, f32),
) -> f32 {
    let mut sum = 0.0;
    for y in 0..ps {
        for x in 0..ps {
            let rx = x0 + x;
            let ry = y0 + y;
            let r = reference.get(rx, ry);
            let c = bilinear_f32(candidate, rx as f32 + u, ry as f32 + v);
            let e = c - r;
            sum += e * e;
        }
    }
    sum / (ps * ps) as f32
}

/// Inverse-compositional gradient descent on one patch.
fn descend_patch(
    reference: &Buffer2<f32>,
    candidate: &Buffer2<f32>,
    x0: usize,
    y0: usize,
    ps: usize,
    start: (f32, f32),
    config: &FlowConfig,
) -> (f32, f32) {
    // Template gradients and Hessian are fixed per patch.
    let mut gx = vec![0.0f32; ps * ps];
    let mut gy = vec![0.0f32; ps * ps];
    let mut h00 = 0.0f32;
    let mut h01 = 0.0f32;
    let mut h11 = 0.0f32;

    for y in 0..ps {
        for x in 0..ps {
            let rx = (x0 + x) as isize;
            let ry = (y0 + y) as isize;
            let dx = 0.5
                * (reference.get_clamped(rx + 1, ry) - reference.get_clamped(rx - 1, ry));
            let dy = 0.5
                * (reference.get_clamped(rx, ry + 1) - reference.get_clamped(rx, ry - 1));
            gx[y * ps + x] = dx;
            gy[y * ps + x] = dy;
            h00 += dx * dx;
            h01 += dx * dy;
            h11 += dy * dy;
        }
    }

    // Regularize so flat patches stay put instead of producing wild steps.
    let lambda = 1e-2 * (ps * ps) as f32;
    h00 += lambda;
    h11 += lambda;

    let det = h00 * h11 - h01 * h01;
    if det.abs() < 1e-10 {
        return start;
    }
    let inv_det = 1.0 / det;

    let (mut u, mut v) = start;
    let bound = reference.width().max(reference.height()) as f32;

    for _ in 0..config.gradient_descent_iterations {
        let mut b0 = 0.0f32;
        let mut b1 = 0.0f32;

        for y in 0..ps {
            for x in 0..ps {
                let rx = x0 + x;
                let ry = y0 + y;
                let e = bilinear_f32(candidate, rx as f32 + u, ry as f32 + v) - reference.get(rx, ry);
                b0 += gx[y * ps + x] * e;
                b1 += gy[y * ps + x] * e;
            }
        }

        let du = -(h11 * b0 - h01 * b1) * inv_det;
        let dv = -(-h01 * b0 + h00 * b1) * inv_det;

        u = (u + du).clamp(-bound, bound);
        v = (v + dv).clamp(-bound, bound);

        if du.abs() < 0.01 && dv.abs() < 0.01 {
            break;
        }
    }

    (u, v)
}

/// Weighted blend of overlapping patch displacements into a dense field.
fn densify(
    results: &[PatchResult],
    xs: &[usize],
    ys: &[usize],
    ps: usize,
    width: usize,
    height: usize,
) -> FlowField {
    let mut u_acc = vec![0.0f32; width * height];
    let mut v_acc = vec![0.0f32; width * height];
    let mut w_acc = vec![0.0f32; width * height];

    for (pyi, &y0) in ys.iter().enumerate() {
        for (pxi, &x0) in xs.iter().enumerate() {
            let patch = &results[pyi * xs.len() + pxi];
            let weight = 1.0 / (patch.cost + 1.0);

            for y in y0..y0 + ps {
                let row = y * width;
                for x in x0..x0 + ps {
                    u_acc[row + x] += patch.u * weight;
                    v_acc[row + x] += patch.v * weight;
                    w_acc[row + x] += weight;
                }
            }
        }
    }

    u_acc
        .iter_mut()
        .zip(v_acc.iter_mut())
        .zip(w_acc.iter())
        .for_each(|((u, v), &w)| {
            if w > 0.0 {
                *u /= w;
                *v /= w;
            }
        });

    FlowField {
        u: Buffer2::new(width, height, u_acc),
        v: Buffer2::new(width, height, v_acc),
    }
}

/// One Horn-Schunck style sweep: edge-aware neighbor averaging plus a
/// linearized data-term correction.
fn refine(flow: &mut FlowField, reference: &Buffer2<f32>, candidate: &Buffer2<f32>) {
    const ALPHA: f32 = 100.0;

    let w = flow.width();
    let h = flow.height();

    let u_old = flow.u.clone();
    let v_old = flow.v.clone();

    let rows: Vec<(usize, &mut [f32], &mut [f32])> = {
        let u_rows = flow.u.pixels_mut().chunks_mut(w);
        let v_rows = flow.v.pixels_mut().chunks_mut(w);
        u_rows
            .zip(v_rows)
            .enumerate()
            .map(|(y, (u, v))| (y, u, v))
            .collect()
    };

    rows.into_par_iter().for_each(|(y, u_row, v_row)| {
        for x in 0..w {
            let xi = x as isize;
            let yi = y as isize;
            let here = reference.get(x, y);

            let mut au = 0.0;
            let mut av = 0.0;
            let mut aw = 0.0;
            for (nx, ny) in [(xi - 1, yi), (xi + 1, yi), (xi, yi - 1), (xi, yi + 1)] {
                let cx = nx.clamp(0, w as isize - 1) as usize;
                let cy = ny.clamp(0, h as isize - 1) as usize;
                let weight = (-(reference.get(cx, cy) - here).abs() / 16.0).exp();
                au += u_old.get(cx, cy) * weight;
                av += v_old.get(cx, cy) * weight;
                aw += weight;
            }
            let avg_u = (au + u_old.get(x, y)) / (aw + 1.0);
            let avg_v = (av + v_old.get(x, y)) / (aw + 1.0);

            let gx = 0.5
                * (reference.get_clamped(xi + 1, yi) - reference.get_clamped(xi - 1, yi));
            let gy = 0.5
                * (reference.get_clamped(xi, yi + 1) - reference.get_clamped(xi, yi - 1));
            let et = bilinear_f32(candidate, x as f32 + avg_u, y as f32 + avg_v) - here;

            let denom = ALPHA + gx * gx + gy * gy;
            u_row[x] = avg_u - gx * et / denom;
            v_row[x] = avg_v - gy * et / denom;
        }
    });
}

// ============================================================================
// Pyramid helpers
// ============================================================================

fn to_f32(plane: &Buffer2<u8>) -> Buffer2<f32> {
    let pixels = plane.pixels().iter().map(|&v| v as f32).collect();
    Buffer2::new(plane.width(), plane.height(), pixels)
}

fn downsample2(input: &Buffer2<f32>) -> Buffer2<f32> {
    let w = input.width() / 2;
    let h = input.height() / 2;

    let mut output = Buffer2::new_default(w, h);
    output
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let sum = input.get(2 * x, 2 * y)
                    + input.get(2 * x + 1, 2 * y)
                    + input.get(2 * x, 2 * y + 1)
                    + input.get(2 * x + 1, 2 * y + 1);
                *out = sum * 0.25;
            }
        });
    output
}

fn upsample2(flow: &FlowField, width: usize, height: usize) -> FlowField {
    let sx = flow.width() as f32 / width as f32;
    let sy = flow.height() as f32 / height as f32;

    let mut out = FlowField::zero(width, height);
    for y in 0..height {
        for x in 0..width {
            let (u, v) = flow.sample(x as f32 * sx, y as f32 * sy);
            out.u.set(x, y, u * 2.0);
            out.v.set(x, y, v * 2.0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_image(width: usize, height: usize, shift_x: isize, shift_y: isize) -> Buffer2<u8> {
        let mut image = Buffer2::new_default(width, height);
        for y in 0..height {
            for x in 0..width {
                let fx = x as isize - shift_x;
                let fy = y as isize - shift_y;
                let mut value = 30.0f32;
                // A few smooth blobs give the search unambiguous texture.
                for &(cx, cy) in &[(16.0f32, 16.0f32), (40.0, 24.0), (24.0, 44.0)] {
                    let dx = fx as f32 - cx;
                    let dy = fy as f32 - cy;
                    value += 180.0 * (-(dx * dx + dy * dy) / 60.0).exp();
                }
                image.set(x, y, value.clamp(0.0, 255.0) as u8);
            }
        }
        image
    }

    #[test]
    fn test_identical_images_zero_flow() {
        let image = blob_image(64, 64, 0, 0);
        let flow = compute_flow(&image, &image, &FlowConfig::default());

        let max_mag = flow
            .u
            .pixels()
            .iter()
            .zip(flow.v.pixels())
            .map(|(&u, &v)| (u * u + v * v).sqrt())
            .fold(0.0f32, f32::max);
        assert!(max_mag < 0.5, "max magnitude {max_mag}");
    }

    #[test]
    fn test_recovers_translation() {
        let reference = blob_image(64, 64, 0, 0);
        let candidate = blob_image(64, 64, 3, 1);
        let flow = compute_flow(&reference, &candidate, &FlowConfig::default());

        // Average over the textured interior.
        let mut sum_u = 0.0;
        let mut sum_v = 0.0;
        let mut count = 0;
        for y in 8..56 {
            for x in 8..56 {
                sum_u += flow.u.get(x, y);
                sum_v += flow.v.get(x, y);
                count += 1;
            }
        }
        let mean_u = sum_u / count as f32;
        let mean_v = sum_v / count as f32;

        assert!((mean_u - 3.0).abs() < 1.0, "mean u {mean_u}");
        assert!((mean_v - 1.0).abs() < 1.0, "mean v {mean_v}");
    }

    #[test]
    fn test_flow_std_dev_uniform_is_zero() {
        let flow = FlowField {
            u: Buffer2::new_filled(32, 32, 5.0),
            v: Buffer2::new_filled(32, 32, -2.0),
        };
        assert!(flow_std_dev(&flow) < 1e-6);
    }

    #[test]
    fn test_flow_std_dev_mixed_field() {
        let mut u = Buffer2::new_default(32, 32);
        for y in 0..32 {
            for x in 16..32 {
                u.set(x, y, 20.0);
            }
        }
        let flow = FlowField {
            u,
            v: Buffer2::new_default(32, 32),
        };
        assert!(flow_std_dev(&flow) > 5.0);
    }

    #[test]
    fn test_small_image_returns_zero_flow() {
        let image = Buffer2::new_filled(8, 8, 128u8);
        let flow = compute_flow(&image, &image, &FlowConfig::default());
        assert_eq!(flow.width(), 8);
        assert!(flow.u.pixels().iter().all(|&v| v == 0.0));
    }
}
