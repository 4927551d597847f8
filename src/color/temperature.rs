//! Correlated color temperature on the Planckian locus.

use glam::DVec2;

/// Calibration illuminants referenced by the camera color matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Illuminant {
    StandardA,
    StandardB,
    StandardC,
    D50,
    D55,
    D65,
    D75,
}

impl Illuminant {
    /// Correlated color temperature in kelvin.
    pub fn temperature(self) -> f64 {
        match self {
            Illuminant::StandardA => 2850.0,
            Illuminant::StandardB => 4874.0,
            Illuminant::StandardC => 6774.0,
            Illuminant::D50 => 5003.0,
            Illuminant::D55 => 5503.0,
            Illuminant::D65 => 6504.0,
            Illuminant::D75 => 7504.0,
        }
    }
}

/// One Robertson isotherm: reciprocal temperature (mired), CIE 1960 (u, v)
/// locus coordinates, isotherm slope.
struct Isotherm {
    r: f64,
    u: f64,
    v: f64,
    t: f64,
}

#[rustfmt::skip]
const LOCUS: [Isotherm; 31] = [
    Isotherm { r:   0.0, u: 0.18006, v: 0.26352, t:  -0.24341 },
    Isotherm { r:  10.0, u: 0.18066, v: 0.26589, t:  -0.25479 },
    Isotherm { r:  20.0, u: 0.18133, v: 0.26846, t:  -0.26876 },
    Isotherm { r:  30.0, u: 0.18208, v: 0.27119, t:  -0.28539 },
    Isotherm { r:  40.0, u: 0.18293, v: 0.27407, t:  -0.30470 },
    Isotherm { r:  50.0, u: 0.18388, v: 0.27709, t:  -0.32675 },
    Isotherm { r:  60.0, u: 0.18494, v: 0.28021, t:  -0.35156 },
    Isotherm { r:  70.0, u: 0.18611, v: 0.28342, t:  -0.37915 },
    Isotherm { r:  80.0, u: 0.18740, v: 0.28668, t:  -0.40955 },
    Isotherm { r:  90.0, u: 0.18880, v: 0.28997, t:  -0.44278 },
    Isotherm { r: 100.0, u: 0.19032, v: 0.29326, t:  -0.47888 },
    Isotherm { r: 125.0, u: 0.19462, v: 0.30141, t:  -0.58204 },
    Isotherm { r: 150.0, u: 0.19962, v: 0.30921, t:  -0.70471 },
    Isotherm { r: 175.0, u: 0.20525, v: 0.31647, t:  -0.84901 },
    Isotherm { r: 200.0, u: 0.21142, v: 0.32312, t:  -1.0182  },
    Isotherm { r: 225.0, u: 0.21807, v: 0.32909, t:  -1.2168  },
    Isotherm { r: 250.0, u: 0.22511, v: 0.33439, t:  -1.4512  },
    Isotherm { r: 275.0, u: 0.23247, v: 0.33904, t:  -1.7298  },
    Isotherm { r: 300.0, u: 0.24010, v: 0.34308, t:  -2.0637  },
    Isotherm { r: 325.0, u: 0.24792, v: 0.34655, t:  -2.4681  },
    Isotherm { r: 350.0, u: 0.25591, v: 0.34951, t:  -2.9641  },
    Isotherm { r: 375.0, u: 0.26400, v: 0.35200, t:  -3.5814  },
    Isotherm { r: 400.0, u: 0.27218, v: 0.35407, t:  -4.3633  },
    Isotherm { r: 425.0, u: 0.28039, v: 0.35577, t:  -5.3762  },
    Isotherm { r: 450.0, u: 0.28863, v: 0.35714, t:  -6.7262  },
    Isotherm { r: 475.0, u: 0.29685, v: 0.35823, t:  -8.5955  },
    Isotherm { r: 500.0, u: 0.30505, v: 0.35907, t: -11.324   },
    Isotherm { r: 525.0, u: 0.31320, v: 0.35968, t: -15.628   },
    Isotherm { r: 550.0, u: 0.32129, v: 0.36011, t: -23.325   },
    Isotherm { r: 575.0, u: 0.32931, v: 0.36038, t: -40.770   },
    Isotherm { r: 600.0, u: 0.33724, v: 0.36051, t: -116.45   },
];

/// Offsets along the isotherm normal are reported in conventional tint
/// units: one unit is 1/3000 of the (u, v) distance, positive toward green.
const TINT_SCALE: f64 = -3000.0;

/// A white point expressed as correlated color temperature plus tint (Duv
/// offset from the Planckian locus).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature {
    temperature: f64,
    tint: f64,
}

impl Temperature {
    pub fn new(temperature: f64, tint: f64) -> Self {
        Self { temperature, tint }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn tint(&self) -> f64 {
        self.tint
    }

    /// Recover temperature and tint from a CIE xy chromaticity.
    pub fn from_xy(xy: DVec2) -> Self {
        let (u, v) = xy_to_uv(xy);

        let mut temperature = 0.0;
        let mut tint = 0.0;

        let mut last_dt = 0.0;
        let mut last_du = 0.0;
        let mut last_dv = 0.0;

        for index in 1..LOCUS.len() {
            // Unit vector along this isotherm.
            let mut du = 1.0;
            let mut dv = LOCUS[index].t;
            let len = (1.0 + dv * dv).sqrt();
            du /= len;
            dv /= len;

            // Signed distance of the point from the isotherm.
            let uu = u - LOCUS[index].u;
            let vv = v - LOCUS[index].v;
            let mut dt = -uu * dv + vv * du;

            if dt <= 0.0 || index == LOCUS.len() - 1 {
                dt = (-dt).max(0.0);

                let f = if index == 1 { 0.0 } else { dt / (last_dt + dt) };

                temperature =
                    1.0e6 / (LOCUS[index].r * (1.0 - f) + LOCUS[index - 1].r * f);

                let uu = u - (LOCUS[index].u * (1.0 - f) + LOCUS[index - 1].u * f);
                let vv = v - (LOCUS[index].v * (1.0 - f) + LOCUS[index - 1].v * f);

                let mut du = du * (1.0 - f) + last_du * f;
                let mut dv = dv * (1.0 - f) + last_dv * f;
                let len = (du * du + dv * dv).sqrt();
                du /= len;
                dv /= len;

                tint = (uu * du + vv * dv) * TINT_SCALE;
                break;
            }

            last_dt = dt;
            last_du = du;
            last_dv = dv;
        }

        Self { temperature, tint }
    }

    /// CIE xy chromaticity of this temperature and tint.
    pub fn to_xy(&self) -> DVec2 {
        let r = 1.0e6 / self.temperature.clamp(1400.0, 1.0e6);

        let mut index = LOCUS.len() - 1;
        for i in 1..LOCUS.len() {
            if r < LOCUS[i].r || i == LOCUS.len() - 1 {
                index = i;
                break;
            }
        }

        let f = ((LOCUS[index].r - r) / (LOCUS[index].r - LOCUS[index - 1].r)).clamp(0.0, 1.0);

        let mut u = LOCUS[index - 1].u * f + LOCUS[index].u * (1.0 - f);
        let mut v = LOCUS[index - 1].v * f + LOCUS[index].v * (1.0 - f);

        // Interpolated isotherm direction for the tint offset.
        let mut uu1 = 1.0;
        let mut vv1 = LOCUS[index - 1].t;
        let len1 = (1.0 + vv1 * vv1).sqrt();
        uu1 /= len1;
        vv1 /= len1;

        let mut uu2 = 1.0;
        let mut vv2 = LOCUS[index].t;
        let len2 = (1.0 + vv2 * vv2).sqrt();
        uu2 /= len2;
        vv2 /= len2;

        let mut du = uu1 * f + uu2 * (1.0 - f);
        let mut dv = vv1 * f + vv2 * (1.0 - f);
        let len = (du * du + dv * dv).sqrt();
        du /= len;
        dv /= len;

        u += du * (self.tint / TINT_SCALE);
        v += dv * (self.tint / TINT_SCALE);

        uv_to_xy(u, v)
    }
}

#[inline]
fn xy_to_uv(xy: DVec2) -> (f64, f64) {
    let d = -xy.x + 6.0 * xy.y + 1.5;
    (2.0 * xy.x / d, 3.0 * xy.y / d)
}

#[inline]
fn uv_to_xy(u: f64, v: f64) -> DVec2 {
    let d = u - 4.0 * v + 2.0;
    DVec2::new(1.5 * u / d, v / d)
}
