//! Two-state (altitude, vertical velocity) Kalman filter primitives.

use crate::config::NIS_HARD_REJECT;

/// Filter state and 2×2 covariance, all in SI units.
///
/// The covariance is stored as four scalars rather than a matrix type; every
/// operation below is the explicit 2×2 expansion.
#[derive(Debug, Clone, Copy)]
pub struct AltitudeKalman {
    /// Altitude estimate (m, absolute).
    pub h: f64,
    /// Vertical velocity estimate (m/s, up positive).
    pub v: f64,
    pub p00: f64,
    pub p01: f64,
    pub p10: f64,
    pub p11: f64,
}

impl AltitudeKalman {
    /// Boot state: altitude and velocity unknown-but-zero, with the
    /// uncertainty that implies. Re-seeded from the first valid measurement.
    pub fn new() -> Self {
        Self {
            h: 0.0,
            v: 0.0,
            p00: 25.0,
            p01: 0.0,
            p10: 0.0,
            p11: 100.0,
        }
    }

    /// Constant-velocity predict over `dt_s` with white-acceleration process
    /// noise of standard deviation `sigma_a`.
    pub fn predict(&mut self, dt_s: f64, sigma_a: f64) {
        self.h += self.v * dt_s;

        // F = [1 dt; 0 1]
        let (f00, f01) = (1.0, dt_s);
        let (f10, f11) = (0.0, 1.0);

        // Q = sigma_a^2 * [dt^4/4 dt^3/2; dt^3/2 dt^2]
        let dt2 = dt_s * dt_s;
        let dt3 = dt2 * dt_s;
        let dt4 = dt2 * dt2;
        let sa2 = sigma_a * sigma_a;
        let q00 = sa2 * dt4 * 0.25;
        let q01 = sa2 * dt3 * 0.5;
        let q10 = q01;
        let q11 = sa2 * dt2;

        // P = F P F^T + Q, expanded via FP = F*P
        let fp00 = f00 * self.p00 + f01 * self.p10;
        let fp01 = f00 * self.p01 + f01 * self.p11;
        let fp10 = f10 * self.p00 + f11 * self.p10;
        let fp11 = f10 * self.p01 + f11 * self.p11;

        self.p00 = fp00 * f00 + fp01 * f01 + q00;
        self.p01 = fp00 * f10 + fp01 * f11 + q01;
        self.p10 = fp10 * f00 + fp11 * f01 + q10;
        self.p11 = fp10 * f10 + fp11 * f11 + q11;
    }

    /// Normalized innovation squared of an altitude measurement `z` with
    /// noise variance `r`, judged against the current (predicted) state.
    ///
    /// A degenerate innovation variance reports as a hard reject rather than
    /// dividing by ~zero.
    pub fn nis(&self, z: f64, r: f64) -> f64 {
        let y = z - self.h;
        let s = self.p00 + r;
        if s < 1e-9 {
            return NIS_HARD_REJECT;
        }
        (y * y) / s
    }

    /// Scalar measurement update with H = [1 0] and noise variance `r`.
    ///
    /// The covariance uses the Joseph form
    /// P = (I - KH) P (I - KH)^T + K R K^T. The cheap form (I - KH)P loses
    /// symmetry over thousands of 30 ms cycles and has broken
    /// positive-definiteness in long flights; do not substitute it.
    pub fn update(&mut self, z: f64, r: f64) {
        let y = z - self.h;
        let s = self.p00 + r;
        if s < 1e-9 {
            return;
        }

        // K = P H^T / S = [p00; p10] / S
        let k0 = self.p00 / s;
        let k1 = self.p10 / s;

        self.h += k0 * y;
        self.v += k1 * y;

        // A = I - K H
        let a00 = 1.0 - k0;
        let a01 = 0.0;
        let a10 = -k1;
        let a11 = 1.0;

        let ap00 = a00 * self.p00 + a01 * self.p10;
        let ap01 = a00 * self.p01 + a01 * self.p11;
        let ap10 = a10 * self.p00 + a11 * self.p10;
        let ap11 = a10 * self.p01 + a11 * self.p11;

        self.p00 = ap00 * a00 + ap01 * a01 + k0 * k0 * r;
        self.p01 = ap00 * a10 + ap01 * a11 + k0 * k1 * r;
        self.p10 = ap10 * a00 + ap11 * a01 + k1 * k0 * r;
        self.p11 = ap10 * a10 + ap11 * a11 + k1 * k1 * r;
    }

    /// Re-initialise from a first trusted altitude: velocity back to zero
    /// with boot uncertainty, cross-covariance cleared.
    pub fn seed(&mut self, h0: f64, p00: f64) {
        self.h = h0;
        self.v = 0.0;
        self.p00 = p00;
        self.p01 = 0.0;
        self.p10 = 0.0;
        self.p11 = 100.0;
    }
}

impl Default for AltitudeKalman {
    fn default() -> Self {
        Self::new()
    }
}
