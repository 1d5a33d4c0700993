//! Dual-barometer altitude estimator.
//!
//! Each cycle both barometers are read, converted to altitude, judged by NIS
//! against a single predicted state, charged against their health counters,
//! and the surviving measurements are fused into the Kalman filter in order
//! of trust. The whole result, both raw channels plus the fused estimate,
//! is published as one snapshot.

use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, warn};

use crate::clock::MonotonicClock;
use crate::config::{
    BARO_PERIOD_MS, BARO0_SIGMA_Z, BARO1_SIGMA_Z, BARO_FAULT_LIMIT, GAS_CONSTANT_AIR, GRAVITY,
    KF_DT_MAX_S, KF_DT_MIN_S, KF_SIGMA_A, NIS_HARD_REJECT, NIS_SOFT_THRESHOLD, P0_PA,
    PRESSURE_MAX_PA, PRESSURE_MIN_PA,
};
use crate::kalman::AltitudeKalman;
use crate::sensors::{BaroSample, Barometer};
use crate::snapshots::{BaroChannelStatus, EstimatorSnapshot, SnapshotStore, StateSnapshot};

/// Saturating fault accounting for one barometer channel.
///
/// Soft NIS violations and read failures push the counter up, clean cycles
/// pull it back down; the channel is healthy while the count stays below the
/// limit.
#[derive(Debug, Clone, Copy)]
pub struct BaroHealth {
    fault_count: u8,
    healthy: bool,
}

impl BaroHealth {
    pub fn new() -> Self {
        Self {
            fault_count: 0,
            healthy: true,
        }
    }

    /// Record one cycle's outcome and refresh the health flag.
    pub fn note(&mut self, fault: bool) {
        if fault {
            self.fault_count = self.fault_count.saturating_add(1);
        } else {
            self.fault_count = self.fault_count.saturating_sub(1);
        }
        self.healthy = self.fault_count < BARO_FAULT_LIMIT;
    }

    pub fn fault_count(&self) -> u8 {
        self.fault_count
    }

    pub fn healthy(&self) -> bool {
        self.healthy
    }
}

impl Default for BaroHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Hypsometric altitude from pressure and temperature.
pub fn pressure_altitude(pressure_pa: f64, temperature_c: f64) -> f64 {
    let temp_k = temperature_c + 273.15;
    (GAS_CONSTANT_AIR * temp_k / GRAVITY) * (P0_PA / pressure_pa).ln()
}

/// One channel's assessment for the current cycle.
#[derive(Debug, Clone, Copy, Default)]
struct Assessment {
    status: BaroChannelStatus,
    valid: bool,
    accepted: bool,
}

/// The estimator core: filter state plus per-channel health. Synchronous;
/// the task loop feeds it readings and a measured dt.
#[derive(Debug)]
pub struct BaroEstimator {
    filter: AltitudeKalman,
    health: [BaroHealth; 2],
    r: [f64; 2],
    initialized: bool,
}

impl BaroEstimator {
    pub fn new() -> Self {
        Self {
            filter: AltitudeKalman::new(),
            health: [BaroHealth::new(), BaroHealth::new()],
            r: [
                BARO0_SIGMA_Z * BARO0_SIGMA_Z,
                BARO1_SIGMA_Z * BARO1_SIGMA_Z,
            ],
            initialized: false,
        }
    }

    /// Run one estimator cycle and build the snapshot to publish.
    ///
    /// `readings[i]` is `None` when channel i failed to read this cycle (or
    /// has no device at all; the health accounting is the same either way).
    /// `ground` is the currently-published state snapshot, used only for the
    /// AGL output.
    pub fn step(
        &mut self,
        readings: [Option<BaroSample>; 2],
        dt_s: f64,
        timestamp_ms: u64,
        ground: &StateSnapshot,
    ) -> EstimatorSnapshot {
        let dt_s = dt_s.clamp(KF_DT_MIN_S, KF_DT_MAX_S);

        self.filter.predict(dt_s, KF_SIGMA_A);

        // Both sensors are judged against the same post-predict state; the
        // first update must not bias the second sensor's NIS.
        let predicted = self.filter;

        let assessments = [
            self.assess(0, readings[0], &predicted),
            self.assess(1, readings[1], &predicted),
        ];

        if !self.initialized {
            self.initialized = self.try_seed(&assessments);
        }

        // Fuse accepted measurements, more trusted (smaller R) channel first
        if assessments[0].accepted && assessments[1].accepted {
            if self.r[0] <= self.r[1] {
                self.filter.update(assessments[0].status.altitude_m, self.r[0]);
                self.filter.update(assessments[1].status.altitude_m, self.r[1]);
            } else {
                self.filter.update(assessments[1].status.altitude_m, self.r[1]);
                self.filter.update(assessments[0].status.altitude_m, self.r[0]);
            }
        } else {
            for i in 0..2 {
                if assessments[i].accepted {
                    self.filter.update(assessments[i].status.altitude_m, self.r[i]);
                }
            }
        }

        let altitude_agl_m = if ground.ground_ready {
            self.filter.h - ground.ground_altitude_m
        } else {
            0.0
        };

        EstimatorSnapshot {
            baro0: assessments[0].status,
            baro1: assessments[1].status,
            altitude_m: self.filter.h,
            altitude_agl_m,
            altitude_variance: self.filter.p00,
            velocity_mps: self.filter.v,
            velocity_variance: self.filter.p11,
            timestamp_ms,
        }
    }

    fn assess(
        &mut self,
        channel: usize,
        reading: Option<BaroSample>,
        predicted: &AltitudeKalman,
    ) -> Assessment {
        let name = channel_name(channel);

        let Some(sample) = reading else {
            // Read failure: hard fault for this cycle, no measurement
            self.health[channel].note(true);
            return self.invalid_assessment(channel);
        };

        // Guard against nonsense pressure before taking a logarithm of it
        if sample.pressure_pa <= PRESSURE_MIN_PA || sample.pressure_pa >= PRESSURE_MAX_PA {
            debug!(
                "{name}: implausible pressure {:.1} Pa, rejecting sample",
                sample.pressure_pa
            );
            self.health[channel].note(true);
            return self.invalid_assessment(channel);
        }

        let altitude_m = pressure_altitude(sample.pressure_pa, sample.temperature_c);
        let nis = predicted.nis(altitude_m, self.r[channel]);

        self.health[channel].note(nis > NIS_SOFT_THRESHOLD);

        // Acceptance is a per-cycle decision: a healthy channel can still
        // produce a one-off outlier past the hard threshold
        let accepted = self.health[channel].healthy() && nis < NIS_HARD_REJECT;
        if !accepted {
            metrics::counter!("estimator.measurement.rejected", "channel" => name).increment(1);
        }

        Assessment {
            status: BaroChannelStatus {
                pressure_pa: sample.pressure_pa,
                temperature_c: sample.temperature_c,
                altitude_m,
                nis,
                fault_count: self.health[channel].fault_count(),
                healthy: self.health[channel].healthy(),
            },
            valid: true,
            accepted,
        }
    }

    fn invalid_assessment(&self, channel: usize) -> Assessment {
        Assessment {
            status: BaroChannelStatus {
                fault_count: self.health[channel].fault_count(),
                healthy: self.health[channel].healthy(),
                ..Default::default()
            },
            valid: false,
            accepted: false,
        }
    }

    /// Until a valid measurement has been seen, re-seed the filter from the
    /// first cycle that has one (the mean of both when both are valid).
    fn try_seed(&mut self, assessments: &[Assessment; 2]) -> bool {
        let (h0, p00) = match (assessments[0].valid, assessments[1].valid) {
            (true, true) => (
                0.5 * (assessments[0].status.altitude_m + assessments[1].status.altitude_m),
                0.5 * (self.r[0] + self.r[1]),
            ),
            (true, false) => (assessments[0].status.altitude_m, self.r[0]),
            (false, true) => (assessments[1].status.altitude_m, self.r[1]),
            (false, false) => return false,
        };

        self.filter.seed(h0, p00);
        debug!("filter seeded at {:.2} m", h0);
        true
    }

    #[cfg(test)]
    fn filter(&self) -> &AltitudeKalman {
        &self.filter
    }
}

impl Default for BaroEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn channel_name(channel: usize) -> &'static str {
    if channel == 0 { "baro0" } else { "baro1" }
}

/// Periodic estimator task. Requires at least one barometer; with none there
/// is nothing to estimate and the task exits (the rest of the system keeps
/// running degraded).
#[tracing::instrument(skip_all)]
pub async fn run_estimator(
    mut barometers: [Option<Box<dyn Barometer>>; 2],
    store: Arc<SnapshotStore>,
    clock: MonotonicClock,
) {
    if barometers.iter().all(|b| b.is_none()) {
        error!("no barometers ready; estimator task exiting");
        return;
    }
    if barometers[0].is_none() {
        warn!("baro0 not ready; continuing with baro1 only");
    }
    if barometers[1].is_none() {
        warn!("baro1 not ready; continuing with baro0 only");
    }

    let mut estimator = BaroEstimator::new();
    let mut ticker = interval(Duration::from_millis(BARO_PERIOD_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_ms = clock.now_ms();

    loop {
        ticker.tick().await;

        let now_ms = clock.now_ms();
        // Measured, not nominal: the loop can be delayed by scheduling
        let dt_s = now_ms.saturating_sub(last_ms) as f64 / 1000.0;
        last_ms = now_ms;

        let mut readings: [Option<BaroSample>; 2] = [None, None];
        for (i, device) in barometers.iter_mut().enumerate() {
            if let Some(device) = device {
                match device.sample().await {
                    Ok(sample) => readings[i] = Some(sample),
                    Err(e) => debug!("{} read failed: {e:#}", channel_name(i)),
                }
            }
        }

        let ground = store.state().await;
        let snapshot = estimator.step(readings, dt_s, now_ms, &ground);
        store.publish_estimator(snapshot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.03;

    /// Inverse of `pressure_altitude` at a fixed temperature.
    fn pressure_at(altitude_m: f64, temperature_c: f64) -> f64 {
        let temp_k = temperature_c + 273.15;
        P0_PA * (-GRAVITY * altitude_m / (GAS_CONSTANT_AIR * temp_k)).exp()
    }

    fn sample_at(altitude_m: f64) -> BaroSample {
        BaroSample {
            pressure_pa: pressure_at(altitude_m, 15.0),
            temperature_c: 15.0,
        }
    }

    fn no_ground() -> StateSnapshot {
        StateSnapshot::default()
    }

    #[test]
    fn altitude_formula_matches_reference_point() {
        // At sea-level pressure the derived altitude is zero by definition
        assert!(pressure_altitude(P0_PA, 15.0).abs() < 1e-9);

        // One standard atmosphere down to ~90 kPa is roughly 1 km up
        let alt = pressure_altitude(90_000.0, 15.0);
        assert!((alt - 1_000.0).abs() < 25.0, "alt={alt}");
    }

    #[test]
    fn altitude_roundtrips_through_pressure() {
        for alt in [0.0, 100.0, 1_000.0, 3_000.0] {
            let derived = pressure_altitude(pressure_at(alt, 15.0), 15.0);
            assert!((derived - alt).abs() < 1e-6, "alt={alt} derived={derived}");
        }
    }

    #[test]
    fn health_counter_saturates_and_floors() {
        let mut health = BaroHealth::new();

        for _ in 0..300 {
            health.note(true);
        }
        assert_eq!(health.fault_count(), 255, "counter must clamp, not wrap");
        assert!(!health.healthy());

        for _ in 0..300 {
            health.note(false);
        }
        assert_eq!(health.fault_count(), 0);
        assert!(health.healthy());
    }

    #[test]
    fn health_flag_tracks_fault_limit_exactly() {
        let mut health = BaroHealth::new();
        for i in 1..=10u8 {
            health.note(true);
            assert_eq!(
                health.healthy(),
                i < BARO_FAULT_LIMIT,
                "after {i} faults healthy should be {}",
                i < BARO_FAULT_LIMIT
            );
        }
    }

    #[test]
    fn first_valid_cycle_seeds_the_filter() {
        let mut est = BaroEstimator::new();

        let snap = est.step([Some(sample_at(100.0)), Some(sample_at(102.0))], DT, 30, &no_ground());

        // Seeded from the mean of both channels
        assert!((snap.altitude_m - 101.0).abs() < 0.01, "alt={}", snap.altitude_m);
        assert_eq!(snap.velocity_mps, 0.0);
        // The seeding cycle itself judges NIS against the pre-seed state, so
        // both channels take one startup fault
        assert_eq!(snap.baro0.fault_count, 1);
        assert_eq!(snap.baro1.fault_count, 1);
        assert!(snap.baro0.healthy && snap.baro1.healthy);
    }

    #[test]
    fn seeding_with_single_channel_uses_that_channel() {
        let mut est = BaroEstimator::new();

        let snap = est.step([None, Some(sample_at(250.0))], DT, 30, &no_ground());

        assert!((snap.altitude_m - 250.0).abs() < 0.01);
        // The dead channel took a hard fault, the live one a startup fault
        assert_eq!(snap.baro0.fault_count, 1);
        assert_eq!(snap.baro1.fault_count, 1);
    }

    #[test]
    fn startup_fault_decays_once_tracking() {
        let mut est = BaroEstimator::new();
        let mut ts = 0;

        est.step([Some(sample_at(100.0)), Some(sample_at(100.0))], DT, ts, &no_ground());
        ts += 30;
        let snap = est.step([Some(sample_at(100.0)), Some(sample_at(100.0))], DT, ts, &no_ground());

        assert_eq!(snap.baro0.fault_count, 0);
        assert_eq!(snap.baro1.fault_count, 0);
        assert!(snap.baro0.nis < NIS_SOFT_THRESHOLD);
    }

    #[test]
    fn outlier_is_rejected_and_does_not_move_the_estimate() {
        let mut est = BaroEstimator::new();
        let mut ts = 0;

        // Settle at 100 m
        for _ in 0..20 {
            est.step([Some(sample_at(100.0)), Some(sample_at(100.0))], DT, ts, &no_ground());
            ts += 30;
        }

        // 60 m jump on baro1 only
        let snap = est.step([Some(sample_at(100.0)), Some(sample_at(160.0))], DT, ts, &no_ground());

        assert!(snap.baro1.nis > NIS_HARD_REJECT, "nis={}", snap.baro1.nis);
        assert!(
            (snap.altitude_m - 100.0).abs() < 1.0,
            "outlier leaked into the estimate: {}",
            snap.altitude_m
        );
        assert!(snap.baro1.healthy, "one outlier must not kill the channel");
        assert_eq!(snap.baro1.fault_count, 1);
    }

    #[test]
    fn persistent_outliers_take_the_channel_unhealthy() {
        let mut est = BaroEstimator::new();
        let mut ts = 0;

        for _ in 0..20 {
            est.step([Some(sample_at(100.0)), Some(sample_at(100.0))], DT, ts, &no_ground());
            ts += 30;
        }

        let mut last = EstimatorSnapshot::default();
        for _ in 0..BARO_FAULT_LIMIT {
            last = est.step([Some(sample_at(100.0)), Some(sample_at(160.0))], DT, ts, &no_ground());
            ts += 30;
        }

        assert!(!last.baro1.healthy);
        assert_eq!(last.baro1.fault_count, BARO_FAULT_LIMIT);
        assert!(last.baro0.healthy, "good channel must be unaffected");
    }

    #[test]
    fn read_failure_counts_as_hard_fault_but_filter_continues() {
        let mut est = BaroEstimator::new();
        let mut ts = 0;

        for _ in 0..20 {
            est.step([Some(sample_at(100.0)), Some(sample_at(100.0))], DT, ts, &no_ground());
            ts += 30;
        }

        let snap = est.step([Some(sample_at(100.0)), None], DT, ts, &no_ground());

        assert_eq!(snap.baro1.fault_count, 1);
        assert_eq!(snap.baro1.altitude_m, 0.0, "failed read publishes a zeroed record");
        assert!((snap.altitude_m - 100.0).abs() < 0.5, "good channel still fuses");
    }

    #[test]
    fn pressure_at_window_edges_is_rejected() {
        let mut est = BaroEstimator::new();

        for pressure_pa in [PRESSURE_MIN_PA, PRESSURE_MAX_PA] {
            let snap = est.step(
                [
                    Some(BaroSample {
                        pressure_pa,
                        temperature_c: 15.0,
                    }),
                    None,
                ],
                DT,
                30,
                &no_ground(),
            );
            // The boundary is open: exactly-at-edge reads are invalid
            assert_eq!(snap.baro0.altitude_m, 0.0);
            assert_eq!(snap.altitude_m, 0.0, "filter must remain unseeded");
        }
    }

    #[test]
    fn dt_is_clamped_before_predict() {
        // Settle both estimators past the seeding cycle first, otherwise the
        // seed overwrites the covariance the clamp is supposed to protect
        let mut wild = BaroEstimator::new();
        let mut clamped = BaroEstimator::new();
        wild.step([Some(sample_at(100.0)), None], DT, 30, &no_ground());
        clamped.step([Some(sample_at(100.0)), None], DT, 30, &no_ground());

        let a = wild.step([Some(sample_at(100.0)), None], 10.0, 60, &no_ground());
        let b = clamped.step([Some(sample_at(100.0)), None], KF_DT_MAX_S, 60, &no_ground());
        assert_eq!(a.altitude_variance, b.altitude_variance);
        assert_eq!(a.velocity_variance, b.velocity_variance);
        assert!(a.altitude_variance.is_finite() && a.altitude_variance > 0.0);

        let mut frozen = BaroEstimator::new();
        let mut floored = BaroEstimator::new();
        frozen.step([Some(sample_at(100.0)), None], DT, 30, &no_ground());
        floored.step([Some(sample_at(100.0)), None], DT, 30, &no_ground());

        let c = frozen.step([Some(sample_at(100.0)), None], 0.0, 60, &no_ground());
        let d = floored.step([Some(sample_at(100.0)), None], KF_DT_MIN_S, 60, &no_ground());
        assert_eq!(c.altitude_variance, d.altitude_variance);
    }

    #[test]
    fn variances_stay_positive_and_symmetric() {
        let mut est = BaroEstimator::new();
        let mut ts = 0;

        for i in 0..2_000 {
            let alt = 100.0 + (i as f64) * 0.5;
            let snap = est.step([Some(sample_at(alt)), Some(sample_at(alt))], DT, ts, &no_ground());
            ts += 30;

            assert!(snap.altitude_variance > 0.0);
            assert!(snap.velocity_variance > 0.0);
            let f = est.filter();
            assert!((f.p01 - f.p10).abs() <= 1e-12 * f.p00.max(f.p11).max(1.0));
        }
    }

    #[test]
    fn agl_is_zero_until_ground_is_calibrated() {
        let mut est = BaroEstimator::new();

        let snap = est.step([Some(sample_at(500.0)), None], DT, 30, &no_ground());
        assert_eq!(snap.altitude_agl_m, 0.0);

        let ground = StateSnapshot {
            ground_altitude_m: 480.0,
            ground_ready: true,
            ..Default::default()
        };
        let snap = est.step([Some(sample_at(500.0)), None], DT, 60, &ground);
        assert!((snap.altitude_agl_m - (snap.altitude_m - 480.0)).abs() < 1e-9);
    }

    #[test]
    fn tracks_a_steady_climb() {
        let mut est = BaroEstimator::new();
        let mut ts = 0;
        let mut snap = EstimatorSnapshot::default();

        // 30 m/s climb, 30 ms cadence
        for i in 0..400 {
            let alt = 100.0 + (i as f64) * 30.0 * DT;
            snap = est.step([Some(sample_at(alt)), Some(sample_at(alt))], DT, ts, &no_ground());
            ts += 30;
        }

        assert!((snap.velocity_mps - 30.0).abs() < 2.0, "v={}", snap.velocity_mps);
        assert!(snap.baro0.healthy && snap.baro1.healthy);
    }
}
