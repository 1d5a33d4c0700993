//! Shared snapshot store: the only mutable state that crosses task
//! boundaries.
//!
//! Four named slots (IMU, estimator, flight state, pyro), each owned by
//! exactly one producer task. Writes are last-writer-wins; reads hand back a
//! full copy of the most recent publish, never a reference into live state.
//! Each slot is independently locked and the lock is held only for the
//! duration of one value copy, so readers cannot stall writers for longer
//! than that.

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::flight_state::FlightPhase;

/// Pass-through inertial sample. Not fused; published for log/telemetry
/// consumers only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ImuSnapshot {
    /// Linear acceleration (m/s²), sensor frame.
    pub accel_mps2: [f64; 3],
    /// Angular rate (rad/s), sensor frame.
    pub gyro_rads: [f64; 3],
    pub timestamp_ms: u64,
}

/// Per-barometer measurement record for the last estimator cycle.
///
/// When the read failed the measurement fields are zero and only the health
/// accounting is meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BaroChannelStatus {
    pub pressure_pa: f64,
    pub temperature_c: f64,
    /// Altitude derived from pressure + temperature (m, absolute).
    pub altitude_m: f64,
    /// Normalized innovation squared against the cycle's predicted state.
    pub nis: f64,
    /// Saturating fault counter (0..=255).
    pub fault_count: u8,
    pub healthy: bool,
}

/// Fused output of the dual-barometer Kalman filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EstimatorSnapshot {
    pub baro0: BaroChannelStatus,
    pub baro1: BaroChannelStatus,
    /// Fused altitude estimate (m, absolute).
    pub altitude_m: f64,
    /// Altitude above the calibrated ground (m); 0.0 until calibration.
    pub altitude_agl_m: f64,
    /// Altitude variance P00.
    pub altitude_variance: f64,
    /// Vertical velocity estimate (m/s, up positive).
    pub velocity_mps: f64,
    /// Velocity variance P11.
    pub velocity_variance: f64,
    pub timestamp_ms: u64,
}

/// Output of the flight state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub phase: FlightPhase,
    /// Calibrated launch-site altitude (m); only meaningful once
    /// `ground_ready` is set, and written exactly once per flight.
    pub ground_altitude_m: f64,
    pub ground_ready: bool,
    pub timestamp_ms: u64,
}

/// Decoded pyro board status plus host-side intent flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PyroSnapshot {
    /// Raw status byte as received from the board.
    pub status_byte: u8,
    pub timestamp_ms: u64,
    pub drogue_fired: bool,
    pub main_fired: bool,
    pub drogue_fail: bool,
    pub main_fail: bool,
    pub drogue_cont_ok: bool,
    pub main_cont_ok: bool,
    pub drogue_fire_ack: bool,
    pub main_fire_ack: bool,
    /// Host requested a drogue fire (set before the command is queued).
    pub drogue_fire_requested: bool,
    pub main_fire_requested: bool,
}

/// The store itself. One instance per flight computer, shared via `Arc`.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    imu: RwLock<ImuSnapshot>,
    estimator: RwLock<EstimatorSnapshot>,
    state: RwLock<StateSnapshot>,
    pyro: RwLock<PyroSnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish_imu(&self, snapshot: ImuSnapshot) {
        *self.imu.write().await = snapshot;
    }

    pub async fn imu(&self) -> ImuSnapshot {
        *self.imu.read().await
    }

    pub async fn publish_estimator(&self, snapshot: EstimatorSnapshot) {
        *self.estimator.write().await = snapshot;
    }

    pub async fn estimator(&self) -> EstimatorSnapshot {
        *self.estimator.read().await
    }

    pub async fn publish_state(&self, snapshot: StateSnapshot) {
        *self.state.write().await = snapshot;
    }

    pub async fn state(&self) -> StateSnapshot {
        *self.state.read().await
    }

    /// Publish the pyro snapshot, logging every boolean field that changed.
    ///
    /// Fire/continuity transitions are rare and safety-relevant, so each one
    /// gets its own log line; failure flags log at error level.
    pub async fn publish_pyro(&self, snapshot: PyroSnapshot) {
        let mut slot = self.pyro.write().await;
        log_pyro_changes(&slot, &snapshot);
        *slot = snapshot;
    }

    pub async fn pyro(&self) -> PyroSnapshot {
        *self.pyro.read().await
    }
}

fn log_pyro_changes(prev: &PyroSnapshot, next: &PyroSnapshot) {
    if next.drogue_fire_requested != prev.drogue_fire_requested {
        info!("pyro: drogue_fire_requested -> {}", next.drogue_fire_requested);
    }
    if next.main_fire_requested != prev.main_fire_requested {
        info!("pyro: main_fire_requested -> {}", next.main_fire_requested);
    }
    if next.drogue_fire_ack != prev.drogue_fire_ack {
        info!("pyro: drogue_fire_ack -> {}", next.drogue_fire_ack);
    }
    if next.main_fire_ack != prev.main_fire_ack {
        info!("pyro: main_fire_ack -> {}", next.main_fire_ack);
    }
    if next.drogue_fired != prev.drogue_fired {
        info!("pyro: drogue_fired -> {}", next.drogue_fired);
    }
    if next.main_fired != prev.main_fired {
        info!("pyro: main_fired -> {}", next.main_fired);
    }
    if next.drogue_fail != prev.drogue_fail {
        error!("pyro: drogue_fail -> {}", next.drogue_fail);
    }
    if next.main_fail != prev.main_fail {
        error!("pyro: main_fail -> {}", next.main_fail);
    }
    if next.drogue_cont_ok != prev.drogue_cont_ok {
        info!("pyro: drogue_cont_ok -> {}", next.drogue_cont_ok);
    }
    if next.main_cont_ok != prev.main_cont_ok {
        info!("pyro: main_cont_ok -> {}", next.main_cont_ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_read_returns_equal_value() {
        let store = SnapshotStore::new();

        let snapshot = EstimatorSnapshot {
            altitude_m: 1234.5,
            altitude_agl_m: 1134.5,
            altitude_variance: 0.8,
            velocity_mps: -20.0,
            velocity_variance: 2.5,
            timestamp_ms: 42_000,
            ..Default::default()
        };
        store.publish_estimator(snapshot).await;

        assert_eq!(
            store.estimator().await,
            snapshot,
            "read must return exactly the published value"
        );
    }

    #[tokio::test]
    async fn slots_are_independent() {
        let store = SnapshotStore::new();

        store
            .publish_state(StateSnapshot {
                phase: FlightPhase::Ascent,
                ground_altitude_m: 100.0,
                ground_ready: true,
                timestamp_ms: 7,
            })
            .await;

        assert_eq!(
            store.imu().await,
            ImuSnapshot::default(),
            "publishing one slot must not disturb another"
        );
        assert_eq!(store.state().await.phase, FlightPhase::Ascent);
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let store = SnapshotStore::new();

        for ts in [1u64, 2, 3] {
            store
                .publish_pyro(PyroSnapshot {
                    timestamp_ms: ts,
                    ..Default::default()
                })
                .await;
        }

        assert_eq!(store.pyro().await.timestamp_ms, 3);
    }
}
