//! Inertial pass-through sampler.
//!
//! Accel/gyro data is published for log and telemetry consumers; nothing in
//! the flight logic fuses it.

use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::error;

use crate::clock::MonotonicClock;
use crate::config::IMU_PERIOD_MS;
use crate::sensors::InertialUnit;
use crate::snapshots::{ImuSnapshot, SnapshotStore};

#[tracing::instrument(skip_all)]
pub async fn run_imu_sampler(
    imu: Option<Box<dyn InertialUnit>>,
    store: Arc<SnapshotStore>,
    clock: MonotonicClock,
) {
    let Some(mut imu) = imu else {
        error!("inertial unit not ready; sampler task exiting");
        return;
    };

    let mut ticker = interval(Duration::from_millis(IMU_PERIOD_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match imu.sample().await {
            Ok(sample) => {
                store
                    .publish_imu(ImuSnapshot {
                        accel_mps2: sample.accel_mps2,
                        gyro_rads: sample.gyro_rads,
                        timestamp_ms: clock.now_ms(),
                    })
                    .await;
            }
            // Transient: skip the cycle, keep the last snapshot
            Err(e) => error!("failed to read inertial unit: {e:#}"),
        }
    }
}
