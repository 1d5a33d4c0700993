//! Device seams consumed by the core tasks.
//!
//! Sensor bring-up lives outside this crate; the core only ever polls. A
//! device that is not present at boot is simply not handed to the task that
//! would own it.

use anyhow::Result;
use async_trait::async_trait;

/// One raw barometer reading. Altitude derivation happens in the estimator,
/// not the driver.
#[derive(Debug, Clone, Copy)]
pub struct BaroSample {
    pub pressure_pa: f64,
    pub temperature_c: f64,
}

/// One raw inertial reading.
#[derive(Debug, Clone, Copy)]
pub struct ImuSample {
    pub accel_mps2: [f64; 3],
    pub gyro_rads: [f64; 3],
}

/// A pollable barometer. Errors are per-cycle transients; the estimator
/// charges them against the channel's health and carries on.
#[async_trait]
pub trait Barometer: Send {
    async fn sample(&mut self) -> Result<BaroSample>;
}

/// A pollable accelerometer + gyroscope pair.
#[async_trait]
pub trait InertialUnit: Send {
    async fn sample(&mut self) -> Result<ImuSample>;
}
