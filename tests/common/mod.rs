//! Common test fixtures: scripted devices for driving the flight computer
//! through a whole mission without hardware.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use apogee::config::{GAS_CONSTANT_AIR, GRAVITY, P0_PA};
use apogee::pyro::{
    PYRO_CMD_FIRE_DROGUE, PYRO_CMD_FIRE_MAIN, PYRO_STATUS_DROGUE_CONT_OK,
    PYRO_STATUS_DROGUE_FIRED, PYRO_STATUS_DROGUE_FIRE_ACK, PYRO_STATUS_MAIN_CONT_OK,
    PYRO_STATUS_MAIN_FIRED, PYRO_STATUS_MAIN_FIRE_ACK, PyroLink,
};
use apogee::sensors::{BaroSample, Barometer, ImuSample, InertialUnit};

/// Install a subscriber so failing tests can be debugged with RUST_LOG.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pressure that decodes back to `altitude_m` at the given temperature
/// (exact inverse of the estimator's hypsometric conversion).
pub fn pressure_for_altitude(altitude_m: f64, temperature_c: f64) -> f64 {
    let temp_k = temperature_c + 273.15;
    P0_PA * (-GRAVITY * altitude_m / (GAS_CONSTANT_AIR * temp_k)).exp()
}

/// The "true" trajectory, shared between the test body (writer) and the
/// scripted barometers (readers).
#[derive(Clone, Default)]
pub struct FlightScript {
    altitude_m: Arc<Mutex<f64>>,
}

impl FlightScript {
    pub fn new(initial_altitude_m: f64) -> Self {
        Self {
            altitude_m: Arc::new(Mutex::new(initial_altitude_m)),
        }
    }

    pub fn set_altitude(&self, altitude_m: f64) {
        *self.altitude_m.lock().unwrap() = altitude_m;
    }

    pub fn altitude(&self) -> f64 {
        *self.altitude_m.lock().unwrap()
    }
}

/// Noise-free barometer that tracks the script.
pub struct ScriptedBarometer {
    script: FlightScript,
    temperature_c: f64,
}

impl ScriptedBarometer {
    pub fn new(script: &FlightScript) -> Self {
        Self {
            script: script.clone(),
            temperature_c: 15.0,
        }
    }
}

#[async_trait]
impl Barometer for ScriptedBarometer {
    async fn sample(&mut self) -> Result<BaroSample> {
        Ok(BaroSample {
            pressure_pa: pressure_for_altitude(self.script.altitude(), self.temperature_c),
            temperature_c: self.temperature_c,
        })
    }
}

/// IMU that reports a rocket sitting still on the pad.
pub struct SteadyImu;

#[async_trait]
impl InertialUnit for SteadyImu {
    async fn sample(&mut self) -> Result<ImuSample> {
        Ok(ImuSample {
            accel_mps2: [0.0, 0.0, GRAVITY],
            gyro_rads: [0.0, 0.0, 0.0],
        })
    }
}

/// Emulated pyro board.
///
/// Replies with its current status byte on every transaction. A fire command
/// takes effect (ACK + FIRED set) only once more than `withhold_acks`
/// transactions of that command have been seen, so `withhold_acks = 3` means
/// the 4th transaction is the first to carry the ACK bit.
pub struct BenchPyroBoard {
    status: u8,
    withhold_acks: u32,
    pub drogue_transactions: Arc<AtomicU32>,
    pub main_transactions: Arc<AtomicU32>,
}

impl BenchPyroBoard {
    pub fn new(withhold_acks: u32) -> Self {
        Self {
            status: PYRO_STATUS_DROGUE_CONT_OK | PYRO_STATUS_MAIN_CONT_OK,
            withhold_acks,
            drogue_transactions: Arc::new(AtomicU32::new(0)),
            main_transactions: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl PyroLink for BenchPyroBoard {
    async fn transact(&mut self, command: u8) -> Result<u8> {
        match command {
            PYRO_CMD_FIRE_DROGUE => {
                let seen = self.drogue_transactions.fetch_add(1, Ordering::SeqCst) + 1;
                if seen > self.withhold_acks {
                    self.status |= PYRO_STATUS_DROGUE_FIRE_ACK | PYRO_STATUS_DROGUE_FIRED;
                }
            }
            PYRO_CMD_FIRE_MAIN => {
                let seen = self.main_transactions.fetch_add(1, Ordering::SeqCst) + 1;
                if seen > self.withhold_acks {
                    self.status |= PYRO_STATUS_MAIN_FIRE_ACK | PYRO_STATUS_MAIN_FIRED;
                }
            }
            _ => {}
        }
        Ok(self.status)
    }
}
