//! Compile-time tuning constants for the flight computer core.
//!
//! There is deliberately no runtime configuration surface: every value here
//! was set during ground testing and is baked into the firmware image that
//! flies. Units are carried in the constant names.

// ── Barometer estimator ──────────────────────────────────────────────────────

pub const BARO_PERIOD_MS: u64 = 30;

/// Process-noise standard deviation of vertical acceleration (m/s²).
pub const KF_SIGMA_A: f64 = 45.0;

/// Measurement-noise standard deviation of derived altitude (m), per channel.
pub const BARO0_SIGMA_Z: f64 = 1.5;
pub const BARO1_SIGMA_Z: f64 = 1.5;

/// Soft NIS threshold: exceeding it counts against the channel's health.
pub const NIS_SOFT_THRESHOLD: f64 = 6.0;
/// Hard NIS threshold: exceeding it rejects the measurement outright.
pub const NIS_HARD_REJECT: f64 = 25.0;
/// A channel is healthy while its fault count stays below this limit.
pub const BARO_FAULT_LIMIT: u8 = 5;

/// Clamp bounds for the measured inter-cycle dt (seconds).
pub const KF_DT_MIN_S: f64 = 0.001;
pub const KF_DT_MAX_S: f64 = 0.200;

/// Standard sea-level pressure (Pa).
pub const P0_PA: f64 = 101_325.0;
/// Specific gas constant of dry air, J/(kg·K).
pub const GAS_CONSTANT_AIR: f64 = 287.05;
/// Standard gravity (m/s²).
pub const GRAVITY: f64 = 9.80665;

/// Plausible pressure window (Pa, open interval); anything outside is a
/// sensor fault, not an altitude.
pub const PRESSURE_MIN_PA: f64 = 1_000.0;
pub const PRESSURE_MAX_PA: f64 = 200_000.0;

// ── Flight state machine ─────────────────────────────────────────────────────

pub const STATE_PERIOD_MS: u64 = 20;

/// Samples are discarded for this long after entering standby so the
/// estimator can settle before ground calibration starts.
pub const GROUND_WARMUP_MS: u64 = 1_000;
pub const GROUND_AVERAGE_SAMPLES: u8 = 10;

pub const ASCENT_ALTITUDE_THRESHOLD_M: f64 = 25.0;
pub const ASCENT_VELOCITY_THRESHOLD_MPS: f64 = 5.0;
pub const ASCENT_CHECKS: u8 = 5;

pub const MACH_LOCK_VELOCITY_THRESHOLD_MPS: f64 = 150.0;
pub const MACH_LOCK_CHECKS: u8 = 10;
pub const MACH_UNLOCK_VELOCITY_THRESHOLD_MPS: f64 = 150.0;
pub const MACH_UNLOCK_CHECKS: u8 = 10;

pub const DROGUE_DEPLOY_VELOCITY_THRESHOLD_MPS: f64 = 5.0;
pub const DROGUE_DEPLOY_CHECKS: u8 = 5;
/// Delay between entering drogue descent and firing the drogue charge.
pub const DROGUE_DEPLOY_DELAY_MS: u64 = 3_000;

/// Main deploy altitude, relative to the calibrated ground (1600 ft).
pub const MAIN_DEPLOY_ALTITUDE_M: f64 = 488.0;
pub const MAIN_DEPLOY_CHECKS: u8 = 5;

pub const LANDED_VELOCITY_THRESHOLD_MPS: f64 = 4.0;
pub const LANDED_CHECKS: u8 = 6;
/// The landed predicate is evaluated at most once per interval.
pub const LANDED_CHECK_INTERVAL_MS: u64 = 10_000;

// ── Inertial sampler ─────────────────────────────────────────────────────────

pub const IMU_PERIOD_MS: u64 = 50;

// ── Pyro driver ──────────────────────────────────────────────────────────────

pub const PYRO_STATUS_POLL_INTERVAL_MS: u64 = 100;
pub const PYRO_RETRY_INTERVAL_MS: u64 = 10;
/// Retry budget per fire command (~1 s at the retry interval).
pub const PYRO_MAX_RETRIES: u32 = 100;
pub const PYRO_CMD_QUEUE_SIZE: usize = 10;
