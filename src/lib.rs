//! Apogee - flight computer core for a model-rocket recovery system.
//!
//! Three flight-critical subsystems run as cooperating periodic tasks over a
//! shared snapshot store:
//!
//! - a dual-barometer estimator that NIS-gates each sensor and fuses the
//!   survivors into a two-state (altitude, vertical velocity) Kalman filter,
//! - a six-phase flight state machine that calibrates the ground reference,
//!   detects liftoff/apogee/landing with debounced checks, and schedules the
//!   drogue and main deployments,
//! - a pyro driver that transacts fire commands over a byte-at-a-time link
//!   with explicit acknowledgement, retry, and periodic status polling.
//!
//! Device drivers live outside this crate: consumers implement the traits in
//! [`sensors`] and [`pyro`] and hand them to [`computer::start`].

pub mod clock;
pub mod computer;
pub mod config;
pub mod estimator;
pub mod flight_state;
pub mod imu_sampler;
pub mod kalman;
pub mod pyro;
pub mod sensors;
pub mod snapshots;

pub use computer::{FlightComputer, FlightDevices, FlightTasks, start};
pub use estimator::{BaroEstimator, BaroHealth, pressure_altitude};
pub use flight_state::{FlightPhase, FlightStateMachine, PyroAction, StateSample};
pub use kalman::AltitudeKalman;
pub use pyro::{PyroCommandError, PyroCommander, PyroLink};
pub use sensors::{BaroSample, Barometer, ImuSample, InertialUnit};
pub use snapshots::{
    BaroChannelStatus, EstimatorSnapshot, ImuSnapshot, PyroSnapshot, SnapshotStore, StateSnapshot,
};
