//! Flight computer entry point: wires the snapshot store, the pyro command
//! queue, and all four periodic tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::MonotonicClock;
use crate::config::PYRO_CMD_QUEUE_SIZE;
use crate::estimator::run_estimator;
use crate::flight_state::run_state_machine;
use crate::imu_sampler::run_imu_sampler;
use crate::pyro::{PyroCommander, PyroDriver, PyroLink};
use crate::sensors::{Barometer, InertialUnit};
use crate::snapshots::SnapshotStore;

/// Devices injected by the board-support layer. Optional devices that are
/// absent leave their owning task to exit at startup; the rest of the
/// system runs degraded.
pub struct FlightDevices {
    pub baro0: Option<Box<dyn Barometer>>,
    pub baro1: Option<Box<dyn Barometer>>,
    pub imu: Option<Box<dyn InertialUnit>>,
    pub pyro_link: Box<dyn PyroLink>,
}

/// Join handles for the spawned tasks. There is no global shutdown: in
/// flight these loops run until power is cut.
pub struct FlightTasks {
    pub estimator: JoinHandle<()>,
    pub state_machine: JoinHandle<()>,
    pub pyro_driver: JoinHandle<()>,
    pub imu_sampler: JoinHandle<()>,
}

/// A running flight computer.
pub struct FlightComputer {
    store: Arc<SnapshotStore>,
    commander: PyroCommander,
    pub tasks: FlightTasks,
}

impl FlightComputer {
    /// Read-only snapshot access for log/telemetry consumers.
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Fire API handle (normally only the state machine uses this; it is
    /// exposed for ground testing).
    pub fn commander(&self) -> &PyroCommander {
        &self.commander
    }
}

/// Spawn every core task against the given devices. Must be called from
/// within a tokio runtime.
pub fn start(devices: FlightDevices) -> FlightComputer {
    info!("flight computer starting");

    let store = Arc::new(SnapshotStore::new());
    let clock = MonotonicClock::new();

    let (command_tx, command_rx) = flume::bounded(PYRO_CMD_QUEUE_SIZE);
    let commander = PyroCommander::new(command_tx, store.clone());
    let driver = PyroDriver::new(devices.pyro_link, command_rx, store.clone(), clock);

    let tasks = FlightTasks {
        pyro_driver: tokio::spawn(driver.run()),
        estimator: tokio::spawn(run_estimator(
            [devices.baro0, devices.baro1],
            store.clone(),
            clock,
        )),
        state_machine: tokio::spawn(run_state_machine(
            store.clone(),
            commander.clone(),
            clock,
        )),
        imu_sampler: tokio::spawn(run_imu_sampler(devices.imu, store.clone(), clock)),
    };

    FlightComputer {
        store,
        commander,
        tasks,
    }
}
