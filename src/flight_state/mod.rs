//! Flight-phase state machine.
//!
//! A deterministic six-phase progression driven from the estimator's output:
//! standby (with ground calibration), ascent, optional mach lock, drogue
//! descent, main descent, landed. Every transition predicate is debounced
//! by a [`RepeatCheck`]; pyro actions are emitted as values and dispatched
//! by the task loop, which keeps the per-phase logic synchronous and
//! testable.

mod repeat_check;
mod transitions;

pub use repeat_check::RepeatCheck;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info};

use crate::clock::MonotonicClock;
use crate::config::{DROGUE_DEPLOY_DELAY_MS, STATE_PERIOD_MS};
use crate::pyro::PyroCommander;
use crate::snapshots::{SnapshotStore, StateSnapshot};

/// The six flight phases. The machine only ever moves forward through the
/// graph, with the single exception of the mach-lock back-edge to ascent;
/// landed is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FlightPhase {
    #[default]
    Standby,
    Ascent,
    MachLock,
    DrogueDescent,
    MainDescent,
    Landed,
}

impl FlightPhase {
    pub fn name(&self) -> &'static str {
        match self {
            FlightPhase::Standby => "STANDBY",
            FlightPhase::Ascent => "ASCENT",
            FlightPhase::MachLock => "MACH_LOCK",
            FlightPhase::DrogueDescent => "DROGUE_DESCENT",
            FlightPhase::MainDescent => "MAIN_DESCENT",
            FlightPhase::Landed => "LANDED",
        }
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One estimator sample as the state machine sees it.
#[derive(Debug, Clone, Copy)]
pub struct StateSample {
    /// Fused altitude (m, absolute). All transition logic works on the
    /// relative altitude derived from this and the calibrated ground.
    pub altitude_m: f64,
    pub velocity_mps: f64,
    pub timestamp_ms: u64,
}

/// Pyro dispatch requested by a step. At most one per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyroAction {
    FireDrogue,
    FireMain,
}

/// The machine itself. All state is private to the owning task; consumers
/// see it only through the published [`StateSnapshot`].
#[derive(Debug)]
pub struct FlightStateMachine {
    phase: FlightPhase,
    entry_time_ms: u64,
    ground_altitude_m: f64,
    ground_sum_m: f64,
    ground_samples: u8,
    ground_ready: bool,
    ground_warmup_start_ms: u64,
    standby_check: RepeatCheck,
    mach_lock_check: RepeatCheck,
    mach_unlock_check: RepeatCheck,
    /// Shared between ascent->drogue (velocity) and drogue->main (altitude);
    /// reset on entry to drogue descent.
    drogue_main_check: RepeatCheck,
    landed_check: RepeatCheck,
    last_landed_check_ms: u64,
    drogue_fired: bool,
}

impl FlightStateMachine {
    pub fn new(now_ms: u64) -> Self {
        let mut sm = Self {
            phase: FlightPhase::Standby,
            entry_time_ms: now_ms,
            ground_altitude_m: 0.0,
            ground_sum_m: 0.0,
            ground_samples: 0,
            ground_ready: false,
            ground_warmup_start_ms: now_ms,
            standby_check: RepeatCheck::new(),
            mach_lock_check: RepeatCheck::new(),
            mach_unlock_check: RepeatCheck::new(),
            drogue_main_check: RepeatCheck::new(),
            landed_check: RepeatCheck::new(),
            last_landed_check_ms: now_ms,
            drogue_fired: false,
        };
        sm.reset_ground_average(now_ms);
        sm
    }

    /// Advance one cycle. Returns the pyro action to dispatch, if any.
    pub fn step(&mut self, sample: StateSample) -> Option<PyroAction> {
        let mut action = None;

        let next = match self.phase {
            FlightPhase::Standby => transitions::update_standby(self, &sample),
            FlightPhase::Ascent => transitions::update_ascent(self, &sample),
            FlightPhase::MachLock => transitions::update_mach_lock(self, &sample),
            FlightPhase::DrogueDescent => {
                if !self.drogue_fired
                    && sample.timestamp_ms.saturating_sub(self.entry_time_ms)
                        >= DROGUE_DEPLOY_DELAY_MS
                {
                    info!("drogue deployment triggered");
                    self.drogue_fired = true;
                    action = Some(PyroAction::FireDrogue);
                }
                transitions::update_drogue_descent(self, &sample)
            }
            FlightPhase::MainDescent => transitions::update_main_descent(self, &sample),
            FlightPhase::Landed => FlightPhase::Landed,
        };

        if let Some(entry_action) = self.transition_to(next, &sample) {
            action = Some(entry_action);
        }

        action
    }

    /// Centralized transition: no-op when the target equals the current
    /// phase, otherwise log, record entry time, and run the entry hook.
    fn transition_to(&mut self, next: FlightPhase, sample: &StateSample) -> Option<PyroAction> {
        if next == self.phase {
            return None;
        }

        info!("state change: {} -> {}", self.phase, next);
        metrics::counter!("flight_state.transitions", "to" => next.name()).increment(1);

        self.phase = next;
        self.entry_time_ms = sample.timestamp_ms;

        match next {
            FlightPhase::Standby => {
                self.standby_check.reset();
                self.reset_ground_average(sample.timestamp_ms);
                None
            }
            FlightPhase::Ascent => {
                self.mach_lock_check.reset();
                self.drogue_main_check.reset();
                None
            }
            FlightPhase::MachLock => {
                self.mach_unlock_check.reset();
                None
            }
            FlightPhase::DrogueDescent => {
                self.drogue_main_check.reset();
                self.drogue_fired = false;
                None
            }
            FlightPhase::MainDescent => {
                self.landed_check.reset();
                self.last_landed_check_ms = sample.timestamp_ms;
                info!("main deployment triggered");
                Some(PyroAction::FireMain)
            }
            FlightPhase::Landed => {
                info!("the rocket has landed");
                None
            }
        }
    }

    fn reset_ground_average(&mut self, now_ms: u64) {
        self.ground_altitude_m = 0.0;
        self.ground_sum_m = 0.0;
        self.ground_samples = 0;
        self.ground_ready = false;
        self.ground_warmup_start_ms = now_ms;
    }

    fn relative_altitude(&self, altitude_m: f64) -> f64 {
        altitude_m - self.ground_altitude_m
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn ground_ready(&self) -> bool {
        self.ground_ready
    }

    pub fn ground_altitude_m(&self) -> f64 {
        self.ground_altitude_m
    }

    /// Whether the drogue fire has been commanded this flight.
    pub fn drogue_fired(&self) -> bool {
        self.drogue_fired
    }

    pub fn snapshot(&self, timestamp_ms: u64) -> StateSnapshot {
        StateSnapshot {
            phase: self.phase,
            ground_altitude_m: self.ground_altitude_m,
            ground_ready: self.ground_ready,
            timestamp_ms,
        }
    }
}

/// Periodic state machine task: read the latest estimate, step, dispatch
/// pyro actions, publish.
#[tracing::instrument(skip_all)]
pub async fn run_state_machine(
    store: Arc<SnapshotStore>,
    commander: PyroCommander,
    clock: MonotonicClock,
) {
    let mut machine = FlightStateMachine::new(clock.now_ms());
    let mut ticker = interval(Duration::from_millis(STATE_PERIOD_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let estimate = store.estimator().await;
        // Until the estimator has published, its timestamp is zero; keep the
        // warmup and delay clocks moving off our own time base
        let timestamp_ms = if estimate.timestamp_ms > 0 {
            estimate.timestamp_ms
        } else {
            clock.now_ms()
        };

        let sample = StateSample {
            altitude_m: estimate.altitude_m,
            velocity_mps: estimate.velocity_mps,
            timestamp_ms,
        };

        if let Some(action) = machine.step(sample) {
            let result = match action {
                PyroAction::FireDrogue => commander.fire_drogue().await,
                PyroAction::FireMain => commander.fire_main().await,
            };
            // A dispatch failure never rolls back the transition; the pyro
            // driver owns retries and the snapshot records the mismatch
            if let Err(e) = result {
                error!("failed to dispatch {action:?}: {e}");
            }
        }

        store.publish_state(machine.snapshot(clock.now_ms())).await;
    }
}
