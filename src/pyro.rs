//! Pyro board command protocol and driver task.
//!
//! The link is a synchronous byte exchange: every transaction clocks one
//! command byte out and the board's current status byte back in. Fire
//! commands are queued by the state machine through [`PyroCommander`] and
//! executed by the single driver task, which retries until the board
//! acknowledges and refreshes the status snapshot after every transaction.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Duration, sleep, timeout};
use tracing::{error, info, trace};

use crate::clock::MonotonicClock;
use crate::config::{
    PYRO_MAX_RETRIES, PYRO_RETRY_INTERVAL_MS, PYRO_STATUS_POLL_INTERVAL_MS,
};
use crate::snapshots::{PyroSnapshot, SnapshotStore};

// ── Wire protocol ────────────────────────────────────────────────────────────

pub const PYRO_CMD_FIRE_DROGUE: u8 = 0x01;
pub const PYRO_CMD_FIRE_MAIN: u8 = 0x02;
/// Status request; no side effect on the board.
pub const PYRO_CMD_STATUS_REQ: u8 = 0x55;

pub const PYRO_STATUS_DROGUE_FIRED: u8 = 1 << 0;
pub const PYRO_STATUS_MAIN_FIRED: u8 = 1 << 1;
pub const PYRO_STATUS_DROGUE_FAIL: u8 = 1 << 2;
pub const PYRO_STATUS_MAIN_FAIL: u8 = 1 << 3;
pub const PYRO_STATUS_DROGUE_CONT_OK: u8 = 1 << 4;
pub const PYRO_STATUS_MAIN_CONT_OK: u8 = 1 << 5;
pub const PYRO_STATUS_DROGUE_FIRE_ACK: u8 = 1 << 6;
pub const PYRO_STATUS_MAIN_FIRE_ACK: u8 = 1 << 7;

/// The two deployment channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyroChannel {
    Drogue,
    Main,
}

impl PyroChannel {
    pub fn name(&self) -> &'static str {
        match self {
            PyroChannel::Drogue => "drogue",
            PyroChannel::Main => "main",
        }
    }

    pub fn command_byte(&self) -> u8 {
        match self {
            PyroChannel::Drogue => PYRO_CMD_FIRE_DROGUE,
            PyroChannel::Main => PYRO_CMD_FIRE_MAIN,
        }
    }

    fn ack_mask(&self) -> u8 {
        match self {
            PyroChannel::Drogue => PYRO_STATUS_DROGUE_FIRE_ACK,
            PyroChannel::Main => PYRO_STATUS_MAIN_FIRE_ACK,
        }
    }

    fn fired_mask(&self) -> u8 {
        match self {
            PyroChannel::Drogue => PYRO_STATUS_DROGUE_FIRED,
            PyroChannel::Main => PYRO_STATUS_MAIN_FIRED,
        }
    }

    fn fail_mask(&self) -> u8 {
        match self {
            PyroChannel::Drogue => PYRO_STATUS_DROGUE_FAIL,
            PyroChannel::Main => PYRO_STATUS_MAIN_FAIL,
        }
    }
}

/// Decode a status byte into the snapshot, preserving the host-side
/// requested flags.
pub fn apply_status(snapshot: &mut PyroSnapshot, status_byte: u8, timestamp_ms: u64) {
    snapshot.status_byte = status_byte;
    snapshot.timestamp_ms = timestamp_ms;
    snapshot.drogue_fired = status_byte & PYRO_STATUS_DROGUE_FIRED != 0;
    snapshot.main_fired = status_byte & PYRO_STATUS_MAIN_FIRED != 0;
    snapshot.drogue_fail = status_byte & PYRO_STATUS_DROGUE_FAIL != 0;
    snapshot.main_fail = status_byte & PYRO_STATUS_MAIN_FAIL != 0;
    snapshot.drogue_cont_ok = status_byte & PYRO_STATUS_DROGUE_CONT_OK != 0;
    snapshot.main_cont_ok = status_byte & PYRO_STATUS_MAIN_CONT_OK != 0;
    snapshot.drogue_fire_ack = status_byte & PYRO_STATUS_DROGUE_FIRE_ACK != 0;
    snapshot.main_fire_ack = status_byte & PYRO_STATUS_MAIN_FIRE_ACK != 0;
}

// ── Link seam ────────────────────────────────────────────────────────────────

/// One-byte-out, one-byte-in transceive with the pyro board. Exactly one
/// task owns the link; there is no locking beyond that ownership.
#[async_trait]
pub trait PyroLink: Send {
    /// Whether the link probed ready at startup.
    fn ready(&self) -> bool {
        true
    }

    /// Send one command byte and receive the board's current status byte.
    async fn transact(&mut self, command: u8) -> Result<u8>;
}

// ── Public fire API ──────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PyroCommandError {
    /// The bounded command queue is full; the requested flag is already set,
    /// so the snapshot shows the requested-vs-acked mismatch.
    #[error("pyro command queue is full")]
    QueueFull,
    #[error("pyro driver is not running")]
    DriverGone,
}

/// Handle used by the state machine to request deployments. Fire-and-queue:
/// nothing here blocks on the board acknowledging.
#[derive(Clone)]
pub struct PyroCommander {
    commands: flume::Sender<PyroChannel>,
    store: Arc<SnapshotStore>,
}

impl PyroCommander {
    pub fn new(commands: flume::Sender<PyroChannel>, store: Arc<SnapshotStore>) -> Self {
        Self { commands, store }
    }

    pub async fn fire_drogue(&self) -> Result<(), PyroCommandError> {
        self.fire(PyroChannel::Drogue).await
    }

    pub async fn fire_main(&self) -> Result<(), PyroCommandError> {
        self.fire(PyroChannel::Main).await
    }

    async fn fire(&self, channel: PyroChannel) -> Result<(), PyroCommandError> {
        info!("{} fire command requested", channel.name());

        // Intent is recorded before the enqueue attempt so a full queue
        // still leaves the requested flag visible
        let mut snapshot = self.store.pyro().await;
        match channel {
            PyroChannel::Drogue => snapshot.drogue_fire_requested = true,
            PyroChannel::Main => snapshot.main_fire_requested = true,
        }
        self.store.publish_pyro(snapshot).await;

        self.commands.try_send(channel).map_err(|e| {
            error!("failed to queue {} fire command: {e}", channel.name());
            metrics::counter!("pyro.queue.rejected").increment(1);
            match e {
                flume::TrySendError::Full(_) => PyroCommandError::QueueFull,
                flume::TrySendError::Disconnected(_) => PyroCommandError::DriverGone,
            }
        })
    }
}

// ── Driver task ──────────────────────────────────────────────────────────────

/// Owns the link. Dequeues fire commands, transacts them with retry, and
/// keeps the status snapshot fresh with periodic polls.
pub struct PyroDriver {
    link: Box<dyn PyroLink>,
    commands: flume::Receiver<PyroChannel>,
    store: Arc<SnapshotStore>,
    clock: MonotonicClock,
}

impl PyroDriver {
    pub fn new(
        link: Box<dyn PyroLink>,
        commands: flume::Receiver<PyroChannel>,
        store: Arc<SnapshotStore>,
        clock: MonotonicClock,
    ) -> Self {
        Self {
            link,
            commands,
            store,
            clock,
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(mut self) {
        info!("pyro driver started");

        if !self.link.ready() {
            error!("pyro link not ready; driver task exiting");
            return;
        }

        let _ = self.request_status().await;

        loop {
            let poll = Duration::from_millis(PYRO_STATUS_POLL_INTERVAL_MS);
            let received = timeout(poll, self.commands.recv_async()).await;
            match received {
                Ok(Ok(channel)) => self.execute_fire(channel).await,
                Ok(Err(_)) => {
                    info!("pyro command queue closed; driver task exiting");
                    return;
                }
                // Idle: fall through to the status poll
                Err(_) => {}
            }

            let _ = self.request_status().await;
        }
    }

    /// Transact a fire command until its ACK bit shows up, at the retry
    /// cadence, up to the retry budget. An exhausted command is dropped, not
    /// re-queued.
    async fn execute_fire(&mut self, channel: PyroChannel) {
        info!(
            "executing pyro command {:#04x} ({})",
            channel.command_byte(),
            channel.name()
        );

        let mut acked = false;
        let mut attempts: u32 = 0;

        while !acked && attempts < PYRO_MAX_RETRIES {
            match self.transact_and_publish(channel.command_byte()).await {
                Ok(snapshot) => {
                    if snapshot.status_byte & channel.ack_mask() != 0 {
                        acked = true;
                        info!(
                            "pyro command {} acknowledged (attempt {})",
                            channel.name(),
                            attempts + 1
                        );
                        // Outcome may already be visible in the ack response
                        if snapshot.status_byte & channel.fired_mask() != 0 {
                            info!("{} fired (attempt {})", channel.name(), attempts + 1);
                        } else if snapshot.status_byte & channel.fail_mask() != 0 {
                            error!("{} fire failed (attempt {})", channel.name(), attempts + 1);
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "link error on pyro command {}: {e:#}",
                        channel.name()
                    );
                    metrics::counter!("pyro.transaction.errors").increment(1);
                }
            }

            if !acked {
                attempts += 1;
                metrics::counter!("pyro.fire.retries").increment(1);
                sleep(Duration::from_millis(PYRO_RETRY_INTERVAL_MS)).await;
            }
        }

        if !acked {
            error!(
                "pyro command {} not acknowledged after {} attempts",
                channel.name(),
                attempts
            );
        }
    }

    async fn request_status(&mut self) -> Result<()> {
        match self.transact_and_publish(PYRO_CMD_STATUS_REQ).await {
            Ok(snapshot) => {
                trace!("pyro status: {:#04x}", snapshot.status_byte);
                Ok(())
            }
            Err(e) => {
                error!("pyro status request failed: {e:#}");
                Err(e)
            }
        }
    }

    /// One transaction plus snapshot refresh: decode the returned status
    /// byte, stamp it, publish.
    async fn transact_and_publish(&mut self, command: u8) -> Result<PyroSnapshot> {
        trace!("pyro tx: {command:#04x}");
        let status_byte = self.link.transact(command).await?;
        trace!("pyro rx: {status_byte:#04x}");

        let mut snapshot = self.store.pyro().await;
        apply_status(&mut snapshot, status_byte, self.clock.now_ms());
        self.store.publish_pyro(snapshot).await;
        Ok(snapshot)
    }
}
