// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device migration subsystem.
//!
//! [`Migration`] is the per-device context: it owns the device's tracked
//! migration state, the (at most one) open data channel, and the reusable
//! transfer buffer.  It implements the stream hooks the live-migration
//! framework invokes ([`codec`] defines the byte format they speak), the
//! run-state callback, and the outcome notifier.
//!
//! [`DeviceMigration`] is the lifecycle wrapper: capability probing at
//! device-attach time, registration with the external collaborators, and
//! idempotent teardown.

pub mod codec;
mod destination;
mod runstate;
mod source;
mod state;
#[cfg(test)]
mod test_util;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, Weak};

use slog::{info, o};
use thiserror::Error;

use crate::device::{DataChannel, MigDevice, MigFeatures, MigState};
use crate::framework::{
    BlockerToken, DeviceStateHooks, ErrorSink, HooksToken, MigrateFramework,
    MigrateOutcome, OutcomeHandler, OutcomeToken, RunStateBroadcast,
    RunStateHandler, RunStateToken, VmRunState,
};
use crate::stats::TransferStats;

pub use source::BlockOutcome;

/// Errors encountered while migrating a device.  Everything here is
/// recoverable at migration-attempt granularity; the one process-fatal
/// condition (reset failure after failed recovery) panics instead.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Device lacks the minimum migration capability.
    #[error("device does not support migration")]
    Unsupported,

    /// The requested transition failed but the recovery transition
    /// succeeded.  The attempt must be abandoned; the device remains usable.
    #[error("failed to change device state to {0}")]
    StateTransitionFailed(MigState),

    /// Both the requested and recovery transitions failed, and a hard reset
    /// brought the device back at the cost of all in-flight state.
    #[error("device was reset after failing to reach recovery state {0}")]
    DeviceResetAfterFailure(MigState),

    /// A second data channel appeared while one was already open, most
    /// likely because the device reset asynchronously mid-transfer.
    #[error("migration data channel out of sync")]
    ChannelDesync,

    /// Draining bulk state from the device channel failed.
    #[error("failed to read from migration data channel: {0}")]
    ChannelRead(#[source] std::io::Error),

    /// Stream framing violation on load.
    #[error("malformed migration stream: {0}")]
    MalformedStream(String),

    /// Unrecognized section tag on load.
    #[error("unknown migration stream tag {0:#018x}")]
    UnknownStreamTag(u64),

    /// I/O error on the outer migration stream.
    #[error("migration stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocker registry refused the blocker we tried to install.
    #[error("failed to install migration blocker: {0}")]
    BlockerConflict(String),
}

/// Capacity of the reusable transfer buffer.  Bounds both the memory
/// footprint of a context and the worst-case latency of a single pump
/// iteration.
pub(crate) const DATA_BUFFER_SIZE: usize = 1024 * 1024;

#[usdt::provider(provider = "vfio_migrate")]
mod probes {
    fn set_state(device: &str, state: &str) {}
    fn save_block(device: &str, bytes: u64) {}
    fn load_block(device: &str, bytes: u64) {}
    fn run_state_change(device: &str, running: u8) {}
}

pub(crate) struct Inner {
    /// Tracked device migration state.  Exactly one value is current at any
    /// instant.
    state: MigState,

    /// The open data channel, while the device is in STOP_COPY or RESUMING.
    channel: Option<DataChannel>,

    /// Reusable bounded transfer buffer.
    buffer: Vec<u8>,
}

/// Per-device migration context.
///
/// The interior mutex makes the single-writer assumption explicit: the
/// framework serializes hook invocation per device, but the run-state
/// callback and the outcome notifier may fire from other contexts.
pub struct Migration {
    device: Arc<dyn MigDevice>,
    log: slog::Logger,
    stats: TransferStats,
    inner: Mutex<Inner>,

    /// Error sink of the in-progress save attempt, if any.  Bound in
    /// `save_setup`, cleared in `save_cleanup`; never an owning reference.
    err_sink: Mutex<Weak<ErrorSink>>,
}

impl Migration {
    pub fn new(
        device: Arc<dyn MigDevice>,
        stats: TransferStats,
        log: &slog::Logger,
    ) -> Arc<Self> {
        let log = log.new(o!("device" => device.name().to_string()));
        Arc::new(Self {
            device,
            log,
            stats,
            inner: Mutex::new(Inner {
                state: MigState::Running,
                channel: None,
                buffer: vec![0; DATA_BUFFER_SIZE],
            }),
            err_sink: Mutex::new(Weak::new()),
        })
    }

    /// The device migration state as of the last negotiated transition.
    pub fn device_state(&self) -> MigState {
        self.inner.lock().unwrap().state
    }

    fn close_channel(&self) {
        self.inner.lock().unwrap().channel = None;
    }

    fn bind_error_sink(&self, sink: &Arc<ErrorSink>) {
        *self.err_sink.lock().unwrap() = Arc::downgrade(sink);
    }

    fn clear_error_sink(&self) {
        *self.err_sink.lock().unwrap() = Weak::new();
    }

    fn error_sink(&self) -> Option<Arc<ErrorSink>> {
        self.err_sink.lock().unwrap().upgrade()
    }

    #[cfg(test)]
    pub(crate) fn channel_open(&self) -> bool {
        self.inner.lock().unwrap().channel.is_some()
    }
}

impl DeviceStateHooks for Migration {
    fn save_setup(
        &self,
        w: &mut dyn Write,
        sink: &Arc<ErrorSink>,
    ) -> Result<(), MigrateError> {
        Migration::save_setup(self, w, sink)
    }

    fn save_cleanup(&self) {
        Migration::save_cleanup(self)
    }

    fn save_complete_precopy(
        &self,
        w: &mut dyn Write,
    ) -> Result<(), MigrateError> {
        Migration::save_complete_precopy(self, w)
    }

    fn save_state(&self, w: &mut dyn Write) -> Result<(), MigrateError> {
        Migration::save_state(self, w)
    }

    fn load_setup(&self) -> Result<(), MigrateError> {
        Migration::load_setup(self)
    }

    fn load_cleanup(&self) {
        Migration::load_cleanup(self)
    }

    fn load_state(&self, r: &mut dyn Read) -> Result<(), MigrateError> {
        Migration::load_state(self, r)
    }
}

impl RunStateHandler for Migration {
    fn run_state_change(&self, running: bool, state: VmRunState) {
        Migration::run_state_change(self, running, state)
    }
}

impl OutcomeHandler for Migration {
    fn migration_outcome(&self, outcome: MigrateOutcome) {
        Migration::migration_outcome(self, outcome)
    }
}

enum Support {
    Enabled {
        migration: Arc<Migration>,
        hooks_tok: HooksToken,
        runstate_tok: RunStateToken,
        outcome_tok: OutcomeToken,
    },
    Blocked {
        blocker: BlockerToken,
    },
}

/// Migration lifecycle of one device: probe at attach, finalize at detach.
pub struct DeviceMigration {
    framework: Arc<dyn MigrateFramework>,
    broadcast: Arc<dyn RunStateBroadcast>,
    log: slog::Logger,
    support: Mutex<Option<Support>>,
}

impl DeviceMigration {
    /// Probe `device` for migration support and wire it into the
    /// collaborators.
    ///
    /// If migration is disabled by configuration, the capability query
    /// fails, or the device lacks bulk-copy support, a blocker is installed
    /// instead and no context is allocated; that is a degraded-capability
    /// notice, not an error.  The only hard failure is the blocker registry
    /// refusing the blocker.
    ///
    /// `depth` is the device's device-tree depth, forwarded verbatim to the
    /// run-state broadcaster as the dispatch priority.
    pub fn probe(
        device: Arc<dyn MigDevice>,
        enabled: bool,
        depth: u32,
        stats: TransferStats,
        framework: Arc<dyn MigrateFramework>,
        broadcast: Arc<dyn RunStateBroadcast>,
        log: &slog::Logger,
    ) -> Result<Self, MigrateError> {
        let log = log.new(o!("device" => device.name().to_string()));

        let support = match Self::init(
            &device, enabled, depth, &stats, &framework, &broadcast, &log,
        ) {
            Ok(support) => {
                info!(log, "device migration enabled");
                support
            }
            Err(err) => {
                info!(log, "device migration unavailable: {}", err);
                let reason = format!(
                    "VFIO device '{}' does not support migration",
                    device.name()
                );
                let blocker = framework
                    .install_blocker(reason)
                    .map_err(|c| MigrateError::BlockerConflict(c.to_string()))?;
                Support::Blocked { blocker }
            }
        };

        Ok(Self {
            framework,
            broadcast,
            log,
            support: Mutex::new(Some(support)),
        })
    }

    fn init(
        device: &Arc<dyn MigDevice>,
        enabled: bool,
        depth: u32,
        stats: &TransferStats,
        framework: &Arc<dyn MigrateFramework>,
        broadcast: &Arc<dyn RunStateBroadcast>,
        log: &slog::Logger,
    ) -> Result<Support, MigrateError> {
        if !enabled {
            return Err(MigrateError::Unsupported);
        }

        let features = device
            .migration_features()
            .map_err(|_| MigrateError::Unsupported)?;
        if !features.contains(MigFeatures::STOP_COPY) {
            return Err(MigrateError::Unsupported);
        }

        let migration = Migration::new(device.clone(), stats.clone(), log);
        let id = format!("{}/vfio", device.name());
        let hooks_tok = framework.register_device(&id, migration.clone());
        let runstate_tok = broadcast.register(depth, migration.clone());
        let outcome_tok =
            framework.register_outcome_notifier(migration.clone());

        Ok(Support::Enabled { migration, hooks_tok, runstate_tok, outcome_tok })
    }

    /// Whether probing left a blocker in place instead of a live context.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self.support.lock().unwrap().as_ref(),
            Some(Support::Blocked { .. })
        )
    }

    /// The live migration context, when one was allocated.
    pub fn migration(&self) -> Option<Arc<Migration>> {
        match self.support.lock().unwrap().as_ref() {
            Some(Support::Enabled { migration, .. }) => Some(migration.clone()),
            _ => None,
        }
    }

    /// Tear down migration support: unregister from the collaborators, free
    /// the context (closing any open channel), and release any blocker.
    /// Calling this again afterwards is a no-op.
    pub fn finalize(&self) {
        let Some(support) = self.support.lock().unwrap().take() else {
            return;
        };

        match support {
            Support::Enabled {
                migration,
                hooks_tok,
                runstate_tok,
                outcome_tok,
            } => {
                self.framework.unregister_outcome_notifier(outcome_tok);
                self.broadcast.unregister(runstate_tok);
                self.framework.unregister_device(hooks_tok);
                drop(migration);
                info!(self.log, "device migration torn down");
            }
            Support::Blocked { blocker } => {
                self.framework.remove_blocker(blocker);
            }
        }
    }
}
