// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Contracts between this subsystem and its embedder.
//!
//! The live-migration framework owns the outer stream transport and invokes
//! the [`DeviceStateHooks`] at defined protocol phases, serialized per
//! device.  The run-state broadcaster delivers VM-wide running/stopped
//! transitions ordered by device-tree depth.  Both are implemented by the
//! embedding VMM; this crate only registers against them.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::migrate::MigrateError;

/// Stream hook points invoked by the live-migration framework.
///
/// Invocation is serialized per device.  `save_*` hooks run on the source,
/// `load_*` on the destination; `*_setup`/`*_cleanup` bracket an attempt,
/// `save_complete_precopy` runs once precopy finishes with the VM stopped,
/// and `save_state`/`load_state` carry the per-device sections.
pub trait DeviceStateHooks: Send + Sync {
    /// Begin a save attempt.  `sink` is the attempt's error sink; it stays
    /// valid until `save_cleanup`.
    fn save_setup(
        &self,
        w: &mut dyn Write,
        sink: &Arc<ErrorSink>,
    ) -> Result<(), MigrateError>;

    fn save_cleanup(&self);

    fn save_complete_precopy(
        &self,
        w: &mut dyn Write,
    ) -> Result<(), MigrateError>;

    fn save_state(&self, w: &mut dyn Write) -> Result<(), MigrateError>;

    fn load_setup(&self) -> Result<(), MigrateError>;

    fn load_cleanup(&self);

    fn load_state(&self, r: &mut dyn Read) -> Result<(), MigrateError>;
}

/// Overall outcome of a migration attempt, as reported by the framework's
/// outcome notifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MigrateOutcome {
    Active,
    Completed,
    Cancelling,
    Cancelled,
    Failed,
}

impl fmt::Display for MigrateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrateOutcome::Active => "ACTIVE",
            MigrateOutcome::Completed => "COMPLETED",
            MigrateOutcome::Cancelling => "CANCELLING",
            MigrateOutcome::Cancelled => "CANCELLED",
            MigrateOutcome::Failed => "FAILED",
        };

        write!(f, "{}", s)
    }
}

/// VM-wide run state accompanying a broadcast notification.  Diagnostic
/// detail only; the `running` flag is what drives the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VmRunState {
    Running,
    Paused,
    Suspended,
    Halting,
}

impl fmt::Display for VmRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmRunState::Running => "running",
            VmRunState::Paused => "paused",
            VmRunState::Suspended => "suspended",
            VmRunState::Halting => "halting",
        };

        write!(f, "{}", s)
    }
}

/// Receiver for VM run-state transitions.
pub trait RunStateHandler: Send + Sync {
    fn run_state_change(&self, running: bool, state: VmRunState);
}

/// Receiver for migration-outcome notifications.
pub trait OutcomeHandler: Send + Sync {
    fn migration_outcome(&self, outcome: MigrateOutcome);
}

/// Registration handle for stream hooks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HooksToken(pub u64);

/// Registration handle for an outcome notifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutcomeToken(pub u64);

/// Registration handle for a run-state callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunStateToken(pub u64);

/// Handle to an installed migration blocker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockerToken(pub u64);

/// The blocker registry refused to install a blocker.
#[derive(Debug, Error)]
#[error("conflicting migration blocker: {0}")]
pub struct BlockerConflict(pub String);

/// The live-migration framework, as seen from a single device.
pub trait MigrateFramework: Send + Sync {
    /// Register `hooks` under the stream id `id`.
    fn register_device(
        &self,
        id: &str,
        hooks: Arc<dyn DeviceStateHooks>,
    ) -> HooksToken;

    fn unregister_device(&self, tok: HooksToken);

    fn register_outcome_notifier(
        &self,
        handler: Arc<dyn OutcomeHandler>,
    ) -> OutcomeToken;

    fn unregister_outcome_notifier(&self, tok: OutcomeToken);

    /// Install a named reason preventing any migration attempt while it
    /// remains registered.
    fn install_blocker(
        &self,
        reason: String,
    ) -> Result<BlockerToken, BlockerConflict>;

    fn remove_blocker(&self, tok: BlockerToken);
}

/// The VM run-state broadcaster.
///
/// `depth` is the device's distance from the root of the device tree; the
/// broadcaster dispatches ascending by depth when the VM starts and
/// descending when it stops, so a controller always observes a transition
/// before the devices behind it on start, and after them on stop.
pub trait RunStateBroadcast: Send + Sync {
    fn register(
        &self,
        depth: u32,
        handler: Arc<dyn RunStateHandler>,
    ) -> RunStateToken;

    fn unregister(&self, tok: RunStateToken);
}

/// First-error-wins slot attached to an in-progress migration attempt.
///
/// Callbacks with no failure-reporting path of their own (the run-state
/// bridge) post here so the outer pipeline observes the failure and aborts
/// the attempt.
#[derive(Default)]
pub struct ErrorSink {
    slot: Mutex<Option<MigrateError>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless an earlier error is already present.
    pub fn post(&self, err: MigrateError) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    pub fn take(&self) -> Option<MigrateError> {
        self.slot.lock().unwrap().take()
    }
}
