// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge between VM-wide notifications and the device state machine.

use slog::{trace, warn};

use super::{probes, Migration};
use crate::device::MigState;
use crate::framework::{MigrateOutcome, VmRunState};

impl Migration {
    /// Mirror a VM run-state transition onto the device.
    ///
    /// The broadcast has no failure-reporting path, so a failed transition
    /// is posted to the active migration attempt's error sink (when one is
    /// bound) for the outer pipeline to observe and abort on.
    pub fn run_state_change(&self, running: bool, vm_state: VmRunState) {
        let target =
            if running { MigState::Running } else { MigState::Stop };

        if let Err(err) = self.set_state(target, MigState::Error) {
            if let Some(sink) = self.error_sink() {
                sink.post(err);
            }
        }

        probes::run_state_change!(|| (self.device.name(), running as u8));
        trace!(
            self.log, "vm run-state change";
            "running" => running,
            "vm_state" => %vm_state,
            "target" => %target,
        );
    }

    /// React to the overall outcome of a migration attempt.
    ///
    /// A cancelled or failed attempt zeroes the session transfer counter
    /// and rolls the device back to RUNNING.  The rollback is best effort:
    /// the attempt is already over, so its own failure is only logged.
    pub fn migration_outcome(&self, outcome: MigrateOutcome) {
        trace!(self.log, "migration outcome"; "outcome" => %outcome);

        match outcome {
            MigrateOutcome::Cancelling
            | MigrateOutcome::Cancelled
            | MigrateOutcome::Failed => {
                self.stats.reset();
                if let Err(err) =
                    self.set_state(MigState::Running, MigState::Error)
                {
                    warn!(
                        self.log,
                        "failed to return device to running state: {}", err
                    );
                }
            }
            MigrateOutcome::Active | MigrateOutcome::Completed => {}
        }
    }
}
