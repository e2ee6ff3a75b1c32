// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Negotiated device state transitions, with recovery on failure.

use slog::{crit, error, trace};

use super::{probes, Inner, MigrateError, Migration};
use crate::device::MigState;

impl Migration {
    /// Request that the device enter `target`, falling back to `recover` if
    /// the device refuses.
    ///
    /// On success the tracked state becomes `target` and any data channel
    /// the device opened for it is adopted.  If a channel is already open,
    /// the new one is closed immediately and the call fails with
    /// [`MigrateError::ChannelDesync`], leaving the existing handle intact.
    ///
    /// On failure the recovery ladder is: reach `recover` (attempt fails
    /// with [`MigrateError::StateTransitionFailed`], device stays usable);
    /// failing that, hard-reset the device
    /// ([`MigrateError::DeviceResetAfterFailure`]); and if even the reset
    /// fails the device is in an indeterminate state and the process aborts.
    pub fn set_state(
        &self,
        target: MigState,
        recover: MigState,
    ) -> Result<(), MigrateError> {
        let mut inner = self.inner.lock().unwrap();
        self.set_state_locked(&mut inner, target, recover)
    }

    pub(super) fn set_state_locked(
        &self,
        inner: &mut Inner,
        target: MigState,
        recover: MigState,
    ) -> Result<(), MigrateError> {
        let channel = match self.device.set_mig_state(target) {
            Ok(channel) => channel,
            Err(err) => {
                error!(
                    self.log,
                    "failed to change device state to {}: {}", target, err
                );
                return self.recover_state(inner, target, recover);
            }
        };

        if let Some(channel) = channel {
            if inner.channel.is_some() {
                // The device was likely reset asynchronously, terminating
                // the transfer our existing handle belongs to.  Close the
                // new channel; the original handle must survive untouched.
                error!(self.log, "migration data channel out of sync");
                drop(channel);
                return Err(MigrateError::ChannelDesync);
            }
            inner.channel = Some(channel);
        }

        inner.state = target;
        probes::set_state!(|| (self.device.name(), target.to_string()));
        trace!(self.log, "device state changed"; "state" => %target);

        Ok(())
    }

    /// Try to put the device in some good state after a failed transition.
    fn recover_state(
        &self,
        inner: &mut Inner,
        target: MigState,
        recover: MigState,
    ) -> Result<(), MigrateError> {
        match self.device.set_mig_state(recover) {
            Ok(channel) => {
                // Recovery targets never legitimately open a data channel.
                drop(channel);
                inner.state = recover;
                Err(MigrateError::StateTransitionFailed(target))
            }
            Err(err) => {
                error!(
                    self.log,
                    "failed to reach recovery state {}: {}", recover, err
                );
                match self.device.reset() {
                    Ok(()) => {
                        // The reset closed whatever channel the kernel had
                        // open and returned the device to its initial
                        // running state.
                        inner.channel = None;
                        inner.state = MigState::Running;
                        error!(
                            self.log,
                            "device was reset after failing to reach \
                             recovery state {}",
                            recover
                        );
                        Err(MigrateError::DeviceResetAfterFailure(recover))
                    }
                    Err(err) => {
                        crit!(
                            self.log,
                            "device in error state and reset failed: {}", err
                        );
                        panic!(
                            "device {}: in error state, can't recover: {}",
                            self.device.name(),
                            err
                        );
                    }
                }
            }
        }
    }
}
