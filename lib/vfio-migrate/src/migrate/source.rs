// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Source-side stream hooks: setup framing, the block pump draining the
//! device channel at precopy completion, and the terminal config section.

use std::io::Write;
use std::sync::Arc;

use slog::{info, trace};

use super::{codec, probes, Inner, MigrateError, Migration};
use crate::device::MigState;
use crate::framework::ErrorSink;

/// Outcome of one pump iteration against the device channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockOutcome {
    /// A block of this many bytes was written to the stream.
    Wrote(usize),
    /// The device has no more state to hand over.
    EndOfStream,
}

impl Migration {
    /// Begin a save attempt: emit the setup framing and hold on to the
    /// attempt's error sink for callbacks that cannot report failure
    /// directly.
    pub fn save_setup(
        &self,
        w: &mut dyn Write,
        sink: &Arc<ErrorSink>,
    ) -> Result<(), MigrateError> {
        self.bind_error_sink(sink);
        codec::write_setup_state(w)?;
        trace!(self.log, "save_setup");
        Ok(())
    }

    pub fn save_cleanup(&self) {
        self.close_channel();
        self.clear_error_sink();
        trace!(self.log, "save_cleanup");
    }

    /// Perform one bounded read from the device channel, forwarding any
    /// yielded bytes to the stream as a data block and crediting the
    /// session's transfer counter.
    pub(super) fn drain_one_block(
        &self,
        w: &mut dyn Write,
        inner: &mut Inner,
    ) -> Result<BlockOutcome, MigrateError> {
        let Inner { channel, buffer, .. } = inner;
        let channel = channel.as_mut().ok_or(MigrateError::ChannelDesync)?;

        let n =
            channel.read_block(buffer).map_err(MigrateError::ChannelRead)?;
        if n == 0 {
            return Ok(BlockOutcome::EndOfStream);
        }

        codec::write_data_block(w, &buffer[..n])?;
        self.stats.add(n);

        probes::save_block!(|| (self.device.name(), n as u64));
        trace!(self.log, "wrote data block"; "bytes" => n);

        Ok(BlockOutcome::Wrote(n))
    }

    /// Precopy is complete: move the device into its bulk-copy state, drain
    /// the channel into the stream, and bring the device back to STOP.
    pub fn save_complete_precopy(
        &self,
        w: &mut dyn Write,
    ) -> Result<(), MigrateError> {
        let mut inner = self.inner.lock().unwrap();

        // We reach here with the device already stopped.
        self.set_state_locked(&mut inner, MigState::StopCopy, MigState::Stop)?;

        while let BlockOutcome::Wrote(_) =
            self.drain_one_block(w, &mut inner)?
        {}

        codec::write_end_of_state(w)?;

        // A failure to cleanly leave bulk-copy has no fallback short of the
        // error sink state.
        self.set_state_locked(&mut inner, MigState::Stop, MigState::Error)?;

        info!(self.log, "save_complete_precopy");
        Ok(())
    }

    /// Emit the device config section.  This is the terminal section of the
    /// per-device stream.
    pub fn save_state(&self, w: &mut dyn Write) -> Result<(), MigrateError> {
        codec::write_config_state(w, self.device.config())?;
        trace!(self.log, "save_state");
        Ok(())
    }
}
