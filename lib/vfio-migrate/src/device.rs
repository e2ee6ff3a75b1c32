// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seam traits for the device side of migration.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Migration states a passthrough device can occupy.
///
/// Discriminants match the kernel's `VFIO_DEVICE_STATE_*` values, so a state
/// converts to the wire representation with `u32::from`.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u32)]
pub enum MigState {
    /// Sink state reached only through failed recovery.  The only way out is
    /// a hard device reset.
    Error = 0,

    /// Device is quiesced and produces no DMA or interrupts.
    Stop = 1,

    /// Normal operation.
    Running = 2,

    /// Device is stopped and exposes its full internal state for linear
    /// extraction through a data channel.
    StopCopy = 3,

    /// Destination-side state in which the device accepts previously
    /// extracted state through a data channel.
    Resuming = 4,

    /// Running, but with peer-to-peer DMA quiesced.
    RunningP2p = 5,
}

impl fmt::Display for MigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigState::Error => "ERROR",
            MigState::Stop => "STOP",
            MigState::Running => "RUNNING",
            MigState::StopCopy => "STOP_COPY",
            MigState::Resuming => "RESUMING",
            MigState::RunningP2p => "RUNNING_P2P",
        };

        write!(f, "{}", s)
    }
}

bitflags! {
    /// Migration capabilities reported by the device, matching the kernel's
    /// `VFIO_MIGRATION_*` feature flags.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct MigFeatures: u64 {
        /// Device supports the STOP_COPY bulk-extraction state.  This is the
        /// minimum required for migration.
        const STOP_COPY = 1 << 0;
        /// Device supports the RUNNING_P2P intermediate state.
        const P2P = 1 << 1;
    }
}

/// Backing object for a [`DataChannel`].
pub trait ChannelBackend: Read + Write + Send {}
impl<T: Read + Write + Send> ChannelBackend for T {}

/// Exclusive handle to the byte channel a device exposes while in
/// [`MigState::StopCopy`] or [`MigState::Resuming`].
///
/// A context holds at most one of these at a time; the state controller
/// treats an unexpected second channel as a desync rather than replacing the
/// handle it already owns.
pub struct DataChannel(Box<dyn ChannelBackend>);

impl DataChannel {
    pub fn new(backend: Box<dyn ChannelBackend>) -> Self {
        Self(backend)
    }

    /// Read one bounded block of device state.  A zero-length read means the
    /// device has no more state to hand over.
    pub fn read_block(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    /// Append previously extracted state, in production order.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)
    }
}

impl From<File> for DataChannel {
    fn from(fp: File) -> Self {
        Self(Box::new(fp))
    }
}

/// Optional config-state capability of a device.
///
/// The payload format is the device's own business; the stream codec only
/// brackets it with section markers.  A device without this capability
/// simply contributes an empty config section.
pub trait DeviceConfig: Send + Sync {
    fn save(&self, w: &mut dyn Write) -> io::Result<()>;
    fn load(&self, r: &mut dyn Read) -> io::Result<()>;
}

/// Migration interface of a passthrough device.
///
/// The real implementation ([`crate::vfio::VfioDevice`]) forwards to the
/// kernel's device-feature interface; tests substitute scripted fakes.
/// State-change requests and channel reads are synchronous, potentially
/// blocking calls.
pub trait MigDevice: Send + Sync {
    /// Stable name used in diagnostics and registration ids.
    fn name(&self) -> &str;

    /// Query the device's migration capabilities.
    fn migration_features(&self) -> io::Result<MigFeatures>;

    /// Request that the device enter `target`.  If the device reports a
    /// newly opened data channel for the state, ownership of that channel is
    /// returned.
    fn set_mig_state(&self, target: MigState)
        -> io::Result<Option<DataChannel>>;

    /// Hard-reset the device, returning it to its initial running state and
    /// closing any channel it had open.
    fn reset(&self) -> io::Result<()>;

    /// The device's config-state capability, if it has one.
    fn config(&self) -> Option<&dyn DeviceConfig> {
        None
    }
}
