// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel-backed implementation of the device migration interface.

use std::io;

use vfio_api::VfioDevFd;

use crate::device::{DataChannel, DeviceConfig, MigDevice, MigFeatures, MigState};

/// A passthrough device wired up for migration.
///
/// Opening the descriptor and any PCI/bus plumbing happen elsewhere; this
/// type owns the handle for the duration of migration support and speaks the
/// device-feature interface through it.  The bus layer may attach a config
/// capability for the device's emulated configuration state.
pub struct VfioDevice {
    name: String,
    fd: VfioDevFd,
    config: Option<Box<dyn DeviceConfig>>,
}

impl VfioDevice {
    pub fn new(name: String, fd: VfioDevFd) -> Self {
        Self { name, fd, config: None }
    }

    pub fn with_config(mut self, config: Box<dyn DeviceConfig>) -> Self {
        self.config = Some(config);
        self
    }
}

impl MigDevice for VfioDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn migration_features(&self) -> io::Result<MigFeatures> {
        let flags = self.fd.migration_features()?;
        Ok(MigFeatures::from_bits_truncate(flags))
    }

    fn set_mig_state(
        &self,
        target: MigState,
    ) -> io::Result<Option<DataChannel>> {
        let channel = self.fd.set_mig_state(target.into())?;
        Ok(channel.map(DataChannel::from))
    }

    fn reset(&self) -> io::Result<()> {
        self.fd.reset()
    }

    fn config(&self) -> Option<&dyn DeviceConfig> {
        self.config.as_deref()
    }
}
