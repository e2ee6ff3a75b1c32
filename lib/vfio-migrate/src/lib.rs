// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live migration support for VFIO passthrough devices.
//!
//! A passthrough device carries runtime state which lives inside the kernel
//! driver rather than in this process.  Migrating such a device means
//! negotiating driver-defined state transitions against the device, draining
//! its bulk state through a dedicated data channel into a tagged byte
//! stream, and replaying that stream into the device on the destination.
//!
//! The pieces:
//!
//! - [`device`] holds the seam traits for the device side: the negotiated
//!   state interface, the data channel, and the optional config-state
//!   capability.
//! - [`migrate`] is the subsystem proper: state machine, stream codec,
//!   block pump, run-state bridge, and per-device lifecycle.
//! - [`framework`] defines the contracts this crate expects from its
//!   embedder: the live-migration framework that invokes the stream hooks,
//!   the VM run-state broadcaster, and the blocker registry.
//! - [`vfio`] provides the real kernel-backed device implementation on top
//!   of `vfio_api`.

pub mod device;
pub mod framework;
pub mod migrate;
pub mod stats;
pub mod vfio;

pub use device::{DataChannel, DeviceConfig, MigDevice, MigFeatures, MigState};
pub use migrate::{DeviceMigration, MigrateError, Migration};
pub use stats::TransferStats;
