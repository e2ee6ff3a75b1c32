// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structs and constants for the VFIO device-feature interface, matching the
//! kernel's `include/uapi/linux/vfio.h`.

/// Header preceding every device-feature payload.  `argsz` covers both the
/// header and the payload which follows it in memory.
#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct vfio_device_feature {
    pub argsz: u32,
    pub flags: u32,
}

pub const VFIO_DEVICE_FEATURE_MASK: u32 = 0xffff;
pub const VFIO_DEVICE_FEATURE_GET: u32 = 1 << 16;
pub const VFIO_DEVICE_FEATURE_SET: u32 = 1 << 17;
pub const VFIO_DEVICE_FEATURE_PROBE: u32 = 1 << 18;

/// Feature: query the migration flags supported by the device.
pub const VFIO_DEVICE_FEATURE_MIGRATION: u32 = 1;
/// Feature: get or set the device migration state.
pub const VFIO_DEVICE_FEATURE_MIG_DEVICE_STATE: u32 = 2;

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct vfio_device_feature_migration {
    pub flags: u64,
}

pub const VFIO_MIGRATION_STOP_COPY: u64 = 1 << 0;
pub const VFIO_MIGRATION_P2P: u64 = 1 << 1;

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct vfio_device_feature_mig_state {
    pub device_state: u32,
    pub data_fd: i32,
}

pub const VFIO_DEVICE_STATE_ERROR: u32 = 0;
pub const VFIO_DEVICE_STATE_STOP: u32 = 1;
pub const VFIO_DEVICE_STATE_RUNNING: u32 = 2;
pub const VFIO_DEVICE_STATE_STOP_COPY: u32 = 3;
pub const VFIO_DEVICE_STATE_RESUMING: u32 = 4;
pub const VFIO_DEVICE_STATE_RUNNING_P2P: u32 = 5;
