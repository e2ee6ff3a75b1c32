// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ioctl numbers for the VFIO device interface.
//!
//! VFIO encodes every command with `_IO` (no size or direction bits); the
//! size of a request travels in the `argsz` member of the request struct
//! instead.

const VFIO_TYPE: i32 = b';' as i32;
const VFIO_BASE: i32 = 100;

const fn vfio_io(nr: i32) -> i32 {
    (VFIO_TYPE << 8) | (VFIO_BASE + nr)
}

pub const VFIO_DEVICE_GET_INFO: i32 = vfio_io(7);
pub const VFIO_DEVICE_RESET: i32 = vfio_io(9);
pub const VFIO_DEVICE_FEATURE: i32 = vfio_io(17);
