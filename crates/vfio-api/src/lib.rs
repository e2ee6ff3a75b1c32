#![allow(non_camel_case_types)]

use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::mem::size_of;
use std::os::fd::*;

pub use vfio_api_sys::*;

/// Handle to an open VFIO device.
///
/// Acquisition of the descriptor (container/group/cdev wiring) is the bus
/// layer's business; this type only issues device-scoped ioctls against a
/// descriptor it is given.
pub struct VfioDevFd(File);

impl VfioDevFd {
    /// Create new instance from raw `File` resource
    ///
    /// # Safety
    ///
    /// Caller is expected to provide a `File` resource which is a valid VFIO
    /// device.  (Or alternatively, is not to make any vfio-related ioctls, if
    /// this instance was created for unit-testing purposes.)
    pub unsafe fn new(fp: File) -> Self {
        Self(fp)
    }

    /// Issue ioctl against open device handle
    ///
    /// # Safety
    ///
    /// Caller is charged with providing `data` argument which is adequate for
    /// any copyin/copyout actions which may occur as part of the ioctl
    /// processing.
    pub unsafe fn ioctl<T>(&self, cmd: i32, data: *mut T) -> Result<i32> {
        ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void)
    }

    pub fn ioctl_usize(&self, cmd: i32, data: usize) -> Result<i32> {
        if !Self::ioctl_usize_safe(cmd) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "unsafe cmd provided",
            ));
        }
        // Safety: Since we are explicitly filtering for vfio ioctls which will
        // not assume the data argument is a pointer for copyin/copyout, we can
        // dismiss those dangers.  The caller is assumed to be cognizant of
        // other potential side effects.
        unsafe { ioctl(self.as_raw_fd(), cmd, data as *mut libc::c_void) }
    }

    /// Query the migration feature flags advertised by the device.
    ///
    /// An `ENOTTY` result means the device (or its driver) predates the
    /// device-feature interface entirely.
    pub fn migration_features(&self) -> Result<u64> {
        let mut req = feature_migration {
            hdr: vfio_device_feature {
                argsz: size_of::<feature_migration>() as u32,
                flags: VFIO_DEVICE_FEATURE_GET | VFIO_DEVICE_FEATURE_MIGRATION,
            },
            mig: vfio_device_feature_migration::default(),
        };

        // Safety: We are using the appropriate struct for this ioctl
        unsafe { self.ioctl(ioctls::VFIO_DEVICE_FEATURE, &mut req) }?;

        Ok(req.mig.flags)
    }

    /// Request that the device enter migration state `state`
    /// (a `VFIO_DEVICE_STATE_*` value).
    ///
    /// When the kernel reports a freshly opened data channel for the state
    /// (STOP_COPY and RESUMING do this), ownership of that descriptor is
    /// returned to the caller.
    pub fn set_mig_state(&self, state: u32) -> Result<Option<File>> {
        let mut req = feature_mig_state {
            hdr: vfio_device_feature {
                argsz: size_of::<feature_mig_state>() as u32,
                flags: VFIO_DEVICE_FEATURE_SET
                    | VFIO_DEVICE_FEATURE_MIG_DEVICE_STATE,
            },
            state: vfio_device_feature_mig_state {
                device_state: state,
                data_fd: -1,
            },
        };

        // Safety: We are using the appropriate struct for this ioctl
        unsafe { self.ioctl(ioctls::VFIO_DEVICE_FEATURE, &mut req) }?;

        if req.state.data_fd != -1 {
            // Safety: the kernel has just transferred ownership of this
            // descriptor to us.
            Ok(Some(unsafe { File::from_raw_fd(req.state.data_fd) }))
        } else {
            Ok(None)
        }
    }

    /// Perform a hard reset of the device.
    pub fn reset(&self) -> Result<()> {
        self.ioctl_usize(ioctls::VFIO_DEVICE_RESET, 0)?;
        Ok(())
    }

    /// Check VFIO ioctl command against those known to not require any
    /// copyin/copyout to function.
    const fn ioctl_usize_safe(cmd: i32) -> bool {
        matches!(cmd, ioctls::VFIO_DEVICE_RESET)
    }
}

impl AsRawFd for VfioDevFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// `VFIO_DEVICE_FEATURE` request carrying a migration-flags query.
#[repr(C)]
pub struct feature_migration {
    pub hdr: vfio_device_feature,
    pub mig: vfio_device_feature_migration,
}

/// `VFIO_DEVICE_FEATURE` request carrying a migration state change.
#[repr(C)]
pub struct feature_mig_state {
    pub hdr: vfio_device_feature,
    pub state: vfio_device_feature_mig_state,
}

#[cfg(target_os = "linux")]
unsafe fn ioctl(fd: RawFd, cmd: i32, data: *mut libc::c_void) -> Result<i32> {
    match libc::ioctl(fd, cmd as libc::c_ulong, data) {
        -1 => Err(Error::last_os_error()),
        other => Ok(other),
    }
}

#[cfg(not(target_os = "linux"))]
unsafe fn ioctl(
    _fd: RawFd,
    _cmd: i32,
    _data: *mut libc::c_void,
) -> Result<i32> {
    Err(Error::new(ErrorKind::Other, "linux required"))
}
