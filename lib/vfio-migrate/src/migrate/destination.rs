// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Destination-side stream hooks: entering the resuming state and feeding
//! received sections back into the device.

use std::io::Read;

use slog::trace;

use super::{codec, probes, Inner, MigrateError, Migration};
use crate::device::MigState;

impl Migration {
    /// Prepare the device to accept state.  Entering RESUMING opens the
    /// channel the received data blocks will be appended to; on failure we
    /// try to stay wherever we already were.
    pub fn load_setup(&self) -> Result<(), MigrateError> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.state;
        self.set_state_locked(&mut inner, MigState::Resuming, current)?;
        trace!(self.log, "load_setup");
        Ok(())
    }

    pub fn load_cleanup(&self) {
        self.close_channel();
        trace!(self.log, "load_cleanup");
    }

    /// Consume one received device stream, appending data-block payloads to
    /// the device channel in receipt order.
    pub fn load_state(&self, r: &mut dyn Read) -> Result<(), MigrateError> {
        let mut inner = self.inner.lock().unwrap();
        let Inner { channel, buffer, .. } = &mut *inner;
        let config = self.device.config();

        codec::read_stream(r, config, buffer, &mut |bytes| {
            let channel =
                channel.as_mut().ok_or(MigrateError::ChannelDesync)?;
            channel.append(bytes)?;
            probes::load_block!(|| (self.device.name(), bytes.len() as u64));
            trace!(self.log, "loaded data block"; "bytes" => bytes.len());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use crate::stats::TransferStats;
    use std::io::Cursor;
    use std::sync::Arc;

    fn migration_for(device: &Arc<FakeDevice>) -> Arc<Migration> {
        Migration::new(device.clone(), TransferStats::new(), &test_log())
    }

    fn data_block(bytes: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend(0xffffffffef100004u64.to_be_bytes());
        v.extend((bytes.len() as u64).to_be_bytes());
        v.extend_from_slice(bytes);
        v
    }

    const END: u64 = 0xffffffffef100001;

    #[test]
    fn load_setup_enters_resuming_and_adopts_channel() {
        let device = Arc::new(FakeDevice::new());
        let m = migration_for(&device);
        m.set_state(MigState::Stop, MigState::Error).unwrap();
        device.queue_channel(SharedChannel::default().channel());

        m.load_setup().unwrap();
        assert_eq!(m.device_state(), MigState::Resuming);
        assert!(m.channel_open());
        // The recovery target for load_setup is the state the device held
        // beforehand.
        assert_eq!(
            device.transitions(),
            vec![MigState::Stop, MigState::Resuming]
        );
    }

    #[test]
    fn failed_resuming_entry_recovers_to_previous_state() {
        let device = Arc::new(FakeDevice::new());
        device.fail_transition(MigState::Resuming);
        let m = migration_for(&device);
        m.set_state(MigState::Stop, MigState::Error).unwrap();

        let res = m.load_setup();
        assert!(matches!(
            res,
            Err(MigrateError::StateTransitionFailed(MigState::Resuming))
        ));
        assert_eq!(m.device_state(), MigState::Stop);
    }

    #[test]
    fn setup_section_loads_with_no_side_effect() {
        let device = Arc::new(FakeDevice::new());
        let m = migration_for(&device);

        let mut bytes = Vec::new();
        bytes.extend(0xffffffffef100003u64.to_be_bytes());
        bytes.extend(END.to_be_bytes());
        let mut r = Cursor::new(bytes);

        m.load_state(&mut r).unwrap();
        assert_eq!(r.position(), 16);
        assert!(!m.channel_open());
    }

    #[test]
    fn data_blocks_are_appended_to_the_channel() {
        let device = Arc::new(FakeDevice::new());
        let chan = SharedChannel::default();
        device.queue_channel(chan.channel());
        let m = migration_for(&device);
        m.load_setup().unwrap();

        let mut bytes = data_block(&[1, 2, 3, 4]);
        bytes.extend(data_block(&[]));
        bytes.extend(data_block(&[5, 6]));
        bytes.extend(END.to_be_bytes());
        let mut r = Cursor::new(bytes);

        m.load_state(&mut r).unwrap();
        assert_eq!(chan.written(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn data_before_unknown_tag_still_reaches_the_channel() {
        let device = Arc::new(FakeDevice::new());
        let chan = SharedChannel::default();
        device.queue_channel(chan.channel());
        let m = migration_for(&device);
        m.load_setup().unwrap();

        let mut bytes = data_block(&[0x7e; 16]);
        bytes.extend(0xbad0_0bad_0bad_0badu64.to_be_bytes());
        let mut r = Cursor::new(bytes);

        let res = m.load_state(&mut r);
        assert_eq!(chan.written(), vec![0x7e; 16]);
        assert!(matches!(res, Err(MigrateError::UnknownStreamTag(_))));
    }

    #[test]
    fn data_without_a_channel_is_a_desync() {
        let device = Arc::new(FakeDevice::new());
        let m = migration_for(&device);

        let mut bytes = data_block(&[9; 8]);
        bytes.extend(END.to_be_bytes());
        let mut r = Cursor::new(bytes);

        let res = m.load_state(&mut r);
        assert!(matches!(res, Err(MigrateError::ChannelDesync)));
    }

    #[test]
    fn config_section_reaches_the_device_capability() {
        let config = TestConfig::new(b"config-state");
        let device =
            Arc::new(FakeDevice::new().set_config(config.clone()));
        let m = migration_for(&device);

        let mut bytes = Vec::new();
        bytes.extend(0xffffffffef100002u64.to_be_bytes());
        bytes.extend(b"config-state");
        bytes.extend(END.to_be_bytes());
        let mut r = Cursor::new(bytes);

        m.load_state(&mut r).unwrap();
        assert_eq!(config.loaded(), b"config-state".to_vec());
    }

    #[test]
    fn config_section_missing_end_marker_is_malformed() {
        let config = TestConfig::new(b"cc");
        let device =
            Arc::new(FakeDevice::new().set_config(config.clone()));
        let m = migration_for(&device);

        let mut bytes = Vec::new();
        bytes.extend(0xffffffffef100002u64.to_be_bytes());
        bytes.extend(b"cc");
        bytes.extend(0xffffffffef100003u64.to_be_bytes());
        let mut r = Cursor::new(bytes);

        let res = m.load_state(&mut r);
        assert!(matches!(res, Err(MigrateError::MalformedStream(_))));
    }

    #[test]
    fn load_cleanup_closes_channel() {
        let device = Arc::new(FakeDevice::new());
        device.queue_channel(SharedChannel::default().channel());
        let m = migration_for(&device);
        m.load_setup().unwrap();
        assert!(m.channel_open());

        m.load_cleanup();
        assert!(!m.channel_open());
    }
}
