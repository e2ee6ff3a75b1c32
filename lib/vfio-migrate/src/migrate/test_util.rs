// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scriptable fakes for exercising the migration machinery without a
//! kernel.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use slog::{o, Discard, Logger};

use crate::device::{
    DataChannel, DeviceConfig, MigDevice, MigFeatures, MigState,
};
use crate::framework::{
    BlockerConflict, BlockerToken, DeviceStateHooks, HooksToken,
    MigrateFramework, OutcomeHandler, OutcomeToken, RunStateBroadcast,
    RunStateHandler, RunStateToken,
};

pub fn test_log() -> Logger {
    Logger::root(Discard, o!())
}

#[derive(Default)]
struct ChannelState {
    /// Blocks handed out by successive `read_block` calls; empty means
    /// end-of-stream.
    blocks: VecDeque<Vec<u8>>,
    /// Everything appended through the write half.
    written: Vec<u8>,
    fail_reads: bool,
}

/// In-memory channel backend, shared between a test and the `DataChannel`
/// handed to the context under test.
#[derive(Clone, Default)]
pub struct SharedChannel(Arc<Mutex<ChannelState>>);

impl SharedChannel {
    pub fn channel(&self) -> DataChannel {
        DataChannel::new(Box::new(self.clone()))
    }

    pub fn queue_block(&self, bytes: &[u8]) {
        self.0.lock().unwrap().blocks.push_back(bytes.to_vec());
    }

    pub fn fail_reads(&self) {
        self.0.lock().unwrap().fail_reads = true;
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }
}

impl Read for SharedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.lock().unwrap();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "injected"));
        }
        match state.blocks.pop_front() {
            None => Ok(0),
            Some(block) => {
                assert!(block.len() <= buf.len());
                buf[..block.len()].copy_from_slice(&block);
                Ok(block.len())
            }
        }
    }
}

impl Write for SharedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Config capability with a fixed payload; the load side verifies length by
/// reading exactly as many bytes as the save side produced.
#[derive(Clone)]
pub struct TestConfig {
    payload: Vec<u8>,
    loaded: Arc<Mutex<Vec<u8>>>,
}

impl TestConfig {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            loaded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn loaded(&self) -> Vec<u8> {
        self.loaded.lock().unwrap().clone()
    }
}

impl DeviceConfig for TestConfig {
    fn save(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(&self.payload)
    }

    fn load(&self, r: &mut dyn Read) -> io::Result<()> {
        let mut buf = vec![0; self.payload.len()];
        r.read_exact(&mut buf)?;
        *self.loaded.lock().unwrap() = buf;
        Ok(())
    }
}

/// Device double with scriptable transition failures and channel hand-out.
pub struct FakeDevice {
    features: Option<MigFeatures>,
    feature_queries: AtomicUsize,
    transitions: Mutex<Vec<MigState>>,
    failing: Mutex<Vec<MigState>>,
    pending_channels: Mutex<VecDeque<DataChannel>>,
    reset_count: AtomicUsize,
    reset_fails: AtomicBool,
    config: Option<Box<dyn DeviceConfig>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::with_features(Some(MigFeatures::STOP_COPY))
    }

    /// `features` of `None` makes the capability query fail outright.
    pub fn with_features(features: Option<MigFeatures>) -> Self {
        Self {
            features,
            feature_queries: AtomicUsize::new(0),
            transitions: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            pending_channels: Mutex::new(VecDeque::new()),
            reset_count: AtomicUsize::new(0),
            reset_fails: AtomicBool::new(false),
            config: None,
        }
    }

    pub fn set_config(mut self, config: TestConfig) -> Self {
        self.config = Some(Box::new(config));
        self
    }

    /// Make every future transition to `state` fail.
    pub fn fail_transition(&self, state: MigState) {
        self.failing.lock().unwrap().push(state);
    }

    /// Queue a channel to be reported by the next successful transition.
    pub fn queue_channel(&self, channel: DataChannel) {
        self.pending_channels.lock().unwrap().push_back(channel);
    }

    pub fn fail_reset(&self) {
        self.reset_fails.store(true, Ordering::Relaxed);
    }

    pub fn transitions(&self) -> Vec<MigState> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn reset_count(&self) -> usize {
        self.reset_count.load(Ordering::Relaxed)
    }

    pub fn feature_queries(&self) -> usize {
        self.feature_queries.load(Ordering::Relaxed)
    }
}

impl MigDevice for FakeDevice {
    fn name(&self) -> &str {
        "testdev"
    }

    fn migration_features(&self) -> io::Result<MigFeatures> {
        self.feature_queries.fetch_add(1, Ordering::Relaxed);
        self.features.ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "no feature support")
        })
    }

    fn set_mig_state(
        &self,
        target: MigState,
    ) -> io::Result<Option<DataChannel>> {
        if self.failing.lock().unwrap().contains(&target) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("transition to {} refused", target),
            ));
        }
        self.transitions.lock().unwrap().push(target);
        Ok(self.pending_channels.lock().unwrap().pop_front())
    }

    fn reset(&self) -> io::Result<()> {
        self.reset_count.fetch_add(1, Ordering::Relaxed);
        if self.reset_fails.load(Ordering::Relaxed) {
            Err(io::Error::new(io::ErrorKind::Other, "reset refused"))
        } else {
            Ok(())
        }
    }

    fn config(&self) -> Option<&dyn DeviceConfig> {
        self.config.as_deref()
    }
}

/// Recording double for the live-migration framework registry.
#[derive(Default)]
pub struct FakeFramework {
    next_token: AtomicU64,
    devices: Mutex<Vec<(HooksToken, String, Arc<dyn DeviceStateHooks>)>>,
    outcomes: Mutex<Vec<(OutcomeToken, Arc<dyn OutcomeHandler>)>>,
    blockers: Mutex<Vec<(BlockerToken, String)>>,
    reject_blockers: AtomicBool,
}

impl FakeFramework {
    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reject_blockers(&self) {
        self.reject_blockers.store(true, Ordering::Relaxed);
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.lock().unwrap().iter().map(|d| d.1.clone()).collect()
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    pub fn blocker_reasons(&self) -> Vec<String> {
        self.blockers.lock().unwrap().iter().map(|b| b.1.clone()).collect()
    }
}

impl MigrateFramework for FakeFramework {
    fn register_device(
        &self,
        id: &str,
        hooks: Arc<dyn DeviceStateHooks>,
    ) -> HooksToken {
        let tok = HooksToken(self.token());
        self.devices.lock().unwrap().push((tok, id.to_string(), hooks));
        tok
    }

    fn unregister_device(&self, tok: HooksToken) {
        self.devices.lock().unwrap().retain(|d| d.0 != tok);
    }

    fn register_outcome_notifier(
        &self,
        handler: Arc<dyn OutcomeHandler>,
    ) -> OutcomeToken {
        let tok = OutcomeToken(self.token());
        self.outcomes.lock().unwrap().push((tok, handler));
        tok
    }

    fn unregister_outcome_notifier(&self, tok: OutcomeToken) {
        self.outcomes.lock().unwrap().retain(|o| o.0 != tok);
    }

    fn install_blocker(
        &self,
        reason: String,
    ) -> Result<BlockerToken, BlockerConflict> {
        if self.reject_blockers.load(Ordering::Relaxed) {
            return Err(BlockerConflict("registry refused".to_string()));
        }
        let tok = BlockerToken(self.token());
        self.blockers.lock().unwrap().push((tok, reason));
        Ok(tok)
    }

    fn remove_blocker(&self, tok: BlockerToken) {
        self.blockers.lock().unwrap().retain(|b| b.0 != tok);
    }
}

/// Recording double for the run-state broadcaster.
#[derive(Default)]
pub struct FakeBroadcast {
    next_token: AtomicU64,
    registered: Mutex<Vec<(RunStateToken, u32, Arc<dyn RunStateHandler>)>>,
}

impl FakeBroadcast {
    pub fn depths(&self) -> Vec<u32> {
        self.registered.lock().unwrap().iter().map(|r| r.1).collect()
    }
}

impl RunStateBroadcast for FakeBroadcast {
    fn register(
        &self,
        depth: u32,
        handler: Arc<dyn RunStateHandler>,
    ) -> RunStateToken {
        let tok =
            RunStateToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        self.registered.lock().unwrap().push((tok, depth, handler));
        tok
    }

    fn unregister(&self, tok: RunStateToken) {
        self.registered.lock().unwrap().retain(|r| r.0 != tok);
    }
}
