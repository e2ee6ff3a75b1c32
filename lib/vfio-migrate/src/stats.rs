// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Aggregate transferred-byte counter for a migration session.
///
/// The session object coordinating a migration creates one of these and
/// hands a clone to every device it probes; all devices in the session feed
/// the same total.  The pump bumps it from the migration thread and the
/// outcome handler zeroes it from the notification context, hence the
/// atomic.
#[derive(Clone, Default)]
pub struct TransferStats(Arc<AtomicI64>);

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes moved by every successful data-block write since the counter
    /// was last reset.  Monotonic within a migration attempt.
    pub fn transferred_bytes(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn add(&self, bytes: usize) {
        self.0.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}
