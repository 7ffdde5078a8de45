// Copyright (C) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A device-wide count of tasks currently holding a worker slot.
//!
//! This is a liveness signal, not an admission control: the scheduler's
//! own `k_total`/`k_bundle` caps are what actually bound concurrency. The
//! counter exists so the embedding binary can decide when it's safe to
//! idle or shut down, and so it has a number to broadcast on the
//! run-count notification channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::trace;

/// Thread-safe counter for tracking how many tasks are presently running.
#[derive(Clone)]
pub(crate) struct ActiveCounter {
    count: Arc<AtomicU32>,
}

impl ActiveCounter {
    pub(crate) fn new() -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement(&self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }

    /// `true` if any task currently holds a worker slot.
    pub(crate) fn is_active(&self) -> bool {
        let count = self.count.load(Ordering::Relaxed);
        trace!("active count: {count}");
        count > 0
    }

    /// The exact running count, for the run-count broadcast.
    pub(crate) fn get(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for ActiveCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_counter_is_not_active() {
        let counter = ActiveCounter::new();
        assert!(!counter.is_active());
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn increment_then_decrement_returns_to_inactive() {
        let counter = ActiveCounter::new();
        counter.increment();
        assert!(counter.is_active());
        counter.decrement();
        assert!(!counter.is_active());
    }

    #[test]
    fn multiple_increments_are_reflected_in_get() {
        let counter = ActiveCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn clones_share_the_same_underlying_count() {
        let counter = ActiveCounter::new();
        let clone = counter.clone();
        counter.increment();
        assert_eq!(clone.get(), 1);
    }
}
