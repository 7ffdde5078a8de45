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

//! A cooperative cancellation signal checked between transfer chunks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Chunk size used as the suspension-point granularity for cancellation
/// checks during byte copying.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Why a worker's cancellation flag was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CancelKind {
    /// The user paused the task; partial progress is retained.
    Pause,
    /// The task was stopped by the system; partial file is discarded.
    Stop,
    /// The task was removed; partial file is discarded.
    Remove,
    /// The scheduler preempted the task because it lost network
    /// eligibility mid-transfer; it re-enters `Waiting`, not `Paused`.
    NetworkOffline,
}

/// A cooperative, cloneable cancellation token for one running attempt.
///
/// A worker checks `is_cancelled()` at each suspension point (after every
/// chunk, on every retry-backoff wake, before every socket read/write) and
/// unwinds cleanly rather than being preempted.
#[derive(Clone)]
pub(crate) struct TaskControl {
    cancelled: Arc<AtomicBool>,
    kind: Arc<std::sync::Mutex<Option<CancelKind>>>,
}

impl TaskControl {
    pub(crate) fn new() -> Self {
        TaskControl {
            cancelled: Arc::new(AtomicBool::new(false)),
            kind: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Raises the cancellation signal for the given reason. Idempotent:
    /// the first caller's `kind` wins.
    pub(crate) fn cancel(&self, kind: CancelKind) {
        let mut guard = self.kind.lock().unwrap();
        if guard.is_none() {
            *guard = Some(kind);
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The reason cancellation was raised, if it was.
    pub(crate) fn cancel_kind(&self) -> Option<CancelKind> {
        *self.kind.lock().unwrap()
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let ctl = TaskControl::new();
        assert!(!ctl.is_cancelled());
        assert_eq!(ctl.cancel_kind(), None);
    }

    #[test]
    fn cancel_is_visible_across_clones() {
        let ctl = TaskControl::new();
        let clone = ctl.clone();
        clone.cancel(CancelKind::Pause);
        assert!(ctl.is_cancelled());
        assert_eq!(ctl.cancel_kind(), Some(CancelKind::Pause));
    }

    #[test]
    fn first_cancel_reason_wins() {
        let ctl = TaskControl::new();
        ctl.cancel(CancelKind::Pause);
        ctl.cancel(CancelKind::Remove);
        assert_eq!(ctl.cancel_kind(), Some(CancelKind::Pause));
    }
}
