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

//! The task lifecycle state machine and the read-only snapshot handed back
//! to query callers.

use super::config::{Action, CommonTaskConfig, Mode, TaskConfig, Version};
use super::notify::{EachFileStatus, Progress};
use super::reason::Reason;

/// A task's position in its lifecycle.
///
/// Transitions are driven exclusively by the scheduler and the transfer
/// engine; no other component mutates this value directly.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum State {
    /// Registered, not yet evaluated by the scheduler.
    Initialized = 0,
    /// Eligible to run but not currently holding a worker slot.
    Waiting = 1,
    /// Holding a worker slot; the transfer engine is active.
    Running = 2,
    /// Recovering from a retryable failure; will return to `Waiting`.
    Retrying = 3,
    /// Suspended by the user; holds its progress, not a worker slot.
    Paused = 4,
    /// Suspended by the system (e.g. app background/terminate); same
    /// invariants as `Paused`.
    Stopped = 5,
    /// Terminal: every file transferred successfully.
    Completed = 6,
    /// Terminal: retries exhausted or a non-recoverable fault occurred.
    Failed = 7,
    /// Terminal: the client explicitly removed the task.
    Removed = 8,
}

impl State {
    /// `true` for the three states that no longer consume scheduler
    /// attention or a database row beyond the retention window.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed | State::Removed)
    }

    /// `true` for the states that can be resumed back into `Waiting`
    /// without rebuilding the task (i.e. not terminal).
    pub fn is_resumable(self) -> bool {
        matches!(self, State::Paused | State::Stopped)
    }
}

impl From<u8> for State {
    fn from(value: u8) -> Self {
        match value {
            0 => State::Initialized,
            1 => State::Waiting,
            2 => State::Running,
            3 => State::Retrying,
            4 => State::Paused,
            5 => State::Stopped,
            6 => State::Completed,
            7 => State::Failed,
            _ => State::Removed,
        }
    }
}

/// Identity and bookkeeping fields common to every task, independent of its
/// transport-specific configuration.
#[derive(Clone, Debug)]
pub struct CommonTaskInfo {
    /// The task's identifier.
    pub task_id: u32,
    /// Owning UID, i.e. the account the creating bundle ran under.
    pub uid: u64,
    /// Action: download or upload.
    pub action: Action,
    /// Execution mode.
    pub mode: Mode,
    /// Creation time, milliseconds since epoch.
    pub ctime: u64,
    /// Last-modified time, milliseconds since epoch.
    pub mtime: u64,
    /// Current lifecycle state.
    pub state: State,
    /// Most recent fault classification (`Reason::Default` if healthy).
    pub reason: Reason,
    /// Number of attempts made so far, across retries.
    pub tries: u32,
}

/// Read-only snapshot of a task, as handed back by
/// [`crate::manage::query::show`] and friends.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    /// Owning bundle.
    pub bundle: String,
    /// Target URL.
    pub url: String,
    /// File specs, as submitted at creation.
    pub file_count: usize,
    /// MIME type, detected from the response or the save path extension.
    pub mime_type: String,
    /// Progress snapshot at the time of the query.
    pub progress: Progress,
    /// Per-file terminal status, once known.
    pub each_file_status: Vec<EachFileStatus>,
    /// API compatibility level.
    pub version: Version,
    /// Fields common to every task.
    pub common_data: CommonTaskInfo,
}

impl TaskInfo {
    /// Builds the initial snapshot for a task that has just been created
    /// and not yet evaluated by the scheduler.
    pub fn new(config: &TaskConfig, uid: u64) -> Self {
        let now = crate::utils::get_current_timestamp();
        let sizes = vec![-1i64; config.file_count()];
        TaskInfo {
            bundle: config.bundle.clone(),
            url: config.url.clone(),
            file_count: config.file_count(),
            mime_type: String::new(),
            progress: Progress::new(sizes),
            each_file_status: Vec::new(),
            version: config.version,
            common_data: CommonTaskInfo {
                task_id: config.common_data.task_id,
                uid,
                action: config.common_data.action,
                mode: config.common_data.mode,
                ctime: now,
                mtime: now,
                state: State::Initialized,
                reason: Reason::Default,
                tries: 0,
            },
        }
    }

    /// Convenience accessor mirroring the field clients most often ask for.
    pub fn task_id(&self) -> u32 {
        self.common_data.task_id
    }

    /// The task's current lifecycle state.
    pub fn state(&self) -> State {
        self.common_data.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::config::ConfigBuilder;

    #[test]
    fn new_task_info_starts_initialized() {
        let config = ConfigBuilder::new().url("https://example.com/f").build();
        let info = TaskInfo::new(&config, 100);
        assert_eq!(info.state(), State::Initialized);
        assert_eq!(info.common_data.tries, 0);
        assert_eq!(info.progress.sizes, vec![-1]);
    }

    #[test]
    fn terminal_states_are_recognized() {
        assert!(State::Completed.is_terminal());
        assert!(State::Failed.is_terminal());
        assert!(State::Removed.is_terminal());
        assert!(!State::Running.is_terminal());
    }

    #[test]
    fn paused_and_stopped_are_resumable() {
        assert!(State::Paused.is_resumable());
        assert!(State::Stopped.is_resumable());
        assert!(!State::Waiting.is_resumable());
    }

    #[test]
    fn state_roundtrips_through_u8() {
        for s in [
            State::Initialized,
            State::Waiting,
            State::Running,
            State::Retrying,
            State::Paused,
            State::Stopped,
            State::Completed,
            State::Failed,
            State::Removed,
        ] {
            assert_eq!(State::from(s as u8), s);
        }
    }
}
