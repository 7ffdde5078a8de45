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

//! The set of tasks currently holding a worker slot.

use std::collections::HashMap;

use tokio::task::JoinHandle;

use crate::task::task_control::{CancelKind, TaskControl};

/// One task's live worker handle, kept so the scheduler can cancel it or
/// notice it finished.
pub(crate) struct RunningTask {
    pub(crate) bundle: String,
    pub(crate) control: TaskControl,
    pub(crate) handle: JoinHandle<()>,
}

/// Tasks presently occupying a worker slot, indexed by task id.
pub(crate) struct RunningQueue {
    tasks: HashMap<u32, RunningTask>,
}

impl RunningQueue {
    pub(crate) fn new() -> Self {
        RunningQueue {
            tasks: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, task_id: u32, entry: RunningTask) {
        self.tasks.insert(task_id, entry);
    }

    /// Removes a finished (or cancelled-and-joined) task from the queue.
    pub(crate) fn remove(&mut self, task_id: u32) -> Option<RunningTask> {
        self.tasks.remove(&task_id)
    }

    pub(crate) fn contains(&self, task_id: u32) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Raises the cancellation signal for a running task; the worker
    /// observes it at its next suspension point and the scheduler removes
    /// the entry once the join handle completes.
    pub(crate) fn cancel(&self, task_id: u32, kind: CancelKind) -> bool {
        match self.tasks.get(&task_id) {
            Some(entry) => {
                entry.control.cancel(kind);
                true
            }
            None => false,
        }
    }

    /// Count of running tasks per bundle, for the fairness/cap check.
    pub(crate) fn running_by_bundle(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.tasks.values() {
            *counts.entry(entry.bundle.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub(crate) fn task_ids(&self) -> Vec<u32> {
        self.tasks.keys().copied().collect()
    }
}

impl Default for RunningQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handle() -> JoinHandle<()> {
        tokio::spawn(async {})
    }

    #[tokio::test]
    async fn insert_and_remove_round_trip() {
        let mut queue = RunningQueue::new();
        queue.insert(
            1,
            RunningTask {
                bundle: "a".to_string(),
                control: TaskControl::new(),
                handle: dummy_handle(),
            },
        );
        assert!(queue.contains(1));
        assert_eq!(queue.len(), 1);
        assert!(queue.remove(1).is_some());
        assert!(!queue.contains(1));
    }

    #[tokio::test]
    async fn running_by_bundle_counts_correctly() {
        let mut queue = RunningQueue::new();
        queue.insert(
            1,
            RunningTask {
                bundle: "a".to_string(),
                control: TaskControl::new(),
                handle: dummy_handle(),
            },
        );
        queue.insert(
            2,
            RunningTask {
                bundle: "a".to_string(),
                control: TaskControl::new(),
                handle: dummy_handle(),
            },
        );
        let counts = queue.running_by_bundle();
        assert_eq!(counts.get("a"), Some(&2));
    }

    #[tokio::test]
    async fn cancel_reaches_the_control_token() {
        let mut queue = RunningQueue::new();
        let control = TaskControl::new();
        queue.insert(
            1,
            RunningTask {
                bundle: "a".to_string(),
                control: control.clone(),
                handle: dummy_handle(),
            },
        );
        assert!(queue.cancel(1, CancelKind::Stop));
        assert!(control.is_cancelled());
        assert!(!queue.cancel(2, CancelKind::Stop));
    }
}
