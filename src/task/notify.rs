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

//! Progress and notification payloads shared between the transfer engine
//! and the notification bus.

use std::collections::HashMap;

use super::config::{Action, Version};
use super::info::State;
use super::reason::Reason;
use crate::utils::form_item::FileSpec;

/// The event categories a client channel can subscribe to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubscribeType {
    /// Task reached `Completed`.
    Complete = 0,
    /// Task reached `Failed`.
    Fail = 1,
    /// Response headers were received.
    HeaderReceive = 2,
    /// Task reached `Paused`.
    Pause = 3,
    /// A progress tick fired.
    Progress = 4,
    /// Task reached `Removed`.
    Remove = 5,
    /// Task left `Paused` back to `Waiting`/`Running`.
    Resume = 6,
    /// A fault outside the normal transition path occurred.
    FaultOccur = 7,
}

/// Finer-grained explanation of why a task currently sits in `Waiting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitingCause {
    /// Blocked behind the concurrency cap.
    TaskQueue,
    /// Blocked on network eligibility.
    Network,
    /// Deprioritized because its bundle is backgrounded.
    AppState,
    /// Held by explicit user action (e.g. a prior pause).
    UserState,
}

/// Per-file status recorded once a task finishes attempting that file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EachFileStatus {
    /// Resolved local path.
    pub path: String,
    /// Coarse outcome classification.
    pub reason: Reason,
    /// Human-readable message, derived from `reason`.
    pub message: String,
}

impl EachFileStatus {
    /// Builds one status entry per file spec, applying `reason` to files at
    /// or after `index` and [`Reason::Default`] to files before it (they
    /// were never attempted).
    pub(crate) fn for_files(file_specs: &[FileSpec], index: usize, reason: Reason) -> Vec<Self> {
        file_specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let code = if i >= index { reason } else { Reason::Default };
                EachFileStatus {
                    path: spec.path.clone(),
                    reason: code,
                    message: code.as_str().to_string(),
                }
            })
            .collect()
    }
}

/// Core progress fields, duplicated into [`Progress`] and the wire frame.
#[derive(Clone, Debug)]
pub struct CommonProgress {
    /// Current state, as its wire byte value.
    pub state: u8,
    /// Index of the file currently (or most recently) active.
    pub index: usize,
    /// Sum of `processed` across all files.
    pub total_processed: usize,
}

/// A task's current transfer progress.
#[derive(Clone, Debug)]
pub struct Progress {
    /// Core progress fields.
    pub common_data: CommonProgress,
    /// Per-file total size in bytes; `-1` if unknown.
    pub sizes: Vec<i64>,
    /// Per-file bytes processed so far.
    pub processed: Vec<usize>,
    /// Headers (or other key/value extras) accumulated so far.
    pub extras: HashMap<String, String>,
    /// Response body bytes, retained only for small download responses
    /// (see `ServiceConfig::response_body_cap`).
    pub body: Option<Vec<u8>>,
}

impl Progress {
    /// A fresh `Progress` for a task with the given per-file sizes, all at
    /// zero bytes processed.
    pub fn new(sizes: Vec<i64>) -> Self {
        let len = sizes.len().max(1);
        let sizes = if sizes.is_empty() { vec![-1] } else { sizes };
        Progress {
            common_data: CommonProgress {
                state: State::Initialized as u8,
                index: 0,
                total_processed: 0,
            },
            sizes,
            processed: vec![0; len],
            extras: HashMap::new(),
            body: None,
        }
    }

    /// `true` once every file has a known size and all bytes have been
    /// accounted for.
    pub fn is_finished(&self) -> bool {
        self.sizes.iter().all(|s| *s >= 0)
            && self.processed.iter().sum::<usize>() == self.sizes.iter().sum::<i64>() as usize
    }

    /// Resets processed-byte counters to zero across every file, used when
    /// a resumed transfer discovers the server no longer supports ranges
    /// for this resource and must restart from scratch.
    pub(crate) fn reset_processed(&mut self) {
        self.common_data.total_processed = 0;
        for p in self.processed.iter_mut() {
            *p = 0;
        }
    }
}

/// An HTTP response as captured for the `Response` notification: version,
/// status, reason phrase, and headers with receive order and repeated
/// values preserved.
#[derive(Clone, Debug)]
pub struct ResponseData {
    /// e.g. `"HTTP/1.1"`.
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    /// Header name to its values, in first-seen order; a repeated header
    /// keeps every value under the one entry.
    pub headers: Vec<(String, Vec<String>)>,
}

impl ResponseData {
    /// Builds from a live `reqwest::Response`, before its body is consumed.
    pub(crate) fn capture(response: &reqwest::Response) -> Self {
        let mut order = Vec::new();
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else { continue };
            let key = name.as_str().to_string();
            if !by_name.contains_key(&key) {
                order.push(key.clone());
            }
            by_name.entry(key).or_default().push(value.to_string());
        }
        let headers = order
            .into_iter()
            .map(|name| {
                let values = by_name.remove(&name).unwrap_or_default();
                (name, values)
            })
            .collect();
        ResponseData {
            version: format!("{:?}", response.version()),
            status_code: response.status().as_u16(),
            reason: response
                .status()
                .canonical_reason()
                .unwrap_or("")
                .to_string(),
            headers,
        }
    }
}

/// The payload carried by a Progress/state-change notification frame.
#[derive(Debug, Clone)]
pub struct NotifyData {
    /// Owning bundle.
    pub bundle: String,
    /// Current progress snapshot.
    pub progress: Progress,
    /// Download or upload.
    pub action: Action,
    /// API compatibility level in effect for this task.
    pub version: Version,
    /// Per-file terminal status, populated once known.
    pub each_file_status: Vec<EachFileStatus>,
    /// The task this notification concerns.
    pub task_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_progress_starts_unfinished_with_unknown_size() {
        let p = Progress::new(vec![-1]);
        assert!(!p.is_finished());
        assert_eq!(p.processed, vec![0]);
    }

    #[test]
    fn finished_when_processed_matches_size() {
        let mut p = Progress::new(vec![10]);
        p.processed[0] = 10;
        p.common_data.total_processed = 10;
        assert!(p.is_finished());
    }

    #[test]
    fn reset_processed_zeroes_every_file() {
        let mut p = Progress::new(vec![10, 20]);
        p.processed = vec![5, 5];
        p.common_data.total_processed = 10;
        p.reset_processed();
        assert_eq!(p.processed, vec![0, 0]);
        assert_eq!(p.common_data.total_processed, 0);
    }

    #[test]
    fn each_file_status_only_applies_reason_from_index() {
        let specs = vec![FileSpec::new("a", "/a"), FileSpec::new("b", "/b")];
        let statuses = EachFileStatus::for_files(&specs, 1, Reason::IoError);
        assert_eq!(statuses[0].reason, Reason::Default);
        assert_eq!(statuses[1].reason, Reason::IoError);
    }
}
