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

//! Process-wide tunables, gathered into one struct rather than scattered as
//! magic numbers, and constructed once by the embedding binary.

use std::path::PathBuf;
use std::time::Duration;

/// Service-wide configuration, built once at startup and shared (read-only)
/// across every component.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Maximum concurrently `Running` tasks, device-wide.
    pub k_total: usize,
    /// Maximum concurrently `Running` tasks belonging to one bundle.
    pub k_bundle: usize,
    /// Maximum number of non-terminal tasks one bundle may have queued at
    /// once, independent of `k_bundle`'s concurrency cap. Exceeding it
    /// fails `Create` with `E_TASK_QUEUE`.
    pub max_tasks_per_bundle: usize,
    /// Minimum interval between coalesced progress notifications.
    pub progress_interval: Duration,
    /// Minimum byte delta between coalesced progress notifications.
    pub progress_bytes: u64,
    /// Maximum retry attempts for a recoverable failure before the task is
    /// failed outright.
    pub retry_ceiling: u32,
    /// Maximum bytes of a download response body retained in `Progress`
    /// for client retrieval. See the Open Questions note in DESIGN.md.
    pub response_body_cap: usize,
    /// Path to the sqlite database file backing the task registry.
    pub database_path: PathBuf,
    /// Directory in which per-bundle save-file base directories live.
    pub storage_root: PathBuf,
    /// Directory in which the notification Unix-domain sockets are created.
    pub socket_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            k_total: 8,
            k_bundle: 3,
            max_tasks_per_bundle: 64,
            progress_interval: Duration::from_millis(500),
            progress_bytes: 64 * 1024,
            retry_ceiling: 4,
            response_body_cap: 2 * 1024 * 1024,
            database_path: PathBuf::from("/data/service/el1/public/request/request.db"),
            storage_root: PathBuf::from("/data/service/el1/public/request/files"),
            socket_dir: PathBuf::from("/data/service/el1/public/request/sock"),
        }
    }
}

impl ServiceConfig {
    /// A configuration suitable for tests and short-lived local runs: all
    /// paths rooted under a caller-supplied directory.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        ServiceConfig {
            database_path: root.join("request.db"),
            storage_root: root.join("files"),
            socket_dir: root.join("sock"),
            ..ServiceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_at_nests_every_path_under_root() {
        let cfg = ServiceConfig::rooted_at("/tmp/example");
        assert!(cfg.database_path.starts_with("/tmp/example"));
        assert!(cfg.storage_root.starts_with("/tmp/example"));
        assert!(cfg.socket_dir.starts_with("/tmp/example"));
    }

    #[test]
    fn defaults_are_positive() {
        let cfg = ServiceConfig::default();
        assert!(cfg.k_total > 0);
        assert!(cfg.k_bundle <= cfg.k_total);
        assert!(cfg.response_body_cap > 0);
    }
}
