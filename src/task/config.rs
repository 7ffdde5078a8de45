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

//! The immutable configuration a client submits when creating a task.

use std::collections::HashMap;

use crate::utils::form_item::{FileSpec, FormItem};

/// Whether a task moves bytes to the device (download) or away from it
/// (upload).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Action {
    /// Retrieve a resource from the network and write it locally.
    Download = 0,
    /// Send local data to a remote endpoint.
    Upload = 1,
    /// Wildcard used only in search filters.
    Any = 2,
}

/// Execution context for a task, independent of whether the owning bundle
/// is foreground.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum Mode {
    /// Runs with lower scheduling priority; may continue headless.
    Background = 0,
    /// Runs with higher scheduling priority while its bundle is visible.
    Foreground = 1,
    /// Wildcard used only in search filters.
    Any = 2,
}

/// API compatibility level selected at task creation; governs whether the
/// IPC boundary downgrades certain not-found errors to OK (see
/// [`crate::error`] conversions used by the service stub).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Version {
    /// Legacy semantics.
    V9 = 9,
    /// Current semantics.
    V10 = 10,
}

/// Network type a task is willing to run on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum NetworkConfig {
    /// Any connected network.
    Any = 0,
    /// Wi-Fi only.
    Wifi = 1,
    /// Cellular only.
    Cellular = 2,
}

/// Minimum sustained throughput required before the transfer is considered
/// stalled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MinSpeed {
    /// Threshold in bytes per second. Zero disables the check.
    pub speed: u64,
    /// How long (milliseconds) the speed must stay below `speed` before
    /// the task is failed with [`crate::task::reason::Reason::LowSpeed`].
    pub duration_ms: u64,
}

/// Timeout configuration for one task's transfers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Seconds allowed to establish the TCP/TLS connection.
    pub connect_timeout_secs: u64,
    /// Seconds allowed for the entire task, across retries.
    pub total_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            connect_timeout_secs: 60,
            total_timeout_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Byte-range options for downloads (partial-content retrieval) or uploads
/// (sending a sub-range of a body file).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteRange {
    /// Inclusive start offset.
    pub begins: u64,
    /// Inclusive end offset, or `-1` for open-ended (to end of resource).
    pub ends: i64,
}

/// The non-identity, non-transport-specific parts of a task's
/// configuration.
#[derive(Clone, Copy, Debug)]
pub struct CommonTaskConfig {
    /// The task's own identifier. Set by the registry on insert; zero
    /// beforehand.
    pub task_id: u32,
    /// Action: download or upload.
    pub action: Action,
    /// Execution mode: background or foreground.
    pub mode: Mode,
    /// Whether an existing non-empty file at the save path may be
    /// overwritten.
    pub overwrite: bool,
    /// Allowed network type.
    pub network: NetworkConfig,
    /// Whether the task may run on a metered connection.
    pub metered_allowed: bool,
    /// Whether the task may run while roaming.
    pub roaming_allowed: bool,
    /// Whether the transfer engine should retry recoverable failures.
    pub retry_enabled: bool,
    /// Whether HTTP redirects should be followed.
    pub redirect_enabled: bool,
    /// Requested byte range.
    pub range: ByteRange,
    /// Whether the task should continue to request accurate progress
    /// (forces a HEAD/Content-Length check before starting).
    pub gauge: bool,
    /// Whether sub-chunk progress should be reported with byte precision
    /// (as opposed to coarse percentage buckets).
    pub precise: bool,
    /// Scheduling priority; ascending numeric value means higher priority.
    pub priority: u32,
    /// Whether the task is allowed to keep running once its bundle has no
    /// live client channel.
    pub background: bool,
    /// Minimum sustained throughput requirement.
    pub min_speed: MinSpeed,
    /// Timeout configuration.
    pub timeout: TimeoutConfig,
}

impl Default for CommonTaskConfig {
    fn default() -> Self {
        CommonTaskConfig {
            task_id: 0,
            action: Action::Download,
            mode: Mode::Background,
            overwrite: false,
            network: NetworkConfig::Any,
            metered_allowed: true,
            roaming_allowed: true,
            retry_enabled: true,
            redirect_enabled: true,
            range: ByteRange::default(),
            gauge: false,
            precise: false,
            priority: 0,
            background: true,
            min_speed: MinSpeed::default(),
            timeout: TimeoutConfig::default(),
        }
    }
}

/// Complete, immutable configuration for a download or upload task.
#[derive(Clone, Debug)]
pub struct TaskConfig {
    /// Bundle name of the application that created the task; the
    /// principal identity for authorization and quotas.
    pub bundle: String,
    /// Target URL.
    pub url: String,
    /// HTTP method. Defaults to GET for downloads, POST for uploads.
    pub method: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Ordered non-file form fields (uploads, multipart).
    pub form_items: Vec<FormItem>,
    /// Ordered file specs.
    pub file_specs: Vec<FileSpec>,
    /// Human-readable title.
    pub title: String,
    /// Human-readable description.
    pub description: String,
    /// Opaque handle authorizing a cross-bundle [`crate::manage::query::touch`].
    pub token: String,
    /// API compatibility level.
    pub version: Version,
    /// Fields shared with the in-memory/DB representation.
    pub common_data: CommonTaskConfig,
}

impl TaskConfig {
    /// Number of files this task carries.
    pub fn file_count(&self) -> usize {
        self.file_specs.len().max(1)
    }
}

/// Fluent builder for [`TaskConfig`], primarily intended for tests and for
/// callers translating an IPC-decoded request into the internal type.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    config: TaskConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            config: TaskConfig {
                bundle: String::new(),
                url: String::new(),
                method: "GET".to_string(),
                headers: HashMap::new(),
                form_items: Vec::new(),
                file_specs: Vec::new(),
                title: String::new(),
                description: String::new(),
                token: String::new(),
                version: Version::V10,
                common_data: CommonTaskConfig::default(),
            },
        }
    }
}

impl ConfigBuilder {
    /// Starts a new builder with background-download defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the action, also adjusting the default HTTP method.
    pub fn action(mut self, action: Action) -> Self {
        self.config.common_data.action = action;
        if action == Action::Upload && self.config.method == "GET" {
            self.config.method = "POST".to_string();
        }
        self
    }

    /// Sets the execution mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.common_data.mode = mode;
        self
    }

    /// Sets the target URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Sets the owning bundle name.
    pub fn bundle(mut self, bundle: impl Into<String>) -> Self {
        self.config.bundle = bundle.into();
        self
    }

    /// Appends a file spec naming a local save path (downloads) or source
    /// path (uploads).
    pub fn file_spec(mut self, spec: FileSpec) -> Self {
        self.config.file_specs.push(spec);
        self
    }

    /// Sets whether redirects are followed.
    pub fn redirect(mut self, enabled: bool) -> Self {
        self.config.common_data.redirect_enabled = enabled;
        self
    }

    /// Sets whether recoverable failures are retried.
    pub fn retry(mut self, enabled: bool) -> Self {
        self.config.common_data.retry_enabled = enabled;
        self
    }

    /// Sets whether an existing file may be overwritten.
    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.config.common_data.overwrite = enabled;
        self
    }

    /// Sets the required network type.
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.config.common_data.network = network;
        self
    }

    /// Sets the scheduling priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.config.common_data.priority = priority;
        self
    }

    /// Sets the API compatibility level.
    pub fn version(mut self, version: Version) -> Self {
        self.config.version = version;
        self
    }

    /// Consumes the builder, producing the finished [`TaskConfig`].
    pub fn build(self) -> TaskConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_defaults_to_post() {
        let config = ConfigBuilder::new().action(Action::Upload).build();
        assert_eq!(config.method, "POST");
    }

    #[test]
    fn download_defaults_to_get() {
        let config = ConfigBuilder::new().action(Action::Download).build();
        assert_eq!(config.method, "GET");
    }

    #[test]
    fn file_count_is_at_least_one() {
        let config = ConfigBuilder::new().build();
        assert_eq!(config.file_count(), 1);
    }
}
