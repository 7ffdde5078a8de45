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

//! A running task: its immutable config, its shared HTTP client, and the
//! mutable progress/state the transfer engine advances.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::manage::database::RequestDb;
use crate::manage::notifier::{NotifyEvent, Notifier};
use crate::task::client::build_client;
use crate::task::config::TaskConfig;
use crate::task::files::AttachedFiles;
use crate::task::info::State;
use crate::task::notify::Progress;
use crate::task::reason::Reason;
use crate::task::task_control::TaskControl;

/// A sub-phase of a recoverable failure, distinguishing a transient
/// condition worth retrying from one the caller should surface
/// immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskPhase {
    /// A retryable condition: backoff and try again.
    NeedRetry,
    /// Cancellation was observed mid-attempt.
    UserAbort,
    /// The network became ineligible mid-attempt.
    NetworkOffline,
}

/// The outcome of one transfer attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskError {
    /// Not a failure yet: caller should wait (backoff or re-evaluate
    /// network) and try again.
    Waiting(TaskPhase),
    /// Terminal for this attempt; may still be retried by the outer loop
    /// if `reason.is_recoverable()`.
    Failed(Reason),
}

/// Per-file resume bookkeeping not part of the wire [`Progress`] struct.
struct ResumeState {
    supports_range: Vec<bool>,
    /// `ETag` captured from the most recent response, if the server sent
    /// one. Used to build an `If-Range` header on the next resume attempt
    /// so a changed resource forces a restart instead of splicing new
    /// bytes onto an old partial file.
    etag: Option<String>,
    /// `Last-Modified` captured from the most recent response, used as the
    /// `If-Range` fallback when no `ETag` was sent.
    last_modified: Option<String>,
}

/// Coalescing state for progress notifications: a tick is pushed to the
/// bus at most every `progress_interval` OR every `progress_bytes`,
/// whichever comes first.
struct ProgressGate {
    last_sent: Instant,
    last_notified_bytes: u64,
}

/// One task's live runtime state: its config, client, open files, and
/// mutable progress — everything the transfer engine needs to drive one
/// attempt without going back through the registry.
pub(crate) struct RequestTask {
    config: TaskConfig,
    client: Client,
    control: TaskControl,
    progress: Mutex<Progress>,
    resume: Mutex<ResumeState>,
    tries: Mutex<u32>,
    base_dir: PathBuf,
    retry_ceiling: u32,
    response_body_cap: usize,
    attached: RwLock<Option<AttachedFiles>>,
    notifier: Notifier,
    progress_interval: Duration,
    progress_bytes: u64,
    gate: Mutex<ProgressGate>,
    db: Arc<RequestDb>,
}

impl RequestTask {
    /// Builds a task ready to run, using `base_dir` as the resolved
    /// per-bundle storage root.
    pub(crate) fn new(
        config: TaskConfig,
        base_dir: PathBuf,
        service_config: &ServiceConfig,
        notifier: Notifier,
        db: Arc<RequestDb>,
    ) -> Result<Self, ServiceError> {
        let client = build_client(&config).map_err(|_| ServiceError::other())?;
        let file_count = config.file_count();
        Ok(RequestTask {
            progress: Mutex::new(Progress::new(vec![-1i64; file_count])),
            resume: Mutex::new(ResumeState {
                supports_range: vec![false; file_count],
                etag: None,
                last_modified: None,
            }),
            tries: Mutex::new(0),
            base_dir,
            retry_ceiling: service_config.retry_ceiling,
            response_body_cap: service_config.response_body_cap,
            client,
            control: TaskControl::new(),
            config,
            attached: RwLock::new(None),
            notifier,
            progress_interval: service_config.progress_interval,
            progress_bytes: service_config.progress_bytes,
            gate: Mutex::new(ProgressGate {
                last_sent: Instant::now(),
                last_notified_bytes: 0,
            }),
            db,
        })
    }

    pub(crate) fn task_id(&self) -> u32 {
        self.config.common_data.task_id
    }

    pub(crate) fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn control(&self) -> &TaskControl {
        &self.control
    }

    pub(crate) fn retry_ceiling(&self) -> u32 {
        self.retry_ceiling
    }

    pub(crate) fn response_body_cap(&self) -> usize {
        self.response_body_cap
    }

    pub(crate) fn set_tries(&self, tries: u32) {
        *self.tries.lock().unwrap() = tries;
    }

    pub(crate) fn tries(&self) -> u32 {
        *self.tries.lock().unwrap()
    }

    /// Opens (or returns the already-open) files for this task and keeps
    /// them for the life of the task so a retry can resume the same
    /// handle.
    pub(crate) fn open_files(&self) -> Result<(), ServiceError> {
        let mut guard = self.attached.write().unwrap();
        if guard.is_none() {
            *guard = Some(AttachedFiles::open(&self.config, &self.base_dir)?);
        }
        Ok(())
    }

    pub(crate) fn final_path(&self, index: usize) -> Option<PathBuf> {
        self.attached
            .read()
            .unwrap()
            .as_ref()
            .and_then(|a| a.final_paths.get(index).cloned())
    }

    pub(crate) fn file_handle(
        &self,
        index: usize,
    ) -> Option<std::sync::Arc<Mutex<std::fs::File>>> {
        self.attached.read().unwrap().as_ref().and_then(|a| a.files.get(index))
    }

    pub(crate) fn config_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }

    pub(crate) fn progress_processed(&self, index: usize) -> usize {
        self.progress
            .lock()
            .unwrap()
            .processed
            .get(index)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn advance_processed(&self, index: usize, bytes: usize) {
        {
            let mut progress = self.progress.lock().unwrap();
            if let Some(p) = progress.processed.get_mut(index) {
                *p += bytes;
            }
            progress.common_data.index = index;
            progress.common_data.total_processed = progress.processed.iter().sum();
        }
        self.emit_progress(false);
    }

    /// Pushes a `Progress` notification if the coalescing gate (P_ms OR
    /// P_bytes, per the design) allows it, or unconditionally when
    /// `force` is set — used at the end of a transfer so a client always
    /// observes the final byte count.
    fn emit_progress(&self, force: bool) {
        let total = self.progress.lock().unwrap().common_data.total_processed as u64;
        let mut gate = self.gate.lock().unwrap();
        let due = force
            || gate.last_sent.elapsed() >= self.progress_interval
            || total.saturating_sub(gate.last_notified_bytes) >= self.progress_bytes;
        if !due {
            return;
        }
        gate.last_sent = Instant::now();
        gate.last_notified_bytes = total;
        drop(gate);
        self.persist_progress();
        self.notifier
            .send(NotifyEvent::Progress(self.task_id(), self.snapshot_progress()));
    }

    /// Writes the current progress snapshot through to the `progress`
    /// table, on the same cadence as the gated notification it accompanies
    /// (or unconditionally on a forced flush). Errors are logged, not
    /// propagated: a missed progress write only costs resume precision on
    /// the next restart, it never corrupts the in-memory state a running
    /// attempt relies on.
    fn persist_progress(&self) {
        let progress = self.progress.lock().unwrap();
        if let Err(e) = self.db.update_progress(
            self.task_id(),
            progress.common_data.index,
            progress.common_data.total_processed,
            &progress.sizes,
            &progress.extras,
        ) {
            log::warn!("failed to persist progress for task {}: {e}", self.task_id());
        }
    }

    /// Forces an out-of-band progress push, bypassing the coalescing
    /// gate; called once a transfer reaches its terminal byte count.
    pub(crate) fn force_emit_progress(&self) {
        self.emit_progress(true);
    }

    /// Reports a fault not tied to a normal state transition (a
    /// mid-attempt error the outer retry loop is about to recover from).
    pub(crate) fn emit_fault(&self, reason: Reason) {
        self.notifier.send(NotifyEvent::Fault(self.task_id(), reason));
    }

    pub(crate) fn set_file_size(&self, index: usize, size: i64) {
        let mut progress = self.progress.lock().unwrap();
        if let Some(s) = progress.sizes.get_mut(index) {
            *s = size;
        }
    }

    pub(crate) fn reset_progress_for_restart(&self) {
        self.progress.lock().unwrap().reset_processed();
    }

    pub(crate) fn supports_range(&self, index: usize) -> bool {
        self.resume
            .lock()
            .unwrap()
            .supports_range
            .get(index)
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn set_supports_range(&self, supports: bool) {
        for v in self.resume.lock().unwrap().supports_range.iter_mut() {
            *v = supports;
        }
    }

    /// Records the validators off the most recent response, to be sent
    /// back as `If-Range` the next time this task resumes a partial
    /// transfer.
    pub(crate) fn set_resume_validators(&self, etag: Option<String>, last_modified: Option<String>) {
        let mut resume = self.resume.lock().unwrap();
        resume.etag = etag;
        resume.last_modified = last_modified;
    }

    /// The value to send as `If-Range` on a resume request: the last
    /// captured `ETag`, falling back to `Last-Modified`. `None` if the
    /// first attempt never recorded either.
    pub(crate) fn if_range_value(&self) -> Option<String> {
        let resume = self.resume.lock().unwrap();
        resume.etag.clone().or_else(|| resume.last_modified.clone())
    }

    /// Captures headers into `Progress::extras` for the live task snapshot
    /// and emits a one-shot `Response` notification, ahead of this
    /// attempt's first `Progress` tick per the ordering guarantee in §5.
    pub(crate) fn capture_response_headers(&self, response: &reqwest::Response) {
        {
            let mut progress = self.progress.lock().unwrap();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    progress
                        .extras
                        .insert(name.as_str().to_string(), value.to_string());
                }
            }
        }
        self.notifier.send(NotifyEvent::Response(
            self.task_id(),
            crate::task::notify::ResponseData::capture(response),
        ));
    }

    /// Retains up to `cap` bytes of a small response body for client
    /// retrieval, per the response-capture rule in the spec.
    pub(crate) fn capture_response_body(&self, bytes: &[u8], cap: usize) {
        let mut progress = self.progress.lock().unwrap();
        if bytes.len() <= cap {
            progress.body = Some(bytes.to_vec());
        }
    }

    pub(crate) fn snapshot_progress(&self) -> Progress {
        self.progress.lock().unwrap().clone()
    }

    pub(crate) fn mark_completed(&self) {
        self.progress.lock().unwrap().common_data.state = State::Completed as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::config::ConfigBuilder;

    fn test_task() -> RequestTask {
        let config = ConfigBuilder::new().url("https://example.com/f").build();
        let (notifier, _rx) = crate::manage::notifier::Notifier::channel();
        let db = Arc::new(RequestDb::in_memory());
        RequestTask::new(config, PathBuf::from("/tmp"), &ServiceConfig::default(), notifier, db).unwrap()
    }

    #[test]
    fn advance_processed_updates_total() {
        let task = test_task();
        task.advance_processed(0, 100);
        task.advance_processed(0, 50);
        assert_eq!(task.progress_processed(0), 150);
        assert_eq!(task.snapshot_progress().common_data.total_processed, 150);
    }

    #[test]
    fn reset_progress_zeroes_processed() {
        let task = test_task();
        task.advance_processed(0, 100);
        task.reset_progress_for_restart();
        assert_eq!(task.progress_processed(0), 0);
    }

    #[test]
    fn set_tries_is_visible() {
        let task = test_task();
        task.set_tries(3);
        assert_eq!(task.tries(), 3);
    }
}
