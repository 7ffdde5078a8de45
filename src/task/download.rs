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

//! Runs one download attempt to completion, applying the retry/backoff
//! policy across attempts.

use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use reqwest::StatusCode;

use crate::task::files::{discard_partial_download, finalize_download};
use crate::task::reason::Reason;
use crate::task::request_task::{RequestTask, TaskError, TaskPhase};
use crate::task::speed_limiter::SpeedLimiter;
use crate::task::task_control::CHUNK_SIZE;
use crate::utils::trace::Trace;

/// Base backoff before the first retry.
const RETRY_BASE: Duration = Duration::from_millis(400);
/// Upper bound a single backoff wait is clamped to.
const RETRY_CAP: Duration = Duration::from_secs(30);

/// Drives a download task through its retry loop until it reaches a
/// terminal outcome or is cancelled.
///
/// Returns `Ok(())` on success, or the terminal [`Reason`] on failure.
/// Cancellation surfaces as `Err(Reason::Default)` and the caller (the
/// scheduler) is responsible for routing it to Paused/Stopped/Removed
/// rather than Failed.
pub(crate) async fn download(task: &RequestTask) -> Result<(), Reason> {
    let mut attempt = 0u32;
    loop {
        match download_inner(task).await {
            Ok(()) => return Ok(()),
            Err(TaskError::Waiting(TaskPhase::UserAbort)) => return Err(Reason::Default),
            Err(TaskError::Waiting(TaskPhase::NetworkOffline)) => return Err(Reason::NetworkOffline),
            Err(TaskError::Waiting(TaskPhase::NeedRetry)) => {
                attempt += 1;
                if !task.config().common_data.retry_enabled || attempt > task.retry_ceiling() {
                    return Err(Reason::IoError);
                }
                task.set_tries(attempt);
                if backoff_and_check_cancel(task, attempt).await {
                    return Err(Reason::Default);
                }
            }
            Err(TaskError::Failed(reason)) => {
                if task.config().common_data.retry_enabled
                    && reason.is_recoverable()
                    && attempt < task.retry_ceiling()
                {
                    task.emit_fault(reason);
                    attempt += 1;
                    task.set_tries(attempt);
                    if backoff_and_check_cancel(task, attempt).await {
                        return Err(Reason::Default);
                    }
                    continue;
                }
                return Err(reason);
            }
        }
    }
}

async fn backoff_and_check_cancel(task: &RequestTask, attempt: u32) -> bool {
    let backoff = (RETRY_BASE * 2u32.saturating_pow(attempt.saturating_sub(1))).min(RETRY_CAP);
    let jitter_ms = rand::thread_rng().gen_range(0..=50);
    tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
    task.control().is_cancelled()
}

/// One attempt: open files, issue the request, stream the body to disk.
async fn download_inner(task: &RequestTask) -> Result<(), TaskError> {
    let _trace = Trace::new("download_inner");
    let file_index = 0;
    task.open_files()
        .map_err(|_| TaskError::Failed(Reason::GetFileSizeFailed))?;

    let final_path = task
        .final_path(file_index)
        .ok_or(TaskError::Failed(Reason::BuildRequestFailed))?;
    let file_handle = task
        .file_handle(file_index)
        .ok_or(TaskError::Failed(Reason::BuildRequestFailed))?;

    let processed_before = task.progress_processed(file_index);
    let resume_supported = task.supports_range(file_index);

    let mut request = task
        .client()
        .request(
            task.config()
                .method
                .parse()
                .unwrap_or(reqwest::Method::GET),
            &task.config().url,
        )
        .headers(task.config_headers());

    if processed_before > 0 && resume_supported {
        request = request.header("Range", format!("bytes={processed_before}-"));
        if let Some(validator) = task.if_range_value() {
            request = request.header("If-Range", validator);
        }
    }

    let response = request.send().await.map_err(classify_reqwest_error)?;
    let status = response.status();

    if status.is_server_error() || (status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT) {
        return Err(TaskError::Failed(Reason::ProtocolError));
    }
    if status == StatusCode::REQUEST_TIMEOUT {
        return Err(TaskError::Waiting(TaskPhase::NeedRetry));
    }
    if status.is_redirection() {
        return Err(TaskError::Failed(Reason::RedirectError));
    }

    let server_supports_range = response
        .headers()
        .get("Accept-Ranges")
        .map(|v| v != "none")
        .unwrap_or(false)
        || status == StatusCode::PARTIAL_CONTENT;

    // Refresh the If-Range validators from this attempt's response so the
    // next resume (if any) can tell whether the resource changed underneath
    // it instead of blindly re-requesting a byte range.
    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let last_modified = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    task.set_resume_validators(etag, last_modified);

    let requested_resume = processed_before > 0 && resume_supported;
    if requested_resume && status != StatusCode::PARTIAL_CONTENT {
        // Server ignored our Range request: it doesn't support resuming
        // this resource. Restart from zero, exactly once, per spec.
        task.reset_progress_for_restart();
        let mut file = file_handle.lock().unwrap();
        file.set_len(0).map_err(|e| TaskError::Failed(reason_for_io(&e)))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| TaskError::Failed(reason_for_io(&e)))?;
    }
    task.set_supports_range(server_supports_range);

    if let Some(len) = response.content_length() {
        let total = if status == StatusCode::PARTIAL_CONTENT {
            len + task.progress_processed(file_index) as u64
        } else {
            len
        };
        task.set_file_size(file_index, total as i64);
    } else if task.config().common_data.gauge {
        return Err(TaskError::Failed(Reason::GetFileSizeFailed));
    }

    task.capture_response_headers(&response);

    let cap = task.response_body_cap();
    let mut captured = Vec::new();
    let mut stream = response.bytes_stream();
    let mut limiter = SpeedLimiter::new(task.config().common_data.min_speed);
    let mut written_since_seek = !requested_resume || status == StatusCode::PARTIAL_CONTENT;

    loop {
        if task.control().is_cancelled() {
            return Err(TaskError::Waiting(TaskPhase::UserAbort));
        }
        let chunk = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(TaskError::Waiting(TaskPhase::NeedRetry).tap_err(&e)),
            None => break,
        };

        if !written_since_seek {
            let mut file = file_handle.lock().unwrap();
            file.seek(SeekFrom::Start(task.progress_processed(file_index) as u64))
                .map_err(|e| TaskError::Failed(reason_for_io(&e)))?;
            written_since_seek = true;
        }

        for piece in chunk.chunks(CHUNK_SIZE) {
            {
                let mut file = file_handle.lock().unwrap();
                file.write_all(piece)
                    .map_err(|e| TaskError::Failed(reason_for_io(&e)))?;
            }
            if captured.len() < cap {
                captured.extend_from_slice(piece);
            }
            task.advance_processed(file_index, piece.len());
            if limiter.record(piece.len() as u64) {
                return Err(TaskError::Failed(Reason::LowSpeed));
            }
            if task.control().is_cancelled() {
                return Err(TaskError::Waiting(TaskPhase::UserAbort));
            }
        }
    }

    {
        let mut file = file_handle.lock().unwrap();
        file.flush().map_err(|e| TaskError::Failed(reason_for_io(&e)))?;
        file.sync_all().map_err(|e| TaskError::Failed(reason_for_io(&e)))?;
    }

    if !(requested_resume && status == StatusCode::PARTIAL_CONTENT) {
        // Captured bytes cover the whole body only when this wasn't a
        // continuation of an earlier partial transfer.
        task.capture_response_body(&captured, cap);
    }

    finalize_download(&final_path).map_err(|e| TaskError::Failed(reason_for_io(&e)))?;
    task.mark_completed();
    task.force_emit_progress();
    Ok(())
}

trait TapErr {
    fn tap_err(self, e: &reqwest::Error) -> Self;
}

impl TapErr for TaskError {
    fn tap_err(self, e: &reqwest::Error) -> Self {
        log::debug!("download stream error: {e}");
        self
    }
}

fn reason_for_io(e: &std::io::Error) -> Reason {
    match e.kind() {
        std::io::ErrorKind::OutOfMemory => Reason::InsufficientSpace,
        _ => Reason::IoError,
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TaskError {
    if e.is_timeout() {
        TaskError::Waiting(TaskPhase::NeedRetry)
    } else if e.is_connect() {
        TaskError::Failed(Reason::Tcp)
    } else if e.is_redirect() {
        TaskError::Failed(Reason::RedirectError)
    } else if e.to_string().contains("dns") {
        TaskError::Failed(Reason::Dns)
    } else {
        TaskError::Failed(Reason::RequestError)
    }
}

/// Cleans up a download's partial `.tmp` file for a Stopped/Removed
/// transition.
pub(crate) fn discard(task: &RequestTask, file_index: usize) -> std::io::Result<()> {
    if let Some(path) = task.final_path(file_index) {
        discard_partial_download(&path)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_for_generic_io_error_is_io_error() {
        let e = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(reason_for_io(&e), Reason::IoError);
    }
}
