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

//! Coarse fault taxonomy attached to non-terminal and terminal task
//! transitions.

/// Classification of a non-success outcome, stored with the task and
/// surfaced to clients on Fault/Failed/Paused notifications.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Reason {
    /// No specific reason; the default for a healthy task.
    Default = 0,
    /// The task has sat non-terminal for a month without completing.
    TaskSurvivalOneMonth = 1,
    /// Too many tasks are already running.
    RunningTaskMeetLimits = 4,
    /// The user paused, stopped, or removed the task.
    UserOperation = 5,
    /// The owning bundle went to background or terminated while the task
    /// required foreground continuity.
    AppBackgroundOrTerminate = 6,
    /// No network connectivity.
    NetworkOffline = 7,
    /// The current network type doesn't satisfy the task's policy.
    UnsupportedNetworkType = 8,
    /// The HTTP request could not be constructed from the task config.
    BuildRequestFailed = 10,
    /// The server didn't report a content length and `precise` was set.
    GetFileSizeFailed = 11,
    /// A foreground-continuity task ran past its allotted window.
    ContinuousTaskTimeout = 12,
    /// A generic request-building/sending error.
    RequestError = 14,
    /// One or more upload files failed.
    UploadFileError = 15,
    /// A redirect could not be followed.
    RedirectError = 16,
    /// The peer violated the HTTP protocol.
    ProtocolError = 17,
    /// A local or socket I/O error occurred.
    IoError = 18,
    /// The server doesn't support range requests.
    UnsupportedRangeRequest = 19,
    /// DNS resolution failed.
    Dns = 23,
    /// TCP-level connection error.
    Tcp = 24,
    /// TLS handshake or record error.
    Ssl = 25,
    /// Local disk ran out of space mid-transfer.
    InsufficientSpace = 26,
    /// Measured transfer speed stayed below the configured minimum.
    LowSpeed = 31,
    /// Catch-all for anything not enumerated above.
    OthersError = 255,
}

impl Reason {
    /// A short, stable, human-readable description, suitable for the
    /// per-file status message surfaced to clients.
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Default => "",
            Reason::TaskSurvivalOneMonth => "task has not completed in a month",
            Reason::RunningTaskMeetLimits => "too many tasks running",
            Reason::UserOperation => "user operation",
            Reason::AppBackgroundOrTerminate => "app is background or terminated",
            Reason::NetworkOffline => "network is offline",
            Reason::UnsupportedNetworkType => "network type doesn't meet task policy",
            Reason::BuildRequestFailed => "failed to build the request",
            Reason::GetFileSizeFailed => "server didn't report a content length",
            Reason::ContinuousTaskTimeout => "continuous task timed out",
            Reason::RequestError => "request error",
            Reason::UploadFileError => "one or more files failed to upload",
            Reason::RedirectError => "redirect error",
            Reason::ProtocolError => "http protocol error",
            Reason::IoError => "io error",
            Reason::UnsupportedRangeRequest => "server doesn't support range requests",
            Reason::Dns => "dns error",
            Reason::Tcp => "tcp error",
            Reason::Ssl => "tls error",
            Reason::InsufficientSpace => "insufficient disk space",
            Reason::LowSpeed => "transfer speed below configured minimum",
            Reason::OthersError => "other error",
        }
    }

    /// Whether this reason is eligible for the retry/backoff path when the
    /// task config has `retry` enabled.
    pub(crate) fn is_recoverable(self) -> bool {
        matches!(
            self,
            Reason::NetworkOffline
                | Reason::IoError
                | Reason::Dns
                | Reason::Tcp
                | Reason::Ssl
                | Reason::RequestError
                | Reason::ProtocolError
                | Reason::LowSpeed
        )
    }
}

impl From<u8> for Reason {
    fn from(value: u8) -> Self {
        match value {
            0 => Reason::Default,
            1 => Reason::TaskSurvivalOneMonth,
            4 => Reason::RunningTaskMeetLimits,
            5 => Reason::UserOperation,
            6 => Reason::AppBackgroundOrTerminate,
            7 => Reason::NetworkOffline,
            8 => Reason::UnsupportedNetworkType,
            10 => Reason::BuildRequestFailed,
            11 => Reason::GetFileSizeFailed,
            12 => Reason::ContinuousTaskTimeout,
            14 => Reason::RequestError,
            15 => Reason::UploadFileError,
            16 => Reason::RedirectError,
            17 => Reason::ProtocolError,
            18 => Reason::IoError,
            19 => Reason::UnsupportedRangeRequest,
            23 => Reason::Dns,
            24 => Reason::Tcp,
            25 => Reason::Ssl,
            26 => Reason::InsufficientSpace,
            31 => Reason::LowSpeed,
            _ => Reason::OthersError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_u8() {
        for r in [
            Reason::Default,
            Reason::NetworkOffline,
            Reason::UnsupportedRangeRequest,
            Reason::LowSpeed,
        ] {
            assert_eq!(Reason::from(r as u8), r);
        }
    }

    #[test]
    fn unknown_byte_is_others() {
        assert_eq!(Reason::from(200), Reason::OthersError);
    }

    #[test]
    fn recoverable_classification() {
        assert!(Reason::NetworkOffline.is_recoverable());
        assert!(!Reason::UserOperation.is_recoverable());
        assert!(!Reason::UnsupportedRangeRequest.is_recoverable());
    }
}
