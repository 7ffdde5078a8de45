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

//! Wire-visible error taxonomy and the internal error wrapper used while a
//! task's state machine is driven.

use core::fmt;
use std::io;

/// Error codes returned to clients across the IPC boundary.
///
/// Numeric values are part of the wire contract: they are written as the
/// first 32 bits of every IPC reply and must not be renumbered.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success.
    Ok = 0,
    /// Caller lacks the capability required for this operation.
    Permission = 201,
    /// Malformed or out-of-range argument.
    ParameterCheck = 401,
    /// Opcode or option not supported.
    Unsupported = 801,
    /// Local filesystem operation failed.
    FileIo = 13400001,
    /// A file uri could not be resolved to a writable path.
    FilePath = 13400002,
    /// Internal service failure, or the service is unloading.
    ServiceError = 13499999,
    /// Per-bundle quota or global queue is full.
    TaskQueue = 21900004,
    /// Operation illegal for the task's current mode.
    TaskMode = 21900005,
    /// tid absent, or not visible to this caller.
    TaskNotFound = 21900006,
    /// Operation illegal for the task's current state.
    TaskState = 21900007,
    /// Referenced group id is absent.
    GroupNotFound = 21900008,
    /// Catch-all for conditions with no dedicated code.
    Other = 21999999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", *self as i32)
    }
}

/// An internal error that drives a fallible service-side operation.
///
/// Distinguished from [`ErrorCode`] in that it can carry an [`io::Error`]
/// cause; the IPC boundary collapses it down to a wire [`ErrorCode`] via
/// [`From`].
#[derive(Debug)]
pub enum ServiceError {
    /// A local filesystem or socket operation failed.
    Io(io::Error),
    /// A specific wire error code, with no separate cause to report.
    Code(ErrorCode),
}

impl ServiceError {
    /// Shorthand for a [`ServiceError::Code`] wrapping [`ErrorCode::Other`].
    pub fn other() -> Self {
        ServiceError::Code(ErrorCode::Other)
    }
}

impl Clone for ServiceError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Code(c) => Self::Code(*c),
        }
    }
}

impl std::error::Error for ServiceError {}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Io(e) => write!(f, "io error: {e}"),
            ServiceError::Code(c) => write!(f, "{c}"),
        }
    }
}

impl From<io::Error> for ServiceError {
    fn from(value: io::Error) -> Self {
        ServiceError::Io(value)
    }
}

impl From<ErrorCode> for ServiceError {
    fn from(value: ErrorCode) -> Self {
        ServiceError::Code(value)
    }
}

impl From<ServiceError> for ErrorCode {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ErrorCode::FilePath,
                _ => ErrorCode::FileIo,
            },
            ServiceError::Code(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_downgrades_to_wire_code() {
        let e: ServiceError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(ErrorCode::from(e), ErrorCode::FilePath);

        let e = ServiceError::Code(ErrorCode::TaskNotFound);
        assert_eq!(ErrorCode::from(e), ErrorCode::TaskNotFound);
    }

    #[test]
    fn clone_preserves_io_message() {
        let e = ServiceError::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        let cloned = e.clone();
        assert_eq!(e.to_string(), cloned.to_string());
    }
}
