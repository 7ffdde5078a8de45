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

//! IPC opcodes and the little-endian, length-prefixed wire encoding shared
//! by every command parcel and notification frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ErrorCode;

/// Creates a task. Payload: encoded `TaskConfig`. Reply: `tid`.
pub(crate) const CREATE: u32 = 0;
/// Pauses a running or waiting task.
pub(crate) const PAUSE: u32 = 1;
/// Reads a task's info, scoped to the caller's own bundle.
pub(crate) const SHOW: u32 = 2;
/// Detects a save file's MIME type.
pub(crate) const QUERY_MIME_TYPE: u32 = 3;
/// Removes a task.
pub(crate) const REMOVE: u32 = 4;
/// Resumes a paused or stopped task.
pub(crate) const RESUME: u32 = 5;
/// Starts an initialized, paused, or stopped task.
pub(crate) const START: u32 = 6;
/// Stops a running task.
pub(crate) const STOP: u32 = 7;
/// Reads a task's info by token, regardless of owning bundle or state.
pub(crate) const TOUCH: u32 = 8;
/// Lists task ids matching a filter.
pub(crate) const SEARCH: u32 = 9;
/// Reads back a task's original config.
pub(crate) const GET_TASK: u32 = 10;
/// Bulk-removes a list of tasks.
pub(crate) const CLEAR: u32 = 11;
/// Opens a notification channel, returning a socket path the caller
/// connects to.
pub(crate) const OPEN_CHANNEL: u32 = 12;
/// Subscribes the caller's channel to every event for one task.
pub(crate) const SUBSCRIBE: u32 = 13;
/// Unsubscribes the caller's channel from one task.
pub(crate) const UNSUBSCRIBE: u32 = 14;
/// Subscribes the caller's channel to the aggregate running-count
/// broadcast.
pub(crate) const SUB_RUN_COUNT: u32 = 15;
/// Unsubscribes from the running-count broadcast.
pub(crate) const UNSUB_RUN_COUNT: u32 = 16;

/// Notification frame kinds, written as the first `u16` of every frame on
/// the notification channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum FrameKind {
    Progress = 0,
    Response = 1,
    State = 2,
    Fault = 3,
    Wait = 4,
    RunCount = 5,
}

/// Appends a length-prefixed UTF-8 string: a `u32` byte length followed by
/// the bytes themselves.
pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Reads a length-prefixed UTF-8 string written by [`put_string`].
pub(crate) fn get_string(buf: &mut Bytes) -> Result<String, ErrorCode> {
    if buf.remaining() < 4 {
        return Err(ErrorCode::ParameterCheck);
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(ErrorCode::ParameterCheck);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| ErrorCode::ParameterCheck)
}

/// Reads a `u32` from the front of the parcel, failing with
/// `ParameterCheck` on a short read, per the malformed-parcel rule in
/// §7 of the design.
pub(crate) fn get_u32(buf: &mut Bytes) -> Result<u32, ErrorCode> {
    if buf.remaining() < 4 {
        return Err(ErrorCode::ParameterCheck);
    }
    Ok(buf.get_u32_le())
}

/// Appends a little-endian `u32`.
pub(crate) fn put_u32(buf: &mut BytesMut, v: u32) {
    buf.put_u32_le(v);
}

/// Appends a single byte.
pub(crate) fn put_u8(buf: &mut BytesMut, v: u8) {
    buf.put_u8(v);
}

/// Reads a single byte, failing with `ParameterCheck` on a short read.
pub(crate) fn get_u8(buf: &mut Bytes) -> Result<u8, ErrorCode> {
    if buf.remaining() < 1 {
        return Err(ErrorCode::ParameterCheck);
    }
    Ok(buf.get_u8())
}

/// Appends a little-endian `u64`, used for channel ids.
pub(crate) fn put_u64(buf: &mut BytesMut, v: u64) {
    buf.put_u64_le(v);
}

/// Reads a little-endian `u64` from the front of the parcel.
pub(crate) fn get_u64(buf: &mut Bytes) -> Result<u64, ErrorCode> {
    if buf.remaining() < 8 {
        return Err(ErrorCode::ParameterCheck);
    }
    Ok(buf.get_u64_le())
}

/// Writes a frame header (`<u16 kind><u32 length>`) followed by `payload`.
pub(crate) fn frame(kind: FrameKind, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(6 + payload.len());
    buf.put_u16_le(kind as u16);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf
}

/// Every IPC reply begins with a 32-bit status; zero is success, any
/// other value is the numeric [`ErrorCode`].
pub(crate) fn status_header(code: ErrorCode) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_i32_le(code as i32);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trips_through_the_wire_encoding() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello");
        let mut frozen = buf.freeze();
        assert_eq!(get_string(&mut frozen).unwrap(), "hello");
    }

    #[test]
    fn short_buffer_is_a_parameter_check_error() {
        let mut empty = Bytes::new();
        assert_eq!(get_u32(&mut empty), Err(ErrorCode::ParameterCheck));
    }

    #[test]
    fn frame_header_carries_kind_and_length() {
        let framed = frame(FrameKind::Progress, b"abc");
        assert_eq!(&framed[0..2], &0u16.to_le_bytes());
        assert_eq!(&framed[2..6], &3u32.to_le_bytes());
        assert_eq!(&framed[6..], b"abc");
    }

    #[test]
    fn u64_round_trips_through_the_wire_encoding() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, 0x1122_3344_5566_7788);
        let mut frozen = buf.freeze();
        assert_eq!(get_u64(&mut frozen).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn short_buffer_is_a_parameter_check_error_for_u64() {
        let mut short = Bytes::copy_from_slice(&[1, 2, 3]);
        assert_eq!(get_u64(&mut short), Err(ErrorCode::ParameterCheck));
    }
}
