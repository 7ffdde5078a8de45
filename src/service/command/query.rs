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

//! `SHOW`/`TOUCH`/`SEARCH`/`CLEAR`/`GET_TASK`/`QUERY_MIME_TYPE`: read-only
//! lookups plus bulk removal. `Show` is scoped to the caller's own bundle;
//! `Touch` and `GetTask` are the cross-bundle reads, each gated by the
//! task's token instead of ownership.

use bytes::{Bytes, BytesMut};

use crate::error::ErrorCode;
use crate::manage::events;
use crate::manage::query::{SearchFilter, SearchMethod};
use crate::service::command::{authorize_task, read_task_id, recv_or_service_error, ServiceContext};
use crate::service::interface::{get_string, get_u32, get_u64, get_u8, put_string, put_u32, put_u64, put_u8};
use crate::service::permission::CallerIdentity;
use crate::task::config::{Action, Mode, TaskConfig};
use crate::task::config_codec;
use crate::task::info::{State, TaskInfo};
use crate::task::notify::EachFileStatus;

pub(crate) fn show(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    let (event, rx) = events::show(task_id, caller.bundle.clone());
    ctx.task_manager.send(event);
    let info = recv_or_service_error(rx)?;
    Ok(encode_task_info(&info))
}

pub(crate) fn touch(ctx: &ServiceContext, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    let token = get_string(payload)?;
    let (event, rx) = events::touch(task_id, token);
    ctx.task_manager.send(event);
    let info = recv_or_service_error(rx)?;
    Ok(encode_task_info(&info))
}

pub(crate) fn get_task(ctx: &ServiceContext, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    let token = get_string(payload)?;
    let (event, rx) = events::get_task(task_id, token);
    ctx.task_manager.send(event);
    let config = recv_or_service_error(rx)?;
    Ok(encode_task_config(&config))
}

/// Detects a save file's MIME type by reading it back off the task's
/// current snapshot; the type recorded there was either set from the
/// response's `Content-Type` or left empty when none was ever observed.
pub(crate) fn query_mime_type(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    let (event, rx) = events::show(task_id, caller.bundle.clone());
    ctx.task_manager.send(event);
    let info = recv_or_service_error(rx)?;
    let mut reply = BytesMut::new();
    put_string(&mut reply, &info.mime_type);
    Ok(reply)
}

/// Parcel layout: `action` (u8), `mode` (u8), `has_state` (u8) + `state`
/// (u8), `has_before` (u8) + `before` (u64), `has_after` (u8) + `after`
/// (u64). A bare `SearchFilter::for_bundle` with every axis left wide open
/// decodes from all-default bytes.
pub(crate) fn search(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let action = match get_u8(payload)? {
        0 => Action::Download,
        1 => Action::Upload,
        _ => Action::Any,
    };
    let mode = match get_u8(payload)? {
        0 => Mode::Background,
        1 => Mode::Foreground,
        _ => Mode::Any,
    };
    let state = if get_u8(payload)? != 0 {
        Some(State::from(get_u8(payload)?))
    } else {
        let _ = get_u8(payload)?;
        None
    };
    let before = if get_u8(payload)? != 0 { Some(get_u64(payload)?) } else { let _ = get_u64(payload)?; None };
    let after = if get_u8(payload)? != 0 { Some(get_u64(payload)?) } else { let _ = get_u64(payload)?; None };

    let mut filter = SearchFilter::for_bundle(caller.bundle.clone());
    filter.method = SearchMethod::Bundle(caller.bundle.clone());
    filter.action = action;
    filter.mode = mode;
    filter.state = state;
    filter.before = before;
    filter.after = after;

    let (event, rx) = events::search(filter);
    ctx.task_manager.send(event);
    let ids = rx.get().ok_or(ErrorCode::ServiceError)?;

    let mut reply = BytesMut::new();
    put_u32(&mut reply, ids.len() as u32);
    for id in ids {
        put_u32(&mut reply, id);
    }
    Ok(reply)
}

/// Parcel layout: `count` (u32) followed by that many `task_id`s. Only
/// ids the caller owns (or holds a manager capability covering) are
/// actually cleared; the rest are silently dropped from the reply, mirroring
/// the single-task commands' ownership check rather than failing the
/// whole batch.
pub(crate) fn clear(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let count = get_u32(payload)? as usize;
    let mut requested = Vec::with_capacity(count);
    for _ in 0..count {
        requested.push(get_u32(payload)?);
    }

    let owned: Vec<u32> = requested
        .into_iter()
        .filter(|task_id| authorize_task(ctx, caller, *task_id).is_ok())
        .collect();

    let (event, rx) = events::clear(owned);
    ctx.task_manager.send(event);
    let removed = rx.get().ok_or(ErrorCode::ServiceError)?;

    let mut reply = BytesMut::new();
    put_u32(&mut reply, removed.len() as u32);
    for id in removed {
        put_u32(&mut reply, id);
    }
    Ok(reply)
}

fn encode_task_info(info: &TaskInfo) -> BytesMut {
    let mut buf = BytesMut::new();
    put_u32(&mut buf, info.common_data.task_id);
    put_string(&mut buf, &info.bundle);
    put_string(&mut buf, &info.url);
    put_string(&mut buf, &info.mime_type);
    put_u8(&mut buf, info.common_data.action as u8);
    put_u8(&mut buf, info.common_data.mode as u8);
    put_u64(&mut buf, info.common_data.ctime);
    put_u64(&mut buf, info.common_data.mtime);
    put_u8(&mut buf, info.common_data.state as u8);
    put_u8(&mut buf, info.common_data.reason as u8);
    put_u32(&mut buf, info.common_data.tries);

    put_u8(&mut buf, info.progress.common_data.state);
    put_u64(&mut buf, info.progress.common_data.index as u64);
    put_u64(&mut buf, info.progress.common_data.total_processed as u64);
    put_u32(&mut buf, info.progress.sizes.len() as u32);
    for (size, processed) in info.progress.sizes.iter().zip(info.progress.processed.iter()) {
        buf.extend_from_slice(&size.to_le_bytes());
        put_u64(&mut buf, *processed as u64);
    }

    put_u32(&mut buf, info.each_file_status.len() as u32);
    for status in &info.each_file_status {
        encode_each_file_status(&mut buf, status);
    }
    buf
}

fn encode_each_file_status(buf: &mut BytesMut, status: &EachFileStatus) {
    put_string(buf, &status.path);
    put_u8(buf, status.reason as u8);
    put_string(buf, &status.message);
}

fn encode_task_config(config: &TaskConfig) -> BytesMut {
    let mut buf = BytesMut::new();
    put_string(&mut buf, &config.bundle);
    put_string(&mut buf, &config.url);
    put_string(&mut buf, &config.token);
    put_u8(&mut buf, config.common_data.action as u8);
    put_u32(&mut buf, config.common_data.priority);
    buf.extend_from_slice(&config_codec::encode(config));
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::command::create;
    use crate::service::command::test_support;
    use crate::service::interface::{put_string, put_u32, put_u8};

    fn create_payload(bundle: &str) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, bundle);
        put_string(&mut buf, "https://example.com/f");
        put_string(&mut buf, "tok");
        put_u8(&mut buf, 0);
        put_u32(&mut buf, 0);
        buf.extend_from_slice(&config_codec::encode(
            &crate::task::config::ConfigBuilder::new().bundle(bundle).url("https://example.com/f").build(),
        ));
        buf.freeze()
    }

    fn task_id_payload(task_id: u32) -> Bytes {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, task_id);
        buf.freeze()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn show_reflects_the_just_created_task() {
        let ctx = test_support::context().await;
        let caller = CallerIdentity::for_bundle("owner");
        let body = create_payload("owner");
        let reply = tokio::task::spawn_blocking({
            let ctx = ctx.clone();
            move || create::handle(&ctx, &caller, body)
        })
        .await
        .unwrap()
        .unwrap();
        let mut reply = Bytes::from(reply.freeze());
        let task_id = crate::service::interface::get_u32(&mut reply).unwrap();

        let owner = CallerIdentity::for_bundle("owner");
        let payload = task_id_payload(task_id);
        let result = tokio::task::spawn_blocking(move || show(&ctx, &owner, &mut { payload }))
            .await
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn touch_with_wrong_token_is_not_found() {
        let ctx = test_support::context().await;
        let caller = CallerIdentity::for_bundle("owner");
        let body = create_payload("owner");
        let reply = tokio::task::spawn_blocking({
            let ctx = ctx.clone();
            move || create::handle(&ctx, &caller, body)
        })
        .await
        .unwrap()
        .unwrap();
        let mut reply = Bytes::from(reply.freeze());
        let task_id = crate::service::interface::get_u32(&mut reply).unwrap();

        let mut payload = BytesMut::new();
        put_u32(&mut payload, task_id);
        put_string(&mut payload, "wrong");
        let payload = payload.freeze();
        let result = tokio::task::spawn_blocking(move || touch(&ctx, &mut { payload })).await.unwrap();
        assert_eq!(result.err(), Some(ErrorCode::TaskNotFound));
    }
}
