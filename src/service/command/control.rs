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

//! `PAUSE`/`RESUME`/`START`/`STOP`/`REMOVE`: single-task lifecycle
//! transitions. Every one of these parcels starts with a `task_id`; the
//! caller must own the task's bundle or hold a manager capability
//! covering its action before the command reaches the registry.

use bytes::{Bytes, BytesMut};

use crate::error::ErrorCode;
use crate::manage::events;
use crate::service::command::{authorize_task, read_task_id, recv_or_service_error, ServiceContext};
use crate::service::interface::get_u8;
use crate::service::permission::CallerIdentity;

pub(crate) fn start(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    authorize_task(ctx, caller, task_id)?;
    let (event, rx) = events::start(task_id);
    ctx.task_manager.send(event);
    recv_or_service_error(rx)?;
    Ok(BytesMut::new())
}

pub(crate) fn pause(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    authorize_task(ctx, caller, task_id)?;
    let (event, rx) = events::pause(task_id);
    ctx.task_manager.send(event);
    recv_or_service_error(rx)?;
    Ok(BytesMut::new())
}

pub(crate) fn resume(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    authorize_task(ctx, caller, task_id)?;
    let (event, rx) = events::resume(task_id);
    ctx.task_manager.send(event);
    recv_or_service_error(rx)?;
    Ok(BytesMut::new())
}

pub(crate) fn stop(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    authorize_task(ctx, caller, task_id)?;
    let (event, rx) = events::stop(task_id);
    ctx.task_manager.send(event);
    recv_or_service_error(rx)?;
    Ok(BytesMut::new())
}

/// `REMOVE`'s parcel carries one extra byte beyond the `task_id`: the
/// caller's API version, `9` or `10`. V9 callers get a not-found removal
/// downgraded to success; V10 callers see the real outcome.
///
/// Unlike the other control commands, this doesn't bail out of
/// `authorize_task`'s failure with `?`: a V9 caller's downgrade applies
/// whether the task never existed or the caller simply doesn't own it, so
/// the `TaskNotFound` it produces has to reach the same downgrade the
/// manager's registry applies to its own not-found outcome, not short-circuit
/// ahead of it.
pub(crate) fn remove(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let task_id = read_task_id(payload)?;
    let version = get_u8(payload)?;
    let downgrade = version == 9;
    if let Err(code) = authorize_task(ctx, caller, task_id) {
        return if downgrade && code == ErrorCode::TaskNotFound {
            Ok(BytesMut::new())
        } else {
            Err(code)
        };
    }
    let (event, rx) = events::remove(task_id, downgrade);
    ctx.task_manager.send(event);
    recv_or_service_error(rx)?;
    Ok(BytesMut::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::command::create;
    use crate::service::command::test_support;
    use crate::service::interface::{put_string, put_u32, put_u8};
    use crate::task::config_codec;

    fn create_payload(bundle: &str) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, bundle);
        put_string(&mut buf, "https://example.com/f");
        put_string(&mut buf, "");
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
    async fn pausing_someone_elses_task_is_not_found() {
        let ctx = test_support::context().await;
        let owner = CallerIdentity::for_bundle("owner");
        let body = create_payload("owner");
        let reply = tokio::task::spawn_blocking({
            let ctx = ctx.clone();
            move || create::handle(&ctx, &owner, body)
        })
        .await
        .unwrap()
        .unwrap();
        let mut reply = Bytes::from(reply.freeze());
        let task_id = crate::service::interface::get_u32(&mut reply).unwrap();

        let stranger = CallerIdentity::for_bundle("stranger");
        let payload = task_id_payload(task_id);
        let result = tokio::task::spawn_blocking(move || pause(&ctx, &stranger, &mut { payload }))
            .await
            .unwrap();
        assert_eq!(result.err(), Some(ErrorCode::TaskNotFound));
    }
}
