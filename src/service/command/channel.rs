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

//! `SUBSCRIBE`/`UNSUBSCRIBE`/`SUB_RUN_COUNT`/`UNSUB_RUN_COUNT`: channel
//! lifecycle commands. Every parcel here starts with the `channel_id` the
//! embedding binary assigned when it handled `OPEN_CHANNEL`; the service
//! core never allocates one itself from inside [`super::dispatch`].

use bytes::{Bytes, BytesMut};

use crate::error::ErrorCode;
use crate::service::command::{authorize_task, read_task_id, ServiceContext};
use crate::service::interface::get_u64;
use crate::service::permission::CallerIdentity;

fn read_channel_id(payload: &mut Bytes) -> Result<u64, ErrorCode> {
    get_u64(payload)
}

/// Subscribes `channel_id` to every event for one task. The caller must
/// own the task (or hold a covering manager capability), same as the
/// single-task control commands.
pub(crate) fn subscribe(ctx: &ServiceContext, caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let channel_id = read_channel_id(payload)?;
    let task_id = read_task_id(payload)?;
    authorize_task(ctx, caller, task_id)?;
    ctx.clients.subscribe(channel_id, task_id);
    Ok(BytesMut::new())
}

pub(crate) fn unsubscribe(ctx: &ServiceContext, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let channel_id = read_channel_id(payload)?;
    let task_id = read_task_id(payload)?;
    ctx.clients.unsubscribe(channel_id, task_id);
    Ok(BytesMut::new())
}

/// Subscribes `channel_id` to the aggregate running-count broadcast. This
/// rides the same outbound sender the channel was opened with rather than
/// the per-task outbox, since a run-count frame belongs to no task.
pub(crate) fn sub_run_count(ctx: &ServiceContext, _caller: &CallerIdentity, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let channel_id = read_channel_id(payload)?;
    let sender = ctx.clients.raw_sender(channel_id).ok_or(ErrorCode::ParameterCheck)?;
    ctx.run_count.subscribe(channel_id, sender);
    Ok(BytesMut::new())
}

pub(crate) fn unsub_run_count(ctx: &ServiceContext, payload: &mut Bytes) -> Result<BytesMut, ErrorCode> {
    let channel_id = read_channel_id(payload)?;
    ctx.run_count.unsubscribe(channel_id);
    Ok(BytesMut::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::command::create;
    use crate::service::command::test_support;
    use crate::service::interface::{put_string, put_u32, put_u64, put_u8};
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

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribing_to_an_owned_task_delivers_its_progress() {
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

        let (channel_id, mut rx) = ctx.clients.open_channel();
        let mut payload = BytesMut::new();
        put_u64(&mut payload, channel_id);
        put_u32(&mut payload, task_id);
        let payload = payload.freeze();
        let owner = CallerIdentity::for_bundle("owner");
        let result = tokio::task::spawn_blocking({
            let ctx = ctx.clone();
            move || subscribe(&ctx, &owner, &mut { payload })
        })
        .await
        .unwrap();
        assert!(result.is_ok());

        ctx.clients.dispatch(crate::manage::notifier::NotifyEvent::StateChanged(
            task_id,
            crate::task::info::State::Running,
            crate::task::reason::Reason::Default,
        ));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sub_run_count_rides_the_channels_own_sender() {
        let ctx = test_support::context().await;
        let (channel_id, mut rx) = ctx.clients.open_channel();
        let mut payload = BytesMut::new();
        put_u64(&mut payload, channel_id);
        let payload = payload.freeze();
        let caller = CallerIdentity::for_bundle("owner");
        let result = tokio::task::spawn_blocking({
            let ctx = ctx.clone();
            move || sub_run_count(&ctx, &caller, &mut { payload })
        })
        .await
        .unwrap();
        assert!(result.is_ok());

        ctx.run_count.broadcast(2);
        assert!(rx.try_recv().is_ok());
    }
}
