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

//! `CREATE`: decodes a full [`TaskConfig`] off the wire and registers it.
//!
//! Parcel layout: `bundle`, `url`, `token` (length-prefixed strings),
//! `action` (u8: 0 download, 1 upload), `priority` (u32), followed by the
//! same blob layout [`config_codec`] uses for persistence — the rest of a
//! task's options rarely change shape between the wire and the database,
//! so the two share one codec instead of two subtly different ones.

use bytes::{Bytes, BytesMut};

use crate::error::ErrorCode;
use crate::manage::events;
use crate::service::command::{recv_or_service_error, ServiceContext};
use crate::service::interface::{get_string, get_u32, get_u8, put_u32};
use crate::service::permission::CallerIdentity;
use crate::task::config::{Action, CommonTaskConfig, TaskConfig};
use crate::task::config_codec;

pub(crate) fn handle(
    ctx: &ServiceContext,
    caller: &CallerIdentity,
    mut payload: Bytes,
) -> Result<BytesMut, ErrorCode> {
    let bundle = get_string(&mut payload)?;
    let url = get_string(&mut payload)?;
    let token = get_string(&mut payload)?;
    let action = match get_u8(&mut payload)? {
        0 => Action::Download,
        1 => Action::Upload,
        _ => return Err(ErrorCode::ParameterCheck),
    };
    let priority = get_u32(&mut payload)?;

    if url.is_empty() || bundle.is_empty() {
        return Err(ErrorCode::ParameterCheck);
    }
    if bundle != caller.bundle && !caller.manager.covers(action) {
        return Err(ErrorCode::Permission);
    }

    let partial = config_codec::decode(&payload)?;
    let config = TaskConfig {
        bundle,
        url,
        method: partial.method,
        headers: partial.headers,
        form_items: partial.form_items,
        file_specs: partial.file_specs,
        title: partial.title,
        description: partial.description,
        token,
        version: partial.version,
        common_data: CommonTaskConfig {
            task_id: 0,
            action,
            mode: partial.mode,
            overwrite: partial.overwrite,
            network: partial.network,
            metered_allowed: partial.metered_allowed,
            roaming_allowed: partial.roaming_allowed,
            retry_enabled: partial.retry_enabled,
            redirect_enabled: partial.redirect_enabled,
            range: partial.range,
            gauge: partial.gauge,
            precise: partial.precise,
            priority,
            background: partial.background,
            min_speed: partial.min_speed,
            timeout: partial.timeout,
        },
    };

    let (event, rx) = events::create(config);
    ctx.task_manager.send(event);
    let task_id = recv_or_service_error(rx)?;

    let mut reply = BytesMut::with_capacity(4);
    put_u32(&mut reply, task_id);
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::command::test_support;
    use crate::service::interface::put_string;
    use bytes::BufMut;

    fn payload(bundle: &str, url: &str, action: u8) -> Bytes {
        let mut buf = BytesMut::new();
        put_string(&mut buf, bundle);
        put_string(&mut buf, url);
        put_string(&mut buf, "");
        buf.put_u8(action);
        buf.put_u32_le(0);
        buf.extend_from_slice(&config_codec::encode(
            &crate::task::config::ConfigBuilder::new().bundle(bundle).url(url).build(),
        ));
        buf.freeze()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_empty_url() {
        let ctx = test_support::context().await;
        let caller = CallerIdentity::for_bundle("com.example");
        let body = payload("com.example", "", 0);
        let result =
            tokio::task::spawn_blocking(move || handle(&ctx, &caller, body)).await.unwrap();
        assert_eq!(result.err(), Some(ErrorCode::ParameterCheck));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registers_a_task_owned_by_the_caller() {
        let ctx = test_support::context().await;
        let caller = CallerIdentity::for_bundle("com.example");
        let body = payload("com.example", "https://example.com/f", 0);
        let result =
            tokio::task::spawn_blocking(move || handle(&ctx, &caller, body)).await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_creating_on_behalf_of_another_bundle_without_manager_permission() {
        let ctx = test_support::context().await;
        let caller = CallerIdentity::for_bundle("com.caller");
        let body = payload("com.other", "https://example.com/f", 0);
        let result =
            tokio::task::spawn_blocking(move || handle(&ctx, &caller, body)).await.unwrap();
        assert_eq!(result.err(), Some(ErrorCode::Permission));
    }
}
