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

//! The IPC command dispatcher: decodes one opcode and its parcel, forwards
//! it to the task manager or the notification side-channels, and encodes
//! the reply. One call in, one reply out — there is no batching of
//! multiple task ids into a single parcel.
//!
//! `OPEN_CHANNEL` is not handled here: opening a channel hands the embedding
//! binary a receiver it alone can pump onto the connection's socket, so the
//! binary intercepts that opcode itself before ever reaching [`dispatch`].

mod channel;
mod control;
mod create;
mod query;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::ErrorCode;
use crate::manage::events;
use crate::manage::task_manager::TaskManagerHandle;
use crate::service::client::manager::ClientManager;
use crate::service::interface::{self, get_u32, status_header};
use crate::service::permission::CallerIdentity;
use crate::service::run_count::manager::RunCountManager;
use crate::task::config::Action;
use crate::utils::Recv;

/// Everything a command handler needs: the actor handle and the two
/// notification side-channel registries.
#[derive(Clone)]
pub(crate) struct ServiceContext {
    pub(crate) task_manager: TaskManagerHandle,
    pub(crate) clients: Arc<ClientManager>,
    pub(crate) run_count: Arc<RunCountManager>,
}

/// Decodes `opcode`/`payload`, runs the matching handler, and returns the
/// full reply (status header plus any extra payload). Unknown opcodes and
/// malformed parcels never touch task state.
pub(crate) fn dispatch(
    ctx: &ServiceContext,
    caller: &CallerIdentity,
    opcode: u32,
    payload: Bytes,
) -> BytesMut {
    let result = route(ctx, caller, opcode, payload);
    match result {
        Ok(extra) => {
            let mut reply = status_header(ErrorCode::Ok);
            reply.extend_from_slice(&extra);
            reply
        }
        Err(code) => status_header(code),
    }
}

fn route(
    ctx: &ServiceContext,
    caller: &CallerIdentity,
    opcode: u32,
    mut payload: Bytes,
) -> Result<BytesMut, ErrorCode> {
    match opcode {
        interface::CREATE => create::handle(ctx, caller, payload),
        interface::PAUSE => control::pause(ctx, caller, &mut payload),
        interface::RESUME => control::resume(ctx, caller, &mut payload),
        interface::START => control::start(ctx, caller, &mut payload),
        interface::STOP => control::stop(ctx, caller, &mut payload),
        interface::REMOVE => control::remove(ctx, caller, &mut payload),
        interface::SHOW => query::show(ctx, caller, &mut payload),
        interface::TOUCH => query::touch(ctx, &mut payload),
        interface::SEARCH => query::search(ctx, caller, &mut payload),
        interface::CLEAR => query::clear(ctx, caller, &mut payload),
        interface::GET_TASK => query::get_task(ctx, &mut payload),
        interface::QUERY_MIME_TYPE => query::query_mime_type(ctx, caller, &mut payload),
        interface::SUBSCRIBE => channel::subscribe(ctx, caller, &mut payload),
        interface::UNSUBSCRIBE => channel::unsubscribe(ctx, &mut payload),
        interface::SUB_RUN_COUNT => channel::sub_run_count(ctx, caller, &mut payload),
        interface::UNSUB_RUN_COUNT => channel::unsub_run_count(ctx, &mut payload),
        // Handled by the embedding binary before it ever calls dispatch.
        interface::OPEN_CHANNEL => Err(ErrorCode::Unsupported),
        _ => Err(ErrorCode::Unsupported),
    }
}

/// Reads a `task_id` off the front of a parcel; every control/query
/// command that targets one task starts this way.
fn read_task_id(payload: &mut Bytes) -> Result<u32, ErrorCode> {
    get_u32(payload)
}

/// Resolves the oneshot reply or maps a dropped actor loop to a service
/// error — the actor loop only ever drops a reply sender when the process
/// is shutting down.
fn recv_or_service_error<T>(rx: Recv<Result<T, ErrorCode>>) -> Result<T, ErrorCode> {
    match rx.get() {
        Some(result) => result,
        None => Err(ErrorCode::ServiceError),
    }
}

/// Ownership check shared by every command that targets an existing task
/// but isn't itself scoped through `Show`/`Touch`: the caller must own the
/// task's bundle, or hold a manager capability covering its action.
fn authorize_task(ctx: &ServiceContext, caller: &CallerIdentity, task_id: u32) -> Result<Action, ErrorCode> {
    let (event, rx) = events::inspect(task_id);
    ctx.task_manager.send(event);
    match rx.get().flatten() {
        Some((bundle, action)) if bundle == caller.bundle || caller.manager.covers(action) => Ok(action),
        _ => Err(ErrorCode::TaskNotFound),
    }
}

/// Test-only fixture: a [`ServiceContext`] backed by a live task manager
/// actor loop. Handlers block on oneshot replies via [`Recv::get`], which
/// panics if called from an async task rather than a plain thread, so
/// every test built on this drives `dispatch`/handler calls through
/// `tokio::task::spawn_blocking`.
#[cfg(test)]
pub(crate) mod test_support {
    use super::ServiceContext;
    use crate::config::ServiceConfig;
    use crate::service::client::manager::ClientManager;
    use crate::service::run_count::manager::RunCountManager;
    use std::sync::Arc;

    pub(crate) async fn context() -> ServiceContext {
        let dir = std::env::temp_dir().join(format!(
            "request_command_test_{}_{}",
            std::process::id(),
            crate::utils::get_current_timestamp()
        ));
        let service_config = ServiceConfig::rooted_at(dir);
        let (manager, task_manager, _notify_rx) =
            crate::manage::task_manager::TaskManager::new(service_config).unwrap();
        tokio::spawn(manager.run());
        ServiceContext {
            task_manager,
            clients: Arc::new(ClientManager::new()),
            run_count: Arc::new(RunCountManager::new()),
        }
    }
}
