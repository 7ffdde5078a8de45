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

//! Wires the task engine to a listening Unix domain socket.
//!
//! This is the one piece the distilled engine has no opinion about: some
//! embedding process has to accept connections, decode a caller identity
//! for each one, and turn commands and push-feed notices into calls on
//! [`crate::manage::task_manager::TaskManagerHandle`]. [`run`] is that
//! glue, kept in its own module so an embedder wanting a different
//! transport (binder, grpc, whatever else the host platform speaks) can
//! ignore it and drive the engine directly.
//!
//! Two sockets are opened under [`crate::config::ServiceConfig::socket_dir`]:
//! `control.sock`, a request/reply connection carrying every opcode in
//! [`crate::service::interface`], and `admin.sock`, a line-oriented
//! connection the embedder uses to push network, app-state, and bundle
//! lifecycle changes (see §6 "Environment hooks" — the engine core takes
//! no position on how those are discovered, only how they're reported).
//! Each notification channel opened via `OPEN_CHANNEL` gets its own
//! one-shot socket under `socket_dir/channels/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::manage::events;
use crate::manage::network::{NetworkState, NetworkType};
use crate::manage::notifier::NotifyEvent;
use crate::manage::{TaskManager, TaskManagerEvent, TaskManagerHandle};
use crate::service::client::manager::ClientManager;
use crate::service::command::{self, ServiceContext};
use crate::service::interface::{self, get_string, get_u32, get_u8, put_string, put_u64};
use crate::service::permission::{CallerIdentity, ManagerPermission};
use crate::service::run_count::manager::RunCountManager;

/// Runs the service until its control socket is removed out from under it
/// or an unrecoverable I/O error occurs. Never returns under normal
/// operation.
pub async fn run(service_config: ServiceConfig) -> Result<(), ServiceError> {
    std::fs::create_dir_all(&service_config.socket_dir)?;
    std::fs::create_dir_all(&service_config.storage_root)?;
    let channels_dir = service_config.socket_dir.join("channels");
    std::fs::create_dir_all(&channels_dir)?;

    let (mut manager, task_manager, notify_rx) = TaskManager::new(service_config.clone())?;
    manager.restore()?;
    tokio::spawn(manager.run());

    let clients = Arc::new(ClientManager::new());
    let run_count = Arc::new(RunCountManager::new());
    tokio::spawn(pump_notifications(notify_rx, clients.clone(), run_count.clone()));

    let ctx = Arc::new(ServiceContext {
        task_manager: task_manager.clone(),
        clients,
        run_count,
    });

    let control_path = service_config.socket_dir.join("control.sock");
    let admin_path = service_config.socket_dir.join("admin.sock");
    let _ = std::fs::remove_file(&control_path);
    let _ = std::fs::remove_file(&admin_path);

    let control_listener = UnixListener::bind(&control_path)?;
    let admin_listener = UnixListener::bind(&admin_path)?;
    info!("listening on {} and {}", control_path.display(), admin_path.display());

    tokio::spawn(accept_admin_connections(admin_listener, task_manager));

    loop {
        let (stream, _) = control_listener.accept().await?;
        let ctx = ctx.clone();
        let channels_dir = channels_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_control_connection(ctx, channels_dir, stream).await {
                debug!("control connection closed: {e}");
            }
        });
    }
}

/// Drains the task manager's notification bus, fanning `RunCount` to its
/// own broadcast list and everything else to the per-task subscribers.
async fn pump_notifications(
    mut notify_rx: tokio::sync::mpsc::UnboundedReceiver<NotifyEvent>,
    clients: Arc<ClientManager>,
    run_count: Arc<RunCountManager>,
) {
    while let Some(event) = notify_rx.recv().await {
        match event {
            NotifyEvent::RunCount(count) => run_count.broadcast(count),
            other => clients.dispatch(other),
        }
    }
}

/// One request/reply connection. Request framing: `<u32 len>` followed by
/// `len` bytes laid out as `<u32 opcode><u8 manager_permission><bundle
/// string><u32 payload_len><payload>`. Reply framing: `<u32 len>` followed
/// by whatever [`command::dispatch`] (or [`open_channel`]) produced.
async fn handle_control_connection(
    ctx: Arc<ServiceContext>,
    channels_dir: PathBuf,
    mut stream: UnixStream,
) -> std::io::Result<()> {
    loop {
        let len = match stream.read_u32_le().await {
            Ok(len) => len as usize,
            Err(_) => return Ok(()),
        };
        let mut raw = vec![0u8; len];
        stream.read_exact(&mut raw).await?;
        let mut body = Bytes::from(raw);

        let reply = match decode_request(&mut body) {
            Ok((opcode, _caller, _payload)) if opcode == interface::OPEN_CHANNEL => {
                open_channel(&ctx, &channels_dir).await
            }
            Ok((opcode, caller, payload)) => command::dispatch(&ctx, &caller, opcode, payload),
            Err(code) => interface::status_header(code),
        };

        stream.write_u32_le(reply.len() as u32).await?;
        stream.write_all(&reply).await?;
    }
}

fn decode_request(body: &mut Bytes) -> Result<(u32, CallerIdentity, Bytes), crate::error::ErrorCode> {
    let opcode = get_u32(body)?;
    let permission = manager_permission_from_u8(get_u8(body)?);
    let bundle = get_string(body)?;
    let payload_len = get_u32(body)? as usize;
    if body.remaining() < payload_len {
        return Err(crate::error::ErrorCode::ParameterCheck);
    }
    let payload = body.copy_to_bytes(payload_len);
    Ok((opcode, CallerIdentity { bundle, manager: permission }, payload))
}

fn manager_permission_from_u8(v: u8) -> ManagerPermission {
    match v {
        1 => ManagerPermission::ManagerDownload,
        2 => ManagerPermission::ManagerUpload,
        3 => ManagerPermission::ManagerAll,
        _ => ManagerPermission::NoPermission,
    }
}

/// `OPEN_CHANNEL` is intercepted by [`handle_control_connection`] before it
/// ever reaches [`command::dispatch`]: it allocates a channel in
/// [`ClientManager`], binds a fresh one-shot socket for it under
/// `channels_dir`, and spawns a task that pumps that channel's frames onto
/// the first connection accepted there. The reply carries the channel id
/// and the socket path the caller should connect to next.
async fn open_channel(ctx: &ServiceContext, channels_dir: &Path) -> BytesMut {
    let (channel_id, mut receiver) = ctx.clients.open_channel();
    let socket_path = channels_dir.join(format!("{channel_id}.sock"));
    let _ = std::fs::remove_file(&socket_path);

    match UnixListener::bind(&socket_path) {
        Ok(listener) => {
            let channel_id_for_task = channel_id;
            tokio::spawn(async move {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let (_, mut write_half) = stream.into_split();
                while let Some(frame) = receiver.recv().await {
                    if write_half.write_all(&frame).await.is_err() {
                        break;
                    }
                }
                debug!("channel {channel_id_for_task} closed");
            });

            let mut reply = interface::status_header(crate::error::ErrorCode::Ok);
            put_u64(&mut reply, channel_id);
            put_string(&mut reply, &socket_path.to_string_lossy());
            reply
        }
        Err(e) => {
            warn!("failed to bind channel socket {}: {e}", socket_path.display());
            interface::status_header(crate::error::ErrorCode::ServiceError)
        }
    }
}

/// Accepts admin connections one at a time; each line pushes one
/// environment change into the task manager's event loop. Malformed lines
/// are logged and skipped rather than closing the connection.
async fn accept_admin_connections(listener: UnixListener, task_manager: TaskManagerHandle) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("admin socket accept failed: {e}");
                continue;
            }
        };
        let task_manager = task_manager.clone();
        tokio::spawn(async move {
            handle_admin_connection(stream, task_manager).await;
        });
    }
}

async fn handle_admin_connection(stream: UnixStream, task_manager: TaskManagerHandle) {
    use tokio::io::AsyncBufReadExt;
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        apply_admin_line(&line, &task_manager);
    }
}

/// `network <none|wifi|cellular> <metered 0|1> <roaming 0|1>`
/// `foreground <bundle>` / `background <bundle>` / `uninstalled <bundle>`
fn apply_admin_line(line: &str, task_manager: &TaskManagerHandle) {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("network") => {
            let Some(kind) = words.next() else { return };
            let kind = match kind {
                "wifi" => NetworkType::Wifi,
                "cellular" => NetworkType::Cellular,
                _ => NetworkType::None,
            };
            let metered = words.next() == Some("1");
            let roaming = words.next() == Some("1");
            task_manager.send(TaskManagerEvent::Network(NetworkState { kind, metered, roaming }));
        }
        Some("foreground") => {
            if let Some(bundle) = words.next() {
                task_manager.send(TaskManagerEvent::AppForeground(bundle.to_string()));
            }
        }
        Some("background") => {
            if let Some(bundle) = words.next() {
                task_manager.send(TaskManagerEvent::AppBackground(bundle.to_string()));
            }
        }
        Some("uninstalled") => {
            if let Some(bundle) = words.next() {
                let (event, rx) = events::bundle_uninstalled(bundle.to_string());
                task_manager.send(event);
                // Fire-and-forget from the admin connection's point of view;
                // the reply only matters to tests that drive this directly.
                drop(rx);
            }
        }
        _ => {}
    }
}
