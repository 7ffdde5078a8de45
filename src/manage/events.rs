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

//! The single tagged event type the task manager's actor loop consumes.
//! Every IPC command and every environment push feed becomes one variant
//! here; factory functions pair the event with a [`Recv`] the caller
//! blocks on for the reply.

use tokio::sync::oneshot;

use crate::error::ErrorCode;
use crate::manage::network::NetworkState;
use crate::manage::query::SearchFilter;
use crate::task::config::{Action, TaskConfig};
use crate::task::info::TaskInfo;
use crate::task::reason::Reason;
use crate::utils::Recv;

/// One request into the task manager actor loop.
pub(crate) enum TaskManagerEvent {
    Create(TaskConfig, oneshot::Sender<Result<u32, ErrorCode>>),
    Start(u32, oneshot::Sender<Result<(), ErrorCode>>),
    Pause(u32, oneshot::Sender<Result<(), ErrorCode>>),
    Resume(u32, oneshot::Sender<Result<(), ErrorCode>>),
    Stop(u32, oneshot::Sender<Result<(), ErrorCode>>),
    Remove(u32, bool, oneshot::Sender<Result<(), ErrorCode>>),
    Show(u32, String, oneshot::Sender<Result<TaskInfo, ErrorCode>>),
    Touch(u32, String, oneshot::Sender<Result<TaskInfo, ErrorCode>>),
    /// Reads back a task's original config. Token-gated like `Touch`, not
    /// ownership-scoped: the spec lists `GetTask(tid, token) -> Config`
    /// alongside `Touch` as the cross-bundle read paths.
    GetTask(u32, String, oneshot::Sender<Result<TaskConfig, ErrorCode>>),
    /// An unscoped ownership probe: the IPC boundary uses this to decide
    /// whether a caller's bundle or manager capability covers a control
    /// command, without itself gaining access to the task's data.
    Inspect(u32, oneshot::Sender<Option<(String, Action)>>),
    Search(SearchFilter, oneshot::Sender<Vec<u32>>),
    Clear(Vec<u32>, oneshot::Sender<Vec<u32>>),
    Network(NetworkState),
    AppForeground(String),
    AppBackground(String),
    BundleUninstalled(String, oneshot::Sender<Vec<u32>>),
    /// A worker attempt finished; `Ok` is success, `Err(Reason::Default)`
    /// is cancellation, any other `Err` is a terminal fault.
    Finished(u32, Result<(), Reason>),
    Reschedule,
    Shutdown,
}

/// `bool` is downgrade-to-V9 semantics is hidden behind `TaskManagerEvent::Remove`'s
/// second field; factory helpers fold that in so callers never see it.
pub(crate) fn create(config: TaskConfig) -> (TaskManagerEvent, Recv<Result<u32, ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Create(config, tx), Recv::new(rx))
}

pub(crate) fn start(task_id: u32) -> (TaskManagerEvent, Recv<Result<(), ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Start(task_id, tx), Recv::new(rx))
}

pub(crate) fn pause(task_id: u32) -> (TaskManagerEvent, Recv<Result<(), ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Pause(task_id, tx), Recv::new(rx))
}

pub(crate) fn resume(task_id: u32) -> (TaskManagerEvent, Recv<Result<(), ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Resume(task_id, tx), Recv::new(rx))
}

pub(crate) fn stop(task_id: u32) -> (TaskManagerEvent, Recv<Result<(), ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Stop(task_id, tx), Recv::new(rx))
}

pub(crate) fn remove(
    task_id: u32,
    downgrade_not_found: bool,
) -> (TaskManagerEvent, Recv<Result<(), ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (
        TaskManagerEvent::Remove(task_id, downgrade_not_found, tx),
        Recv::new(rx),
    )
}

pub(crate) fn show(
    task_id: u32,
    caller_bundle: String,
) -> (TaskManagerEvent, Recv<Result<TaskInfo, ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Show(task_id, caller_bundle, tx), Recv::new(rx))
}

pub(crate) fn touch(
    task_id: u32,
    token: String,
) -> (TaskManagerEvent, Recv<Result<TaskInfo, ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Touch(task_id, token, tx), Recv::new(rx))
}

pub(crate) fn get_task(
    task_id: u32,
    token: String,
) -> (TaskManagerEvent, Recv<Result<TaskConfig, ErrorCode>>) {
    let (tx, rx) = oneshot::channel();
    (
        TaskManagerEvent::GetTask(task_id, token, tx),
        Recv::new(rx),
    )
}

pub(crate) fn inspect(task_id: u32) -> (TaskManagerEvent, Recv<Option<(String, Action)>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Inspect(task_id, tx), Recv::new(rx))
}

pub(crate) fn search(filter: SearchFilter) -> (TaskManagerEvent, Recv<Vec<u32>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Search(filter, tx), Recv::new(rx))
}

pub(crate) fn clear(task_ids: Vec<u32>) -> (TaskManagerEvent, Recv<Vec<u32>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::Clear(task_ids, tx), Recv::new(rx))
}

pub(crate) fn bundle_uninstalled(bundle: String) -> (TaskManagerEvent, Recv<Vec<u32>>) {
    let (tx, rx) = oneshot::channel();
    (TaskManagerEvent::BundleUninstalled(bundle, tx), Recv::new(rx))
}
