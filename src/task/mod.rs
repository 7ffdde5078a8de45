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

//! Everything that runs one task: its config, its lifecycle snapshot, and
//! the transfer engine that performs downloads and uploads.

pub mod config;
pub mod info;
pub(crate) mod notify;
pub(crate) mod reason;

pub(crate) mod client;
pub(crate) mod config_codec;
pub(crate) mod download;
pub(crate) mod files;
pub(crate) mod request_task;
pub(crate) mod speed_limiter;
pub(crate) mod task_control;
pub(crate) mod upload;

use std::sync::Arc;

use crate::task::config::Action;
use crate::task::reason::Reason;
use crate::task::request_task::RequestTask;

/// Runs a task's transfer to completion, dispatching to the download or
/// upload engine by its configured action. Upload takes the task by `Arc`
/// rather than by reference: its streaming request body outlives this
/// call's stack frame (it is polled from inside `reqwest`'s own send
/// future), so it needs an owned, `'static` handle back to the task.
pub(crate) async fn run(task: Arc<RequestTask>) -> Result<(), Reason> {
    match task.config().common_data.action {
        Action::Download => download::download(&task).await,
        Action::Upload => upload::upload(task).await,
        Action::Any => Err(Reason::BuildRequestFailed),
    }
}
