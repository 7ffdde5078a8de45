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

//! A device-wide background transfer service.
//!
//! Accepts download and upload requests from client processes over a local
//! socket, persists them, runs them over HTTP(S) with resumability, and
//! reports progress and completion back to whichever clients are
//! subscribed — outliving the client process that submitted the task.
//!
//! This crate is the engine: task registry, state machine, scheduler,
//! transfer engine, notification bus, and IPC surface. [`server`] wires
//! those pieces to a listening socket for the [`requestd`](../bin/requestd.rs)
//! binary; embedders that want a different transport can use
//! [`manage::task_manager::TaskManager`] directly.

#![warn(
    missing_docs,
    clippy::redundant_static_lifetimes,
    clippy::enum_variant_names,
    clippy::clone_on_copy
)]

pub mod config;
pub mod error;
mod manage;
pub mod server;
mod service;
pub mod task;
mod utils;
