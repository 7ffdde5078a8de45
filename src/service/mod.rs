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

//! The client-facing half of the service: wire encoding, the command
//! dispatcher, caller authorization, and the two notification side-channel
//! registries (per-task channels and the run-count broadcast).

pub(crate) mod active_counter;
pub(crate) mod client;
pub(crate) mod command;
pub(crate) mod interface;
pub(crate) mod permission;
pub(crate) mod run_count;
