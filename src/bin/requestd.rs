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

//! Standalone daemon entry point.
//!
//! Thin by design: install a logger, build a [`ServiceConfig`], hand it to
//! [`transfer_engine::server::run`]. Everything the engine does lives in the
//! library; this binary exists only because some process has to call
//! `main`.
//!
//! `REQUESTD_ROOT`, if set, roots the database, storage, and socket
//! directories under it (see [`ServiceConfig::rooted_at`]); otherwise the
//! compiled-in defaults are used.

use std::process::ExitCode;

use transfer_engine::config::ServiceConfig;

fn main() -> ExitCode {
    env_logger::init();

    let service_config = match std::env::var_os("REQUESTD_ROOT") {
        Some(root) => ServiceConfig::rooted_at(root),
        None => ServiceConfig::default(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(transfer_engine::server::run(service_config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("requestd exited: {e}");
            ExitCode::FAILURE
        }
    }
}
