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

//! Builds the HTTP client a task's transfer attempts share.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::Client;

use crate::task::config::TaskConfig;

/// Redirect hops permitted when `redirect_enabled` is set.
const MAX_REDIRECTS: usize = 10;

/// Builds a [`Client`] honoring the task's timeout and redirect policy.
///
/// One client is built per task rather than shared globally, mirroring the
/// per-task client the transfer engine owns for the life of the task so
/// that a Pause/Stop can drop it (and its connection pool) immediately.
pub(crate) fn build_client(config: &TaskConfig) -> reqwest::Result<Client> {
    let timeout = &config.common_data.timeout;
    let redirect = if config.common_data.redirect_enabled {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    Client::builder()
        .connect_timeout(Duration::from_secs(timeout.connect_timeout_secs))
        .timeout(Duration::from_secs(timeout.total_timeout_secs))
        .redirect(redirect)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::config::ConfigBuilder;

    #[test]
    fn builds_client_with_redirects_disabled() {
        let config = ConfigBuilder::new()
            .url("https://example.com/f")
            .redirect(false)
            .build();
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn builds_client_with_redirects_enabled() {
        let config = ConfigBuilder::new().url("https://example.com/f").build();
        assert!(build_client(&config).is_ok());
    }
}
