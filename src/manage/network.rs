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

//! The current network-connectivity snapshot and the eligibility check
//! the scheduler applies against each task's network policy.

use std::sync::RwLock;

use crate::task::config::NetworkConfig;

/// Coarse connectivity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NetworkType {
    None,
    Wifi,
    Cellular,
}

/// A point-in-time network snapshot, as pushed in by the embedder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NetworkState {
    pub(crate) kind: NetworkType,
    pub(crate) metered: bool,
    pub(crate) roaming: bool,
}

impl NetworkState {
    pub(crate) const fn offline() -> Self {
        NetworkState {
            kind: NetworkType::None,
            metered: false,
            roaming: false,
        }
    }

    /// Whether a task whose policy is `network`/`metered_allowed`/
    /// `roaming_allowed` may run on this connection right now.
    pub(crate) fn satisfies(
        &self,
        network: NetworkConfig,
        metered_allowed: bool,
        roaming_allowed: bool,
    ) -> bool {
        if self.kind == NetworkType::None {
            return false;
        }
        let type_ok = match network {
            NetworkConfig::Any => true,
            NetworkConfig::Wifi => self.kind == NetworkType::Wifi,
            NetworkConfig::Cellular => self.kind == NetworkType::Cellular,
        };
        type_ok && (!self.metered || metered_allowed) && (!self.roaming || roaming_allowed)
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::offline()
    }
}

/// Holds the latest network snapshot behind a shared lock; cheap to read
/// from the scheduler's hot path, written only by the environment hook.
pub(crate) struct NetworkManager {
    state: RwLock<NetworkState>,
}

impl NetworkManager {
    pub(crate) fn new() -> Self {
        NetworkManager {
            state: RwLock::new(NetworkState::offline()),
        }
    }

    /// Pushed by the embedder (or a test) on every connectivity change.
    pub(crate) fn set_state(&self, state: NetworkState) {
        *self.state.write().unwrap() = state;
    }

    pub(crate) fn current(&self) -> NetworkState {
        *self.state.read().unwrap()
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_never_satisfies_any_policy() {
        let offline = NetworkState::offline();
        assert!(!offline.satisfies(NetworkConfig::Any, true, true));
    }

    #[test]
    fn wifi_only_policy_rejects_cellular() {
        let cellular = NetworkState {
            kind: NetworkType::Cellular,
            metered: true,
            roaming: false,
        };
        assert!(!cellular.satisfies(NetworkConfig::Wifi, true, true));
    }

    #[test]
    fn metered_policy_respected() {
        let metered_cellular = NetworkState {
            kind: NetworkType::Cellular,
            metered: true,
            roaming: false,
        };
        assert!(metered_cellular.satisfies(NetworkConfig::Any, true, true));
        assert!(!metered_cellular.satisfies(NetworkConfig::Any, false, true));
    }

    #[test]
    fn manager_reports_last_pushed_state() {
        let manager = NetworkManager::new();
        assert_eq!(manager.current().kind, NetworkType::None);
        manager.set_state(NetworkState {
            kind: NetworkType::Wifi,
            metered: false,
            roaming: false,
        });
        assert_eq!(manager.current().kind, NetworkType::Wifi);
    }
}
