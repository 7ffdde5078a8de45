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

//! Chooses which ready tasks run now, subject to concurrency caps and
//! network/app-state eligibility.

pub(crate) mod qos;
pub(crate) mod queue;

use std::sync::Arc;

use crate::manage::app_state::AppStateManager;
use crate::manage::network::NetworkManager;
use crate::manage::scheduler::qos::Candidate;
use crate::manage::scheduler::queue::RunningQueue;
use crate::task::config::NetworkConfig;

/// Owns the running-task set and the concurrency caps; stateless beyond
/// that (network/app-state live in their own process-wide caches, shared
/// with other components).
pub(crate) struct Scheduler {
    pub(crate) running: RunningQueue,
    pub(crate) network: Arc<NetworkManager>,
    pub(crate) app_state: Arc<AppStateManager>,
    k_total: usize,
    k_bundle: usize,
}

impl Scheduler {
    pub(crate) fn new(k_total: usize, k_bundle: usize) -> Self {
        Scheduler {
            running: RunningQueue::new(),
            network: Arc::new(NetworkManager::new()),
            app_state: Arc::new(AppStateManager::new()),
            k_total,
            k_bundle,
        }
    }

    /// Whether a task with this network policy may run against the
    /// current connectivity snapshot.
    pub(crate) fn network_eligible(
        &self,
        network: NetworkConfig,
        metered_allowed: bool,
        roaming_allowed: bool,
    ) -> bool {
        self.network
            .current()
            .satisfies(network, metered_allowed, roaming_allowed)
    }

    /// Picks the next tasks to promote into `Running` this round.
    pub(crate) fn pick(&self, candidates: Vec<Candidate>) -> Vec<u32> {
        let free_slots = self.k_total.saturating_sub(self.running.len());
        qos::pick_next(
            candidates,
            &self.running.running_by_bundle(),
            self.k_total,
            self.k_bundle,
            free_slots,
        )
    }

    pub(crate) fn has_free_slot(&self) -> bool {
        self.running.len() < self.k_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_free_slot_reflects_cap() {
        let scheduler = Scheduler::new(0, 0);
        assert!(!scheduler.has_free_slot());
    }

    #[test]
    fn offline_network_is_never_eligible() {
        let scheduler = Scheduler::new(4, 2);
        assert!(!scheduler.network_eligible(NetworkConfig::Any, true, true));
    }
}
