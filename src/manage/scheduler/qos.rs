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

//! Orders ready tasks into a run list, subject to the global and
//! per-bundle concurrency caps, with a round-robin fairness guarantee so
//! no bundle starves another.

use std::collections::HashMap;

/// One task eligible to run right now, as seen by the scheduler.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    pub(crate) task_id: u32,
    pub(crate) bundle: String,
    pub(crate) priority: u32,
    pub(crate) foreground_bonus: bool,
    pub(crate) ctime: u64,
}

/// Picks which candidates to promote to `Running` this round.
///
/// Ordering: foreground bonus first, then priority ascending (a lower
/// numeric value means higher priority), then older (FIFO) — but
/// fairness overrides raw priority: bundles are served round-robin so a
/// single high-priority bundle cannot take every slot while another
/// bundle's ready task waits indefinitely.
pub(crate) fn pick_next(
    mut candidates: Vec<Candidate>,
    running_by_bundle: &HashMap<String, usize>,
    k_total: usize,
    k_bundle: usize,
    free_slots: usize,
) -> Vec<u32> {
    candidates.sort_by(|a, b| {
        b.foreground_bonus
            .cmp(&a.foreground_bonus)
            .then(a.priority.cmp(&b.priority))
            .then(a.ctime.cmp(&b.ctime))
    });

    let mut grouped: HashMap<String, Vec<Candidate>> = HashMap::new();
    let mut bundle_order = Vec::new();
    for candidate in candidates {
        if !grouped.contains_key(&candidate.bundle) {
            bundle_order.push(candidate.bundle.clone());
        }
        grouped.entry(candidate.bundle.clone()).or_default().push(candidate);
    }

    let mut running = running_by_bundle.clone();
    let mut total_running: usize = running.values().sum();
    let mut picked = Vec::new();
    let slots = free_slots.min(k_total.saturating_sub(total_running));

    let mut progressed = true;
    while picked.len() < slots && progressed {
        progressed = false;
        for bundle in &bundle_order {
            if picked.len() >= slots {
                break;
            }
            let count = running.entry(bundle.clone()).or_insert(0);
            if *count >= k_bundle {
                continue;
            }
            if let Some(queue) = grouped.get_mut(bundle) {
                if let Some(next) = queue.first().cloned() {
                    queue.remove(0);
                    picked.push(next.task_id);
                    *count += 1;
                    total_running += 1;
                    progressed = true;
                }
            }
        }
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u32, bundle: &str, priority: u32, ctime: u64) -> Candidate {
        Candidate {
            task_id: id,
            bundle: bundle.to_string(),
            priority,
            foreground_bonus: false,
            ctime,
        }
    }

    #[test]
    fn respects_global_cap() {
        let candidates = vec![
            candidate(1, "a", 0, 1),
            candidate(2, "a", 0, 2),
            candidate(3, "a", 0, 3),
        ];
        let picked = pick_next(candidates, &HashMap::new(), 2, 10, 10);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn respects_per_bundle_cap() {
        let candidates = vec![
            candidate(1, "a", 0, 1),
            candidate(2, "a", 0, 2),
            candidate(3, "b", 0, 3),
        ];
        let picked = pick_next(candidates, &HashMap::new(), 10, 1, 10);
        assert_eq!(picked.len(), 2);
        assert!(picked.contains(&1));
        assert!(picked.contains(&3));
    }

    #[test]
    fn fairness_gives_every_bundle_a_slot_before_a_second_to_one() {
        let candidates = vec![
            candidate(1, "a", 1, 1),
            candidate(2, "a", 1, 2),
            candidate(3, "b", 5, 3),
        ];
        // Global cap 2: bundle "a" has higher priority (lower value) on both
        // its tasks, but round-robin across bundles means "b" still gets a slot.
        let picked = pick_next(candidates, &HashMap::new(), 2, 10, 2);
        assert!(picked.contains(&1));
        assert!(picked.contains(&3));
    }

    #[test]
    fn foreground_bonus_outranks_priority() {
        let mut low_priority_foreground = candidate(1, "a", 100, 1);
        low_priority_foreground.foreground_bonus = true;
        let high_priority_background = candidate(2, "b", 0, 2);

        let picked = pick_next(
            vec![low_priority_foreground, high_priority_background],
            &HashMap::new(),
            1,
            10,
            1,
        );
        assert_eq!(picked, vec![1]);
    }
}
