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

//! Generates unique task identifiers that are never reused within a boot.

use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

/// Allocates the next task identifier.
///
/// Identifiers are monotonically increasing for the lifetime of the process
/// and wrap only after exhausting the full `u32` range, which in practice
/// never happens within a single boot.
pub(crate) fn generate_task_id() -> u32 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Advances the generator past `highest_seen`, called once on restart
/// after re-hydrating persisted tasks so a freshly generated id can never
/// collide with one issued in a previous boot.
pub(crate) fn seed_task_id_generator_above(highest_seen: u32) {
    NEXT_TASK_ID.fetch_max(highest_seen.saturating_add(1), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = generate_task_id();
        let b = generate_task_id();
        assert!(b > a);
    }

    #[test]
    fn seeding_above_a_higher_id_advances_the_next_allocation() {
        seed_task_id_generator_above(1_000_000);
        let next = generate_task_id();
        assert!(next > 1_000_000);
    }
}
