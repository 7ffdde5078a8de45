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

//! Small helpers shared across the task engine: time, string encoding, and
//! a blocking-friendly wrapper around a oneshot reply channel.

pub(crate) mod form_item;
pub(crate) mod task_id_generator;
pub(crate) mod trace;

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot::Receiver;
use tokio::task::JoinHandle;

/// Wraps a oneshot receiver so a synchronous caller (the IPC dispatch path)
/// can block the current thread waiting for the async side to reply.
pub(crate) struct Recv<T> {
    rx: Receiver<T>,
}

impl<T> Recv<T> {
    pub(crate) fn new(rx: Receiver<T>) -> Self {
        Self { rx }
    }

    /// Blocks the current thread until the value arrives, returning `None`
    /// if the sender was dropped without replying (the manager is
    /// shutting down).
    pub(crate) fn get(self) -> Option<T> {
        tokio::runtime::Handle::current()
            .block_on(self.rx)
            .ok()
    }
}

/// Spawns a future onto the shared multi-threaded runtime.
pub(crate) fn runtime_spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn get_current_timestamp() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as u64,
        Err(_) => 0,
    }
}

/// Current wall-clock time as a [`Duration`] since the Unix epoch.
pub(crate) fn get_current_duration() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Serializes a string multimap as `key\tvalue` pairs separated by `\r\n`,
/// matching the encoding used for the `extras` field stored in the
/// database and sent over the notification channel.
pub(crate) fn hashmap_to_string(map: &HashMap<String, String>) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}\t{v}"))
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Inverse of [`hashmap_to_string`].
pub(crate) fn string_to_hashmap(s: &str) -> HashMap<String, String> {
    s.lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashmap_roundtrips_through_string() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), "1".to_string());
        map.insert("b".to_string(), "2".to_string());

        let encoded = hashmap_to_string(&map);
        let decoded = string_to_hashmap(&encoded);
        assert_eq!(map, decoded);
    }

    #[test]
    fn timestamp_is_nonzero() {
        assert!(get_current_timestamp() > 0);
    }
}
