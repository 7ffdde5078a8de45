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

//! Tracks which channels subscribed to `RunCount` and fans the latest
//! value out to them whenever it changes.

use std::collections::HashSet;
use std::sync::Mutex;

use bytes::BytesMut;
use tokio::sync::mpsc::UnboundedSender;

use crate::service::interface::{frame, FrameKind};

/// One channel's send half, keyed by its channel id, for the run-count
/// broadcast list.
pub(crate) struct RunCountManager {
    subscribers: Mutex<HashSet<u64>>,
    senders: Mutex<std::collections::HashMap<u64, UnboundedSender<BytesMut>>>,
}

impl RunCountManager {
    pub(crate) fn new() -> Self {
        RunCountManager {
            subscribers: Mutex::new(HashSet::new()),
            senders: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Registers `channel_id`'s send half and marks it subscribed.
    pub(crate) fn subscribe(&self, channel_id: u64, sender: UnboundedSender<BytesMut>) {
        self.subscribers.lock().unwrap().insert(channel_id);
        self.senders.lock().unwrap().insert(channel_id, sender);
    }

    pub(crate) fn unsubscribe(&self, channel_id: u64) {
        self.subscribers.lock().unwrap().remove(&channel_id);
        self.senders.lock().unwrap().remove(&channel_id);
    }

    /// Broadcasts the new running count to every subscribed channel,
    /// dropping any whose receiver has gone away.
    pub(crate) fn broadcast(&self, count: usize) {
        let payload = (count as u32).to_le_bytes();
        let framed = frame(FrameKind::RunCount, &payload);
        let subscribers = self.subscribers.lock().unwrap().clone();
        let mut senders = self.senders.lock().unwrap();
        for channel_id in subscribers {
            if let Some(sender) = senders.get(&channel_id) {
                if sender.send(framed.clone()).is_err() {
                    senders.remove(&channel_id);
                }
            }
        }
    }
}

impl Default for RunCountManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn subscribed_channel_receives_broadcast_count() {
        let manager = RunCountManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.subscribe(1, tx);

        manager.broadcast(3);

        let framed = rx.try_recv().unwrap();
        assert_eq!(&framed[0..2], &(FrameKind::RunCount as u16).to_le_bytes());
        let count = u32::from_le_bytes(framed[6..10].try_into().unwrap());
        assert_eq!(count, 3);
    }

    #[test]
    fn unsubscribed_channel_receives_nothing() {
        let manager = RunCountManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.subscribe(1, tx);
        manager.unsubscribe(1);

        manager.broadcast(5);

        assert!(rx.try_recv().is_err());
    }
}
