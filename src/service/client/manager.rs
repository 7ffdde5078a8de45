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

//! Turns [`NotifyEvent`]s into framed bytes and fans them out to every
//! channel subscribed to the event's task, coalescing progress and
//! breaking channels that fall too far behind.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::{BufMut, BytesMut};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::manage::notifier::NotifyEvent;
use crate::service::interface::{frame, put_string, FrameKind};
use crate::task::info::State;
use crate::task::notify::{Progress, ResponseData, WaitingCause};
use crate::task::reason::Reason;

/// A queued channel outbox entry: `Progress` frames for the same task
/// replace each other while undelivered; everything else is kept in full.
enum Queued {
    Progress(u32, BytesMut),
    Other(BytesMut),
}

impl Queued {
    fn bytes(&self) -> &BytesMut {
        match self {
            Queued::Progress(_, b) => b,
            Queued::Other(b) => b,
        }
    }
}

/// A channel falls this many frames behind before the bus gives up on it
/// and breaks the connection; the client is expected to re-open and
/// re-subscribe.
const STALL_LIMIT: usize = 256;

struct Channel {
    sender: UnboundedSender<BytesMut>,
    outbox: VecDeque<Queued>,
    tasks: HashSet<u32>,
}

/// Per-task cache of the latest Progress/State frames, replayed to a
/// channel the moment it (re-)subscribes.
#[derive(Default)]
struct LastKnown {
    progress: Option<BytesMut>,
    state: Option<BytesMut>,
}

/// Owns every open notification channel and the task→channel subscription
/// index; the task manager's event loop feeds it [`NotifyEvent`]s and the
/// IPC stub drives channel open/close and subscribe/unsubscribe.
pub(crate) struct ClientManager {
    next_channel_id: AtomicU64,
    channels: Mutex<HashMap<u64, Channel>>,
    subscriptions: Mutex<HashMap<u32, HashSet<u64>>>,
    last_known: Mutex<HashMap<u32, LastKnown>>,
}

impl ClientManager {
    pub(crate) fn new() -> Self {
        ClientManager {
            next_channel_id: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            last_known: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a fresh channel, returning its id and the receiving half the
    /// embedding binary forwards onto the client's socket.
    pub(crate) fn open_channel(&self) -> (u64, UnboundedReceiver<BytesMut>) {
        let channel_id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels.lock().unwrap().insert(
            channel_id,
            Channel {
                sender,
                outbox: VecDeque::new(),
                tasks: HashSet::new(),
            },
        );
        (channel_id, receiver)
    }

    /// Hands back a clone of a channel's raw outbound sender, bypassing the
    /// per-task outbox. Used for frames that don't belong to any one task,
    /// such as the running-count broadcast, so the caller can multiplex
    /// them onto the same socket the channel is already being pumped to.
    pub(crate) fn raw_sender(&self, channel_id: u64) -> Option<UnboundedSender<BytesMut>> {
        self.channels
            .lock()
            .unwrap()
            .get(&channel_id)
            .map(|c| c.sender.clone())
    }

    pub(crate) fn close_channel(&self, channel_id: u64) {
        if let Some(channel) = self.channels.lock().unwrap().remove(&channel_id) {
            let mut subs = self.subscriptions.lock().unwrap();
            for task_id in channel.tasks {
                if let Some(set) = subs.get_mut(&task_id) {
                    set.remove(&channel_id);
                }
            }
        }
    }

    /// Subscribes `channel_id` to every event for `task_id`, immediately
    /// replaying the latest known Progress and state if any is cached.
    pub(crate) fn subscribe(&self, channel_id: u64, task_id: u32) {
        {
            let mut channels = self.channels.lock().unwrap();
            let Some(channel) = channels.get_mut(&channel_id) else {
                return;
            };
            channel.tasks.insert(task_id);
        }
        self.subscriptions
            .lock()
            .unwrap()
            .entry(task_id)
            .or_default()
            .insert(channel_id);

        let last_known = self.last_known.lock().unwrap();
        if let Some(cached) = last_known.get(&task_id) {
            let mut channels = self.channels.lock().unwrap();
            if let Some(channel) = channels.get_mut(&channel_id) {
                if let Some(state) = &cached.state {
                    channel.outbox.push_back(Queued::Other(state.clone()));
                }
                if let Some(progress) = &cached.progress {
                    channel
                        .outbox
                        .push_back(Queued::Progress(task_id, progress.clone()));
                }
            }
        }
        drop(last_known);
        self.pump(channel_id);
    }

    pub(crate) fn unsubscribe(&self, channel_id: u64, task_id: u32) {
        if let Some(channel) = self.channels.lock().unwrap().get_mut(&channel_id) {
            channel.tasks.remove(&task_id);
        }
        if let Some(set) = self.subscriptions.lock().unwrap().get_mut(&task_id) {
            set.remove(&channel_id);
        }
    }

    /// Translates one bus event into a frame and fans it out to every
    /// channel subscribed to its task.
    pub(crate) fn dispatch(&self, event: NotifyEvent) {
        let (task_id, framed, is_progress) = match &event {
            NotifyEvent::Progress(task_id, progress) => (
                *task_id,
                frame(FrameKind::Progress, &encode_progress(*task_id, progress)),
                true,
            ),
            NotifyEvent::Response(task_id, response) => (
                *task_id,
                frame(FrameKind::Response, &encode_response(*task_id, response)),
                false,
            ),
            NotifyEvent::StateChanged(task_id, state, reason) => (
                *task_id,
                frame(FrameKind::State, &encode_state(*task_id, *state, *reason)),
                false,
            ),
            NotifyEvent::Fault(task_id, reason) => (
                *task_id,
                frame(FrameKind::Fault, &encode_fault(*task_id, *reason)),
                false,
            ),
            NotifyEvent::Wait(task_id, cause) => (
                *task_id,
                frame(FrameKind::Wait, &encode_wait(*task_id, *cause)),
                false,
            ),
            NotifyEvent::RunCount(_) => return,
        };

        self.remember(task_id, &framed, is_progress);

        let subscriber_ids: Vec<u64> = self
            .subscriptions
            .lock()
            .unwrap()
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();

        for channel_id in subscriber_ids {
            {
                let mut channels = self.channels.lock().unwrap();
                if let Some(channel) = channels.get_mut(&channel_id) {
                    enqueue(channel, task_id, framed.clone(), is_progress);
                }
            }
            self.pump(channel_id);
        }
    }

    fn remember(&self, task_id: u32, framed: &BytesMut, is_progress: bool) {
        let mut last_known = self.last_known.lock().unwrap();
        let entry = last_known.entry(task_id).or_default();
        if is_progress {
            entry.progress = Some(framed.clone());
        } else {
            entry.state = Some(framed.clone());
        }
    }

    /// Drains as much of a channel's outbox as its sender accepts; closes
    /// the channel outright once it falls `STALL_LIMIT` frames behind.
    fn pump(&self, channel_id: u64) {
        let mut channels = self.channels.lock().unwrap();
        let Some(channel) = channels.get_mut(&channel_id) else {
            return;
        };
        if channel.outbox.len() > STALL_LIMIT {
            drop(channels);
            self.close_channel(channel_id);
            return;
        }
        while let Some(item) = channel.outbox.pop_front() {
            if channel.sender.send(item.bytes().clone()).is_err() {
                drop(channels);
                self.close_channel(channel_id);
                return;
            }
        }
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

fn enqueue(channel: &mut Channel, task_id: u32, framed: BytesMut, is_progress: bool) {
    if is_progress {
        if let Some(Queued::Progress(tid, slot)) = channel.outbox.back_mut() {
            if *tid == task_id {
                *slot = framed;
                return;
            }
        }
        channel.outbox.push_back(Queued::Progress(task_id, framed));
    } else {
        channel.outbox.push_back(Queued::Other(framed));
    }
}

fn encode_progress(task_id: u32, progress: &Progress) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(task_id);
    buf.put_u8(progress.common_data.state);
    buf.put_u64_le(progress.common_data.index as u64);
    buf.put_u64_le(progress.common_data.total_processed as u64);
    buf.put_u32_le(progress.sizes.len() as u32);
    for size in &progress.sizes {
        buf.put_i64_le(*size);
    }
    buf.put_u32_le(progress.processed.len() as u32);
    for processed in &progress.processed {
        buf.put_u64_le(*processed as u64);
    }
    buf.put_u32_le(progress.extras.len() as u32);
    for (key, value) in &progress.extras {
        put_string(&mut buf, key);
        put_string(&mut buf, value);
    }
    buf
}

fn encode_response(task_id: u32, response: &ResponseData) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(task_id);
    put_string(&mut buf, &response.version);
    buf.put_u16_le(response.status_code);
    put_string(&mut buf, &response.reason);
    buf.put_u32_le(response.headers.len() as u32);
    for (name, values) in &response.headers {
        put_string(&mut buf, name);
        buf.put_u32_le(values.len() as u32);
        for value in values {
            put_string(&mut buf, value);
        }
    }
    buf
}

fn encode_state(task_id: u32, state: State, reason: Reason) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(task_id);
    buf.put_u8(state as u8);
    buf.put_u8(reason as u8);
    put_string(&mut buf, reason.as_str());
    buf
}

fn encode_fault(task_id: u32, reason: Reason) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(task_id);
    buf.put_u8(reason as u8);
    buf
}

fn encode_wait(task_id: u32, cause: WaitingCause) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(task_id);
    buf.put_u8(cause as u8);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::notify::CommonProgress;

    fn progress_event(task_id: u32, processed: usize) -> NotifyEvent {
        NotifyEvent::Progress(
            task_id,
            Progress {
                common_data: CommonProgress {
                    state: State::Running as u8,
                    index: 0,
                    total_processed: processed,
                },
                sizes: vec![100],
                processed: vec![processed],
                extras: Default::default(),
                body: None,
            },
        )
    }

    #[test]
    fn subscribed_channel_receives_dispatched_progress() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        manager.subscribe(channel_id, 7);

        manager.dispatch(progress_event(7, 10));

        let framed = rx.try_recv().unwrap();
        assert_eq!(&framed[0..2], &(FrameKind::Progress as u16).to_le_bytes());
    }

    #[test]
    fn unsubscribed_task_does_not_reach_the_channel() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        manager.subscribe(channel_id, 7);
        manager.unsubscribe(channel_id, 7);

        manager.dispatch(progress_event(7, 10));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resubscribing_replays_the_latest_progress() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        manager.subscribe(channel_id, 7);
        manager.dispatch(progress_event(7, 42));
        rx.try_recv().unwrap();

        let (second_channel, mut second_rx) = manager.open_channel();
        manager.subscribe(second_channel, 7);

        let replayed = second_rx.try_recv().unwrap();
        assert_eq!(&replayed[0..2], &(FrameKind::Progress as u16).to_le_bytes());
    }

    #[test]
    fn raw_sender_feeds_the_same_receiver_the_channel_was_opened_with() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        let sender = manager.raw_sender(channel_id).unwrap();
        sender.send(BytesMut::from(&b"x"[..])).unwrap();
        assert_eq!(&rx.try_recv().unwrap()[..], b"x");
    }

    #[test]
    fn progress_frame_carries_the_task_id_it_belongs_to() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        manager.subscribe(channel_id, 7);

        manager.dispatch(progress_event(7, 10));

        let framed = rx.try_recv().unwrap();
        let task_id = u32::from_le_bytes(framed[6..10].try_into().unwrap());
        assert_eq!(task_id, 7);
    }

    #[test]
    fn response_event_reaches_a_subscribed_channel_as_its_own_frame_kind() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        manager.subscribe(channel_id, 7);

        manager.dispatch(NotifyEvent::Response(
            7,
            ResponseData {
                version: "HTTP/1.1".to_string(),
                status_code: 200,
                reason: "OK".to_string(),
                headers: vec![("content-length".to_string(), vec!["10".to_string()])],
            },
        ));

        let framed = rx.try_recv().unwrap();
        assert_eq!(&framed[0..2], &(FrameKind::Response as u16).to_le_bytes());
        let task_id = u32::from_le_bytes(framed[6..10].try_into().unwrap());
        assert_eq!(task_id, 7);
    }

    #[test]
    fn response_precedes_the_first_progress_frame() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        manager.subscribe(channel_id, 7);

        manager.dispatch(NotifyEvent::Response(
            7,
            ResponseData {
                version: "HTTP/1.1".to_string(),
                status_code: 200,
                reason: "OK".to_string(),
                headers: vec![],
            },
        ));
        manager.dispatch(progress_event(7, 1));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(&first[0..2], &(FrameKind::Response as u16).to_le_bytes());
        assert_eq!(&second[0..2], &(FrameKind::Progress as u16).to_le_bytes());
    }

    #[test]
    fn state_changes_are_never_coalesced_with_progress() {
        let manager = ClientManager::new();
        let (channel_id, mut rx) = manager.open_channel();
        manager.subscribe(channel_id, 7);

        manager.dispatch(progress_event(7, 1));
        manager.dispatch(NotifyEvent::StateChanged(7, State::Completed, Reason::Default));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(&first[0..2], &(FrameKind::Progress as u16).to_le_bytes());
        assert_eq!(&second[0..2], &(FrameKind::State as u16).to_le_bytes());
    }
}
