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

//! The glue between the task manager and the notification bus (C5): a
//! small tagged event the manager emits and the client manager fans out,
//! without either side depending on the other's internals.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::task::info::State;
use crate::task::notify::{Progress, ResponseData, WaitingCause};
use crate::task::reason::Reason;

/// One notification-worthy occurrence, tagged by task id.
#[derive(Clone, Debug)]
pub(crate) enum NotifyEvent {
    /// A progress tick, coalescable by the bus.
    Progress(u32, Progress),
    /// The response headers/status for a task's current attempt, emitted
    /// once, before that attempt's first `Progress`. Never dropped.
    Response(u32, ResponseData),
    /// A lifecycle transition. Never coalesced/dropped.
    StateChanged(u32, State, Reason),
    /// A fault outside the normal transition path.
    Fault(u32, Reason),
    /// A `Waiting` transition's finer-grained cause.
    Wait(u32, WaitingCause),
    /// The device-wide count of `Running` tasks changed.
    RunCount(usize),
}

/// Sending half, held by the task manager and the transfer engine.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: UnboundedSender<NotifyEvent>,
}

impl Notifier {
    pub(crate) fn channel() -> (Notifier, UnboundedReceiver<NotifyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Notifier { tx }, rx)
    }

    /// Best-effort: if the client manager has shut down, notifications
    /// are simply dropped rather than treated as an error.
    pub(crate) fn send(&self, event: NotifyEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sent_events_arrive_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.send(NotifyEvent::StateChanged(1, State::Running, Reason::Default));
        notifier.send(NotifyEvent::StateChanged(1, State::Completed, Reason::Default));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, NotifyEvent::StateChanged(1, State::Running, _)));
        assert!(matches!(second, NotifyEvent::StateChanged(1, State::Completed, _)));
    }
}
