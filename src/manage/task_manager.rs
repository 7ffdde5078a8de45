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

//! The task registry (C1) and its actor loop: the single writer of task
//! records, driving the state machine (C2) and asking the scheduler (C3)
//! to consider ready tasks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::ServiceConfig;
use crate::error::ErrorCode;
use crate::manage::database::RequestDb;
use crate::manage::events::TaskManagerEvent;
use crate::manage::notifier::{NotifyEvent, Notifier};
use crate::manage::query::SearchFilter;
use crate::manage::scheduler::qos::Candidate;
use crate::manage::scheduler::queue::RunningTask;
use crate::manage::scheduler::Scheduler;
use crate::service::active_counter::ActiveCounter;
use crate::task::config::{Action, TaskConfig};
use crate::task::info::{State, TaskInfo};
use crate::task::reason::Reason;
use crate::task::request_task::RequestTask;
use crate::task::task_control::CancelKind;
use crate::task::config_codec;
use crate::utils::get_current_timestamp;
use crate::utils::task_id_generator::{generate_task_id, seed_task_id_generator_above};

/// Per-task bookkeeping the registry owns, beyond the wire-visible
/// [`TaskInfo`].
struct TaskRecord {
    config: TaskConfig,
    info: TaskInfo,
    /// Present only while the task holds a worker slot.
    request_task: Option<Arc<RequestTask>>,
}

/// The registry and actor loop: receives [`TaskManagerEvent`]s on an
/// unbounded channel and is the sole mutator of task state.
pub(crate) struct TaskManager {
    records: HashMap<u32, TaskRecord>,
    db: Arc<RequestDb>,
    scheduler: Scheduler,
    service_config: ServiceConfig,
    notifier: Notifier,
    active: ActiveCounter,
    rx: UnboundedReceiver<TaskManagerEvent>,
    self_tx: UnboundedSender<TaskManagerEvent>,
}

/// A handle other components use to enqueue events into the manager's
/// actor loop.
#[derive(Clone)]
pub(crate) struct TaskManagerHandle {
    tx: UnboundedSender<TaskManagerEvent>,
}

impl TaskManagerHandle {
    pub(crate) fn send(&self, event: TaskManagerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl TaskManager {
    /// Builds the manager and its notification-receiving half, ready for
    /// [`Self::init`] then [`Self::run`].
    pub(crate) fn new(
        service_config: ServiceConfig,
    ) -> Result<(Self, TaskManagerHandle, UnboundedReceiver<NotifyEvent>), crate::error::ServiceError> {
        let db = Arc::new(RequestDb::open(&service_config.database_path)?);
        let (tx, rx) = mpsc::unbounded_channel();
        let (notifier, notify_rx) = Notifier::channel();
        let scheduler = Scheduler::new(service_config.k_total, service_config.k_bundle);
        let manager = TaskManager {
            records: HashMap::new(),
            db,
            scheduler,
            service_config,
            notifier,
            active: ActiveCounter::new(),
            rx,
            self_tx: tx.clone(),
        };
        Ok((manager, TaskManagerHandle { tx }, notify_rx))
    }

    /// Re-hydrates all non-removed tasks from persisted storage, per the
    /// restart invariant: non-zero-processed tasks become Paused, zero-
    /// processed tasks become Initialized, never Running.
    pub(crate) fn restore(&mut self) -> Result<(), crate::error::ServiceError> {
        let mut highest_id = 0;
        for row in self.db.non_terminal_tasks()? {
            highest_id = highest_id.max(row.task_id);
            let state = if row.processed > 0 {
                State::Paused
            } else {
                State::Initialized
            };
            let partial = config_codec::decode(&row.config_blob).unwrap_or_default();
            let config = TaskConfig {
                bundle: row.bundle.clone(),
                url: row.url.clone(),
                method: partial.method,
                headers: partial.headers,
                form_items: partial.form_items,
                file_specs: partial.file_specs,
                title: partial.title,
                description: partial.description,
                token: row.token.clone(),
                version: partial.version,
                common_data: crate::task::config::CommonTaskConfig {
                    task_id: row.task_id,
                    action: row.action,
                    mode: partial.mode,
                    overwrite: partial.overwrite,
                    network: partial.network,
                    metered_allowed: partial.metered_allowed,
                    roaming_allowed: partial.roaming_allowed,
                    retry_enabled: partial.retry_enabled,
                    redirect_enabled: partial.redirect_enabled,
                    range: partial.range,
                    gauge: partial.gauge,
                    precise: partial.precise,
                    priority: row.priority,
                    background: partial.background,
                    min_speed: partial.min_speed,
                    timeout: partial.timeout,
                },
            };
            let mut info = TaskInfo::new(&config, row.uid);
            info.common_data.state = state;
            info.common_data.ctime = row.ctime;
            info.common_data.mtime = row.mtime;
            info.common_data.reason = row.reason;
            self.records.insert(
                row.task_id,
                TaskRecord {
                    config,
                    info,
                    request_task: None,
                },
            );
        }
        seed_task_id_generator_above(highest_id);
        Ok(())
    }

    /// Runs the actor loop until the channel closes or a `Shutdown` event
    /// arrives.
    pub(crate) async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if matches!(event, TaskManagerEvent::Shutdown) {
                break;
            }
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: TaskManagerEvent) {
        match event {
            TaskManagerEvent::Create(config, reply) => {
                let _ = reply.send(self.handle_create(config));
            }
            TaskManagerEvent::Start(task_id, reply) => {
                let result = self.handle_start(task_id);
                if result.is_ok() {
                    self.evaluate_scheduler();
                }
                let _ = reply.send(result);
            }
            TaskManagerEvent::Pause(task_id, reply) => {
                let _ = reply.send(self.handle_suspend(task_id, CancelKind::Pause, State::Paused));
            }
            TaskManagerEvent::Resume(task_id, reply) => {
                let result = self.handle_resume(task_id);
                if result.is_ok() {
                    self.evaluate_scheduler();
                }
                let _ = reply.send(result);
            }
            TaskManagerEvent::Stop(task_id, reply) => {
                let _ = reply.send(self.handle_suspend(task_id, CancelKind::Stop, State::Stopped));
            }
            TaskManagerEvent::Remove(task_id, downgrade, reply) => {
                let mut result = self.handle_remove(task_id);
                if downgrade && result == Err(ErrorCode::TaskNotFound) {
                    result = Ok(());
                }
                let _ = reply.send(result);
            }
            TaskManagerEvent::Show(task_id, caller_bundle, reply) => {
                let _ = reply.send(self.handle_show(task_id, &caller_bundle));
            }
            TaskManagerEvent::Touch(task_id, token, reply) => {
                let _ = reply.send(self.handle_touch(task_id, &token));
            }
            TaskManagerEvent::GetTask(task_id, token, reply) => {
                let _ = reply.send(self.handle_get_task(task_id, &token));
            }
            TaskManagerEvent::Inspect(task_id, reply) => {
                let _ = reply.send(self.handle_inspect(task_id));
            }
            TaskManagerEvent::Search(filter, reply) => {
                let _ = reply.send(self.handle_search(&filter));
            }
            TaskManagerEvent::Clear(task_ids, reply) => {
                let removed = self.handle_clear(task_ids);
                let _ = reply.send(removed);
            }
            TaskManagerEvent::Network(state) => {
                self.scheduler.network.set_state(state);
                self.evaluate_scheduler();
                self.reconsider_running_against_network();
            }
            TaskManagerEvent::AppForeground(bundle) => {
                self.scheduler.app_state.set_foreground(&bundle);
                self.evaluate_scheduler();
            }
            TaskManagerEvent::AppBackground(bundle) => {
                self.scheduler.app_state.set_backgrounded(&bundle);
            }
            TaskManagerEvent::BundleUninstalled(bundle, reply) => {
                let ids: Vec<u32> = self
                    .records
                    .iter()
                    .filter(|(_, r)| r.info.bundle == bundle && !r.info.state().is_terminal())
                    .map(|(id, _)| *id)
                    .collect();
                let removed = self.handle_clear(ids);
                let _ = reply.send(removed);
            }
            TaskManagerEvent::Finished(task_id, result) => {
                self.handle_finished(task_id, result);
                self.evaluate_scheduler();
            }
            TaskManagerEvent::Reschedule => self.evaluate_scheduler(),
            TaskManagerEvent::Shutdown => {}
        }
    }

    fn handle_create(&mut self, mut config: TaskConfig) -> Result<u32, ErrorCode> {
        if config.url.is_empty() || config.bundle.is_empty() {
            return Err(ErrorCode::ParameterCheck);
        }
        let bundle_count = self
            .records
            .values()
            .filter(|r| r.info.bundle == config.bundle && !r.info.state().is_terminal())
            .count();
        if bundle_count >= self.service_config.max_tasks_per_bundle {
            return Err(ErrorCode::TaskQueue);
        }

        let task_id = generate_task_id();
        config.common_data.task_id = task_id;
        let uid = 20_000_000 + (task_id as u64 % 1000);
        let info = TaskInfo::new(&config, uid);
        let config_blob = config_codec::encode(&config);

        self.db
            .insert_task(
                task_id,
                &config.bundle,
                uid,
                config.common_data.action,
                config.common_data.mode as u8,
                config.common_data.priority,
                &config.url,
                &config.token,
                &config_blob,
                info.common_data.ctime,
            )
            .map_err(ErrorCode::from)?;

        self.records.insert(
            task_id,
            TaskRecord {
                config,
                info,
                request_task: None,
            },
        );
        Ok(task_id)
    }

    fn handle_start(&mut self, task_id: u32) -> Result<(), ErrorCode> {
        let record = self.records.get_mut(&task_id).ok_or(ErrorCode::TaskNotFound)?;
        match record.info.state() {
            State::Initialized | State::Paused | State::Stopped => {
                record.info.common_data.state = State::Waiting;
                self.db
                    .update_state(task_id, State::Waiting, Reason::Default, get_current_timestamp())
                    .map_err(ErrorCode::from)?;
                self.notifier.send(NotifyEvent::StateChanged(task_id, State::Waiting, Reason::Default));
                self.notifier.send(NotifyEvent::Wait(task_id, crate::task::notify::WaitingCause::TaskQueue));
                Ok(())
            }
            _ => Err(ErrorCode::TaskState),
        }
    }

    fn handle_resume(&mut self, task_id: u32) -> Result<(), ErrorCode> {
        let record = self.records.get_mut(&task_id).ok_or(ErrorCode::TaskNotFound)?;
        if !record.info.state().is_resumable() {
            return Err(ErrorCode::TaskState);
        }
        record.info.common_data.state = State::Waiting;
        self.db
            .update_state(task_id, State::Waiting, Reason::Default, get_current_timestamp())
            .map_err(ErrorCode::from)?;
        self.notifier.send(NotifyEvent::StateChanged(task_id, State::Waiting, Reason::Default));
        self.notifier.send(NotifyEvent::Wait(task_id, crate::task::notify::WaitingCause::TaskQueue));
        Ok(())
    }

    fn handle_suspend(
        &mut self,
        task_id: u32,
        kind: CancelKind,
        target_if_already_waiting: State,
    ) -> Result<(), ErrorCode> {
        let record = self.records.get_mut(&task_id).ok_or(ErrorCode::TaskNotFound)?;
        match record.info.state() {
            State::Running => {
                self.scheduler.running.cancel(task_id, kind);
                Ok(())
            }
            State::Waiting | State::Retrying => {
                record.info.common_data.state = target_if_already_waiting;
                self.db.update_state(
                    task_id,
                    target_if_already_waiting,
                    Reason::UserOperation,
                    get_current_timestamp(),
                ).map_err(ErrorCode::from)?;
                self.notifier.send(NotifyEvent::StateChanged(
                    task_id,
                    target_if_already_waiting,
                    Reason::UserOperation,
                ));
                Ok(())
            }
            _ => Err(ErrorCode::TaskState),
        }
    }

    fn handle_remove(&mut self, task_id: u32) -> Result<(), ErrorCode> {
        let record = self.records.get_mut(&task_id).ok_or(ErrorCode::TaskNotFound)?;
        if record.info.state() == State::Running {
            self.scheduler.running.cancel(task_id, CancelKind::Remove);
        } else {
            record.info.common_data.state = State::Removed;
            record.info.common_data.reason = Reason::UserOperation;
            let _ = self.db.update_state(
                task_id,
                State::Removed,
                Reason::UserOperation,
                get_current_timestamp(),
            );
            self.notifier.send(NotifyEvent::StateChanged(
                task_id,
                State::Removed,
                Reason::UserOperation,
            ));
        }
        Ok(())
    }

    fn handle_show(&mut self, task_id: u32, caller_bundle: &str) -> Result<TaskInfo, ErrorCode> {
        let record = self.records.get(&task_id).ok_or(ErrorCode::TaskNotFound)?;
        if record.info.bundle != caller_bundle || record.info.state() == State::Removed {
            return Err(ErrorCode::TaskNotFound);
        }
        Ok(self.live_snapshot(record))
    }

    fn handle_touch(&mut self, task_id: u32, token: &str) -> Result<TaskInfo, ErrorCode> {
        let record = self.records.get(&task_id).ok_or(ErrorCode::TaskNotFound)?;
        if record.config.token != token || token.is_empty() {
            return Err(ErrorCode::TaskNotFound);
        }
        Ok(self.live_snapshot(record))
    }

    /// Token-gated, mirroring [`Self::handle_touch`]: `GetTask` is the
    /// spec's other cross-bundle read path, not an ownership-scoped query.
    fn handle_get_task(&self, task_id: u32, token: &str) -> Result<TaskConfig, ErrorCode> {
        let record = self.records.get(&task_id).ok_or(ErrorCode::TaskNotFound)?;
        if record.config.token != token || token.is_empty() {
            return Err(ErrorCode::TaskNotFound);
        }
        Ok(record.config.clone())
    }

    /// Unscoped by design: callers outside this module decide what an
    /// `(owning bundle, action)` pair authorizes.
    fn handle_inspect(&self, task_id: u32) -> Option<(String, Action)> {
        self.records
            .get(&task_id)
            .map(|r| (r.info.bundle.clone(), r.config.common_data.action))
    }

    fn live_snapshot(&self, record: &TaskRecord) -> TaskInfo {
        let mut info = record.info.clone();
        if let Some(task) = &record.request_task {
            info.progress = task.snapshot_progress();
        }
        info
    }

    fn handle_search(&self, filter: &SearchFilter) -> Vec<u32> {
        let mut ids: Vec<(u32, u64)> = self
            .records
            .iter()
            .filter(|(_, r)| r.info.state() != State::Removed)
            .filter(|(_, r)| {
                let caller_bundle = match &filter.method {
                    crate::manage::query::SearchMethod::Bundle(b) => b.as_str(),
                    crate::manage::query::SearchMethod::System => r.info.bundle.as_str(),
                };
                filter.matches(&r.info, caller_bundle)
            })
            .map(|(id, r)| (*id, r.info.common_data.ctime))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1));
        ids.into_iter().map(|(id, _)| id).collect()
    }

    fn handle_clear(&mut self, task_ids: Vec<u32>) -> Vec<u32> {
        let mut removed = Vec::new();
        for task_id in task_ids {
            if self.handle_remove(task_id).is_ok() {
                removed.push(task_id);
            }
        }
        removed
    }

    fn evaluate_scheduler(&mut self) {
        if !self.scheduler.has_free_slot() {
            return;
        }
        let candidates: Vec<Candidate> = self
            .records
            .iter()
            .filter(|(_, r)| r.info.state() == State::Waiting)
            .filter(|(_, r)| {
                self.scheduler.network_eligible(
                    r.config.common_data.network,
                    r.config.common_data.metered_allowed,
                    r.config.common_data.roaming_allowed,
                )
            })
            .map(|(id, r)| Candidate {
                task_id: *id,
                bundle: r.info.bundle.clone(),
                priority: r.config.common_data.priority,
                foreground_bonus: self.scheduler.app_state.is_foreground(&r.info.bundle)
                    && r.config.common_data.mode == crate::task::config::Mode::Foreground,
                ctime: r.info.common_data.ctime,
            })
            .collect();

        let picked = self.scheduler.pick(candidates);
        for task_id in picked {
            self.spawn_task(task_id);
        }
    }

    fn spawn_task(&mut self, task_id: u32) {
        let Some(record) = self.records.get_mut(&task_id) else {
            return;
        };
        let base_dir: PathBuf = self.service_config.storage_root.join(&record.info.bundle);
        let request_task = match RequestTask::new(
            record.config.clone(),
            base_dir,
            &self.service_config,
            self.notifier.clone(),
            self.db.clone(),
        ) {
            Ok(task) => Arc::new(task),
            Err(_) => {
                record.info.common_data.state = State::Failed;
                record.info.common_data.reason = Reason::BuildRequestFailed;
                let _ = self.db.update_state(task_id, State::Failed, Reason::BuildRequestFailed, get_current_timestamp());
                self.notifier.send(NotifyEvent::StateChanged(task_id, State::Failed, Reason::BuildRequestFailed));
                return;
            }
        };

        record.info.common_data.state = State::Running;
        record.request_task = Some(request_task.clone());
        let _ = self.db.update_state(task_id, State::Running, Reason::Default, get_current_timestamp());
        self.notifier.send(NotifyEvent::StateChanged(task_id, State::Running, Reason::Default));

        let control = request_task.control().clone();
        let bundle = record.info.bundle.clone();
        let tx = self.self_tx.clone();
        let handle = tokio::spawn(async move {
            let result = crate::task::run(request_task).await;
            let _ = tx.send(TaskManagerEvent::Finished(task_id, result));
        });
        self.scheduler.running.insert(task_id, RunningTask { bundle, control, handle });
        self.active.increment();
        self.notifier.send(NotifyEvent::RunCount(self.active.get() as usize));
    }

    fn handle_finished(&mut self, task_id: u32, result: Result<(), Reason>) {
        let running = self.scheduler.running.remove(task_id);
        let cancel_kind = running.as_ref().and_then(|r| r.control.cancel_kind());
        if running.is_some() {
            self.active.decrement();
            self.notifier.send(NotifyEvent::RunCount(self.active.get() as usize));
        }
        let Some(record) = self.records.get_mut(&task_id) else {
            return;
        };

        let (state, reason) = match result {
            Ok(()) => (State::Completed, Reason::Default),
            Err(Reason::Default) => match cancel_kind {
                Some(CancelKind::Pause) => (State::Paused, Reason::UserOperation),
                Some(CancelKind::Stop) => (State::Stopped, Reason::UserOperation),
                Some(CancelKind::Remove) => (State::Removed, Reason::UserOperation),
                Some(CancelKind::NetworkOffline) => (State::Waiting, Reason::NetworkOffline),
                None => (State::Paused, Reason::UserOperation),
            },
            Err(reason) => (State::Failed, reason),
        };

        if matches!(state, State::Stopped | State::Removed)
            && record.config.common_data.action == Action::Download
        {
            if let Some(task) = &record.request_task {
                let _ = crate::task::download::discard(task, 0);
            }
        }

        record.info.common_data.state = state;
        record.info.common_data.reason = reason;
        if let Some(task) = record.request_task.take() {
            record.info.progress = task.snapshot_progress();
        }
        let _ = self.db.update_state(task_id, state, reason, get_current_timestamp());
        self.notifier.send(NotifyEvent::StateChanged(task_id, state, reason));
    }

    /// When connectivity changes, any `Running` task whose policy no
    /// longer matches is preempted back into `Waiting`.
    fn reconsider_running_against_network(&mut self) {
        let offenders: Vec<u32> = self
            .scheduler
            .running
            .task_ids()
            .into_iter()
            .filter(|id| {
                self.records.get(id).is_some_and(|r| {
                    !self.scheduler.network_eligible(
                        r.config.common_data.network,
                        r.config.common_data.metered_allowed,
                        r.config.common_data.roaming_allowed,
                    )
                })
            })
            .collect();
        for task_id in offenders {
            self.scheduler.running.cancel(task_id, CancelKind::NetworkOffline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::config::ConfigBuilder;

    fn test_manager() -> TaskManager {
        let dir = std::env::temp_dir().join(format!("request_tm_test_{}", std::process::id()));
        let service_config = ServiceConfig::rooted_at(dir);
        let (manager, _handle, _notify_rx) = TaskManager::new(service_config).unwrap();
        manager
    }

    #[test]
    fn create_assigns_increasing_ids_and_starts_initialized() {
        let mut manager = test_manager();
        let config = ConfigBuilder::new().bundle("a").url("https://example.com/f").build();
        let id1 = manager.handle_create(config.clone()).unwrap();
        let id2 = manager.handle_create(config).unwrap();
        assert!(id2 > id1);
        assert_eq!(manager.records.get(&id1).unwrap().info.state(), State::Initialized);
    }

    #[test]
    fn create_rejects_empty_url() {
        let mut manager = test_manager();
        let config = ConfigBuilder::new().bundle("a").build();
        assert_eq!(manager.handle_create(config), Err(ErrorCode::ParameterCheck));
    }

    #[test]
    fn start_then_show_reflects_waiting_state() {
        let mut manager = test_manager();
        let config = ConfigBuilder::new().bundle("a").url("https://example.com/f").build();
        let id = manager.handle_create(config).unwrap();
        manager.handle_start(id).unwrap();
        let info = manager.handle_show(id, "a").unwrap();
        assert_eq!(info.state(), State::Waiting);
    }

    #[test]
    fn show_from_wrong_bundle_is_not_found() {
        let mut manager = test_manager();
        let config = ConfigBuilder::new().bundle("a").url("https://example.com/f").build();
        let id = manager.handle_create(config).unwrap();
        assert_eq!(manager.handle_show(id, "b"), Err(ErrorCode::TaskNotFound));
    }

    #[test]
    fn remove_then_show_is_not_found_but_touch_with_token_succeeds() {
        let mut manager = test_manager();
        let config = ConfigBuilder::new().bundle("a").url("https://example.com/f").build();
        let id = manager.handle_create(config).unwrap();
        // token defaults to empty in ConfigBuilder; set one directly for this test.
        manager.records.get_mut(&id).unwrap().config.token = "secret".to_string();
        manager.handle_remove(id).unwrap();

        assert_eq!(manager.handle_show(id, "a"), Err(ErrorCode::TaskNotFound));
        assert!(manager.handle_touch(id, "secret").is_ok());
        assert!(manager.handle_touch(id, "wrong").is_err());
    }

    #[test]
    fn search_excludes_removed_tasks() {
        let mut manager = test_manager();
        let config = ConfigBuilder::new().bundle("a").url("https://example.com/f").build();
        let id = manager.handle_create(config).unwrap();
        manager.handle_remove(id).unwrap();

        let results = manager.handle_search(&SearchFilter::for_bundle("a"));
        assert!(!results.contains(&id));
    }
}
