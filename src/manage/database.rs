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

//! The relational store backing the task registry: three tables (Tasks,
//! Progress, Subscriptions), additive-only migrations.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ServiceError;
use crate::task::config::Action;
use crate::task::info::State;
use crate::task::reason::Reason;
use crate::utils::hashmap_to_string;

/// Schema version; bump and append a migration in [`RequestDb::migrate`]
/// rather than altering existing columns.
const SCHEMA_VERSION: i32 = 1;

const CREATE_TASKS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    task_id     INTEGER PRIMARY KEY,
    bundle      TEXT NOT NULL,
    uid         INTEGER NOT NULL,
    action      INTEGER NOT NULL,
    mode        INTEGER NOT NULL,
    priority    INTEGER NOT NULL,
    state       INTEGER NOT NULL,
    reason      INTEGER NOT NULL,
    ctime       INTEGER NOT NULL,
    mtime       INTEGER NOT NULL,
    url         TEXT NOT NULL,
    token       TEXT NOT NULL,
    config_blob BLOB NOT NULL
)";

const CREATE_PROGRESS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS progress (
    task_id     INTEGER PRIMARY KEY REFERENCES tasks(task_id),
    file_index  INTEGER NOT NULL,
    processed   INTEGER NOT NULL,
    sizes_blob  TEXT NOT NULL,
    extras_blob TEXT NOT NULL
)";

const CREATE_SUBSCRIPTIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS subscriptions (
    task_id           INTEGER NOT NULL REFERENCES tasks(task_id),
    subscriber_bundle  TEXT NOT NULL,
    event_mask        INTEGER NOT NULL,
    PRIMARY KEY (task_id, subscriber_bundle, event_mask)
)";

/// A persisted task row, enough to re-hydrate a [`crate::task::request_task::RequestTask`]
/// on restart without re-parsing its full config blob.
#[derive(Clone, Debug)]
pub(crate) struct TaskRow {
    pub(crate) task_id: u32,
    pub(crate) bundle: String,
    pub(crate) uid: u64,
    pub(crate) action: Action,
    pub(crate) priority: u32,
    pub(crate) state: State,
    pub(crate) reason: Reason,
    pub(crate) ctime: u64,
    pub(crate) mtime: u64,
    pub(crate) url: String,
    pub(crate) token: String,
    pub(crate) config_blob: Vec<u8>,
    pub(crate) processed: usize,
}

/// Thread-safe handle to the sqlite connection backing the registry.
///
/// A single connection behind a mutex, matching the teacher's
/// single-writer discipline: the registry is the only component that
/// mutates task rows, so a `Mutex<Connection>` needs no additional
/// external serialization.
pub(crate) struct RequestDb {
    conn: Mutex<Connection>,
}

impl RequestDb {
    /// Opens (creating if absent) the database at `path` and applies the
    /// schema.
    pub(crate) fn open(path: &Path) -> Result<Self, ServiceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ServiceError::Io)?;
        }
        let conn = Connection::open(path).map_err(|e| ServiceError::Io(to_io(e)))?;
        let db = RequestDb {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// An in-memory database, used by tests.
    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite");
        let db = RequestDb {
            conn: Mutex::new(conn),
        };
        db.migrate().expect("migrate in-memory schema");
        db
    }

    fn migrate(&self) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(CREATE_TASKS_TABLE).map_err(|e| ServiceError::Io(to_io(e)))?;
        conn.execute_batch(CREATE_PROGRESS_TABLE).map_err(|e| ServiceError::Io(to_io(e)))?;
        conn.execute_batch(CREATE_SUBSCRIPTIONS_TABLE).map_err(|e| ServiceError::Io(to_io(e)))?;
        let _ = SCHEMA_VERSION;
        Ok(())
    }

    /// Inserts a brand-new task row in `Initialized` state.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_task(
        &self,
        task_id: u32,
        bundle: &str,
        uid: u64,
        action: Action,
        mode_value: u8,
        priority: u32,
        url: &str,
        token: &str,
        config_blob: &[u8],
        now: u64,
    ) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (task_id, bundle, uid, action, mode, priority, state, reason, ctime, mtime, url, token, config_blob)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?11, ?12)",
            params![
                task_id,
                bundle,
                uid as i64,
                action as u8,
                mode_value,
                priority,
                State::Initialized as u8,
                Reason::Default as u8,
                now as i64,
                url,
                token,
                config_blob,
            ],
        )
        .map_err(|e| ServiceError::Io(to_io(e)))?;
        conn.execute(
            "INSERT INTO progress (task_id, file_index, processed, sizes_blob, extras_blob) VALUES (?1, 0, 0, '[]', '')",
            params![task_id],
        )
        .map_err(|e| ServiceError::Io(to_io(e)))?;
        Ok(())
    }

    /// Writes through a state transition; called on every transition, not
    /// coalesced (see [`Self::update_progress`] for the field that is).
    pub(crate) fn update_state(
        &self,
        task_id: u32,
        state: State,
        reason: Reason,
        now: u64,
    ) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET state = ?1, reason = ?2, mtime = ?3 WHERE task_id = ?4",
            params![state as u8, reason as u8, now as i64, task_id],
        )
        .map_err(|e| ServiceError::Io(to_io(e)))?;
        Ok(())
    }

    /// Coalesced progress write: callers are expected to rate-limit calls
    /// themselves (see `ServiceConfig::progress_interval`/`progress_bytes`);
    /// every call here is unconditional.
    pub(crate) fn update_progress(
        &self,
        task_id: u32,
        file_index: usize,
        processed: usize,
        sizes: &[i64],
        extras: &std::collections::HashMap<String, String>,
    ) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        let sizes_blob = sizes
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");
        conn.execute(
            "UPDATE progress SET file_index = ?1, processed = ?2, sizes_blob = ?3, extras_blob = ?4 WHERE task_id = ?5",
            params![
                file_index as i64,
                processed as i64,
                format!("[{sizes_blob}]"),
                hashmap_to_string(extras),
                task_id,
            ],
        )
        .map_err(|e| ServiceError::Io(to_io(e)))?;
        Ok(())
    }

    /// Reads back one task's row, if present.
    pub(crate) fn get_task(&self, task_id: u32) -> Result<Option<TaskRow>, ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT t.task_id, t.bundle, t.uid, t.action, t.priority, t.state, t.reason, t.ctime, t.mtime, t.url, t.token, t.config_blob, p.processed
             FROM tasks t JOIN progress p ON t.task_id = p.task_id WHERE t.task_id = ?1",
            params![task_id],
            row_to_task,
        )
        .optional()
        .map_err(|e| ServiceError::Io(to_io(e)))
    }

    /// Lists tasks owned by `bundle`, most recent first.
    pub(crate) fn search_by_bundle(&self, bundle: &str) -> Result<Vec<TaskRow>, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT t.task_id, t.bundle, t.uid, t.action, t.priority, t.state, t.reason, t.ctime, t.mtime, t.url, t.token, t.config_blob, p.processed
                 FROM tasks t JOIN progress p ON t.task_id = p.task_id WHERE t.bundle = ?1 ORDER BY t.ctime DESC",
            )
            .map_err(|e| ServiceError::Io(to_io(e)))?;
        let rows = stmt
            .query_map(params![bundle], row_to_task)
            .map_err(|e| ServiceError::Io(to_io(e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServiceError::Io(to_io(e)))
    }

    /// Every non-terminal task, used to re-hydrate the registry on
    /// restart.
    pub(crate) fn non_terminal_tasks(&self) -> Result<Vec<TaskRow>, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT t.task_id, t.bundle, t.uid, t.action, t.priority, t.state, t.reason, t.ctime, t.mtime, t.url, t.token, t.config_blob, p.processed
                 FROM tasks t JOIN progress p ON t.task_id = p.task_id
                 WHERE t.state NOT IN (?1, ?2, ?3)",
            )
            .map_err(|e| ServiceError::Io(to_io(e)))?;
        let rows = stmt
            .query_map(
                params![
                    State::Completed as u8,
                    State::Failed as u8,
                    State::Removed as u8
                ],
                row_to_task,
            )
            .map_err(|e| ServiceError::Io(to_io(e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServiceError::Io(to_io(e)))
    }

    /// Records a subscription; idempotent via the table's composite key.
    pub(crate) fn add_subscription(
        &self,
        task_id: u32,
        subscriber_bundle: &str,
        event_mask: u32,
    ) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO subscriptions (task_id, subscriber_bundle, event_mask) VALUES (?1, ?2, ?3)",
            params![task_id, subscriber_bundle, event_mask],
        )
        .map_err(|e| ServiceError::Io(to_io(e)))?;
        Ok(())
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        task_id: row.get::<_, i64>(0)? as u32,
        bundle: row.get(1)?,
        uid: row.get::<_, i64>(2)? as u64,
        action: action_from_u8(row.get::<_, i64>(3)? as u8),
        priority: row.get::<_, i64>(4)? as u32,
        state: State::from(row.get::<_, i64>(5)? as u8),
        reason: Reason::from(row.get::<_, i64>(6)? as u8),
        ctime: row.get::<_, i64>(7)? as u64,
        mtime: row.get::<_, i64>(8)? as u64,
        url: row.get(9)?,
        token: row.get(10)?,
        config_blob: row.get(11)?,
        processed: row.get::<_, i64>(12)? as usize,
    })
}

fn action_from_u8(v: u8) -> Action {
    match v {
        1 => Action::Upload,
        2 => Action::Any,
        _ => Action::Download,
    }
}

fn to_io(e: rusqlite::Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let db = RequestDb::in_memory();
        db.insert_task(1, "com.example", 100, Action::Download, 0, 0, "https://x", "tok", b"{}", 1000)
            .unwrap();

        let row = db.get_task(1).unwrap().expect("row present");
        assert_eq!(row.bundle, "com.example");
        assert_eq!(row.state, State::Initialized);
        assert_eq!(row.processed, 0);
    }

    #[test]
    fn update_state_persists_transition() {
        let db = RequestDb::in_memory();
        db.insert_task(1, "com.example", 100, Action::Download, 0, 0, "https://x", "tok", b"{}", 1000)
            .unwrap();
        db.update_state(1, State::Running, Reason::Default, 2000).unwrap();

        let row = db.get_task(1).unwrap().unwrap();
        assert_eq!(row.state, State::Running);
        assert_eq!(row.mtime, 2000);
    }

    #[test]
    fn search_by_bundle_filters_and_orders() {
        let db = RequestDb::in_memory();
        db.insert_task(1, "a", 1, Action::Download, 0, 0, "https://x", "", b"{}", 100).unwrap();
        db.insert_task(2, "b", 1, Action::Download, 0, 0, "https://y", "", b"{}", 200).unwrap();
        db.insert_task(3, "a", 1, Action::Download, 0, 0, "https://z", "", b"{}", 300).unwrap();

        let rows = db.search_by_bundle("a").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].task_id, 3);
    }

    #[test]
    fn non_terminal_tasks_excludes_completed() {
        let db = RequestDb::in_memory();
        db.insert_task(1, "a", 1, Action::Download, 0, 0, "https://x", "", b"{}", 100).unwrap();
        db.insert_task(2, "a", 1, Action::Download, 0, 0, "https://y", "", b"{}", 100).unwrap();
        db.update_state(2, State::Completed, Reason::Default, 200).unwrap();

        let rows = db.non_terminal_tasks().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task_id, 1);
    }
}
