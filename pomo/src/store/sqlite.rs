//! `SQLite` store.
//!
//! Schema versions are tracked in `PRAGMA user_version`; opening a database
//! brings it up to date. Tags are kept as a JSON array, timestamps as
//! RFC 3339 text.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use pomo_ipc::{Pomodoro, Task, TaskId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{validate_new_task, Store, StoreError};

const CURRENT_VERSION: i32 = 1;

const SCHEMA_V1: &str = r"
CREATE TABLE task (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    message       TEXT    NOT NULL,
    n_pomodoros   INTEGER NOT NULL,
    duration_secs INTEGER NOT NULL,
    tags          TEXT    NOT NULL DEFAULT '[]'
);
CREATE TABLE pomodoro (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES task(id),
    started_at TEXT NOT NULL,
    ended_at   TEXT NOT NULL
);
CREATE INDEX pomodoro_task_id ON pomodoro(task_id);
";

fn sql(op: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |source| StoreError::Sqlite { op, source }
}

pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!(path = %path.display(), "opening sqlite store");
        let conn = Connection::open(path).map_err(sql("open database"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql("open database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(sql("enable foreign keys"))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(sql("read schema version"))?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }
    conn.execute_batch(SCHEMA_V1).map_err(sql("create schema"))?;
    conn.execute_batch(&format!("PRAGMA user_version = {CURRENT_VERSION};"))
        .map_err(sql("set schema version"))
}

struct TaskRow {
    id: TaskId,
    message: String,
    n_pomodoros: u32,
    duration_secs: i64,
    tags: String,
}

impl TaskRow {
    const COLUMNS: &'static str = "id, message, n_pomodoros, duration_secs, tags";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            message: row.get(1)?,
            n_pomodoros: row.get(2)?,
            duration_secs: row.get(3)?,
            tags: row.get(4)?,
        })
    }

    fn into_task(self, op: &'static str, pomodoros: Vec<Pomodoro>) -> Result<Task, StoreError> {
        let tags: Vec<String> = serde_json::from_str(&self.tags).map_err(|e| StoreError::Corrupt {
            op,
            detail: format!("tags of task {}: {e}", self.id),
        })?;
        let secs = u64::try_from(self.duration_secs).map_err(|_| StoreError::Corrupt {
            op,
            detail: format!("negative duration on task {}", self.id),
        })?;
        Ok(Task {
            id: Some(self.id),
            message: self.message,
            tags,
            n_pomodoros: self.n_pomodoros,
            duration: Duration::from_secs(secs),
            pomodoros,
        })
    }
}

fn parse_timestamp(op: &'static str, raw: &str) -> Result<DateTime<Local>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| StoreError::Corrupt {
            op,
            detail: format!("timestamp {raw:?}: {e}"),
        })
}

fn task_exists(conn: &Connection, id: TaskId) -> Result<bool, StoreError> {
    conn.query_row("SELECT 1 FROM task WHERE id = ?1", [id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(sql("look up task"))
}

fn load_pomodoros(conn: &Connection, task_id: TaskId) -> Result<Vec<Pomodoro>, StoreError> {
    const OP: &str = "load pomodoros";
    let mut stmt = conn
        .prepare_cached("SELECT started_at, ended_at FROM pomodoro WHERE task_id = ?1 ORDER BY id")
        .map_err(sql(OP))?;
    let rows = stmt
        .query_map([task_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(sql(OP))?;

    let mut pomodoros = Vec::new();
    for row in rows {
        let (start, end) = row.map_err(sql(OP))?;
        pomodoros.push(Pomodoro::new(parse_timestamp(OP, &start)?, parse_timestamp(OP, &end)?));
    }
    Ok(pomodoros)
}

impl Store for SqliteStore {
    fn save_task(&self, task: &Task) -> Result<TaskId, StoreError> {
        validate_new_task(task)?;
        let tags =
            serde_json::to_string(&task.tags).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let duration_secs = i64::try_from(task.duration.as_secs())
            .map_err(|_| StoreError::Invalid("duration out of range".into()))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task (message, n_pomodoros, duration_secs, tags) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![task.message, task.n_pomodoros, duration_secs, tags],
            )
            .map_err(sql("insert task"))?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn get_task(&self, id: TaskId) -> Result<Task, StoreError> {
        const OP: &str = "get task";
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM task WHERE id = ?1", TaskRow::COLUMNS),
                    [id],
                    TaskRow::from_row,
                )
                .optional()
                .map_err(sql(OP))?
                .ok_or(StoreError::TaskNotFound(id))?;
            let pomodoros = load_pomodoros(conn, id)?;
            row.into_task(OP, pomodoros)
        })
    }

    fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        const OP: &str = "delete task";
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(sql(OP))?;
            tx.execute("DELETE FROM pomodoro WHERE task_id = ?1", [id])
                .map_err(sql(OP))?;
            let removed = tx
                .execute("DELETE FROM task WHERE id = ?1", [id])
                .map_err(sql(OP))?;
            if removed == 0 {
                // dropping `tx` rolls back
                return Err(StoreError::TaskNotFound(id));
            }
            tx.commit().map_err(sql(OP))
        })
    }

    fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        const OP: &str = "list tasks";
        self.with_conn(|conn| {
            let rows = {
                let mut stmt = conn
                    .prepare(&format!("SELECT {} FROM task ORDER BY id", TaskRow::COLUMNS))
                    .map_err(sql(OP))?;
                let mapped = stmt.query_map([], TaskRow::from_row).map_err(sql(OP))?;
                mapped.collect::<rusqlite::Result<Vec<_>>>().map_err(sql(OP))?
            };
            rows.into_iter()
                .map(|row| {
                    let pomodoros = load_pomodoros(conn, row.id)?;
                    row.into_task(OP, pomodoros)
                })
                .collect()
        })
    }

    fn save_pomodoro(&self, task_id: TaskId, pomodoro: &Pomodoro) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            if !task_exists(conn, task_id)? {
                return Err(StoreError::TaskNotFound(task_id));
            }
            conn.execute(
                "INSERT INTO pomodoro (task_id, started_at, ended_at) VALUES (?1, ?2, ?3)",
                params![task_id, pomodoro.start.to_rfc3339(), pomodoro.end.to_rfc3339()],
            )
            .map_err(sql("insert pomodoro"))?;
            Ok(())
        })
    }

    fn get_pomodoros(&self, task_id: TaskId) -> Result<Vec<Pomodoro>, StoreError> {
        self.with_conn(|conn| load_pomodoros(conn, task_id))
    }

    fn delete_pomodoros(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM pomodoro WHERE task_id = ?1", [task_id])
                .map_err(sql("delete pomodoros"))?;
            Ok(())
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(conn) => conn.close().map_err(|(_, source)| StoreError::Sqlite {
                op: "close database",
                source,
            }),
            None => Ok(()),
        }
    }
}
