//! Persistent task and pomodoro storage.
//!
//! The session core only ever talks to [`Store`]; which backend sits behind
//! it is a configuration choice (see [`open_store`]).

mod memory;
mod sqlite;

use std::sync::Arc;

use pomo_ipc::{Pomodoro, Task, TaskId};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{DatabaseBackend, DatabaseConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("store is closed")]
    Closed,

    #[error("{op} failed: {source}")]
    Sqlite {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{op}: corrupt row: {detail}")]
    Corrupt { op: &'static str, detail: String },

    #[error("invalid task: {0}")]
    Invalid(String),
}

/// CRUD contract for tasks and their completed pomodoros.
///
/// Every method may fail; callers wrap the error with their own context and
/// pass it on without interpreting it.
pub trait Store: Send + Sync {
    /// Persists a task that has no id yet and returns the assigned id.
    fn save_task(&self, task: &Task) -> Result<TaskId, StoreError>;

    /// The task with all of its pomodoros, oldest first.
    fn get_task(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Removes the task and every pomodoro recorded against it.
    fn delete_task(&self, id: TaskId) -> Result<(), StoreError>;

    fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    fn save_pomodoro(&self, task_id: TaskId, pomodoro: &Pomodoro) -> Result<(), StoreError>;

    fn get_pomodoros(&self, task_id: TaskId) -> Result<Vec<Pomodoro>, StoreError>;

    fn delete_pomodoros(&self, task_id: TaskId) -> Result<(), StoreError>;

    /// Releases the backend. Any later call fails with [`StoreError::Closed`].
    fn close(&self) -> Result<(), StoreError>;
}

/// Opens the backend selected by configuration.
pub fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match config.backend {
        DatabaseBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
        DatabaseBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

fn validate_new_task(task: &Task) -> Result<(), StoreError> {
    if let Some(id) = task.id {
        return Err(StoreError::Invalid(format!("task already has id {id}")));
    }
    if task.message.trim().is_empty() {
        return Err(StoreError::Invalid("message is empty".into()));
    }
    if task.n_pomodoros == 0 {
        return Err(StoreError::Invalid("at least one pomodoro is required".into()));
    }
    if task.duration.as_secs() == 0 {
        return Err(StoreError::Invalid("pomodoro duration must be at least one second".into()));
    }
    if task.duration > Task::MAX_DURATION {
        return Err(StoreError::Invalid(format!(
            "pomodoro duration must not exceed {} seconds",
            Task::MAX_DURATION.as_secs()
        )));
    }
    Ok(())
}

/// Behaviour every backend has to share.
#[cfg(test)]
pub(crate) fn check_store_contract(store: &dyn Store) {
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    let first = Task::new("write chapter", 4, Duration::from_secs(25 * 60))
        .with_tags(["book", "draft", "book"]);
    let second = Task::new("inbox zero", 1, Duration::from_secs(10 * 60));

    let first_id = store.save_task(&first).unwrap();
    let second_id = store.save_task(&second).unwrap();
    assert_ne!(first_id, second_id);

    let loaded = store.get_task(first_id).unwrap();
    assert_eq!(loaded.id, Some(first_id));
    assert_eq!(loaded.message, "write chapter");
    assert_eq!(loaded.tags, vec!["book", "draft", "book"]);
    assert_eq!(loaded.duration, Duration::from_secs(25 * 60));
    assert!(loaded.pomodoros.is_empty());

    let start = Local.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
    let morning = Pomodoro::new(start, start + chrono::Duration::minutes(25));
    let later = Pomodoro::new(
        start + chrono::Duration::minutes(30),
        start + chrono::Duration::minutes(55),
    );
    store.save_pomodoro(first_id, &morning).unwrap();
    store.save_pomodoro(first_id, &later).unwrap();
    assert_eq!(store.get_pomodoros(first_id).unwrap(), vec![morning, later]);
    assert_eq!(store.get_task(first_id).unwrap().pomodoros, vec![morning, later]);

    assert!(matches!(
        store.save_pomodoro(999, &morning),
        Err(StoreError::TaskNotFound(999))
    ));

    let listed = store.list_tasks().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].pomodoros.len(), 2);

    store.delete_pomodoros(first_id).unwrap();
    assert!(store.get_pomodoros(first_id).unwrap().is_empty());

    let endless = Task::new("stare at wall", 1, Task::MAX_DURATION + Duration::from_secs(1));
    assert!(matches!(store.save_task(&endless), Err(StoreError::Invalid(_))));

    store.save_pomodoro(second_id, &morning).unwrap();
    store.delete_task(second_id).unwrap();
    assert!(matches!(
        store.get_task(second_id),
        Err(StoreError::TaskNotFound(id)) if id == second_id
    ));
    assert!(store.get_pomodoros(second_id).unwrap().is_empty());
    assert!(matches!(
        store.delete_task(second_id),
        Err(StoreError::TaskNotFound(_))
    ));

    let mut with_id = second.clone();
    with_id.id = Some(5);
    assert!(matches!(store.save_task(&with_id), Err(StoreError::Invalid(_))));

    store.close().unwrap();
    assert!(matches!(store.list_tasks(), Err(StoreError::Closed)));
}
