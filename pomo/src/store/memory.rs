//! In-process store. Nothing survives the process; used for tests and for
//! `backend = "memory"`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use pomo_ipc::{Pomodoro, Task, TaskId};

use super::{validate_new_task, Store, StoreError};

#[derive(Debug, Default)]
struct Inner {
    last_id: TaskId,
    tasks: BTreeMap<TaskId, Task>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return Err(StoreError::Closed);
        }
        Ok(inner)
    }
}

impl Store for MemoryStore {
    fn save_task(&self, task: &Task) -> Result<TaskId, StoreError> {
        validate_new_task(task)?;
        let mut inner = self.open()?;
        inner.last_id += 1;
        let id = inner.last_id;
        let mut stored = task.clone();
        stored.id = Some(id);
        stored.pomodoros.clear();
        inner.tasks.insert(id, stored);
        Ok(id)
    }

    fn get_task(&self, id: TaskId) -> Result<Task, StoreError> {
        self.open()?
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        self.open()?
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::TaskNotFound(id))
    }

    fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.open()?.tasks.values().cloned().collect())
    }

    fn save_pomodoro(&self, task_id: TaskId, pomodoro: &Pomodoro) -> Result<(), StoreError> {
        let mut inner = self.open()?;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        task.pomodoros.push(*pomodoro);
        Ok(())
    }

    fn get_pomodoros(&self, task_id: TaskId) -> Result<Vec<Pomodoro>, StoreError> {
        Ok(self
            .open()?
            .tasks
            .get(&task_id)
            .map(|task| task.pomodoros.clone())
            .unwrap_or_default())
    }

    fn delete_pomodoros(&self, task_id: TaskId) -> Result<(), StoreError> {
        if let Some(task) = self.open()?.tasks.get_mut(&task_id) {
            task.pomodoros.clear();
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        inner.tasks.clear();
        Ok(())
    }
}
