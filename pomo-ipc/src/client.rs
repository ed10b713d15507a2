//! One-shot request/response client for the session server.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::models::{Pomodoro, PomodoroWithId, Status, Task, TaskId};
use crate::protocol::{Command, Envelope, Request, Response};
use crate::{IpcError, MAX_FRAME_BYTES};

/// Dials the server afresh for every call. No pooling: request volume is a
/// handful per CLI invocation or one per second from a running session.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends one request and waits for exactly one response.
    ///
    /// There is no timeout here; wrap the call in `tokio::time::timeout`
    /// if the caller needs one.
    pub async fn request(&self, request: Request) -> Result<Response, IpcError> {
        let command = request.command();
        let frame = request.into_envelope()?.encode()?;

        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| IpcError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        debug!(%command, socket = %self.socket_path.display(), "sending request");

        stream.write_all(&frame).await?;
        stream.shutdown().await?;

        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_to_end(&mut buf)
            .await?;

        let envelope = Envelope::decode(&buf)?;
        Response::from_envelope(envelope, command)
    }

    /// Returns the id storage assigned to the new task.
    pub async fn create_task(&self, task: Task) -> Result<TaskId, IpcError> {
        match self.request(Request::CreateTask(task)).await? {
            Response::CreateTask(id) => Ok(id),
            other => Err(unexpected(Command::CreateTask, &other)),
        }
    }

    pub async fn create_pomodoro(
        &self,
        task_id: TaskId,
        pomodoro: Pomodoro,
    ) -> Result<(), IpcError> {
        let request = Request::CreatePomodoro(PomodoroWithId { task_id, pomodoro });
        match self.request(request).await? {
            Response::CreatePomodoro => Ok(()),
            other => Err(unexpected(Command::CreatePomodoro, &other)),
        }
    }

    /// Removes the task together with its pomodoros.
    pub async fn delete_task(&self, task_id: TaskId) -> Result<(), IpcError> {
        match self.request(Request::DeleteTask(task_id)).await? {
            Response::DeleteTask => Ok(()),
            other => Err(unexpected(Command::DeleteTask, &other)),
        }
    }

    pub async fn get_task_list(&self) -> Result<Vec<Task>, IpcError> {
        match self.request(Request::GetTaskList).await? {
            Response::GetTaskList(tasks) => Ok(tasks),
            other => Err(unexpected(Command::GetTaskList, &other)),
        }
    }

    pub async fn get_server_status(&self) -> Result<Status, IpcError> {
        match self.request(Request::GetServerStatus).await? {
            Response::GetServerStatus(status) => Ok(status),
            other => Err(unexpected(Command::GetServerStatus, &other)),
        }
    }

    /// Fetches a task to run it. This is destructive: the server drops the
    /// task's pomodoro history before answering.
    pub async fn get_task(&self, task_id: TaskId) -> Result<Task, IpcError> {
        match self.request(Request::GetTask(task_id)).await? {
            Response::GetTask(task) => Ok(task),
            other => Err(unexpected(Command::GetTask, &other)),
        }
    }

    pub async fn update_status(&self, status: Status) -> Result<(), IpcError> {
        match self.request(Request::UpdateStatus(status)).await? {
            Response::UpdateStatus => Ok(()),
            other => Err(unexpected(Command::UpdateStatus, &other)),
        }
    }
}

// `Response::from_envelope` already checked the command, so this only fires
// if the two ever disagree.
fn unexpected(expected: Command, response: &Response) -> IpcError {
    IpcError::CommandMismatch {
        expected,
        got: response.command(),
    }
}
