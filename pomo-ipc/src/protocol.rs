//! Wire envelope and the typed requests/responses it carries.
//!
//! On the wire every message is `{"command": .., "payload": .., "error": ..}`
//! encoded as one line of JSON. [`Request`] and [`Response`] are the typed
//! views; converting to and from an [`Envelope`] matches exhaustively on the
//! command so adding one is a compile-checked change.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{PomodoroWithId, Status, Task, TaskId};
use crate::{IpcError, MAX_FRAME_BYTES};

/// The closed set of operations a server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    CreateTask,
    CreatePomodoro,
    DeleteTask,
    GetTaskList,
    GetServerStatus,
    GetTask,
    UpdateStatus,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::CreateTask,
        Command::CreatePomodoro,
        Command::DeleteTask,
        Command::GetTaskList,
        Command::GetServerStatus,
        Command::GetTask,
        Command::UpdateStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::CreateTask => "create-task",
            Command::CreatePomodoro => "create-pomodoro",
            Command::DeleteTask => "delete-task",
            Command::GetTaskList => "get-task-list",
            Command::GetServerStatus => "get-server-status",
            Command::GetTask => "get-task",
            Command::UpdateStatus => "update-status",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level record shared by requests and responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Domain failure reported by the server. Payload is null when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(command: Command, payload: Value) -> Self {
        Self {
            command,
            payload,
            error: None,
        }
    }

    pub fn error(command: Command, message: impl Into<String>) -> Self {
        Self {
            command,
            payload: Value::Null,
            error: Some(message.into()),
        }
    }

    /// One JSON line, newline included.
    pub fn encode(&self) -> Result<Vec<u8>, IpcError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(IpcError::FrameTooLarge);
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IpcError> {
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(IpcError::FrameTooLarge);
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(IpcError::EmptyResponse);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn payload<T: DeserializeOwned>(command: Command, value: Value) -> Result<T, IpcError> {
    serde_json::from_value(value).map_err(|source| IpcError::PayloadMismatch { command, source })
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, IpcError> {
    Ok(serde_json::to_value(value)?)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// The task must not carry an id yet.
    CreateTask(Task),
    CreatePomodoro(PomodoroWithId),
    DeleteTask(TaskId),
    GetTaskList,
    GetServerStatus,
    /// Clears the task's pomodoro history on the server, see `Server`.
    GetTask(TaskId),
    UpdateStatus(Status),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::CreateTask(_) => Command::CreateTask,
            Request::CreatePomodoro(_) => Command::CreatePomodoro,
            Request::DeleteTask(_) => Command::DeleteTask,
            Request::GetTaskList => Command::GetTaskList,
            Request::GetServerStatus => Command::GetServerStatus,
            Request::GetTask(_) => Command::GetTask,
            Request::UpdateStatus(_) => Command::UpdateStatus,
        }
    }

    pub fn into_envelope(self) -> Result<Envelope, IpcError> {
        let command = self.command();
        let payload = match &self {
            Request::CreateTask(task) => to_payload(task)?,
            Request::CreatePomodoro(pomodoro) => to_payload(pomodoro)?,
            Request::DeleteTask(id) | Request::GetTask(id) => to_payload(id)?,
            Request::GetTaskList | Request::GetServerStatus => Value::Null,
            Request::UpdateStatus(status) => to_payload(status)?,
        };
        Ok(Envelope::new(command, payload))
    }

    /// Interprets the payload as the shape `envelope.command` requires.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, IpcError> {
        let Envelope {
            command, payload: value, ..
        } = envelope;
        let request = match command {
            Command::CreateTask => Request::CreateTask(payload(command, value)?),
            Command::CreatePomodoro => Request::CreatePomodoro(payload(command, value)?),
            Command::DeleteTask => Request::DeleteTask(payload(command, value)?),
            Command::GetTaskList => {
                payload::<()>(command, value)?;
                Request::GetTaskList
            }
            Command::GetServerStatus => {
                payload::<()>(command, value)?;
                Request::GetServerStatus
            }
            Command::GetTask => Request::GetTask(payload(command, value)?),
            Command::UpdateStatus => Request::UpdateStatus(payload(command, value)?),
        };
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    CreateTask(TaskId),
    CreatePomodoro,
    DeleteTask,
    GetTaskList(Vec<Task>),
    GetServerStatus(Status),
    /// Always with an empty pomodoro list.
    GetTask(Task),
    UpdateStatus,
}

impl Response {
    pub fn command(&self) -> Command {
        match self {
            Response::CreateTask(_) => Command::CreateTask,
            Response::CreatePomodoro => Command::CreatePomodoro,
            Response::DeleteTask => Command::DeleteTask,
            Response::GetTaskList(_) => Command::GetTaskList,
            Response::GetServerStatus(_) => Command::GetServerStatus,
            Response::GetTask(_) => Command::GetTask,
            Response::UpdateStatus => Command::UpdateStatus,
        }
    }

    pub fn into_envelope(self) -> Result<Envelope, IpcError> {
        let command = self.command();
        let payload = match &self {
            Response::CreateTask(id) => to_payload(id)?,
            Response::CreatePomodoro | Response::DeleteTask | Response::UpdateStatus => Value::Null,
            Response::GetTaskList(tasks) => to_payload(tasks)?,
            Response::GetServerStatus(status) => to_payload(status)?,
            Response::GetTask(task) => to_payload(task)?,
        };
        Ok(Envelope::new(command, payload))
    }

    /// Validates a response to a request that was sent as `expected`.
    ///
    /// A different command identifier is a protocol violation and is
    /// reported before the error field is even looked at.
    pub fn from_envelope(envelope: Envelope, expected: Command) -> Result<Self, IpcError> {
        if envelope.command != expected {
            return Err(IpcError::CommandMismatch {
                expected,
                got: envelope.command,
            });
        }
        if let Some(message) = envelope.error {
            return Err(IpcError::Remote(message));
        }
        let command = envelope.command;
        let value = envelope.payload;
        let response = match command {
            Command::CreateTask => Response::CreateTask(payload(command, value)?),
            Command::CreatePomodoro => {
                payload::<()>(command, value)?;
                Response::CreatePomodoro
            }
            Command::DeleteTask => {
                payload::<()>(command, value)?;
                Response::DeleteTask
            }
            Command::GetTaskList => Response::GetTaskList(payload(command, value)?),
            Command::GetServerStatus => Response::GetServerStatus(payload(command, value)?),
            Command::GetTask => Response::GetTask(payload(command, value)?),
            Command::UpdateStatus => {
                payload::<()>(command, value)?;
                Response::UpdateStatus
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Pomodoro, State};
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    fn sample_task() -> Task {
        let start = Local.with_ymd_and_hms(2024, 5, 2, 14, 0, 0).unwrap();
        let mut task =
            Task::new("review PR", 2, Duration::from_secs(1500)).with_tags(["code", "code"]);
        task.id = Some(7);
        task.pomodoros.push(Pomodoro::new(start, start + chrono::Duration::minutes(25)));
        task
    }

    fn sample_status() -> Status {
        Status {
            state: Some(State::Paused),
            count: 1,
            n_pomodoros: 2,
            remaining: Duration::from_secs(42),
        }
    }

    fn wire(envelope: &Envelope) -> Envelope {
        Envelope::decode(&envelope.encode().unwrap()).unwrap()
    }

    #[test]
    fn command_identifiers_are_kebab_case() {
        for command in Command::ALL {
            let json = serde_json::to_string(&command).unwrap();
            assert_eq!(json, format!("\"{}\"", command.as_str()));
        }
    }

    #[test]
    fn requests_survive_the_wire() {
        let pomodoro = sample_task().pomodoros[0];
        let requests = vec![
            Request::CreateTask(Task::new("write", 4, Duration::from_secs(60))),
            Request::CreatePomodoro(PomodoroWithId {
                task_id: 7,
                pomodoro,
            }),
            Request::DeleteTask(7),
            Request::GetTaskList,
            Request::GetServerStatus,
            Request::GetTask(7),
            Request::UpdateStatus(sample_status()),
        ];
        for request in requests {
            let envelope = wire(&request.clone().into_envelope().unwrap());
            assert_eq!(Request::from_envelope(envelope).unwrap(), request);
        }
    }

    #[test]
    fn responses_survive_the_wire() {
        let responses = vec![
            Response::CreateTask(3),
            Response::CreatePomodoro,
            Response::DeleteTask,
            Response::GetTaskList(vec![sample_task()]),
            Response::GetServerStatus(sample_status()),
            Response::GetTask(sample_task()),
            Response::UpdateStatus,
        ];
        for response in responses {
            let command = response.command();
            let envelope = wire(&response.clone().into_envelope().unwrap());
            assert_eq!(Response::from_envelope(envelope, command).unwrap(), response);
        }
    }

    #[test]
    fn mismatched_command_is_a_protocol_error() {
        let envelope = Response::DeleteTask.into_envelope().unwrap();
        let err = Response::from_envelope(envelope, Command::CreateTask).unwrap_err();
        assert!(matches!(
            err,
            IpcError::CommandMismatch {
                expected: Command::CreateTask,
                got: Command::DeleteTask
            }
        ));
        assert!(err.is_protocol());
    }

    #[test]
    fn mismatch_wins_over_error_field() {
        let envelope = Envelope::error(Command::GetTask, "task 9 not found");
        let err = Response::from_envelope(envelope, Command::DeleteTask).unwrap_err();
        assert!(matches!(err, IpcError::CommandMismatch { .. }));
    }

    #[test]
    fn error_field_is_a_domain_error() {
        let envelope = wire(&Envelope::error(Command::GetTask, "task 9 not found"));
        let err = Response::from_envelope(envelope, Command::GetTask).unwrap_err();
        assert!(matches!(&err, IpcError::Remote(msg) if msg == "task 9 not found"));
        assert!(!err.is_protocol());
    }

    #[test]
    fn wrong_payload_shape_is_rejected() {
        let envelope = Envelope::new(Command::DeleteTask, serde_json::json!("seven"));
        let err = Request::from_envelope(envelope).unwrap_err();
        assert!(matches!(
            err,
            IpcError::PayloadMismatch {
                command: Command::DeleteTask,
                ..
            }
        ));

        let envelope = Envelope::new(Command::UpdateStatus, serde_json::json!("Status updated"));
        let err = Response::from_envelope(envelope, Command::UpdateStatus).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn decode_rejects_empty_and_oversized_frames() {
        assert!(matches!(Envelope::decode(b"  \n"), Err(IpcError::EmptyResponse)));
        let huge = vec![b' '; MAX_FRAME_BYTES + 1];
        assert!(matches!(Envelope::decode(&huge), Err(IpcError::FrameTooLarge)));
    }

    #[test]
    fn empty_payload_is_omitted_on_the_wire() {
        let bytes = Request::GetTaskList.into_envelope().unwrap().encode().unwrap();
        assert_eq!(bytes, b"{\"command\":\"get-task-list\"}\n");
    }
}
