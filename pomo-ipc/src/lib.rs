//! Inter-process communication between pomo and pomoctl
//!
//! We use Unix domain sockets for local IPC. Every request opens its own
//! connection, carries exactly one [`Envelope`] each way and is closed by
//! the server once the response is written.

pub mod client;
pub mod models;
pub mod protocol;

use std::path::PathBuf;

use thiserror::Error;

pub use client::IpcClient;
pub use models::{Pomodoro, PomodoroWithId, State, Status, Task, TaskId};
pub use protocol::{Command, Envelope, Request, Response};

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("could not reach session server at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol violation: sent {expected} but the server answered {got}")]
    CommandMismatch { expected: Command, got: Command },

    #[error("protocol violation: payload is not valid for {command}: {source}")]
    PayloadMismatch {
        command: Command,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Remote(String),

    #[error("server closed the connection without a response")]
    EmptyResponse,

    #[error("message exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,
}

impl IpcError {
    /// Version skew or corruption between client and server. Never retried.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            IpcError::CommandMismatch { .. }
                | IpcError::PayloadMismatch { .. }
                | IpcError::Serialization(_)
                | IpcError::EmptyResponse
                | IpcError::FrameTooLarge
        )
    }

    /// The server could not be dialed at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, IpcError::Connect { .. })
    }
}

/// Fallback endpoint when no configuration supplies one.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/pomo.sock";

/// Upper bound for a single encoded envelope, newline included.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
