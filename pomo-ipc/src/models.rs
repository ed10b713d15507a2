//! Domain values shared by the session daemon and its clients.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Identifier assigned by storage when a task is created.
pub type TaskId = i64;

/// Something to work on for `n_pomodoros` intervals of `duration` each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// `None` until storage has assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    pub message: String,
    /// Free-form, order preserving, duplicates allowed.
    #[serde(default)]
    pub tags: Vec<String>,
    pub n_pomodoros: u32,
    #[serde(rename = "duration_secs", with = "secs")]
    pub duration: Duration,
    /// Completed intervals, oldest first.
    #[serde(default)]
    pub pomodoros: Vec<Pomodoro>,
}

impl Task {
    /// Longest pomodoro storage and sessions accept.
    pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(message: impl Into<String>, n_pomodoros: u32, duration: Duration) -> Self {
        Self {
            id: None,
            message: message.into(),
            tags: Vec::new(),
            n_pomodoros,
            duration,
            pomodoros: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A single completed work interval. Never mutated once stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pomodoro {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl Pomodoro {
    pub fn new(start: DateTime<Local>, end: DateTime<Local>) -> Self {
        Self { start, end }
    }

    /// Derived from the timestamps, never stored.
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Payload of `create-pomodoro`: which task the interval belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PomodoroWithId {
    pub task_id: TaskId,
    pub pomodoro: Pomodoro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Running,
    Breaking,
    Paused,
    Complete,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Running => "RUNNING",
            State::Breaking => "BREAKING",
            State::Paused => "PAUSED",
            State::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a session. Only ever produced and transmitted.
///
/// The default value (no state, all zeros) is what the server reports
/// before any session has pushed an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: Option<State>,
    pub count: u32,
    pub n_pomodoros: u32,
    /// Whole seconds left in the current interval.
    #[serde(rename = "remaining_secs", with = "secs")]
    pub remaining: Duration,
}

impl fmt::Display for Status {
    /// Compact one-liner, e.g. `R [1/4] 24:13`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let initial = self
            .state
            .map(|s| s.to_string().chars().next().unwrap_or('?'))
            .unwrap_or('?');
        write!(f, "{} [{}/{}]", initial, self.count, self.n_pomodoros)?;
        match self.state {
            Some(State::Running) | Some(State::Paused) => {
                let secs = self.remaining.as_secs();
                write!(f, " {:02}:{:02}", secs / 60, secs % 60)
            }
            _ => f.write_str(" -"),
        }
    }
}

/// `Duration` as a whole number of seconds on the wire.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
