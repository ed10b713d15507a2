//! Session driver: owns a running [`Session`], decides where its pomodoros
//! are persisted and, optionally, pushes its status somewhere else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pomo_ipc::{IpcClient, Pomodoro, State, Status, Task, TaskId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::notify::Notifier;
use crate::session::{BoxError, PomodoroSink, Session, SessionError, SessionHandle, StatusView};
use crate::store::Store;

/// Receives status snapshots from a running session. Best effort only.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, status: Status) -> Result<(), BoxError>;
}

/// Persists straight into a local store.
pub struct StoreSink {
    store: Arc<dyn Store>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PomodoroSink for StoreSink {
    async fn save_pomodoro(&self, task_id: TaskId, pomodoro: Pomodoro) -> Result<(), BoxError> {
        self.store
            .save_pomodoro(task_id, &pomodoro)
            .map_err(Into::into)
    }
}

/// Persists through the session server (`create-pomodoro`).
#[async_trait]
impl PomodoroSink for IpcClient {
    async fn save_pomodoro(&self, task_id: TaskId, pomodoro: Pomodoro) -> Result<(), BoxError> {
        self.create_pomodoro(task_id, pomodoro)
            .await
            .map_err(Into::into)
    }
}

/// Publishes to the session server (`update-status`).
#[async_trait]
impl StatusReporter for IpcClient {
    async fn report(&self, status: Status) -> Result<(), BoxError> {
        self.update_status(status).await.map_err(Into::into)
    }
}

pub struct Driver {
    session: SessionHandle,
    reporter: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl Driver {
    /// Starts a session for `task`. With a `reporter`, its status is pushed
    /// every `interval` and once more when the session ends.
    pub fn spawn(
        task: &Task,
        sink: Arc<dyn PomodoroSink>,
        notifier: Arc<dyn Notifier>,
        reporter: Option<Arc<dyn StatusReporter>>,
        interval: Duration,
    ) -> Result<Self, SessionError> {
        let session = Session::new(task, sink, notifier)?.start();
        let reporter = reporter.map(|reporter| {
            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(report_status(session.view(), reporter, interval, stop_rx));
            (stop_tx, handle)
        });
        Ok(Self { session, reporter })
    }

    pub async fn toggle(&self) -> Result<(), SessionError> {
        self.session.toggle().await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.session.pause().await
    }

    pub fn status(&self) -> Status {
        self.session.status()
    }

    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    /// Waits for the session, then lets the reporter push its last status.
    pub async fn wait(self) -> Result<Status, SessionError> {
        let result = self.session.wait().await;
        if let Some((stop, handle)) = self.reporter {
            let _ = stop.send(true);
            if let Err(e) = handle.await {
                warn!("status reporter task failed: {}", e);
            }
        }
        result
    }
}

async fn report_status(
    view: StatusView,
    reporter: Arc<dyn StatusReporter>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = view.status();
                push(reporter.as_ref(), status).await;
                if status.state == Some(State::Complete) {
                    break;
                }
            }
            // stop requested, or the driver was dropped
            _ = stop.changed() => {
                push(reporter.as_ref(), view.status()).await;
                break;
            }
        }
    }
    debug!("status reporter stopped");
}

async fn push(reporter: &dyn StatusReporter, status: Status) {
    if let Err(e) = reporter.report(status).await {
        warn!("Failed to report session status: {}", e);
    }
}
