//! The pomodoro/break state machine for a single task.
//!
//! A [`Session`] runs on its own tokio task once started. Callers steer it
//! through the [`SessionHandle`]: `toggle` ends a break, `pause` suspends or
//! resumes the running interval, `status` reads a snapshot at any time.
//!
//! Signals are rendezvous hand-offs. Each kind has a queue of one slot and
//! carries an acknowledgement, so a caller returns only once the loop has
//! consumed its signal and applied the resulting transition.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use pomo_ipc::{Pomodoro, State, Status, Task, TaskId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::notify::{self, Notifier};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to persist pomodoro for task {task_id}: {source}")]
    Persist {
        task_id: TaskId,
        #[source]
        source: BoxError,
    },

    #[error("session has already finished")]
    Finished,

    #[error("session was abandoned while waiting for a signal")]
    Detached,

    #[error("cannot run task: {0}")]
    InvalidTask(String),

    #[error("session task failed: {0}")]
    Join(String),
}

/// Where completed intervals go. Failures stop the session.
#[async_trait]
pub trait PomodoroSink: Send + Sync {
    async fn save_pomodoro(&self, task_id: TaskId, pomodoro: Pomodoro) -> Result<(), BoxError>;
}

pub const BREAK_TITLE: &str = "Pomo";
pub const BREAK_BODY: &str = "It is time to take a break!";
pub const COMPLETE_BODY: &str = "Pomo session has completed!";

/// Drops sub-second precision.
pub fn truncate_to_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

type Ack = oneshot::Sender<()>;

#[derive(Debug)]
struct Progress {
    state: Option<State>,
    count: u32,
    target: u32,
    /// Countdown length measured from `started_at`.
    remaining: Duration,
    started_at: Instant,
}

impl Progress {
    fn set_state(&mut self, state: State) {
        debug!(from = ?self.state, to = %state, count = self.count, "session state change");
        self.state = Some(state);
    }

    fn status(&self, now: Instant) -> Status {
        let remaining = match self.state {
            Some(State::Running) => truncate_to_secs(
                self.remaining
                    .saturating_sub(now.saturating_duration_since(self.started_at)),
            ),
            Some(State::Paused) => self.remaining,
            _ => Duration::ZERO,
        };
        Status {
            state: self.state,
            count: self.count,
            n_pomodoros: self.target,
            remaining,
        }
    }

    /// Starts an interval of `length` at `now` and returns its deadline.
    fn run(&mut self, now: Instant, length: Duration) -> Instant {
        self.started_at = now;
        self.remaining = length;
        self.set_state(State::Running);
        now + length
    }

    /// Freezes the countdown, keeping whole seconds only.
    fn pause(&mut self, now: Instant) -> Duration {
        let left = self
            .remaining
            .saturating_sub(now.saturating_duration_since(self.started_at));
        self.remaining = truncate_to_secs(left);
        self.set_state(State::Paused);
        self.remaining
    }
}

/// Read-only view of a session's progress, cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusView {
    progress: Arc<Mutex<Progress>>,
}

impl StatusView {
    /// Never blocks on the loop and never changes it.
    pub fn status(&self) -> Status {
        lock(&self.progress).status(Instant::now())
    }
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One run of a task, from its first interval to `COMPLETE`.
pub struct Session {
    task_id: TaskId,
    duration: Duration,
    target: u32,
    sink: Arc<dyn PomodoroSink>,
    notifier: Arc<dyn Notifier>,
    progress: Arc<Mutex<Progress>>,
}

impl Session {
    /// Copies what the loop needs out of `task`.
    pub fn new(
        task: &Task,
        sink: Arc<dyn PomodoroSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, SessionError> {
        let task_id = task
            .id
            .ok_or_else(|| SessionError::InvalidTask("task has not been stored yet".into()))?;
        if task.n_pomodoros == 0 {
            return Err(SessionError::InvalidTask(format!(
                "task {task_id} has no pomodoros to run"
            )));
        }
        if task.duration.is_zero() {
            return Err(SessionError::InvalidTask(format!(
                "task {task_id} has a zero pomodoro duration"
            )));
        }
        if task.duration > Task::MAX_DURATION {
            return Err(SessionError::InvalidTask(format!(
                "task {task_id} has a pomodoro longer than {}s",
                Task::MAX_DURATION.as_secs()
            )));
        }
        let progress = Progress {
            state: None,
            count: 0,
            target: task.n_pomodoros,
            remaining: task.duration,
            started_at: Instant::now(),
        };
        Ok(Self {
            task_id,
            duration: task.duration,
            target: task.n_pomodoros,
            sink,
            notifier,
            progress: Arc::new(Mutex::new(progress)),
        })
    }

    /// Spawns the loop and returns immediately. Consuming `self` makes a
    /// second start impossible.
    pub fn start(self) -> SessionHandle {
        let (toggle_tx, toggle_rx) = mpsc::channel(1);
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let view = StatusView {
            progress: Arc::clone(&self.progress),
        };
        info!(
            task_id = self.task_id,
            target = self.target,
            duration = ?self.duration,
            "starting session"
        );
        let task = tokio::spawn(self.run(toggle_rx, pause_rx));
        SessionHandle {
            toggles: toggle_tx,
            pauses: pause_tx,
            view,
            task,
        }
    }

    async fn run(
        self,
        mut toggles: mpsc::Receiver<Ack>,
        mut pauses: mpsc::Receiver<Ack>,
    ) -> Result<Status, SessionError> {
        // The toggle that ended the previous break is acknowledged once the
        // next interval is under way.
        let mut break_ended: Option<Ack> = None;

        loop {
            let started = Local::now();
            let mut deadline = lock(&self.progress).run(Instant::now(), self.duration);
            if let Some(ack) = break_ended.take() {
                let _ = ack.send(());
            }

            loop {
                tokio::select! {
                    () = sleep_until(deadline) => break,
                    Some(ack) = next_live(&mut toggles) => {
                        debug!(task_id = self.task_id, "toggle ignored while running");
                        let _ = ack.send(());
                    }
                    Some(ack) = next_live(&mut pauses) => {
                        let left = lock(&self.progress).pause(Instant::now());
                        info!(task_id = self.task_id, remaining = ?left, "session paused");
                        let _ = ack.send(());

                        let ack = next_live(&mut pauses).await.ok_or(SessionError::Detached)?;
                        deadline = lock(&self.progress).run(Instant::now(), left);
                        info!(task_id = self.task_id, "session resumed");
                        let _ = ack.send(());
                    }
                }
            }

            let pomodoro = Pomodoro::new(started, Local::now());
            let count = {
                let mut progress = lock(&self.progress);
                progress.set_state(State::Breaking);
                progress.count += 1;
                progress.count
            };
            self.sink
                .save_pomodoro(self.task_id, pomodoro)
                .await
                .map_err(|source| SessionError::Persist {
                    task_id: self.task_id,
                    source,
                })?;
            info!(task_id = self.task_id, count, target = self.target, "pomodoro completed");

            if count >= self.target {
                break;
            }

            notify::send(self.notifier.as_ref(), BREAK_TITLE, BREAK_BODY);
            break_ended = Some(next_live(&mut toggles).await.ok_or(SessionError::Detached)?);
        }

        let status = {
            let mut progress = lock(&self.progress);
            progress.set_state(State::Complete);
            progress.status(Instant::now())
        };
        notify::send(self.notifier.as_ref(), BREAK_TITLE, COMPLETE_BODY);
        info!(task_id = self.task_id, "session complete");
        Ok(status)
    }
}

/// Next signal whose sender is still waiting. A caller that gave up on its
/// hand-off leaves a closed ack behind, which must not trigger anything.
async fn next_live(signals: &mut mpsc::Receiver<Ack>) -> Option<Ack> {
    while let Some(ack) = signals.recv().await {
        if !ack.is_closed() {
            return Some(ack);
        }
        debug!("dropping abandoned signal");
    }
    None
}

/// Steers a started [`Session`].
pub struct SessionHandle {
    toggles: mpsc::Sender<Ack>,
    pauses: mpsc::Sender<Ack>,
    view: StatusView,
    task: JoinHandle<Result<Status, SessionError>>,
}

impl SessionHandle {
    /// Ends the current break. Swallowed while an interval is running.
    pub async fn toggle(&self) -> Result<(), SessionError> {
        signal(&self.toggles).await
    }

    /// First call pauses the running interval, the next one resumes it.
    pub async fn pause(&self) -> Result<(), SessionError> {
        signal(&self.pauses).await
    }

    pub fn status(&self) -> Status {
        self.view.status()
    }

    pub fn view(&self) -> StatusView {
        self.view.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the loop to end and returns its final status.
    pub async fn wait(self) -> Result<Status, SessionError> {
        self.task
            .await
            .map_err(|e| SessionError::Join(e.to_string()))?
    }
}

async fn signal(tx: &mpsc::Sender<Ack>) -> Result<(), SessionError> {
    let (ack, consumed) = oneshot::channel();
    tx.send(ack).await.map_err(|_| SessionError::Finished)?;
    consumed.await.map_err(|_| SessionError::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<(TaskId, Pomodoro)>>,
    }

    impl RecordingSink {
        fn len(&self) -> usize {
            self.saved.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PomodoroSink for RecordingSink {
        async fn save_pomodoro(&self, task_id: TaskId, pomodoro: Pomodoro) -> Result<(), BoxError> {
            self.saved.lock().unwrap().push((task_id, pomodoro));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl PomodoroSink for FailingSink {
        async fn save_pomodoro(&self, _: TaskId, _: Pomodoro) -> Result<(), BoxError> {
            Err("disk full".into())
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        sent: AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, _: &str, _: &str) -> Result<(), notify::NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn task(n: u32, secs: u64) -> Task {
        let mut task = Task::new("test task", n, Duration::from_secs(secs));
        task.id = Some(1);
        task
    }

    fn start(task: &Task, sink: Arc<dyn PomodoroSink>) -> SessionHandle {
        Session::new(task, sink, Arc::new(NoopNotifier)).unwrap().start()
    }

    #[tokio::test(start_paused = true)]
    async fn two_pomodoro_scenario() {
        let sink = Arc::new(RecordingSink::default());
        let handle = start(&task(2, 2), sink.clone());

        sleep(Duration::from_millis(2100)).await;
        let status = handle.status();
        assert_eq!(status.state, Some(State::Breaking));
        assert_eq!(status.count, 1);
        assert_eq!(sink.len(), 1);

        handle.toggle().await.unwrap();
        let status = handle.status();
        assert_eq!(status.state, Some(State::Running));
        assert_eq!(status.count, 1);

        sleep(Duration::from_millis(2100)).await;
        let status = handle.status();
        assert_eq!(status.state, Some(State::Complete));
        assert_eq!(status.count, 2);
        assert_eq!(sink.len(), 2);

        let last = handle.wait().await.unwrap();
        assert_eq!(last.count, 2);
        assert!(sink.saved.lock().unwrap().iter().all(|(id, _)| *id == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_to_completion_for_any_target() {
        for n in 1..=4 {
            let sink = Arc::new(RecordingSink::default());
            let handle = start(&task(n, 1), sink.clone());
            for _ in 1..n {
                sleep(Duration::from_millis(1100)).await;
                assert_eq!(handle.status().state, Some(State::Breaking));
                handle.toggle().await.unwrap();
            }
            let status = handle.wait().await.unwrap();
            assert_eq!(status.state, Some(State::Complete));
            assert_eq!(status.count, n);
            assert_eq!(sink.len(), n as usize);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_is_idempotent_without_events() {
        let handle = start(&task(1, 60), Arc::new(RecordingSink::default()));
        sleep(Duration::from_millis(1500)).await;
        let first = handle.status();
        let second = handle.status();
        assert_eq!(first, second);
        assert_eq!(first.remaining, Duration::from_secs(58));

        sleep(Duration::from_secs(10)).await;
        let later = handle.status();
        assert!(later.remaining < first.remaining);
        assert_eq!(later.count, first.count);
        assert_eq!(later.state, first.state);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_round_trip_keeps_remaining() {
        let sink = Arc::new(RecordingSink::default());
        let handle = start(&task(1, 2), sink.clone());

        sleep(Duration::from_millis(500)).await;
        let before = handle.status();
        assert_eq!(before.remaining, Duration::from_secs(1));

        handle.pause().await.unwrap();
        let paused = handle.status();
        assert_eq!(paused.state, Some(State::Paused));
        assert_eq!(paused.remaining, before.remaining);

        // time spent paused does not count
        sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.status(), paused);
        assert_eq!(sink.len(), 0);

        handle.pause().await.unwrap();
        let resumed = handle.status();
        assert_eq!(resumed.state, Some(State::Running));
        assert_eq!(resumed.remaining, before.remaining);

        sleep(Duration::from_millis(1100)).await;
        assert_eq!(handle.status().state, Some(State::Complete));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_while_running_changes_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let handle = start(&task(2, 5), sink.clone());

        sleep(Duration::from_millis(1200)).await;
        let before = handle.status();
        handle.toggle().await.unwrap();
        handle.toggle().await.unwrap();
        let after = handle.status();

        assert_eq!(after, before);
        assert_eq!(after.state, Some(State::Running));
        assert_eq!(after.count, 0);
        assert_eq!(sink.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_stops_the_loop() {
        let handle = start(&task(3, 1), Arc::new(FailingSink));
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, SessionError::Persist { task_id: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn signals_after_completion_report_finished() {
        let handle = start(&task(1, 1), Arc::new(RecordingSink::default()));
        sleep(Duration::from_millis(1100)).await;
        assert!(matches!(handle.toggle().await, Err(SessionError::Finished)));
        assert!(matches!(handle.pause().await, Err(SessionError::Finished)));
        assert_eq!(handle.status().state, Some(State::Complete));
    }

    #[tokio::test(start_paused = true)]
    async fn notifies_each_break_and_the_end() {
        let notifier = Arc::new(CountingNotifier::default());
        let handle = Session::new(&task(3, 1), Arc::new(RecordingSink::default()), notifier.clone())
            .unwrap()
            .start();
        for _ in 0..2 {
            sleep(Duration::from_millis(1100)).await;
            handle.toggle().await.unwrap();
        }
        handle.wait().await.unwrap();
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rejects_unrunnable_tasks() {
        let sink: Arc<dyn PomodoroSink> = Arc::new(RecordingSink::default());
        let unsaved = Task::new("x", 1, Duration::from_secs(1));
        assert!(matches!(
            Session::new(&unsaved, sink.clone(), Arc::new(NoopNotifier)),
            Err(SessionError::InvalidTask(_))
        ));
        assert!(matches!(
            Session::new(&task(0, 1), sink.clone(), Arc::new(NoopNotifier)),
            Err(SessionError::InvalidTask(_))
        ));
        assert!(matches!(
            Session::new(&task(1, 0), sink.clone(), Arc::new(NoopNotifier)),
            Err(SessionError::InvalidTask(_))
        ));
        let endless = task(1, Task::MAX_DURATION.as_secs() + 1);
        assert!(matches!(
            Session::new(&endless, sink, Arc::new(NoopNotifier)),
            Err(SessionError::InvalidTask(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_toggle_does_not_end_a_later_break() {
        let sink = Arc::new(RecordingSink::default());
        let handle = start(&task(2, 2), sink.clone());

        sleep(Duration::from_millis(500)).await;
        handle.pause().await.unwrap();
        // nobody consumes a toggle while paused
        let gave_up = tokio::time::timeout(Duration::from_secs(1), handle.toggle()).await;
        assert!(gave_up.is_err());
        handle.pause().await.unwrap();

        sleep(Duration::from_secs(10)).await;
        let status = handle.status();
        assert_eq!(status.state, Some(State::Breaking));
        assert_eq!(status.count, 1);

        handle.toggle().await.unwrap();
        assert_eq!(handle.status().state, Some(State::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_pause_is_not_applied_later() {
        let handle = start(&task(2, 1), Arc::new(RecordingSink::default()));

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.status().state, Some(State::Breaking));
        // pauses are only taken while running
        let gave_up = tokio::time::timeout(Duration::from_millis(100), handle.pause()).await;
        assert!(gave_up.is_err());

        handle.toggle().await.unwrap();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.status().state, Some(State::Running));
        let status = handle.wait().await.unwrap();
        assert_eq!(status.count, 2);
    }
}
