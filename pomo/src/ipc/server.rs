//! Unix domain socket server for IPC

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use pomo_ipc::{
    Command, Envelope, IpcError, PomodoroWithId, Request, Response, Status, Task, TaskId,
    MAX_FRAME_BYTES,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::ServerError;
use crate::driver::StatusReporter;
use crate::session::BoxError;
use crate::store::{Store, StoreError};

/// How long stop waits for requests already being dispatched.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The last status pushed through `update-status`. Last write wins.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    current: Arc<RwLock<Status>>,
}

impl StatusBoard {
    pub fn get(&self) -> Status {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, status: Status) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

/// Lets a session running inside the server process publish directly.
#[async_trait]
impl StatusReporter for StatusBoard {
    async fn report(&self, status: Status) -> Result<(), BoxError> {
        self.set(status);
        Ok(())
    }
}

/// Asks a running [`Server`] to stop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    shared: Arc<Shared>,
    shutdown: Arc<watch::Sender<bool>>,
}

struct Shared {
    store: Arc<dyn Store>,
    board: StatusBoard,
}

impl Server {
    /// Binds `socket_path`, replacing a stale socket left by a crashed
    /// server. Fails with [`ServerError::AddrInUse`] if a live server
    /// still answers on it.
    pub async fn bind(
        socket_path: impl Into<PathBuf>,
        store: Arc<dyn Store>,
    ) -> Result<Self, ServerError> {
        let socket_path = socket_path.into();
        let listener = bind_listener(&socket_path).await?;
        info!("IPC server listening on {}", socket_path.display());

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            socket_path,
            shared: Arc::new(Shared {
                store,
                board: StatusBoard::default(),
            }),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Binds, then starts `id` afresh the way `get-task` does. History is
    /// only wiped once the socket is ours, so a refused bind leaves the
    /// store untouched.
    pub async fn bind_for_task(
        socket_path: impl Into<PathBuf>,
        store: Arc<dyn Store>,
        id: TaskId,
    ) -> Result<(Self, Task), ServerError> {
        let server = Self::bind(socket_path, store).await?;
        match server.shared.start_fresh(id) {
            Ok(task) => Ok((server, task)),
            Err(e) => {
                if let Err(rm) = remove_socket_if_exists(&server.socket_path) {
                    warn!("could not remove {}: {}", server.socket_path.display(), rm);
                }
                Err(e.into())
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn status_board(&self) -> StatusBoard {
        self.shared.board.clone()
    }

    /// Serves until [`ServerHandle::stop`]. Then closes the listener,
    /// waits for in-flight requests, removes the socket file and closes
    /// the store.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            socket_path,
            shared,
            shutdown,
        } = self;
        let mut stop = shutdown.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let shared = Arc::clone(&shared);
                        let stop = shutdown.subscribe();
                        connections.spawn(async move {
                            if let Err(e) = handle_client(stream, &shared, stop).await {
                                error!("Error handling client: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("connection task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    error!("connection task failed: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "aborting {} connections still open after {:?}",
                connections.len(),
                SHUTDOWN_GRACE
            );
            connections.shutdown().await;
        }
        remove_socket_if_exists(&socket_path).map_err(|source| ServerError::Io {
            op: "remove socket",
            path: socket_path.clone(),
            source,
        })?;
        shared.store.close()?;
        info!("IPC server stopped");
        Ok(())
    }
}

async fn bind_listener(socket_path: &Path) -> Result<UnixListener, ServerError> {
    let io_err = |op: &'static str, source: io::Error| ServerError::Io {
        op,
        path: socket_path.to_path_buf(),
        source,
    };
    match UnixListener::bind(socket_path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            let is_socket = std::fs::symlink_metadata(socket_path)
                .map(|meta| meta.file_type().is_socket())
                .map_err(|e| io_err("inspect", e))?;
            if !is_socket {
                return Err(ServerError::NotASocket(socket_path.to_path_buf()));
            }
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ServerError::AddrInUse(socket_path.to_path_buf()));
            }
            warn!("removing stale socket {}", socket_path.display());
            remove_socket_if_exists(socket_path).map_err(|e| io_err("remove stale socket", e))?;
            UnixListener::bind(socket_path).map_err(|e| io_err("bind", e))
        }
        Err(e) => Err(io_err("bind", e)),
    }
}

fn remove_socket_if_exists(socket_path: &Path) -> io::Result<()> {
    match std::fs::remove_file(socket_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn handle_client(
    stream: UnixStream,
    shared: &Shared,
    mut stop: watch::Receiver<bool>,
) -> Result<(), IpcError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).take(MAX_FRAME_BYTES as u64 + 1);
    let mut line = Vec::new();
    // a client that never finishes its request must not hold up stop
    tokio::select! {
        read = reader.read_until(b'\n', &mut line) => { read?; }
        _ = stop.wait_for(|stopped| *stopped) => {
            debug!("dropping unfinished request on shutdown");
            return Ok(());
        }
    }

    let envelope = match Envelope::decode(&line) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("dropping unreadable request: {}", e);
            return Ok(());
        }
    };

    let command = envelope.command;
    debug!(%command, "handling request");
    let reply = match Request::from_envelope(envelope) {
        Ok(request) => match shared.dispatch(request) {
            Ok(response) => response.into_envelope()?,
            Err(message) => {
                warn!(%command, "request failed: {}", message);
                Envelope::error(command, message)
            }
        },
        Err(e) => {
            warn!(%command, "malformed request: {}", e);
            Envelope::error(command, e.to_string())
        }
    };

    let frame = match reply.encode() {
        Ok(frame) => frame,
        Err(e) => Envelope::error(command, e.to_string()).encode()?,
    };
    writer.write_all(&frame).await?;
    writer.shutdown().await?;
    Ok(())
}

fn failed(command: Command) -> impl FnOnce(StoreError) -> String {
    move |e| format!("{command} failed: {e}")
}

impl Shared {
    fn dispatch(&self, request: Request) -> Result<Response, String> {
        let command = request.command();
        match request {
            Request::CreateTask(task) => self
                .store
                .save_task(&task)
                .map(Response::CreateTask)
                .map_err(failed(command)),
            Request::CreatePomodoro(PomodoroWithId { task_id, pomodoro }) => self
                .store
                .save_pomodoro(task_id, &pomodoro)
                .map(|()| Response::CreatePomodoro)
                .map_err(failed(command)),
            Request::DeleteTask(id) => self
                .store
                .delete_task(id)
                .map(|()| Response::DeleteTask)
                .map_err(failed(command)),
            Request::GetTaskList => self
                .store
                .list_tasks()
                .map(Response::GetTaskList)
                .map_err(failed(command)),
            Request::GetServerStatus => Ok(Response::GetServerStatus(self.board.get())),
            Request::GetTask(id) => self
                .start_fresh(id)
                .map(Response::GetTask)
                .map_err(failed(command)),
            Request::UpdateStatus(status) => {
                self.board.set(status);
                Ok(Response::UpdateStatus)
            }
        }
    }

    /// Backs `get-task`: fetching a task for a new run wipes its recorded
    /// pomodoros, so the returned task always has an empty history.
    fn start_fresh(&self, id: TaskId) -> Result<Task, StoreError> {
        let mut task = self.store.get_task(id)?;
        self.store.delete_pomodoros(id)?;
        task.pomodoros.clear();
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pomo_ipc::{IpcClient, State};

    type Running = tokio::task::JoinHandle<Result<(), ServerError>>;

    async fn serve(dir: &tempfile::TempDir) -> (IpcClient, ServerHandle, Running) {
        let path = dir.path().join("pomo.sock");
        let server = Server::bind(&path, Arc::new(MemoryStore::new())).await.unwrap();
        let handle = server.handle();
        let join = tokio::spawn(server.run());
        (IpcClient::new(path), handle, join)
    }

    #[tokio::test]
    async fn status_defaults_to_zero_value_then_tracks_updates() {
        let dir = tempfile::tempdir().unwrap();
        let (client, handle, join) = serve(&dir).await;

        assert_eq!(client.get_server_status().await.unwrap(), Status::default());

        let pushed = Status {
            state: Some(State::Running),
            count: 1,
            n_pomodoros: 4,
            remaining: Duration::from_secs(90),
        };
        client.update_status(pushed).await.unwrap();
        assert_eq!(client.get_server_status().await.unwrap(), pushed);

        handle.stop();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn domain_errors_come_back_in_the_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let (client, handle, join) = serve(&dir).await;

        let err = client.delete_task(7).await.unwrap_err();
        assert!(matches!(err, IpcError::Remote(_)));
        assert!(err.to_string().contains("task 7 not found"));

        // the server is still serving after a failed request
        assert!(client.get_task_list().await.unwrap().is_empty());

        handle.stop();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn mismatched_payload_gets_an_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let (client, handle, join) = serve(&dir).await;

        let mut stream = UnixStream::connect(client.socket_path()).await.unwrap();
        stream
            .write_all(b"{\"command\":\"delete-task\",\"payload\":\"seven\"}\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let reply = Envelope::decode(&buf).unwrap();
        assert_eq!(reply.command, Command::DeleteTask);
        assert!(reply.error.is_some());

        handle.stop();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn garbage_is_dropped_without_a_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (client, handle, join) = serve(&dir).await;

        let mut stream = UnixStream::connect(client.socket_path()).await.unwrap();
        stream.write_all(b"{\"command\":\"reboot\"}\n").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        handle.stop();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_removes_the_socket_and_closes_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomo.sock");
        let store = Arc::new(MemoryStore::new());
        let server = Server::bind(&path, store.clone()).await.unwrap();
        let handle = server.handle();
        let join = tokio::spawn(server.run());

        handle.stop();
        handle.stop();
        join.await.unwrap().unwrap();

        assert!(!path.exists());
        assert!(matches!(store.list_tasks(), Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn idle_client_does_not_hold_up_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomo.sock");
        let store = Arc::new(MemoryStore::new());
        let server = Server::bind(&path, store.clone()).await.unwrap();
        let handle = server.handle();
        let join = tokio::spawn(server.run());

        // connected, half a request, then silence
        let mut idle = UnixStream::connect(&path).await.unwrap();
        idle.write_all(b"{\"command\":").await.unwrap();
        IpcClient::new(&path).get_server_status().await.unwrap();

        handle.stop();
        tokio::time::timeout(Duration::from_secs(3), join)
            .await
            .expect("stop should not wait on an idle client")
            .unwrap()
            .unwrap();
        assert!(!path.exists());
        assert!(matches!(store.list_tasks(), Err(StoreError::Closed)));

        let mut buf = Vec::new();
        idle.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn regular_file_in_the_way_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomo.sock");
        std::fs::write(&path, "not a socket").unwrap();

        let err = Server::bind(&path, Arc::new(MemoryStore::new()))
            .await
            .err()
            .expect("bind over a regular file should fail");
        assert!(matches!(err, ServerError::NotASocket(_)));
        assert!(err.to_string().contains("is not a socket"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not a socket");
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomo.sock");
        // a listener that went away without cleaning up
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let server = Server::bind(&path, Arc::new(MemoryStore::new())).await.unwrap();
        let handle = server.handle();
        let join = tokio::spawn(server.run());
        IpcClient::new(&path).get_server_status().await.unwrap();

        handle.stop();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn status_board_is_a_reporter() {
        let board = StatusBoard::default();
        let status = Status {
            state: Some(State::Breaking),
            count: 2,
            n_pomodoros: 3,
            remaining: Duration::ZERO,
        };
        board.report(status).await.unwrap();
        assert_eq!(board.get(), status);
    }
}
