//! Pomodoro sessions: the state machine, its driver, storage and the
//! session server that `pomoctl` talks to.

pub mod config;
pub mod console;
pub mod driver;
pub mod ipc;
pub mod notify;
pub mod session;
pub mod store;

pub use driver::{Driver, StatusReporter, StoreSink};
pub use ipc::{Server, ServerError, ServerHandle, StatusBoard};
pub use session::{PomodoroSink, Session, SessionError, SessionHandle};
pub use store::{open_store, Store, StoreError};

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
///
/// Output goes to stderr so stdout stays free for command output.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "pomo={level},pomo_ipc={level},pomoctl={level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
