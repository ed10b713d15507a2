//! Session server side of the IPC protocol. The client and the wire types
//! live in `pomo-ipc`.

mod server;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

pub use server::{Server, ServerHandle, StatusBoard};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket {} is already in use by a running server", .0.display())]
    AddrInUse(PathBuf),

    #[error("{} exists and is not a socket", .0.display())]
    NotASocket(PathBuf),

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
}
