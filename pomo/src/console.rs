//! Line-based console for a locally running session.
//!
//! Prints the status once per interval and reads commands from input:
//! an empty line ends a break, `p` pauses or resumes, `q` quits.

use std::future::Future;
use std::io::{self, BufRead};
use std::time::Duration;

use pomo_ipc::{State, Status};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::driver::Driver;
use crate::session::SessionError;

const HELP: &str = "enter: end break, p: pause/resume, q: quit";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("console I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Completed(Status),
    Quit(Status),
}

/// Feeds stdin lines from a dedicated thread. Reading stdin blocks, so it
/// stays off the runtime; the thread ends with stdin or the receiver.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
        debug!("stdin reader stopped");
    });
    rx
}

pub async fn run<W>(
    driver: Driver,
    mut input: mpsc::Receiver<String>,
    mut output: W,
    interval: Duration,
) -> Result<Exit, ConsoleError>
where
    W: AsyncWrite + Unpin,
{
    let mut input_open = true;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    write_line(&mut output, HELP).await?;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if driver.is_finished() {
                    break;
                }
                write_line(&mut output, &driver.status().to_string()).await?;
            }
            line = input.recv(), if input_open => {
                let Some(line) = line else {
                    input_open = false;
                    continue;
                };
                match line.trim() {
                    "" => match driver.status().state {
                        Some(State::Breaking) => {
                            hand_off(&mut output, driver.toggle(), interval).await?;
                        }
                        _ => write_line(&mut output, "no break to end").await?,
                    },
                    "p" => match driver.status().state {
                        Some(State::Running) | Some(State::Paused) => {
                            hand_off(&mut output, driver.pause(), interval).await?;
                        }
                        _ => write_line(&mut output, "nothing to pause").await?,
                    },
                    "q" => return Ok(Exit::Quit(driver.status())),
                    other => {
                        let help = format!("unknown command {other:?} ({HELP})");
                        write_line(&mut output, &help).await?;
                    }
                }
            }
        }
    }

    let status = driver.wait().await?;
    write_line(&mut output, &status.to_string()).await?;
    Ok(Exit::Completed(status))
}

/// Waits at most `patience` for the session to take a signal. The state can
/// move on between reading it and signalling; a signal nobody takes is
/// dropped instead of blocking the console.
async fn hand_off<W, F>(output: &mut W, signal: F, patience: Duration) -> Result<(), ConsoleError>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = Result<(), SessionError>>,
{
    match tokio::time::timeout(patience, signal).await {
        Ok(Ok(())) | Ok(Err(SessionError::Finished)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            write_line(output, "session did not take the command, try again").await?;
            Ok(())
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> io::Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
