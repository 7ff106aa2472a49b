//! Unix-socket command listener.
//!
//! The socket is bound synchronously so a bind failure surfaces as a setup
//! error. Accepting runs on a dedicated thread with a current-thread tokio
//! runtime; each connection reads one request line and receives one JSON
//! response document. Stopping cancels the accept loop through a
//! [`CancellationToken`].

use std::fs;
use std::io;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::EngineHandle;
use crate::runtime::api::{execute, Command, CommandResponse};

/// Longest request line accepted.
const MAX_REQUEST: u64 = 4096;

/// A running command listener.
#[derive(Debug)]
pub struct CommandServer {
    path: PathBuf,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

fn prepare_listener(path: &Path) -> io::Result<StdUnixListener> {
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    let listener = StdUnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

impl CommandServer {
    /// Bind `path` and start serving commands against `handle`.
    ///
    /// # Errors
    ///
    /// The socket cannot be bound, or the listener thread cannot start.
    pub fn start(path: &Path, handle: EngineHandle) -> io::Result<Self> {
        let std_listener = prepare_listener(path)?;
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("signerd-command".into())
            .spawn(move || {
                runtime.block_on(async move {
                    match UnixListener::from_std(std_listener) {
                        Ok(listener) => serve(listener, handle, token).await,
                        Err(e) => error!(error = %e, "unable to register command socket"),
                    }
                });
            })?;

        info!(path = %path.display(), "command listener started");
        Ok(Self {
            path: path.to_path_buf(),
            cancel,
            thread: Some(thread),
        })
    }

    /// Socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting, wait for the listener thread and remove the socket.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        if thread.join().is_err() {
            warn!("command listener thread panicked");
        }
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(error = %e, path = %self.path.display(), "unable to remove command socket");
        }
        info!("command listener stopped");
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(listener: UnixListener, handle: EngineHandle, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let handle = handle.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            result = handle_client(stream, &handle) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "command connection failed");
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept command connection");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }
}

async fn handle_client(stream: UnixStream, handle: &EngineHandle) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut line = String::new();
    BufReader::new(reader.take(MAX_REQUEST)).read_line(&mut line).await?;

    let response = match line.trim().parse::<Command>() {
        Ok(command) => {
            debug!(%command, "command received");
            execute(handle, &command)
        }
        Err(e) => CommandResponse::error(e),
    };
    let mut body = serde_json::to_vec(&response).map_err(io::Error::other)?;
    body.push(b'\n');
    writer.write_all(&body).await?;
    writer.shutdown().await
}
