//! OS signal listener.
//!
//! SIGHUP requests a reload, SIGTERM and SIGINT request shutdown. The
//! listener only pushes an [`EngineSignal`]; the engine loop acts on it.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::EngineSignal;

/// A running signal listener thread.
#[derive(Debug)]
pub struct SignalListener {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl SignalListener {
    /// Register the handlers and start forwarding signals to `notify`.
    ///
    /// # Errors
    ///
    /// A handler cannot be registered or the thread cannot start.
    pub fn start(notify: Sender<EngineSignal>) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let (mut hangup, mut terminate, mut interrupt) = {
            let _guard = runtime.enter();
            (
                signal(SignalKind::hangup())?,
                signal(SignalKind::terminate())?,
                signal(SignalKind::interrupt())?,
            )
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let thread = thread::Builder::new().name("signerd-signals".into()).spawn(move || {
            runtime.block_on(async move {
                loop {
                    let (name, wanted) = tokio::select! {
                        () = token.cancelled() => break,
                        _ = hangup.recv() => ("SIGHUP", EngineSignal::Reload),
                        _ = terminate.recv() => ("SIGTERM", EngineSignal::Shutdown),
                        _ = interrupt.recv() => ("SIGINT", EngineSignal::Shutdown),
                    };
                    info!(signal = name, "signal received");
                    if notify.send(wanted).is_err() {
                        warn!("engine loop is gone, signal listener exiting");
                        break;
                    }
                }
            });
        })?;

        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }

    /// Stop listening and join the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("signal listener thread panicked");
            }
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}
