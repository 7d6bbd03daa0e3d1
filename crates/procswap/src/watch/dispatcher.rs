//! The watch dispatcher thread.
//!
//! Receives raw notify events, coalesces bursts within the debounce window,
//! and hands each changed unit to the engine. Reloads triggered here run on
//! a private current-thread tokio runtime owned by the thread.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use notify::{Event, EventKind};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::engine::EngineInner;
use crate::error::HotswapError;

/// Commands sent to the dispatcher thread.
#[derive(Debug, Clone, Copy)]
enum DispatchCommand {
    Stop,
}

/// Handle to the dispatcher thread.
pub(crate) struct Dispatcher {
    command_tx: Sender<DispatchCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Starts the dispatcher thread.
    pub fn spawn(
        engine: Weak<EngineInner>,
        notify_rx: Receiver<notify::Result<Event>>,
        debounce: Duration,
    ) -> Result<Self, HotswapError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| HotswapError::init(format!("failed to build reload runtime: {e}")))?;

        let (command_tx, command_rx) = bounded(4);

        let handle = thread::Builder::new()
            .name("procswap-watcher".to_string())
            .spawn(move || dispatch_loop(&engine, &command_rx, &notify_rx, debounce, &runtime))
            .map_err(|e| HotswapError::init(format!("failed to spawn watcher thread: {e}")))?;

        Ok(Self {
            command_tx,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Stops the thread and waits for it to exit.
    ///
    /// When called from the dispatcher thread itself the thread is only
    /// signalled.
    pub fn stop(&self) {
        let _ = self.command_tx.try_send(DispatchCommand::Stop);

        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("watcher thread panicked");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Paths changed since the last flush.
///
/// A batch is due one debounce window after its first event, so a steady
/// stream of events cannot hold changes back indefinitely.
#[derive(Debug, Default)]
struct PendingBatch {
    paths: BTreeSet<PathBuf>,
    since: Option<Instant>,
}

impl PendingBatch {
    fn push(&mut self, paths: impl IntoIterator<Item = PathBuf>, now: Instant) {
        self.paths.extend(paths);
        if !self.paths.is_empty() {
            self.since.get_or_insert(now);
        }
    }

    fn is_due(&self, now: Instant, debounce: Duration) -> bool {
        self.since
            .is_some_and(|since| now.saturating_duration_since(since) >= debounce)
    }

    /// How long to wait for more events before checking again.
    fn wait(&self, now: Instant, debounce: Duration) -> Duration {
        self.since.map_or(debounce, |since| {
            debounce.saturating_sub(now.saturating_duration_since(since))
        })
    }

    fn take(&mut self) -> BTreeSet<PathBuf> {
        self.since = None;
        std::mem::take(&mut self.paths)
    }
}

fn dispatch_loop(
    engine: &Weak<EngineInner>,
    command_rx: &Receiver<DispatchCommand>,
    notify_rx: &Receiver<notify::Result<Event>>,
    debounce: Duration,
    runtime: &Runtime,
) {
    let mut pending = PendingBatch::default();

    loop {
        select! {
            recv(command_rx) -> cmd => {
                match cmd {
                    Ok(DispatchCommand::Stop) | Err(_) => break,
                }
            }

            recv(notify_rx) -> event => {
                match event {
                    Ok(Ok(event)) => {
                        if is_relevant(&event) {
                            pending.push(event.paths, Instant::now());
                        }
                    }
                    Ok(Err(err)) => debug!(error = %err, "notify error"),
                    Err(_) => break,
                }
            }

            default(pending.wait(Instant::now(), debounce)) => {}
        }

        if pending.is_due(Instant::now(), debounce) && !flush(engine, &mut pending, runtime) {
            break;
        }
    }

    debug!("watcher thread exiting");
}

/// Hands every pending path to the engine. Returns `false` once the engine
/// is gone.
fn flush(engine: &Weak<EngineInner>, pending: &mut PendingBatch, runtime: &Runtime) -> bool {
    let Some(engine) = engine.upgrade() else {
        return false;
    };
    for path in pending.take() {
        engine.on_file_event(&path, runtime);
    }
    true
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
