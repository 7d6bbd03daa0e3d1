//! The engine's event channel.
//!
//! Every outcome the engine does not return to a caller is published here:
//! errors of background reloads, successful swaps, and raw change
//! notifications. Each subscriber receives every event.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::HotswapError;

/// An event published by the engine.
#[derive(Debug, Clone)]
pub enum HotswapEvent {
    /// A non-fatal failure.
    Error(HotswapError),

    /// A tracked unit was reloaded in place.
    Swap(PathBuf),

    /// A watched unit changed on disk.
    Change(PathBuf),
}

impl HotswapEvent {
    /// Returns the path of a `Swap` event.
    #[must_use]
    pub fn as_swap(&self) -> Option<&PathBuf> {
        match self {
            Self::Swap(path) => Some(path),
            _ => None,
        }
    }

    /// Returns the path of a `Change` event.
    #[must_use]
    pub fn as_change(&self) -> Option<&PathBuf> {
        match self {
            Self::Change(path) => Some(path),
            _ => None,
        }
    }

    /// Returns the error of an `Error` event.
    #[must_use]
    pub fn as_error(&self) -> Option<&HotswapError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Fan-out channel for [`HotswapEvent`]s.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<HotswapEvent>>>,
}

impl EventBus {
    /// Creates a bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    ///
    /// The receiver sees every event published from now on. It is
    /// disconnected once the bus is closed or dropped.
    pub fn subscribe(&self) -> Receiver<HotswapEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publishes an event to every live subscriber.
    pub fn emit(&self, event: HotswapEvent) {
        match &event {
            HotswapEvent::Error(err) => warn!(error = %err, "hotswap error"),
            HotswapEvent::Swap(path) => debug!(path = %path.display(), "swap"),
            HotswapEvent::Change(path) => debug!(path = %path.display(), "change"),
        }

        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publishes an error event.
    pub fn error(&self, err: HotswapError) {
        self.emit(HotswapEvent::Error(err));
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drops every subscriber, disconnecting their receivers.
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }
}

/// Callback invoked for every `Change` event.
pub type ChangeCallback = Arc<dyn Fn(&PathBuf) + Send + Sync>;

/// Callback invoked for every `Swap` event.
pub type SwapCallback = Arc<dyn Fn(&PathBuf) + Send + Sync>;

/// Callback invoked for every `Error` event.
pub type ErrorCallback = Arc<dyn Fn(&HotswapError) + Send + Sync>;

/// Callbacks registered on the builder.
#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub on_change: Option<ChangeCallback>,
    pub on_swap: Option<SwapCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn is_empty(&self) -> bool {
        self.on_change.is_none() && self.on_swap.is_none() && self.on_error.is_none()
    }

    /// Spawns a thread delivering events to the callbacks.
    ///
    /// Returns `Ok(None)` when no callback is set. The thread exits once the
    /// bus is closed.
    ///
    /// # Errors
    ///
    /// Returns [`HotswapError::Init`] if the thread could not be spawned.
    pub fn spawn(self, bus: &EventBus) -> Result<Option<JoinHandle<()>>, HotswapError> {
        if self.is_empty() {
            return Ok(None);
        }

        let rx = bus.subscribe();
        thread::Builder::new()
            .name("procswap-callbacks".to_string())
            .spawn(move || callback_loop(&rx, &self))
            .map(Some)
            .map_err(|e| HotswapError::init(format!("failed to spawn callback thread: {e}")))
    }
}

fn callback_loop(rx: &Receiver<HotswapEvent>, callbacks: &Callbacks) {
    for event in rx {
        match &event {
            HotswapEvent::Change(path) => {
                if let Some(cb) = &callbacks.on_change {
                    cb(path);
                }
            }
            HotswapEvent::Swap(path) => {
                if let Some(cb) = &callbacks.on_swap {
                    cb(path);
                }
            }
            HotswapEvent::Error(err) => {
                if let Some(cb) = &callbacks.on_error {
                    cb(err);
                }
            }
        }
    }
}
