//! Filesystem watching.
//!
//! [`WatchFeed`] owns the notify watcher and the set of armed units. The
//! dispatcher thread turns notify events for armed units into change events
//! and, when autoreload is on, engine reloads.

mod dispatcher;
mod feed;

use crossbeam_channel::{Receiver, bounded};
use notify::{Event, RecommendedWatcher};

use crate::error::HotswapError;

pub(crate) use dispatcher::Dispatcher;
pub use feed::WatchFeed;

/// Creates a notify watcher feeding a bounded channel.
///
/// Events that do not fit in the channel are dropped; the dispatcher
/// coalesces bursts anyway.
pub(crate) fn notify_channel()
-> Result<(RecommendedWatcher, Receiver<notify::Result<Event>>), HotswapError> {
    let (tx, rx) = bounded::<notify::Result<Event>>(256);
    let watcher = notify::recommended_watcher(move |res| {
        let _ = tx.try_send(res);
    })
    .map_err(|e| HotswapError::init(format!("failed to create file watcher: {e}")))?;
    Ok((watcher, rx))
}
