//! Bounded-retry reads of changed units.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{SourceFs, strip_bom};
use crate::error::HotswapError;
use crate::event::{EventBus, HotswapEvent};

/// Fixed ascending delays between read attempts.
///
/// A schedule of `n` delays allows `n + 1` attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    /// Creates a schedule from explicit delays.
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Creates a schedule from delays in milliseconds.
    #[must_use]
    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// A schedule that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Returns the delays.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Returns the total number of attempts.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Returns the sum of all delays.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.delays.iter().sum()
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_millis(&[100, 300, 1000])
    }
}

/// Suspends change notifications for a path while it is being read.
pub trait WatchGate: Send + Sync {
    /// Stops delivering notifications for `path`.
    fn pause(&self, path: &Path);

    /// Resumes notifications for `path`.
    fn resume(&self, path: &Path);
}

/// Reads unit content with bounded retries.
///
/// A file that is being rewritten may briefly be missing or unreadable. The
/// reader retries on the [`RetrySchedule`] and reports a single
/// [`HotswapError::Io`] once every attempt has failed.
pub struct ResilientReader {
    fs: Arc<dyn SourceFs>,
    schedule: RetrySchedule,
}

impl ResilientReader {
    /// Creates a reader.
    pub fn new(fs: Arc<dyn SourceFs>, schedule: RetrySchedule) -> Self {
        Self { fs, schedule }
    }

    /// Returns the filesystem used for reads.
    pub fn fs(&self) -> &Arc<dyn SourceFs> {
        &self.fs
    }

    /// Returns the retry schedule.
    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Reads `path`, pausing its watch around the read.
    ///
    /// Returns `None` once the schedule is exhausted; the failure has then
    /// been reported on `bus` exactly once. The watch is resumed whatever the
    /// outcome.
    pub async fn read_failsafe(
        &self,
        path: &Path,
        gate: &dyn WatchGate,
        bus: &EventBus,
    ) -> Option<String> {
        gate.pause(path);
        let result = self.read_with_retry(path).await;
        gate.resume(path);

        match result {
            Ok(content) => Some(content),
            Err(err) => {
                bus.emit(HotswapEvent::Error(err));
                None
            }
        }
    }

    async fn read_with_retry(&self, path: &Path) -> Result<String, HotswapError> {
        let mut delays = self.schedule.delays.iter();
        let mut attempt = 1;

        loop {
            match self.fs.read(path).await {
                Ok(content) => {
                    debug!(path = %path.display(), attempt, "read unit");
                    return Ok(strip_bom(&content).to_string());
                }
                Err(err) => match delays.next() {
                    Some(delay) => {
                        debug!(
                            path = %path.display(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "read failed, retrying"
                        );
                        tokio::time::sleep(*delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(path = %path.display(), attempts = attempt, error = %err, "giving up on read");
                        return Err(HotswapError::io(path, attempt, err));
                    }
                },
            }
        }
    }
}
