//! Batch reconciliation of tracked units against the filesystem.

use std::path::PathBuf;
use std::time::SystemTime;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::EngineInner;

impl EngineInner {
    /// Reloads every tracked unit whose file is newer than its last apply.
    ///
    /// Stats and reads run concurrently; applies run one at a time in path
    /// order once every read has finished. Returns the swapped paths.
    pub(crate) async fn reconcile(&self) -> Vec<PathBuf> {
        let snapshots = self.registry.snapshots();
        let fs = self.reader.fs();

        let stats = join_all(snapshots.iter().map(|(path, _)| fs.modified(path))).await;

        let changed: Vec<(PathBuf, SystemTime)> = snapshots
            .into_iter()
            .zip(stats)
            .filter_map(|((path, applied), stat)| match stat {
                Ok(current) if applied.is_none_or(|applied| current > applied) => {
                    Some((path, current))
                }
                Ok(_) => None,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not stat unit");
                    None
                }
            })
            .collect();

        if changed.is_empty() {
            debug!("reconcile found no changes");
            return Vec::new();
        }

        let contents = join_all(
            changed
                .iter()
                .map(|(path, _)| self.reader.read_failsafe(path, &self.watch, &self.bus)),
        )
        .await;

        let mut swapped = Vec::new();
        for ((path, modified), content) in changed.iter().zip(contents) {
            let Some(content) = content else {
                continue;
            };
            if self.apply_fetched(path, content, Some(*modified)).is_swap() {
                swapped.push(path.clone());
            }
        }

        info!(
            changed = changed.len(),
            swapped = swapped.len(),
            "reconcile finished"
        );
        swapped
    }
}
