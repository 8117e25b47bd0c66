//! Periodic snapshot of in-flight workers to a JSON file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::active::ActiveWorkers;

/// Background task that rewrites the progress file on a fixed interval.
pub struct ProgressReporter {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Starts writing snapshots of `active` to `path` every `interval`.
    #[must_use]
    pub fn spawn(active: Arc<ActiveWorkers>, path: PathBuf, interval: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if let Err(e) = write_progress_file(&active, &path) {
                            log::error!("Failed to write progress file {}: {e}", path.display());
                        }
                    }
                }
            }

            if let Err(e) = write_progress_file(&active, &path) {
                log::error!("Failed to write final progress file {}: {e}", path.display());
            }
        });

        Self { stop, handle }
    }

    /// Stops the loop and waits for the final snapshot to be written.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            log::warn!("Progress reporter did not shut down cleanly: {e}");
        }
    }
}

/// Writes one snapshot of `active` to `path`, replacing it atomically.
///
/// # Errors
///
/// Returns an error if serializing or writing the snapshot fails.
pub fn write_progress_file(active: &ActiveWorkers, path: &Path) -> std::io::Result<()> {
    let snapshot = active.snapshot();
    let json = serde_json::to_string_pretty(&snapshot)?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use fleet_query_fetch_models::ProgressSnapshot;

    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "fleet_query_progress_{name}_{}.json",
            std::process::id()
        ))
    }

    fn read_snapshot(path: &Path) -> ProgressSnapshot {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn snapshot_lists_active_workers() {
        let path = temp_file("snapshot");
        let active = Arc::new(ActiveWorkers::new());
        let _guard = active.register("tenant_1");

        write_progress_file(&active, &path).unwrap();

        let snapshot = read_snapshot(&path);
        assert_eq!(snapshot.active_threads, 1);
        assert_eq!(snapshot.threads["Worker-tenant_1"].source_id, "tenant_1");
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["threads"]["Worker-tenant_1"]["status"], "connecting");

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn final_write_reflects_terminal_state() {
        let path = temp_file("final");
        let active = Arc::new(ActiveWorkers::new());
        let guard = active.register("tenant_1");

        let reporter =
            ProgressReporter::spawn(Arc::clone(&active), path.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(read_snapshot(&path).active_threads, 1);

        drop(guard);
        reporter.stop().await;
        assert_eq!(read_snapshot(&path).active_threads, 0);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_the_loop() {
        let path = std::env::temp_dir()
            .join(format!("fleet_query_missing_{}", std::process::id()))
            .join("nested")
            .join("progress.json");
        let active = Arc::new(ActiveWorkers::new());

        let reporter = ProgressReporter::spawn(active, path.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        reporter.stop().await;
        assert!(!path.exists());
    }
}
