//! Bounded dispatch of source workers.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_query_source::progress::{ProgressCallback, null_progress};
use fleet_query_source_models::SourceDescriptor;
use tokio::task::{Id, JoinSet};

use crate::worker::{FetchError, FetchResult, SourceWorker};

/// Runs a [`SourceWorker`] for every source with at most `concurrency`
/// in flight at once.
pub struct WorkerPool {
    worker: SourceWorker,
    concurrency: usize,
    progress: Arc<dyn ProgressCallback>,
}

impl WorkerPool {
    /// Creates a pool. A concurrency of zero is treated as one.
    #[must_use]
    pub fn new(worker: SourceWorker, concurrency: usize) -> Self {
        Self {
            worker,
            concurrency: concurrency.max(1),
            progress: null_progress(),
        }
    }

    /// Reports one tick per completed source to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Effective concurrency limit.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `query` against every source and hands each [`FetchResult`] to
    /// `on_result` in completion order.
    ///
    /// Every source yields exactly one result. A worker that panics is
    /// reported as [`FetchError::Task`].
    ///
    /// # Errors
    ///
    /// Stops dispatching new sources and returns the first error
    /// `on_result` produces. Workers still in flight are aborted and
    /// awaited before this returns.
    pub async fn dispatch<F, E>(
        &self,
        sources: Vec<SourceDescriptor>,
        query: &str,
        mut on_result: F,
    ) -> Result<(), E>
    where
        F: FnMut(FetchResult) -> Result<(), E>,
    {
        let query: Arc<str> = Arc::from(query);
        self.progress.set_total(sources.len() as u64);

        let mut pending = sources.into_iter();
        let mut tasks = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();

        loop {
            while tasks.len() < self.concurrency {
                let Some(source) = pending.next() else {
                    break;
                };
                let worker = self.worker.clone();
                let query = Arc::clone(&query);
                let source_id = source.id.clone();
                let handle = tasks.spawn(async move { worker.run(&source, &query).await });
                running.insert(handle.id(), source_id);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let result = match joined {
                Ok((id, result)) => {
                    running.remove(&id);
                    result
                }
                Err(e) => {
                    let source_id = running.remove(&e.id()).unwrap_or_default();
                    log::error!("Worker for {source_id} did not complete: {e}");
                    FetchResult::Failure {
                        source_id,
                        error: FetchError::Task(e.to_string()),
                    }
                }
            };

            self.progress.inc(1);
            self.progress.set_message(result.source_id().to_string());
            if let Err(e) = on_result(result) {
                log::warn!("Stopping dispatch; aborting {} in-flight workers", tasks.len());
                tasks.shutdown().await;
                return Err(e);
            }
        }

        self.progress.finish("All sources processed".to_string());
        Ok(())
    }
}
