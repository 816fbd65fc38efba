//! Batch task execution
//!
//! Two executors sit behind [`TaskExecutor`]: a bounded worker pool backed
//! by a tokio runtime's blocking threads, and an inline executor that runs
//! jobs one after another on the caller's thread. Which one is used comes
//! from [`ExecutorConfig`].

use crate::config::ExecutorConfig;
use crate::error::{Result, WcError};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// A unit of blocking work.
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

pub trait TaskExecutor: Send + Sync {
    /// Run every job, returning results in submission order.
    fn execute_batch(&self, jobs: Vec<Job>) -> Vec<Result<()>>;

    fn name(&self) -> &'static str;
}

pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute_batch(&self, jobs: Vec<Job>) -> Vec<Result<()>> {
        jobs.into_iter().map(|job| job()).collect()
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

pub struct PoolExecutor {
    runtime: Runtime,
    workers: usize,
}

impl PoolExecutor {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("svnwc-worker")
            .build()?;
        Ok(Self { runtime, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl TaskExecutor for PoolExecutor {
    fn execute_batch(&self, jobs: Vec<Job>) -> Vec<Result<()>> {
        self.runtime.block_on(async {
            let handles: Vec<_> = jobs
                .into_iter()
                .map(tokio::task::spawn_blocking)
                .collect();
            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(WcError::Io(std::io::Error::other(e))),
                });
            }
            results
        })
    }

    fn name(&self) -> &'static str {
        "pool"
    }
}

/// Build the executor selected by configuration.
pub fn executor_from_config(config: &ExecutorConfig) -> Result<Arc<dyn TaskExecutor>> {
    Ok(match config {
        ExecutorConfig::Pool { workers } => Arc::new(PoolExecutor::new(*workers)?),
        ExecutorConfig::Inline => Arc::new(InlineExecutor),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_jobs(counter: &Arc<AtomicUsize>, n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| {
                let counter = counter.clone();
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if i == 3 { Err(WcError::Cancelled) } else { Ok(()) }
                }) as Job
            })
            .collect()
    }

    #[test]
    fn test_inline_runs_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let results = InlineExecutor.execute_batch(counting_jobs(&counter, 5));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(matches!(results[3], Err(WcError::Cancelled)));
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 4);
    }

    #[test]
    fn test_pool_preserves_result_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = executor_from_config(&ExecutorConfig::Pool { workers: 2 }).unwrap();
        assert_eq!(pool.name(), "pool");
        let results = pool.execute_batch(counting_jobs(&counter, 16));
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert_eq!(results.len(), 16);
        assert!(results[3].is_err());
        assert!(results[4].is_ok());
    }
}
