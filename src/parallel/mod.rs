//! Generic parallel execution framework
//!
//! Provides the bounded worker pool used by the discovery phase, plus a
//! sequential fallback for single-worker runs.
//!
//! # Architecture Responsibilities
//!
//! The parallel module focuses exclusively on **execution strategy**:
//!
//! - **Bounded width**: never more than `max_workers` items in flight
//! - **Message passing**: workers hand results to one collector over a channel
//! - **Fail fast on fatal errors**: the first `Err` stops further dispatch
//! - **Progress**: an optional `(done, total)` callback driven by the collector
//!
//! It does not know anything about VMs, inventories or reservations.
//!
//! # Example Usage
//!
//! ```rust
//! use vmscout::parallel::{ExecutionStrategy, WorkerPanicked};
//!
//! let strategy = ExecutionStrategy::auto(100, 8);
//! let doubled: Result<Vec<u32>, WorkerPanicked> =
//!     strategy.try_execute((0..100u32).collect::<Vec<_>>(), |x| Ok(x * 2), None);
//! assert_eq!(doubled.unwrap()[10], 20);
//! ```

pub mod processor;

pub use processor::ParallelExecutor;

/// Progress callback invoked with `(completed, total)` after each item
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// A worker thread panicked while processing an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a worker thread panicked during parallel execution")]
pub struct WorkerPanicked;

/// How a list of work items gets processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Sequential,
    Parallel { workers: usize },
}

impl ExecutionStrategy {
    /// Parallel unless there is only one worker or one item to process
    pub fn auto(work_item_count: usize, max_workers: usize) -> Self {
        if max_workers <= 1 || work_item_count <= 1 {
            ExecutionStrategy::Sequential
        } else {
            ExecutionStrategy::Parallel {
                workers: max_workers,
            }
        }
    }

    pub fn try_execute<T, R, E, F>(
        &self,
        work_items: Vec<T>,
        processor: F,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<R>, E>
    where
        T: Send,
        R: Send,
        E: Send + From<WorkerPanicked>,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        match *self {
            ExecutionStrategy::Sequential => {
                let total = work_items.len();
                let mut results = Vec::with_capacity(total);
                for (done, item) in work_items.into_iter().enumerate() {
                    results.push(processor(item)?);
                    if let Some(report) = progress {
                        report(done + 1, total);
                    }
                }
                Ok(results)
            }
            ExecutionStrategy::Parallel { workers } => {
                ParallelExecutor::new(workers).try_execute(work_items, processor, progress)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_strategy() {
        assert_eq!(ExecutionStrategy::auto(10, 1), ExecutionStrategy::Sequential);
        assert_eq!(ExecutionStrategy::auto(1, 8), ExecutionStrategy::Sequential);
        assert_eq!(
            ExecutionStrategy::auto(10, 8),
            ExecutionStrategy::Parallel { workers: 8 }
        );
    }

    #[test]
    fn test_sequential_stops_at_first_error() {
        let mut seen = Vec::new();
        let seen_ref = std::sync::Mutex::new(&mut seen);
        let result: Result<Vec<i32>, WorkerPanicked> = ExecutionStrategy::Sequential.try_execute(
            vec![1, 2, 3],
            |x| {
                seen_ref.lock().unwrap().push(x);
                if x == 2 { Err(WorkerPanicked) } else { Ok(x) }
            },
            None,
        );

        assert!(result.is_err());
        drop(seen_ref);
        assert_eq!(seen, vec![1, 2]);
    }
}
