use crossbeam::channel::{Receiver, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ProgressFn, WorkerPanicked};

/// Bounded worker pool for blocking work items
///
/// Items are fed to at most `max_workers` scoped threads through a bounded
/// channel. Workers send `(index, result)` back to a single collector, so no
/// container is shared between threads. Results come back in input order.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    max_workers: usize,
    buffer_size: usize,
}

impl ParallelExecutor {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            buffer_size: max_workers * 2,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `processor` over every item, stopping dispatch at the first error
    ///
    /// Items already picked up by a worker run to completion before the first
    /// error is returned. Items not yet dispatched are dropped.
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
        let total = work_items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = self.max_workers.min(total);
        let (work_tx, work_rx): (Sender<(usize, T)>, Receiver<(usize, T)>) =
            bounded(self.buffer_size);
        let (result_tx, result_rx): (Sender<(usize, Result<R, E>)>, Receiver<(usize, Result<R, E>)>) =
            bounded(self.buffer_size);
        let abort = AtomicBool::new(false);

        crossbeam::thread::scope(|s| {
            let processor = &processor;
            let abort = &abort;

            for worker_id in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();

                s.builder()
                    .name(format!("discovery-worker-{worker_id}"))
                    .spawn(move |_| {
                        while let Ok((index, work_item)) = work_rx.recv() {
                            if abort.load(Ordering::Acquire) {
                                break;
                            }
                            let result = processor(work_item);
                            if result_tx.send((index, result)).is_err() {
                                break; // Collector dropped
                            }
                        }
                    })
                    .map_err(|_| WorkerPanicked)?;
            }

            // Producer: feed work until done or aborted
            s.spawn(move |_| {
                for entry in work_items.into_iter().enumerate() {
                    if abort.load(Ordering::Acquire) || work_tx.send(entry).is_err() {
                        break;
                    }
                }
            });

            // Drop our handles so the channels close when the threads finish
            drop(work_rx);
            drop(result_tx);

            Ok::<_, WorkerPanicked>(Self::collect_results(result_rx, total, abort, progress))
        })
        .map_err(|_| E::from(WorkerPanicked))?
        .map_err(E::from)?
    }

    fn collect_results<R, E>(
        result_rx: Receiver<(usize, Result<R, E>)>,
        total: usize,
        abort: &AtomicBool,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<R>, E> {
        let mut results = Vec::with_capacity(total);
        let mut first_error = None;
        let mut done = 0;

        while let Ok((index, result)) = result_rx.recv() {
            done += 1;
            match result {
                Ok(value) => results.push((index, value)),
                Err(e) => {
                    abort.store(true, Ordering::Release);
                    first_error.get_or_insert(e);
                }
            }
            if let Some(report) = progress {
                report(done, total);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, value)| value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Failed(i32),
        Panicked,
    }

    impl From<WorkerPanicked> for TestError {
        fn from(_: WorkerPanicked) -> Self {
            TestError::Panicked
        }
    }

    #[test]
    fn test_results_keep_input_order() {
        let executor = ParallelExecutor::new(4);
        let results: Result<Vec<i32>, TestError> = executor.try_execute(
            (1..=20).collect(),
            |x| {
                std::thread::sleep(Duration::from_millis((20 - x) as u64));
                Ok(x * 2)
            },
            None,
        );
        assert_eq!(results.unwrap(), (1..=20).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_never_exceeds_worker_limit() {
        let in_flight = AtomicUsize::new(0);
        let watermark = AtomicUsize::new(0);
        let executor = ParallelExecutor::new(3);

        let results: Result<Vec<()>, TestError> = executor.try_execute(
            vec![(); 30],
            |_| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                watermark.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        );

        assert_eq!(results.unwrap().len(), 30);
        let observed = watermark.load(Ordering::SeqCst);
        assert!(observed <= 3, "observed {observed} concurrent items with 3 workers");
    }

    #[test]
    fn test_first_error_aborts_dispatch() {
        let processed = AtomicUsize::new(0);
        let executor = ParallelExecutor::new(2);

        let results: Result<Vec<i32>, TestError> = executor.try_execute(
            (0..200).collect(),
            |x| {
                processed.fetch_add(1, Ordering::SeqCst);
                if x == 3 {
                    Err(TestError::Failed(x))
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(x)
                }
            },
            None,
        );

        assert_eq!(results.unwrap_err(), TestError::Failed(3));
        assert!(processed.load(Ordering::SeqCst) < 200);
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let executor = ParallelExecutor::new(2);
        let results: Result<Vec<i32>, TestError> = executor.try_execute(
            vec![1, 2, 3],
            |x| {
                if x == 2 {
                    panic!("boom");
                }
                Ok(x)
            },
            None,
        );
        assert_eq!(results.unwrap_err(), TestError::Panicked);
    }

    #[test]
    fn test_progress_reports_every_item() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let report = {
            let seen = Arc::clone(&seen);
            move |done: usize, total: usize| seen.lock().unwrap().push((done, total))
        };
        let executor = ParallelExecutor::new(2);

        let results: Result<Vec<i32>, TestError> =
            executor.try_execute(vec![1, 2, 3], Ok, Some(&report));

        assert_eq!(results.unwrap(), vec![1, 2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_empty_input() {
        let executor = ParallelExecutor::new(4);
        let results: Result<Vec<i32>, TestError> = executor.try_execute(Vec::new(), Ok, None);
        assert!(results.unwrap().is_empty());
    }
}
