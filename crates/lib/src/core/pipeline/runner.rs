//! The per-stage execution seam.
//!
//! Stages express their inner loops as `parallel_map` over deterministic
//! chunks; the reduce is an order-preserving collect, so serial and threaded
//! execution produce identical output. The orchestrator itself stays
//! single-threaded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use accord_lib_core::errors::{PipelineError, PipelineResult};

pub trait Executor: Sync {
    fn parallel_map<T, U, F>(&self, items: &[T], map_fn: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send;
}

pub struct SerialExecutor;

impl Executor for SerialExecutor {
    fn parallel_map<T, U, F>(&self, items: &[T], map_fn: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        items.iter().map(map_fn).collect()
    }
}

pub struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
}

impl ThreadPoolExecutor {
    pub fn new(workers: usize) -> PipelineResult<ThreadPoolExecutor> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("accord-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::Config(format!("parallel.workers: {e}")))?;
        Ok(ThreadPoolExecutor { pool })
    }
}

impl Executor for ThreadPoolExecutor {
    fn parallel_map<T, U, F>(&self, items: &[T], map_fn: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        // Indexed collect preserves input order regardless of scheduling.
        self.pool
            .install(|| items.par_iter().map(map_fn).collect())
    }
}

/// Runtime-selected executor. `workers == 0` means one per hardware thread;
/// `workers == 1` short-circuits to the serial path.
pub enum StageExecutor {
    Serial(SerialExecutor),
    Threaded(ThreadPoolExecutor),
}

impl StageExecutor {
    pub fn from_workers(workers: usize) -> PipelineResult<StageExecutor> {
        if workers == 1 {
            Ok(StageExecutor::Serial(SerialExecutor))
        } else {
            Ok(StageExecutor::Threaded(ThreadPoolExecutor::new(workers)?))
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, StageExecutor::Serial(_))
    }
}

impl Executor for StageExecutor {
    fn parallel_map<T, U, F>(&self, items: &[T], map_fn: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        match self {
            StageExecutor::Serial(serial) => serial.parallel_map(items, map_fn),
            StageExecutor::Threaded(threaded) => threaded.parallel_map(items, map_fn),
        }
    }
}

/// Cooperative cancellation, checked between chunks and between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Maps a raised flag to the dedicated error, for between-chunk checks.
    pub fn checkpoint(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_and_threaded_agree_and_preserve_order() {
        let items: Vec<u64> = (0..1000).collect();
        let serial = SerialExecutor.parallel_map(&items, |&x| x * 2);
        let threaded = ThreadPoolExecutor::new(4)
            .unwrap()
            .parallel_map(&items, |&x| x * 2);
        assert_eq!(serial, threaded);
        assert_eq!(serial[10], 20);
    }

    #[test]
    fn cancel_flag_trips_checkpoint() {
        let flag = CancelFlag::default();
        assert!(flag.checkpoint().is_ok());
        flag.cancel();
        assert_eq!(flag.checkpoint(), Err(PipelineError::Interrupted));
    }
}
