use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::parallel::try_par_map_limited;

use super::graph::{GraphError, Partition, Result};
use super::worker::WorkerContext;

/// Output of one partition task: the data plus per-stage timings.
pub struct PartitionOutput {
    pub(crate) data: Partition,
    pub(crate) stage_secs: Vec<f64>,
}

pub type PartitionTask<'a> = dyn Fn(usize, &WorkerContext) -> Result<PartitionOutput> + Sync + 'a;

/// Shared flag that stops executors from starting further partitions.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GraphError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs partition tasks and returns their outputs in partition order.
///
/// The first failing partition aborts the run; no partial output is returned.
pub trait Executor: Send + Sync {
    fn num_workers(&self) -> usize;

    fn execute(&self, partitions: usize, task: &PartitionTask<'_>) -> Result<Vec<PartitionOutput>>;
}

/// Runs every partition on the calling thread as worker 0.
#[derive(Debug, Default)]
pub struct SequentialExecutor {
    cancel: CancelToken,
}

impl SequentialExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Executor for SequentialExecutor {
    fn num_workers(&self) -> usize {
        1
    }

    fn execute(&self, partitions: usize, task: &PartitionTask<'_>) -> Result<Vec<PartitionOutput>> {
        let ctx = WorkerContext::new(0, 1);
        let mut outputs = Vec::with_capacity(partitions);
        for partition in 0..partitions {
            self.cancel.check()?;
            outputs.push(task(partition, &ctx)?);
        }
        Ok(outputs)
    }
}

/// Runs partitions on a dedicated rayon pool, one worker per pool thread.
///
/// At most `max_in_flight` partitions are started at once, which bounds the
/// memory held by partially processed partitions.
pub struct ThreadedExecutor {
    pool: rayon::ThreadPool,
    num_workers: usize,
    max_in_flight: usize,
    cancel: CancelToken,
}

impl std::fmt::Debug for ThreadedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedExecutor")
            .field("num_workers", &self.num_workers)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

impl ThreadedExecutor {
    pub fn new(num_workers: usize) -> Result<Self> {
        let num_workers = num_workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("cytos-worker-{i}"))
            .build()
            .map_err(|e| GraphError::ThreadPool(e.to_string()))?;
        Ok(Self {
            pool,
            num_workers,
            max_in_flight: num_workers * 2,
            cancel: CancelToken::default(),
        })
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Executor for ThreadedExecutor {
    fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn execute(&self, partitions: usize, task: &PartitionTask<'_>) -> Result<Vec<PartitionOutput>> {
        let indices: Vec<usize> = (0..partitions).collect();
        let num_workers = self.num_workers;
        self.pool.install(|| {
            try_par_map_limited(&indices, self.max_in_flight, |&partition| {
                self.cancel.check()?;
                let ordinal = rayon::current_thread_index().unwrap_or(0);
                task(partition, &WorkerContext::new(ordinal, num_workers))
            })
        })
    }
}
