use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

/// Compute device a worker-scoped resource should bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Gpu(usize),
}

/// Identity of the worker running a partition task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    ordinal: usize,
    num_workers: usize,
}

impl WorkerContext {
    pub fn new(ordinal: usize, num_workers: usize) -> Self {
        debug_assert!(ordinal < num_workers.max(1));
        Self {
            ordinal,
            num_workers,
        }
    }

    /// Stable index of this worker in `0..num_workers`.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Device for resources built on this worker: one accelerator per
    /// worker when acceleration is requested.
    pub fn device(&self, accelerated: bool) -> Device {
        if accelerated {
            Device::Gpu(self.ordinal)
        } else {
            Device::Cpu
        }
    }
}

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

/// One lazily built value per worker.
///
/// The value for a worker is constructed the first time a task on that worker
/// asks for it and reused afterwards. Construction happens under the worker's
/// slot lock, so two tasks on one worker never build it twice. A failed
/// construction leaves the slot empty and is retried on the next request.
pub struct WorkerLocal<T> {
    slots: Mutex<HashMap<usize, Slot<T>>>,
}

impl<T> Default for WorkerLocal<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for WorkerLocal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLocal")
            .field("constructed", &self.constructed())
            .finish()
    }
}

impl<T> WorkerLocal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_init<E, F>(&self, ctx: &WorkerContext, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce(&WorkerContext) -> Result<T, E>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(ctx.ordinal()).or_default().clone()
        };

        let mut value = slot.lock();
        if let Some(existing) = value.as_ref() {
            return Ok(existing.clone());
        }
        let built = Arc::new(init(ctx)?);
        tracing::debug!(worker = ctx.ordinal(), "Built worker-local value");
        *value = Some(built.clone());
        Ok(built)
    }

    /// Number of workers holding a constructed value.
    pub fn constructed(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }
}
