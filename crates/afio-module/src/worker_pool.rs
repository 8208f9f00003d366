//! `WorkerPool`: bounded, least-recently-used set of workers.
//!
//! `acquire()` picks, in order:
//!
//! 1. an idle running worker (no outstanding borrows),
//! 2. a freshly spawned worker while the pool is below its maximum,
//! 3. the least-recently-used worker, shared with its current borrowers.
//!
//! Dead workers are pruned on every acquire and never handed out again.
//! The returned [`PooledWorker`] gives the worker back when dropped, so
//! release is exception-safe. Open files keep their guard for as long as
//! they live, which pins their worker.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use afio_core::error::TaskError;
use afio_core::worker::{Worker, WorkerFactory};
use tracing::debug;

struct Slot {
    worker: Arc<dyn Worker>,
    borrowed: usize,
}

struct PoolState {
    /// Front is least recently used.
    slots: VecDeque<Slot>,
    next_id: usize,
}

pub struct WorkerPool {
    factory: Arc<dyn WorkerFactory>,
    max: usize,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn WorkerFactory>, max: usize) -> Self {
        Self {
            factory,
            max: max.max(1),
            state: Mutex::new(PoolState {
                slots: VecDeque::new(),
                next_id: 0,
            }),
        }
    }

    pub fn acquire(self: &Arc<Self>) -> Result<PooledWorker, TaskError> {
        let mut state = self.lock();

        let before = state.slots.len();
        state.slots.retain(|slot| slot.worker.is_running());
        if state.slots.len() < before {
            debug!(pruned = before - state.slots.len(), "dead workers removed from pool");
        }

        let mut slot = if let Some(idle) = state.slots.iter().position(|s| s.borrowed == 0) {
            state.slots.remove(idle).ok_or_else(|| TaskError::new("Worker pool slot vanished."))?
        } else if state.slots.len() < self.max {
            let id = state.next_id;
            state.next_id += 1;
            let worker = self.factory.create(id)?;
            debug!(worker = id, size = state.slots.len() + 1, max = self.max, "pool grew");
            Slot { worker, borrowed: 0 }
        } else {
            // Full and busy: recycle the least recently used worker.
            state
                .slots
                .pop_front()
                .ok_or_else(|| TaskError::new("Worker pool is empty."))?
        };

        slot.borrowed += 1;
        let worker = Arc::clone(&slot.worker);
        state.slots.push_back(slot);

        Ok(PooledWorker {
            pool: Arc::clone(self),
            worker,
        })
    }

    fn release(&self, worker: &Arc<dyn Worker>) {
        let mut state = self.lock();
        if let Some(slot) = state.slots.iter_mut().find(|s| s.worker.id() == worker.id()) {
            slot.borrowed = slot.borrowed.saturating_sub(1);
        }
    }

    /// Workers currently in the pool (busy + idle).
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers with no outstanding borrow.
    pub fn idle(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.borrowed == 0).count()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Kill every worker. Outstanding guards stay valid but their
    /// workers reject new tasks.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        for slot in state.slots.drain(..) {
            slot.worker.kill();
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A worker borrowed from a [`WorkerPool`]; returned on drop.
pub struct PooledWorker {
    pool: Arc<WorkerPool>,
    worker: Arc<dyn Worker>,
}

impl PooledWorker {
    /// Shared handle to the underlying worker, independent of the borrow.
    pub fn worker(&self) -> Arc<dyn Worker> {
        Arc::clone(&self.worker)
    }
}

impl Deref for PooledWorker {
    type Target = dyn Worker;

    fn deref(&self) -> &Self::Target {
        self.worker.as_ref()
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        self.pool.release(&self.worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inline_worker::InlineWorkerFactory;

    fn pool(max: usize) -> (Arc<InlineWorkerFactory>, Arc<WorkerPool>) {
        let factory = Arc::new(InlineWorkerFactory::new());
        let pool = Arc::new(WorkerPool::new(factory.clone(), max));
        (factory, pool)
    }

    #[test]
    fn reuses_idle_workers() {
        let (factory, pool) = pool(4);
        let first = pool.acquire().unwrap().id();
        let second = pool.acquire().unwrap().id();
        assert_eq!(first, second);
        assert_eq!(factory.created().len(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn grows_to_max_then_recycles_lru() {
        let (factory, pool) = pool(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.id(), b.id());

        // Both busy and at max: the least recently used (a) is shared.
        let c = pool.acquire().unwrap();
        assert_eq!(c.id(), a.id());
        // Now b is least recently used.
        let d = pool.acquire().unwrap();
        assert_eq!(d.id(), b.id());
        assert_eq!(factory.created().len(), 2);
    }

    #[test]
    fn dead_workers_are_replaced() {
        let (factory, pool) = pool(2);
        let id = {
            let worker = pool.acquire().unwrap();
            worker.kill();
            worker.id()
        };
        let replacement = pool.acquire().unwrap();
        assert_ne!(replacement.id(), id);
        assert!(replacement.is_running());
        assert_eq!(pool.len(), 1);
        assert_eq!(factory.created().len(), 2);
    }

    #[test]
    fn guard_release_is_counted() {
        let (_factory, pool) = pool(2);
        let guard = pool.acquire().unwrap();
        assert_eq!(pool.idle(), 0);
        drop(guard);
        assert_eq!(pool.idle(), 1);
    }
}
