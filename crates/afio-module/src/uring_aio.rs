//! `UringAio`: default `AioBackend` implementation.
//!
//! Wires the two tiers to one completion eventfd:
//!
//! ```text
//!                     ┌─ ProbeRouter ─┐
//!   submit(op, cb) ───┤               ├── IoUring  → BasicIoUring ─┐ (eventfd registered
//!                     └───────────────┴── Blocking → FixedPool ────┤  with the ring)
//!                                                                  ▼
//!   poll() ◄── event loop wakes on eventfd ◄───────────── EventFdNotifier
//!     └─ reap CQEs + drain result queue → run callbacks
//! ```
//!
//! Every request is recorded under its id until its completion is reaped.
//! The record owns the op (paths, write data) and the landing memory the
//! kernel writes into, so nothing is freed while the kernel can touch it.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use afio_core::aio::{
    AioBackend, AioCallback, AioError, AioOp, AioOutput, AioResult, OpKind, RequestId,
};
use afio_core::config::AfioConfig;
use afio_core::error::TaskError;
use afio_core::notifier::Notifier;
use afio_core::router::OpRouter;
use afio_core::tier::Tier;
use tracing::{debug, trace, warn};

use crate::basic_iouring::{self, BasicIoUring, BasicIoUringConfig, Landing, CANCEL_USER_DATA};
use crate::eventfd_notifier::EventFdNotifier;
use crate::fixed_pool::FixedPool;
use crate::probe_router::ProbeRouter;

struct Request {
    kind: OpKind,
    tier: Tier,
    /// `None` once cancelled.
    callback: Option<AioCallback>,
    /// Kept alive for the kernel; never read back.
    #[allow(dead_code)]
    op: Option<AioOp>,
    landing: Landing,
}

struct Inner {
    ring: Option<BasicIoUring>,
    requests: HashMap<u64, Request>,
    /// Scratch buffer for reaped CQEs.
    reaped: Vec<(u64, i32)>,
}

pub struct UringAio {
    inner: Mutex<Inner>,
    notifier: Arc<EventFdNotifier>,
    pool: FixedPool,
    router: ProbeRouter,
    next_id: AtomicU64,
}

type Ready = Vec<(AioCallback, AioResult)>;

impl UringAio {
    /// Set up the facility. io_uring problems are not fatal: the facility
    /// then routes everything to its blocking tier.
    pub fn new(config: &AfioConfig) -> Result<Self, AioError> {
        let notifier = Arc::new(EventFdNotifier::create().map_err(AioError::EventFd)?);

        let ring = if config.disable_uring {
            debug!("io_uring disabled by configuration");
            None
        } else {
            Self::setup_ring(config, notifier.fd())
        };

        let router = match &ring {
            Some(ring) => ProbeRouter::new(&ring.probe_opcodes()),
            None => ProbeRouter::blocking_only(),
        };
        let counts = router.tier_counts();
        debug!(
            iouring = counts.iouring,
            blocking = counts.blocking,
            "native routing table built"
        );

        let pool = FixedPool::new(config.blocking_threads, notifier.clone())?;

        Ok(Self {
            inner: Mutex::new(Inner {
                ring,
                requests: HashMap::new(),
                reaped: Vec::new(),
            }),
            notifier,
            pool,
            router,
            next_id: AtomicU64::new(1),
        })
    }

    fn setup_ring(config: &AfioConfig, eventfd: RawFd) -> Option<BasicIoUring> {
        let ring = match BasicIoUring::new(BasicIoUringConfig {
            sq_entries: config.sq_entries,
        }) {
            Ok(ring) => ring,
            Err(e) => {
                warn!(error = %e, "io_uring unavailable; using the blocking tier");
                return None;
            }
        };
        if let Err(e) = ring.register_eventfd(eventfd) {
            warn!(error = %e, "cannot register eventfd with io_uring; using the blocking tier");
            return None;
        }
        debug!(sq_entries = config.sq_entries, "io_uring ready");
        Some(ring)
    }

    /// Whether any op kind is served by io_uring.
    pub fn uses_uring(&self) -> bool {
        self.router.tier_counts().iouring > 0 && self.lock().ring.is_some()
    }

    pub fn route(&self, kind: OpKind) -> Tier {
        self.router.route(kind).tier
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try the io_uring tier. Gives the op back when it must go to the
    /// blocking tier instead.
    fn submit_ring(
        &self,
        inner: &mut Inner,
        id: u64,
        op: AioOp,
        callback: AioCallback,
    ) -> Result<(), (AioOp, AioCallback)> {
        let Some(ring) = inner.ring.as_mut() else {
            return Err((op, callback));
        };
        let mut landing = Landing::None;
        let Some(sqe) = basic_iouring::build_sqe(&op, &mut landing) else {
            return Err((op, callback));
        };
        if !ring.push(&sqe.user_data(id)) {
            trace!(id, "submission queue full; using the blocking tier");
            return Err((op, callback));
        }
        if let Err(e) = ring.flush() {
            // The SQE stays queued; the next poll retries the flush.
            debug!(error = %e, "io_uring submit deferred");
        }
        let kind = op.kind();
        inner.requests.insert(
            id,
            Request {
                kind,
                tier: Tier::IoUring,
                callback: Some(callback),
                op: Some(op),
                landing,
            },
        );
        trace!(id, ?kind, "submitted to io_uring");
        Ok(())
    }

    /// Reap whatever has settled on both tiers.
    fn collect(&self) -> Ready {
        let mut ready = Vec::new();
        let mut guard = self.lock();
        let Inner {
            ring,
            requests,
            reaped,
        } = &mut *guard;

        if let Some(ring) = ring.as_mut() {
            ring.reap(reaped);
            for (user_data, result) in reaped.drain(..) {
                if user_data == CANCEL_USER_DATA {
                    continue;
                }
                if let Some(request) = requests.remove(&user_data) {
                    let outcome = basic_iouring::complete(request.kind, result, request.landing);
                    settle(request.callback, outcome, &mut ready);
                }
            }
            if ring.has_unsubmitted() {
                if let Err(e) = ring.flush() {
                    debug!(error = %e, "io_uring submit deferred");
                }
            }
        }

        while let Some(done) = self.pool.pop_completion() {
            if let Some(request) = requests.remove(&done.id) {
                settle(request.callback, done.result, &mut ready);
            }
        }
        ready
    }
}

/// Queue a callback, or clean up after a request nobody waits for.
fn settle(callback: Option<AioCallback>, outcome: AioResult, ready: &mut Ready) {
    match callback {
        Some(callback) => ready.push((callback, outcome)),
        None => {
            // A cancelled open that still succeeded: nobody will ever own
            // this descriptor.
            if let Ok(AioOutput::Fd(fd)) = outcome {
                unsafe {
                    libc::close(fd);
                }
            }
        }
    }
}

impl AioBackend for UringAio {
    fn submit(&self, op: AioOp, callback: AioCallback) -> Result<RequestId, TaskError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = op.kind();
        let mut inner = self.lock();

        let (op, callback) = if self.router.route(kind).tier == Tier::IoUring {
            match self.submit_ring(&mut inner, id, op, callback) {
                Ok(()) => return Ok(RequestId(id)),
                Err(back) => back,
            }
        } else {
            (op, callback)
        };

        self.pool.enqueue(id, op)?;
        inner.requests.insert(
            id,
            Request {
                kind,
                tier: Tier::Blocking,
                callback: Some(callback),
                op: None,
                landing: Landing::None,
            },
        );
        trace!(id, ?kind, "submitted to blocking tier");
        Ok(RequestId(id))
    }

    fn cancel(&self, id: RequestId) -> bool {
        let mut guard = self.lock();
        let Inner { ring, requests, .. } = &mut *guard;
        let Some(request) = requests.get_mut(&id.0) else {
            return false;
        };
        if request.callback.take().is_none() {
            return false;
        }
        if request.tier == Tier::IoUring {
            if let Some(ring) = ring.as_mut() {
                ring.cancel(id.0);
            }
        }
        trace!(id = id.0, "request cancelled");
        true
    }

    fn event_fd(&self) -> RawFd {
        self.notifier.fd()
    }

    fn drain_notifications(&self) -> io::Result<u64> {
        self.notifier.drain()
    }

    fn poll(&self) -> usize {
        let mut total = 0;
        loop {
            let ready = self.collect();
            if ready.is_empty() {
                break;
            }
            total += ready.len();
            // Outside the lock: callbacks may submit more work.
            for (callback, outcome) in ready {
                callback(outcome);
            }
        }
        if total > 0 {
            trace!(delivered = total, "completions drained");
        }
        total
    }

    fn nreqs(&self) -> usize {
        self.lock().requests.len()
    }
}

impl Drop for UringAio {
    fn drop(&mut self) {
        // Blocking tier first: it finishes every queued op before joining.
        self.pool.shutdown();
        {
            let mut guard = self.lock();
            let Inner { ring, reaped, .. } = &mut *guard;
            if let Some(ring) = ring.as_mut() {
                ring.wait_idle(reaped);
            }
        }
        // Deliver what settled so no waiter hangs and no descriptor leaks.
        let delivered = self.poll();
        let leftover = self.nreqs();
        if leftover > 0 {
            warn!(leftover, "native requests abandoned at shutdown");
        }
        trace!(delivered, "native facility shut down");
    }
}
