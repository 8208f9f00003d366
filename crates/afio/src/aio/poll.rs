//! Event-loop registration for the native facility's completion eventfd.
//!
//! One [`PollRegistration`] per driver. Every in-flight request holds a
//! [`Listening`] guard; the first guard spawns the watcher task, dropping
//! the last one aborts it. The watcher drains every ready completion on
//! each wake-up before yielding again.
//!
//! ```text
//!   submit(op) ──► listen() ─► backend.submit ─────┐
//!                     │                             ▼
//!                     └─► watcher: eventfd readable ─► drain ─► backend.poll() ─► callbacks
//! ```

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use afio_core::aio::{AioBackend, AioCallback, AioOp, AioOutput, OpKind, RequestId};
use afio_core::error::TaskError;
use tokio::io::unix::AsyncFd;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Non-owning view of the backend's eventfd.
struct EventFd(RawFd);

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

#[derive(Default)]
struct PollState {
    requests: usize,
    /// Registered once and reused, so a re-spawned watcher never
    /// registers the descriptor twice.
    fd: Option<Arc<AsyncFd<EventFd>>>,
    watcher: Option<JoinHandle<()>>,
}

pub struct PollRegistration {
    backend: Arc<dyn AioBackend>,
    state: Mutex<PollState>,
}

impl PollRegistration {
    pub fn new(backend: Arc<dyn AioBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            state: Mutex::new(PollState::default()),
        })
    }

    pub fn backend(&self) -> &Arc<dyn AioBackend> {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests currently holding the watcher active.
    pub fn requests(&self) -> usize {
        self.lock().requests
    }

    pub fn is_active(&self) -> bool {
        self.lock().watcher.is_some()
    }

    /// Count one more in-flight request, activating the watcher if it is
    /// the first. Needs a tokio runtime.
    pub fn listen(self: &Arc<Self>) -> io::Result<Listening> {
        let runtime = Handle::try_current().map_err(io::Error::other)?;
        let mut state = self.lock();
        if state.watcher.is_none() {
            let fd = match &state.fd {
                Some(fd) => Arc::clone(fd),
                None => {
                    let fd = Arc::new(AsyncFd::new(EventFd(self.backend.event_fd()))?);
                    state.fd = Some(Arc::clone(&fd));
                    fd
                }
            };
            state.watcher = Some(runtime.spawn(watch(Arc::clone(&self.backend), fd)));
            trace!("completion watcher activated");
        }
        state.requests += 1;
        Ok(Listening {
            poll: Arc::clone(self),
        })
    }

    fn done(&self) {
        let mut state = self.lock();
        state.requests = state.requests.saturating_sub(1);
        if state.requests == 0 {
            if let Some(watcher) = state.watcher.take() {
                watcher.abort();
                trace!("completion watcher deactivated");
            }
        }
    }

    /// Hand `op` to the backend now; the returned [`Submitted`] waits for
    /// its completion.
    pub fn submit(self: &Arc<Self>, op: AioOp) -> Result<Submitted, TaskError> {
        let kind = op.kind();
        let listening = self
            .listen()
            .map_err(|e| TaskError::from_io("Could not watch for completions.", &e))?;

        let (tx, rx) = oneshot::channel();
        let id = self.backend.submit(
            op,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        Ok(Submitted {
            rx,
            pending: Pending {
                backend: Arc::clone(&self.backend),
                id,
                armed: true,
            },
            kind,
            listening,
        })
    }

    /// Submit `op` and wait for its completion.
    ///
    /// Dropping the returned future cancels the request; it still settles
    /// inside the facility.
    pub async fn request(self: &Arc<Self>, op: AioOp) -> Result<AioOutput, TaskError> {
        self.submit(op)?.wait().await
    }

    /// Submit `op` without waiting. The watcher stays active until it
    /// settles; without a runtime the result is picked up by a later poll.
    pub fn submit_detached(
        self: &Arc<Self>,
        op: AioOp,
        on_done: impl FnOnce(Result<AioOutput, TaskError>) + Send + 'static,
    ) -> Result<RequestId, TaskError> {
        let listening = self.listen().ok();
        let callback: AioCallback = Box::new(move |result| {
            drop(listening);
            on_done(result);
        });
        self.backend.submit(op, callback)
    }
}

impl Drop for PollRegistration {
    fn drop(&mut self) {
        let mut state = self.lock();
        if let Some(watcher) = state.watcher.take() {
            watcher.abort();
        }
        state.fd = None;
    }
}

/// Keeps the watcher active while alive.
pub struct Listening {
    poll: Arc<PollRegistration>,
}

impl Drop for Listening {
    fn drop(&mut self) {
        self.poll.done();
    }
}

/// A request the backend accepted. Dropping it before it settles cancels
/// the request.
pub struct Submitted {
    rx: oneshot::Receiver<Result<AioOutput, TaskError>>,
    pending: Pending,
    kind: OpKind,
    listening: Listening,
}

impl Submitted {
    pub async fn wait(self) -> Result<AioOutput, TaskError> {
        let Submitted {
            rx,
            pending,
            kind,
            listening,
        } = self;
        let result = rx.await;
        pending.disarm();
        drop(listening);
        result.unwrap_or_else(|_| {
            Err(TaskError::new(format!(
                "{} The request was abandoned.",
                kind.failure_context()
            )))
        })
    }
}

/// Cancels its request unless disarmed.
struct Pending {
    backend: Arc<dyn AioBackend>,
    id: RequestId,
    armed: bool,
}

impl Pending {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if self.armed {
            trace!(id = self.id.0, "native request dropped; cancelling");
            self.backend.cancel(self.id);
        }
    }
}

async fn watch(backend: Arc<dyn AioBackend>, fd: Arc<AsyncFd<EventFd>>) {
    loop {
        let mut guard = match fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "completion watcher stopped");
                return;
            }
        };
        // Readiness is only cleared when the counter reads empty, so a
        // completion signalled after the drain wakes us again.
        match guard.try_io(|_| backend.drain_notifications()) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "eventfd drain failed"),
            Err(_would_block) => continue,
        }
        backend.poll();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afio_core::AfioConfig;
    use afio_module::UringAio;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    fn registration() -> Arc<PollRegistration> {
        let backend = UringAio::new(&AfioConfig::new().blocking_threads(1)).unwrap();
        PollRegistration::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn watcher_follows_request_count() {
        let poll = registration();
        assert!(!poll.is_active());

        let first = poll.listen().unwrap();
        let second = poll.listen().unwrap();
        assert!(poll.is_active());
        assert_eq!(poll.requests(), 2);

        drop(first);
        assert!(poll.is_active());
        drop(second);
        assert!(!poll.is_active());

        // Reactivation reuses the registered descriptor.
        let again = poll.listen().unwrap();
        assert!(poll.is_active());
        drop(again);
    }

    #[tokio::test]
    async fn request_round_trip() {
        let poll = registration();
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("sub").as_os_str().as_bytes()).unwrap();

        let output = poll
            .request(AioOp::Mkdir { path: path.clone(), mode: 0o755 })
            .await
            .unwrap();
        assert_eq!(output, AioOutput::Done);
        assert_eq!(poll.requests(), 0);
        assert!(!poll.is_active());

        let err = poll.request(AioOp::Mkdir { path, mode: 0o755 }).await.unwrap_err();
        assert_eq!(err.code, Some(libc::EEXIST));
    }

    #[tokio::test]
    async fn submit_hands_the_op_over_before_waiting() {
        let poll = registration();
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let path = CString::new(sub.as_os_str().as_bytes()).unwrap();

        let submitted = poll.submit(AioOp::Mkdir { path, mode: 0o755 }).unwrap();
        assert_eq!(poll.requests(), 1);
        assert_eq!(submitted.wait().await.unwrap(), AioOutput::Done);
        assert!(sub.is_dir());
        assert_eq!(poll.requests(), 0);
    }

    #[test]
    fn listen_needs_a_runtime() {
        let poll = registration();
        assert!(poll.listen().is_err());
    }
}
