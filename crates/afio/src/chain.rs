//! Per-handle write ordering and timeout plumbing shared by both drivers.
//!
//! A [`WriteChain`] is a queue of links. A link pushed onto an idle chain
//! starts before `push` first yields, so its submission precedes whatever
//! the caller does next on the handle. Later links run in their own tokio
//! task once the previous link has settled, so a write keeps its place
//! (and its bookkeeping still runs) even when the caller stops waiting.
//!
//! ```text
//!   write(a) ──► link a ──settled──► link b ──settled──► link c
//!   write(b) ─────────────────────────┘                    │
//!   write(c) ──────────────────────────────────────────────┘
//! ```
//!
//! A failed link fails every link queued behind it. Closing the chain
//! rejects every link that has not started yet. Dropping the future of a
//! queued link withdraws it, which fails the links behind it too.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use afio_core::error::{FileError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::trace;

/// Message of the error every queued write receives on close.
pub const CLOSED_MESSAGE: &str = "The file was closed.";

type Settled = Shared<BoxFuture<'static, bool>>;

#[derive(Default)]
struct ChainState {
    /// Resolves to true when the newest link succeeded.
    tail: Option<Settled>,
    /// Links that have not started; their callers are told on close.
    waiting: HashMap<u64, oneshot::Sender<FileError>>,
    /// Links pushed and not yet settled. Zero means idle.
    outstanding: usize,
    next: u64,
    closed: bool,
}

/// Serializes writes on one handle.
#[derive(Clone, Default)]
pub struct WriteChain {
    state: Arc<Mutex<ChainState>>,
}

impl WriteChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Links queued but not started.
    pub fn pending(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Reject every link that has not started and refuse new ones.
    pub fn close(&self) {
        let waiting: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.waiting.drain().map(|(_, tx)| tx).collect()
        };
        if !waiting.is_empty() {
            trace!(rejected = waiting.len(), "queued writes rejected");
        }
        for tx in waiting {
            let _ = tx.send(FileError::Closed(CLOSED_MESSAGE.into()));
        }
    }

    /// Whether link `id` may start. Removes it from the waiting set.
    fn start(&self, id: u64) -> bool {
        let mut state = self.lock();
        !state.closed && state.waiting.remove(&id).is_some()
    }

    /// Record that a link finished, then wake the link behind it.
    fn settle(&self, settled: oneshot::Sender<bool>, ok: bool) {
        {
            let mut state = self.lock();
            state.outstanding -= 1;
            if state.outstanding == 0 {
                state.tail = None;
            }
        }
        let _ = settled.send(ok);
    }

    /// Queue `link` behind every pending link and wait for its outcome.
    ///
    /// On an idle chain `link` is called before this future first yields.
    /// Otherwise it is only called once the previous link succeeded. With
    /// a `timeout`, the caller is released with `FileError::Timeout` but
    /// the link keeps its place and still runs. Dropping the future before
    /// the link started withdraws it.
    pub async fn push<T, F>(&self, link: F, timeout: Option<Duration>) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (id, previous, settled, rejected) = {
            let mut state = self.lock();
            if state.closed {
                return Err(FileError::Closed(CLOSED_MESSAGE.into()));
            }
            let id = state.next;
            state.next += 1;

            let (settled_tx, settled_rx) = oneshot::channel::<bool>();
            let tail: Settled = settled_rx.map(|ok| ok.unwrap_or(false)).boxed().shared();
            let idle = state.outstanding == 0;
            let previous = state.tail.replace(tail).filter(|_| !idle);
            state.outstanding += 1;

            let rejected = previous.as_ref().map(|_| {
                let (rejected_tx, rejected_rx) = oneshot::channel();
                state.waiting.insert(id, rejected_tx);
                rejected_rx
            });
            (id, previous, settled_tx, rejected)
        };

        let chain = self.clone();
        let task = match previous {
            None => {
                let running = link();
                tokio::spawn(async move {
                    let outcome = running.await;
                    chain.settle(settled, outcome.is_ok());
                    outcome
                })
            }
            Some(previous) => tokio::spawn(async move {
                let outcome = if !previous.await {
                    chain.lock().waiting.remove(&id);
                    Err(FileError::Unwritable("A previous write to the file failed.".into()))
                } else if !chain.start(id) {
                    Err(FileError::Closed(CLOSED_MESSAGE.into()))
                } else {
                    link().await
                };
                chain.settle(settled, outcome.is_ok());
                outcome
            }),
        };

        let withdraw = Withdraw {
            chain: rejected.is_some().then(|| self.clone()),
            id,
        };
        let wait = async move {
            let joined = match rejected {
                Some(rejected) => tokio::select! {
                    joined = task => joined,
                    Ok(err) = rejected => return Err(err),
                },
                None => task.await,
            };
            joined.unwrap_or_else(|e| {
                Err(FileError::Operation {
                    message: format!("The write task failed: {}", e),
                    code: None,
                })
            })
        };
        let outcome = with_timeout(wait, timeout).await;
        withdraw.disarm();
        outcome
    }
}

/// Withdraws a queued link whose caller went away before it started.
struct Withdraw {
    chain: Option<WriteChain>,
    id: u64,
}

impl Withdraw {
    fn disarm(mut self) {
        self.chain = None;
    }
}

impl Drop for Withdraw {
    fn drop(&mut self) {
        if let Some(chain) = self.chain.take() {
            if chain.lock().waiting.remove(&self.id).is_some() {
                trace!(link = self.id, "queued write withdrawn");
            }
        }
    }
}

/// Bound `fut` by `timeout`.
pub async fn with_timeout<T, F>(fut: F, timeout: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| FileError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Run `fut` in its own task so it settles (and its bookkeeping applies)
/// even if the caller times out or drops the returned future.
pub async fn detached<T, F>(fut: F, timeout: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(fut);
    with_timeout(
        async move {
            task.await.unwrap_or_else(|e| {
                Err(FileError::Operation {
                    message: format!("The operation task failed: {}", e),
                    code: None,
                })
            })
        },
        timeout,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(log: &Arc<Mutex<Vec<u32>>>, value: u32, delay: u64) -> BoxFuture<'static, Result<u32>> {
        let log = Arc::clone(log);
        async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            log.lock().unwrap().push(value);
            Ok(value)
        }
        .boxed()
    }

    #[tokio::test]
    async fn links_run_in_issue_order() {
        let chain = WriteChain::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        let (a, b, c) = tokio::join!(
            chain.push(move || record(&l1, 1, 30), None),
            chain.push(move || record(&l2, 2, 10), None),
            chain.push(move || record(&l3, 3, 0), None),
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 2, 3));
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failure_propagates_to_queued_links() {
        let chain = WriteChain::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        let (first, second) = tokio::join!(
            chain.push(
                || async { Err::<(), _>(FileError::Operation { message: "boom".into(), code: None }) }
                    .boxed(),
                None
            ),
            chain.push(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }.boxed()
                },
                None
            ),
        );
        assert!(first.is_err());
        assert!(matches!(second, Err(FileError::Unwritable(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_rejects_queued_links() {
        let chain = WriteChain::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2) = (log.clone(), log.clone());

        let closer = chain.clone();
        let (first, second, _) = tokio::join!(
            chain.push(move || record(&l1, 1, 20), None),
            chain.push(move || record(&l2, 2, 0), None),
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                closer.close();
            },
        );
        assert_eq!(first.unwrap(), 1);
        match second {
            Err(FileError::Closed(message)) => assert_eq!(message, CLOSED_MESSAGE),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert!(chain.push(|| async { Ok(()) }.boxed(), None).await.is_err());
    }

    #[tokio::test]
    async fn idle_link_starts_before_push_yields() {
        let chain = WriteChain::new();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();

        let mut push = Box::pin(chain.push(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }.boxed()
            },
            None,
        ));
        let _ = futures::poll!(push.as_mut());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        push.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_queued_link_never_runs() {
        let chain = WriteChain::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());

        let mut first = Box::pin(chain.push(move || record(&l1, 1, 20), None));
        let mut second = Box::pin(chain.push(move || record(&l2, 2, 0), None));
        let mut third = Box::pin(chain.push(move || record(&l3, 3, 0), None));
        let _ = futures::poll!(first.as_mut());
        let _ = futures::poll!(second.as_mut());
        let _ = futures::poll!(third.as_mut());
        assert_eq!(chain.pending(), 2);

        drop(second);
        assert_eq!(chain.pending(), 1);
        assert_eq!(first.await.unwrap(), 1);
        assert!(matches!(third.await, Err(FileError::Unwritable(_))));
        assert_eq!(*log.lock().unwrap(), vec![1]);

        // Once everything settled the chain starts fresh.
        let l4 = log.clone();
        assert_eq!(chain.push(move || record(&l4, 4, 0), None).await.unwrap(), 4);
        assert_eq!(*log.lock().unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn timed_out_link_still_runs() {
        let chain = WriteChain::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = log.clone();

        let err = chain
            .push(move || record(&l1, 1, 50), Some(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let l2 = log.clone();
        chain.push(move || record(&l2, 2, 0), None).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn detached_work_outlives_its_timeout() {
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        let err = detached(
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Some(Duration::from_millis(1)),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
