//! Response future
//!
//! A [`ResponseFuture`] joins the arrival of a response on a connection task
//! with whoever waits for the call: blocking callers use
//! [`get_result`](ResponseFuture::get_result), async callers use
//! [`wait`](ResponseFuture::wait). State moves once from `Doing` to either
//! `Done` (response or failure) or `Cancelled` (explicit cancel or timeout);
//! every later transition attempt is a no-op returning `false`, so a response
//! arriving after the caller gave up is silently dropped.
//!
//! The deadline is measured from creation. The waiter that observes the
//! expired deadline performs the transition to `Cancelled` with a
//! [`Error::Timeout`].

use crate::error::{Error, Result};
use futures::channel::oneshot;
use futures::future::{Either, select};
use luix_registry::{Spawner, sync::lock};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Lifecycle state of a future
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Waiting for a response
    Doing,
    /// Completed with a value or a failure
    Done,
    /// Cancelled explicitly or by timeout
    Cancelled,
}

type Listener = Box<dyn FnOnce(&ResponseFuture) + Send>;

struct State {
    status: FutureState,
    result: Option<Value>,
    error: Option<Error>,
    listeners: Vec<Listener>,
    waiters: Vec<oneshot::Sender<()>>,
    completed_at: Option<Instant>,
}

impl State {
    fn outcome(&self, request_id: u64) -> Result<Value> {
        match self.status {
            FutureState::Done => match &self.error {
                Some(error) => Err(error.clone()),
                None => Ok(self.result.clone().unwrap_or(Value::Null)),
            },
            FutureState::Cancelled => Err(self
                .error
                .clone()
                .unwrap_or(Error::Cancelled(request_id))),
            FutureState::Doing => Err(Error::Cancelled(request_id)),
        }
    }
}

struct Inner {
    request_id: u64,
    timeout: Duration,
    created: Instant,
    executor: Option<Arc<dyn Spawner>>,
    state: Mutex<State>,
    completed: Condvar,
}

/// Completion handle of one in-flight request
#[derive(Clone)]
pub struct ResponseFuture {
    inner: Arc<Inner>,
}

impl ResponseFuture {
    /// Future whose listeners run on the completing task
    pub fn new(request_id: u64, timeout: Duration) -> Self {
        Self::build(request_id, timeout, None)
    }

    /// Future whose queued listeners are dispatched through `executor`
    pub fn with_executor(request_id: u64, timeout: Duration, executor: Arc<dyn Spawner>) -> Self {
        Self::build(request_id, timeout, Some(executor))
    }

    fn build(request_id: u64, timeout: Duration, executor: Option<Arc<dyn Spawner>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                request_id,
                timeout,
                created: Instant::now(),
                executor,
                state: Mutex::new(State {
                    status: FutureState::Doing,
                    result: None,
                    error: None,
                    listeners: Vec::new(),
                    waiters: Vec::new(),
                    completed_at: None,
                }),
                completed: Condvar::new(),
            }),
        }
    }

    /// Id of the request this future belongs to
    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Current state
    pub fn state(&self) -> FutureState {
        lock(&self.inner.state).status
    }

    /// Whether the future reached a terminal state
    pub fn is_done(&self) -> bool {
        self.state() != FutureState::Doing
    }

    /// Whether the future was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// Whether the future completed with a value
    pub fn is_success(&self) -> bool {
        let state = lock(&self.inner.state);
        state.status == FutureState::Done && state.error.is_none()
    }

    /// Time between creation and completion, if completed
    pub fn processing_time(&self) -> Option<Duration> {
        lock(&self.inner.state)
            .completed_at
            .map(|at| at.duration_since(self.inner.created))
    }

    fn deadline(&self) -> Instant {
        self.inner
            .created
            .checked_add(self.inner.timeout)
            .unwrap_or_else(|| self.inner.created + Duration::from_secs(365 * 24 * 3600))
    }

    /// Complete with a value; `false` if already terminal
    pub fn on_success(&self, value: Value) -> bool {
        self.complete(FutureState::Done, Some(value), None)
    }

    /// Complete with a failure; `false` if already terminal
    pub fn on_failure(&self, error: Error) -> bool {
        self.complete(FutureState::Done, None, Some(error))
    }

    /// Cancel the request; `false` if already terminal
    pub fn cancel(&self) -> bool {
        self.complete(
            FutureState::Cancelled,
            None,
            Some(Error::Cancelled(self.inner.request_id)),
        )
    }

    fn expire(&self) -> bool {
        let elapsed_ms = self.inner.created.elapsed().as_millis() as u64;
        self.complete(
            FutureState::Cancelled,
            None,
            Some(Error::Timeout {
                request_id: self.inner.request_id,
                elapsed_ms,
            }),
        )
    }

    fn complete(&self, status: FutureState, result: Option<Value>, error: Option<Error>) -> bool {
        let (listeners, waiters) = {
            let mut state = lock(&self.inner.state);
            if state.status != FutureState::Doing {
                return false;
            }
            state.status = status;
            state.result = result;
            state.error = error;
            state.completed_at = Some(Instant::now());
            (
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.waiters),
            )
        };

        self.inner.completed.notify_all();
        for waiter in waiters {
            let _ = waiter.send(());
        }
        for listener in listeners {
            self.dispatch(listener);
        }
        true
    }

    fn dispatch(&self, listener: Listener) {
        match &self.inner.executor {
            Some(executor) => {
                let future = self.clone();
                executor.spawn(Box::pin(async move { listener(&future) }));
            }
            None => listener(self),
        }
    }

    /// Run `listener` on completion
    ///
    /// Listeners added while the future is pending are queued; once the
    /// future is terminal they run immediately on the calling thread.
    pub fn add_listener(&self, listener: impl FnOnce(&ResponseFuture) + Send + 'static) {
        {
            let mut state = lock(&self.inner.state);
            if state.status == FutureState::Doing {
                state.listeners.push(Box::new(listener));
                return;
            }
        }
        listener(self);
    }

    /// Block until the future is terminal or its deadline passes
    pub fn get_result(&self) -> Result<Value> {
        let deadline = self.deadline();
        let mut state = lock(&self.inner.state);
        loop {
            if state.status != FutureState::Doing {
                return state.outcome(self.inner.request_id);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            // wait_timeout may return early; the loop re-checks state and time
            state = self
                .inner
                .completed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(state);

        self.expire();
        lock(&self.inner.state).outcome(self.inner.request_id)
    }

    /// Wait asynchronously until the future is terminal or its deadline passes
    pub async fn wait(&self) -> Result<Value> {
        let completed = {
            let mut state = lock(&self.inner.state);
            if state.status != FutureState::Doing {
                return state.outcome(self.inner.request_id);
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push(sender);
            receiver
        };

        if let Either::Right(_) = select(completed, async_io::Timer::at(self.deadline())).await {
            self.expire();
        }
        lock(&self.inner.state).outcome(self.inner.request_id)
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("request_id", &self.inner.request_id)
            .field("timeout", &self.inner.timeout)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RemoteError;
    use luix_registry::SmolSpawner;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_success_then_cancel_is_noop() {
        let future = ResponseFuture::new(1, Duration::from_secs(1));
        assert!(future.on_success(json!(5)));
        assert!(!future.cancel());
        assert!(!future.on_failure(Error::network("late")));
        assert_eq!(future.state(), FutureState::Done);
        assert_eq!(future.get_result().unwrap(), json!(5));
        assert!(future.processing_time().is_some());
    }

    #[test]
    fn test_success_after_cancel_is_noop() {
        let future = ResponseFuture::new(2, Duration::from_secs(1));
        assert!(future.cancel());
        assert!(!future.cancel());
        assert!(!future.on_success(json!("late")));
        assert!(future.is_cancelled());
        assert!(matches!(future.get_result(), Err(Error::Cancelled(2))));
    }

    #[test]
    fn test_failure_is_returned_to_every_caller() {
        let future = ResponseFuture::new(3, Duration::from_secs(1));
        future.on_failure(Error::Remote(RemoteError::new("IllegalState", "boom")));
        for _ in 0..2 {
            assert!(matches!(
                future.get_result(),
                Err(Error::Remote(ref e)) if e.kind == "IllegalState"
            ));
        }
        assert!(!future.is_success());
    }

    #[test]
    fn test_blocking_timeout_cancels() {
        let future = ResponseFuture::new(4, Duration::from_millis(100));
        let result = future.get_result();
        let waited = future.processing_time().unwrap();

        assert!(matches!(result, Err(Error::Timeout { request_id: 4, .. })));
        assert!(future.is_cancelled());
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(250));
        assert!(!future.on_success(json!(1)));
    }

    #[test]
    fn test_blocking_wait_wakes_on_completion() {
        let future = ResponseFuture::new(5, Duration::from_secs(5));
        let completer = future.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.on_success(json!("done"));
        });
        assert_eq!(future.get_result().unwrap(), json!("done"));
        handle.join().unwrap();
    }

    #[test]
    fn test_listeners_fire_once_and_immediately_after_completion() {
        let future = ResponseFuture::new(6, Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        future.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        future.on_success(json!(null));
        future.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = calls.clone();
        future.add_listener(move |f| {
            assert!(f.is_success());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[smol_potat::test]
    async fn test_async_wait_and_timeout() {
        let future = ResponseFuture::new(7, Duration::from_secs(5));
        let completer = future.clone();
        smol::spawn(async move {
            luix_registry::spawn::sleep(Duration::from_millis(10)).await;
            completer.on_success(json!(1));
        })
        .detach();
        assert_eq!(future.wait().await.unwrap(), json!(1));

        let never = ResponseFuture::new(8, Duration::from_millis(50));
        assert!(matches!(never.wait().await, Err(Error::Timeout { .. })));
        assert!(never.is_cancelled());
    }

    #[smol_potat::test]
    async fn test_executor_dispatches_queued_listeners() {
        let future = ResponseFuture::with_executor(9, Duration::from_secs(1), Arc::new(SmolSpawner));
        let (tx, rx) = async_channel::bounded(1);
        future.add_listener(move |f| {
            let _ = tx.try_send(f.request_id());
        });
        future.on_success(json!(true));
        assert_eq!(rx.recv().await.unwrap(), 9);
    }
}
