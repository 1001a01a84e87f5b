//! # Supervised Fetch Worker
//!
//! Each data kind runs its fetch logic inside its own Tokio task. The owning
//! orchestrator talks to that task only through messages: a bounded request
//! channel carrying a `oneshot` responder, exactly one request in flight.
//!
//! ## Failure handling
//! - **Stall**: no reply within the watchdog window. The task is aborted and a
//!   fresh one is spawned; the cycle counts as failed.
//! - **Crash**: the task panicked (its responder is dropped) or exited. It is
//!   respawned. A panic in a worker never reaches the host process.
//!
//! Fetch failures themselves are the job's business: a job resolves them to an
//! empty/default output, so the only failures seen here are "no answer".

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

/// Unit of fetch work executed inside a worker task.
///
/// `Request` is `()` for global data kinds and a server code for per-server ones.
pub trait FetchJob: Send + Sync + 'static {
    /// Input of one run.
    type Request: Send + 'static;
    /// Result of one run. Failures must already be folded into this value.
    type Output: Send + Sync + 'static;

    /// Performs one fetch.
    fn run(&self, request: Self::Request) -> impl Future<Output = Self::Output> + Send;
}

/// Why a dispatched request produced no result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("worker crashed while handling the request")]
    Crashed,

    #[error("worker was not accepting requests")]
    Unavailable,
}

/// Message sent to the worker task.
struct WorkRequest<J: FetchJob> {
    request: J::Request,
    responder: oneshot::Sender<J::Output>,
}

/// Handle on the isolated task running a [`FetchJob`].
pub struct WorkerUnit<J: FetchJob> {
    kind: String,
    job: Arc<J>,
    tx: mpsc::Sender<WorkRequest<J>>,
    handle: JoinHandle<()>,
    restarts: u64,
}

impl<J: FetchJob> WorkerUnit<J> {
    /// Spawns the worker task for `kind`.
    pub fn spawn(kind: impl Into<String>, job: Arc<J>) -> Self {
        let kind = kind.into();
        let (tx, handle) = Self::start(&kind, Arc::clone(&job));
        Self {
            kind,
            job,
            tx,
            handle,
            restarts: 0,
        }
    }

    /// How many times the task has been recreated.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// True while the task is running.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    fn start(kind: &str, job: Arc<J>) -> (mpsc::Sender<WorkRequest<J>>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<WorkRequest<J>>(1);
        let kind = kind.to_string();

        let handle = tokio::spawn(async move {
            log::debug!("{} worker started", kind);
            while let Some(WorkRequest { request, responder }) = rx.recv().await {
                let output = job.run(request).await;
                // The orchestrator may have given up on us already.
                let _ = responder.send(output);
            }
            log::debug!("{} worker channel closed", kind);
        });

        (tx, handle)
    }

    /// Terminates the current task and spawns a replacement.
    pub fn restart(&mut self, reason: &str) {
        self.handle.abort();
        let (tx, handle) = Self::start(&self.kind, Arc::clone(&self.job));
        self.tx = tx;
        self.handle = handle;
        self.restarts += 1;
        log::warn!(
            "{} worker recreated ({}), restart #{}",
            self.kind,
            reason,
            self.restarts
        );
    }

    /// Sends `request` to the worker and waits at most `watchdog` for the reply.
    ///
    /// Any failure leaves a fresh worker behind, ready for the next cycle.
    pub async fn dispatch(
        &mut self,
        request: J::Request,
        watchdog: Duration,
    ) -> Result<J::Output, WorkerError> {
        if self.handle.is_finished() {
            self.restart("exited between cycles");
        }

        let (responder, reply) = oneshot::channel();
        if self
            .tx
            .try_send(WorkRequest { request, responder })
            .is_err()
        {
            self.restart("request channel unavailable");
            return Err(WorkerError::Unavailable);
        }

        match timeout(watchdog, reply).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(_)) => {
                self.restart("crashed during run");
                Err(WorkerError::Crashed)
            }
            Err(_) => {
                self.restart("watchdog expired");
                Err(WorkerError::Timeout(watchdog))
            }
        }
    }

    /// Waits for `period` while watching the task; a task that dies while idle
    /// is recreated immediately.
    pub async fn supervise_for(&mut self, period: Duration) {
        let deadline = Instant::now() + period;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return,
                joined = &mut self.handle => {
                    let reason = match joined {
                        Err(e) if e.is_panic() => "panicked while idle",
                        Err(_) => "cancelled while idle",
                        Ok(()) => "exited while idle",
                    };
                    self.restart(reason);
                }
            }
        }
    }
}

impl<J: FetchJob> Drop for WorkerUnit<J> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers with the call number; call 1 stalls, call 2 panics.
    struct Flaky {
        calls: AtomicU32,
    }

    impl FetchJob for Flaky {
        type Request = ();
        type Output = u32;

        async fn run(&self, _request: ()) -> u32 {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match call {
                1 => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    call
                }
                2 => panic!("simulated worker fault"),
                _ => call,
            }
        }
    }

    #[tokio::test]
    async fn stalled_and_crashed_workers_are_replaced() {
        let job = Arc::new(Flaky {
            calls: AtomicU32::new(0),
        });
        let mut worker = WorkerUnit::spawn("test", job);
        let watchdog = Duration::from_millis(100);

        assert_eq!(worker.dispatch((), watchdog).await, Ok(0));
        assert_eq!(
            worker.dispatch((), watchdog).await,
            Err(WorkerError::Timeout(watchdog))
        );
        assert_eq!(worker.dispatch((), watchdog).await, Err(WorkerError::Crashed));
        assert_eq!(worker.dispatch((), watchdog).await, Ok(3));
        assert_eq!(worker.restarts(), 2);
        assert!(worker.is_alive());
    }

    #[tokio::test]
    async fn idle_supervision_recreates_dead_task() {
        let job = Arc::new(Flaky {
            calls: AtomicU32::new(0),
        });
        let mut worker = WorkerUnit::spawn("idle", job);
        worker.handle.abort();

        worker.supervise_for(Duration::from_millis(50)).await;

        assert_eq!(worker.restarts(), 1);
        assert!(worker.is_alive());
    }
}
