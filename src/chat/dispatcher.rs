//! Per-identity ordered dispatch with bounded global concurrency.
//!
//! Every identity gets its own bounded queue and a worker task that drains
//! it in order. Workers retire after sitting idle, and a shared semaphore caps
//! how many jobs run at the same time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::reply::ReplySink;
use crate::core::config::DispatchSettings;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("too many pending messages for '{identity}'")]
    QueueFull { identity: String },
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// One inbound message.
pub struct ChatJob {
    pub identity: String,
    pub text: String,
    pub reply: Box<dyn ReplySink>,
}

impl ChatJob {
    pub fn new(
        identity: impl Into<String>,
        text: impl Into<String>,
        reply: Box<dyn ReplySink>,
    ) -> Self {
        Self {
            identity: identity.into(),
            text: text.into(),
            reply,
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, job: ChatJob);
}

struct Queue {
    generation: u64,
    tx: mpsc::Sender<ChatJob>,
}

struct Inner {
    handler: Arc<dyn MessageHandler>,
    queues: Mutex<HashMap<String, Queue>>,
    workers: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    queue_capacity: usize,
    idle_timeout: Duration,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, Queue>> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn workers(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        max_concurrent: usize,
        queue_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                queues: Mutex::new(HashMap::new()),
                workers: Mutex::new(JoinSet::new()),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                queue_capacity: queue_capacity.max(1),
                idle_timeout,
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_settings(handler: Arc<dyn MessageHandler>, settings: &DispatchSettings) -> Self {
        Self::new(
            handler,
            settings.max_concurrent,
            settings.queue_capacity,
            Duration::from_secs(settings.idle_timeout_secs),
        )
    }

    /// Identities that currently have a live worker.
    pub fn active_identities(&self) -> usize {
        self.inner.queues().len()
    }

    /// Enqueues `job` behind earlier jobs of the same identity.
    pub fn submit(&self, job: ChatJob) -> Result<(), DispatchError> {
        // `shutdown` flips `closed` under this lock, so an accepted job always
        // has its worker in the join set before shutdown starts draining.
        let mut queues = self.inner.queues();
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }

        let job = match queues.get(&job.identity) {
            Some(queue) => match queue.tx.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(job)) => {
                    return Err(DispatchError::QueueFull {
                        identity: job.identity,
                    })
                }
                // The worker died; start a fresh one below.
                Err(TrySendError::Closed(job)) => job,
            },
            None => job,
        };

        let identity = job.identity.clone();
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        if tx.try_send(job).is_err() {
            return Err(DispatchError::QueueFull { identity });
        }
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        queues.insert(identity.clone(), Queue { generation, tx });

        let mut workers = self.inner.workers();
        while workers.try_join_next().is_some() {}
        workers.spawn(run_worker(self.inner.clone(), identity, generation, rx));
        Ok(())
    }

    /// Stops accepting jobs, lets queued jobs finish within `grace`, then
    /// aborts whatever is left.
    pub async fn shutdown(&self, grace: Duration) {
        {
            let mut queues = self.inner.queues();
            self.inner.closed.store(true, Ordering::SeqCst);
            // Dropping the senders lets each worker drain its queue and exit.
            queues.clear();
        }

        let mut workers = std::mem::take(&mut *self.inner.workers());
        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                "Dispatcher shutdown grace period elapsed; aborting {} worker(s)",
                workers.len()
            );
            workers.shutdown().await;
        }
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    identity: String,
    generation: u64,
    mut rx: mpsc::Receiver<ChatJob>,
) {
    loop {
        let job = match tokio::time::timeout(inner.idle_timeout, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                // Submitters send under this lock, so an empty queue here stays empty.
                let mut queues = inner.queues();
                if !rx.is_empty() {
                    continue;
                }
                if queues.get(&identity).map(|q| q.generation) == Some(generation) {
                    queues.remove(&identity);
                }
                tracing::debug!("Worker for '{}' retired after idling", identity);
                break;
            }
        };

        let Ok(_permit) = inner.permits.clone().acquire_owned().await else {
            break;
        };
        inner.handler.handle(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::Answer;
    use crate::chat::reply::DeliveryError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct NullReply;

    #[async_trait]
    impl ReplySink for NullReply {
        fn is_open(&self) -> bool {
            true
        }

        async fn expired(&self) {
            std::future::pending().await
        }

        async fn deliver(&self, _answer: &Answer) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn job(identity: &str, text: &str) -> ChatJob {
        ChatJob::new(identity, text, Box::new(NullReply))
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, job: ChatJob) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.seen.lock().unwrap().push((job.identity, job.text));
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Parks every job until released.
    struct Gate {
        started: mpsc::UnboundedSender<String>,
        release: Notify,
    }

    #[async_trait]
    impl MessageHandler for Gate {
        async fn handle(&self, job: ChatJob) {
            let _ = self.started.send(job.text);
            self.release.notified().await;
        }
    }

    #[tokio::test]
    async fn jobs_of_one_identity_run_in_order() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone(), 4, 16, Duration::from_secs(5));

        for i in 0..5 {
            dispatcher.submit(job("u1", &format!("m{}", i))).expect("submit");
        }
        dispatcher.shutdown(Duration::from_secs(5)).await;

        let seen = recorder.seen.lock().unwrap();
        let texts: Vec<&str> = seen.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_across_identities() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone(), 2, 16, Duration::from_secs(5));

        for user in 0..6 {
            for i in 0..2 {
                dispatcher
                    .submit(job(&format!("u{}", user), &format!("m{}", i)))
                    .expect("submit");
            }
        }
        dispatcher.shutdown(Duration::from_secs(10)).await;

        assert_eq!(recorder.seen.lock().unwrap().len(), 12);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn full_queue_is_rejected() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Gate {
            started: started_tx,
            release: Notify::new(),
        });
        let dispatcher = Dispatcher::new(gate.clone(), 4, 1, Duration::from_secs(5));

        dispatcher.submit(job("u1", "first")).expect("submit");
        assert_eq!(started_rx.recv().await.as_deref(), Some("first"));

        dispatcher.submit(job("u1", "second")).expect("queued");
        let err = dispatcher.submit(job("u1", "third")).expect_err("queue holds one");
        assert!(matches!(err, DispatchError::QueueFull { identity } if identity == "u1"));

        // Other identities are unaffected.
        dispatcher.submit(job("u2", "other")).expect("submit");

        gate.release.notify_waiters();
        dispatcher.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn idle_workers_retire_and_respawn() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone(), 2, 4, Duration::from_millis(30));

        dispatcher.submit(job("u1", "a")).expect("submit");
        assert_eq!(dispatcher.active_identities(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatcher.active_identities(), 0);

        dispatcher.submit(job("u1", "b")).expect("respawn");
        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }

    #[derive(Default)]
    struct Counter {
        finished: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Counter {
        async fn handle(&self, _job: ChatJob) {
            tokio::task::yield_now().await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_waits_for_jobs_accepted_during_shutdown() {
        for _ in 0..20 {
            let counter = Arc::new(Counter::default());
            let dispatcher = Dispatcher::new(counter.clone(), 4, 64, Duration::from_secs(5));

            let submitters: Vec<_> = (0..4)
                .map(|t| {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        let mut accepted = 0;
                        for i in 0..200 {
                            match dispatcher.submit(job(&format!("u{}-{}", t, i % 8), "m")) {
                                Ok(()) => accepted += 1,
                                Err(DispatchError::ShuttingDown) => break,
                                Err(DispatchError::QueueFull { .. }) => {}
                            }
                            tokio::task::yield_now().await;
                        }
                        accepted
                    })
                })
                .collect();

            tokio::task::yield_now().await;
            dispatcher.shutdown(Duration::from_secs(10)).await;
            let finished_at_shutdown = counter.finished.load(Ordering::SeqCst);

            let mut accepted = 0;
            for submitter in submitters {
                accepted += submitter.await.expect("submitter");
            }
            assert_eq!(finished_at_shutdown, accepted);
            assert_eq!(dispatcher.active_identities(), 0);
        }
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let dispatcher =
            Dispatcher::new(Arc::new(Recorder::default()), 1, 1, Duration::from_secs(1));
        dispatcher.shutdown(Duration::from_secs(1)).await;
        assert!(matches!(
            dispatcher.submit(job("u1", "late")),
            Err(DispatchError::ShuttingDown)
        ));
    }
}
