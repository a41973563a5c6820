//! Bounded worker pool.
//!
//! `core_size` workers start eagerly and pull tasks from a shared queue. A
//! task is admitted while fewer than `core_size + queue_capacity` admitted
//! tasks are unfinished, so idle core workers always count as capacity. Past
//! that a burst worker is started, up to `max_size` live workers; it runs the
//! submitted task and then drains the queue before exiting. Beyond that the
//! rejection policy decides: wait for capacity, or refuse the task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ferry_core::RejectionPolicy;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Task = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub rejection_policy: RejectionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("all {workers} workers busy and {queued} tasks queued")]
    Rejected { workers: usize, queued: usize },
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Resolves to the task's output once. Errors if the task panicked.
pub type TaskHandle<T> = oneshot::Receiver<T>;

struct Shared {
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Task>>,
    live: AtomicUsize,
}

pub struct WorkerPool {
    config: PoolConfig,
    sender: mpsc::UnboundedSender<Task>,
    /// One permit per unfinished task taken through the queue.
    admission: Arc<Semaphore>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start the pool. Must be called inside a tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let core_size = config.core_size.max(1);
        let config = PoolConfig {
            core_size,
            max_size: config.max_size.max(core_size),
            queue_capacity: config.queue_capacity.max(1),
            rejection_policy: config.rejection_policy,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            queue: tokio::sync::Mutex::new(receiver),
            live: AtomicUsize::new(core_size),
        });

        let workers = (0..core_size)
            .map(|id| tokio::spawn(core_worker(id, Arc::clone(&shared))))
            .collect();

        debug!(
            "Worker pool started: core={}, max={}, queue={}, policy={:?}",
            config.core_size, config.max_size, config.queue_capacity, config.rejection_policy
        );

        Self {
            config,
            sender,
            admission: Arc::new(Semaphore::new(core_size + config.queue_capacity)),
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Number of workers currently alive (core plus burst).
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Submit a task. The returned handle yields its output exactly once.
    pub async fn submit<F>(&self, fut: F) -> Result<TaskHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let permit = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(PoolError::ShutDown),
            Err(TryAcquireError::NoPermits) if self.try_reserve_burst_slot() => {
                let handle = tokio::spawn(burst_worker(
                    into_task(fut, tx, None),
                    Arc::clone(&self.shared),
                ));
                self.track(handle);
                return Ok(rx);
            }
            Err(TryAcquireError::NoPermits) => match self.config.rejection_policy {
                RejectionPolicy::Block => Arc::clone(&self.admission)
                    .acquire_owned()
                    .await
                    .map_err(|_| PoolError::ShutDown)?,
                RejectionPolicy::Reject => {
                    return Err(PoolError::Rejected {
                        workers: self.live_workers(),
                        queued: self.config.queue_capacity,
                    })
                }
            },
        };

        self.sender
            .send(into_task(fut, tx, Some(permit)))
            .map_err(|_| PoolError::ShutDown)?;
        Ok(rx)
    }

    /// Close the queue, let queued and running tasks finish, and join every
    /// worker.
    pub async fn shutdown(self) {
        let WorkerPool {
            sender,
            admission,
            workers,
            ..
        } = self;
        drop(sender);
        admission.close();

        let handles = match workers.into_inner() {
            Ok(handles) => handles,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        debug!("Worker pool shut down");
    }

    fn try_reserve_burst_slot(&self) -> bool {
        let max = self.config.max_size;
        self.shared
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max).then_some(live + 1)
            })
            .is_ok()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
    }
}

/// Box a future so its output goes to `tx`. The admission permit, if any,
/// is released once the future finishes or panics.
fn into_task<F>(
    fut: F,
    tx: oneshot::Sender<F::Output>,
    permit: Option<OwnedSemaphorePermit>,
) -> Task
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    async move {
        let _permit = permit;
        let _ = tx.send(fut.await);
    }
    .boxed()
}

/// Run a task, containing any panic so the worker survives it. The task's
/// result sender is dropped on panic, which the submitter observes.
async fn run_task(task: Task) {
    if AssertUnwindSafe(task).catch_unwind().await.is_err() {
        warn!("Task panicked; its submitter will see a lost result");
    }
}

async fn core_worker(id: usize, shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().await;
            queue.recv().await
        };
        match task {
            Some(task) => run_task(task).await,
            None => break,
        }
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
    debug!("Core worker {} exiting", id);
}

async fn burst_worker(first: Task, shared: Arc<Shared>) {
    run_task(first).await;
    loop {
        // A core worker holding the lock is parked on an empty queue.
        let task = match shared.queue.try_lock() {
            Ok(mut queue) => queue.try_recv().ok(),
            Err(_) => None,
        };
        match task {
            Some(task) => run_task(task).await,
            None => break,
        }
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
    debug!("Burst worker exiting");
}
