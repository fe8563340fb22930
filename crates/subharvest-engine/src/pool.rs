//! Autoscaling worker pool.
//!
//! [`DynamicPool`] feeds a bounded MPMC queue to a variable set of tokio
//! worker tasks. A background autoscaler resizes the set from observed
//! queue depth, task latency, and error rate; a full queue can also trigger
//! one synchronous scale-up inside [`DynamicPool::submit`] so back-pressure
//! is answered immediately. Task panics are trapped and counted as
//! failures; the worker survives.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LATENCY_WINDOW: usize = 100;
const HIGH_ERROR_RATE: f64 = 0.25;
const HIGH_TASK_LATENCY: Duration = Duration::from_secs(2);

/// A unit of work: an async task whose error is counted, not propagated.
pub type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Why a submission was refused.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The queue is full and the pool is already at maximum size.
    #[error("task queue is full")]
    QueueFull,
    /// The pool has been closed.
    #[error("worker pool is closed")]
    Closed,
}

/// Configuration for [`DynamicPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub initial_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_size: usize,
    /// How long a worker may sit idle before the autoscaler reaps it.
    pub idle_timeout: Duration,
    /// Autoscaler tick period.
    pub adjust_period: Duration,
    /// How long `close` waits for busy workers before abandoning them.
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            min_workers: 2,
            max_workers: 20,
            queue_size: 100,
            idle_timeout: Duration::from_secs(30),
            adjust_period: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Replace zero fields with defaults and restore
    /// `min <= initial <= max` ordering.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.initial_workers == 0 {
            self.initial_workers = defaults.initial_workers;
        }
        if self.min_workers == 0 {
            self.min_workers = defaults.min_workers;
        }
        if self.max_workers == 0 {
            self.max_workers = defaults.max_workers;
        }
        if self.queue_size == 0 {
            self.queue_size = defaults.queue_size;
        }
        if self.idle_timeout.is_zero() {
            self.idle_timeout = defaults.idle_timeout;
        }
        if self.adjust_period.is_zero() {
            self.adjust_period = defaults.adjust_period;
        }
        if self.shutdown_grace.is_zero() {
            self.shutdown_grace = defaults.shutdown_grace;
        }
        if self.min_workers > self.initial_workers {
            self.initial_workers = self.min_workers;
        }
        if self.max_workers < self.initial_workers {
            self.max_workers = self.initial_workers;
        }
        self
    }
}

/// Point-in-time view of pool load, used by the autoscaler and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolMetrics {
    pub workers: usize,
    pub queue_depth: usize,
    pub total_tasks: u64,
    pub success_tasks: u64,
    pub error_rate: f64,
    pub avg_latency: Duration,
}

struct WorkerHandle {
    processing: Arc<AtomicBool>,
    idle_since: Arc<Mutex<Instant>>,
    stop: CancellationToken,
    join: JoinHandle<()>,
}

struct PoolInner {
    cfg: PoolConfig,
    tx: async_channel::Sender<Job>,
    rx: async_channel::Receiver<Job>,
    workers: Mutex<HashMap<usize, WorkerHandle>>,
    next_worker_id: AtomicUsize,
    total_tasks: AtomicU64,
    success_tasks: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
    inflight: AtomicUsize,
    idle_notify: Notify,
    closed: AtomicBool,
}

impl PoolInner {
    fn worker_count(&self) -> usize {
        self.workers.lock().expect("pool worker lock poisoned").len()
    }

    fn record_completion(&self, latency: Duration, success: bool) {
        {
            let mut latencies = self.latencies.lock().expect("pool latency lock poisoned");
            if latencies.len() == LATENCY_WINDOW {
                latencies.pop_front();
            }
            latencies.push_back(latency);
        }
        self.total_tasks.fetch_add(1, Ordering::SeqCst);
        if success {
            self.success_tasks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release_inflight(&self) {
        if self.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle_notify.notify_waiters();
        }
    }

    fn metrics(&self) -> PoolMetrics {
        let total = self.total_tasks.load(Ordering::SeqCst);
        let success = self.success_tasks.load(Ordering::SeqCst);
        let error_rate = if total == 0 {
            0.0
        } else {
            1.0 - (success as f64 / total as f64)
        };
        let avg_latency = {
            let latencies = self.latencies.lock().expect("pool latency lock poisoned");
            if latencies.is_empty() {
                Duration::ZERO
            } else {
                latencies.iter().sum::<Duration>() / latencies.len() as u32
            }
        };
        PoolMetrics {
            workers: self.worker_count(),
            queue_depth: self.tx.len(),
            total_tasks: total,
            success_tasks: success,
            error_rate,
            avg_latency,
        }
    }
}

/// Bounded task queue served by an autoscaling set of workers.
pub struct DynamicPool {
    inner: Arc<PoolInner>,
    autoscaler: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl DynamicPool {
    /// Start a pool with `config.initial_workers` workers and a background
    /// autoscaler. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let cfg = config.normalized();
        let (tx, rx) = async_channel::bounded(cfg.queue_size);
        let inner = Arc::new(PoolInner {
            cfg,
            tx,
            rx,
            workers: Mutex::new(HashMap::new()),
            next_worker_id: AtomicUsize::new(0),
            total_tasks: AtomicU64::new(0),
            success_tasks: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            inflight: AtomicUsize::new(0),
            idle_notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        for _ in 0..cfg.initial_workers {
            start_worker(&inner);
        }

        let shutdown = CancellationToken::new();
        let autoscaler = tokio::spawn(autoscale_loop(inner.clone(), shutdown.clone()));

        Self {
            inner,
            autoscaler: Mutex::new(Some(autoscaler)),
            shutdown,
        }
    }

    /// Hand a task to the pool without blocking.
    ///
    /// When the queue is full and the pool is below its maximum size, one
    /// worker is started synchronously and the enqueue retried once.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Closed`] after [`close`](Self::close);
    /// [`SubmitError::QueueFull`] when the queue stays full.
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit_boxed(Box::pin(task))
    }

    /// [`submit`](Self::submit) for an already-boxed job.
    ///
    /// # Errors
    ///
    /// Same contract as [`submit`](Self::submit).
    pub fn submit_boxed(&self, job: Job) -> Result<(), SubmitError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::Closed);
        }

        self.inner.inflight.fetch_add(1, Ordering::SeqCst);
        let job = match self.inner.tx.try_send(job) {
            Ok(()) => return Ok(()),
            Err(async_channel::TrySendError::Closed(_)) => {
                self.inner.release_inflight();
                return Err(SubmitError::Closed);
            }
            Err(async_channel::TrySendError::Full(job)) => job,
        };

        if self.inner.worker_count() < self.inner.cfg.max_workers {
            start_worker(&self.inner);
            if self.inner.tx.try_send(job).is_ok() {
                return Ok(());
            }
        }
        self.inner.release_inflight();
        Err(SubmitError::QueueFull)
    }

    /// Resolve once every queued and executing task has completed. Does not
    /// close the pool.
    pub async fn wait(&self) {
        loop {
            if self.inner.inflight.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.inner.idle_notify.notified();
            if self.inner.inflight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Adjust the worker set toward `size`, clamped to the configured
    /// bounds. Scale-down stops only idle workers, best-effort.
    pub fn resize(&self, size: usize) {
        let size = size.clamp(self.inner.cfg.min_workers, self.inner.cfg.max_workers);
        let current = self.inner.worker_count();
        if size > current {
            for _ in 0..(size - current) {
                start_worker(&self.inner);
            }
        } else if size < current {
            let stopped = stop_idle_workers(&self.inner, current - size, Duration::ZERO);
            if stopped < current - size {
                tracing::info!(
                    requested = size,
                    current,
                    stopped,
                    "could not stop all requested workers, remainder are busy"
                );
            }
        }
        tracing::info!(
            old_size = current,
            new_size = self.inner.worker_count(),
            "pool size adjusted"
        );
    }

    /// Current load snapshot.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    /// Shut the pool down: refuse new submissions, drain the queue, stop
    /// the autoscaler, and join workers within the shutdown grace.
    /// Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        // Workers drain whatever is already queued, then exit.
        self.inner.tx.close();

        let autoscaler = self
            .autoscaler
            .lock()
            .expect("pool autoscaler lock poisoned")
            .take();
        if let Some(handle) = autoscaler {
            let _ = handle.await;
        }

        let joins: Vec<JoinHandle<()>> = {
            let mut workers = self.inner.workers.lock().expect("pool worker lock poisoned");
            workers.drain().map(|(_, handle)| handle.join).collect()
        };
        let drained = futures::future::join_all(joins);
        if tokio::time::timeout(self.inner.cfg.shutdown_grace, drained)
            .await
            .is_err()
        {
            tracing::warn!(
                grace_secs = self.inner.cfg.shutdown_grace.as_secs(),
                "shutdown grace elapsed, abandoning busy workers"
            );
        }
    }
}

fn start_worker(inner: &Arc<PoolInner>) {
    let id = inner.next_worker_id.fetch_add(1, Ordering::SeqCst);
    let processing = Arc::new(AtomicBool::new(false));
    let idle_since = Arc::new(Mutex::new(Instant::now()));
    let stop = CancellationToken::new();
    let join = tokio::spawn(worker_loop(
        inner.clone(),
        id,
        processing.clone(),
        idle_since.clone(),
        stop.clone(),
    ));

    let mut workers = inner.workers.lock().expect("pool worker lock poisoned");
    workers.insert(
        id,
        WorkerHandle {
            processing,
            idle_since,
            stop,
            join,
        },
    );
    tracing::debug!(worker_id = id, total_workers = workers.len(), "started worker");
}

async fn worker_loop(
    inner: Arc<PoolInner>,
    id: usize,
    processing: Arc<AtomicBool>,
    idle_since: Arc<Mutex<Instant>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            job = inner.rx.recv() => {
                let Ok(job) = job else { break };
                processing.store(true, Ordering::SeqCst);
                let started = Instant::now();
                let outcome = AssertUnwindSafe(job).catch_unwind().await;
                let success = match &outcome {
                    Ok(Ok(())) => true,
                    Ok(Err(err)) => {
                        tracing::debug!(worker_id = id, error = %err, "task returned error");
                        false
                    }
                    Err(_) => {
                        tracing::error!(worker_id = id, "task panicked");
                        false
                    }
                };
                inner.record_completion(started.elapsed(), success);
                processing.store(false, Ordering::SeqCst);
                *idle_since.lock().expect("worker idle lock poisoned") = Instant::now();
                inner.release_inflight();
            }
        }
    }

    // The queue-closed exit path has to deregister itself; scale-down paths
    // already removed the entry.
    inner
        .workers
        .lock()
        .expect("pool worker lock poisoned")
        .remove(&id);
    tracing::debug!(worker_id = id, "worker stopped");
}

/// Stop up to `count` workers that have been idle at least `min_idle`.
/// Returns how many were stopped.
fn stop_idle_workers(inner: &Arc<PoolInner>, count: usize, min_idle: Duration) -> usize {
    let mut workers = inner.workers.lock().expect("pool worker lock poisoned");
    let victims: Vec<usize> = workers
        .iter()
        .filter(|(_, w)| {
            !w.processing.load(Ordering::SeqCst)
                && w.idle_since
                    .lock()
                    .expect("worker idle lock poisoned")
                    .elapsed()
                    >= min_idle
        })
        .map(|(id, _)| *id)
        .take(count)
        .collect();

    for id in &victims {
        if let Some(worker) = workers.remove(id) {
            worker.stop.cancel();
            tracing::debug!(worker_id = id, total_workers = workers.len(), "stopped worker");
        }
    }
    victims.len()
}

async fn autoscale_loop(inner: Arc<PoolInner>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.cfg.adjust_period);
    ticker.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                adjust_once(&inner);
            }
        }
    }
}

/// One scaling decision per tick, by fixed priority.
fn adjust_once(inner: &Arc<PoolInner>) {
    let metrics = inner.metrics();
    let cfg = &inner.cfg;

    if metrics.error_rate > HIGH_ERROR_RATE && metrics.workers > cfg.min_workers {
        // Failing upstream: shed concurrency instead of piling on.
        stop_idle_workers(inner, 1, Duration::ZERO);
        tracing::info!(
            workers = inner.worker_count(),
            error_rate = metrics.error_rate,
            "scaled down worker pool on elevated error rate"
        );
    } else if metrics.queue_depth > metrics.workers * 2 && metrics.workers < cfg.max_workers {
        let add = (cfg.max_workers - metrics.workers).min(2);
        for _ in 0..add {
            start_worker(inner);
        }
        tracing::info!(
            workers = inner.worker_count(),
            queue_depth = metrics.queue_depth,
            "scaled up worker pool on queue pressure"
        );
    } else if metrics.avg_latency > HIGH_TASK_LATENCY && metrics.workers < cfg.max_workers {
        start_worker(inner);
        tracing::info!(
            workers = inner.worker_count(),
            avg_latency_ms = metrics.avg_latency.as_millis() as u64,
            "scaled up worker pool on task latency"
        );
    } else if metrics.queue_depth == 0 && metrics.workers > cfg.min_workers {
        let reapable = metrics.workers - cfg.min_workers;
        let stopped = stop_idle_workers(inner, reapable, cfg.idle_timeout);
        if stopped > 0 {
            tracing::info!(
                workers = inner.worker_count(),
                stopped,
                "reaped idle workers"
            );
        }
    }
}
