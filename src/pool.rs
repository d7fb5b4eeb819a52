// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The worker pool: the supervisor that owns N workers, one listener, and
//! one reset-locked ticker, and exposes the shutdown API that ties them
//! together.
//!
//! Pool state mutations are serialized behind a single `tokio::sync::Mutex`
//! owning the pool struct, rather than an actor/message-passing split.
//! Cheap, frequent reads (`is_active`) go through a plain `AtomicBool` kept
//! in lockstep with the mutex-guarded state so the listener/ticker hot loops
//! don't need to `.await` a lock just to check whether they should keep
//! running.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::collaborators::{FailJobs, JobWorker, ResetLockedAt, WorkerFactory};
use crate::config::{PoolConfig, TermSignal, DANGEROUS_LOGS_ENV_VAR};
use crate::error::{PoolError, TickerError};
use crate::events::{EventBus, PoolEvent};
use crate::metrics::Metrics;
use crate::signal_broker::{ShutdownIntent, SignalBroker, SignalSubscription};
use crate::{listener, ticker};

/// Process exit code a caller should use after [`WorkerPool::completion`]
/// resolves, set to `54` the moment a `jobs:migrate` notification is
/// observed. `0` means no migration was detected.
pub(crate) static MIGRATION_EXIT_CODE: AtomicI32 = AtomicI32::new(0);

/// Reads the exit code set by [`MIGRATION_EXIT_CODE`]. Intended to be
/// consulted once [`WorkerPool::completion`] resolves.
pub fn exit_code() -> i32 {
    MIGRATION_EXIT_CODE.load(Ordering::SeqCst)
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);
static REGISTRY: OnceLock<std::sync::Mutex<HashSet<u64>>> = OnceLock::new();

fn registry() -> &'static std::sync::Mutex<HashSet<u64>> {
    REGISTRY.get_or_init(|| std::sync::Mutex::new(HashSet::new()))
}

/// Number of pools currently registered (i.e. not yet `terminate()`d). A
/// pool is registered in the process-global pool registry iff
/// `terminated == false`.
pub fn registered_pool_count() -> usize {
    registry().lock().expect("registry mutex poisoned").len()
}

fn register(id: u64) {
    registry().lock().expect("registry mutex poisoned").insert(id);
}

fn deregister(id: u64) {
    registry().lock().expect("registry mutex poisoned").remove(&id);
}

fn is_registered(id: u64) -> bool {
    registry().lock().expect("registry mutex poisoned").contains(&id)
}

/// The terminal value of a pool's [`WorkerPool::completion`]: the outcome of
/// the most recently completed reset-locked tick, deliberately surfaced even
/// when it predates termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Ok,
    Err(Arc<str>),
}

struct PoolState {
    shutting_down: bool,
    forceful_started: bool,
    terminated: bool,
    listener_task: Option<JoinHandle<()>>,
    ticker_task: Option<JoinHandle<()>>,
    signal_task: Option<JoinHandle<()>>,
}

struct PoolShared {
    id: u64,
    config: PoolConfig,
    pg_pool: PgPool,
    workers: Vec<Arc<dyn JobWorker>>,
    events: EventBus,
    abort: CancellationToken,
    deactivated: CancellationToken,
    active: AtomicBool,
    release_warned: AtomicBool,
    reset_locked_at: Arc<dyn ResetLockedAt>,
    fail_jobs: Arc<dyn FailJobs>,
    metrics: Metrics,
    tick_lock: tokio::sync::Mutex<()>,
    last_reset_locked_outcome: tokio::sync::Mutex<CompletionOutcome>,
    completion_tx: watch::Sender<Option<CompletionOutcome>>,
    completion_rx: watch::Receiver<Option<CompletionOutcome>>,
    state: tokio::sync::Mutex<PoolState>,
}

/// A supervisor owning a fixed-size set of workers, one listener, and one
/// reset-locked ticker. Cheaply `Clone`able; clones share the same
/// underlying pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolShared>,
}

impl WorkerPool {
    /// Constructs a pool, spawns its `concurrency` workers via
    /// `worker_factory`, and starts its listener and ticker. Fails if
    /// `config` doesn't validate or the process-wide signal broker has
    /// already latched a shutdown — pools added after a latch is set are
    /// rejected.
    pub async fn new(
        config: PoolConfig,
        pg_pool: PgPool,
        worker_factory: Arc<dyn WorkerFactory>,
        reset_locked_at: Arc<dyn ResetLockedAt>,
        fail_jobs: Arc<dyn FailJobs>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let abort = CancellationToken::new();
        let deactivated = CancellationToken::new();

        let workers: Vec<Arc<dyn JobWorker>> = (0..config.concurrency)
            .map(|i| worker_factory.spawn(i, abort.child_token()))
            .collect();

        if std::env::var(DANGEROUS_LOGS_ENV_VAR).as_deref() == Ok("1") {
            debug!(pool_id = id, concurrency = config.concurrency, no_handle_signals = config.no_handle_signals, "effective pool configuration");
        }

        let (completion_tx, completion_rx) = watch::channel::<Option<CompletionOutcome>>(None);
        let metrics = Metrics::new();
        metrics.active_workers.set(workers.len() as i64);

        let inner = Arc::new(PoolShared {
            id,
            events: EventBus::new(id),
            workers,
            pg_pool,
            abort,
            deactivated,
            active: AtomicBool::new(true),
            release_warned: AtomicBool::new(false),
            reset_locked_at,
            fail_jobs,
            metrics,
            tick_lock: tokio::sync::Mutex::new(()),
            last_reset_locked_outcome: tokio::sync::Mutex::new(CompletionOutcome::Ok),
            completion_tx,
            completion_rx,
            config,
            state: tokio::sync::Mutex::new(PoolState {
                shutting_down: false,
                forceful_started: false,
                terminated: false,
                listener_task: None,
                ticker_task: None,
                signal_task: None,
            }),
        });

        let pool = WorkerPool { inner };
        register(id);
        pool.inner.events.emit(PoolEvent::Create);

        let listener_task = tokio::spawn(listener::run(pool.clone()));
        let ticker_task = tokio::spawn(ticker::run(pool.clone()));
        {
            let mut state = pool.inner.state.lock().await;
            state.listener_task = Some(listener_task);
            state.ticker_task = Some(ticker_task);
        }

        if !pool.inner.config.no_handle_signals {
            let sub = SignalBroker::global().subscribe(&TermSignal::ALL).await?;
            let signal_task = tokio::spawn(watch_signals(pool.clone(), sub));
            pool.inner.state.lock().await.signal_task = Some(signal_task);
        }

        tokio::spawn(watch_abort(pool.clone()));

        Ok(pool)
    }

    pub fn pool_id(&self) -> u64 {
        self.inner.id
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn abort_signal(&self) -> &CancellationToken {
        &self.inner.abort
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// The registry backing this pool's metrics. Scraping/serving it over
    /// HTTP is the caller's concern.
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.inner.metrics.registry()
    }

    pub(crate) fn pg_pool(&self) -> &PgPool {
        &self.inner.pg_pool
    }

    pub(crate) fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivated(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.inner.deactivated.cancelled()
    }

    pub(crate) fn nudge_first_worker(&self) -> bool {
        self.inner.workers.iter().any(|w| w.nudge())
    }

    pub(crate) async fn run_reset_locked_tick(&self) -> Result<(), TickerError> {
        let _guard = self.inner.tick_lock.lock().await;
        let result = self.inner.reset_locked_at.reset_locked_at(&self.inner.pg_pool).await;
        let outcome = match &result {
            Ok(()) => CompletionOutcome::Ok,
            Err(e) => CompletionOutcome::Err(Arc::from(e.to_string())),
        };
        *self.inner.last_reset_locked_outcome.lock().await = outcome;
        result
    }

    async fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().await.shutting_down
    }

    /// Stops timers and the listener. Idempotent; subsequent calls are a
    /// no-op. Does not touch workers.
    async fn deactivate(&self) {
        let mut state = self.inner.state.lock().await;
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.deactivated.cancel();
        if let Some(listener_task) = state.listener_task.take() {
            listener_task.abort();
        }
        drop(state);
        self.inner.events.emit(PoolEvent::Release);
    }

    /// Idempotent; the first call performs the shutdown, later calls log and
    /// return immediately.
    pub async fn graceful_shutdown<M: Into<Arc<str>>>(&self, message: Option<M>) {
        let message: Option<Arc<str>> = message.map(Into::into);
        {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                info!(pool_id = self.inner.id, "graceful shutdown already in progress; ignoring duplicate call");
                return;
            }
            state.shutting_down = true;
        }

        let abort = self.inner.abort.clone();
        let abort_timeout = self.inner.config.graceful_shutdown_abort_timeout;
        let abort_timer = tokio::spawn(async move {
            tokio::time::sleep(abort_timeout).await;
            abort.cancel();
        });

        self.inner.events.emit(PoolEvent::GracefulShutdown { message: message.clone() });

        let result = self.run_graceful_shutdown_body(message).await;
        abort_timer.abort();

        match result {
            Ok(()) => {
                self.inner.events.emit(PoolEvent::GracefulShutdownComplete);
                self.terminate().await;
            }
            Err(e) => {
                self.inner.events.emit(PoolEvent::GracefulShutdownError { message: Arc::from(e.to_string()) });
                self.forceful_shutdown(e.to_string()).await;
            }
        }
    }

    async fn run_graceful_shutdown_body(&self, message: Option<Arc<str>>) -> Result<(), PoolError> {
        self.deactivate().await;

        let settlements = futures::future::join_all(self.inner.workers.iter().cloned().map(|w| async move {
            let result = w.release().await;
            (w, result)
        }))
        .await;

        let mut worker_ids = Vec::new();
        let mut to_release = Vec::new();
        for (worker, result) in settlements {
            if let Err(e) = result {
                self.inner.events.emit(PoolEvent::GracefulShutdownWorkerError {
                    worker_id: Arc::from(worker.worker_id()),
                    message: Arc::from(e.to_string()),
                });
                if let Some(job) = worker.active_job().await {
                    worker_ids.push(worker.worker_id().to_string());
                    to_release.push(job);
                }
            }
        }

        if !to_release.is_empty() {
            let message =
                message.unwrap_or_else(|| Arc::from("worker failed to release during graceful shutdown"));
            let failed = self
                .inner
                .fail_jobs
                .fail_jobs(&self.inner.pg_pool, &worker_ids, &to_release, &message)
                .await?;
            info!(pool_id = self.inner.id, count = failed.len(), "failed jobs left behind by unreleased workers");
        }

        Ok(())
    }

    /// Stops accepting, marks in-flight jobs failed, and terminates
    /// immediately. Errors are logged and emitted but never re-escalate.
    pub async fn forceful_shutdown<M: Into<Arc<str>>>(&self, message: M) {
        let message: Arc<str> = message.into();
        {
            let mut state = self.inner.state.lock().await;
            if state.forceful_started {
                info!(pool_id = self.inner.id, "forceful shutdown already in progress; ignoring duplicate call");
                return;
            }
            state.forceful_started = true;
        }

        self.inner.events.emit(PoolEvent::ForcefulShutdown { message: message.clone() });
        self.deactivate().await;

        let mut worker_ids = Vec::new();
        let mut active_jobs = Vec::new();
        for worker in &self.inner.workers {
            if let Some(job) = worker.active_job().await {
                worker_ids.push(worker.worker_id().to_string());
                active_jobs.push(job);
            }
        }

        // Release results are ignored, but still awaited (rather than
        // firing-and-forgetting) so a worker's release has genuinely
        // finished before the process moves on.
        let _ = futures::future::join_all(self.inner.workers.iter().map(|w| w.release())).await;

        if !active_jobs.is_empty() {
            match self.inner.fail_jobs.fail_jobs(&self.inner.pg_pool, &worker_ids, &active_jobs, &message).await {
                Ok(failed) => info!(pool_id = self.inner.id, count = failed.len(), "forcefully failed in-flight jobs"),
                Err(e) => self.inner.events.emit(PoolEvent::ForcefulShutdownError { message: Arc::from(e.to_string()) }),
            }
        }

        self.inner.events.emit(PoolEvent::ForcefulShutdownComplete);
        self.terminate().await;
    }

    /// Deprecated alias for [`Self::graceful_shutdown`]. Logs a deprecation
    /// notice the first time it's called, then delegates.
    pub async fn release<M: Into<Arc<str>>>(&self, message: Option<M>) {
        if !self.inner.release_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(pool_id = self.inner.id, "WorkerPool::release() is deprecated; call graceful_shutdown() instead");
        }
        self.graceful_shutdown(message).await;
    }

    /// Runs exactly once per pool: deregisters it, resolves `completion`
    /// with whatever the reset-locked in-flight tick settled to (or the last
    /// completed tick's outcome if none was in flight), and releases the
    /// signal-broker subscription. A second call logs and is a no-op.
    pub async fn terminate(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.terminated {
                tracing::error!(pool_id = self.inner.id, "terminate() called more than once; ignoring");
                return;
            }
            state.terminated = true;
        }

        deregister(self.inner.id);

        // Block on the tick lock so an in-flight reset-locked tick finishes
        // and records its outcome before we read it.
        let _guard = self.inner.tick_lock.lock().await;
        let outcome = self.inner.last_reset_locked_outcome.lock().await.clone();
        let _ = self.inner.completion_tx.send(Some(outcome));

        let signal_task = self.inner.state.lock().await.signal_task.take();
        if let Some(task) = signal_task {
            task.abort();
        }
    }

    /// Awaits termination and returns the most recent reset-locked outcome;
    /// the value mirrors the most recent reset-locked result.
    pub async fn completion(&self) -> CompletionOutcome {
        let mut rx = self.inner.completion_rx.clone();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return CompletionOutcome::Ok;
            }
        }
    }
}

async fn watch_signals(pool: WorkerPool, mut sub: SignalSubscription) {
    while let Some(intent) = sub.recv().await {
        match intent {
            ShutdownIntent::Graceful(message) => pool.graceful_shutdown(message).await,
            ShutdownIntent::Forceful(message) => pool.forceful_shutdown(message).await,
        }
        sub.ack().await;
    }
}

async fn watch_abort(pool: WorkerPool) {
    pool.inner.abort.clone().cancelled().await;
    if !pool.is_shutting_down().await {
        pool.graceful_shutdown(Some("abort signal triggered")).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::collaborators::JobRef;

    struct FakeWorker {
        id: String,
        nudged: Arc<StdAtomicBool>,
        accept_nudge: bool,
    }

    #[async_trait]
    impl JobWorker for FakeWorker {
        fn worker_id(&self) -> &str {
            &self.id
        }

        fn nudge(&self) -> bool {
            self.nudged.store(true, Ordering::SeqCst);
            self.accept_nudge
        }

        async fn active_job(&self) -> Option<JobRef> {
            None
        }

        async fn release(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
            Ok(())
        }
    }

    struct FakeWorkerFactory {
        nudged: Arc<StdAtomicBool>,
    }

    impl WorkerFactory for FakeWorkerFactory {
        fn spawn(&self, worker_index: usize, _abort: CancellationToken) -> Arc<dyn JobWorker> {
            Arc::new(FakeWorker {
                id: format!("worker-{worker_index}"),
                nudged: self.nudged.clone(),
                accept_nudge: worker_index == 0,
            })
        }
    }

    struct FakeResetLockedAt;

    #[async_trait]
    impl ResetLockedAt for FakeResetLockedAt {
        async fn reset_locked_at(&self, _pool: &PgPool) -> Result<(), TickerError> {
            Ok(())
        }
    }

    struct FakeFailJobs;

    #[async_trait]
    impl FailJobs for FakeFailJobs {
        async fn fail_jobs(
            &self,
            _pool: &PgPool,
            _worker_ids: &[String],
            _jobs: &[JobRef],
            _message: &str,
        ) -> Result<Vec<JobRef>, PoolError> {
            Ok(Vec::new())
        }
    }

    /// A lazy pool never touches the network until a query is issued, which
    /// none of these tests' fake collaborators do, so the tests run with no
    /// live Postgres instance.
    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/does-not-exist")
            .expect("lazy pool construction never touches the network")
    }

    async fn build_pool(concurrency: usize) -> (WorkerPool, Arc<StdAtomicBool>) {
        let nudged = Arc::new(StdAtomicBool::new(false));
        let config = PoolConfig {
            concurrency,
            no_handle_signals: true,
            ..PoolConfig::default()
        };
        let pool = WorkerPool::new(
            config,
            lazy_pool(),
            Arc::new(FakeWorkerFactory { nudged: nudged.clone() }),
            Arc::new(FakeResetLockedAt),
            Arc::new(FakeFailJobs),
        )
        .await
        .unwrap();
        (pool, nudged)
    }

    #[tokio::test]
    async fn graceful_shutdown_emits_expected_events_and_deregisters() {
        let (pool, _nudged) = build_pool(2).await;
        // `Create` was already emitted during construction, before this test
        // could subscribe, so it's not in the captured stream below.
        let mut events = pool.events().subscribe();

        pool.graceful_shutdown(Some("bye")).await;

        let mut seen = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            seen.push(envelope.event);
        }
        assert!(matches!(seen.first(), Some(PoolEvent::GracefulShutdown { .. })));
        assert!(seen.iter().any(|e| matches!(e, PoolEvent::Release)));
        assert!(matches!(seen.last(), Some(PoolEvent::GracefulShutdownComplete)));
        assert_eq!(pool.completion().await, CompletionOutcome::Ok);
    }

    #[tokio::test]
    async fn graceful_shutdown_is_idempotent() {
        let (pool, _nudged) = build_pool(1).await;
        pool.graceful_shutdown(Some("first")).await;
        pool.graceful_shutdown(Some("second")).await;
        assert_eq!(pool.completion().await, CompletionOutcome::Ok);
    }

    #[tokio::test]
    async fn nudge_first_worker_returns_true_when_a_worker_accepts() {
        let (pool, nudged) = build_pool(2).await;
        assert!(pool.nudge_first_worker());
        assert!(nudged.load(Ordering::SeqCst));
        pool.graceful_shutdown(Some("done")).await;
    }

    #[tokio::test]
    async fn concurrency_zero_shuts_down_trivially() {
        let (pool, _nudged) = build_pool(0).await;
        assert!(!pool.nudge_first_worker());
        pool.graceful_shutdown(Some("done")).await;
        assert_eq!(pool.completion().await, CompletionOutcome::Ok);
    }

    #[tokio::test]
    async fn forceful_shutdown_after_graceful_is_safe() {
        let (pool, _nudged) = build_pool(1).await;
        pool.graceful_shutdown(Some("first")).await;
        pool.forceful_shutdown("second").await;
        assert_eq!(pool.completion().await, CompletionOutcome::Ok);
    }

    #[tokio::test]
    async fn terminate_deregisters_the_pool() {
        let (pool, _nudged) = build_pool(1).await;
        assert!(is_registered(pool.pool_id()));
        pool.graceful_shutdown(Some("done")).await;
        assert!(!is_registered(pool.pool_id()));
    }

    #[tokio::test]
    async fn abort_signal_triggers_graceful_shutdown() {
        let (pool, _nudged) = build_pool(1).await;
        pool.abort_signal().cancel();
        // `watch_abort` reacts to the cancellation asynchronously; poll
        // completion rather than a fixed sleep.
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), pool.completion())
            .await
            .expect("abort signal should have driven the pool to completion");
        assert_eq!(outcome, CompletionOutcome::Ok);
    }

    struct FailingThenSucceedingResetLockedAt {
        calls: StdAtomicBool,
    }

    #[async_trait]
    impl ResetLockedAt for FailingThenSucceedingResetLockedAt {
        async fn reset_locked_at(&self, _pool: &PgPool) -> Result<(), TickerError> {
            if self.calls.swap(true, Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TickerError::Database(sqlx::Error::RowNotFound))
            }
        }
    }

    #[tokio::test]
    async fn run_reset_locked_tick_records_failure_then_success() {
        let config = PoolConfig { concurrency: 0, no_handle_signals: true, ..PoolConfig::default() };
        let pool = WorkerPool::new(
            config,
            lazy_pool(),
            Arc::new(FakeWorkerFactory { nudged: Arc::new(StdAtomicBool::new(false)) }),
            Arc::new(FailingThenSucceedingResetLockedAt { calls: StdAtomicBool::new(false) }),
            Arc::new(FakeFailJobs),
        )
        .await
        .unwrap();

        assert!(pool.run_reset_locked_tick().await.is_err());
        pool.graceful_shutdown(Some("done")).await;
        // `terminate()` surfaces whichever tick outcome was last recorded;
        // only one tick ran here, and it failed.
        assert!(matches!(pool.completion().await, CompletionOutcome::Err(_)));
    }

    struct BlockingResetLockedAt {
        notify: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl ResetLockedAt for BlockingResetLockedAt {
        async fn reset_locked_at(&self, _pool: &PgPool) -> Result<(), TickerError> {
            self.notify.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn ticker_emits_terminal_event_with_no_next_delay_when_deactivated_mid_tick() {
        let notify = Arc::new(tokio::sync::Notify::new());
        let config = PoolConfig {
            concurrency: 0,
            no_handle_signals: true,
            reset_locked: crate::config::ResetLockedConfig {
                min_interval: std::time::Duration::from_millis(1),
                max_interval: std::time::Duration::from_millis(1),
            },
            ..PoolConfig::default()
        };
        let pool = WorkerPool::new(
            config,
            lazy_pool(),
            Arc::new(FakeWorkerFactory { nudged: Arc::new(StdAtomicBool::new(false)) }),
            Arc::new(BlockingResetLockedAt { notify: notify.clone() }),
            Arc::new(FakeFailJobs),
        )
        .await
        .unwrap();

        let mut events = pool.events().subscribe();

        // Wait for the ticker to start its first tick, then deactivate the
        // pool while that tick is still blocked in flight.
        loop {
            let envelope = events.recv().await.unwrap();
            if matches!(envelope.event, PoolEvent::ResetLockedStarted) {
                break;
            }
        }
        let shutdown_pool = pool.clone();
        let shutdown = tokio::spawn(async move { shutdown_pool.graceful_shutdown(Some("done")).await });
        // Give `deactivate()` time to run before unblocking the in-flight
        // tick, so the ticker observes `!is_active()` after it completes.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        notify.notify_one();
        shutdown.await.unwrap();

        let mut saw_terminal_event = false;
        while let Ok(envelope) = events.try_recv() {
            if let PoolEvent::ResetLockedSuccess { next_delay_ms } = envelope.event {
                assert_eq!(next_delay_ms, None, "no further tick should be scheduled after deactivation");
                saw_terminal_event = true;
            }
        }
        assert!(saw_terminal_event, "expected a ResetLockedSuccess event for the in-flight tick");
    }
}
