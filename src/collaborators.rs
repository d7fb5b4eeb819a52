// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Trait contracts for the collaborators this crate treats as external:
//! job execution, and the `resetLockedAt`/`failJobs` SQL bodies. The
//! Postgres connection pool itself is not re-abstracted here — `sqlx::PgPool`
//! already is the scoped-acquisition, guaranteed-release pool collaborators
//! need, so they simply take a `&PgPool`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::error::{PoolError, TickerError};

/// A job as understood by the runtime core: enough to identify it and to
/// report it in `pool:gracefulShutdown:workerError` / fail it via
/// [`FailJobs`]. The full job row shape (payload, retry count, queue name,
/// ...) is the execution layer's concern and lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub id: i64,
    pub queue_name: Option<String>,
}

/// External collaborator: re-opens rows whose worker died mid-execution.
#[async_trait]
pub trait ResetLockedAt: Send + Sync {
    async fn reset_locked_at(&self, pool: &PgPool) -> Result<(), TickerError>;
}

/// External collaborator: marks jobs failed with a message.
#[async_trait]
pub trait FailJobs: Send + Sync {
    async fn fail_jobs(
        &self,
        pool: &PgPool,
        worker_ids: &[String],
        jobs: &[JobRef],
        message: &str,
    ) -> Result<Vec<JobRef>, PoolError>;
}

/// External collaborator: consumes and executes one job at a time. The
/// runtime core drives only the lifecycle methods; job dequeue/retry/
/// execution semantics are the implementor's business.
#[async_trait]
pub trait JobWorker: Send + Sync {
    /// Stable identifier, used for log correlation and for `failJobs`.
    fn worker_id(&self) -> &str;

    /// Hints that new work may be available. Returns `true` if the worker
    /// accepted the nudge (e.g. it was idle and began polling), `false` if
    /// it declined (e.g. already busy).
    fn nudge(&self) -> bool;

    /// The job currently being executed, if any.
    async fn active_job(&self) -> Option<JobRef>;

    /// Stops the worker, waiting for any in-flight job to finish (subject to
    /// cancellation via the pool's abort signal). Idempotent.
    async fn release(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
}

/// Constructs the fixed-size worker set a pool supervises. Job
/// dequeue/execution is the implementor's business; this crate only needs a
/// handle conforming to [`JobWorker`] and a token derived from the pool's
/// abort signal to hand each worker.
pub trait WorkerFactory: Send + Sync {
    fn spawn(&self, worker_index: usize, abort: CancellationToken) -> Arc<dyn JobWorker>;
}

/// Mints a worker id unique for the lifetime of the process, for
/// implementations of [`JobWorker::worker_id`] that don't already have a
/// natural identifier to reuse (e.g. a connection-pool slot number).
pub fn default_worker_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_id_is_unique_per_call() {
        assert_ne!(default_worker_id(), default_worker_id());
    }
}
