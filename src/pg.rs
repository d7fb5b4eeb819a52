// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A default, `sqlx`-backed implementation of [`ResetLockedAt`] and
//! [`FailJobs`].
//!
//! The SQL bodies here exist so the crate is directly usable and
//! integration-testable; the canonical job-table schema is not this crate's
//! concern, so these statements target a minimal, conventional shape
//! (`jobs(id, locked_by, locked_at, last_error, attempts, queue_name)`)
//! rather than any particular production schema.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::collaborators::{FailJobs, JobRef, ResetLockedAt};
use crate::error::{PoolError, TickerError};

/// Default collaborator pair backed by a conventional `jobs` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultJobTable;

#[async_trait]
impl ResetLockedAt for DefaultJobTable {
    async fn reset_locked_at(&self, pool: &PgPool) -> Result<(), TickerError> {
        sqlx::query(
            r#"
            update jobs
            set locked_by = null,
                locked_at = null
            where locked_by is not null
              and locked_at < (now() - interval '4 hours')
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FailJobs for DefaultJobTable {
    async fn fail_jobs(
        &self,
        pool: &PgPool,
        worker_ids: &[String],
        jobs: &[JobRef],
        message: &str,
    ) -> Result<Vec<JobRef>, PoolError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();

        let rows = sqlx::query_as::<_, (i64, Option<String>)>(
            r#"
            update jobs
            set locked_by = null,
                locked_at = null,
                last_error = $3,
                attempts = attempts + 1
            where id = any($1)
              and locked_by = any($2)
            returning id, queue_name
            "#,
        )
        .bind(&ids)
        .bind(worker_ids)
        .bind(message)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, queue_name)| JobRef { id, queue_name })
            .collect())
    }
}
