// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The change-notification listener.
//!
//! Exactly one active [`sqlx::postgres::PgListener`] is held at a time; its
//! `Drop` impl already best-effort issues `UNLISTEN *`, so release is simply
//! dropping it — listener release is treated as fire-and-forget. Reconnects
//! are driven by our own jittered-backoff loop rather than `PgListener`'s
//! built-in (unjittered, immediate) reconnect, since the retry schedule is
//! part of the behavior under test.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgListener;
use tracing::warn;

use crate::events::PoolEvent;
use crate::pool::{WorkerPool, MIGRATION_EXIT_CODE};

const INSERT_CHANNEL: &str = "jobs:insert";
const MIGRATE_CHANNEL: &str = "jobs:migrate";
const MAX_DELAY: Duration = Duration::from_millis(60_000);

#[derive(Debug, Deserialize, Default)]
struct MigratePayload {
    #[serde(rename = "migrationNumber")]
    migration_number: Option<i64>,
}

/// Runs until the pool deactivates. Intended to be `tokio::spawn`ed once per
/// pool by [`crate::pool::WorkerPool::new`].
pub(crate) async fn run(pool: WorkerPool) {
    let mut attempts: u32 = 0;

    loop {
        if !pool.is_active() {
            return;
        }
        pool.events().emit(PoolEvent::ListenConnecting { attempt: attempts });

        let mut listener = match PgListener::connect_with(pool.pg_pool()).await {
            Ok(listener) => listener,
            Err(e) => {
                pool.events().emit(PoolEvent::ListenError { message: Arc::from(e.to_string()) });
                attempts += 1;
                pool.metrics().listen_reconnects_total.inc();
                sleep_or_deactivated(&pool, backoff_delay(attempts)).await;
                continue;
            }
        };

        if !pool.is_active() {
            drop(listener);
            return;
        }

        if let Err(e) = listener.listen(INSERT_CHANNEL).await {
            pool.events().emit(PoolEvent::ListenError { message: Arc::from(e.to_string()) });
            drop(listener);
            attempts += 1;
            pool.metrics().listen_reconnects_total.inc();
            sleep_or_deactivated(&pool, backoff_delay(attempts)).await;
            continue;
        }
        attempts = 0;
        pool.events().emit(PoolEvent::ListenSuccess);

        if let Err(e) = listener.listen(MIGRATE_CHANNEL).await {
            pool.events().emit(PoolEvent::ListenError { message: Arc::from(e.to_string()) });
            drop(listener);
            attempts += 1;
            pool.metrics().listen_reconnects_total.inc();
            sleep_or_deactivated(&pool, backoff_delay(attempts)).await;
            continue;
        }

        let lost_connection = receive_until_error(&pool, &mut listener).await;
        drop(listener);
        if !lost_connection {
            // Pool deactivated while we were receiving; nothing left to do.
            return;
        }
        attempts += 1;
        pool.metrics().listen_reconnects_total.inc();
        sleep_or_deactivated(&pool, backoff_delay(attempts)).await;
    }
}

/// Returns `true` if the loop should reconnect (a client error occurred),
/// `false` if it returned because the pool deactivated.
async fn receive_until_error(pool: &WorkerPool, listener: &mut PgListener) -> bool {
    loop {
        tokio::select! {
            _ = pool.deactivated() => return false,
            notification = listener.recv() => {
                match notification {
                    Ok(notification) => dispatch(pool, notification),
                    Err(e) => {
                        pool.events().emit(PoolEvent::ListenError { message: Arc::from(e.to_string()) });
                        return true;
                    }
                }
            }
        }
        if !pool.is_active() {
            return false;
        }
    }
}

fn dispatch(pool: &WorkerPool, notification: sqlx::postgres::PgNotification) {
    match notification.channel() {
        INSERT_CHANNEL => {
            pool.metrics().jobs_insert_notifications_total.inc();
            pool.nudge_first_worker();
        }
        MIGRATE_CHANNEL => {
            let migration_number = serde_json::from_str::<MigratePayload>(notification.payload())
                .ok()
                .and_then(|p| p.migration_number);
            warn!(migration_number = ?migration_number, "schema migration detected; beginning graceful shutdown");
            MIGRATION_EXIT_CODE.store(54, Ordering::SeqCst);
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.graceful_shutdown(Some("schema migration detected")).await;
            });
        }
        other => warn!(channel = other, "received notification on unrecognized channel"),
    }
}

async fn sleep_or_deactivated(pool: &WorkerPool, delay: Duration) {
    tokio::select! {
        _ = pool.deactivated() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

/// `ceil(jitter * min(60_000ms, 50 * e^n))`, `jitter = 0.5 + sqrt(U(0,1))/2`.
/// `n` is the 0-based retry count after each failed attempt; the heavy
/// upward bias in `jitter` spreads reconnecting clients out rather than
/// clustering them near the floor of the range.
fn backoff_delay(attempts: u32) -> Duration {
    let jitter = 0.5 + rand::random::<f64>().sqrt() / 2.0;
    let unjittered = (50.0_f64 * std::f64::consts::E.powi(attempts as i32)).min(MAX_DELAY.as_millis() as f64);
    let millis = (jitter * unjittered).ceil().max(1.0);
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_stays_within_bounds() {
        for attempts in 0..20 {
            for _ in 0..50 {
                let delay = backoff_delay(attempts);
                assert!(delay.as_millis() > 0);
                assert!(delay <= MAX_DELAY * 2, "delay {delay:?} implausibly large for attempts={attempts}");
            }
        }
    }

    #[test]
    fn backoff_delay_grows_with_attempts_in_expectation() {
        let sample = |attempts| -> f64 {
            let total: u128 = (0..200).map(|_| backoff_delay(attempts).as_millis()).sum();
            total as f64 / 200.0
        };
        assert!(sample(0) < sample(5));
        assert!(sample(5) < sample(10));
    }

    #[test]
    fn migrate_payload_tolerates_missing_field() {
        let parsed: MigratePayload = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.migration_number, None);
    }

    #[test]
    fn migrate_payload_reads_migration_number() {
        let parsed: MigratePayload = serde_json::from_str(r#"{"migrationNumber":42}"#).unwrap();
        assert_eq!(parsed.migration_number, Some(42));
    }
}
