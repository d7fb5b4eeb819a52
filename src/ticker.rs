// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The reset-locked ticker: a randomized periodic task that re-opens rows
//! whose worker died mid-execution.

use std::sync::Arc;

use tracing::warn;

use crate::error::TickerError;
use crate::events::PoolEvent;
use crate::pool::WorkerPool;

/// Runs until the pool deactivates. At most one tick is ever in flight: the
/// loop body is a strict sleep-then-tick sequence, never spawned
/// concurrently with itself.
pub(crate) async fn run(pool: WorkerPool) {
    if sleep_or_deactivated(&pool, pool.config().reset_locked.initial_delay()).await.is_err() {
        return;
    }

    loop {
        if !pool.is_active() {
            return;
        }

        pool.events().emit(PoolEvent::ResetLockedStarted);
        let outcome = pool.run_reset_locked_tick().await;

        if !pool.is_active() {
            // `terminate()` awaits the same tick lock `run_reset_locked_tick`
            // held, so it already observed this outcome; still emit the
            // terminal event for this tick, with no further tick scheduled.
            emit_tick_outcome(&pool, &outcome, None);
            return;
        }

        let next_delay = pool.config().reset_locked.next_delay();
        emit_tick_outcome(&pool, &outcome, Some(next_delay.as_millis() as u64));

        if sleep_or_deactivated(&pool, next_delay).await.is_err() {
            return;
        }
    }
}

/// Races the delay against pool deactivation. `Err(())` means the pool
/// deactivated first and no further tick should be scheduled.
async fn sleep_or_deactivated(pool: &WorkerPool, delay: std::time::Duration) -> Result<(), ()> {
    tokio::select! {
        _ = pool.deactivated() => Err(()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Records and emits the outcome of one completed tick. `next_delay_ms` is
/// `None` when no further tick will be scheduled (the pool deactivated while
/// this tick was in flight).
fn emit_tick_outcome(pool: &WorkerPool, outcome: &Result<(), TickerError>, next_delay_ms: Option<u64>) {
    match outcome {
        Ok(()) => {
            pool.metrics().reset_locked_successes_total.inc();
            pool.events().emit(PoolEvent::ResetLockedSuccess { next_delay_ms });
        }
        Err(e) => {
            warn!(error = %e, will_retry = next_delay_ms.is_some(), "reset-locked tick failed");
            pool.metrics().reset_locked_failures_total.inc();
            pool.events().emit(PoolEvent::ResetLockedFailure {
                message: Arc::from(e.to_string()),
                next_delay_ms,
            });
        }
    }
}
