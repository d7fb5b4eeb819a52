// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Typed error enums for the runtime's internal boundaries.
//!
//! One `thiserror` enum per component boundary, each with a `Display`
//! message per variant, and no bare `String` errors escaping a module
//! boundary.

use thiserror::Error;

/// Errors surfaced while validating a [`crate::config::PoolConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("minResetLockedInterval ({min}) must be <= maxResetLockedInterval ({max})")]
    ResetLockedIntervalOrder { min: u64, max: u64 },
    #[error("minResetLockedInterval must be greater than zero")]
    ResetLockedIntervalZero,
}

/// Errors raised while subscribing to (or releasing from) the process-wide
/// signal broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalBrokerError {
    #[error("signal broker is already shutting down; refusing new subscription")]
    AlreadyShuttingDown,
}

/// Errors surfaced by the listener's connection loop.
///
/// Transient connection/query failures are retried internally and are not
/// represented here; this enum covers failures that should propagate out of
/// `Listener::release`.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced by the reset-locked ticker's external call.
#[derive(Error, Debug)]
pub enum TickerError {
    #[error("reset-locked query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced by worker pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool is already shutting down")]
    AlreadyShuttingDown,
    #[error("pool has already terminated")]
    AlreadyTerminated,
    #[error("worker {worker_id} failed to release: {source}")]
    WorkerRelease {
        worker_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Signal(#[from] SignalBrokerError),
}
