// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Runtime core for a PostgreSQL-backed background job runner.
//!
//! This crate supervises a fixed-size pool of job workers, maintains a
//! `LISTEN`/`NOTIFY` connection that wakes idle workers and reacts to schema
//! migrations, periodically re-opens jobs abandoned by a crashed worker, and
//! multiplexes OS termination signals across every pool in the process.
//!
//! Job execution itself, the job-table schema, and configuration parsing are
//! deliberately not this crate's concern — see [`collaborators`] for the
//! traits a caller implements to plug those in. [`pg::DefaultJobTable`] is a
//! ready-to-use implementation against a conventional `jobs` table, provided
//! so the crate is directly usable without writing SQL first.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
mod listener;
pub mod metrics;
pub mod pg;
pub mod pool;
pub mod signal_broker;
mod ticker;

pub use collaborators::{default_worker_id, FailJobs, JobRef, JobWorker, ResetLockedAt, WorkerFactory};
pub use config::{PoolConfig, ResetLockedConfig, TermSignal};
pub use error::PoolError;
pub use events::{PoolEvent, PoolEventEnvelope};
pub use pool::{exit_code, registered_pool_count, CompletionOutcome, WorkerPool};
pub use signal_broker::{ShutdownIntent, SignalBroker, SignalSubscription};
