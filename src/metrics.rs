// Copyright (c) 2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Process metrics for a [`crate::pool::WorkerPool`], one `prometheus::Registry`
//! per pool. Scraping/serving the registry over HTTP is outside this crate's
//! scope; callers that expose an endpoint can reach into
//! [`WorkerPool::metrics_registry`] and feed it to whatever exporter they
//! already run.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Registry,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub active_workers: IntGauge,
    pub listen_reconnects_total: IntCounter,
    pub jobs_insert_notifications_total: IntCounter,
    pub reset_locked_successes_total: IntCounter,
    pub reset_locked_failures_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        Self {
            active_workers: register_int_gauge_with_registry!(
                "pg_queue_active_workers",
                "Number of workers currently supervised by the pool",
                registry,
            )
            .unwrap(),
            listen_reconnects_total: register_int_counter_with_registry!(
                "pg_queue_listen_reconnects_total",
                "Total number of times the listener has had to reconnect",
                registry,
            )
            .unwrap(),
            jobs_insert_notifications_total: register_int_counter_with_registry!(
                "pg_queue_jobs_insert_notifications_total",
                "Total number of jobs:insert notifications received",
                registry,
            )
            .unwrap(),
            reset_locked_successes_total: register_int_counter_with_registry!(
                "pg_queue_reset_locked_successes_total",
                "Total number of successful reset-locked ticks",
                registry,
            )
            .unwrap(),
            reset_locked_failures_total: register_int_counter_with_registry!(
                "pg_queue_reset_locked_failures_total",
                "Total number of failed reset-locked ticks",
                registry,
            )
            .unwrap(),
            registry,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.listen_reconnects_total.get(), 0);
        assert_eq!(metrics.active_workers.get(), 0);
    }

    #[test]
    fn registry_gathers_registered_families() {
        let metrics = Metrics::new();
        metrics.jobs_insert_notifications_total.inc();
        let families = metrics.registry().gather();
        assert!(families.iter().any(|f| f.get_name() == "pg_queue_jobs_insert_notifications_total"));
    }
}
