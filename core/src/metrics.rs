// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Histogram, IntCounter,
    IntCounterVec, IntGauge, Registry,
};

pub(crate) struct Metrics {
    pub node_metrics: NodeMetrics,
}

pub(crate) fn initialise_metrics(registry: Registry) -> Arc<Metrics> {
    Arc::new(Metrics {
        node_metrics: NodeMetrics::new(&registry),
    })
}

#[cfg(test)]
pub(crate) fn test_metrics() -> Arc<Metrics> {
    initialise_metrics(Registry::new())
}

pub(crate) struct NodeMetrics {
    pub events_inserted: IntCounter,
    pub events_rejected: IntCounterVec,
    pub forks_detected: IntCounter,
    pub rounds_decided: IntCounter,
    pub blocks_committed: IntCounter,
    pub last_consensus_round: IntGauge,
    pub undetermined_events: IntGauge,
    pub syncs_initiated: IntCounter,
    pub sync_failures: IntCounter,
    pub events_per_sync: Histogram,
    pub commit_latency: Histogram,
    pub state_transitions: IntCounterVec,
}

impl NodeMetrics {
    fn new(registry: &Registry) -> Self {
        Self {
            events_inserted: register_int_counter_with_registry!(
                "events_inserted",
                "Number of events accepted into the hashgraph",
                registry,
            )
            .unwrap(),
            events_rejected: register_int_counter_vec_with_registry!(
                "events_rejected",
                "Number of events rejected at validation, by cause",
                &["cause"],
                registry,
            )
            .unwrap(),
            forks_detected: register_int_counter_with_registry!(
                "forks_detected",
                "Number of forks recorded as evidence",
                registry,
            )
            .unwrap(),
            rounds_decided: register_int_counter_with_registry!(
                "rounds_decided",
                "Number of rounds whose fame election completed",
                registry,
            )
            .unwrap(),
            blocks_committed: register_int_counter_with_registry!(
                "blocks_committed",
                "Number of blocks committed to the application",
                registry,
            )
            .unwrap(),
            last_consensus_round: register_int_gauge_with_registry!(
                "last_consensus_round",
                "Most recent consensus-decided round",
                registry,
            )
            .unwrap(),
            undetermined_events: register_int_gauge_with_registry!(
                "undetermined_events",
                "Events without a received round yet",
                registry,
            )
            .unwrap(),
            syncs_initiated: register_int_counter_with_registry!(
                "syncs_initiated",
                "Outbound gossip round trips started",
                registry,
            )
            .unwrap(),
            sync_failures: register_int_counter_with_registry!(
                "sync_failures",
                "Outbound gossip round trips that failed",
                registry,
            )
            .unwrap(),
            events_per_sync: register_histogram_with_registry!(
                "events_per_sync",
                "Events pulled per sync response",
                vec![0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0],
                registry,
            )
            .unwrap(),
            commit_latency: register_histogram_with_registry!(
                "commit_latency",
                "Seconds spent inside the application commit callback",
                registry,
            )
            .unwrap(),
            state_transitions: register_int_counter_vec_with_registry!(
                "state_transitions",
                "Controller state transitions, by target state",
                &["state"],
                registry,
            )
            .unwrap(),
        }
    }
}
