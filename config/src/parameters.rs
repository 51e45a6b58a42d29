// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Which persistence tier backs the node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Inmem,
    Durable,
}

/// Operational configuration of a node.
///
/// All fields should tolerate inconsistencies among validators without affecting
/// safety of the protocol: anything both peers must agree on (membership delay,
/// coin round frequency) is a protocol constant, not a parameter.
///
/// NOTE: default values should make sense, so most operators should not need to
/// specify any field.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    /// Base interval between gossip rounds.
    #[serde(default = "Parameters::default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,

    /// Deadline for a single RPC round trip.
    #[serde(default = "Parameters::default_tcp_timeout")]
    pub tcp_timeout: Duration,

    /// Deadline for a join request round trip. Join decisions require consensus
    /// on the receiving side, so this is much longer than `tcp_timeout`.
    #[serde(default = "Parameters::default_join_timeout")]
    pub join_timeout: Duration,

    /// Number of events kept in the in-memory hot caches.
    #[serde(default = "Parameters::default_cache_size")]
    pub cache_size: usize,

    /// Maximum number of events returned in one sync response.
    #[serde(default = "Parameters::default_sync_limit")]
    pub sync_limit: usize,

    /// Whether a node that has fallen too far behind may catch up from a frame
    /// instead of replaying the whole history.
    #[serde(default = "Parameters::default_fast_sync")]
    pub fast_sync: bool,

    /// Number of undetermined events per active peer tolerated before the node
    /// suspends itself.
    #[serde(default = "Parameters::default_suspend_limit")]
    pub suspend_limit: usize,

    /// Replay a pre-existing database into the hashgraph before starting.
    #[serde(default)]
    pub bootstrap: bool,

    /// Seed the store with the configured genesis peer set at startup. Off for
    /// nodes resuming purely from a durable store.
    #[serde(default = "Parameters::default_load_peers")]
    pub load_peers: bool,

    /// Which store variant to open.
    #[serde(default)]
    pub store: StoreKind,

    /// The database path for the durable store. The in-memory store ignores it.
    pub db_path: Option<PathBuf>,
}

impl Parameters {
    pub fn default_heartbeat_timeout() -> Duration {
        Duration::from_millis(200)
    }

    pub fn default_tcp_timeout() -> Duration {
        Duration::from_millis(1000)
    }

    pub fn default_join_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn default_cache_size() -> usize {
        50_000
    }

    pub fn default_sync_limit() -> usize {
        1_000
    }

    pub fn default_fast_sync() -> bool {
        true
    }

    pub fn default_suspend_limit() -> usize {
        300
    }

    pub fn default_load_peers() -> bool {
        true
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Parameters::default_heartbeat_timeout(),
            tcp_timeout: Parameters::default_tcp_timeout(),
            join_timeout: Parameters::default_join_timeout(),
            cache_size: Parameters::default_cache_size(),
            sync_limit: Parameters::default_sync_limit(),
            fast_sync: Parameters::default_fast_sync(),
            suspend_limit: Parameters::default_suspend_limit(),
            bootstrap: false,
            load_peers: true,
            store: StoreKind::default(),
            db_path: None,
        }
    }
}
