// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// Round number in the hashgraph. Genesis roots live in round 0.
pub type RoundIndex = u64;

/// Sequence number of a consensus block.
pub type BlockIndex = u64;

/// Creator-generated event timestamp in milliseconds. Advisory only; consensus
/// timestamps are medians over famous witnesses.
pub type TimestampMs = u64;

pub fn timestamp_utc_ms() -> TimestampMs {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as TimestampMs,
        Err(_) => 0,
    }
}
