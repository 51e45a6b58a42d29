// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};

use hashgraph_config::{PeerId, PeerSet};

use crate::{
    event::{Event, EventCoordinates, EventHash, EventIndex},
    types::{RoundIndex, TimestampMs},
};

/// Per-event consensus bookkeeping, kept outside the immutable signed event.
///
/// `last_ancestors` holds, per participant, the newest event of that
/// participant reachable from this event; `first_descendants` the oldest event
/// of that participant that reaches this event. Together they answer
/// see/strongly-see queries in O(1) per participant without walking the graph.
#[derive(Clone, Debug)]
pub(crate) struct EventMeta {
    pub creator: PeerId,
    pub index: EventIndex,
    pub self_parent: Option<EventHash>,
    pub other_parent: Option<EventHash>,
    pub timestamp_ms: TimestampMs,
    pub signature: Vec<u8>,
    pub topo: u64,
    pub round: Option<RoundIndex>,
    pub witness: bool,
    pub round_received: Option<RoundIndex>,
    pub last_ancestors: HashMap<PeerId, EventCoordinates>,
    pub first_descendants: HashMap<PeerId, EventCoordinates>,
}

impl EventMeta {
    pub fn new(event: &Event, topo: u64) -> Self {
        Self {
            creator: event.creator_id(),
            index: event.index(),
            self_parent: event.self_parent(),
            other_parent: event.other_parent(),
            timestamp_ms: event.timestamp_ms(),
            signature: event.signature().to_vec(),
            topo,
            round: None,
            witness: false,
            round_received: None,
            last_ancestors: HashMap::new(),
            first_descendants: HashMap::new(),
        }
    }

    pub fn coordinates(&self, hash: EventHash) -> EventCoordinates {
        EventCoordinates {
            index: self.index,
            hash,
        }
    }
}

/// True when `target` is an ancestor of `observer` (reflexively), judged from
/// the memoized coordinates. Forked creators can confuse this check, which is
/// why they are excluded from every super-majority count.
pub(crate) fn sees(observer: &EventMeta, target: &EventMeta) -> bool {
    observer
        .last_ancestors
        .get(&target.creator)
        .is_some_and(|c| c.index >= target.index)
}

/// True when more than two thirds of `peers` have an event that both descends
/// from `target` and is an ancestor of `observer`. Members in `cheaters` do not
/// count toward the threshold.
pub(crate) fn strongly_sees(
    observer: &EventMeta,
    target: &EventMeta,
    peers: &PeerSet,
    cheaters: &HashSet<PeerId>,
) -> bool {
    let mut count = 0;
    for peer in peers.peers() {
        let id = peer.id();
        if cheaters.contains(&id) {
            continue;
        }
        let (Some(first), Some(last)) = (
            target.first_descendants.get(&id),
            observer.last_ancestors.get(&id),
        ) else {
            continue;
        };
        if first.index <= last.index {
            count += 1;
        }
    }
    count >= peers.super_majority()
}
