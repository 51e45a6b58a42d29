// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use fastcrypto::hash::HashFunction;
use hashgraph_config::{DefaultHashFunction, Peer, PeerId, PeerSet, DIGEST_LENGTH};
use serde::{Deserialize, Serialize};

use crate::{
    event::{Event, Root},
    types::RoundIndex,
};

/// An event together with the consensus metadata a node needs to seed its graph
/// from a frame without replaying history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub event: Event,
    pub round: RoundIndex,
    pub witness: bool,
}

/// Self-contained snapshot of one consensus-decided round: the active peers,
/// a root per peer, the round's received events in consensus order, and the
/// peer-set history needed to validate whatever comes next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub round: RoundIndex,
    pub peers: Vec<Peer>,
    pub roots: BTreeMap<PeerId, Root>,
    pub events: Vec<FrameEvent>,
    pub peer_sets: Vec<(RoundIndex, PeerSet)>,
}

impl Frame {
    pub fn digest(&self) -> [u8; DIGEST_LENGTH] {
        let bytes = bcs::to_bytes(self).expect("serializing a frame cannot fail");
        DefaultHashFunction::digest(bytes.as_slice()).into()
    }
}
