// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};

use hashgraph_config::{PeerId, PeerSet};

use crate::{
    error::{HashgraphError, HashgraphResult},
    types::RoundIndex,
};

/// Time-indexed history of the active validator set.
///
/// Round R's active set is the entry with the largest effective round <= R. The
/// cumulative superset of every member ever registered is kept alongside, for
/// signature validation of historical events, together with the first round at
/// which each member appeared.
#[derive(Clone, Debug, Default)]
pub struct PeerSetCache {
    rounds: BTreeMap<RoundIndex, PeerSet>,
    superset: Vec<hashgraph_config::Peer>,
    first_rounds: HashMap<PeerId, RoundIndex>,
}

impl PeerSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer_set` as the active set from `round` on. Idempotent for
    /// identical content; a different set at an existing round is a fatal
    /// invariant violation.
    pub fn set_peer_set(&mut self, round: RoundIndex, peer_set: PeerSet) -> HashgraphResult<()> {
        if let Some(existing) = self.rounds.get(&round) {
            if *existing != peer_set {
                return Err(HashgraphError::PeerSetConflict(round));
            }
            return Ok(());
        }

        for peer in peer_set.peers() {
            if !self.first_rounds.contains_key(&peer.id()) {
                self.first_rounds.insert(peer.id(), round);
                self.superset.push(peer.clone());
            }
        }
        self.rounds.insert(round, peer_set);
        Ok(())
    }

    /// The set active at `round`: the entry with the largest effective round <= `round`.
    pub fn peer_set_at(&self, round: RoundIndex) -> Option<&PeerSet> {
        self.rounds.range(..=round).next_back().map(|(_, set)| set)
    }

    pub fn latest(&self) -> Option<(RoundIndex, &PeerSet)> {
        self.rounds.iter().next_back().map(|(r, set)| (*r, set))
    }

    /// Union of every member ever registered, as an unordered lookup set.
    pub fn superset_peer(&self, id: PeerId) -> Option<&hashgraph_config::Peer> {
        self.superset.iter().find(|p| p.id() == id)
    }

    pub fn superset_peers(&self) -> &[hashgraph_config::Peer] {
        &self.superset
    }

    pub fn first_round_of(&self, id: PeerId) -> Option<RoundIndex> {
        self.first_rounds.get(&id).copied()
    }

    pub fn all(&self) -> &BTreeMap<RoundIndex, PeerSet> {
        &self.rounds
    }
}

#[cfg(test)]
mod tests {
    use hashgraph_config::local_peer_set_and_keys;

    use super::PeerSetCache;
    use crate::error::HashgraphError;

    #[test]
    fn range_queries() {
        let (genesis, _) = local_peer_set_and_keys(10, 4);
        let (bigger, _) = local_peer_set_and_keys(10, 5);

        let mut cache = PeerSetCache::new();
        cache.set_peer_set(0, genesis.clone()).unwrap();
        cache.set_peer_set(12, bigger.clone()).unwrap();

        assert_eq!(cache.peer_set_at(0).unwrap(), &genesis);
        assert_eq!(cache.peer_set_at(11).unwrap(), &genesis);
        assert_eq!(cache.peer_set_at(12).unwrap(), &bigger);
        assert_eq!(cache.peer_set_at(500).unwrap(), &bigger);
        assert_eq!(cache.latest().unwrap().0, 12);
    }

    #[test]
    fn idempotent_but_conflicts_are_fatal() {
        let (genesis, _) = local_peer_set_and_keys(10, 4);
        let (other, _) = local_peer_set_and_keys(11, 4);

        let mut cache = PeerSetCache::new();
        cache.set_peer_set(0, genesis.clone()).unwrap();
        cache.set_peer_set(0, genesis.clone()).unwrap();
        assert!(matches!(
            cache.set_peer_set(0, other),
            Err(HashgraphError::PeerSetConflict(0))
        ));
    }

    #[test]
    fn superset_accumulates() {
        let (genesis, _) = local_peer_set_and_keys(10, 4);
        let (bigger, _) = local_peer_set_and_keys(10, 5);
        let joiner = bigger
            .peers()
            .iter()
            .find(|p| !genesis.contains(p.id()))
            .unwrap();

        let mut cache = PeerSetCache::new();
        cache.set_peer_set(0, genesis.clone()).unwrap();
        cache.set_peer_set(9, bigger.clone()).unwrap();

        assert_eq!(cache.superset_peers().len(), 5);
        assert_eq!(cache.first_round_of(joiner.id()), Some(9));
        for peer in genesis.peers() {
            assert_eq!(cache.first_round_of(peer.id()), Some(0));
        }
    }
}
