// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::EventHash;

/// Fame verdict of a witness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fame {
    Undecided,
    Yes,
    No,
}

/// Everything the protocol tracks about one round: which events were assigned
/// to it, which of those are witnesses and their fame, and the events that
/// reached consensus ("were received") in it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoundInfo {
    /// Witnesses of the round, with their fame verdict. Ordered by hash so
    /// iteration is deterministic across peers.
    pub witnesses: BTreeMap<EventHash, Fame>,
    /// Every event assigned to this round, in local insertion order.
    pub events: Vec<EventHash>,
    /// Events whose received round is this round, in consensus order. Filled
    /// when the round is decided.
    pub received: Vec<EventHash>,
    /// True once the received list is final and a frame exists for the round.
    pub decided: bool,
}

impl RoundInfo {
    pub fn add_event(&mut self, hash: EventHash, witness: bool) {
        if !self.events.contains(&hash) {
            self.events.push(hash);
        }
        if witness {
            self.witnesses.entry(hash).or_insert(Fame::Undecided);
        }
    }

    pub fn set_fame(&mut self, hash: EventHash, fame: Fame) {
        self.witnesses.insert(hash, fame);
    }

    /// True when every witness has a Yes/No verdict.
    pub fn all_famous_decided(&self) -> bool {
        self.witnesses.values().all(|f| *f != Fame::Undecided)
    }

    pub fn famous_witnesses(&self) -> Vec<EventHash> {
        self.witnesses
            .iter()
            .filter(|(_, f)| **f == Fame::Yes)
            .map(|(h, _)| *h)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Fame, RoundInfo};
    use crate::event::EventHash;

    #[test]
    fn fame_bookkeeping() {
        let w1 = EventHash::new([1; 32]);
        let w2 = EventHash::new([2; 32]);
        let plain = EventHash::new([3; 32]);

        let mut round = RoundInfo::default();
        round.add_event(w1, true);
        round.add_event(w2, true);
        round.add_event(plain, false);

        assert_eq!(round.witnesses.len(), 2);
        assert_eq!(round.events.len(), 3);
        assert!(!round.all_famous_decided());

        round.set_fame(w1, Fame::Yes);
        assert!(!round.all_famous_decided());
        round.set_fame(w2, Fame::No);
        assert!(round.all_famous_decided());
        assert_eq!(round.famous_witnesses(), vec![w1]);
    }

    #[test]
    fn add_event_is_idempotent() {
        let w = EventHash::new([9; 32]);
        let mut round = RoundInfo::default();
        round.add_event(w, true);
        round.add_event(w, true);
        assert_eq!(round.events.len(), 1);
        assert_eq!(round.witnesses.len(), 1);
    }
}
