// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use hashgraph_config::{PeerId, PeerSet};
use tracing::{debug, info};

use crate::{
    block::{Block, BlockSignature},
    context::Context,
    error::{HashgraphError, HashgraphResult},
    event::{Event, EventBody, EventHash, Transaction},
    frame::Frame,
    hashgraph::{Hashgraph, MembershipChange},
    internal_transaction::{InternalTransaction, PeerOp},
    store::Store,
    types::{timestamp_utc_ms, RoundIndex},
    validator::Validator,
};

#[cfg(test)]
#[path = "tests/core_tests.rs"]
mod core_tests;

/// Submissions queued beyond this are rejected with a backpressure error.
const PENDING_CAPACITY: usize = 65_536;

/// Per-node orchestrator around the hashgraph: the local signing identity, the
/// pending submission pools, the head of the local lane and the helpers the
/// gossip protocol is made of. All access is serialized by the owning node.
pub struct Core {
    context: Arc<Context>,
    validator: Validator,
    hashgraph: Hashgraph,
    /// The last event this node authored.
    head: Option<EventHash>,
    pending_transactions: VecDeque<Transaction>,
    pending_internal_transactions: VecDeque<InternalTransaction>,
    /// Own block signatures waiting to ride on the next self-event.
    pending_block_signatures: VecDeque<BlockSignature>,
    /// Round at which this node's own membership took effect, once known.
    accepted_round: Option<RoundIndex>,
    /// Round at which this node's own removal takes effect, once known.
    removed_round: Option<RoundIndex>,
}

impl Core {
    pub fn new(context: Arc<Context>, validator: Validator, store: Arc<dyn Store>) -> Self {
        let hashgraph = Hashgraph::new(context.clone(), store);
        Self {
            context,
            validator,
            hashgraph,
            head: None,
            pending_transactions: VecDeque::new(),
            pending_internal_transactions: VecDeque::new(),
            pending_block_signatures: VecDeque::new(),
            accepted_round: None,
            removed_round: None,
        }
    }

    pub fn id(&self) -> PeerId {
        self.validator.id()
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.hashgraph.store()
    }

    pub fn hashgraph(&self) -> &Hashgraph {
        &self.hashgraph
    }

    pub fn head(&self) -> Option<EventHash> {
        self.head
    }

    pub fn accepted_round(&self) -> Option<RoundIndex> {
        self.accepted_round
    }

    pub fn removed_round(&self) -> Option<RoundIndex> {
        self.removed_round
    }

    /// Records the membership round a join responder reported. The same value
    /// is re-derived locally when the join commit replays here.
    pub fn note_accepted_round(&mut self, round: RoundIndex) {
        self.accepted_round.get_or_insert(round);
    }

    /// The set active at the graph's current round. This is the set gossip
    /// runs against: a leaver keeps participating until its removal round is
    /// actually reached, and a joiner only counts once its round arrives.
    pub fn peers(&self) -> HashgraphResult<PeerSet> {
        let round = self.store().last_round().unwrap_or(0);
        self.store().get_peer_set(round)
    }

    /// The most recent registered peer set, including one scheduled for a
    /// future round. Membership requests are judged against this set so a
    /// change already under way is not requested twice.
    pub fn latest_peers(&self) -> HashgraphResult<PeerSet> {
        self.store().get_peer_set(RoundIndex::MAX)
    }

    pub fn in_active_set(&self) -> bool {
        self.peers().map(|p| p.contains(self.id())).unwrap_or(false)
    }

    /// Replays a reopened durable store into the graph and re-runs round
    /// assignment and elections. The caller then drains and re-commits the
    /// replayed blocks through [`Core::next_decided_block`].
    pub fn bootstrap(&mut self) -> HashgraphResult<()> {
        self.hashgraph.bootstrap()?;
        self.head = self
            .store()
            .last_event_from(self.id())?
            .map(|coordinates| coordinates.hash);
        self.hashgraph.run_consensus()
    }

    pub fn known_events(&self) -> BTreeMap<PeerId, i64> {
        self.store().known_events()
    }

    /// Events the peer with knowledge `known` is missing, in topological order
    /// so parents always precede children.
    pub fn event_diff(&self, known: &BTreeMap<PeerId, i64>) -> HashgraphResult<Vec<Event>> {
        let ours = self.store().known_events();
        let mut missing: Vec<(u64, Event)> = vec![];
        for (id, our_last) in ours {
            let their_last = known.get(&id).copied().unwrap_or(-1);
            if our_last <= their_last {
                continue;
            }
            let mut expected = (their_last + 1).max(0) as u64;
            for hash in self.store().participant_events(id, their_last)? {
                let Some(order) = self.hashgraph.topological_order(&hash) else {
                    // Below the live window: the peer needs a fast-forward.
                    return Err(HashgraphError::TooFarBehind);
                };
                let event = self.store().get_event(&hash)?;
                if event.index() != expected {
                    // This lane restarted above what the peer knows; events in
                    // between are gone from the live window.
                    return Err(HashgraphError::TooFarBehind);
                }
                expected += 1;
                missing.push((order, event));
            }
        }
        missing.sort_by_key(|(order, _)| *order);
        Ok(missing.into_iter().map(|(_, event)| event).collect())
    }

    /// Inserts events pulled from a peer. Individually invalid events are
    /// rejected and counted without aborting the batch.
    pub fn insert_events(&mut self, events: Vec<Event>) -> HashgraphResult<usize> {
        let mut inserted = 0;
        for event in events {
            match self.hashgraph.insert_event(event, false) {
                Ok(()) => inserted += 1,
                Err(e @ HashgraphError::Storage(_)) => return Err(e),
                Err(e) => debug!("rejecting synced event: {}", e),
            }
        }
        Ok(inserted)
    }

    /// Creates, signs and inserts the node's next event, linking the local head
    /// and `other_parent` and carrying everything pending.
    pub fn sign_and_insert_self_event(
        &mut self,
        other_parent: Option<EventHash>,
    ) -> HashgraphResult<Event> {
        let id = self.id();
        let root = self.store().get_root(id)?;
        let last = self.store().last_event_from(id)?.or(root.head);
        let (self_parent, index) = match last {
            Some(c) => (Some(c.hash), c.index + 1),
            None => (None, 0),
        };

        let event = Event::new_signed(
            EventBody {
                transactions: self.pending_transactions.drain(..).collect(),
                internal_transactions: self.pending_internal_transactions.drain(..).collect(),
                block_signatures: self.pending_block_signatures.drain(..).collect(),
                self_parent,
                other_parent,
                creator: self.validator.public_key_bytes(),
                index,
                timestamp_ms: timestamp_utc_ms(),
            },
            self.validator.keypair(),
        );
        self.hashgraph.insert_event(event.clone(), true)?;
        self.head = Some(event.hash());
        Ok(event)
    }

    /// One responder-side pull: what the peer is missing, capped at the sync
    /// limit. The cap keeps a topological prefix so partial syncs still insert.
    pub fn events_for_sync(
        &self,
        known: &BTreeMap<PeerId, i64>,
    ) -> HashgraphResult<Vec<Event>> {
        let mut events = self.event_diff(known)?;
        events.truncate(self.context.parameters.sync_limit);
        Ok(events)
    }

    /// Initiator-side merge after a pull: insert what the peer sent, then
    /// author a merge event on top of the peer's head.
    pub fn sync(&mut self, from: PeerId, events: Vec<Event>) -> HashgraphResult<()> {
        self.insert_events(events)?;
        if self.in_active_set() {
            let other_parent = self
                .store()
                .last_event_from(from)?
                .map(|coordinates| coordinates.hash);
            self.sign_and_insert_self_event(other_parent)?;
        }
        Ok(())
    }

    pub fn add_transactions(&mut self, transactions: Vec<Transaction>) -> HashgraphResult<()> {
        if self.pending_transactions.len() + transactions.len() > PENDING_CAPACITY {
            return Err(HashgraphError::QueueFull);
        }
        self.pending_transactions.extend(transactions);
        Ok(())
    }

    pub fn add_internal_transaction(
        &mut self,
        transaction: InternalTransaction,
    ) -> HashgraphResult<()> {
        transaction.verify_signature()?;
        if self.pending_internal_transactions.len() >= PENDING_CAPACITY {
            return Err(HashgraphError::QueueFull);
        }
        if !self.pending_internal_transactions.contains(&transaction) {
            self.pending_internal_transactions.push_back(transaction);
        }
        Ok(())
    }

    pub fn run_consensus(&mut self) -> HashgraphResult<()> {
        self.hashgraph.run_consensus()
    }

    /// Next block awaiting its application commit, if a round is ready. The
    /// caller must seal each block before asking for the following one.
    pub fn next_decided_block(&mut self) -> HashgraphResult<Option<Block>> {
        self.hashgraph.next_decided_block()
    }

    /// Seals a committed block: signs it, persists it with its outcome and
    /// applies its membership changes. The own signature rides on the next
    /// self-event so other peers can collect it.
    pub fn seal_committed_block(
        &mut self,
        mut block: Block,
    ) -> HashgraphResult<Vec<MembershipChange>> {
        let signature = block.sign(self.validator.keypair());
        block.add_signature(&signature)?;
        let changes = self.hashgraph.finalize_block(block)?;
        self.pending_block_signatures.push_back(signature);

        for change in &changes {
            if change.peer.id() == self.id() {
                match change.op {
                    PeerOp::Join => {
                        info!("own membership accepted at round {}", change.effective_round);
                        self.accepted_round = Some(change.effective_round);
                    }
                    PeerOp::Leave => {
                        info!("own removal effective at round {}", change.effective_round);
                        self.removed_round = Some(change.effective_round);
                    }
                }
            }
        }
        Ok(changes)
    }

    /// Responder side of a fast-forward: the newest sufficiently signed block
    /// and its frame.
    pub fn fast_forward_response(&self) -> HashgraphResult<(Block, Frame)> {
        self.hashgraph.anchor_block_with_frame()
    }

    /// Initiator side of a fast-forward: verify the anchor against the frame's
    /// peer set, then restart the graph from the frame.
    pub fn fast_forward(&mut self, block: Block, frame: Frame) -> HashgraphResult<()> {
        let peers = PeerSet::new(frame.peers.clone());
        if block.verify_signatures(&peers) < peers.validity_threshold() {
            return Err(HashgraphError::Rejected(
                "anchor block carries too few valid signatures".to_string(),
            ));
        }
        self.hashgraph.reset(block, frame)?;
        self.head = self
            .store()
            .last_event_from(self.id())?
            .or(self.store().get_root(self.id()).ok().and_then(|r| r.head))
            .map(|coordinates| coordinates.hash);
        Ok(())
    }

    /// Undetermined events per active peer, the node's suspension criterion.
    pub fn excess_undetermined(&self) -> bool {
        let active = self.peers().map(|p| p.len().max(1)).unwrap_or(1);
        self.hashgraph.undetermined_count()
            > self.context.parameters.suspend_limit.saturating_mul(active)
    }
}
