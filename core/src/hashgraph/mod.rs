// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod meta;
pub(crate) mod rounds;

#[cfg(test)]
#[path = "../tests/hashgraph_tests.rs"]
mod hashgraph_tests;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use hashgraph_config::{Peer, PeerId};
use tracing::{debug, warn};

use crate::{
    block::{Block, BlockSignature},
    constants::{COIN_ROUND_FREQUENCY, MEMBERSHIP_DELAY},
    context::Context,
    error::{HashgraphError, HashgraphResult},
    event::{Event, EventHash, Root},
    frame::{Frame, FrameEvent},
    hashgraph::{
        meta::{sees, strongly_sees, EventMeta},
        rounds::{Fame, RoundInfo},
    },
    internal_transaction::PeerOp,
    store::Store,
    types::{BlockIndex, RoundIndex, TimestampMs},
};

/// A membership change that took effect through a committed block.
#[derive(Clone, Debug)]
pub struct MembershipChange {
    pub op: PeerOp,
    pub peer: Peer,
    pub effective_round: RoundIndex,
}

/// The consensus engine: maintains the DAG of events, assigns rounds, elects
/// famous witnesses and turns decided rounds into a totally ordered stream of
/// blocks. All methods run under the owning node's serializer; nothing here
/// suspends.
pub struct Hashgraph {
    context: Arc<Context>,
    store: Arc<dyn Store>,

    /// Consensus bookkeeping for every event in the live window.
    metas: HashMap<EventHash, EventMeta>,
    /// Inserted events not yet assigned a round, insertion order.
    undivided: VecDeque<EventHash>,
    /// Events without a received round, insertion order.
    undetermined: Vec<EventHash>,
    /// Rounds created in the live window.
    round_index: BTreeSet<RoundIndex>,
    /// Rounds with witnesses whose fame is still open.
    undecided_rounds: BTreeSet<RoundIndex>,
    /// Most recent round whose received events are final.
    last_ordered: Option<RoundIndex>,
    /// Set after a fast-forward: the graph restarted at this round and events
    /// may reference other-parents below the window.
    reset_round: Option<RoundIndex>,
    /// First round this node ever ordered (differs from 0 after fast-forward).
    first_consensus_round: Option<RoundIndex>,

    /// Validators caught forking. Their events stop counting toward thresholds.
    cheaters: HashSet<PeerId>,
    /// Block signatures that arrived before their block was created.
    pending_block_signatures: HashMap<BlockIndex, Vec<BlockSignature>>,
    /// Per participant, its latest event that reached consensus.
    last_consensus_events: HashMap<PeerId, crate::event::EventCoordinates>,

    topo_seq: u64,
    next_block_index: BlockIndex,
}

impl Hashgraph {
    pub fn new(context: Arc<Context>, store: Arc<dyn Store>) -> Self {
        Self {
            context,
            store,
            metas: HashMap::new(),
            undivided: VecDeque::new(),
            undetermined: vec![],
            round_index: BTreeSet::new(),
            undecided_rounds: BTreeSet::new(),
            last_ordered: None,
            reset_round: None,
            first_consensus_round: None,
            cheaters: HashSet::new(),
            pending_block_signatures: HashMap::new(),
            last_consensus_events: HashMap::new(),
            topo_seq: 0,
            next_block_index: 0,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn undetermined_count(&self) -> usize {
        self.undetermined.len()
    }

    pub fn first_consensus_round(&self) -> Option<RoundIndex> {
        self.first_consensus_round
    }

    pub fn cheaters(&self) -> &HashSet<PeerId> {
        &self.cheaters
    }

    pub(crate) fn topological_order(&self, hash: &EventHash) -> Option<u64> {
        self.metas.get(hash).map(|m| m.topo)
    }

    /// Validates and records one event. Duplicates are a no-op; validation
    /// failures leave the graph untouched, except that fork evidence is kept.
    pub fn insert_event(&mut self, event: Event, from_self: bool) -> HashgraphResult<()> {
        let hash = event.hash();
        if self.metas.contains_key(&hash) {
            return Ok(());
        }

        let creator_id = event.creator_id();
        let Some(peer) = self
            .store
            .superset_peers()
            .into_iter()
            .find(|p| p.id() == creator_id)
        else {
            self.reject("unknown_creator");
            return Err(HashgraphError::UnknownCreator(creator_id));
        };
        if peer.public_key != event.creator() {
            self.reject("unknown_creator");
            return Err(HashgraphError::UnknownCreator(creator_id));
        }

        if !from_self {
            let key = peer
                .verifying_key()
                .map_err(HashgraphError::InvalidSignature)?;
            if let Err(e) = event.verify_signature(&key) {
                self.reject("bad_signature");
                return Err(e);
            }
        }

        if let Some(other_parent) = event.other_parent() {
            if !self.metas.contains_key(&other_parent) && !self.store.contains_event(&other_parent)
            {
                // After a fast-forward the graph restarts at a frame; an
                // other-parent below that window is legitimate and contributes
                // no coordinates. Before any reset it means the sender skipped
                // a parent.
                if self.reset_round.is_none() {
                    self.reject("unknown_parent");
                    return Err(HashgraphError::UnknownParent(other_parent));
                }
                debug!("tolerating other parent below the reset window");
            }
        }

        let root = self.store.get_root(creator_id)?;
        let last = self.store.last_event_from(creator_id)?.or(root.head);
        let (expected_parent, expected_index) = match last {
            Some(c) => (Some(c.hash), c.index + 1),
            None => (None, 0),
        };

        if event.index() < expected_index {
            // The lane position is taken. Same event is a duplicate; a
            // different one is a fork by its creator.
            if self
                .store
                .participant_event(creator_id, event.index())
                .ok()
                == Some(hash)
            {
                return Ok(());
            }
            self.record_fork(creator_id, event)?;
            return Err(HashgraphError::Fork(creator_id));
        }
        if event.index() > expected_index {
            self.reject("index_gap");
            return Err(HashgraphError::IndexGap {
                creator: creator_id,
                expected: expected_index,
                actual: event.index(),
            });
        }
        if event.self_parent() != expected_parent {
            // Right index, wrong self parent: a second child of an older event.
            self.record_fork(creator_id, event)?;
            return Err(HashgraphError::Fork(creator_id));
        }

        self.store.set_event(event.clone())?;
        self.admit_event(&event);
        Ok(())
    }

    /// Builds the consensus bookkeeping for an already-validated, already-stored
    /// event: coordinate tables, first-descendant backfill and piggy-backed
    /// block signatures.
    fn admit_event(&mut self, event: &Event) {
        let hash = event.hash();
        let creator_id = event.creator_id();
        let mut meta = EventMeta::new(event, self.topo_seq);
        self.topo_seq += 1;

        // Merge parent coordinates into this event's last-ancestor table. A
        // parent below the live window contributes nothing; the frame roots
        // cover that boundary.
        if let Some(sp) = event.self_parent() {
            if let Some(parent) = self.metas.get(&sp) {
                meta.last_ancestors = parent.last_ancestors.clone();
            }
        }
        if let Some(op) = event.other_parent() {
            if let Some(parent) = self.metas.get(&op) {
                for (id, coordinates) in &parent.last_ancestors {
                    let entry = meta.last_ancestors.entry(*id).or_insert(*coordinates);
                    if coordinates.index > entry.index {
                        *entry = *coordinates;
                    }
                }
            }
        }
        let own = meta.coordinates(hash);
        meta.last_ancestors.insert(creator_id, own);
        meta.first_descendants.insert(creator_id, own);

        // Walk each last-ancestor's self-parent chain, marking this event as
        // the creator's first descendant until an already-marked event stops
        // the walk. Every ancestor lies on one of these chains.
        for (id, coordinates) in meta.last_ancestors.clone() {
            let mut cursor = if id == creator_id {
                meta.self_parent
            } else {
                Some(coordinates.hash)
            };
            while let Some(h) = cursor {
                let Some(ancestor) = self.metas.get_mut(&h) else {
                    break;
                };
                if ancestor.first_descendants.contains_key(&creator_id) {
                    break;
                }
                ancestor.first_descendants.insert(creator_id, own);
                cursor = ancestor.self_parent;
            }
        }

        for block_signature in event.block_signatures().to_vec() {
            self.handle_block_signature(block_signature);
        }

        self.metas.insert(hash, meta);
        self.undivided.push_back(hash);
        self.context.metrics.node_metrics.events_inserted.inc();
    }

    /// Replays every stored event into the live window, in the insertion order
    /// the store preserved. Used when reopening a durable store: the caller
    /// then re-runs consensus to rebuild rounds, blocks and peer sets.
    pub fn bootstrap(&mut self) -> HashgraphResult<()> {
        for hash in self.store.topological_events()? {
            if self.metas.contains_key(&hash) {
                continue;
            }
            let event = self.store.get_event(&hash)?;
            self.admit_event(&event);
        }
        Ok(())
    }

    fn reject(&self, cause: &str) {
        self.context
            .metrics
            .node_metrics
            .events_rejected
            .with_label_values(&[cause])
            .inc();
    }

    fn record_fork(&mut self, creator: PeerId, event: Event) -> HashgraphResult<()> {
        warn!("fork detected from {}", creator);
        self.context.metrics.node_metrics.forks_detected.inc();
        self.cheaters.insert(creator);
        self.store.add_fork_evidence(event)
    }

    /// Records a block signature carried by an event, stashing it when the
    /// block does not exist yet.
    fn handle_block_signature(&mut self, block_signature: BlockSignature) {
        let known = self
            .store
            .superset_peers()
            .iter()
            .any(|p| p.public_key == block_signature.validator);
        if !known {
            debug!("dropping block signature from unknown validator");
            return;
        }
        match self.store.get_block(block_signature.index) {
            Ok(mut block) => {
                if block.add_signature(&block_signature).is_ok() {
                    // Store write failures surface on the next fatal path.
                    let _ = self.store.set_block(block);
                }
            }
            Err(_) => {
                self.pending_block_signatures
                    .entry(block_signature.index)
                    .or_default()
                    .push(block_signature);
            }
        }
    }

    /// Assigns rounds and witness status to every event inserted since the
    /// last call, in insertion order so parents are always processed first.
    pub fn divide_rounds(&mut self) -> HashgraphResult<()> {
        while let Some(hash) = self.undivided.pop_front() {
            let (round, witness) = self.assign_round(&hash)?;

            let Some(meta) = self.metas.get_mut(&hash) else {
                continue;
            };
            meta.round = Some(round);
            meta.witness = witness;
            let creator = meta.creator;

            let active = self.store.get_peer_set(round)?;
            let counts = witness && active.contains(creator) && !self.cheaters.contains(&creator);

            let mut info = match self.store.get_round(round) {
                Ok(info) => info,
                Err(HashgraphError::NotFound { .. }) => RoundInfo::default(),
                Err(e) => return Err(e),
            };
            info.add_event(hash, counts);
            self.store.set_round(round, info)?;

            self.round_index.insert(round);
            if counts && self.last_ordered.map_or(true, |ordered| round > ordered) {
                self.undecided_rounds.insert(round);
            }
            self.undetermined.push(hash);
        }
        self.context
            .metrics
            .node_metrics
            .undetermined_events
            .set(self.undetermined.len() as i64);
        Ok(())
    }

    fn assign_round(&self, hash: &EventHash) -> HashgraphResult<(RoundIndex, bool)> {
        let meta = self
            .metas
            .get(hash)
            .ok_or(HashgraphError::NotFound { kind: "event" })?;
        let root = self.store.get_root(meta.creator)?;

        let self_parent_round = match meta.self_parent {
            None => None,
            Some(sp) => match self.metas.get(&sp).and_then(|m| m.round) {
                Some(r) => Some(r),
                // Self parent below the live window: the root carries its round.
                None => Some(root.round),
            },
        };
        let other_parent_round = meta
            .other_parent
            .and_then(|op| self.metas.get(&op))
            .and_then(|m| m.round);

        // Round numbers must stay dense: an event is at most one round above
        // an existing one. A lane starting mid-protocol therefore inherits its
        // first round from the merged parent, not from the round its owner was
        // accepted at; membership gating keeps earlier events uncommittable.
        let parent_round = match (self_parent_round, other_parent_round) {
            (None, None) => root.round,
            (sp, op) => sp.unwrap_or(0).max(op.unwrap_or(0)),
        };

        // The round advances when this event strongly sees a super-majority of
        // the parent round's witnesses, counted over the peer set active then.
        let peers = self.store.get_peer_set(parent_round)?;
        let witnesses_seen = match self.store.get_round(parent_round) {
            Ok(info) => {
                let mut authors = HashSet::new();
                for witness_hash in info.witnesses.keys() {
                    let Some(witness) = self.metas.get(witness_hash) else {
                        continue;
                    };
                    if !peers.contains(witness.creator) {
                        continue;
                    }
                    if strongly_sees(meta, witness, &peers, &self.cheaters) {
                        authors.insert(witness.creator);
                    }
                }
                authors.len()
            }
            Err(HashgraphError::NotFound { .. }) => 0,
            Err(e) => return Err(e),
        };

        let round = if witnesses_seen >= peers.super_majority() {
            parent_round + 1
        } else {
            parent_round
        };

        let witness = match self_parent_round {
            None => true,
            Some(sp_round) => round > sp_round,
        };
        Ok((round, witness))
    }

    /// Runs the virtual-voting election for every undecided witness, strictly
    /// in round order: a round's verdicts are only final once every earlier
    /// round is fully decided.
    pub fn decide_fame(&mut self) -> HashgraphResult<()> {
        let rounds: Vec<RoundIndex> = self.undecided_rounds.iter().copied().collect();
        for round in rounds {
            let mut info = self.store.get_round(round)?;
            let undecided: Vec<EventHash> = info
                .witnesses
                .iter()
                .filter(|(_, fame)| **fame == Fame::Undecided)
                .map(|(h, _)| *h)
                .collect();

            let mut changed = false;
            for witness in undecided {
                if let Some(famous) = self.elect(round, &witness)? {
                    info.set_fame(witness, if famous { Fame::Yes } else { Fame::No });
                    changed = true;
                }
            }
            if changed {
                self.store.set_round(round, info.clone())?;
            }

            if !info.witnesses.is_empty() && info.all_famous_decided() {
                self.undecided_rounds.remove(&round);
                self.context.metrics.node_metrics.rounds_decided.inc();
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Election for one witness of `round`. Voting starts one round later with
    /// direct sight, then aggregates votes through strongly-seen witnesses;
    /// every `COIN_ROUND_FREQUENCY` rounds an undecided vote falls back to a
    /// pseudo-random bit from the voter's signature.
    fn elect(&self, round: RoundIndex, candidate: &EventHash) -> HashgraphResult<Option<bool>> {
        let candidate_meta = self
            .metas
            .get(candidate)
            .ok_or(HashgraphError::NotFound { kind: "event" })?;
        let Some(last_round) = self.store.last_round() else {
            return Ok(None);
        };

        let mut votes: HashMap<EventHash, bool> = HashMap::new();
        for voting_round in (round + 1)..=last_round {
            let info = match self.store.get_round(voting_round) {
                Ok(info) => info,
                // A gap: later rounds cannot contribute votes yet.
                Err(HashgraphError::NotFound { .. }) => break,
                Err(e) => return Err(e),
            };
            let distance = voting_round - round;

            if distance == 1 {
                for witness in info.witnesses.keys() {
                    let Some(witness_meta) = self.metas.get(witness) else {
                        continue;
                    };
                    votes.insert(*witness, sees(witness_meta, candidate_meta));
                }
                continue;
            }

            let prev_info = self.store.get_round(voting_round - 1)?;
            let prev_peers = self.store.get_peer_set(voting_round - 1)?;
            let mut new_votes = HashMap::new();
            for witness in info.witnesses.keys() {
                let Some(witness_meta) = self.metas.get(witness) else {
                    continue;
                };
                let mut yes = 0usize;
                let mut no = 0usize;
                for prev_witness in prev_info.witnesses.keys() {
                    let Some(prev_meta) = self.metas.get(prev_witness) else {
                        continue;
                    };
                    if !prev_peers.contains(prev_meta.creator) {
                        continue;
                    }
                    if strongly_sees(witness_meta, prev_meta, &prev_peers, &self.cheaters) {
                        match votes.get(prev_witness) {
                            Some(true) => yes += 1,
                            Some(false) => no += 1,
                            None => {}
                        }
                    }
                }
                let vote = yes >= no;
                let tally = yes.max(no);

                if distance % COIN_ROUND_FREQUENCY != 0 {
                    if tally >= prev_peers.super_majority() {
                        return Ok(Some(vote));
                    }
                    new_votes.insert(*witness, vote);
                } else if tally >= prev_peers.super_majority() {
                    new_votes.insert(*witness, vote);
                } else {
                    new_votes.insert(*witness, middle_bit(&witness_meta.signature));
                }
            }
            votes = new_votes;
        }
        Ok(None)
    }

    /// Assigns received round and consensus order to events against the next
    /// round in line, if that round is fully decided. One round per call: the
    /// caller must seal the resulting block before the following round is
    /// ordered, because membership changes from that block shape it.
    fn order_next_round(&mut self) -> HashgraphResult<Option<RoundIndex>> {
        let candidate = match self.last_ordered {
            Some(r) => self.round_index.range(r + 1..).next().copied(),
            None => self.round_index.iter().next().copied(),
        };
        let Some(round) = candidate else {
            return Ok(None);
        };
        let mut info = self.store.get_round(round)?;
        if info.witnesses.is_empty()
            || !info.all_famous_decided()
            || self.undecided_rounds.contains(&round)
        {
            return Ok(None);
        }

        let famous = info.famous_witnesses();
        let salt = round_salt(&famous, &self.metas);

        let mut received: Vec<(TimestampMs, Vec<u8>, EventHash)> = vec![];
        let mut still_undetermined = vec![];
        for hash in std::mem::take(&mut self.undetermined) {
            let Some(meta) = self.metas.get(&hash) else {
                continue;
            };
            // Events authored outside the active set of their round are never
            // committed.
            let event_round = meta.round.unwrap_or(round);
            let active = self.store.get_peer_set(event_round)?;
            if !active.contains(meta.creator) {
                debug!(
                    "dropping event from {} outside the active set of round {}",
                    meta.creator, event_round
                );
                continue;
            }

            let seen_by_all = !famous.is_empty()
                && famous.iter().all(|w| {
                    self.metas
                        .get(w)
                        .is_some_and(|witness| sees(witness, meta))
                });
            if seen_by_all {
                let timestamp = self.consensus_timestamp(meta, &famous);
                received.push((timestamp, whiten(&meta.signature, &salt), hash));
            } else {
                still_undetermined.push(hash);
            }
        }
        self.undetermined = still_undetermined;

        received.sort();
        for (_, _, hash) in &received {
            if let Some(meta) = self.metas.get_mut(hash) {
                meta.round_received = Some(round);
                let coordinates = meta.coordinates(*hash);
                let entry = self
                    .last_consensus_events
                    .entry(meta.creator)
                    .or_insert(coordinates);
                if coordinates.index > entry.index {
                    *entry = coordinates;
                }
            }
        }

        info.received = received.iter().map(|(_, _, h)| *h).collect();
        info.decided = true;
        self.store.set_round(round, info)?;
        self.last_ordered = Some(round);
        self.context
            .metrics
            .node_metrics
            .undetermined_events
            .set(self.undetermined.len() as i64);
        Ok(Some(round))
    }

    /// Median of the timestamps at which each famous witness's lane first saw
    /// the event.
    fn consensus_timestamp(&self, event: &EventMeta, famous: &[EventHash]) -> TimestampMs {
        let mut stamps: Vec<TimestampMs> = vec![];
        for witness in famous {
            let Some(mut cursor) = self.metas.get(witness) else {
                continue;
            };
            loop {
                match cursor.self_parent.and_then(|h| self.metas.get(&h)) {
                    Some(parent) if sees(parent, event) => cursor = parent,
                    _ => break,
                }
            }
            stamps.push(cursor.timestamp_ms);
        }
        if stamps.is_empty() {
            return event.timestamp_ms;
        }
        stamps.sort_unstable();
        stamps[(stamps.len() - 1) / 2]
    }

    /// Orders rounds one at a time and turns the next block-bearing round into
    /// a block, with its frame persisted alongside. Returns `None` when no
    /// further round can be ordered yet.
    ///
    /// The block is not yet persisted: the caller commits it to the
    /// application and hands it back through [`Hashgraph::finalize_block`]
    /// before calling this again, so that membership changes take effect in
    /// strict block order at every peer.
    pub fn next_decided_block(&mut self) -> HashgraphResult<Option<Block>> {
        loop {
            let Some(round) = self.order_next_round()? else {
                return Ok(None);
            };
            let info = self.store.get_round(round)?;
            let peers = self.store.get_peer_set(round)?;

            let mut roots = BTreeMap::new();
            for peer in peers.peers() {
                roots.insert(
                    peer.id(),
                    Root {
                        round,
                        head: self.last_consensus_events.get(&peer.id()).copied(),
                    },
                );
            }
            let mut frame_events = vec![];
            for hash in &info.received {
                let Some(meta) = self.metas.get(hash) else {
                    continue;
                };
                frame_events.push(FrameEvent {
                    event: self.store.get_event(hash)?,
                    round: meta.round.unwrap_or(round),
                    witness: meta.witness,
                });
            }
            let frame = Frame {
                round,
                peers: peers.peers().to_vec(),
                roots,
                events: frame_events,
                peer_sets: self.store.all_peer_sets().into_iter().collect(),
            };
            self.store.set_frame(frame.clone())?;
            self.store.set_last_consensus_round(round)?;
            self.context
                .metrics
                .node_metrics
                .last_consensus_round
                .set(round as i64);
            if info.received.is_empty() {
                // Nothing reached consensus in this round; no block.
                continue;
            }
            if self.first_consensus_round.is_none() {
                self.first_consensus_round = Some(round);
            }

            let mut transactions = vec![];
            let mut internal_transactions = vec![];
            for hash in &info.received {
                let event = self.store.get_event(hash)?;
                transactions.extend(event.transactions().iter().cloned());
                internal_transactions.extend(event.internal_transactions().iter().cloned());
            }
            let block = Block::new(
                self.next_block_index,
                round,
                frame.digest(),
                transactions,
                internal_transactions,
            );
            self.next_block_index += 1;
            return Ok(Some(block));
        }
    }

    /// Persists a committed block and applies its accepted membership changes,
    /// scheduled `MEMBERSHIP_DELAY` rounds after the deciding round.
    pub fn finalize_block(&mut self, mut block: Block) -> HashgraphResult<Vec<MembershipChange>> {
        if let Ok(existing) = self.store.get_block(block.index()) {
            block.merge_signatures(&existing);
        }
        if let Some(stashed) = self.pending_block_signatures.remove(&block.index()) {
            for block_signature in stashed {
                if let Err(e) = block.add_signature(&block_signature) {
                    debug!("dropping stashed block signature: {}", e);
                }
            }
        }

        let effective_round = block.round_received() + MEMBERSHIP_DELAY;
        let mut current = self
            .store
            .get_peer_set(RoundIndex::MAX)
            .map_err(|_| HashgraphError::NotFound { kind: "peer set" })?;
        let mut changes = vec![];
        let mut changed = false;
        for receipt in block.receipts() {
            if !receipt.accepted {
                continue;
            }
            let peer = receipt.transaction.body.peer.clone();
            match receipt.transaction.body.op {
                PeerOp::Join => {
                    if !current.contains(peer.id()) {
                        current = current.with_peer(peer.clone());
                        changed = true;
                    }
                    changes.push(MembershipChange {
                        op: PeerOp::Join,
                        peer,
                        effective_round,
                    });
                }
                PeerOp::Leave => {
                    if current.contains(peer.id()) {
                        current = current.without_peer(peer.id());
                        changed = true;
                    }
                    changes.push(MembershipChange {
                        op: PeerOp::Leave,
                        peer,
                        effective_round,
                    });
                }
            }
        }
        if changed {
            self.store.set_peer_set(effective_round, current)?;
        }

        self.store.set_block(block)?;
        self.context.metrics.node_metrics.blocks_committed.inc();
        Ok(changes)
    }

    /// The newest block carrying enough signatures to be served to a catching-up
    /// peer, together with its frame.
    pub fn anchor_block_with_frame(&self) -> HashgraphResult<(Block, Frame)> {
        let Some(last) = self.store.last_block_index() else {
            return Err(HashgraphError::NoAnchorBlock);
        };
        for index in (0..=last).rev() {
            let Ok(block) = self.store.get_block(index) else {
                continue;
            };
            let Ok(peers) = self.store.get_peer_set(block.round_received()) else {
                continue;
            };
            if block.signatures().len() >= peers.validity_threshold() {
                if let Ok(frame) = self.store.get_frame(block.round_received()) {
                    return Ok((block, frame));
                }
            }
        }
        Err(HashgraphError::NoAnchorBlock)
    }

    /// Rebuilds the graph from a frame and its block. Everything before the
    /// frame is discarded; the node resumes as if the frame were genesis.
    pub fn reset(&mut self, block: Block, frame: Frame) -> HashgraphResult<()> {
        if block.frame_hash() != frame.digest() {
            return Err(HashgraphError::FrameMismatch);
        }

        self.store.reset(&frame)?;
        self.store.set_block(block.clone())?;

        self.metas.clear();
        self.undivided.clear();
        self.undetermined.clear();
        self.round_index.clear();
        self.undecided_rounds.clear();
        self.cheaters.clear();
        self.pending_block_signatures.clear();
        self.topo_seq = 0;
        self.round_index.insert(frame.round);
        self.last_ordered = Some(frame.round);
        self.reset_round = Some(frame.round);
        self.first_consensus_round = Some(frame.round);
        self.next_block_index = block.index() + 1;
        self.last_consensus_events = frame
            .roots
            .iter()
            .filter_map(|(id, root)| root.head.map(|head| (*id, head)))
            .collect();

        // Seed metadata for the frame's events, parents before children so the
        // coordinate tables compose. Parents outside the frame contribute
        // nothing; the roots cover that boundary.
        let in_frame: HashSet<EventHash> = frame.events.iter().map(|fe| fe.event.hash()).collect();
        let mut pending: VecDeque<&FrameEvent> = frame.events.iter().collect();
        loop {
            let before = pending.len();
            if before == 0 {
                break;
            }
            for _ in 0..before {
                let Some(frame_event) = pending.pop_front() else {
                    break;
                };
                let event = &frame_event.event;
                let parent_ready = |p: Option<EventHash>| {
                    p.map_or(true, |h| !in_frame.contains(&h) || self.metas.contains_key(&h))
                };
                if !(parent_ready(event.self_parent()) && parent_ready(event.other_parent())) {
                    pending.push_back(frame_event);
                    continue;
                }
                self.seed_frame_event(frame_event);
            }
            if pending.len() == before {
                // No ordering progress; seed the rest as window boundaries.
                for frame_event in std::mem::take(&mut pending) {
                    self.seed_frame_event(frame_event);
                }
            }
        }
        Ok(())
    }

    fn seed_frame_event(&mut self, frame_event: &FrameEvent) {
        let event = &frame_event.event;
        self.admit_event(event);
        // Frame events arrive with their consensus metadata already decided.
        self.undivided.pop_back();
        if let Some(meta) = self.metas.get_mut(&event.hash()) {
            meta.round = Some(frame_event.round);
            meta.witness = frame_event.witness;
            meta.round_received = self.last_ordered.or(Some(frame_event.round));
        }
    }

    /// Round assignment and fame elections after new insertions. Blocks are
    /// then drained one at a time through [`Hashgraph::next_decided_block`].
    pub fn run_consensus(&mut self) -> HashgraphResult<()> {
        self.divide_rounds()?;
        self.decide_fame()
    }
}

fn middle_bit(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    (bytes[bytes.len() / 2] & 1) == 1
}

fn whiten(signature: &[u8], salt: &[u8]) -> Vec<u8> {
    signature
        .iter()
        .zip(salt.iter().chain(std::iter::repeat(&0)))
        .map(|(s, w)| s ^ w)
        .collect()
}

/// XOR-fold of the famous witnesses' signatures: the per-round salt that makes
/// the order tie-break resistant to creator-chosen signatures.
fn round_salt(famous: &[EventHash], metas: &HashMap<EventHash, EventMeta>) -> Vec<u8> {
    let mut salt: Vec<u8> = vec![];
    for witness in famous {
        let Some(meta) = metas.get(witness) else {
            continue;
        };
        if salt.len() < meta.signature.len() {
            salt.resize(meta.signature.len(), 0);
        }
        for (i, byte) in meta.signature.iter().enumerate() {
            salt[i] ^= byte;
        }
    }
    salt
}
