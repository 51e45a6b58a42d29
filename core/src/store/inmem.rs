// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::{BTreeMap, HashMap},
    num::NonZeroUsize,
};

use hashgraph_config::{Peer, PeerId, PeerSet};
use lru::LruCache;
use parking_lot::RwLock;

use crate::{
    block::Block,
    error::{HashgraphError, HashgraphResult},
    event::{Event, EventCoordinates, EventHash, EventIndex, Root},
    frame::Frame,
    hashgraph::rounds::RoundInfo,
    peer_set_cache::PeerSetCache,
    store::Store,
    types::{BlockIndex, RoundIndex},
};

/// In-memory store: bounded LRU hot cache for event bodies, unbounded light
/// indices. An event evicted from the hot cache is reported as behind the cache
/// window, which callers translate into a fast-forward.
pub struct InmemStore {
    cache_size: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    events: LruCache<EventHash, Event>,
    topo: Vec<EventHash>,
    topo_index: HashMap<EventHash, u64>,
    topo_counter: u64,
    lanes: HashMap<PeerId, BTreeMap<EventIndex, EventHash>>,
    forks: Vec<Event>,
    rounds: BTreeMap<RoundIndex, RoundInfo>,
    blocks: BTreeMap<BlockIndex, Block>,
    frames: BTreeMap<RoundIndex, Frame>,
    roots: HashMap<PeerId, Root>,
    peer_sets: PeerSetCache,
    last_consensus_round: Option<RoundIndex>,
}

impl InmemStore {
    pub fn new(cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size.max(1)).expect("cache size is at least 1");
        Self {
            cache_size,
            inner: RwLock::new(Inner {
                events: LruCache::new(cap),
                topo: vec![],
                topo_index: HashMap::new(),
                topo_counter: 0,
                lanes: HashMap::new(),
                forks: vec![],
                rounds: BTreeMap::new(),
                blocks: BTreeMap::new(),
                frames: BTreeMap::new(),
                roots: HashMap::new(),
                peer_sets: PeerSetCache::new(),
                last_consensus_round: None,
            }),
        }
    }
}

impl Inner {
    /// Registers a peer set and seeds a root for members seen for the first
    /// time: a joiner's first event must not be assigned a round below the one
    /// it was accepted at.
    fn set_peer_set(&mut self, round: RoundIndex, peer_set: PeerSet) -> HashgraphResult<()> {
        self.peer_sets.set_peer_set(round, peer_set.clone())?;
        for peer in peer_set.peers() {
            self.roots
                .entry(peer.id())
                .or_insert_with(|| Root::new(round));
        }
        Ok(())
    }

    fn set_event(&mut self, event: Event) {
        let hash = event.hash();
        if self.topo_index.contains_key(&hash) {
            return;
        }
        self.topo_index.insert(hash, self.topo_counter);
        self.topo_counter += 1;
        self.topo.push(hash);
        self.lanes
            .entry(event.creator_id())
            .or_default()
            .insert(event.index(), hash);
        self.events.push(hash, event);
    }
}

impl Store for InmemStore {
    fn cache_size(&self) -> usize {
        self.cache_size
    }

    fn get_event(&self, hash: &EventHash) -> HashgraphResult<Event> {
        let mut inner = self.inner.write();
        if let Some(event) = inner.events.get(hash) {
            return Ok(event.clone());
        }
        if inner.topo_index.contains_key(hash) {
            // Known but evicted from the hot cache.
            return Err(HashgraphError::TooFarBehind);
        }
        Err(HashgraphError::NotFound { kind: "event" })
    }

    fn contains_event(&self, hash: &EventHash) -> bool {
        self.inner.read().topo_index.contains_key(hash)
    }

    fn set_event(&self, event: Event) -> HashgraphResult<()> {
        self.inner.write().set_event(event);
        Ok(())
    }

    fn add_fork_evidence(&self, event: Event) -> HashgraphResult<()> {
        self.inner.write().forks.push(event);
        Ok(())
    }

    fn fork_evidence(&self) -> Vec<Event> {
        self.inner.read().forks.clone()
    }

    fn participant_events(&self, creator: PeerId, skip: i64) -> HashgraphResult<Vec<EventHash>> {
        let start = (skip + 1).max(0) as EventIndex;
        let inner = self.inner.read();
        Ok(inner
            .lanes
            .get(&creator)
            .map(|lane| lane.range(start..).map(|(_, h)| *h).collect())
            .unwrap_or_default())
    }

    fn participant_event(&self, creator: PeerId, index: EventIndex) -> HashgraphResult<EventHash> {
        self.inner
            .read()
            .lanes
            .get(&creator)
            .and_then(|lane| lane.get(&index))
            .copied()
            .ok_or(HashgraphError::NotFound { kind: "event" })
    }

    fn last_event_from(&self, creator: PeerId) -> HashgraphResult<Option<EventCoordinates>> {
        let inner = self.inner.read();
        Ok(inner.lanes.get(&creator).and_then(|lane| {
            lane.iter()
                .next_back()
                .map(|(index, hash)| EventCoordinates {
                    index: *index,
                    hash: *hash,
                })
        }))
    }

    fn known_events(&self) -> BTreeMap<PeerId, i64> {
        let inner = self.inner.read();
        let mut known = BTreeMap::new();
        for peer in inner.peer_sets.superset_peers() {
            let id = peer.id();
            let last = inner
                .lanes
                .get(&id)
                .and_then(|lane| lane.keys().next_back().map(|i| *i as i64))
                .or_else(|| {
                    inner
                        .roots
                        .get(&id)
                        .and_then(|r| r.head.map(|c| c.index as i64))
                })
                .unwrap_or(-1);
            known.insert(id, last);
        }
        known
    }

    fn topological_events(&self) -> HashgraphResult<Vec<EventHash>> {
        Ok(self.inner.read().topo.clone())
    }

    fn get_round(&self, index: RoundIndex) -> HashgraphResult<RoundInfo> {
        self.inner
            .read()
            .rounds
            .get(&index)
            .cloned()
            .ok_or(HashgraphError::NotFound { kind: "round" })
    }

    fn set_round(&self, index: RoundIndex, round: RoundInfo) -> HashgraphResult<()> {
        self.inner.write().rounds.insert(index, round);
        Ok(())
    }

    fn last_round(&self) -> Option<RoundIndex> {
        self.inner.read().rounds.keys().next_back().copied()
    }

    fn get_block(&self, index: BlockIndex) -> HashgraphResult<Block> {
        self.inner
            .read()
            .blocks
            .get(&index)
            .cloned()
            .ok_or(HashgraphError::NotFound { kind: "block" })
    }

    fn set_block(&self, block: Block) -> HashgraphResult<()> {
        self.inner.write().blocks.insert(block.index(), block);
        Ok(())
    }

    fn last_block_index(&self) -> Option<BlockIndex> {
        self.inner.read().blocks.keys().next_back().copied()
    }

    fn get_frame(&self, round: RoundIndex) -> HashgraphResult<Frame> {
        self.inner
            .read()
            .frames
            .get(&round)
            .cloned()
            .ok_or(HashgraphError::NotFound { kind: "frame" })
    }

    fn set_frame(&self, frame: Frame) -> HashgraphResult<()> {
        self.inner.write().frames.insert(frame.round, frame);
        Ok(())
    }

    fn get_root(&self, creator: PeerId) -> HashgraphResult<Root> {
        self.inner
            .read()
            .roots
            .get(&creator)
            .cloned()
            .ok_or(HashgraphError::NotFound { kind: "root" })
    }

    fn set_root(&self, creator: PeerId, root: Root) -> HashgraphResult<()> {
        self.inner.write().roots.insert(creator, root);
        Ok(())
    }

    fn get_peer_set(&self, round: RoundIndex) -> HashgraphResult<PeerSet> {
        self.inner
            .read()
            .peer_sets
            .peer_set_at(round)
            .cloned()
            .ok_or(HashgraphError::NotFound { kind: "peer set" })
    }

    fn set_peer_set(&self, round: RoundIndex, peer_set: PeerSet) -> HashgraphResult<()> {
        self.inner.write().set_peer_set(round, peer_set)
    }

    fn all_peer_sets(&self) -> BTreeMap<RoundIndex, PeerSet> {
        self.inner.read().peer_sets.all().clone()
    }

    fn superset_peers(&self) -> Vec<Peer> {
        self.inner.read().peer_sets.superset_peers().to_vec()
    }

    fn first_round_of(&self, creator: PeerId) -> Option<RoundIndex> {
        self.inner.read().peer_sets.first_round_of(creator)
    }

    fn last_consensus_round(&self) -> Option<RoundIndex> {
        self.inner.read().last_consensus_round
    }

    fn set_last_consensus_round(&self, round: RoundIndex) -> HashgraphResult<()> {
        self.inner.write().last_consensus_round = Some(round);
        Ok(())
    }

    fn reset(&self, frame: &Frame) -> HashgraphResult<()> {
        let mut inner = self.inner.write();
        let cap = NonZeroUsize::new(self.cache_size.max(1)).expect("cache size is at least 1");
        inner.events = LruCache::new(cap);
        inner.topo.clear();
        inner.topo_index.clear();
        inner.lanes.clear();
        inner.rounds.clear();
        inner.frames.clear();
        inner.peer_sets = PeerSetCache::new();
        inner.roots = frame.roots.iter().map(|(id, r)| (*id, r.clone())).collect();

        for (round, peer_set) in &frame.peer_sets {
            inner.set_peer_set(*round, peer_set.clone())?;
        }

        let mut round_info = RoundInfo::default();
        for frame_event in &frame.events {
            let hash = frame_event.event.hash();
            round_info.add_event(hash, frame_event.witness);
            round_info.received.push(hash);
            inner.set_event(frame_event.event.clone());
        }
        round_info.decided = true;
        inner.rounds.insert(frame.round, round_info);

        inner.frames.insert(frame.round, frame.clone());
        inner.last_consensus_round = Some(frame.round);
        Ok(())
    }
}
