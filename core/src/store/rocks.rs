// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, path::Path};

use hashgraph_config::{Peer, PeerId, PeerSet};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use crate::{
    block::Block,
    error::{HashgraphError, HashgraphResult},
    event::{Event, EventCoordinates, EventHash, EventIndex, Root},
    frame::Frame,
    hashgraph::rounds::RoundInfo,
    store::{InmemStore, Store},
    types::{BlockIndex, RoundIndex},
};

const CF_EVENTS: &str = "events";
const CF_LANES: &str = "lanes";
const CF_TOPO: &str = "topo";
const CF_ROUNDS: &str = "rounds";
const CF_BLOCKS: &str = "blocks";
const CF_FRAMES: &str = "frames";
const CF_ROOTS: &str = "roots";
const CF_PEER_SETS: &str = "peer_sets";
const CF_META: &str = "meta";

const ALL_CFS: [&str; 9] = [
    CF_EVENTS, CF_LANES, CF_TOPO, CF_ROUNDS, CF_BLOCKS, CF_FRAMES, CF_ROOTS, CF_PEER_SETS, CF_META,
];

const META_LAST_CONSENSUS_ROUND: &[u8] = b"last_consensus_round";
const META_TOPO_COUNTER: &[u8] = b"topo_counter";

fn lane_key(creator: PeerId, index: EventIndex) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&creator.to_be_bytes());
    key[4..].copy_from_slice(&index.to_be_bytes());
    key
}

/// Durable store: every accepted event, round, block, frame and peer set is
/// written to RocksDB column families, with an [`InmemStore`] in front as the
/// hot tier. Reads fall back to disk when the hot cache has moved on, so a
/// rejoining node can serve its full history.
pub struct RocksStore {
    cache: InmemStore,
    db: DB,
    topo_counter: Mutex<u64>,
    db_last_block: Option<BlockIndex>,
    db_last_round: Option<RoundIndex>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(cache_size: usize, path: P) -> HashgraphResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let mut store = Self {
            cache: InmemStore::new(cache_size),
            db,
            topo_counter: Mutex::new(0),
            db_last_block: None,
            db_last_round: None,
        };
        store.load_light_state()?;
        Ok(store)
    }

    /// Rebuilds the light indices (peer sets, roots, counters) from disk after
    /// reopening an existing database. Events are not loaded here: the node
    /// bootstraps them back into the hashgraph in topological order.
    fn load_light_state(&mut self) -> HashgraphResult<()> {
        let peer_sets: Vec<(RoundIndex, PeerSet)> = {
            let cf = self.cf(CF_PEER_SETS)?;
            let mut loaded = vec![];
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                let round = decode_round_key(&key)?;
                loaded.push((round, bcs::from_bytes(&value)?));
            }
            loaded
        };
        for (round, peer_set) in peer_sets {
            self.cache.set_peer_set(round, peer_set)?;
        }

        let roots: Vec<(PeerId, Root)> = {
            let cf = self.cf(CF_ROOTS)?;
            let mut loaded = vec![];
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                if key.len() != 4 {
                    return Err(HashgraphError::Storage("malformed root key".to_string()));
                }
                let creator = PeerId::from_be_bytes([key[0], key[1], key[2], key[3]]);
                loaded.push((creator, bcs::from_bytes(&value)?));
            }
            loaded
        };
        for (creator, root) in roots {
            self.cache.set_root(creator, root)?;
        }

        if let Some(bytes) = self.db.get_cf(self.cf(CF_META)?, META_LAST_CONSENSUS_ROUND)? {
            self.cache
                .set_last_consensus_round(decode_round_key(&bytes)?)?;
        }
        if let Some(bytes) = self.db.get_cf(self.cf(CF_META)?, META_TOPO_COUNTER)? {
            *self.topo_counter.lock() = decode_round_key(&bytes)?;
        }

        self.db_last_block = self.last_key(CF_BLOCKS)?;
        self.db_last_round = self.last_key(CF_ROUNDS)?;
        Ok(())
    }

    fn cf(&self, name: &'static str) -> HashgraphResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| HashgraphError::Storage(format!("missing column family {name}")))
    }

    fn last_key(&self, cf_name: &'static str) -> HashgraphResult<Option<u64>> {
        let cf = self.cf(cf_name)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(decode_round_key(&key)?))
            }
            None => Ok(None),
        }
    }

    fn persist_event(&self, batch: &mut WriteBatch, event: &Event) -> HashgraphResult<()> {
        let hash = event.hash();
        let bytes = bcs::to_bytes(event)?;
        batch.put_cf(self.cf(CF_EVENTS)?, hash.as_bytes(), bytes);
        batch.put_cf(
            self.cf(CF_LANES)?,
            lane_key(event.creator_id(), event.index()),
            hash.as_bytes(),
        );
        let mut counter = self.topo_counter.lock();
        batch.put_cf(self.cf(CF_TOPO)?, counter.to_be_bytes(), hash.as_bytes());
        *counter += 1;
        batch.put_cf(self.cf(CF_META)?, META_TOPO_COUNTER, counter.to_be_bytes());
        Ok(())
    }

    fn db_event(&self, hash: &EventHash) -> HashgraphResult<Option<Event>> {
        match self.db.get_cf(self.cf(CF_EVENTS)?, hash.as_bytes())? {
            Some(bytes) => Ok(Some(bcs::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn clear_cf(&self, cf_name: &'static str) -> HashgraphResult<()> {
        let cf = self.cf(cf_name)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(())
    }
}

fn decode_round_key(bytes: &[u8]) -> HashgraphResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| HashgraphError::Storage("malformed numeric key".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

impl Store for RocksStore {
    fn cache_size(&self) -> usize {
        self.cache.cache_size()
    }

    fn get_event(&self, hash: &EventHash) -> HashgraphResult<Event> {
        match self.cache.get_event(hash) {
            Ok(event) => Ok(event),
            Err(HashgraphError::TooFarBehind) | Err(HashgraphError::NotFound { .. }) => self
                .db_event(hash)?
                .ok_or(HashgraphError::NotFound { kind: "event" }),
            Err(e) => Err(e),
        }
    }

    fn contains_event(&self, hash: &EventHash) -> bool {
        if self.cache.contains_event(hash) {
            return true;
        }
        matches!(self.db_event(hash), Ok(Some(_)))
    }

    fn set_event(&self, event: Event) -> HashgraphResult<()> {
        if self.cache.contains_event(&event.hash()) {
            return Ok(());
        }
        // Replays after a reopen must not append a second topological entry.
        if self.db_event(&event.hash())?.is_none() {
            let mut batch = WriteBatch::default();
            self.persist_event(&mut batch, &event)?;
            self.db.write(batch)?;
        }
        self.cache.set_event(event)
    }

    fn add_fork_evidence(&self, event: Event) -> HashgraphResult<()> {
        // Evidence goes to the event table only; the creator's lane is not extended.
        let bytes = bcs::to_bytes(&event)?;
        self.db
            .put_cf(self.cf(CF_EVENTS)?, event.hash().as_bytes(), bytes)?;
        self.cache.add_fork_evidence(event)
    }

    fn fork_evidence(&self) -> Vec<Event> {
        self.cache.fork_evidence()
    }

    fn participant_events(&self, creator: PeerId, skip: i64) -> HashgraphResult<Vec<EventHash>> {
        let cached = self.cache.participant_events(creator, skip)?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        let start_index = (skip + 1).max(0) as EventIndex;
        let start = lane_key(creator, start_index);
        let cf = self.cf(CF_LANES)?;
        let mut hashes = vec![];
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item?;
            if key[..4] != creator.to_be_bytes() {
                break;
            }
            let digest: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| HashgraphError::Storage("malformed event hash".to_string()))?;
            hashes.push(EventHash::new(digest));
        }
        Ok(hashes)
    }

    fn participant_event(&self, creator: PeerId, index: EventIndex) -> HashgraphResult<EventHash> {
        if let Ok(hash) = self.cache.participant_event(creator, index) {
            return Ok(hash);
        }
        match self.db.get_cf(self.cf(CF_LANES)?, lane_key(creator, index))? {
            Some(value) => {
                let digest: [u8; 32] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| HashgraphError::Storage("malformed event hash".to_string()))?;
                Ok(EventHash::new(digest))
            }
            None => Err(HashgraphError::NotFound { kind: "event" }),
        }
    }

    fn last_event_from(&self, creator: PeerId) -> HashgraphResult<Option<EventCoordinates>> {
        if let Some(coordinates) = self.cache.last_event_from(creator)? {
            return Ok(Some(coordinates));
        }
        // Walk the lane backwards from the highest possible index.
        let end = lane_key(creator, EventIndex::MAX);
        let cf = self.cf(CF_LANES)?;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&end, Direction::Reverse))
        {
            let (key, value) = item?;
            if key[..4] != creator.to_be_bytes() {
                break;
            }
            let index = decode_round_key(&key[4..])?;
            let digest: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| HashgraphError::Storage("malformed event hash".to_string()))?;
            return Ok(Some(EventCoordinates {
                index,
                hash: EventHash::new(digest),
            }));
        }
        Ok(None)
    }

    fn known_events(&self) -> BTreeMap<PeerId, i64> {
        let mut known = self.cache.known_events();
        for (id, last) in known.iter_mut() {
            if *last < 0 {
                if let Ok(Some(coordinates)) = self.last_event_from(*id) {
                    *last = coordinates.index as i64;
                }
            }
        }
        known
    }

    fn topological_events(&self) -> HashgraphResult<Vec<EventHash>> {
        let cf = self.cf(CF_TOPO)?;
        let mut hashes = vec![];
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let digest: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| HashgraphError::Storage("malformed event hash".to_string()))?;
            hashes.push(EventHash::new(digest));
        }
        Ok(hashes)
    }

    fn get_round(&self, index: RoundIndex) -> HashgraphResult<RoundInfo> {
        match self.cache.get_round(index) {
            Ok(round) => Ok(round),
            Err(HashgraphError::NotFound { .. }) => {
                match self.db.get_cf(self.cf(CF_ROUNDS)?, index.to_be_bytes())? {
                    Some(bytes) => Ok(bcs::from_bytes(&bytes)?),
                    None => Err(HashgraphError::NotFound { kind: "round" }),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn set_round(&self, index: RoundIndex, round: RoundInfo) -> HashgraphResult<()> {
        let bytes = bcs::to_bytes(&round)?;
        self.db
            .put_cf(self.cf(CF_ROUNDS)?, index.to_be_bytes(), bytes)?;
        self.cache.set_round(index, round)
    }

    fn last_round(&self) -> Option<RoundIndex> {
        self.cache.last_round().max(self.db_last_round)
    }

    fn get_block(&self, index: BlockIndex) -> HashgraphResult<Block> {
        match self.cache.get_block(index) {
            Ok(block) => Ok(block),
            Err(HashgraphError::NotFound { .. }) => {
                match self.db.get_cf(self.cf(CF_BLOCKS)?, index.to_be_bytes())? {
                    Some(bytes) => Ok(bcs::from_bytes(&bytes)?),
                    None => Err(HashgraphError::NotFound { kind: "block" }),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn set_block(&self, block: Block) -> HashgraphResult<()> {
        let bytes = bcs::to_bytes(&block)?;
        self.db
            .put_cf(self.cf(CF_BLOCKS)?, block.index().to_be_bytes(), bytes)?;
        self.cache.set_block(block)
    }

    fn last_block_index(&self) -> Option<BlockIndex> {
        self.cache.last_block_index().max(self.db_last_block)
    }

    fn get_frame(&self, round: RoundIndex) -> HashgraphResult<Frame> {
        match self.cache.get_frame(round) {
            Ok(frame) => Ok(frame),
            Err(HashgraphError::NotFound { .. }) => {
                match self.db.get_cf(self.cf(CF_FRAMES)?, round.to_be_bytes())? {
                    Some(bytes) => Ok(bcs::from_bytes(&bytes)?),
                    None => Err(HashgraphError::NotFound { kind: "frame" }),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn set_frame(&self, frame: Frame) -> HashgraphResult<()> {
        let bytes = bcs::to_bytes(&frame)?;
        self.db
            .put_cf(self.cf(CF_FRAMES)?, frame.round.to_be_bytes(), bytes)?;
        self.cache.set_frame(frame)
    }

    fn get_root(&self, creator: PeerId) -> HashgraphResult<Root> {
        self.cache.get_root(creator)
    }

    fn set_root(&self, creator: PeerId, root: Root) -> HashgraphResult<()> {
        let bytes = bcs::to_bytes(&root)?;
        self.db
            .put_cf(self.cf(CF_ROOTS)?, creator.to_be_bytes(), bytes)?;
        self.cache.set_root(creator, root)
    }

    fn get_peer_set(&self, round: RoundIndex) -> HashgraphResult<PeerSet> {
        self.cache.get_peer_set(round)
    }

    fn set_peer_set(&self, round: RoundIndex, peer_set: PeerSet) -> HashgraphResult<()> {
        let bytes = bcs::to_bytes(&peer_set)?;
        self.db
            .put_cf(self.cf(CF_PEER_SETS)?, round.to_be_bytes(), bytes)?;
        self.cache.set_peer_set(round, peer_set)?;
        // Roots seeded for new members must be durable as well.
        for peer in self.cache.superset_peers() {
            if self.db.get_cf(self.cf(CF_ROOTS)?, peer.id().to_be_bytes())?.is_none() {
                let root = self.cache.get_root(peer.id())?;
                self.db.put_cf(
                    self.cf(CF_ROOTS)?,
                    peer.id().to_be_bytes(),
                    bcs::to_bytes(&root)?,
                )?;
            }
        }
        Ok(())
    }

    fn all_peer_sets(&self) -> BTreeMap<RoundIndex, PeerSet> {
        self.cache.all_peer_sets()
    }

    fn superset_peers(&self) -> Vec<Peer> {
        self.cache.superset_peers()
    }

    fn first_round_of(&self, creator: PeerId) -> Option<RoundIndex> {
        self.cache.first_round_of(creator)
    }

    fn last_consensus_round(&self) -> Option<RoundIndex> {
        self.cache.last_consensus_round()
    }

    fn set_last_consensus_round(&self, round: RoundIndex) -> HashgraphResult<()> {
        self.db.put_cf(
            self.cf(CF_META)?,
            META_LAST_CONSENSUS_ROUND,
            round.to_be_bytes(),
        )?;
        self.cache.set_last_consensus_round(round)
    }

    fn reset(&self, frame: &Frame) -> HashgraphResult<()> {
        for cf_name in [
            CF_EVENTS,
            CF_LANES,
            CF_TOPO,
            CF_ROUNDS,
            CF_FRAMES,
            CF_ROOTS,
            CF_PEER_SETS,
        ] {
            self.clear_cf(cf_name)?;
        }
        self.cache.reset(frame)?;

        let mut batch = WriteBatch::default();
        for (creator, root) in &frame.roots {
            batch.put_cf(self.cf(CF_ROOTS)?, creator.to_be_bytes(), bcs::to_bytes(root)?);
        }
        for (round, peer_set) in &frame.peer_sets {
            batch.put_cf(
                self.cf(CF_PEER_SETS)?,
                round.to_be_bytes(),
                bcs::to_bytes(peer_set)?,
            );
        }
        for frame_event in &frame.events {
            self.persist_event(&mut batch, &frame_event.event)?;
        }
        batch.put_cf(
            self.cf(CF_ROUNDS)?,
            frame.round.to_be_bytes(),
            bcs::to_bytes(&self.cache.get_round(frame.round)?)?,
        );
        batch.put_cf(self.cf(CF_FRAMES)?, frame.round.to_be_bytes(), bcs::to_bytes(frame)?);
        batch.put_cf(
            self.cf(CF_META)?,
            META_LAST_CONSENSUS_ROUND,
            frame.round.to_be_bytes(),
        );
        self.db.write(batch)?;
        Ok(())
    }
}
