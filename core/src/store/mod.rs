// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod inmem;
pub(crate) mod rocks;

pub use inmem::InmemStore;
pub use rocks::RocksStore;

use std::{collections::BTreeMap, sync::Arc};

use hashgraph_config::{Parameters, Peer, PeerId, PeerSet, StoreKind};

use crate::{
    block::Block,
    error::{HashgraphError, HashgraphResult},
    event::{Event, EventCoordinates, EventHash, EventIndex, Root},
    frame::Frame,
    hashgraph::rounds::RoundInfo,
    types::{BlockIndex, RoundIndex},
};

/// Opens the store variant the configuration names.
pub fn open_store(parameters: &Parameters) -> HashgraphResult<Arc<dyn Store>> {
    match parameters.store {
        StoreKind::Inmem => Ok(Arc::new(InmemStore::new(parameters.cache_size))),
        StoreKind::Durable => {
            let path = parameters.db_path.as_ref().ok_or(HashgraphError::Storage(
                "durable store requires a database path".to_string(),
            ))?;
            Ok(Arc::new(RocksStore::open(parameters.cache_size, path)?))
        }
    }
}

/// Persistence contract of the hashgraph.
///
/// Writes go through the hashgraph only; reads may come from any task holding a
/// reference. Get-after-put within one actor sees the written value; nothing
/// more is promised across actors — the hashgraph serializes all mutation.
pub trait Store: Send + Sync + 'static {
    fn cache_size(&self) -> usize;

    // Events.
    fn get_event(&self, hash: &EventHash) -> HashgraphResult<Event>;
    fn contains_event(&self, hash: &EventHash) -> bool;
    fn set_event(&self, event: Event) -> HashgraphResult<()>;
    /// Stores a forked event as evidence without touching the creator's lane.
    fn add_fork_evidence(&self, event: Event) -> HashgraphResult<()>;
    fn fork_evidence(&self) -> Vec<Event>;

    /// Hashes of `creator`'s events with index strictly greater than `skip`,
    /// ascending. `skip = -1` returns the whole lane.
    fn participant_events(&self, creator: PeerId, skip: i64) -> HashgraphResult<Vec<EventHash>>;
    fn participant_event(&self, creator: PeerId, index: EventIndex) -> HashgraphResult<EventHash>;
    fn last_event_from(&self, creator: PeerId) -> HashgraphResult<Option<EventCoordinates>>;
    /// Last known index per participant in the superset, -1 for members with no
    /// events yet.
    fn known_events(&self) -> BTreeMap<PeerId, i64>;
    /// Every live event hash in insertion order. Parents precede children.
    fn topological_events(&self) -> HashgraphResult<Vec<EventHash>>;

    // Rounds.
    fn get_round(&self, index: RoundIndex) -> HashgraphResult<RoundInfo>;
    fn set_round(&self, index: RoundIndex, round: RoundInfo) -> HashgraphResult<()>;
    fn last_round(&self) -> Option<RoundIndex>;

    // Blocks.
    fn get_block(&self, index: BlockIndex) -> HashgraphResult<Block>;
    fn set_block(&self, block: Block) -> HashgraphResult<()>;
    fn last_block_index(&self) -> Option<BlockIndex>;

    // Frames.
    fn get_frame(&self, round: RoundIndex) -> HashgraphResult<Frame>;
    fn set_frame(&self, frame: Frame) -> HashgraphResult<()>;

    // Roots.
    fn get_root(&self, creator: PeerId) -> HashgraphResult<Root>;
    fn set_root(&self, creator: PeerId, root: Root) -> HashgraphResult<()>;

    // Peer sets.
    fn get_peer_set(&self, round: RoundIndex) -> HashgraphResult<PeerSet>;
    fn set_peer_set(&self, round: RoundIndex, peer_set: PeerSet) -> HashgraphResult<()>;
    fn all_peer_sets(&self) -> BTreeMap<RoundIndex, PeerSet>;
    fn superset_peers(&self) -> Vec<Peer>;
    fn first_round_of(&self, creator: PeerId) -> Option<RoundIndex>;

    fn last_consensus_round(&self) -> Option<RoundIndex>;
    fn set_last_consensus_round(&self, round: RoundIndex) -> HashgraphResult<()>;

    /// Drops all live state and reseeds the store from `frame`. Blocks already
    /// persisted are kept: the block stream is append-only.
    fn reset(&self, frame: &Frame) -> HashgraphResult<()>;
}
