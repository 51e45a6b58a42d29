// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use hashgraph_config::{Peer, PeerId};
use serde::{Deserialize, Serialize};

use crate::{
    block::Block, event::Event, frame::Frame, internal_transaction::InternalTransaction,
    types::RoundIndex,
};

/// Pull: "here is what I know, send me what I'm missing".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_id: PeerId,
    /// Last known event index per participant, -1 for none.
    pub known: BTreeMap<PeerId, i64>,
    pub sync_limit: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub from_id: PeerId,
    /// Missing events in topological order, parents first.
    pub events: Vec<Event>,
    /// The responder's own knowledge, for the push-back leg.
    pub known: BTreeMap<PeerId, i64>,
}

/// Push: events the initiator knows the responder is missing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EagerSyncRequest {
    pub from_id: PeerId,
    pub events: Vec<Event>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EagerSyncResponse {
    pub from_id: PeerId,
    pub success: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FastForwardRequest {
    pub from_id: PeerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FastForwardResponse {
    pub from_id: PeerId,
    pub block: Block,
    pub frame: Frame,
    pub snapshot: Vec<u8>,
}

/// Membership request, relayed into the receiver's next self-event. The inner
/// transaction is signed by the subject peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub transaction: InternalTransaction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub from_id: PeerId,
    pub accepted: bool,
    /// Round at which the membership takes effect, when accepted.
    pub accepted_round: Option<RoundIndex>,
    /// The responder's current active set, so a joiner learns its peers.
    pub peers: Vec<Peer>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub transaction: InternalTransaction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub from_id: PeerId,
    pub accepted: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    Sync(SyncRequest),
    EagerSync(EagerSyncRequest),
    FastForward(FastForwardRequest),
    Join(JoinRequest),
    Leave(LeaveRequest),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Sync(SyncResponse),
    EagerSync(EagerSyncResponse),
    FastForward(FastForwardResponse),
    Join(JoinResponse),
    Leave(LeaveResponse),
    Error(String),
}
