// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

mod app_proxy;
mod block;
mod constants;
mod context;
mod core;
mod error;
mod event;
mod frame;
mod hashgraph;
mod internal_transaction;
mod metrics;
mod node;
mod peer_set_cache;
mod store;
mod transport;
mod types;
mod validator;

pub use app_proxy::{AppProxy, CommitResponse, InmemAppProxy};
pub use block::{Block, BlockBody, BlockSignature};
pub use context::Context;
pub use core::Core;
pub use error::{HashgraphError, HashgraphResult};
pub use event::{Event, EventBody, EventCoordinates, EventHash, EventIndex, Root, Transaction};
pub use frame::{Frame, FrameEvent};
pub use hashgraph::{rounds::Fame, rounds::RoundInfo, Hashgraph, MembershipChange};
pub use internal_transaction::{
    InternalTransaction, InternalTransactionBody, InternalTransactionReceipt, PeerOp,
};
pub use node::{state::NodeState, Node};
pub use peer_set_cache::PeerSetCache;
pub use store::{open_store, InmemStore, RocksStore, Store};
pub use transport::{
    messages, InboundRpc, MemNetwork, MemTransport, TcpTransport, Transport,
};
pub use types::{timestamp_utc_ms, BlockIndex, RoundIndex, TimestampMs};
pub use validator::Validator;
