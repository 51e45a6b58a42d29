// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use hashgraph_config::PeerId;
use thiserror::Error;

use crate::event::{EventHash, EventIndex};
use crate::types::RoundIndex;

/// Errors surfaced by the hashgraph core. Validation errors reject the offending
/// input and leave graph state untouched; storage errors are fatal to the node.
#[derive(Debug, Error)]
pub enum HashgraphError {
    #[error("failed to deserialize: {0}")]
    Malformed(#[from] bcs::Error),

    #[error("invalid signature: {0}")]
    InvalidSignature(fastcrypto::error::FastCryptoError),

    #[error("creator {0} is not a known peer")]
    UnknownCreator(PeerId),

    #[error("unknown parent {0:?}")]
    UnknownParent(EventHash),

    #[error("event index gap for creator {creator}: expected {expected}, got {actual}")]
    IndexGap {
        creator: PeerId,
        expected: EventIndex,
        actual: EventIndex,
    },

    #[error("fork detected from creator {0}")]
    Fork(PeerId),

    #[error("{kind} not found in store")]
    NotFound { kind: &'static str },

    #[error("peer set already registered for round {0} with different members")]
    PeerSetConflict(RoundIndex),

    #[error("frame digest does not match block frame hash")]
    FrameMismatch,

    #[error("no anchor block available")]
    NoAnchorBlock,

    #[error("pending queue is full")]
    QueueFull,

    #[error("peer is too far behind the live cache window")]
    TooFarBehind,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("rpc deadline exceeded")]
    Timeout,

    #[error("request rejected by peer: {0}")]
    Rejected(String),

    #[error("node is shutting down")]
    Shutdown,
}

impl From<rocksdb::Error> for HashgraphError {
    fn from(err: rocksdb::Error) -> Self {
        HashgraphError::Storage(err.to_string())
    }
}

pub type HashgraphResult<T> = Result<T, HashgraphError>;
