// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use fastcrypto::hash::HashFunction;
use hashgraph_config::DefaultHashFunction;
use parking_lot::Mutex;

use crate::{
    block::Block,
    error::HashgraphResult,
    event::Transaction,
    internal_transaction::InternalTransactionReceipt,
    node::state::NodeState,
    types::BlockIndex,
};

/// What the application returns from a block commit.
#[derive(Clone, Debug)]
pub struct CommitResponse {
    /// Application state fingerprint after applying the block. Opaque.
    pub state_hash: Vec<u8>,
    /// Verdict per internal transaction in the block, same order.
    pub receipts: Vec<InternalTransactionReceipt>,
}

/// Outbound interface to the application. Commits are strictly sequential:
/// block N's call returns before block N+1 is offered. The application must be
/// assumed slow and fallible.
#[async_trait]
pub trait AppProxy: Send + Sync + 'static {
    async fn commit_block(&self, block: Block) -> HashgraphResult<CommitResponse>;

    /// Application snapshot at a block, served to fast-forwarding peers. May
    /// legitimately be empty; the core never depends on a non-empty snapshot.
    async fn get_snapshot(&self, block_index: BlockIndex) -> HashgraphResult<Vec<u8>>;

    /// Rebuild application state from a snapshot, returning the state hash.
    async fn restore(&self, snapshot: &[u8]) -> HashgraphResult<Vec<u8>>;

    /// Advisory notification of controller state changes.
    async fn on_state_changed(&self, state: NodeState);
}

/// Reference in-process application: hash-chains committed transactions and
/// accepts every membership change. Used by the test suites.
pub struct InmemAppProxy {
    inner: Mutex<InmemAppState>,
}

#[derive(Default)]
struct InmemAppState {
    committed_transactions: Vec<Transaction>,
    committed_blocks: Vec<Block>,
    state_hash: Vec<u8>,
}

impl InmemAppProxy {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InmemAppState::default()),
        }
    }

    pub fn committed_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().committed_transactions.clone()
    }

    pub fn committed_blocks(&self) -> Vec<Block> {
        self.inner.lock().committed_blocks.clone()
    }

    pub fn state_hash(&self) -> Vec<u8> {
        self.inner.lock().state_hash.clone()
    }
}

impl Default for InmemAppProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppProxy for InmemAppProxy {
    async fn commit_block(&self, block: Block) -> HashgraphResult<CommitResponse> {
        let mut inner = self.inner.lock();
        for transaction in block.transactions() {
            let mut chained = inner.state_hash.clone();
            chained.extend_from_slice(transaction);
            let digest: [u8; hashgraph_config::DIGEST_LENGTH] =
                DefaultHashFunction::digest(chained.as_slice()).into();
            inner.state_hash = digest.to_vec();
            inner.committed_transactions.push(transaction.clone());
        }
        let receipts = block
            .internal_transactions()
            .iter()
            .map(|transaction| InternalTransactionReceipt {
                transaction: transaction.clone(),
                accepted: true,
            })
            .collect();
        let state_hash = inner.state_hash.clone();
        inner.committed_blocks.push(block);
        Ok(CommitResponse {
            state_hash,
            receipts,
        })
    }

    async fn get_snapshot(&self, _block_index: BlockIndex) -> HashgraphResult<Vec<u8>> {
        Ok(self.inner.lock().state_hash.clone())
    }

    async fn restore(&self, snapshot: &[u8]) -> HashgraphResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.state_hash = snapshot.to_vec();
        Ok(inner.state_hash.clone())
    }

    async fn on_state_changed(&self, _state: NodeState) {}
}
