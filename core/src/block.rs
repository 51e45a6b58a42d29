// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;

use fastcrypto::hash::HashFunction;
use hashgraph_config::{
    DefaultHashFunction, ValidatorKeyPair, ValidatorPublicKey, ValidatorSignature, DIGEST_LENGTH,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{HashgraphError, HashgraphResult},
    event::Transaction,
    internal_transaction::{InternalTransaction, InternalTransactionReceipt},
    types::{BlockIndex, RoundIndex},
};

/// A validator's signature over a block body, piggy-backed on gossip events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Compressed public key bytes of the signer.
    pub validator: Vec<u8>,
    pub index: BlockIndex,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub index: BlockIndex,
    /// Round whose decision produced this block.
    pub round_received: RoundIndex,
    /// Digest of the frame snapshotting the same round.
    pub frame_hash: [u8; DIGEST_LENGTH],
    /// Committed transactions in consensus order.
    pub transactions: Vec<Transaction>,
    /// Committed membership change requests in consensus order.
    pub internal_transactions: Vec<InternalTransaction>,
    /// Membership change outcomes, filled in by the application commit.
    pub internal_transaction_receipts: Vec<InternalTransactionReceipt>,
    /// State fingerprint returned by the application commit. Opaque.
    pub state_hash: Vec<u8>,
}

/// One entry of the totally ordered output stream. The body is identical across
/// honest peers; the signature map grows independently at each peer as
/// signatures arrive through gossip.
#[derive(Clone, Serialize, Deserialize)]
pub struct Block {
    body: BlockBody,
    signatures: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Block {
    pub fn new(
        index: BlockIndex,
        round_received: RoundIndex,
        frame_hash: [u8; DIGEST_LENGTH],
        transactions: Vec<Transaction>,
        internal_transactions: Vec<InternalTransaction>,
    ) -> Self {
        Self {
            body: BlockBody {
                index,
                round_received,
                frame_hash,
                transactions,
                internal_transactions,
                internal_transaction_receipts: vec![],
                state_hash: vec![],
            },
            signatures: BTreeMap::new(),
        }
    }

    pub fn body(&self) -> &BlockBody {
        &self.body
    }

    pub fn index(&self) -> BlockIndex {
        self.body.index
    }

    pub fn round_received(&self) -> RoundIndex {
        self.body.round_received
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }

    pub fn internal_transactions(&self) -> &[InternalTransaction] {
        &self.body.internal_transactions
    }

    pub fn receipts(&self) -> &[InternalTransactionReceipt] {
        &self.body.internal_transaction_receipts
    }

    pub fn state_hash(&self) -> &[u8] {
        &self.body.state_hash
    }

    pub fn frame_hash(&self) -> [u8; DIGEST_LENGTH] {
        self.body.frame_hash
    }

    /// Records the application's commit outcome. Must happen before the block
    /// is signed: signatures cover the completed body.
    pub fn set_commit_outcome(
        &mut self,
        state_hash: Vec<u8>,
        receipts: Vec<InternalTransactionReceipt>,
    ) {
        self.body.state_hash = state_hash;
        self.body.internal_transaction_receipts = receipts;
    }

    /// Digest of the completed body. Not cached: the body is finalized only
    /// after the application commit fills in its outcome.
    pub fn digest(&self) -> [u8; DIGEST_LENGTH] {
        let bytes = bcs::to_bytes(&self.body).expect("serializing a block body cannot fail");
        DefaultHashFunction::digest(bytes.as_slice()).into()
    }

    pub fn sign(&self, keypair: &ValidatorKeyPair) -> BlockSignature {
        BlockSignature {
            validator: keypair.public().to_bytes(),
            index: self.body.index,
            signature: keypair.sign(&self.digest()).to_bytes(),
        }
    }

    /// Verifies and records a signature. Unknown or invalid signers are
    /// rejected; re-adding an existing signature is a no-op.
    pub fn add_signature(&mut self, block_signature: &BlockSignature) -> HashgraphResult<()> {
        let key = ValidatorPublicKey::from_bytes(&block_signature.validator)
            .map_err(HashgraphError::InvalidSignature)?;
        let signature = ValidatorSignature::from_bytes(&block_signature.signature)
            .map_err(HashgraphError::InvalidSignature)?;
        key.verify(&self.digest(), &signature)
            .map_err(HashgraphError::InvalidSignature)?;
        self.signatures.insert(
            block_signature.validator.clone(),
            block_signature.signature.clone(),
        );
        Ok(())
    }

    pub fn signatures(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.signatures
    }

    /// Copies signatures already verified and stored elsewhere, e.g. when a
    /// replayed block is re-finalized during bootstrap.
    pub fn merge_signatures(&mut self, other: &Block) {
        for (validator, signature) in other.signatures() {
            self.signatures
                .entry(validator.clone())
                .or_insert_with(|| signature.clone());
        }
    }

    /// Number of signatures that verify against this body and belong to
    /// members of `peers`. Fast-forward initiators use this to judge an anchor
    /// block served by an untrusted responder.
    pub fn verify_signatures(&self, peers: &hashgraph_config::PeerSet) -> usize {
        let digest = self.digest();
        self.signatures
            .iter()
            .filter(|(validator, signature)| {
                let member = peers.peers().iter().any(|p| &p.public_key == *validator);
                if !member {
                    return false;
                }
                let (Ok(key), Ok(signature)) = (
                    ValidatorPublicKey::from_bytes(validator),
                    ValidatorSignature::from_bytes(signature),
                ) else {
                    return false;
                };
                key.verify(&digest, &signature).is_ok()
            })
            .count()
    }
}

/// Block equality ignores the signature map: bodies are what consensus fixes.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl Eq for Block {}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block({}, round {}, {} txs, {} sigs)",
            self.body.index,
            self.body.round_received,
            self.body.transactions.len(),
            self.signatures.len()
        )
    }
}
