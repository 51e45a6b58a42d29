// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::OnceLock,
};

use fastcrypto::hash::HashFunction;
use hashgraph_config::{
    DefaultHashFunction, PeerId, ValidatorKeyPair, ValidatorPublicKey, ValidatorSignature,
    DIGEST_LENGTH,
};
use serde::{Deserialize, Serialize};

use crate::{
    block::BlockSignature,
    error::{HashgraphError, HashgraphResult},
    internal_transaction::InternalTransaction,
    types::{RoundIndex, TimestampMs},
};

/// Per-creator sequence number of an event. Dense from 0 per creator.
pub type EventIndex = u64;

/// Opaque application payload carried by an event.
pub type Transaction = Vec<u8>;

/// Identity of an event: the digest of its canonically encoded body.
#[derive(Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventHash([u8; DIGEST_LENGTH]);

impl EventHash {
    pub fn new(digest: [u8; DIGEST_LENGTH]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Hash for EventHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.0[..8]);
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.0)
        )
    }
}

/// Position of an event in its creator's lane: index plus identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCoordinates {
    pub index: EventIndex,
    pub hash: EventHash,
}

/// Synthetic anchor for a validator's lane. It fixes the round floor of the
/// owner's first event and, after a fast-forward reset, points at the owner's
/// latest event inside the frame the node resumed from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub round: RoundIndex,
    pub head: Option<EventCoordinates>,
}

impl Root {
    pub fn new(round: RoundIndex) -> Self {
        Self { round, head: None }
    }

    /// Index the owner's next event must carry.
    pub fn next_index(&self) -> EventIndex {
        self.head.map(|c| c.index + 1).unwrap_or(0)
    }
}

/// The signed content of an event. Hash identity covers exactly these fields,
/// so their encoding must be byte-for-byte stable across peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventBody {
    pub transactions: Vec<Transaction>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub block_signatures: Vec<BlockSignature>,
    /// The creator's previous event, or None for the creator's first event.
    pub self_parent: Option<EventHash>,
    /// The other-party head this event merges, or None.
    pub other_parent: Option<EventHash>,
    /// Compressed public key bytes of the creator.
    pub creator: Vec<u8>,
    pub index: EventIndex,
    /// Creator-local wall clock. Advisory only.
    pub timestamp_ms: TimestampMs,
}

/// A signed gossip event: the vertex type of the hashgraph.
#[derive(Clone, Serialize, Deserialize)]
pub struct Event {
    body: EventBody,
    signature: Vec<u8>,

    #[serde(skip)]
    digest: OnceLock<EventHash>,
    #[serde(skip)]
    creator_id: OnceLock<PeerId>,
}

impl Event {
    /// Signs `body` with the creator's key pair and seals it into an event.
    pub fn new_signed(body: EventBody, keypair: &ValidatorKeyPair) -> Self {
        let mut event = Self {
            body,
            signature: vec![],
            digest: OnceLock::new(),
            creator_id: OnceLock::new(),
        };
        event.signature = keypair.sign(event.hash().as_bytes()).to_bytes();
        event
    }

    pub fn hash(&self) -> EventHash {
        *self.digest.get_or_init(|| {
            let bytes = bcs::to_bytes(&self.body).expect("serializing an event body cannot fail");
            EventHash(DefaultHashFunction::digest(bytes.as_slice()).into())
        })
    }

    pub fn coordinates(&self) -> EventCoordinates {
        EventCoordinates {
            index: self.body.index,
            hash: self.hash(),
        }
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn creator(&self) -> &[u8] {
        &self.body.creator
    }

    /// Numeric id of the creator, derived from its public key the same way
    /// `Peer::id` derives it.
    pub fn creator_id(&self) -> PeerId {
        *self.creator_id.get_or_init(|| {
            let digest: [u8; DIGEST_LENGTH] =
                DefaultHashFunction::digest(&self.body.creator).into();
            PeerId::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
        })
    }

    pub fn index(&self) -> EventIndex {
        self.body.index
    }

    pub fn self_parent(&self) -> Option<EventHash> {
        self.body.self_parent
    }

    pub fn other_parent(&self) -> Option<EventHash> {
        self.body.other_parent
    }

    pub fn timestamp_ms(&self) -> TimestampMs {
        self.body.timestamp_ms
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }

    pub fn internal_transactions(&self) -> &[InternalTransaction] {
        &self.body.internal_transactions
    }

    pub fn block_signatures(&self) -> &[BlockSignature] {
        &self.body.block_signatures
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn verify_signature(&self, key: &ValidatorPublicKey) -> HashgraphResult<()> {
        let signature = ValidatorSignature::from_bytes(&self.signature)
            .map_err(HashgraphError::InvalidSignature)?;
        key.verify(self.hash().as_bytes(), &signature)
            .map_err(HashgraphError::InvalidSignature)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event({}:{}, {:?})",
            self.creator_id(),
            self.body.index,
            self.hash()
        )
    }
}

#[cfg(test)]
mod tests {
    use hashgraph_config::ValidatorKeyPair;
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::{Event, EventBody};
    use crate::types::timestamp_utc_ms;

    fn body(keypair: &ValidatorKeyPair) -> EventBody {
        EventBody {
            transactions: vec![b"tx1".to_vec(), b"tx2".to_vec()],
            internal_transactions: vec![],
            block_signatures: vec![],
            self_parent: None,
            other_parent: None,
            creator: keypair.public().to_bytes(),
            index: 0,
            timestamp_ms: timestamp_utc_ms(),
        }
    }

    #[test]
    fn hash_is_stable_across_encode_decode() {
        let mut rng = StdRng::from_seed([1; 32]);
        let keypair = ValidatorKeyPair::generate(&mut rng);
        let event = Event::new_signed(body(&keypair), &keypair);

        let bytes = bcs::to_bytes(&event).unwrap();
        let decoded: Event = bcs::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.hash(), event.hash());
        assert_eq!(decoded, event);
        assert_eq!(decoded.signature(), event.signature());
    }

    #[test]
    fn signature_binds_body() {
        let mut rng = StdRng::from_seed([2; 32]);
        let keypair = ValidatorKeyPair::generate(&mut rng);
        let event = Event::new_signed(body(&keypair), &keypair);
        assert!(event.verify_signature(&keypair.public()).is_ok());

        let other = ValidatorKeyPair::generate(&mut rng);
        assert!(event.verify_signature(&other.public()).is_err());
    }

    #[test]
    fn creator_id_matches_peer_id() {
        let mut rng = StdRng::from_seed([4; 32]);
        let keypair = ValidatorKeyPair::generate(&mut rng);
        let peer = hashgraph_config::Peer::new(
            keypair.public().to_bytes(),
            "127.0.0.1:1".to_string(),
            "n".to_string(),
        );
        let event = Event::new_signed(body(&keypair), &keypair);
        assert_eq!(event.creator_id(), peer.id());
    }
}
