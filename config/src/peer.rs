// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, fmt, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::{DefaultHashFunction, ValidatorPublicKey, DIGEST_LENGTH};
use fastcrypto::hash::HashFunction;

/// Each validator is identified by a numeric id derived from its public key.
pub type PeerId = u32;

/// One validator of the network: its signing identity, where to reach it, and a
/// human-readable moniker for logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Compressed secp256k1 public key bytes.
    pub public_key: Vec<u8>,
    /// `host:port` the validator's transport listens on.
    pub address: String,
    /// The validator's moniker, for logging only.
    pub moniker: String,

    #[serde(skip)]
    id: OnceLock<PeerId>,
}

impl Peer {
    pub fn new(public_key: Vec<u8>, address: String, moniker: String) -> Self {
        Self {
            public_key,
            address,
            moniker,
            id: OnceLock::new(),
        }
    }

    /// Numeric id of the peer: the first four bytes of the digest of its public key.
    pub fn id(&self) -> PeerId {
        *self.id.get_or_init(|| {
            let digest: [u8; DIGEST_LENGTH] = DefaultHashFunction::digest(&self.public_key).into();
            PeerId::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
        })
    }

    pub fn verifying_key(&self) -> Result<ValidatorPublicKey, fastcrypto::error::FastCryptoError> {
        ValidatorPublicKey::from_bytes(&self.public_key)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for Peer {}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.moniker, self.id(), self.address)
    }
}

/// An ordered set of validators, effective from some round. Ordering is by public
/// key bytes so every honest peer derives the identical set from the same members.
#[derive(Clone, Serialize, Deserialize)]
pub struct PeerSet {
    peers: Vec<Peer>,

    #[serde(skip)]
    by_id: OnceLock<HashMap<PeerId, usize>>,
}

impl PeerSet {
    pub fn new(mut peers: Vec<Peer>) -> Self {
        peers.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        peers.dedup_by(|a, b| a.public_key == b.public_key);
        Self {
            peers,
            by_id: OnceLock::new(),
        }
    }

    fn by_id(&self) -> &HashMap<PeerId, usize> {
        self.by_id.get_or_init(|| {
            self.peers
                .iter()
                .enumerate()
                .map(|(i, p)| (p.id(), i))
                .collect()
        })
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.iter().map(|p| p.id())
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.by_id().get(&id).map(|i| &self.peers[*i])
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.by_id().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Minimum number of members amounting to strictly more than 2/3 of the set.
    pub fn super_majority(&self) -> usize {
        2 * self.peers.len() / 3 + 1
    }

    /// Minimum number of members guaranteed to include one honest validator (f+1).
    pub fn validity_threshold(&self) -> usize {
        (self.peers.len() + 2) / 3
    }

    /// A new set with `peer` added. Adding an existing member returns an equal set.
    pub fn with_peer(&self, peer: Peer) -> Self {
        let mut peers = self.peers.clone();
        peers.push(peer);
        Self::new(peers)
    }

    /// A new set with the member identified by `id` removed.
    pub fn without_peer(&self, id: PeerId) -> Self {
        Self::new(
            self.peers
                .iter()
                .filter(|p| p.id() != id)
                .cloned()
                .collect(),
        )
    }

    /// Digest over the ordered member public keys, used to compare sets across peers.
    pub fn digest(&self) -> [u8; DIGEST_LENGTH] {
        let keys: Vec<&[u8]> = self.peers.iter().map(|p| p.public_key.as_slice()).collect();
        let bytes = bcs::to_bytes(&keys).expect("serializing public keys cannot fail");
        DefaultHashFunction::digest(bytes.as_slice()).into()
    }
}

impl PartialEq for PeerSet {
    fn eq(&self, other: &Self) -> bool {
        self.peers == other.peers
    }
}

impl Eq for PeerSet {}

impl fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.peers.iter()).finish()
    }
}
