// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Here we select the cryptographic types that are used by default in the code base.
//! The whole code base should only:
//! - refer to those aliases and not use the individual scheme implementations
//! - not use the schemes in a way that break genericity (e.g. using their Struct impl functions)
//! - swap one of those aliases to point to another type if necessary
//!
//! Beware: if you change those aliases to point to another scheme implementation, you will have
//! to change all of them to point to concrete types that work with each other.

use fastcrypto::{
    error::FastCryptoError,
    hash::{Blake2b256, HashFunction},
    secp256k1,
    traits::{KeyPair as _, Signer as _, ToFromBytes as _, VerifyingKey as _},
};
use serde::{Deserialize, Serialize};

/// Validator key signs events and blocks, and doubles as the validator's on-wire identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorPublicKey(secp256k1::Secp256k1PublicKey);
pub struct ValidatorPrivateKey(secp256k1::Secp256k1PrivateKey);
pub struct ValidatorKeyPair(secp256k1::Secp256k1KeyPair);
pub struct ValidatorSignature(secp256k1::Secp256k1Signature);

impl ValidatorPublicKey {
    pub fn new(key: secp256k1::Secp256k1PublicKey) -> Self {
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FastCryptoError> {
        Ok(Self(secp256k1::Secp256k1PublicKey::from_bytes(bytes)?))
    }

    pub fn verify(
        &self,
        message: &[u8],
        signature: &ValidatorSignature,
    ) -> Result<(), FastCryptoError> {
        self.0.verify(message, &signature.0)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl PartialEq for ValidatorPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}

impl Eq for ValidatorPublicKey {}

impl ValidatorPrivateKey {
    pub fn into_inner(self) -> secp256k1::Secp256k1PrivateKey {
        self.0
    }
}

impl ValidatorKeyPair {
    pub fn new(keypair: secp256k1::Secp256k1KeyPair) -> Self {
        Self(keypair)
    }

    pub fn generate<R: rand::Rng + fastcrypto::traits::AllowedRng>(rng: &mut R) -> Self {
        Self(secp256k1::Secp256k1KeyPair::generate(rng))
    }

    pub fn public(&self) -> ValidatorPublicKey {
        ValidatorPublicKey(self.0.public().clone())
    }

    pub fn sign(&self, message: &[u8]) -> ValidatorSignature {
        ValidatorSignature(self.0.sign(message))
    }

    pub fn private_key(self) -> ValidatorPrivateKey {
        ValidatorPrivateKey(self.0.copy().private())
    }
}

impl Clone for ValidatorKeyPair {
    fn clone(&self) -> Self {
        Self(self.0.copy())
    }
}

impl ValidatorSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FastCryptoError> {
        Ok(Self(secp256k1::Secp256k1Signature::from_bytes(bytes)?))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

/// Defines algorithm and format of event, block and frame digests.
pub type DefaultHashFunction = Blake2b256;
pub const DIGEST_LENGTH: usize = DefaultHashFunction::OUTPUT_SIZE;
