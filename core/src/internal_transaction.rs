// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use hashgraph_config::{DefaultHashFunction, Peer, ValidatorKeyPair, DIGEST_LENGTH};
use serde::{Deserialize, Serialize};

use fastcrypto::hash::HashFunction;

use crate::error::{HashgraphError, HashgraphResult};

/// Kind of a membership change request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerOp {
    Join,
    Leave,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransactionBody {
    pub op: PeerOp,
    pub peer: Peer,
}

/// An in-band membership change request, ordered by consensus like any other
/// transaction. Signed by the peer it concerns, so third parties can relay it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransaction {
    pub body: InternalTransactionBody,
    pub signature: Vec<u8>,
}

impl InternalTransaction {
    pub fn new_signed(op: PeerOp, peer: Peer, keypair: &ValidatorKeyPair) -> Self {
        let body = InternalTransactionBody { op, peer };
        let signature = keypair.sign(&body.digest()).to_bytes();
        Self { body, signature }
    }

    pub fn verify_signature(&self) -> HashgraphResult<()> {
        let key = self
            .body
            .peer
            .verifying_key()
            .map_err(HashgraphError::InvalidSignature)?;
        let signature = hashgraph_config::ValidatorSignature::from_bytes(&self.signature)
            .map_err(HashgraphError::InvalidSignature)?;
        key.verify(&self.body.digest(), &signature)
            .map_err(HashgraphError::InvalidSignature)
    }

    pub fn digest(&self) -> [u8; DIGEST_LENGTH] {
        self.body.digest()
    }
}

impl InternalTransactionBody {
    fn digest(&self) -> [u8; DIGEST_LENGTH] {
        let bytes = bcs::to_bytes(self).expect("serializing an internal transaction cannot fail");
        DefaultHashFunction::digest(bytes.as_slice()).into()
    }
}

/// Outcome of an internal transaction, recorded in the block that committed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransactionReceipt {
    pub transaction: InternalTransaction,
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use hashgraph_config::{Peer, ValidatorKeyPair};
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::{InternalTransaction, PeerOp};

    #[test]
    fn sign_and_verify() {
        let mut rng = StdRng::from_seed([3; 32]);
        let keypair = ValidatorKeyPair::generate(&mut rng);
        let peer = Peer::new(
            keypair.public().to_bytes(),
            "127.0.0.1:4242".to_string(),
            "monika".to_string(),
        );

        let tx = InternalTransaction::new_signed(PeerOp::Join, peer.clone(), &keypair);
        assert!(tx.verify_signature().is_ok());

        // A transaction signed by a different key must not verify.
        let other = ValidatorKeyPair::generate(&mut rng);
        let forged = InternalTransaction::new_signed(PeerOp::Join, peer, &other);
        assert!(forged.verify_signature().is_err());
    }
}
