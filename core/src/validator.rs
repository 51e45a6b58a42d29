// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use hashgraph_config::{Peer, PeerId, ValidatorKeyPair};

/// The local signing identity of a node.
pub struct Validator {
    keypair: ValidatorKeyPair,
    moniker: String,
}

impl Validator {
    pub fn new(keypair: ValidatorKeyPair, moniker: String) -> Self {
        Self { keypair, moniker }
    }

    pub fn id(&self) -> PeerId {
        self.peer("").id()
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public().to_bytes()
    }

    pub fn keypair(&self) -> &ValidatorKeyPair {
        &self.keypair
    }

    pub fn moniker(&self) -> &str {
        &self.moniker
    }

    /// This validator's peer entry with the given listen address.
    pub fn peer(&self, address: &str) -> Peer {
        Peer::new(
            self.public_key_bytes(),
            address.to_string(),
            self.moniker.clone(),
        )
    }
}
