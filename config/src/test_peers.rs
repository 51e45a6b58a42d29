// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::{TcpListener, TcpStream};

use rand::{rngs::StdRng, SeedableRng as _};

use crate::{Peer, PeerSet, ValidatorKeyPair};

/// Creates a peer set for local testing, and the corresponding key pairs for the
/// validators. Key generation is seeded so identities are stable across runs.
pub fn local_peer_set_and_keys(seed: u8, count: usize) -> (PeerSet, Vec<ValidatorKeyPair>) {
    let mut rng = StdRng::from_seed([seed; 32]);
    let mut peers = vec![];
    let mut key_pairs = vec![];
    for i in 0..count {
        let keypair = ValidatorKeyPair::generate(&mut rng);
        peers.push(Peer::new(
            keypair.public().to_bytes(),
            reserve_local_address(),
            format!("node{i}"),
        ));
        key_pairs.push(keypair);
    }
    // PeerSet orders members by public key; keep the key pairs aligned.
    let peer_set = PeerSet::new(peers);
    key_pairs.sort_by(|a, b| a.public().to_bytes().cmp(&b.public().to_bytes()));
    (peer_set, key_pairs)
}

/// Picks a loopback address whose port the kernel just handed out. Binding to
/// port 0, completing one connection and closing everything leaves the port in
/// TIME_WAIT, so the kernel will not reassign it for a while; test transports
/// that bind it afterwards need SO_REUSEADDR, which tokio listeners set.
fn reserve_local_address() -> String {
    for _ in 0..128 {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0") else {
            continue;
        };
        let Ok(addr) = listener.local_addr() else {
            continue;
        };
        // One short-lived connection parks the port in TIME_WAIT.
        if TcpStream::connect(addr).and_then(|_| listener.accept()).is_ok() {
            return addr.to_string();
        }
    }
    panic!("no ephemeral port available on loopback");
}
