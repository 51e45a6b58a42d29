// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios over the in-process transport: solo operation, pairwise
//! convergence, dynamic membership and catch-up. Every test runs under a hard
//! time bound and seeded identities.

use std::{sync::Arc, time::Duration};

use hashgraph_config::{local_peer_set_and_keys, Parameters, PeerSet, StoreKind, ValidatorKeyPair};
use hashgraph_core::{
    open_store, Context, HashgraphError, InmemAppProxy, InmemStore, MemNetwork, Node, NodeState,
    Store, Validator,
};
use prometheus::Registry;

fn test_parameters() -> Parameters {
    Parameters {
        heartbeat_timeout: Duration::from_millis(10),
        tcp_timeout: Duration::from_millis(500),
        join_timeout: Duration::from_secs(20),
        cache_size: 100_000,
        sync_limit: 1_000,
        fast_sync: false,
        suspend_limit: 1_000,
        bootstrap: false,
        load_peers: true,
        store: StoreKind::Inmem,
        db_path: None,
    }
}

fn make_node(
    network: &MemNetwork,
    parameters: Parameters,
    key: ValidatorKeyPair,
    address: &str,
    moniker: &str,
    genesis: PeerSet,
    store: Arc<dyn Store>,
) -> (Arc<Node>, Arc<InmemAppProxy>) {
    let transport = Arc::new(network.transport(address));
    let app_proxy = Arc::new(InmemAppProxy::new());
    let context = Context::new(parameters, Registry::new());
    let validator = Validator::new(key, moniker.to_string());
    let node = Arc::new(
        Node::new(context, validator, genesis, store, transport, app_proxy.clone()).unwrap(),
    );
    (node, app_proxy)
}

fn start_network(
    seed: u8,
    count: usize,
    parameters: Parameters,
) -> (Vec<Arc<Node>>, Vec<Arc<InmemAppProxy>>, MemNetwork, PeerSet, Vec<ValidatorKeyPair>) {
    let (peer_set, keys) = local_peer_set_and_keys(seed, count);
    let network = MemNetwork::new();
    let mut nodes = vec![];
    let mut proxies = vec![];
    for (i, key) in keys.iter().enumerate() {
        let peer = &peer_set.peers()[i];
        let store: Arc<dyn Store> = Arc::new(InmemStore::new(parameters.cache_size));
        let (node, proxy) = make_node(
            &network,
            parameters.clone(),
            key.clone(),
            &peer.address,
            &format!("node{i}"),
            peer_set.clone(),
            store,
        );
        node.clone().start(true);
        nodes.push(node);
        proxies.push(proxy);
    }
    (nodes, proxies, network, peer_set, keys)
}

/// Waits until every node committed at least `target` blocks.
async fn wait_for_blocks(nodes: &[Arc<Node>], target: u64, bound: Duration) {
    tokio::time::timeout(bound, async {
        loop {
            let reached = nodes.iter().all(|node| {
                node.store()
                    .last_block_index()
                    .map(|last| last + 1 >= target)
                    .unwrap_or(false)
            });
            if reached {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("nodes did not reach {target} blocks in time"));
}

async fn wait_until<F: Fn() -> bool>(condition: F, bound: Duration, what: &str) {
    tokio::time::timeout(bound, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Every block committed by every node must agree byte for byte, ignoring the
/// signature maps, which only have to agree on common entries.
fn check_blocks(nodes: &[Arc<Node>], from: u64) {
    let last = nodes
        .iter()
        .filter_map(|node| node.store().last_block_index())
        .min()
        .expect("every node has blocks");
    for index in from..=last {
        let reference = nodes[0].store().get_block(index).unwrap();
        for node in &nodes[1..] {
            let block = node.store().get_block(index).unwrap();
            assert_eq!(reference, block, "block {index} diverged");
            for (validator, signature) in reference.signatures() {
                if let Some(other) = block.signatures().get(validator) {
                    assert_eq!(signature, other, "signature maps disagree at {index}");
                }
            }
        }
    }
}

async fn shutdown_all(nodes: &[Arc<Node>]) {
    for node in nodes {
        node.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn monologue() {
    let (nodes, proxies, _network, _peers, _keys) = start_network(50, 1, test_parameters());

    nodes[0]
        .submit_transactions(vec![b"solo".to_vec()])
        .await
        .unwrap();
    wait_for_blocks(&nodes, 20, Duration::from_secs(20)).await;

    let store = nodes[0].store();
    let last = store.last_block_index().unwrap();
    let mut previous_round = None;
    for index in 0..=last {
        let block = store.get_block(index).unwrap();
        assert_eq!(block.index(), index);
        if let Some(previous) = previous_round {
            assert!(block.round_received() > previous);
        }
        previous_round = Some(block.round_received());
    }
    assert!(proxies[0]
        .committed_transactions()
        .contains(&b"solo".to_vec()));

    shutdown_all(&nodes).await;
    assert_eq!(nodes[0].state(), NodeState::Shutdown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_nodes_converge() {
    let (nodes, proxies, _network, _peers, _keys) = start_network(51, 2, test_parameters());

    nodes[0]
        .submit_transactions(vec![b"from-zero".to_vec()])
        .await
        .unwrap();
    nodes[1]
        .submit_transactions(vec![b"from-one".to_vec()])
        .await
        .unwrap();
    wait_for_blocks(&nodes, 5, Duration::from_secs(30)).await;
    shutdown_all(&nodes).await;

    check_blocks(&nodes, 0);
    for proxy in &proxies {
        let committed = proxy.committed_transactions();
        assert!(committed.contains(&b"from-zero".to_vec()));
        assert!(committed.contains(&b"from-one".to_vec()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn join_expands_the_peer_set() {
    let (mut nodes, _proxies, network, peer_set, _keys) = start_network(52, 4, test_parameters());
    wait_for_blocks(&nodes, 3, Duration::from_secs(30)).await;

    // A fifth validator, absent from genesis, asks its way in.
    let (joiner_set, joiner_keys) = local_peer_set_and_keys(152, 1);
    let joiner_peer = joiner_set.peers()[0].clone();
    let store: Arc<dyn Store> = Arc::new(InmemStore::new(100_000));
    let (joiner, _joiner_proxy) = make_node(
        &network,
        test_parameters(),
        joiner_keys[0].clone(),
        &joiner_peer.address,
        "monika",
        peer_set.clone(),
        store,
    );
    assert_eq!(joiner.state(), NodeState::Joining);
    joiner.clone().start(true);
    nodes.push(joiner.clone());

    // Everyone, including the joiner, converges on a five-member set.
    wait_until(
        || {
            nodes.iter().all(|node| {
                node.store()
                    .all_peer_sets()
                    .values()
                    .any(|set| set.len() == 5)
            })
        },
        Duration::from_secs(60),
        "a five-member peer set everywhere",
    )
    .await;

    let accepted_round = joiner.accepted_round().await.expect("join accepted");
    for node in &nodes {
        let sets = node.store().all_peer_sets();
        let set = sets.get(&accepted_round).expect("set at accepted round");
        assert_eq!(set.len(), 5);
        assert!(set.contains(joiner.id()));
        assert_eq!(sets, nodes[0].store().all_peer_sets());
    }

    shutdown_all(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn leave_shrinks_the_peer_set() {
    let (nodes, _proxies, _network, _peers, _keys) = start_network(53, 4, test_parameters());
    wait_for_blocks(&nodes, 3, Duration::from_secs(30)).await;

    nodes[3].leave().await.unwrap();
    assert_eq!(nodes[3].state(), NodeState::Leaving);

    let remaining = &nodes[..3];
    wait_until(
        || {
            remaining.iter().all(|node| {
                node.store()
                    .all_peer_sets()
                    .values()
                    .any(|set| set.len() == 3)
            })
        },
        Duration::from_secs(60),
        "a three-member peer set at the remaining nodes",
    )
    .await;

    let removed_round = nodes[3].removed_round().await.expect("removal committed");
    for node in remaining {
        let sets = node.store().all_peer_sets();
        let set = sets.get(&removed_round).expect("set at removed round");
        assert_eq!(set.len(), 3);
        assert!(!set.contains(nodes[3].id()));
    }

    // The leaver shuts itself down once its removal round is decided.
    wait_until(
        || nodes[3].state() == NodeState::Shutdown,
        Duration::from_secs(60),
        "the leaver to shut down",
    )
    .await;

    // The remaining validators keep committing without the fourth.
    let reached = remaining[0].store().last_block_index().unwrap();
    wait_for_blocks(remaining, reached + 5, Duration::from_secs(30)).await;
    shutdown_all(&nodes).await;
    check_blocks(remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fast_forward_bootstraps_a_late_joiner() {
    let mut parameters = test_parameters();
    parameters.fast_sync = true;
    let (mut nodes, _proxies, network, peer_set, _keys) = start_network(54, 4, parameters.clone());
    wait_for_blocks(&nodes, 8, Duration::from_secs(30)).await;

    let (joiner_set, joiner_keys) = local_peer_set_and_keys(154, 1);
    let joiner_peer = joiner_set.peers()[0].clone();
    let store: Arc<dyn Store> = Arc::new(InmemStore::new(100_000));
    let (joiner, _proxy) = make_node(
        &network,
        parameters,
        joiner_keys[0].clone(),
        &joiner_peer.address,
        "monika",
        peer_set.clone(),
        store,
    );
    joiner.clone().start(true);
    nodes.push(joiner.clone());

    // The joiner must catch up from a frame, not from round zero.
    wait_until(
        || {
            let latest = nodes[..4]
                .iter()
                .filter_map(|n| n.store().last_block_index())
                .min()
                .unwrap_or(0);
            joiner
                .store()
                .last_block_index()
                .map(|own| own + 3 >= latest)
                .unwrap_or(false)
        },
        Duration::from_secs(60),
        "the joiner to reach the network's block height",
    )
    .await;

    let first = joiner.first_consensus_round().await.expect("made consensus");
    assert!(first > 0, "joiner should resume from a frame, not genesis");

    shutdown_all(&nodes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn rejoin_with_a_durable_store() {
    let (peer_set, keys) = local_peer_set_and_keys(55, 2);
    let network = MemNetwork::new();
    let dirs: Vec<tempfile::TempDir> = (0..2).map(|_| tempfile::TempDir::new().unwrap()).collect();

    let mut parameters = test_parameters();
    parameters.store = StoreKind::Durable;

    let mut nodes = vec![];
    for (i, key) in keys.iter().enumerate() {
        let peer = &peer_set.peers()[i];
        let mut node_parameters = parameters.clone();
        node_parameters.db_path = Some(dirs[i].path().to_path_buf());
        let store = open_store(&node_parameters).unwrap();
        let (node, _proxy) = make_node(
            &network,
            node_parameters,
            key.clone(),
            &peer.address,
            &format!("node{i}"),
            peer_set.clone(),
            store,
        );
        node.clone().start(true);
        nodes.push(node);
    }
    wait_for_blocks(&nodes, 5, Duration::from_secs(30)).await;

    // Node 1 leaves and persists everything it saw. Dropping it releases the
    // database lock so the same directory can be reopened.
    let leaver = nodes.pop().unwrap();
    leaver.leave().await.unwrap();
    wait_until(
        || leaver.state() == NodeState::Shutdown,
        Duration::from_secs(60),
        "the leaver to shut down",
    )
    .await;
    leaver.shutdown().await;
    network.disconnect(&peer_set.peers()[1].address);
    drop(leaver);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Node 0 carries on alone.
    let reached = nodes[0].store().last_block_index().unwrap();
    wait_for_blocks(&nodes[..1], reached + 5, Duration::from_secs(30)).await;

    // Node 1 returns from its durable store and must reconverge without
    // suspending itself.
    let mut rejoin_parameters = parameters.clone();
    rejoin_parameters.bootstrap = true;
    rejoin_parameters.db_path = Some(dirs[1].path().to_path_buf());
    let store = open_store(&rejoin_parameters).unwrap();
    let (rejoined, _proxy) = make_node(
        &network,
        rejoin_parameters,
        keys[1].clone(),
        &peer_set.peers()[1].address,
        "node1",
        peer_set.clone(),
        store,
    );
    rejoined.init().await.unwrap();
    assert!(rejoined.store().last_block_index().is_some());
    rejoined.clone().start(true);

    wait_until(
        || {
            let target = nodes[0].store().last_block_index().unwrap_or(0);
            rejoined
                .store()
                .last_block_index()
                .map(|own| own + 3 >= target)
                .unwrap_or(false)
        },
        Duration::from_secs(90),
        "the rejoined node to reconverge",
    )
    .await;
    assert_ne!(rejoined.state(), NodeState::Suspended);

    nodes[0].shutdown().await;
    rejoined.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_nodes_converge_over_tcp() {
    use hashgraph_config::Peer;
    use hashgraph_core::TcpTransport;
    use rand::{rngs::StdRng, SeedableRng as _};

    let mut rng = StdRng::from_seed([57; 32]);
    let keys: Vec<ValidatorKeyPair> = (0..2).map(|_| ValidatorKeyPair::generate(&mut rng)).collect();

    // Bind first, then advertise the kernel-chosen ports in the peer set.
    let mut transports = vec![];
    let mut peers = vec![];
    for (i, key) in keys.iter().enumerate() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        peers.push(Peer::new(
            key.public().to_bytes(),
            transport.local_address(),
            format!("node{i}"),
        ));
        transports.push(Arc::new(transport));
    }
    let peer_set = PeerSet::new(peers);

    let mut nodes = vec![];
    let mut proxies = vec![];
    for (i, key) in keys.iter().enumerate() {
        let store: Arc<dyn Store> = Arc::new(InmemStore::new(100_000));
        let proxy = Arc::new(InmemAppProxy::new());
        let context = Context::new(test_parameters(), Registry::new());
        let node = Arc::new(
            Node::new(
                context,
                Validator::new(key.clone(), format!("node{i}")),
                peer_set.clone(),
                store,
                transports[i].clone(),
                proxy.clone(),
            )
            .unwrap(),
        );
        node.clone().start(true);
        nodes.push(node);
        proxies.push(proxy);
    }

    nodes[0]
        .submit_transactions(vec![b"over-tcp".to_vec()])
        .await
        .unwrap();
    wait_for_blocks(&nodes, 3, Duration::from_secs(30)).await;
    shutdown_all(&nodes).await;

    check_blocks(&nodes, 0);
    assert!(proxies[0]
        .committed_transactions()
        .contains(&b"over-tcp".to_vec()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fast_forward_without_an_anchor_is_refused() {
    use hashgraph_core::{messages::FastForwardRequest, Transport};

    // Nodes serve RPCs but never gossip, so no block can exist yet.
    let (peer_set, keys) = local_peer_set_and_keys(56, 2);
    let network = MemNetwork::new();
    let mut nodes = vec![];
    for (i, key) in keys.iter().enumerate() {
        let peer = &peer_set.peers()[i];
        let store: Arc<dyn Store> = Arc::new(InmemStore::new(100_000));
        let (node, _proxy) = make_node(
            &network,
            test_parameters(),
            key.clone(),
            &peer.address,
            &format!("node{i}"),
            peer_set.clone(),
            store,
        );
        node.clone().start(false);
        nodes.push(node);
    }

    // A fresh client asks for a frame before any block gathered signatures.
    let client = network.transport("127.0.0.1:1");
    let result = client
        .fast_forward(
            &nodes[0].local_address(),
            FastForwardRequest { from_id: 0 },
            Duration::from_secs(5),
        )
        .await;
    match result {
        Err(HashgraphError::Rejected(message)) => {
            assert!(message.contains("anchor"), "unexpected message: {message}")
        }
        Err(HashgraphError::NoAnchorBlock) => {}
        other => panic!("expected an anchor error, got {other:?}"),
    }

    shutdown_all(&nodes).await;
}
