// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, sync::Arc};

use hashgraph_config::{local_peer_set_and_keys, PeerSet, ValidatorKeyPair};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng as _};

use crate::{
    context::Context,
    error::HashgraphError,
    event::{Event, EventBody, EventHash},
    hashgraph::{meta::sees, meta::strongly_sees, rounds::Fame, Hashgraph},
    store::{InmemStore, Store},
    types::RoundIndex,
};

/// Builds hashgraphs event by event, naming events so assertions read like the
/// paper diagrams. Key pairs are index-aligned with the ordered peer set.
struct TestGraph {
    hashgraph: Hashgraph,
    store: Arc<InmemStore>,
    peer_set: PeerSet,
    keys: Vec<ValidatorKeyPair>,
    heads: HashMap<usize, Event>,
    names: HashMap<&'static str, Event>,
    clock: u64,
}

impl TestGraph {
    fn new(seed: u8, validators: usize) -> Self {
        let (peer_set, keys) = local_peer_set_and_keys(seed, validators);
        let store = Arc::new(InmemStore::new(100_000));
        store.set_peer_set(0, peer_set.clone()).unwrap();
        let context = Arc::new(Context::new_for_test());
        let hashgraph = Hashgraph::new(context, store.clone());
        Self {
            hashgraph,
            store,
            peer_set,
            keys,
            heads: HashMap::new(),
            names: HashMap::new(),
            clock: 1_000,
        }
    }

    fn make_event(&mut self, name: &'static str, creator: usize, other_parent: Option<&str>) -> Event {
        let self_parent = self.heads.get(&creator);
        let index = self_parent.map(|e| e.index() + 1).unwrap_or(0);
        self.clock += 1;
        let event = Event::new_signed(
            EventBody {
                transactions: vec![name.as_bytes().to_vec()],
                internal_transactions: vec![],
                block_signatures: vec![],
                self_parent: self_parent.map(|e| e.hash()),
                other_parent: other_parent.map(|n| self.names[n].hash()),
                creator: self.keys[creator].public().to_bytes(),
                index,
                timestamp_ms: self.clock,
            },
            &self.keys[creator],
        );
        self.heads.insert(creator, event.clone());
        self.names.insert(name, event.clone());
        event
    }

    fn add(&mut self, name: &'static str, creator: usize, other_parent: Option<&str>) {
        let event = self.make_event(name, creator, other_parent);
        self.hashgraph.insert_event(event, false).unwrap();
    }

    fn hash(&self, name: &str) -> EventHash {
        self.names[name].hash()
    }

    fn round_of(&self, name: &str) -> RoundIndex {
        self.hashgraph.metas[&self.hash(name)].round.unwrap()
    }

    fn is_witness(&self, name: &str) -> bool {
        self.hashgraph.metas[&self.hash(name)].witness
    }

    fn strongly(&self, observer: &str, target: &str) -> bool {
        strongly_sees(
            &self.hashgraph.metas[&self.hash(observer)],
            &self.hashgraph.metas[&self.hash(target)],
            &self.peer_set,
            &self.hashgraph.cheaters,
        )
    }

    fn sees(&self, observer: &str, target: &str) -> bool {
        sees(
            &self.hashgraph.metas[&self.hash(observer)],
            &self.hashgraph.metas[&self.hash(target)],
        )
    }
}

/// Runs the full pipeline and drains every block that is ready. No membership
/// changes are in play here, so the blocks need no sealing in between.
fn drain_blocks(hashgraph: &mut Hashgraph) -> Vec<crate::block::Block> {
    hashgraph.run_consensus().unwrap();
    let mut blocks = vec![];
    while let Some(block) = hashgraph.next_decided_block().unwrap() {
        blocks.push(block);
    }
    blocks
}

/// A three-validator chain exercising two round advances:
///
/// ```text
///     |  |  e13  -- round 3
///     |  e12 |
///     e11 |  |
///     |  |  e10
///     e9 |  |   -- round 2
///     |  e8 |      (e8 still round 1)
///     |  |  e7
///     e6 |  |
///     |  e5 |   -- round 1
///     |  |  e4
///     e3 |  |
///     |  |  e2
///     |  e1 |
///     g3 g1 g2  -- round 0
/// ```
///
/// Creators: 0 -> g1 lane, 1 -> g2 lane, 2 -> g3 lane.
fn build_chain(graph: &mut TestGraph) {
    graph.add("g1", 0, None);
    graph.add("g2", 1, None);
    graph.add("g3", 2, None);
    graph.add("e1", 0, Some("g2"));
    graph.add("e2", 1, Some("e1"));
    graph.add("e3", 2, Some("e2"));
    graph.add("e4", 1, Some("e3"));
    graph.add("e5", 0, Some("e4"));
    graph.add("e6", 2, Some("e5"));
    graph.add("e7", 1, Some("e6"));
    graph.add("e8", 0, Some("e7"));
    graph.add("e9", 2, Some("e8"));
    graph.add("e10", 1, Some("e9"));
    graph.add("e11", 0, Some("e10"));
    graph.add("e12", 2, Some("e11"));
    graph.add("e13", 1, Some("e12"));
}

#[test]
fn ancestry_relations() {
    let mut graph = TestGraph::new(30, 3);
    build_chain(&mut graph);

    assert!(graph.sees("e1", "g1"));
    assert!(graph.sees("e1", "g2"));
    assert!(!graph.sees("e1", "g3"));
    assert!(graph.sees("e5", "e3"));
    assert!(graph.sees("e5", "e5"));
    assert!(!graph.sees("e5", "e6"));

    // e3 reaches g3 through all three lanes is false: g1 has no event above g3.
    assert!(graph.strongly("e3", "g1"));
    assert!(graph.strongly("e3", "g2"));
    assert!(!graph.strongly("e3", "g3"));
    assert!(graph.strongly("e4", "g1"));
    assert!(!graph.strongly("e4", "g3"));
    assert!(graph.strongly("e5", "g3"));
    assert!(graph.strongly("e9", "e7"));
    assert!(!graph.strongly("e8", "e7"));
}

#[test]
fn rounds_and_witnesses() {
    let mut graph = TestGraph::new(31, 3);
    build_chain(&mut graph);
    graph.hashgraph.divide_rounds().unwrap();

    let expected_rounds: &[(&str, RoundIndex)] = &[
        ("g1", 0),
        ("g2", 0),
        ("g3", 0),
        ("e1", 0),
        ("e2", 0),
        ("e3", 0),
        ("e4", 0),
        ("e5", 1),
        ("e6", 1),
        ("e7", 1),
        ("e8", 1),
        ("e9", 2),
        ("e10", 2),
        ("e11", 2),
        ("e12", 2),
        ("e13", 3),
    ];
    for (name, round) in expected_rounds {
        assert_eq!(graph.round_of(name), *round, "round of {name}");
    }

    let witnesses = ["g1", "g2", "g3", "e5", "e6", "e7", "e9", "e10", "e11", "e13"];
    let plain = ["e1", "e2", "e3", "e4", "e8", "e12"];
    for name in witnesses {
        assert!(graph.is_witness(name), "{name} should be a witness");
    }
    for name in plain {
        assert!(!graph.is_witness(name), "{name} should not be a witness");
    }
}

#[test]
fn fame_and_first_block() {
    let mut graph = TestGraph::new(32, 3);
    build_chain(&mut graph);
    let blocks = drain_blocks(&mut graph.hashgraph);

    // Rounds 0 and 1 are decided; every round-0 witness is famous.
    let round0 = graph.store.get_round(0).unwrap();
    for name in ["g1", "g2", "g3"] {
        assert_eq!(round0.witnesses[&graph.hash(name)], Fame::Yes);
    }
    let round1 = graph.store.get_round(1).unwrap();
    assert!(round1.all_famous_decided());

    // Round 0 receives nothing (no event descends into all geneses); the first
    // block comes from round 1.
    assert!(round0.received.is_empty());
    assert_eq!(blocks.len(), 1);
    let block = &blocks[0];
    assert_eq!(block.index(), 0);
    assert_eq!(block.round_received(), 1);

    let mut committed: Vec<&str> = block
        .transactions()
        .iter()
        .map(|tx| std::str::from_utf8(tx).unwrap())
        .collect();
    committed.sort_unstable();
    assert_eq!(
        committed,
        vec!["e1", "e2", "e3", "e4", "e5", "g1", "g2", "g3"]
    );

    assert_eq!(graph.store.last_consensus_round(), Some(1));
    assert_eq!(graph.hashgraph.first_consensus_round(), Some(1));
    assert!(graph.store.get_frame(1).is_ok());
    // Everything past e5 is still awaiting a received round.
    assert_eq!(graph.hashgraph.undetermined_count(), 8);
}

#[test]
fn consensus_is_deterministic_across_insertion_orders() {
    let mut reference = TestGraph::new(33, 3);
    build_chain(&mut reference);
    let reference_blocks = drain_blocks(&mut reference.hashgraph);
    assert_eq!(reference_blocks.len(), 1);

    // Replay the same events into fresh graphs in scrambled orders; events
    // whose parents have not arrived yet are retried, like an unlucky gossip
    // interleaving.
    let events: Vec<Event> = {
        let mut ordered: Vec<_> = reference.names.values().cloned().collect();
        ordered.sort_by_key(|e| reference.hashgraph.topological_order(&e.hash()).unwrap());
        ordered
    };

    for seed in 0..10u8 {
        let (peer_set, _) = local_peer_set_and_keys(33, 3);
        let store = Arc::new(InmemStore::new(100_000));
        store.set_peer_set(0, peer_set).unwrap();
        let mut hashgraph = Hashgraph::new(Arc::new(Context::new_for_test()), store.clone());

        let mut pending = events.clone();
        pending.shuffle(&mut StdRng::from_seed([seed; 32]));
        while !pending.is_empty() {
            let mut retry = vec![];
            for event in pending {
                match hashgraph.insert_event(event.clone(), false) {
                    Ok(()) => {}
                    Err(HashgraphError::UnknownParent(_)) | Err(HashgraphError::IndexGap { .. }) => {
                        retry.push(event)
                    }
                    Err(e) => panic!("unexpected rejection: {e}"),
                }
            }
            pending = retry;
        }

        let blocks = drain_blocks(&mut hashgraph);
        assert_eq!(blocks.len(), 1, "seed {seed}");
        assert_eq!(blocks[0], reference_blocks[0], "seed {seed}");
        assert_eq!(
            blocks[0].transactions(),
            reference_blocks[0].transactions(),
            "seed {seed}"
        );
        assert_eq!(store.last_consensus_round(), Some(1));
    }
}

#[test]
fn monologue_orders_every_event() {
    let mut graph = TestGraph::new(34, 1);
    let names: Vec<&'static str> = (0..50).map(name_for).collect();
    for name in &names {
        graph.add(name, 0, None);
    }
    let blocks = drain_blocks(&mut graph.hashgraph);

    // With a single validator every event is a witness of its own round and a
    // round is decided two rounds later.
    assert_eq!(blocks.len(), 48);
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.index(), i as u64);
        assert_eq!(block.round_received(), i as u64);
        assert_eq!(block.transactions().len(), 1);
        assert_eq!(block.transactions()[0], names[i].as_bytes().to_vec());
    }
    assert_eq!(graph.hashgraph.undetermined_count(), 2);
}

fn name_for(i: usize) -> &'static str {
    // Tests want stable &'static str names; leak a handful of small strings.
    Box::leak(format!("m{i}").into_boxed_str())
}

#[test]
fn duplicate_insert_is_a_noop() {
    let mut graph = TestGraph::new(35, 3);
    build_chain(&mut graph);

    let before = graph.store.topological_events().unwrap().len();
    let event = graph.names["e5"].clone();
    graph.hashgraph.insert_event(event, false).unwrap();
    assert_eq!(graph.store.topological_events().unwrap().len(), before);
}

#[test]
fn fork_is_flagged_and_kept_as_evidence() {
    let mut graph = TestGraph::new(36, 3);
    graph.add("g1", 0, None);
    graph.add("g2", 1, None);
    graph.add("g3", 2, None);
    graph.add("a1", 0, Some("g2"));

    // A second event by validator 0 at index 1, diverging from a1.
    let fork = Event::new_signed(
        EventBody {
            transactions: vec![b"fork".to_vec()],
            internal_transactions: vec![],
            block_signatures: vec![],
            self_parent: Some(graph.hash("g1")),
            other_parent: Some(graph.hash("g3")),
            creator: graph.keys[0].public().to_bytes(),
            index: 1,
            timestamp_ms: 9_999,
        },
        &graph.keys[0],
    );

    let creator = fork.creator_id();
    assert!(matches!(
        graph.hashgraph.insert_event(fork, false),
        Err(HashgraphError::Fork(id)) if id == creator
    ));
    assert!(graph.hashgraph.cheaters().contains(&creator));
    assert_eq!(graph.store.fork_evidence().len(), 1);
}

#[test]
fn unknown_creator_is_rejected() {
    let mut graph = TestGraph::new(37, 3);
    graph.add("g1", 0, None);

    let mut rng = StdRng::from_seed([99; 32]);
    let stranger = ValidatorKeyPair::generate(&mut rng);
    let event = Event::new_signed(
        EventBody {
            transactions: vec![],
            internal_transactions: vec![],
            block_signatures: vec![],
            self_parent: None,
            other_parent: None,
            creator: stranger.public().to_bytes(),
            index: 0,
            timestamp_ms: 1,
        },
        &stranger,
    );
    assert!(matches!(
        graph.hashgraph.insert_event(event, false),
        Err(HashgraphError::UnknownCreator(_))
    ));
}

#[test]
fn tampered_signature_is_rejected() {
    let mut graph = TestGraph::new(38, 3);
    graph.add("g1", 0, None);
    graph.add("g2", 1, None);

    // Validator 1's event signed with validator 0's key.
    let event = Event::new_signed(
        EventBody {
            transactions: vec![],
            internal_transactions: vec![],
            block_signatures: vec![],
            self_parent: Some(graph.hash("g2")),
            other_parent: Some(graph.hash("g1")),
            creator: graph.keys[1].public().to_bytes(),
            index: 1,
            timestamp_ms: 5,
        },
        &graph.keys[0],
    );
    assert!(matches!(
        graph.hashgraph.insert_event(event, false),
        Err(HashgraphError::InvalidSignature(_))
    ));
}
