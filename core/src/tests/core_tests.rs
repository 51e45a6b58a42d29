// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use hashgraph_config::{local_peer_set_and_keys, PeerSet, ValidatorKeyPair};

use crate::{
    block::Block,
    context::Context,
    core::Core,
    error::HashgraphError,
    internal_transaction::InternalTransactionReceipt,
    store::{InmemStore, Store},
    validator::Validator,
};

fn make_core(index: usize, peer_set: &PeerSet, keys: &[ValidatorKeyPair]) -> Core {
    let store = Arc::new(InmemStore::new(100_000));
    store.set_peer_set(0, peer_set.clone()).unwrap();
    let validator = Validator::new(keys[index].clone(), format!("node{index}"));
    Core::new(Arc::new(Context::new_for_test()), validator, store)
}

/// Stand-in for the application: accept every membership change, no state.
fn commit_pending(core: &mut Core) {
    core.run_consensus().unwrap();
    while let Some(mut block) = core.next_decided_block().unwrap() {
        let receipts: Vec<InternalTransactionReceipt> = block
            .internal_transactions()
            .iter()
            .map(|transaction| InternalTransactionReceipt {
                transaction: transaction.clone(),
                accepted: true,
            })
            .collect();
        block.set_commit_outcome(b"state".to_vec(), receipts);
        core.seal_committed_block(block).unwrap();
    }
}

/// One initiator-driven gossip round trip: pull, merge, push back.
fn exchange(initiator: &mut Core, responder: &mut Core) {
    let known = initiator.known_events();
    let events = responder.events_for_sync(&known).unwrap();
    initiator.sync(responder.id(), events).unwrap();

    let responder_known = responder.known_events();
    let push_back = initiator.events_for_sync(&responder_known).unwrap();
    responder.insert_events(push_back).unwrap();

    commit_pending(initiator);
    commit_pending(responder);
}

#[test]
fn known_events_and_event_diff() {
    let (peer_set, keys) = local_peer_set_and_keys(40, 2);
    let mut core0 = make_core(0, &peer_set, &keys);
    let mut core1 = make_core(1, &peer_set, &keys);

    core0.sign_and_insert_self_event(None).unwrap();
    core1.sign_and_insert_self_event(None).unwrap();
    core1.sign_and_insert_self_event(None).unwrap();

    let known0 = core0.known_events();
    assert_eq!(known0[&core0.id()], 0);
    assert_eq!(known0[&core1.id()], -1);

    // What core1 would send core0: exactly its own two events, in order.
    let diff = core1.event_diff(&known0).unwrap();
    assert_eq!(diff.len(), 2);
    assert!(diff.iter().all(|e| e.creator_id() == core1.id()));
    assert!(diff[0].index() < diff[1].index());

    // And nothing once core0 caught up.
    core0.insert_events(diff).unwrap();
    let diff = core1.event_diff(&core0.known_events()).unwrap();
    assert!(diff.is_empty());
}

#[test]
fn sync_creates_a_merge_event() {
    let (peer_set, keys) = local_peer_set_and_keys(41, 2);
    let mut core0 = make_core(0, &peer_set, &keys);
    let mut core1 = make_core(1, &peer_set, &keys);

    core0.sign_and_insert_self_event(None).unwrap();
    core1.sign_and_insert_self_event(None).unwrap();

    let events = core1.events_for_sync(&core0.known_events()).unwrap();
    core0.sync(core1.id(), events).unwrap();

    // The merge event links core0's head to core1's head.
    let head = core0.head().unwrap();
    let merge = core0.store().get_event(&head).unwrap();
    assert_eq!(merge.index(), 1);
    assert_eq!(
        merge.other_parent(),
        core1.store().last_event_from(core1.id()).unwrap().map(|c| c.hash)
    );
}

#[test]
fn pending_transactions_ride_the_next_event() {
    let (peer_set, keys) = local_peer_set_and_keys(42, 2);
    let mut core = make_core(0, &peer_set, &keys);

    core.add_transactions(vec![b"tx1".to_vec(), b"tx2".to_vec()])
        .unwrap();
    let event = core.sign_and_insert_self_event(None).unwrap();
    assert_eq!(event.transactions().len(), 2);

    // Pool drained: the next event is empty.
    let event = core.sign_and_insert_self_event(None).unwrap();
    assert!(event.transactions().is_empty());
}

#[test]
fn submission_backpressure() {
    let (peer_set, keys) = local_peer_set_and_keys(43, 1);
    let mut core = make_core(0, &peer_set, &keys);

    let huge: Vec<Vec<u8>> = (0..70_000u32).map(|i| i.to_be_bytes().to_vec()).collect();
    assert!(matches!(
        core.add_transactions(huge),
        Err(HashgraphError::QueueFull)
    ));
}

#[test]
fn two_cores_converge_on_the_same_blocks() {
    let (peer_set, keys) = local_peer_set_and_keys(44, 2);
    let mut core0 = make_core(0, &peer_set, &keys);
    let mut core1 = make_core(1, &peer_set, &keys);

    core0.sign_and_insert_self_event(None).unwrap();
    core1.sign_and_insert_self_event(None).unwrap();
    core0
        .add_transactions(vec![b"payment".to_vec()])
        .unwrap();

    for i in 0..12 {
        if i % 2 == 0 {
            exchange(&mut core0, &mut core1);
        } else {
            exchange(&mut core1, &mut core0);
        }
    }

    let last0 = core0.store().last_block_index().expect("blocks at core0");
    let last1 = core1.store().last_block_index().expect("blocks at core1");
    let last = last0.min(last1);
    assert!(last >= 1);
    let mut seen_payment = false;
    for index in 0..=last {
        let block0 = core0.store().get_block(index).unwrap();
        let block1 = core1.store().get_block(index).unwrap();
        assert_eq!(block0, block1, "block {index} diverged");
        seen_payment |= block0.transactions().iter().any(|t| t == b"payment");
    }
    assert!(seen_payment, "submitted transaction never committed");

    // Both signature maps agree on common entries.
    let block0 = core0.store().get_block(0).unwrap();
    let block1 = core1.store().get_block(0).unwrap();
    for (validator, signature) in block0.signatures() {
        if let Some(other) = block1.signatures().get(validator) {
            assert_eq!(signature, other);
        }
    }
}

#[test]
fn fast_forward_restores_a_fresh_core() {
    let (peer_set, keys) = local_peer_set_and_keys(45, 2);
    let mut core0 = make_core(0, &peer_set, &keys);
    let mut core1 = make_core(1, &peer_set, &keys);

    core0.sign_and_insert_self_event(None).unwrap();
    core1.sign_and_insert_self_event(None).unwrap();
    for i in 0..16 {
        if i % 2 == 0 {
            exchange(&mut core0, &mut core1);
        } else {
            exchange(&mut core1, &mut core0);
        }
    }

    let (block, frame) = core0.fast_forward_response().expect("anchor block");
    assert_eq!(block.frame_hash(), frame.digest());

    // A wiped-out validator 1 resumes from the anchor alone.
    let mut fresh = make_core(1, &peer_set, &keys);
    fresh.fast_forward(block.clone(), frame.clone()).unwrap();

    assert_eq!(fresh.store().last_consensus_round(), Some(frame.round));
    assert_eq!(fresh.store().last_block_index(), Some(block.index()));
    assert_eq!(
        fresh.store().get_block(block.index()).unwrap(),
        block
    );
    // The fresh core can keep syncing from where the frame left off.
    let known = fresh.known_events();
    let catch_up = core0.event_diff(&known).unwrap();
    fresh.insert_events(catch_up).unwrap();
    assert!(fresh.run_consensus().is_ok());
}

#[test]
fn tampered_anchor_is_rejected() {
    let (peer_set, keys) = local_peer_set_and_keys(46, 2);
    let mut core0 = make_core(0, &peer_set, &keys);
    let mut core1 = make_core(1, &peer_set, &keys);

    core0.sign_and_insert_self_event(None).unwrap();
    core1.sign_and_insert_self_event(None).unwrap();
    for i in 0..16 {
        if i % 2 == 0 {
            exchange(&mut core0, &mut core1);
        } else {
            exchange(&mut core1, &mut core0);
        }
    }

    let (block, frame) = core0.fast_forward_response().unwrap();

    // Frame substituted by a malicious responder: digest mismatch.
    let mut wrong_frame = frame.clone();
    wrong_frame.round += 1;
    let mut fresh = make_core(1, &peer_set, &keys);
    assert!(matches!(
        fresh.fast_forward(block.clone(), wrong_frame),
        Err(HashgraphError::FrameMismatch)
    ));

    // Unsigned block: not enough valid signatures for the frame's peers.
    let mut unsigned = Block::new(
        block.index(),
        block.round_received(),
        block.frame_hash(),
        block.transactions().to_vec(),
        block.internal_transactions().to_vec(),
    );
    unsigned.set_commit_outcome(block.state_hash().to_vec(), block.receipts().to_vec());
    let mut fresh = make_core(1, &peer_set, &keys);
    assert!(matches!(
        fresh.fast_forward(unsigned, frame),
        Err(HashgraphError::Rejected(_))
    ));
}
