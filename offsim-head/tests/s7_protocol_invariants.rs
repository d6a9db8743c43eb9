//! Structural invariants that must hold of any node's state once the head
//! committee has quiesced, independent of the specific scenario that led
//! there: confirmed entries carry a full committee signature, and every
//! node's snapshot progress agrees once messages stop flowing.

use offsim_core::channel::MultiplexerLink;
use offsim_core::clock::VirtualTime;
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::TraceRecorder;
use offsim_head::{default_leader_fun, HState, HeadNode, HeadProtocol, HeadTraceEvent, SnapN};
use offsim_types::sig::{self, aggregate_vkeys};
use offsim_types::{ClientId, MockTx, NodeId, Tx};
use std::collections::BTreeSet;
use std::sync::Arc;

fn build_committee(scheduler: &Scheduler, trace: &TraceRecorder<HeadTraceEvent<MockTx>>, size: u32) -> Vec<Arc<HeadNode<MockTx>>> {
    let sks: Vec<_> = (0..size as u64).map(offsim_types::sig::SKey::new).collect();
    let vks = sks.iter().map(|sk| sk.derive_vkey()).collect::<Vec<_>>();

    let mut nodes: Vec<HeadNode<MockTx>> = (0..size)
        .map(|i| {
            let state = HState::genesis(NodeId::new(i), sks[i as usize], vks.clone(), BTreeSet::new());
            HeadNode::new(state, scheduler.clone(), trace.clone(), 10_000_000, 64)
        })
        .collect();

    let handles: Vec<_> = nodes.iter().map(|n| n.inbox_handle()).collect();
    let ids: Vec<NodeId> = nodes.iter().map(|n| n.id()).collect();

    for node in &mut nodes {
        for (peer_id, handle) in ids.iter().zip(handles.iter()) {
            if *peer_id == node.id() {
                continue;
            }
            let link = MultiplexerLink::new(
                format!("head[{}]->head[{}]", node.id(), peer_id),
                scheduler.clone(),
                trace.clone(),
                handle.clone(),
                10_000_000,
                64,
                VirtualTime::from_micros(500),
            );
            node.connect(*peer_id, link);
        }
    }

    nodes.into_iter().map(Arc::new).collect()
}

#[test]
fn confirmed_txs_carry_a_valid_full_committee_aggregate() {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<HeadTraceEvent<MockTx>> = TraceRecorder::new();
    let nodes = build_committee(&scheduler, &trace, 4);

    for node in &nodes {
        let node = node.clone();
        scheduler.spawn(async move { node.run().await });
    }

    let tx_a = MockTx::new(ClientId::new(1), 0, 100, 64);
    let tx_b = MockTx::new(ClientId::new(2), 0, 200, 32);
    nodes[0].submit(HeadProtocol::New(tx_a));
    nodes[1].submit(HeadProtocol::New(tx_b));
    scheduler.run_until_quiescent();

    for node in &nodes {
        let state = node.state();
        let avk = aggregate_vkeys(&state.vks);
        assert!(!state.txs_conf.is_empty(), "at least the two submitted txs should confirm");
        for (tx_ref, tx_o) in &state.txs_conf {
            let agg = tx_o.agg.as_ref().expect("a confirmed tx must carry an aggregate signature");
            assert!(sig::verify_agg_value(&avk, tx_ref.as_bytes(), agg), "confirmed tx's aggregate signature must verify");
        }
    }
}

#[test]
fn confirmed_snapshot_carries_one_signature_per_committee_member() {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<HeadTraceEvent<MockTx>> = TraceRecorder::new();
    let nodes = build_committee(&scheduler, &trace, 3);

    for node in &nodes {
        let node = node.clone();
        scheduler.spawn(async move { node.run().await });
    }

    let tx = MockTx::new(ClientId::new(1), 0, 100, 64);
    nodes[0].submit(HeadProtocol::New(tx));
    scheduler.run_until_quiescent();

    let leader = default_leader_fun(SnapN::new(0), 3);
    nodes[leader.as_u32() as usize].submit(HeadProtocol::NewSn);
    scheduler.run_until_quiescent();

    for node in &nodes {
        let state = node.state();
        let snap = state.snap_conf.as_ref().expect("snapshot should be confirmed");
        assert_eq!(snap.sigs.len(), state.vks.len(), "a confirmed snapshot carries exactly one signature per committee member");
        assert!(snap.agg.is_some());
    }
}

#[test]
fn snap_n_conf_never_exceeds_snap_n_sig() {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<HeadTraceEvent<MockTx>> = TraceRecorder::new();
    let nodes = build_committee(&scheduler, &trace, 3);

    for node in &nodes {
        let node = node.clone();
        scheduler.spawn(async move { node.run().await });
    }

    let tx = MockTx::new(ClientId::new(1), 0, 100, 64);
    nodes[0].submit(HeadProtocol::New(tx));
    scheduler.run_until_quiescent();
    nodes[0].submit(HeadProtocol::NewSn);
    scheduler.run_until_quiescent();

    for node in &nodes {
        let state = node.state();
        assert!(state.snap_n_conf <= state.snap_n_sig);
    }
}

#[test]
fn all_nodes_agree_on_snap_progress_once_quiesced() {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<HeadTraceEvent<MockTx>> = TraceRecorder::new();
    let nodes = build_committee(&scheduler, &trace, 4);

    for node in &nodes {
        let node = node.clone();
        scheduler.spawn(async move { node.run().await });
    }

    let tx = MockTx::new(ClientId::new(1), 0, 100, 64);
    nodes[0].submit(HeadProtocol::New(tx));
    scheduler.run_until_quiescent();
    let leader = default_leader_fun(SnapN::new(0), 4);
    nodes[leader.as_u32() as usize].submit(HeadProtocol::NewSn);
    scheduler.run_until_quiescent();

    let first = nodes[0].state();
    for node in &nodes[1..] {
        let state = node.state();
        assert_eq!(state.snap_n_conf, first.snap_n_conf);
        let a = state.snap_conf.as_ref().unwrap();
        let b = first.snap_conf.as_ref().unwrap();
        assert_eq!(a.n, b.n);
        assert_eq!(a.utxo, b.utxo);
        assert_eq!(a.included_txs, b.included_txs);
    }
}
