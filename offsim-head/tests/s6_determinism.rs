//! S6: two runs built from the same inputs, with no real-time or OS-level
//! source of nondeterminism anywhere in the scheduler or channel model,
//! must produce byte-identical ordered trace streams.

use offsim_core::channel::MultiplexerLink;
use offsim_core::clock::VirtualTime;
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::{TraceRecord, TraceRecorder};
use offsim_head::{default_leader_fun, HState, HeadNode, HeadProtocol, HeadTraceEvent, SnapN};
use offsim_types::sig::SKey;
use offsim_types::{ClientId, MockTx, NodeId};
use std::collections::BTreeSet;
use std::sync::Arc;

fn run_once() -> Vec<TraceRecord<HeadTraceEvent<MockTx>>> {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<HeadTraceEvent<MockTx>> = TraceRecorder::new();

    let size = 3u32;
    let sks: Vec<SKey> = (0..size as u64).map(SKey::new).collect();
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
    let nodes: Vec<Arc<HeadNode<MockTx>>> = nodes.into_iter().map(Arc::new).collect();

    for node in &nodes {
        let node = node.clone();
        scheduler.spawn(async move { node.run().await });
    }

    let tx_a = MockTx::new(ClientId::new(1), 0, 100, 64);
    let tx_b = MockTx::new(ClientId::new(2), 0, 200, 32);
    nodes[0].submit(HeadProtocol::New(tx_a));
    nodes[1].submit(HeadProtocol::New(tx_b));
    scheduler.run_until_quiescent();

    let leader = default_leader_fun(SnapN::new(0), size as usize);
    nodes[leader.as_u32() as usize].submit(HeadProtocol::NewSn);
    scheduler.run_until_quiescent();

    trace.events()
}

fn render(events: &[TraceRecord<HeadTraceEvent<MockTx>>]) -> Vec<String> {
    events.iter().map(|r| format!("{}@{:?}: {:?}", r.thread, r.time, r.event)).collect()
}

#[test]
fn two_runs_of_the_same_scenario_produce_identical_ordered_traces() {
    let first = render(&run_once());
    let second = render(&run_once());
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
