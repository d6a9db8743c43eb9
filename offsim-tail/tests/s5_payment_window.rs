//! A send that would leave the payment window triggers a settlement stall:
//! `SnapshotStart`, a `settlement_delay`-slot wait, a balance reset, then
//! `SnapshotEnd`, before the same `NewTx` is resubmitted.

use offsim_core::channel::{Multiplexer, MultiplexerLink};
use offsim_core::clock::VirtualTime;
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::TraceRecorder;
use offsim_tail::client::{ClientEvent, PaymentWindow};
use offsim_tail::{TailClient, TailProtocol, TailTraceEvent};
use offsim_types::{ClientId, MockTx};
use std::sync::Arc;

#[test]
fn a_send_that_would_breach_the_window_stalls_for_settlement_then_resubmits() {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<TailTraceEvent<MockTx>> = TraceRecorder::new();

    let client_id = ClientId::new(1);
    let server_inbox: Multiplexer<(ClientId, TailProtocol<MockTx>), TailTraceEvent<MockTx>> =
        Multiplexer::new("server", scheduler.clone(), trace.clone(), 1_000_000_000, 64);
    let to_server = MultiplexerLink::new("1->server", scheduler.clone(), trace.clone(), server_inbox.handle(), 1_000_000_000, 64, VirtualTime::ZERO);

    // First brings the client's live balance down to -95 (itself still
    // inside the window), then attempts the send that would push it to
    // -105 and out of the window.
    let tape = vec![
        ClientEvent::NewTx { slot: 0, amount: 95, size: 64, recipients: vec![ClientId::new(2)] },
        ClientEvent::NewTx { slot: 0, amount: 10, size: 64, recipients: vec![ClientId::new(2)] },
    ];

    let client = Arc::new(TailClient::new(
        client_id,
        to_server,
        0,
        Some(PaymentWindow { lower: -100, upper: 100 }),
        5,
        VirtualTime::from_micros(1_000),
        MockTx::new,
        scheduler.clone(),
        trace.clone(),
        tape,
        1_000_000_000,
        64,
    ));
    client.clone().spawn();

    // Drain exactly the four messages the stall produces: SnapshotStart,
    // SnapshotEnd, and then the resubmitted NewTx's ack path begins with
    // the server never existing here, so just observe what the client
    // actually sent via the trace instead of a real server.
    scheduler.run_until_quiescent();

    let sent: Vec<String> = trace
        .events()
        .into_iter()
        .filter_map(|r| match r.event {
            TailTraceEvent::ServerMp(offsim_core::channel::MpTraceEvent::RecvTrailing { msg: (_, msg) }) => Some(format!("{msg:?}")),
            _ => None,
        })
        .collect();

    assert!(sent.iter().any(|m| m.contains("SnapshotStart")), "expected a SnapshotStart, got {sent:?}");
    assert!(sent.iter().any(|m| m.contains("SnapshotEnd")), "expected a SnapshotEnd, got {sent:?}");
    let snapshot_start_idx = sent.iter().position(|m| m.contains("SnapshotStart")).unwrap();
    let snapshot_end_idx = sent.iter().position(|m| m.contains("SnapshotEnd")).unwrap();
    assert!(snapshot_start_idx < snapshot_end_idx);
    assert!(sent.iter().any(|m| m.contains("NewTx")), "expected the NewTx to eventually be resubmitted, got {sent:?}");

    // The settlement reset the balance to its configured initial value (0)
    // before the retried send of amount 10 went through.
    assert_eq!(client.balance(), -10);
}
