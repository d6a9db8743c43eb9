//! An offline recipient's notification is mailboxed, not delivered
//! directly; a later `Connect` + `Pull` flushes exactly that one message.

use offsim_core::channel::{Multiplexer, MultiplexerLink};
use offsim_core::clock::VirtualTime;
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::TraceRecorder;
use offsim_tail::{TailProtocol, TailServer, TailTraceEvent};
use offsim_types::{ClientId, MockTx, Tx};
use std::sync::Arc;

fn link(
    scheduler: &Scheduler,
    trace: &TraceRecorder<TailTraceEvent<MockTx>>,
    label: impl Into<String>,
    target: offsim_core::channel::EndpointHandle<TailProtocol<MockTx>>,
) -> MultiplexerLink<TailProtocol<MockTx>, TailTraceEvent<MockTx>> {
    MultiplexerLink::new(label, scheduler.clone(), trace.clone(), target, 1_000_000_000, 64, VirtualTime::from_micros(50))
}

#[test]
fn an_offline_recipients_notification_is_mailboxed_then_flushed_on_connect_and_pull() {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<TailTraceEvent<MockTx>> = TraceRecorder::new();
    let mut server = TailServer::<MockTx>::new(scheduler.clone(), trace.clone(), 1_000_000_000, 64);

    let client1 = ClientId::new(1);
    let client2 = ClientId::new(2);

    let inbox1: Multiplexer<TailProtocol<MockTx>, TailTraceEvent<MockTx>> = Multiplexer::new("client[1]", scheduler.clone(), trace.clone(), 1_000_000_000, 64);
    let inbox2: Multiplexer<TailProtocol<MockTx>, TailTraceEvent<MockTx>> = Multiplexer::new("client[2]", scheduler.clone(), trace.clone(), 1_000_000_000, 64);

    server.connect(client1, link(&scheduler, &trace, "server->1", inbox1.handle()));
    server.connect(client2, link(&scheduler, &trace, "server->2", inbox2.handle()));

    let to_server_1 = MultiplexerLink::new("1->server", scheduler.clone(), trace.clone(), server.inbox_handle(), 1_000_000_000, 64, VirtualTime::from_micros(50));
    let to_server_2 = MultiplexerLink::new("2->server", scheduler.clone(), trace.clone(), server.inbox_handle(), 1_000_000_000, 64, VirtualTime::from_micros(50));

    let server = Arc::new(server);
    server.spawn_workers(2);

    let tx = MockTx::new(client1, 0, 250, 64);
    scheduler.spawn(async move {
        to_server_1.send((client1, TailProtocol::NewTx(tx, vec![client2])), 0).await;
    });

    let ack = scheduler.block_on(async move { inbox1.recv().await });
    assert!(matches!(ack, TailProtocol::AckTx(r) if r == tx.tx_ref()));

    let mailbox_events: Vec<_> = trace
        .events()
        .into_iter()
        .filter_map(|r| match r.event {
            TailTraceEvent::StoreInMailbox { client, len } => Some((client, len)),
            _ => None,
        })
        .collect();
    assert_eq!(mailbox_events, vec![(client2, 1)]);

    scheduler.spawn(async move {
        to_server_2.send((client2, TailProtocol::Connect), 0).await;
        to_server_2.send((client2, TailProtocol::Pull), 0).await;
    });

    let notified = scheduler.block_on(async move { inbox2.recv().await });
    assert!(matches!(notified, TailProtocol::NotifyTx(t) if t.tx_ref() == tx.tx_ref()));
}
