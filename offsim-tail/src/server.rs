//! The mailbox broker: one shared registry of client connection state,
//! serviced by `concurrency` worker loops racing on the same inbox.
//!
//! A `NewTx` whose sender or any recipient is `Blocked` (mid-settlement)
//! parks the whole message on the *sender's* queue, never the triggering
//! party's — `SnapshotEnd` only replays the queue of the client that sent
//! it, so if a blocked *recipient* is what triggered the park, unblocking
//! that recipient does not by itself retry the parked send (see the open
//! question this preserves). `SnapshotEnd` replays the sender's queue back
//! through the inbox so the send is retried exactly as if it had just
//! arrived.

use crate::error::{TailError, TailResult};
use crate::protocol::{Conn, TailProtocol, TailTraceEvent};
use offsim_core::channel::{EndpointHandle, Multiplexer, MultiplexerLink};
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::TraceRecorder;
use offsim_types::wire::LOOKUP_CLIENT_COST;
use offsim_types::{ClientId, Tx};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

type Link<T> = MultiplexerLink<TailProtocol<T>, TailTraceEvent<T>>;
type Inbox<T> = Multiplexer<(ClientId, TailProtocol<T>), TailTraceEvent<T>>;

struct ClientRecord<T: Tx> {
    conn: Conn,
    mailbox: VecDeque<TailProtocol<T>>,
    queue: VecDeque<TailProtocol<T>>,
}

impl<T: Tx> ClientRecord<T> {
    fn new() -> Self {
        Self { conn: Conn::Offline, mailbox: VecDeque::new(), queue: VecDeque::new() }
    }
}

/// The broker. `run_worker` is meant to be spawned `concurrency` times onto
/// the scheduler; every worker shares the same `inbox` and `registry`.
pub struct TailServer<T: Tx> {
    inbox: Inbox<T>,
    links: BTreeMap<ClientId, Link<T>>,
    registry: Mutex<BTreeMap<ClientId, ClientRecord<T>>>,
    scheduler: Scheduler,
    trace: TraceRecorder<TailTraceEvent<T>>,
}

impl<T: Tx> TailServer<T> {
    pub fn new(scheduler: Scheduler, trace: TraceRecorder<TailTraceEvent<T>>, read_capacity: u64, inbound_capacity: usize) -> Self {
        let inbox = Multiplexer::new("tail-server", scheduler.clone(), trace.clone(), read_capacity, inbound_capacity);
        Self { inbox, links: BTreeMap::new(), registry: Mutex::new(BTreeMap::new()), scheduler, trace }
    }

    /// A handle every client's outbound link sends into.
    pub fn inbox_handle(&self) -> EndpointHandle<(ClientId, TailProtocol<T>)> {
        self.inbox.handle()
    }

    /// Registers a client's return path and its initial (offline) registry
    /// entry.
    pub fn connect(&mut self, client: ClientId, link: Link<T>) {
        self.links.insert(client, link);
        self.registry.lock().entry(client).or_insert_with(ClientRecord::new);
    }

    fn link(&self, client: ClientId) -> TailResult<&Link<T>> {
        self.links.get(&client).ok_or(TailError::UnknownPeer(client.as_u32()))
    }

    /// Spawns `concurrency` workers racing on the shared inbox, modelling a
    /// broker that services many clients' connections in parallel rather
    /// than one message at a time.
    pub fn spawn_workers(self: &Arc<Self>, concurrency: usize) {
        for _ in 0..concurrency {
            let server = self.clone();
            self.scheduler.spawn(async move { server.run_worker().await });
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let (from, msg) = self.inbox.recv().await;
            self.handle(from, msg).await;
        }
    }

    fn label(&self) -> String {
        "tail-server".to_string()
    }

    async fn handle(&self, from: ClientId, msg: TailProtocol<T>) {
        self.scheduler.delay(LOOKUP_CLIENT_COST).await;
        match msg {
            TailProtocol::NewTx(tx, recipients) => self.handle_new_tx(from, tx, recipients).await,
            TailProtocol::Pull => self.handle_pull(from).await,
            TailProtocol::Connect => self.set_conn(from, Conn::Online),
            TailProtocol::Disconnect => self.set_conn(from, Conn::Offline),
            TailProtocol::SnapshotStart => self.set_conn(from, Conn::Blocked),
            TailProtocol::SnapshotEnd => self.handle_snapshot_end(from).await,
            other @ (TailProtocol::AckTx(_) | TailProtocol::NotifyTx(_)) => {
                panic!("{}", TailError::UnexpectedServerMsg { client: from, msg: format!("{other:?}") });
            }
        }
    }

    fn set_conn(&self, client: ClientId, conn: Conn) {
        if let Some(rec) = self.registry.lock().get_mut(&client) {
            rec.conn = conn;
        }
    }

    async fn handle_new_tx(&self, from: ClientId, tx: T, recipients: Vec<ClientId>) {
        let valid = tx.validate().run(&self.scheduler).await;
        if !valid {
            self.trace.record(self.label(), self.scheduler.now(), TailTraceEvent::InvalidTransition { reason: format!("tx {:?} failed validation", tx.tx_ref()) });
            return;
        }

        // A party is "blocked" either because it is a recipient mid-settlement
        // or because the sender itself issued its own `SnapshotStart` (it is
        // mid-settlement and cannot transact). Either way the whole message
        // parks on the sender's queue, never the triggering recipient's —
        // see the parking-policy note above.
        let any_blocked = {
            let registry = self.registry.lock();
            let sender_blocked = registry.get(&from).map(|rec| rec.conn == Conn::Blocked).unwrap_or(false);
            let recipient_blocked = recipients.iter().any(|r| registry.get(r).map(|rec| rec.conn == Conn::Blocked).unwrap_or(false));
            sender_blocked || recipient_blocked
        };
        if any_blocked {
            let mut registry = self.registry.lock();
            if let Some(sender) = registry.get_mut(&from) {
                sender.queue.push_back(TailProtocol::NewTx(tx, recipients));
            }
            return;
        }

        enum Action {
            Notify(ClientId),
            Mailboxed(ClientId, usize),
        }
        let mut actions = Vec::with_capacity(recipients.len());
        {
            let mut registry = self.registry.lock();
            for r in &recipients {
                let Some(rec) = registry.get_mut(r) else { continue };
                match rec.conn {
                    Conn::Online => actions.push(Action::Notify(*r)),
                    Conn::Offline => {
                        rec.mailbox.push_back(TailProtocol::NotifyTx(tx.clone()));
                        actions.push(Action::Mailboxed(*r, rec.mailbox.len()));
                    }
                    Conn::Blocked => unreachable!("screened by any_blocked above"),
                }
            }
        }

        for action in actions {
            match action {
                Action::Notify(r) => {
                    if let Ok(link) = self.link(r) {
                        let msg = TailProtocol::NotifyTx(tx.clone());
                        let size = msg.wire_size();
                        link.send(msg, size).await;
                    }
                }
                Action::Mailboxed(client, len) => {
                    self.trace.record(self.label(), self.scheduler.now(), TailTraceEvent::StoreInMailbox { client, len });
                }
            }
        }

        if let Ok(link) = self.link(from) {
            let ack = TailProtocol::AckTx(tx.tx_ref());
            let size = ack.wire_size();
            link.send(ack, size).await;
        }
    }

    async fn handle_pull(&self, from: ClientId) {
        let drained: Vec<TailProtocol<T>> = {
            let mut registry = self.registry.lock();
            match registry.get_mut(&from) {
                Some(rec) => std::mem::take(&mut rec.mailbox).into_iter().collect(),
                None => return,
            }
        };
        let Ok(link) = self.link(from) else { return };
        for msg in drained {
            let size = msg.wire_size();
            link.send(msg, size).await;
        }
    }

    async fn handle_snapshot_end(&self, from: ClientId) {
        let drained: Vec<TailProtocol<T>> = {
            let mut registry = self.registry.lock();
            let Some(rec) = registry.get_mut(&from) else { return };
            rec.conn = Conn::Offline;
            std::mem::take(&mut rec.queue).into_iter().collect()
        };
        // Oldest-first: `reenqueue` pushes to the front, so replay newest
        // first and the oldest message ends up at the very front.
        for msg in drained.into_iter().rev() {
            self.inbox.reenqueue((from, msg));
        }
    }
}
