//! The tail client: two concurrent tasks (an inbound handler and an event
//! loop) sharing a balance cell, driving a pre-generated event tape through
//! the payment-window settlement stall.

use crate::error::TailError;
use crate::protocol::{Conn, TailProtocol, TailTraceEvent};
use offsim_core::channel::{Multiplexer, MultiplexerLink};
use offsim_core::clock::VirtualTime;
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::TraceRecorder;
use offsim_types::{ClientId, Tx};
use parking_lot::Mutex;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;
use std::sync::Arc;

/// One entry of the deterministic client-input tape (§3's `Event`, with the
/// `from`/`slot` already specialised to this one client's own tape).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Pull { slot: u64 },
    NewTx { slot: u64, amount: i64, size: u64, recipients: Vec<ClientId> },
}

impl ClientEvent {
    pub fn slot(&self) -> u64 {
        match self {
            ClientEvent::Pull { slot } => *slot,
            ClientEvent::NewTx { slot, .. } => *slot,
        }
    }
}

/// A bounded interval around a client's starting balance. A pending send
/// that would leave this interval triggers a settlement stall instead of
/// going out. `None` means the client is always `InPaymentWindow`.
#[derive(Debug, Clone, Copy)]
pub struct PaymentWindow {
    pub lower: i64,
    pub upper: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentStatus {
    InPaymentWindow,
    OutOfPaymentWindow,
}

fn payment_status(window: Option<PaymentWindow>, current: i64) -> PaymentStatus {
    match window {
        None => PaymentStatus::InPaymentWindow,
        Some(w) if current >= w.lower && current <= w.upper => PaymentStatus::InPaymentWindow,
        Some(_) => PaymentStatus::OutOfPaymentWindow,
    }
}

/// Fixed frequency weights for the amount/size the client draws when
/// submitting a transaction, preserved exactly from the source model.
const AMOUNT_BUCKETS: [(i64, i64); 6] = [(1, 10), (10, 100), (100, 1_000), (1_000, 10_000), (10_000, 100_000), (100_000, 1_000_000)];
const AMOUNT_WEIGHTS: [u32; 6] = [122, 144, 143, 92, 41, 12];
const SIZE_BUCKETS: [(u64, u64); 6] = [(192, 512), (512, 1024), (1024, 2048), (2048, 4096), (4096, 8192), (8192, 16384)];
const SIZE_WEIGHTS: [u32; 6] = [318, 129, 37, 12, 43, 17];

/// Per-client likelihood of being online / submitting a tx in a given slot,
/// expressed as a fraction of the `1..=100` draw the source uses.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub online_likelihood: f64,
    pub submit_likelihood: f64,
}

/// `getRecipients`: the next client id modulo `N+1`, clamped to `≥1`. `n` is
/// the total client count.
pub fn default_recipients(client: ClientId, n: u32) -> Vec<ClientId> {
    let next = (client.as_u32() + 1) % (n + 1);
    vec![ClientId::new(next.max(1))]
}

/// Draws one slot's worth of this client's behaviour: whether it is online,
/// and if it submits, the `(amount, size)` of the new tx.
pub fn step_client(rng: &mut impl Rng, config: ClientConfig) -> (bool, Option<(i64, u64)>) {
    let p_online: u32 = rng.gen_range(1..=100);
    let online_cutoff = (config.online_likelihood * 100.0).round() as u32;
    if p_online > online_cutoff {
        return (false, None);
    }

    let p_submit: u32 = rng.gen_range(1..=100);
    let submit_cutoff = (config.submit_likelihood * 100.0).round() as u32;
    if p_submit > submit_cutoff {
        return (true, None);
    }

    let amount_dist = WeightedIndex::new(AMOUNT_WEIGHTS).expect("fixed nonzero weights");
    let (alo, ahi) = AMOUNT_BUCKETS[amount_dist.sample(rng)];
    let amount = rng.gen_range(alo..ahi);

    let size_dist = WeightedIndex::new(SIZE_WEIGHTS).expect("fixed nonzero weights");
    let (slo, shi) = SIZE_BUCKETS[size_dist.sample(rng)];
    let size = rng.gen_range(slo..shi);

    (true, Some((amount, size)))
}

/// Generates `duration` slots of tape for one client: a `Pull` for every
/// online slot, followed by a `NewTx` for every slot it also submits in —
/// matching the source's emission order.
pub fn generate_tape(client: ClientId, duration: u64, num_clients: u32, config: ClientConfig, recipients: fn(ClientId, u32) -> Vec<ClientId>, rng: &mut impl Rng) -> Vec<ClientEvent> {
    let mut tape = Vec::new();
    for slot in 0..duration {
        let (online, submission) = step_client(rng, config);
        if online {
            tape.push(ClientEvent::Pull { slot });
        }
        if let Some((amount, size)) = submission {
            tape.push(ClientEvent::NewTx { slot, amount, size, recipients: recipients(client, num_clients) });
        }
    }
    tape
}

struct Balance {
    initial: i64,
    current: Mutex<i64>,
}

impl Balance {
    fn new(initial: i64) -> Self {
        Self { initial, current: Mutex::new(initial) }
    }

    fn get(&self) -> i64 {
        *self.current.lock()
    }

    /// The inbound handler's side of the shared cell: adding a received
    /// `NotifyTx` amount.
    fn add(&self, amount: i64) {
        *self.current.lock() += amount;
    }

    /// The event loop's side: subtracting a submitted tx's amount.
    fn subtract(&self, amount: i64) {
        *self.current.lock() -= amount;
    }

    fn reset_to_initial(&self) {
        *self.current.lock() = self.initial;
    }
}

type ServerLink<T> = MultiplexerLink<(ClientId, TailProtocol<T>), TailTraceEvent<T>>;

/// A tail client: its own inbox (for `AckTx`/`NotifyTx` arriving from the
/// server), a send path back to the server, and a pre-generated tape of
/// events to drive through it.
pub struct TailClient<T: Tx> {
    id: ClientId,
    inbox: Multiplexer<TailProtocol<T>, TailTraceEvent<T>>,
    to_server: ServerLink<T>,
    balance: Balance,
    payment_window: Option<PaymentWindow>,
    settlement_delay_slots: u64,
    slot_length: VirtualTime,
    tx_factory: fn(ClientId, u64, i64, u64) -> T,
    scheduler: Scheduler,
    trace: TraceRecorder<TailTraceEvent<T>>,
    tape: Vec<ClientEvent>,
}

impl<T: Tx> TailClient<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ClientId,
        to_server: ServerLink<T>,
        initial_balance: i64,
        payment_window: Option<PaymentWindow>,
        settlement_delay_slots: u64,
        slot_length: VirtualTime,
        tx_factory: fn(ClientId, u64, i64, u64) -> T,
        scheduler: Scheduler,
        trace: TraceRecorder<TailTraceEvent<T>>,
        tape: Vec<ClientEvent>,
        read_capacity: u64,
        inbound_capacity: usize,
    ) -> Self {
        let inbox = Multiplexer::new(format!("client[{id}]"), scheduler.clone(), trace.clone(), read_capacity, inbound_capacity);
        Self { id, inbox, to_server, balance: Balance::new(initial_balance), payment_window, settlement_delay_slots, slot_length, tx_factory, scheduler, trace, tape }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn inbox_handle(&self) -> offsim_core::channel::EndpointHandle<TailProtocol<T>> {
        self.inbox.handle()
    }

    pub fn balance(&self) -> i64 {
        self.balance.get()
    }

    fn label(&self) -> String {
        format!("client[{}]", self.id)
    }

    /// Spawns both concurrent tasks onto the scheduler: the inbound handler
    /// and the event loop.
    pub fn spawn(self: Arc<Self>) {
        let inbound = self.clone();
        self.scheduler.clone().spawn(async move { inbound.run_inbound().await });
        let events = self.clone();
        self.scheduler.clone().spawn(async move { events.run_event_loop().await });
    }

    async fn run_inbound(self: Arc<Self>) {
        loop {
            let msg = self.inbox.recv().await;
            match msg {
                TailProtocol::AckTx(_) => {}
                TailProtocol::NotifyTx(tx) => self.balance.add(tx.amount()),
                other => panic!("{}", TailError::UnexpectedClientMsg { client: self.id, msg: format!("{other:?}") }),
            }
        }
    }

    async fn send(&self, msg: TailProtocol<T>) {
        let size = msg.wire_size();
        self.to_server.send((self.id, msg), size).await;
    }

    async fn run_event_loop(self: Arc<Self>) {
        let mut cursor = 0usize;
        let mut current_slot = 0u64;
        let mut conn = Conn::Offline;

        loop {
            let Some(event) = self.tape.get(cursor).cloned() else { return };

            if event.slot() > current_slot {
                if conn == Conn::Online {
                    self.send(TailProtocol::Disconnect).await;
                    conn = Conn::Offline;
                }
                self.scheduler.delay(self.slot_length).await;
                current_slot += 1;
                continue;
            }

            match event {
                ClientEvent::NewTx { slot, amount, size, recipients } => {
                    // The window gates whether *sending* is still safe, so it
                    // is checked against the balance this send would leave
                    // behind, not the balance sitting there right now.
                    let prospective = self.balance.get() - amount;
                    match payment_status(self.payment_window, prospective) {
                        PaymentStatus::InPaymentWindow => {
                            let tx = (self.tx_factory)(self.id, slot, amount, size);
                            self.send(TailProtocol::NewTx(tx, recipients)).await;
                            self.balance.subtract(amount);
                            conn = Conn::Offline;
                            cursor += 1;
                        }
                        PaymentStatus::OutOfPaymentWindow => {
                            conn = Conn::Blocked;
                            self.send(TailProtocol::SnapshotStart).await;
                            self.scheduler.delay(self.slot_length * self.settlement_delay_slots).await;
                            self.balance.reset_to_initial();
                            self.send(TailProtocol::SnapshotEnd).await;
                            current_slot += self.settlement_delay_slots;
                            conn = Conn::Offline;
                            // Do not advance cursor: the same event is retried.
                        }
                    }
                }
                ClientEvent::Pull { slot } => {
                    if conn == Conn::Offline {
                        self.trace.record(self.label(), self.scheduler.now(), TailTraceEvent::WakeUp { client: self.id, slot });
                        self.send(TailProtocol::Connect).await;
                    }
                    self.send(TailProtocol::Pull).await;
                    conn = Conn::Online;
                    cursor += 1;
                }
            }
        }
    }
}
