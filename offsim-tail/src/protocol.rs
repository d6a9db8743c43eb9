//! Tail wire messages, connection states, and trace events.

use offsim_core::channel::MpTraceEvent;
use offsim_types::wire::{CONTROL_MESSAGE_BYTES, MOCK_TX_HEADER_BYTES, RECIPIENT_ADDRESS_BYTES};
use offsim_types::{ClientId, Tx, TxRef};

/// A client's registration state at the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conn {
    Online,
    Offline,
    Blocked,
}

/// The tail protocol's wire messages. Server-bound messages arrive at the
/// server's inbox wrapped in `(ClientId, TailProtocol<T>)` so the server
/// knows which client sent them; client-bound messages (`AckTx`,
/// `NotifyTx`) arrive at a plain `TailProtocol<T>` inbox since a client has
/// exactly one peer, the server.
#[derive(Debug, Clone)]
pub enum TailProtocol<T: Tx> {
    NewTx(T, Vec<ClientId>),
    Pull,
    Connect,
    Disconnect,
    SnapshotStart,
    SnapshotEnd,
    AckTx(TxRef),
    NotifyTx(T),
}

impl<T: Tx> TailProtocol<T> {
    pub fn wire_size(&self) -> u64 {
        match self {
            TailProtocol::NewTx(tx, recipients) => tx.size() + MOCK_TX_HEADER_BYTES + recipients.len() as u64 * RECIPIENT_ADDRESS_BYTES,
            TailProtocol::Pull
            | TailProtocol::Connect
            | TailProtocol::Disconnect
            | TailProtocol::SnapshotStart
            | TailProtocol::SnapshotEnd => CONTROL_MESSAGE_BYTES,
            TailProtocol::AckTx(_) => TxRef::SIZE_BYTES,
            TailProtocol::NotifyTx(tx) => tx.size() + MOCK_TX_HEADER_BYTES,
        }
    }
}

/// Trace events specific to the tail protocol, plus whatever the shared
/// multiplexer primitive records — on either side of the star topology,
/// since the server's inbox and a client's inbox carry different message
/// envelopes.
#[derive(Debug, Clone)]
pub enum TailTraceEvent<T: Tx> {
    ServerMp(MpTraceEvent<(ClientId, TailProtocol<T>)>),
    ClientMp(MpTraceEvent<TailProtocol<T>>),
    StoreInMailbox { client: ClientId, len: usize },
    InvalidTransition { reason: String },
    WakeUp { client: ClientId, slot: u64 },
}

impl<T: Tx> From<MpTraceEvent<(ClientId, TailProtocol<T>)>> for TailTraceEvent<T> {
    fn from(e: MpTraceEvent<(ClientId, TailProtocol<T>)>) -> Self {
        TailTraceEvent::ServerMp(e)
    }
}

impl<T: Tx> From<MpTraceEvent<TailProtocol<T>>> for TailTraceEvent<T> {
    fn from(e: MpTraceEvent<TailProtocol<T>>) -> Self {
        TailTraceEvent::ClientMp(e)
    }
}
