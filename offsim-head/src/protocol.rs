//! Wire messages, trace events, and the tri-state `Decision` a head node's
//! transition function returns.

use crate::state::{HState, SnapN};
use offsim_core::channel::MpTraceEvent;
use offsim_core::clock::VirtualTime;
use offsim_core::delayed::DelayedComp;
use offsim_types::wire::MOCK_TX_HEADER_BYTES;
use offsim_types::{ASig, NodeId, Sig, Tx, TxRef};
use std::collections::BTreeSet;

/// Implementation-chosen wire sizes for the control/signature payloads the
/// spec does not give explicit byte counts for (it only fixes `TxRef` at 32
/// bytes, the tx header at 2 bytes, and control messages at 0). Mock sizes
/// only; never load-bearing for correctness, only for the bandwidth model.
pub const SIG_SIZE_BYTES: u64 = 64;
pub const ASIG_SIZE_BYTES: u64 = 96;
pub const SNAPN_SIZE_BYTES: u64 = 8;

/// A node's wire messages. `SigReqTx` and `SigAckTx`/`SigAckSn` carry the
/// originating party's `NodeId` alongside the spec's payload — the party
/// who should receive the reply (`SendTo(issuer, ...)`, `SendTo(leader,
/// ...)`) is not otherwise recoverable from the message content alone,
/// since `NodeId` doubles as party index but a `Tx` carries no party
/// reference. `SigReqSn`'s destination (the leader) needs no such
/// passenger: `hcLeaderFun` is a pure function every node can evaluate for
/// itself.
#[derive(Debug, Clone)]
pub enum HeadProtocol<T: Tx> {
    New(T),
    SigReqTx(NodeId, T),
    SigAckTx(TxRef, NodeId, Sig),
    SigConfTx(TxRef, ASig),
    NewSn,
    SigReqSn(SnapN, BTreeSet<TxRef>),
    SigAckSn(SnapN, NodeId, Sig),
    SigConfSn(SnapN, ASig),
}

impl<T: Tx> HeadProtocol<T> {
    /// Wire size charged against the multiplexer's bandwidth model.
    pub fn wire_size(&self) -> u64 {
        match self {
            HeadProtocol::New(tx) => tx.size() + MOCK_TX_HEADER_BYTES,
            HeadProtocol::SigReqTx(_, tx) => tx.size() + MOCK_TX_HEADER_BYTES,
            HeadProtocol::SigAckTx(_, _, _) => TxRef::SIZE_BYTES + SIG_SIZE_BYTES,
            HeadProtocol::SigConfTx(_, _) => TxRef::SIZE_BYTES + ASIG_SIZE_BYTES,
            HeadProtocol::NewSn => 0,
            HeadProtocol::SigReqSn(_, txs) => SNAPN_SIZE_BYTES + TxRef::SIZE_BYTES * txs.len() as u64,
            HeadProtocol::SigAckSn(_, _, _) => SNAPN_SIZE_BYTES + SIG_SIZE_BYTES,
            HeadProtocol::SigConfSn(_, _) => SNAPN_SIZE_BYTES + ASIG_SIZE_BYTES,
        }
    }
}

/// What a node does with the outcome of one `Decision::Apply`.
#[derive(Debug, Clone)]
pub enum Outgoing<T: Tx> {
    SendNothing,
    SendTo(NodeId, HeadProtocol<T>),
    Multicast(HeadProtocol<T>),
}

/// Trace events specific to the head protocol, plus whatever the shared
/// multiplexer primitive records against this node's channels.
#[derive(Debug, Clone)]
pub enum HeadTraceEvent<T: Tx> {
    Mp(MpTraceEvent<HeadProtocol<T>>),
    Invalid { reason: String },
    NewTxSubmitted { tx_ref: TxRef },
    TxSigRequested { tx_ref: TxRef },
    TxSigAcked { tx_ref: TxRef },
    TxConfirmed { tx_ref: TxRef },
    SnapSealed { n: SnapN },
    SnapSigRequested { n: SnapN },
    SnapSigAcked { n: SnapN },
    SnapConfirmed { n: SnapN },
}

impl<T: Tx> From<MpTraceEvent<HeadProtocol<T>>> for HeadTraceEvent<T> {
    fn from(e: MpTraceEvent<HeadProtocol<T>>) -> Self {
        HeadTraceEvent::Mp(e)
    }
}

/// The outcome of applying one `HeadProtocol` event to an `HState`.
pub enum Decision<T: Tx> {
    /// The event is structurally invalid (bad signature, unknown ref with
    /// failing validation, snapshot number in the past). `cost` is still
    /// charged: validation work happened even though it was rejected.
    Invalid(VirtualTime, String),
    /// A precondition is not yet satisfiable (a referenced tx or snapshot
    /// has not arrived yet). The event is re-queued to the tail of the
    /// node's inbox; `cost` is charged so repeated waiting cannot be free.
    Wait(VirtualTime),
    /// Commit `new_state`, record `trace`, and dispatch `outgoing`.
    Apply { new_state: DelayedComp<HState<T>>, trace: HeadTraceEvent<T>, outgoing: Outgoing<T> },
}
