//! Folds a recorded trace into reportable metrics, rather than any live
//! protocol logic — this crate never mutates simulation state, only reads
//! `TraceRecord`s after (or during) a run.
//!
//! **Tail throughput/usage fold.** Every `MultiplexerLink` records its
//! `SendLeading`/`RecvLeading`/`RecvTrailing` events under its own label
//! (see `offsim_core::channel`), not the multiplexer it targets — the
//! workspace's own naming convention for tail links is `"client[N]->server"`
//! for a client's uplink and `"server->client[N]"` for the server's downlink
//! (see `offsim_tail::server`'s tests), so a link's direction with respect
//! to the server is recovered from its label's suffix/prefix rather than
//! from a dedicated "is this the server" flag the trace does not otherwise
//! carry.

use offsim_core::channel::MpTraceEvent;
use offsim_core::clock::VirtualTime;
use offsim_core::trace::TraceRecord;
use offsim_head::{HeadTraceEvent, SnapN};
use offsim_tail::TailProtocol;
use offsim_tail::TailTraceEvent;
use offsim_types::{Tx, TxRef};
use std::collections::BTreeMap;

/// Tail-side throughput and network-usage metrics, folded over the trace.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TailMetrics {
    pub confirmed_txs: u64,
    pub write_usage_bytes: u64,
    pub read_usage_bytes: u64,
    pub last_tx_time: VirtualTime,
    pub last_slot_seen: u64,
}

impl TailMetrics {
    /// `confirmed / (last_slot * slot_length)`, the throughput if every
    /// slot up to the last one observed had produced a confirmation.
    pub fn max_throughput(&self, slot_length: VirtualTime) -> f64 {
        let horizon = slot_length.as_micros() as f64 * self.last_slot_seen as f64 / 1_000_000.0;
        if horizon <= 0.0 {
            return 0.0;
        }
        self.confirmed_txs as f64 / horizon
    }

    /// `confirmed / (1 + last_tx_time)`, the throughput actually observed
    /// over the run's own span.
    pub fn actual_throughput(&self) -> f64 {
        self.confirmed_txs as f64 / (1.0 + self.last_tx_time.as_secs_f64())
    }

    /// Usage rates in kbit/s, assuming the trace spans `elapsed`.
    pub fn write_usage_kbit_per_sec(&self, elapsed: VirtualTime) -> f64 {
        kbit_per_sec(self.write_usage_bytes, elapsed)
    }

    pub fn read_usage_kbit_per_sec(&self, elapsed: VirtualTime) -> f64 {
        kbit_per_sec(self.read_usage_bytes, elapsed)
    }
}

fn kbit_per_sec(bytes: u64, elapsed: VirtualTime) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0 / 1024.0) / secs
}

fn is_server_inbound_link(thread: &str) -> bool {
    thread.ends_with("->server")
}

fn is_server_outbound_link(thread: &str) -> bool {
    thread.starts_with("server->")
}

/// Folds a tail trace into `TailMetrics`.
pub fn fold_tail_metrics<T: Tx>(trace: &[TraceRecord<TailTraceEvent<T>>]) -> TailMetrics {
    let mut metrics = TailMetrics::default();
    for record in trace {
        match &record.event {
            TailTraceEvent::ServerMp(MpTraceEvent::RecvLeading { size }) if is_server_inbound_link(&record.thread) => {
                metrics.read_usage_bytes += size;
            }
            TailTraceEvent::ServerMp(MpTraceEvent::SendLeading { size }) if is_server_outbound_link(&record.thread) => {
                metrics.write_usage_bytes += size;
            }
            TailTraceEvent::ClientMp(MpTraceEvent::RecvLeading { size }) if is_server_inbound_link(&record.thread) => {
                metrics.read_usage_bytes += size;
            }
            TailTraceEvent::ClientMp(MpTraceEvent::SendLeading { size }) if is_server_outbound_link(&record.thread) => {
                metrics.write_usage_bytes += size;
            }
            TailTraceEvent::ClientMp(MpTraceEvent::RecvTrailing { msg: TailProtocol::AckTx(_) }) => {
                metrics.confirmed_txs += 1;
                metrics.last_tx_time = metrics.last_tx_time.max(record.time);
            }
            TailTraceEvent::WakeUp { slot, .. } if *slot > metrics.last_slot_seen => {
                metrics.last_slot_seen = *slot;
            }
            _ => {}
        }
    }
    metrics
}

/// One tx's time from submission to aggregate-signature confirmation, as
/// observed at a single head node (confirmation is per-node, so the same
/// tx can have a different latency at each node until the network quiesces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLatency {
    pub tx_ref: TxRef,
    pub submitted_at: VirtualTime,
    pub confirmed_at: VirtualTime,
}

impl TxLatency {
    pub fn latency(&self) -> VirtualTime {
        self.confirmed_at.saturating_sub(self.submitted_at)
    }
}

/// One snapshot's time from being sealed as a candidate to aggregate
/// confirmation, as observed at a single head node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapLatency {
    pub n: SnapN,
    pub sealed_at: VirtualTime,
    pub confirmed_at: VirtualTime,
}

impl SnapLatency {
    pub fn latency(&self) -> VirtualTime {
        self.confirmed_at.saturating_sub(self.sealed_at)
    }
}

/// Folds one head node's trace (identified by `thread` label) into the
/// confirmation latency of every tx and snapshot it saw through to
/// confirmation. Txs/snapshots the node never confirmed are omitted.
pub fn fold_head_latencies<T: Tx>(node_label: &str, trace: &[TraceRecord<HeadTraceEvent<T>>]) -> (Vec<TxLatency>, Vec<SnapLatency>) {
    let mut submitted: BTreeMap<TxRef, VirtualTime> = BTreeMap::new();
    let mut sealed: BTreeMap<SnapN, VirtualTime> = BTreeMap::new();
    let mut tx_latencies = Vec::new();
    let mut snap_latencies = Vec::new();

    for record in trace.iter().filter(|r| r.thread == node_label) {
        match &record.event {
            HeadTraceEvent::NewTxSubmitted { tx_ref } => {
                submitted.entry(*tx_ref).or_insert(record.time);
            }
            HeadTraceEvent::TxConfirmed { tx_ref } => {
                if let Some(submitted_at) = submitted.get(tx_ref) {
                    tx_latencies.push(TxLatency { tx_ref: *tx_ref, submitted_at: *submitted_at, confirmed_at: record.time });
                }
            }
            HeadTraceEvent::SnapSealed { n } => {
                sealed.entry(*n).or_insert(record.time);
            }
            HeadTraceEvent::SnapConfirmed { n } => {
                if let Some(sealed_at) = sealed.get(n) {
                    snap_latencies.push(SnapLatency { n: *n, sealed_at: *sealed_at, confirmed_at: record.time });
                }
            }
            HeadTraceEvent::Mp(MpTraceEvent::SendLeading { .. } | MpTraceEvent::RecvLeading { .. } | MpTraceEvent::RecvTrailing { .. })
            | HeadTraceEvent::Invalid { .. }
            | HeadTraceEvent::TxSigRequested { .. }
            | HeadTraceEvent::TxSigAcked { .. }
            | HeadTraceEvent::SnapSigRequested { .. }
            | HeadTraceEvent::SnapSigAcked { .. } => {}
        }
    }

    (tx_latencies, snap_latencies)
}
