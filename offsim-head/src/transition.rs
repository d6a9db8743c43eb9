//! The head protocol's transition function.
//!
//! `step` is a pure, synchronous function from `(state, event)` to a
//! `Decision`. It never awaits anything: every crypto/validation guard it
//! needs is evaluated through the `*_value` pure functions in
//! `offsim_types::sig`/`offsim_types::tx`, and the matching `*_COST`
//! constants are summed by hand into whatever `VirtualTime` the returned
//! `Decision` carries. The caller (the node driver) is the one that
//! actually charges that time against the scheduler, by wrapping the new
//! state in the `DelayedComp` this function already built.

use crate::protocol::{Decision, HeadProtocol, HeadTraceEvent, Outgoing};
use crate::state::{HState, Snap, SnapN, TxO};
use offsim_core::clock::VirtualTime;
use offsim_core::delayed::DelayedComp;
use offsim_types::sig::{self, ASig, Sig};
use offsim_types::{NodeId, Tx, TxRef};
use std::collections::BTreeSet;

/// `hcLeaderFun`: which party seals snapshot `n`. The default round-robins
/// over the committee by snapshot number.
pub type LeaderFun = fn(SnapN, usize) -> NodeId;

pub fn default_leader_fun(n: SnapN, committee_size: usize) -> NodeId {
    debug_assert!(committee_size > 0, "a committee of size 0 has no leader");
    NodeId::new(n.as_i64().rem_euclid(committee_size as i64) as u32)
}

/// The message every party signs over for snapshot `n`: the snapshot
/// number followed by every included tx ref in canonical (sorted) order.
fn snap_message(n: SnapN, included: &BTreeSet<TxRef>) -> Vec<u8> {
    let mut buf = n.as_i64().to_le_bytes().to_vec();
    for r in included {
        buf.extend_from_slice(r.as_bytes());
    }
    buf
}

pub fn step<T: Tx>(state: &HState<T>, event: HeadProtocol<T>, leader_fun: LeaderFun) -> Decision<T> {
    match event {
        HeadProtocol::New(tx) => new(state, tx),
        HeadProtocol::SigReqTx(issuer, tx) => sig_req_tx(state, issuer, tx),
        HeadProtocol::SigAckTx(tx_ref, from, their_sig) => sig_ack_tx(state, tx_ref, from, their_sig),
        HeadProtocol::SigConfTx(tx_ref, agg) => sig_conf_tx(state, tx_ref, agg),
        HeadProtocol::NewSn => new_sn(state, leader_fun),
        HeadProtocol::SigReqSn(n, included) => sig_req_sn(state, n, included, leader_fun),
        HeadProtocol::SigAckSn(n, from, their_sig) => sig_ack_sn(state, n, from, their_sig),
        HeadProtocol::SigConfSn(n, agg) => sig_conf_sn(state, n, agg),
    }
}

fn new<T: Tx>(state: &HState<T>, tx: T) -> Decision<T> {
    if !tx.validate_value() {
        return Decision::Invalid(tx.validation_cost(), "tx failed validation".into());
    }
    let inputs = tx.inputs();
    if !inputs.iter().all(|r| state.utxo_sig.contains(r)) {
        return Decision::Invalid(tx.validation_cost(), "tx references an input outside utxo_sig".into());
    }
    let tx_ref = tx.tx_ref();
    if state.txs_sig.contains_key(&tx_ref) {
        return Decision::Invalid(tx.validation_cost(), "tx already submitted".into());
    }

    let mut new_state = state.clone();
    for i in &inputs {
        new_state.utxo_sig.remove(i);
    }
    for o in tx.outputs() {
        new_state.utxo_sig.insert(o);
    }
    new_state.txs_sig.insert(tx_ref, TxO::new(state.party_index, tx.clone(), inputs.into_iter().collect()));

    Decision::Apply {
        new_state: DelayedComp::new(new_state, tx.validation_cost()),
        trace: HeadTraceEvent::NewTxSubmitted { tx_ref },
        outgoing: Outgoing::Multicast(HeadProtocol::SigReqTx(state.party_index, tx)),
    }
}

fn sig_req_tx<T: Tx>(state: &HState<T>, issuer: NodeId, tx: T) -> Decision<T> {
    if !tx.validate_value() {
        return Decision::Invalid(tx.validation_cost(), "tx failed validation".into());
    }
    let inputs = tx.inputs();
    if !inputs.iter().all(|r| state.utxo_sig.contains(r) || state.utxo_conf.contains(r)) {
        // The inputs may simply not have arrived at this node yet; retry.
        return Decision::Wait(tx.validation_cost());
    }

    let tx_ref = tx.tx_ref();
    let my_sig = sig::sign_value(state.sk, tx_ref.as_bytes());
    let mut new_state = state.clone();

    let first_sight = !new_state.txs_sig.contains_key(&tx_ref);
    if first_sight {
        for i in &inputs {
            new_state.utxo_sig.remove(i);
        }
        for o in tx.outputs() {
            new_state.utxo_sig.insert(o);
        }
        new_state.txs_sig.insert(tx_ref, TxO::new(issuer, tx.clone(), inputs.into_iter().collect()));
    }
    new_state.txs_sig.get_mut(&tx_ref).unwrap().sigs.insert(state.sk.derive_vkey(), my_sig);

    Decision::Apply {
        new_state: DelayedComp::new(new_state, tx.validation_cost() + sig::SIGN_TX_COST),
        trace: HeadTraceEvent::TxSigRequested { tx_ref },
        outgoing: Outgoing::SendTo(issuer, HeadProtocol::SigAckTx(tx_ref, state.party_index, my_sig)),
    }
}

fn sig_ack_tx<T: Tx>(state: &HState<T>, tx_ref: TxRef, from: NodeId, their_sig: Sig) -> Decision<T> {
    if !state.txs_sig.contains_key(&tx_ref) {
        return Decision::Wait(sig::VERIFY_TX_COST);
    }
    let Some(&signer_vk) = state.vks.get(from.as_u32() as usize) else {
        return Decision::Invalid(sig::VERIFY_TX_COST, "ack from an unknown party index".into());
    };
    if !sig::verify_value(signer_vk, tx_ref.as_bytes(), &their_sig) {
        return Decision::Invalid(sig::VERIFY_TX_COST, "tx signature failed to verify".into());
    }

    let mut new_state = state.clone();
    let entry = new_state.txs_sig.get_mut(&tx_ref).unwrap();
    entry.sigs.insert(signer_vk, their_sig);

    let mut cost = sig::VERIFY_TX_COST;
    let outgoing = if entry.sigs.len() == state.vks.len() {
        let sigs: Vec<Sig> = entry.sigs.values().copied().collect();
        let agg = sig::aggregate_value(&sigs);
        entry.agg = Some(agg.clone());
        cost = cost + sig::AGGREGATE_TX_COST;
        Outgoing::Multicast(HeadProtocol::SigConfTx(tx_ref, agg))
    } else {
        Outgoing::SendNothing
    };

    Decision::Apply { new_state: DelayedComp::new(new_state, cost), trace: HeadTraceEvent::TxSigAcked { tx_ref }, outgoing }
}

fn sig_conf_tx<T: Tx>(state: &HState<T>, tx_ref: TxRef, agg: ASig) -> Decision<T> {
    let avk = sig::aggregate_vkeys(&state.vks);
    if !sig::verify_agg_value(&avk, tx_ref.as_bytes(), &agg) {
        return Decision::Invalid(sig::VERIFY_TX_COST, "aggregate tx signature failed to verify".into());
    }
    if !state.txs_sig.contains_key(&tx_ref) {
        return Decision::Wait(sig::VERIFY_TX_COST);
    }

    let mut new_state = state.clone();
    let entry = new_state.txs_sig.get_mut(&tx_ref).unwrap();
    entry.agg = Some(agg);
    let confirmed = entry.clone();

    for i in &confirmed.tx.inputs() {
        new_state.utxo_conf.remove(i);
    }
    for o in confirmed.tx.outputs() {
        new_state.utxo_conf.insert(o);
    }
    new_state.txs_conf.insert(tx_ref, confirmed);

    Decision::Apply {
        new_state: DelayedComp::new(new_state, sig::VERIFY_TX_COST),
        trace: HeadTraceEvent::TxConfirmed { tx_ref },
        outgoing: Outgoing::SendNothing,
    }
}

fn new_sn<T: Tx>(state: &HState<T>, leader_fun: LeaderFun) -> Decision<T> {
    let candidate_n = state.snap_n_sig.next();
    if leader_fun(candidate_n, state.vks.len()) != state.party_index {
        return Decision::Invalid(VirtualTime::ZERO, "not the leader for this snapshot number".into());
    }
    if !state.txs_sig.keys().all(|r| state.txs_conf.contains_key(r)) {
        return Decision::Wait(sig::SIGN_SNAP_COST);
    }

    let already_included: BTreeSet<TxRef> = state.snap_conf.as_ref().map(|s| s.included_txs.clone()).unwrap_or_default();
    let included: BTreeSet<TxRef> = state.txs_conf.keys().copied().filter(|r| !already_included.contains(r)).collect();

    let my_sig = sig::sign_value(state.sk, &snap_message(candidate_n, &included));
    let mut snap = Snap::new(candidate_n, state.utxo_conf.clone(), included.clone());
    snap.sigs.insert(state.sk.derive_vkey(), my_sig);

    let mut new_state = state.clone();
    new_state.snap_n_sig = candidate_n;
    new_state.snap_sig = Some(snap);

    Decision::Apply {
        new_state: DelayedComp::new(new_state, sig::SIGN_SNAP_COST),
        trace: HeadTraceEvent::SnapSealed { n: candidate_n },
        outgoing: Outgoing::Multicast(HeadProtocol::SigReqSn(candidate_n, included)),
    }
}

fn sig_req_sn<T: Tx>(state: &HState<T>, n: SnapN, included: BTreeSet<TxRef>, leader_fun: LeaderFun) -> Decision<T> {
    let expected = state.snap_n_sig.next();
    if n < expected {
        return Decision::Invalid(sig::VERIFY_SNAP_COST, "stale snapshot request".into());
    }
    if n > expected {
        return Decision::Wait(sig::VERIFY_SNAP_COST);
    }
    if !included.iter().all(|r| state.txs_conf.contains_key(r)) {
        return Decision::Wait(sig::VERIFY_SNAP_COST);
    }

    let my_sig = sig::sign_value(state.sk, &snap_message(n, &included));
    let mut snap = Snap::new(n, state.utxo_conf.clone(), included);
    snap.sigs.insert(state.sk.derive_vkey(), my_sig);

    let mut new_state = state.clone();
    new_state.snap_n_sig = n;
    new_state.snap_sig = Some(snap);

    let leader = leader_fun(n, state.vks.len());
    Decision::Apply {
        new_state: DelayedComp::new(new_state, sig::SIGN_SNAP_COST),
        trace: HeadTraceEvent::SnapSigRequested { n },
        outgoing: Outgoing::SendTo(leader, HeadProtocol::SigAckSn(n, state.party_index, my_sig)),
    }
}

fn sig_ack_sn<T: Tx>(state: &HState<T>, n: SnapN, from: NodeId, their_sig: Sig) -> Decision<T> {
    if n < state.snap_n_sig {
        return Decision::Invalid(sig::VERIFY_SNAP_COST, "stale snapshot ack".into());
    }
    if n > state.snap_n_sig {
        return Decision::Wait(sig::VERIFY_SNAP_COST);
    }
    let Some(&signer_vk) = state.vks.get(from.as_u32() as usize) else {
        return Decision::Invalid(sig::VERIFY_SNAP_COST, "ack from an unknown party index".into());
    };
    let Some(snap) = state.snap_sig.as_ref() else {
        return Decision::Wait(sig::VERIFY_SNAP_COST);
    };
    if !sig::verify_value(signer_vk, &snap_message(n, &snap.included_txs), &their_sig) {
        return Decision::Invalid(sig::VERIFY_SNAP_COST, "snapshot signature failed to verify".into());
    }

    let mut new_state = state.clone();
    let snap_mut = new_state.snap_sig.as_mut().unwrap();
    snap_mut.sigs.insert(signer_vk, their_sig);

    let mut cost = sig::VERIFY_SNAP_COST;
    let outgoing = if snap_mut.sigs.len() == state.vks.len() {
        let sigs: Vec<Sig> = snap_mut.sigs.values().copied().collect();
        let agg = sig::aggregate_value(&sigs);
        snap_mut.agg = Some(agg.clone());
        cost = cost + sig::AGGREGATE_SNAP_COST;
        Outgoing::Multicast(HeadProtocol::SigConfSn(n, agg))
    } else {
        Outgoing::SendNothing
    };

    Decision::Apply { new_state: DelayedComp::new(new_state, cost), trace: HeadTraceEvent::SnapSigAcked { n }, outgoing }
}

fn sig_conf_sn<T: Tx>(state: &HState<T>, n: SnapN, agg: ASig) -> Decision<T> {
    let expected = state.snap_n_conf.next();
    if n < expected {
        return Decision::Invalid(sig::VERIFY_SNAP_COST, "stale snapshot confirmation".into());
    }
    if n > expected {
        return Decision::Wait(sig::VERIFY_SNAP_COST);
    }
    let Some(snap) = state.snap_sig.as_ref().filter(|s| s.n == n) else {
        return Decision::Wait(sig::VERIFY_SNAP_COST);
    };

    let avk = sig::aggregate_vkeys(&state.vks);
    if !sig::verify_agg_value(&avk, &snap_message(n, &snap.included_txs), &agg) {
        return Decision::Invalid(sig::VERIFY_SNAP_COST, "aggregate snapshot signature failed to verify".into());
    }

    let mut confirmed = snap.clone();
    confirmed.agg = Some(agg);

    let mut new_state = state.clone();
    for tx_ref in &confirmed.included_txs {
        new_state.txs_conf.remove(tx_ref);
    }
    new_state.snap_n_conf = n;
    new_state.snap_conf = Some(confirmed);

    Decision::Apply {
        new_state: DelayedComp::new(new_state, sig::VERIFY_SNAP_COST),
        trace: HeadTraceEvent::SnapConfirmed { n },
        outgoing: Outgoing::SendNothing,
    }
}
