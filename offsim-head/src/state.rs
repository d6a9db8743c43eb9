//! Per-node protocol state: `TxO`, `SnapN`, `Snap`, `HState`.

use offsim_types::{NodeId, SKey, VKey, ASig, Sig, TxRef, Tx};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Monotone signed snapshot number. `-1` means "no snapshot sealed yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapN(i64);

impl SnapN {
    pub const NONE: SnapN = SnapN(-1);

    pub const fn new(n: i64) -> Self {
        Self(n)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SnapN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node's local record of one transaction moving through sign/aggregate.
#[derive(Debug, Clone)]
pub struct TxO<T: Tx> {
    pub issuer: NodeId,
    pub tx: T,
    pub deps: BTreeSet<TxRef>,
    pub sigs: BTreeMap<VKey, Sig>,
    pub agg: Option<ASig>,
}

impl<T: Tx> TxO<T> {
    pub fn new(issuer: NodeId, tx: T, deps: BTreeSet<TxRef>) -> Self {
        Self { issuer, tx, deps, sigs: BTreeMap::new(), agg: None }
    }
}

/// A sealed (possibly not yet confirmed) snapshot of the confirmed UTxO set.
#[derive(Debug, Clone)]
pub struct Snap {
    pub n: SnapN,
    pub utxo: BTreeSet<TxRef>,
    pub included_txs: BTreeSet<TxRef>,
    pub sigs: BTreeMap<VKey, Sig>,
    pub agg: Option<ASig>,
}

impl Snap {
    pub fn new(n: SnapN, utxo: BTreeSet<TxRef>, included_txs: BTreeSet<TxRef>) -> Self {
        Self { n, utxo, included_txs, sigs: BTreeMap::new(), agg: None }
    }
}

/// One head node's full local state.
#[derive(Debug, Clone)]
pub struct HState<T: Tx> {
    pub sk: SKey,
    pub vks: Vec<VKey>,
    pub party_index: NodeId,

    pub snap_n_sig: SnapN,
    pub snap_n_conf: SnapN,

    pub utxo_sig: BTreeSet<TxRef>,
    pub utxo_conf: BTreeSet<TxRef>,

    pub snap_sig: Option<Snap>,
    pub snap_conf: Option<Snap>,

    pub txs_sig: BTreeMap<TxRef, TxO<T>>,
    pub txs_conf: BTreeMap<TxRef, TxO<T>>,
}

impl<T: Tx> HState<T> {
    /// Seeds a fresh node with no pending or confirmed activity and the
    /// given starting UTxO set. The data model requires `utxo_sig`/
    /// `utxo_conf` to start somewhere before any `New(tx)` event can
    /// reference an input; this is that starting point.
    pub fn genesis(party_index: NodeId, sk: SKey, vks: Vec<VKey>, initial_utxo: BTreeSet<TxRef>) -> Self {
        Self {
            sk,
            vks,
            party_index,
            snap_n_sig: SnapN::NONE,
            snap_n_conf: SnapN::NONE,
            utxo_sig: initial_utxo.clone(),
            utxo_conf: initial_utxo,
            snap_sig: None,
            snap_conf: None,
            txs_sig: BTreeMap::new(),
            txs_conf: BTreeMap::new(),
        }
    }

    pub fn committee_size(&self) -> usize {
        self.vks.len()
    }
}
