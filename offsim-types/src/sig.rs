//! Opaque signatures.
//!
//! The model never needs real cryptography — only that a signature can be
//! produced, verified, and aggregated with a fixed CPU cost charged through
//! [`DelayedComp`]. Keys and signatures are content-derived integers rather
//! than actual curve points; `VKey` happens to equal its `SKey`'s value,
//! which is fine because nothing here is ever exposed outside the
//! simulation.

use offsim_core::clock::VirtualTime;
use offsim_core::delayed::DelayedComp;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const SIGN_TX_COST: VirtualTime = VirtualTime::from_micros(200);
pub const VERIFY_TX_COST: VirtualTime = VirtualTime::from_micros(150);
pub const AGGREGATE_TX_COST: VirtualTime = VirtualTime::from_micros(100);
pub const SIGN_SNAP_COST: VirtualTime = VirtualTime::from_micros(300);
pub const VERIFY_SNAP_COST: VirtualTime = VirtualTime::from_micros(200);
pub const AGGREGATE_SNAP_COST: VirtualTime = VirtualTime::from_micros(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sig {
    signer: VKey,
    digest: u64,
}

/// An aggregate verification key over a fixed, ordered committee.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AVKey(Vec<VKey>);

/// An aggregate signature over the same committee an `AVKey` was built
/// from. Verification checks the covered signer set matches exactly, not
/// just that it is a subset — mirroring the data-model invariant that a
/// confirmed entry carries one valid signature from every party.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ASig {
    signers: Vec<VKey>,
    digest: u64,
}

impl SKey {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn derive_vkey(self) -> VKey {
        VKey(self.0)
    }
}

fn hash_message(vk: VKey, msg: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    vk.0.hash(&mut hasher);
    msg.hash(&mut hasher);
    hasher.finish()
}

pub fn sign_tx(sk: SKey, msg: &[u8]) -> DelayedComp<Sig> {
    sign(sk, msg, SIGN_TX_COST)
}

pub fn verify_tx(vk: VKey, msg: &[u8], sig: &Sig) -> DelayedComp<bool> {
    verify(vk, msg, sig, VERIFY_TX_COST)
}

pub fn aggregate_tx(sigs: &[Sig]) -> DelayedComp<ASig> {
    aggregate(sigs, AGGREGATE_TX_COST)
}

pub fn verify_agg_tx(avk: &AVKey, msg: &[u8], asig: &ASig) -> DelayedComp<bool> {
    verify_agg(avk, msg, asig, VERIFY_TX_COST)
}

pub fn sign_snap(sk: SKey, msg: &[u8]) -> DelayedComp<Sig> {
    sign(sk, msg, SIGN_SNAP_COST)
}

pub fn verify_snap(vk: VKey, msg: &[u8], sig: &Sig) -> DelayedComp<bool> {
    verify(vk, msg, sig, VERIFY_SNAP_COST)
}

pub fn aggregate_snap(sigs: &[Sig]) -> DelayedComp<ASig> {
    aggregate(sigs, AGGREGATE_SNAP_COST)
}

pub fn verify_agg_snap(avk: &AVKey, msg: &[u8], asig: &ASig) -> DelayedComp<bool> {
    verify_agg(avk, msg, asig, VERIFY_SNAP_COST)
}

pub fn aggregate_vkeys(vks: &[VKey]) -> AVKey {
    let mut v = vks.to_vec();
    v.sort();
    AVKey(v)
}

impl AVKey {
    pub fn members(&self) -> &[VKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Pure computations, with no cost attached. These are what a node's
// otherwise-synchronous transition function calls directly, summing the
// matching `*_COST` constants itself into the `DelayedComp<HState>` it
// returns, rather than running each crypto step through the scheduler one
// at a time (see offsim-head's transition module).

pub fn sign_value(sk: SKey, msg: &[u8]) -> Sig {
    let vk = sk.derive_vkey();
    Sig { signer: vk, digest: hash_message(vk, msg) }
}

pub fn verify_value(vk: VKey, msg: &[u8], sig: &Sig) -> bool {
    sig.signer == vk && sig.digest == hash_message(vk, msg)
}

pub fn aggregate_value(sigs: &[Sig]) -> ASig {
    let mut signers: Vec<VKey> = sigs.iter().map(|s| s.signer).collect();
    signers.sort();
    let digest = sigs.iter().fold(0u64, |acc, s| acc ^ s.digest);
    ASig { signers, digest }
}

pub fn verify_agg_value(avk: &AVKey, msg: &[u8], asig: &ASig) -> bool {
    let expected_digest = avk.0.iter().fold(0u64, |acc, vk| acc ^ hash_message(*vk, msg));
    let mut signers = asig.signers.clone();
    signers.sort();
    signers == avk.0 && asig.digest == expected_digest
}

fn sign(sk: SKey, msg: &[u8], cost: VirtualTime) -> DelayedComp<Sig> {
    DelayedComp::new(sign_value(sk, msg), cost)
}

fn verify(vk: VKey, msg: &[u8], sig: &Sig, cost: VirtualTime) -> DelayedComp<bool> {
    DelayedComp::new(verify_value(vk, msg, sig), cost)
}

fn aggregate(sigs: &[Sig], cost: VirtualTime) -> DelayedComp<ASig> {
    DelayedComp::new(aggregate_value(sigs), cost)
}

fn verify_agg(avk: &AVKey, msg: &[u8], asig: &ASig, cost: VirtualTime) -> DelayedComp<bool> {
    DelayedComp::new(verify_agg_value(avk, msg, asig), cost)
}
