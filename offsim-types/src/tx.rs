//! The transaction abstraction and its concrete mock instance.

use crate::ids::ClientId;
use offsim_core::clock::VirtualTime;
use offsim_core::delayed::DelayedComp;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Fixed-width, opaque transaction reference. A content hash of
/// `(client, slot, amount)` for [`MockTx`]; never a type other code can
/// reach inside.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxRef([u8; 32]);

impl TxRef {
    pub const SIZE_BYTES: u64 = 32;

    pub fn content_hash(client: ClientId, slot: u64, amount: i64) -> Self {
        let mut hasher = DefaultHasher::new();
        client.as_u32().hash(&mut hasher);
        slot.hash(&mut hasher);
        amount.hash(&mut hasher);
        let digest = hasher.finish();
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&digest.to_le_bytes());
        TxRef(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxRef({:016x})", u64::from_le_bytes(self.0[..8].try_into().unwrap()))
    }
}

/// Cost of validating a [`MockTx`], fixed by the model rather than
/// configurable at runtime.
pub const VALIDATE_MOCK_TX_COST: VirtualTime = VirtualTime::from_micros(400);

/// Polymorphic transaction interface. Every concrete transaction type the
/// head protocol can carry must provide these.
///
/// `validate_value`/`validation_cost` are split out from `validate` so a
/// synchronous state-transition function can inspect validity to decide
/// `Invalid`/`Wait`/`Apply` without needing scheduler access, while still
/// being required to fold `validation_cost` into whatever it charges the
/// caller — `validate` itself remains the `DelayedComp`-wrapped form for
/// callers that just want to run it and pay for it in one step.
pub trait Tx: fmt::Debug + Clone + Eq + Ord + Send + Sync + 'static {
    fn tx_ref(&self) -> TxRef;
    fn inputs(&self) -> Vec<TxRef>;
    fn outputs(&self) -> Vec<TxRef>;
    fn size(&self) -> u64;
    /// The payment amount this tx carries. Only the tail protocol's balance
    /// bookkeeping reads this; the head protocol only ever inspects `inputs`
    /// / `outputs` / `size`.
    fn amount(&self) -> i64;
    fn validate_value(&self) -> bool;
    fn validation_cost(&self) -> VirtualTime;

    fn validate(&self) -> DelayedComp<bool> {
        DelayedComp::new(self.validate_value(), self.validation_cost())
    }
}

/// The concrete transaction used throughout the simulation: a single
/// payment with no explicit inputs. Its own `tx_ref` doubles as the one
/// output it creates, so the UTxO set grows by exactly one entry per
/// confirmed `MockTx` and never shrinks (this model does not simulate
/// spending prior outputs, only throughput of new payments).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MockTx {
    tx_ref: TxRef,
    size: u64,
    amount: i64,
}

impl MockTx {
    pub fn new(client: ClientId, slot: u64, amount: i64, size: u64) -> Self {
        Self { tx_ref: TxRef::content_hash(client, slot, amount), size, amount }
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }
}

impl fmt::Debug for MockTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTx").field("tx_ref", &self.tx_ref).field("size", &self.size).field("amount", &self.amount).finish()
    }
}

impl Tx for MockTx {
    fn tx_ref(&self) -> TxRef {
        self.tx_ref
    }

    fn inputs(&self) -> Vec<TxRef> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<TxRef> {
        vec![self.tx_ref]
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn amount(&self) -> i64 {
        self.amount
    }

    fn validate_value(&self) -> bool {
        self.size > 0
    }

    fn validation_cost(&self) -> VirtualTime {
        VALIDATE_MOCK_TX_COST
    }
}
