//! Protocol-agnostic data types shared by the head and tail simulations:
//! node/client addressing, opaque signatures, and the `Tx` abstraction.

pub mod ids;
pub mod sig;
pub mod tx;
pub mod wire;

pub use ids::{ClientId, NodeId};
pub use sig::{ASig, AVKey, SKey, Sig, VKey};
pub use tx::{MockTx, Tx, TxRef};
