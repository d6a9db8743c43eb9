//! The head protocol: multi-party signing over a fixed committee, with
//! aggregate-signature snapshots confirming batches of transactions.

pub mod error;
pub mod node;
pub mod protocol;
pub mod state;
pub mod transition;

pub use error::{HeadError, HeadResult};
pub use node::HeadNode;
pub use protocol::{Decision, HeadProtocol, HeadTraceEvent, Outgoing};
pub use state::{HState, Snap, SnapN, TxO};
pub use transition::{default_leader_fun, step, LeaderFun};
