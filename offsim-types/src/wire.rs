//! Wire sizes and server costs the model fixes explicitly rather than
//! leaving to implementation choice, shared by the head and tail
//! protocols.

use offsim_core::clock::VirtualTime;

/// Fixed header charged on top of every `MockTx`'s own `size()`.
pub const MOCK_TX_HEADER_BYTES: u64 = 2;
/// Wire cost of one recipient address in a tail `NewTx` message.
pub const RECIPIENT_ADDRESS_BYTES: u64 = 57;
/// Connection/snapshot control messages carry no payload.
pub const CONTROL_MESSAGE_BYTES: u64 = 0;
/// Cost every tail server handler pays for a registry lookup.
pub const LOOKUP_CLIENT_COST: VirtualTime = VirtualTime::from_micros(500);
