//! The tail protocol: a mailbox broker server fanning out payments to many
//! clients, and a payment-window client that stalls for settlement when its
//! balance leaves a configured band.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{default_recipients, generate_tape, step_client, ClientConfig, ClientEvent, PaymentWindow, TailClient};
pub use error::{TailError, TailResult};
pub use protocol::{Conn, TailProtocol, TailTraceEvent};
pub use server::TailServer;
