//! Simulation configuration, loaded from a JSON file or built in code.
//!
//! These are plain, `serde`-deserializable structs in the spirit of the
//! teacher's own configuration types: no builder macro, just fields and a
//! `Default` impl where a default makes sense.

use crate::error::ConfigError;
use crate::region::Region;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientOptions {
    pub online_likelihood: f64,
    pub submit_likelihood: f64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { online_likelihood: 0.9, submit_likelihood: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrepareOptions {
    pub number_of_clients: u32,
    pub duration: u64,
    pub client_options: ClientOptions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServerOptions {
    pub region: Region,
    pub write_capacity: u64,
    pub read_capacity: u64,
    pub concurrency: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { region: Region::UsEast, write_capacity: 1_000_000, read_capacity: 1_000_000, concurrency: 4 }
    }
}

/// Mirrors `offsim_tail::client::PaymentWindow`; kept as its own plain,
/// serializable type here so this crate does not need to depend on
/// `offsim-tail` just to describe its configuration shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaymentWindowConfig {
    pub lower: i64,
    pub upper: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunOptions {
    /// `VirtualTime` only lives in `offsim-core`, which does not depend on
    /// `serde`; one slot's length in microseconds, the unit every other
    /// virtual-time constant in the workspace already uses.
    pub slot_length_micros: u64,
    pub settlement_delay: u64,
    pub payment_window: Option<PaymentWindowConfig>,
    pub server_options: ServerOptions,
}

pub fn load_prepare_options(path: impl AsRef<Path>) -> Result<PrepareOptions, ConfigError> {
    load_json(path)
}

pub fn load_run_options(path: impl AsRef<Path>) -> Result<RunOptions, ConfigError> {
    load_json(path)
}

fn load_json<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_options_defaults_are_in_range() {
        let opts = ClientOptions::default();
        assert!((0.0..=1.0).contains(&opts.online_likelihood));
        assert!((0.0..=1.0).contains(&opts.submit_likelihood));
    }

    #[test]
    fn run_options_round_trip_through_json() {
        let opts = RunOptions {
            slot_length_micros: 1_000,
            settlement_delay: 5,
            payment_window: Some(PaymentWindowConfig { lower: -100, upper: 100 }),
            server_options: ServerOptions::default(),
        };
        let text = serde_json::to_string(&opts).unwrap();
        let back: RunOptions = serde_json::from_str(&text).unwrap();
        assert_eq!(back.settlement_delay, opts.settlement_delay);
        assert_eq!(back.payment_window.unwrap().lower, -100);
    }
}
