//! Geographic region latency table: a pure, deterministic function from a
//! pair of regions to a one-way link latency. No RNG, no wall-clock; the
//! same pair always returns the same value.

use offsim_core::clock::VirtualTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    UsEast,
    UsWest,
    Europe,
    Asia,
}

const REGIONS: [Region; 4] = [Region::UsEast, Region::UsWest, Region::Europe, Region::Asia];

fn index(region: Region) -> usize {
    REGIONS.iter().position(|r| *r == region).expect("Region is exhaustively listed in REGIONS")
}

/// One-way latency in microseconds between two regions, roughly modelled on
/// real inter-region RTT/2 figures. Symmetric: `latency(a, b) == latency(b, a)`.
const LATENCY_TABLE_MICROS: [[u64; 4]; 4] = [
    // UsEast    UsWest    Europe    Asia
    [1_000, 30_000, 40_000, 90_000],
    [30_000, 1_000, 70_000, 60_000],
    [40_000, 70_000, 1_000, 120_000],
    [90_000, 60_000, 120_000, 1_000],
];

/// The one-way latency charged on a link between `a` and `b`.
pub fn latency(a: Region, b: Region) -> VirtualTime {
    VirtualTime::from_micros(LATENCY_TABLE_MICROS[index(a)][index(b)])
}
