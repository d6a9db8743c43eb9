//! `DelayedComp<T>`: a pure value paired with the virtual-time cost of
//! having computed it.
//!
//! Every modelled CPU operation in the workspace — signing, aggregation,
//! verification, transaction validation, the server's per-handler
//! `lookupClient` charge — is expressed as a `DelayedComp` so that running
//! it is the *only* way virtual time tracks modelled work. `run` is the sole
//! way to consume one; there is no way to read `value` without also paying
//! `cost` on the caller's task.

use crate::clock::VirtualTime;
use crate::scheduler::Scheduler;

/// A value that is not actually available until `cost` of virtual time has
/// elapsed on the consuming task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayedComp<T> {
    value: T,
    cost: VirtualTime,
}

impl<T> DelayedComp<T> {
    pub fn new(value: T, cost: VirtualTime) -> Self {
        Self { value, cost }
    }

    pub fn cost(&self) -> VirtualTime {
        self.cost
    }

    /// Charges `cost` against the calling task's progress through the
    /// scheduler, then yields `value`. This is an `async fn` rather than a
    /// plain method because charging a cost must be able to suspend the
    /// task at a delay point (see `Scheduler::delay`).
    pub async fn run(self, scheduler: &Scheduler) -> T {
        scheduler.delay(self.cost).await;
        self.value
    }

    /// Maps the carried value without altering the cost already attached to it.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DelayedComp<U> {
        DelayedComp { value: f(self.value), cost: self.cost }
    }
}
