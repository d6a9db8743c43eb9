//! Bandwidth- and latency-modelled point-to-point channels.
//!
//! A [`Multiplexer`] is one node's inbound endpoint: a bounded queue and a
//! fixed read capacity (bytes/virtual-second). To let that node's peers
//! send to it, each peer holds a [`MultiplexerLink`] bound to this
//! endpoint's handle, carrying its own write capacity, its own bounded
//! count of in-flight sends, and the one-way latency of that particular
//! pairing. Splitting send and receive this way is what lets an
//! N-way full mesh (every head node can send to every other head node) and
//! a star topology (every tail client links to one server, and the server
//! links back to each client) share the same primitive: a node owns one
//! `Multiplexer` and as many `MultiplexerLink`s as it has peers to talk to.
//!
//! A send goes through three stages — charge the sender's write capacity,
//! cross the link after `latency`, charge the receiver's read capacity —
//! before the message becomes visible to `recv()`. Queues are bounded on
//! both the outbound (in-flight sends on a link) and inbound (delivered-
//! but-unread, on the `Multiplexer`) side; a full queue blocks rather than
//! drops, so no message is ever lost, only delayed.
//!
//! `E` is the trace event type the owning protocol crate defines for
//! itself; this module only needs to know how to turn its own
//! [`MpTraceEvent`]s into one, via `From`.

use crate::clock::VirtualTime;
use crate::scheduler::Scheduler;
use crate::trace::TraceRecorder;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Events a channel records against the shared trace, independent of which
/// protocol is using it.
#[derive(Debug, Clone)]
pub enum MpTraceEvent<M> {
    /// The sender has started paying its write-capacity charge for a
    /// message of `size` bytes.
    SendLeading { size: u64 },
    /// The message has crossed the link's latency and the receiver has
    /// started paying its read-capacity charge.
    RecvLeading { size: u64 },
    /// The message is now sitting in the receiver's inbound queue, visible
    /// to `recv()`.
    RecvTrailing { msg: M },
}

struct Inbound<M> {
    queue: VecDeque<M>,
    capacity: usize,
    recv_wakers: Vec<Waker>,
    push_wakers: Vec<Waker>,
}

/// A handle to a node's receiving side, cheap to clone and hand out to
/// every peer that should be able to reach it via a [`MultiplexerLink`].
#[derive(Clone)]
pub struct EndpointHandle<M> {
    inbound: Arc<Mutex<Inbound<M>>>,
    read_capacity: u64,
}

/// One node's inbound message queue.
pub struct Multiplexer<M, E> {
    endpoint: EndpointHandle<M>,
    scheduler: Scheduler,
    trace: TraceRecorder<E>,
    label: String,
}

impl<M, E> Clone for Multiplexer<M, E> {
    fn clone(&self) -> Self {
        Self { endpoint: self.endpoint.clone(), scheduler: self.scheduler.clone(), trace: self.trace.clone(), label: self.label.clone() }
    }
}

impl<M, E> Multiplexer<M, E>
where
    M: Clone + Send + 'static,
    E: Send + 'static,
{
    pub fn new(label: impl Into<String>, scheduler: Scheduler, trace: TraceRecorder<E>, read_capacity: u64, inbound_capacity: usize) -> Self {
        Self {
            endpoint: EndpointHandle {
                inbound: Arc::new(Mutex::new(Inbound {
                    queue: VecDeque::new(),
                    capacity: inbound_capacity,
                    recv_wakers: Vec::new(),
                    push_wakers: Vec::new(),
                })),
                read_capacity,
            },
            scheduler,
            trace,
            label: label.into(),
        }
    }

    /// A clonable handle peers use to build a [`MultiplexerLink`] that
    /// sends into this multiplexer's queue.
    pub fn handle(&self) -> EndpointHandle<M> {
        self.endpoint.clone()
    }

    /// Waits for the next message to become visible in this inbox.
    pub fn recv(&self) -> Recv<M> {
        Recv { inbound: self.endpoint.inbound.clone() }
    }

    /// Pushes `msg` back onto the *front* of this inbox without charging
    /// any bandwidth. Used by a protocol that pulled a message off its
    /// inbox, decided it cannot be handled yet, and wants it retried
    /// without losing its place or re-paying for delivery.
    pub fn reenqueue(&self, msg: M) {
        let mut inbound = self.endpoint.inbound.lock();
        inbound.queue.push_front(msg);
        let wakers = std::mem::take(&mut inbound.recv_wakers);
        drop(inbound);
        for w in wakers {
            w.wake();
        }
    }

    /// Pushes `msg` onto the *back* of this inbox without charging any
    /// bandwidth. Used for a precondition-not-yet-met retry that must not
    /// cut ahead of already-queued events — unlike `reenqueue`, which
    /// preserves a just-pulled message's place at the front, this lets the
    /// node make progress on everything queued behind it first.
    pub fn reenqueue_tail(&self, msg: M) {
        let mut inbound = self.endpoint.inbound.lock();
        inbound.queue.push_back(msg);
        let wakers = std::mem::take(&mut inbound.recv_wakers);
        drop(inbound);
        for w in wakers {
            w.wake();
        }
    }
}

struct OutboundSlots {
    in_flight: usize,
    capacity: usize,
    wakers: Vec<Waker>,
}

/// A directed send path from one node to a specific peer's [`Multiplexer`].
pub struct MultiplexerLink<M, E> {
    target: EndpointHandle<M>,
    outbound: Arc<Mutex<OutboundSlots>>,
    scheduler: Scheduler,
    trace: TraceRecorder<E>,
    label: String,
    write_capacity: u64,
    latency: VirtualTime,
}

impl<M, E> Clone for MultiplexerLink<M, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            outbound: self.outbound.clone(),
            scheduler: self.scheduler.clone(),
            trace: self.trace.clone(),
            label: self.label.clone(),
            write_capacity: self.write_capacity,
            latency: self.latency,
        }
    }
}

impl<M, E> MultiplexerLink<M, E>
where
    M: Clone + Send + 'static,
    E: From<MpTraceEvent<M>> + Send + 'static,
{
    pub fn new(
        label: impl Into<String>,
        scheduler: Scheduler,
        trace: TraceRecorder<E>,
        target: EndpointHandle<M>,
        write_capacity: u64,
        outbound_capacity: usize,
        latency: VirtualTime,
    ) -> Self {
        Self {
            target,
            outbound: Arc::new(Mutex::new(OutboundSlots { in_flight: 0, capacity: outbound_capacity, wakers: Vec::new() })),
            scheduler,
            trace,
            label: label.into(),
            write_capacity,
            latency,
        }
    }

    /// Sends `msg`, whose wire size is `size_bytes`. Resolves once the
    /// sender has finished paying its write-capacity charge and released
    /// its outbound slot; delivery to the peer continues in the
    /// background and is reflected only in the trace and in the peer's
    /// `recv`.
    pub async fn send(&self, msg: M, size_bytes: u64) {
        AcquireOutbound { slots: self.outbound.clone() }.await;

        self.trace.record(self.label.clone(), self.scheduler.now(), MpTraceEvent::SendLeading { size: size_bytes }.into());
        let write_delay = charge(size_bytes, self.write_capacity);
        self.scheduler.delay(write_delay).await;

        release_outbound(&self.outbound);

        let target = self.target.clone();
        let scheduler = self.scheduler.clone();
        let trace = self.trace.clone();
        let label = self.label.clone();
        let latency = self.latency;

        scheduler.clone().spawn(async move {
            scheduler.delay(latency).await;
            trace.record(label.clone(), scheduler.now(), MpTraceEvent::RecvLeading { size: size_bytes }.into());
            let read_delay = charge(size_bytes, target.read_capacity);
            scheduler.delay(read_delay).await;

            AcquireInbound { inbound: target.inbound.clone() }.await;
            {
                let mut inbound = target.inbound.lock();
                inbound.queue.push_back(msg.clone());
                let wakers = std::mem::take(&mut inbound.recv_wakers);
                drop(inbound);
                for w in wakers {
                    w.wake();
                }
            }
            trace.record(label, scheduler.now(), MpTraceEvent::RecvTrailing { msg }.into());
        });
    }
}

fn charge(size_bytes: u64, capacity_bytes_per_sec: u64) -> VirtualTime {
    debug_assert!(capacity_bytes_per_sec > 0, "channel capacity must be positive");
    VirtualTime::from_micros(size_bytes.saturating_mul(1_000_000) / capacity_bytes_per_sec)
}

fn release_outbound(slots: &Arc<Mutex<OutboundSlots>>) {
    let mut s = slots.lock();
    s.in_flight -= 1;
    let wakers = std::mem::take(&mut s.wakers);
    drop(s);
    for w in wakers {
        w.wake();
    }
}

struct AcquireOutbound {
    slots: Arc<Mutex<OutboundSlots>>,
}

impl Future for AcquireOutbound {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut s = self.slots.lock();
        if s.in_flight < s.capacity {
            s.in_flight += 1;
            Poll::Ready(())
        } else {
            s.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

struct AcquireInbound<M> {
    inbound: Arc<Mutex<Inbound<M>>>,
}

impl<M> Future for AcquireInbound<M> {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inbound = self.inbound.lock();
        if inbound.queue.len() < inbound.capacity {
            Poll::Ready(())
        } else {
            inbound.push_wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Future returned by [`Multiplexer::recv`].
pub struct Recv<M> {
    inbound: Arc<Mutex<Inbound<M>>>,
}

impl<M> Future for Recv<M> {
    type Output = M;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<M> {
        let mut inbound = self.inbound.lock();
        match inbound.queue.pop_front() {
            Some(msg) => {
                let wakers = std::mem::take(&mut inbound.push_wakers);
                drop(inbound);
                for w in wakers {
                    w.wake();
                }
                Poll::Ready(msg)
            }
            None => {
                inbound.recv_wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Event {
        Mp(MpTraceEvent<u64>),
    }
    impl From<MpTraceEvent<u64>> for Event {
        fn from(e: MpTraceEvent<u64>) -> Self {
            Event::Mp(e)
        }
    }

    #[test]
    fn message_arrives_after_write_latency_and_read_delay() {
        let scheduler = Scheduler::new();
        let trace: TraceRecorder<Event> = TraceRecorder::new();

        let b: Multiplexer<u64, Event> = Multiplexer::new("b", scheduler.clone(), trace.clone(), 1_000_000, 8);
        let a_to_b: MultiplexerLink<u64, Event> =
            MultiplexerLink::new("a->b", scheduler.clone(), trace.clone(), b.handle(), 1_000_000, 8, VirtualTime::from_micros(1_000));

        scheduler.spawn(async move {
            a_to_b.send(7u64, 1_000).await;
        });

        let received = scheduler.block_on(async move { b.recv().await });
        assert_eq!(received, 7);
        // 1000 bytes @ 1_000_000 B/s write + 1000us latency + same read charge.
        assert_eq!(scheduler.now(), VirtualTime::from_micros(1_000 + 1_000 + 1_000));
    }

    #[test]
    fn reenqueue_does_not_charge_bandwidth_and_preserves_fifo_front() {
        let scheduler = Scheduler::new();
        let trace: TraceRecorder<Event> = TraceRecorder::new();
        let mp: Multiplexer<u64, Event> = Multiplexer::new("solo", scheduler.clone(), trace, 1, 8);
        mp.endpoint.inbound.lock().queue.push_back(1);
        mp.reenqueue(99);
        let first = scheduler.block_on({
            let mp = mp.clone();
            async move { mp.recv().await }
        });
        assert_eq!(first, 99);
        assert_eq!(scheduler.now(), VirtualTime::ZERO);
    }

    #[test]
    fn reenqueue_tail_lets_already_queued_messages_go_first() {
        let scheduler = Scheduler::new();
        let trace: TraceRecorder<Event> = TraceRecorder::new();
        let mp: Multiplexer<u64, Event> = Multiplexer::new("solo", scheduler.clone(), trace, 1, 8);
        mp.endpoint.inbound.lock().queue.push_back(1);
        mp.reenqueue_tail(99);
        let order = scheduler.block_on({
            let mp = mp.clone();
            async move { (mp.recv().await, mp.recv().await) }
        });
        assert_eq!(order, (1, 99));
    }

    #[test]
    fn a_full_outbound_buffer_blocks_further_sends_until_a_slot_frees() {
        let scheduler = Scheduler::new();
        let trace: TraceRecorder<Event> = TraceRecorder::new();
        let b: Multiplexer<u64, Event> = Multiplexer::new("b", scheduler.clone(), trace.clone(), 1_000_000_000, 8);
        // outbound_capacity = 1: a second concurrent send must wait for the first's slot to free.
        let link: MultiplexerLink<u64, Event> =
            MultiplexerLink::new("a->b", scheduler.clone(), trace, b.handle(), 1_000_000_000, 1, VirtualTime::ZERO);

        let link2 = link.clone();
        scheduler.spawn(async move {
            link.send(1u64, 10_000_000).await;
        });
        scheduler.spawn(async move {
            link2.send(2u64, 10).await;
        });

        let received = scheduler.block_on(async move {
            let mut received = Vec::new();
            received.push(b.recv().await);
            received.push(b.recv().await);
            received
        });
        assert_eq!(received.len(), 2);
    }
}
