//! The per-node driver: pulls events off a node's inbox, applies `step`,
//! charges the committed cost against the scheduler, and dispatches
//! whatever the transition decided to send.

use crate::error::{HeadError, HeadResult};
use crate::protocol::{Decision, HeadProtocol, HeadTraceEvent, Outgoing};
use crate::state::HState;
use crate::transition::{self, LeaderFun};
use offsim_core::channel::{EndpointHandle, Multiplexer, MultiplexerLink};
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::TraceRecorder;
use offsim_types::{NodeId, Tx};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

type Link<T> = MultiplexerLink<HeadProtocol<T>, HeadTraceEvent<T>>;
type Inbox<T> = Multiplexer<HeadProtocol<T>, HeadTraceEvent<T>>;

/// One committee member: its local state, its inbox, and a send path to
/// every other member. `run` owns `state` exclusively once spawned, so the
/// mutex is never actually contended — it exists so `state()` can be read
/// from outside (the simulation driver, invariant checks) without needing
/// the node's own task to cooperate.
pub struct HeadNode<T: Tx> {
    id: NodeId,
    state: Arc<Mutex<HState<T>>>,
    inbox: Inbox<T>,
    links: BTreeMap<NodeId, Link<T>>,
    scheduler: Scheduler,
    trace: TraceRecorder<HeadTraceEvent<T>>,
    leader_fun: LeaderFun,
}

impl<T: Tx> HeadNode<T> {
    pub fn new(state: HState<T>, scheduler: Scheduler, trace: TraceRecorder<HeadTraceEvent<T>>, read_capacity: u64, inbound_capacity: usize) -> Self {
        let id = state.party_index;
        let inbox = Multiplexer::new(format!("head[{id}]"), scheduler.clone(), trace.clone(), read_capacity, inbound_capacity);
        Self { id, state: Arc::new(Mutex::new(state)), inbox, links: BTreeMap::new(), scheduler, trace, leader_fun: transition::default_leader_fun }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// A handle other nodes' [`MultiplexerLink`]s send into.
    pub fn inbox_handle(&self) -> EndpointHandle<HeadProtocol<T>> {
        self.inbox.handle()
    }

    pub fn connect(&mut self, peer: NodeId, link: Link<T>) {
        self.links.insert(peer, link);
    }

    pub fn use_leader_fun(&mut self, f: LeaderFun) {
        self.leader_fun = f;
    }

    pub fn state(&self) -> HState<T> {
        self.state.lock().clone()
    }

    /// Places a locally-originated event (a client's `New(tx)`, or the
    /// driver triggering `NewSn` at the leader) at the front of this
    /// node's own inbox so it is processed exactly like a wire-delivered
    /// message.
    pub fn submit(&self, event: HeadProtocol<T>) {
        self.inbox.reenqueue(event);
    }

    fn link(&self, peer: NodeId) -> HeadResult<&Link<T>> {
        self.links.get(&peer).ok_or(HeadError::UnknownPeer(peer.as_u32()))
    }

    async fn dispatch(&self, outgoing: Outgoing<T>) -> HeadResult<()> {
        match outgoing {
            Outgoing::SendNothing => Ok(()),
            Outgoing::SendTo(peer, msg) => {
                // A node can address itself (e.g. the leader acking its own
                // snapshot request): short-circuit the wire model exactly
                // as multicast's self-delivery does.
                if peer == self.id {
                    self.inbox.reenqueue_tail(msg);
                    return Ok(());
                }
                let size = msg.wire_size();
                self.link(peer)?.send(msg, size).await;
                Ok(())
            }
            Outgoing::Multicast(msg) => {
                // Self-delivery bypasses the wire model entirely (it is not
                // a network hop, just the issuer observing its own output)
                // but still lands at the back of the inbox like any other
                // arrival would.
                self.inbox.reenqueue_tail(msg.clone());
                for link in self.links.values() {
                    link.send(msg.clone(), msg.wire_size()).await;
                }
                Ok(())
            }
        }
    }

    /// Runs forever, applying one event at a time. Spawned onto the
    /// scheduler by the simulation driver; stops making progress (without
    /// returning) once the scheduler has nothing left to run.
    pub async fn run(self: Arc<Self>) {
        loop {
            let event = self.inbox.recv().await;
            let retry = event.clone();
            let decision = {
                let state = self.state.lock();
                transition::step(&state, event, self.leader_fun)
            };
            match decision {
                Decision::Invalid(cost, reason) => {
                    self.scheduler.delay(cost).await;
                    self.trace.record(format!("head[{}]", self.id), self.scheduler.now(), HeadTraceEvent::Invalid { reason });
                }
                Decision::Wait(cost) => {
                    self.scheduler.delay(cost).await;
                    self.inbox.reenqueue_tail(retry);
                }
                Decision::Apply { new_state, trace, outgoing } => {
                    let committed = new_state.run(&self.scheduler).await;
                    *self.state.lock() = committed;
                    self.trace.record(format!("head[{}]", self.id), self.scheduler.now(), trace);
                    // Dispatch errors (a misconfigured topology) are not
                    // something the protocol can recover from at runtime.
                    self.dispatch(outgoing).await.expect("head node has a link to every outgoing peer");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HState;
    use offsim_core::clock::VirtualTime;
    use offsim_types::sig::SKey;
    use offsim_types::{ClientId, MockTx};
    use std::collections::BTreeSet;

    fn committee(scheduler: &Scheduler, trace: &TraceRecorder<HeadTraceEvent<MockTx>>, size: u32) -> Vec<Arc<HeadNode<MockTx>>> {
        let sks: Vec<SKey> = (0..size as u64).map(SKey::new).collect();
        let vks = sks.iter().map(|sk| sk.derive_vkey()).collect::<Vec<_>>();

        let mut nodes: Vec<HeadNode<MockTx>> = (0..size)
            .map(|i| {
                let state = HState::genesis(NodeId::new(i), sks[i as usize], vks.clone(), BTreeSet::new());
                HeadNode::new(state, scheduler.clone(), trace.clone(), 10_000_000, 64)
            })
            .collect();

        let handles: Vec<_> = nodes.iter().map(|n| n.inbox_handle()).collect();
        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id()).collect();

        for node in &mut nodes {
            for (peer_id, handle) in ids.iter().zip(handles.iter()) {
                if *peer_id == node.id() {
                    continue;
                }
                let link = MultiplexerLink::new(
                    format!("head[{}]->head[{}]", node.id(), peer_id),
                    scheduler.clone(),
                    trace.clone(),
                    handle.clone(),
                    10_000_000,
                    64,
                    VirtualTime::from_micros(500),
                );
                node.connect(*peer_id, link);
            }
        }

        nodes.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn a_submitted_tx_confirms_across_a_three_node_committee() {
        let scheduler = Scheduler::new();
        let trace: TraceRecorder<HeadTraceEvent<MockTx>> = TraceRecorder::new();
        let nodes = committee(&scheduler, &trace, 3);

        for node in &nodes {
            scheduler.spawn({
                let node = node.clone();
                async move { node.run().await }
            });
        }

        nodes[0].submit(HeadProtocol::New(MockTx::new(ClientId::new(1), 0, 100, 64)));
        scheduler.run_until_quiescent();

        for node in &nodes {
            assert_eq!(node.state().txs_conf.len(), 1, "node {} did not confirm the tx", node.id());
        }
    }
}
