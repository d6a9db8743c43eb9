//! Orchestrates one of the three run modes: generating a client event tape,
//! running the tail protocol against a tape, or running the head protocol
//! across a committee. `run` is the single entry point `main` calls;
//! everything below it builds the simulation, drives it to quiescence, and
//! folds the trace for reporting.

use crate::args::Args;
use crate::error::SimResult;
use offsim_analysis::{fold_head_latencies, fold_tail_metrics, SnapLatency, TailMetrics, TxLatency};
use offsim_core::channel::MultiplexerLink;
use offsim_core::clock::VirtualTime;
use offsim_core::scheduler::Scheduler;
use offsim_core::trace::TraceRecorder;
use offsim_head::{HeadNode, HeadProtocol, HeadTraceEvent};
use offsim_io::csv::CsvEvent;
use offsim_io::{PaymentWindowConfig, RunOptions};
use offsim_tail::client::{default_recipients, generate_tape, ClientConfig, ClientEvent, PaymentWindow};
use offsim_tail::{TailClient, TailServer, TailTraceEvent};
use offsim_types::sig::SKey;
use offsim_types::{ClientId, MockTx, NodeId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// What `run` reports back to `main`, one variant per subcommand.
pub enum SimulationReport {
    Prepared { path: String, event_count: usize },
    Tail(TailMetrics),
    Head { tx_latencies: Vec<TxLatency>, snap_latencies: Vec<SnapLatency> },
}

pub fn run(args: Args) -> SimResult<SimulationReport> {
    let _stopwatch = offsim_core::time::Stopwatch::<0>::with_threshold("run");
    match args {
        Args::Prepare { config, out, .. } => run_prepare(&config, &out),
        Args::RunTail { config, events, .. } => run_tail(&config, &events),
        Args::RunHead { committee_size, num_txs, .. } => Ok(run_head(committee_size, num_txs)),
    }
}

fn run_prepare(config_path: &str, out_path: &str) -> SimResult<SimulationReport> {
    let options = offsim_io::config::load_prepare_options(config_path)?;
    let client_config = ClientConfig { online_likelihood: options.client_options.online_likelihood, submit_likelihood: options.client_options.submit_likelihood };

    let mut rng = StdRng::seed_from_u64(42);
    let mut csv_events = Vec::new();
    for i in 1..=options.number_of_clients {
        let client = ClientId::new(i);
        let tape = generate_tape(client, options.duration, options.number_of_clients, client_config, default_recipients, &mut rng);
        for event in tape {
            csv_events.push(client_event_to_csv(client, event));
        }
    }
    csv_events.sort_by_key(|e| match e {
        CsvEvent::Pull { slot, .. } => *slot,
        CsvEvent::NewTx { slot, .. } => *slot,
    });

    offsim_io::csv::write_events(out_path, &csv_events)?;
    log::info!("wrote {} events for {} clients to {out_path}", csv_events.len(), options.number_of_clients);
    Ok(SimulationReport::Prepared { path: out_path.to_string(), event_count: csv_events.len() })
}

fn client_event_to_csv(client: ClientId, event: ClientEvent) -> CsvEvent {
    match event {
        ClientEvent::Pull { slot } => CsvEvent::Pull { slot, client_id: client },
        ClientEvent::NewTx { slot, amount, size, recipients } => CsvEvent::NewTx { slot, client_id: client, size, amount, recipients },
    }
}

fn csv_to_client_event(event: &CsvEvent) -> ClientEvent {
    match event {
        CsvEvent::Pull { slot, .. } => ClientEvent::Pull { slot: *slot },
        CsvEvent::NewTx { slot, size, amount, recipients, .. } => ClientEvent::NewTx { slot: *slot, amount: *amount, size: *size, recipients: recipients.clone() },
    }
}

fn csv_client_id(event: &CsvEvent) -> ClientId {
    match event {
        CsvEvent::Pull { client_id, .. } => *client_id,
        CsvEvent::NewTx { client_id, .. } => *client_id,
    }
}

const DEFAULT_READ_CAPACITY: u64 = 1_000_000;
const DEFAULT_INBOUND_CAPACITY: usize = 1_024;
const CLIENT_LINK_LATENCY: VirtualTime = VirtualTime::from_micros(50);

fn run_tail(config_path: &str, events_path: &str) -> SimResult<SimulationReport> {
    let options: RunOptions = offsim_io::config::load_run_options(config_path)?;
    let events = offsim_io::csv::read_events(events_path)?;

    let mut tapes: BTreeMap<ClientId, Vec<ClientEvent>> = BTreeMap::new();
    for event in &events {
        tapes.entry(csv_client_id(event)).or_default().push(csv_to_client_event(event));
    }

    let scheduler = Scheduler::new();
    let trace: TraceRecorder<TailTraceEvent<MockTx>> = TraceRecorder::new();

    let mut server = TailServer::<MockTx>::new(scheduler.clone(), trace.clone(), options.server_options.read_capacity, DEFAULT_INBOUND_CAPACITY);

    let payment_window = options.payment_window.map(|PaymentWindowConfig { lower, upper }| PaymentWindow { lower, upper });
    let slot_length = VirtualTime::from_micros(options.slot_length_micros);

    let mut clients = Vec::new();
    for (client_id, tape) in tapes {
        let to_server = MultiplexerLink::new(
            format!("client[{client_id}]->server"),
            scheduler.clone(),
            trace.clone(),
            server.inbox_handle(),
            options.server_options.write_capacity,
            DEFAULT_INBOUND_CAPACITY,
            CLIENT_LINK_LATENCY,
        );

        let client = Arc::new(TailClient::new(
            client_id,
            to_server,
            0,
            payment_window,
            options.settlement_delay,
            slot_length,
            MockTx::new,
            scheduler.clone(),
            trace.clone(),
            tape,
            DEFAULT_READ_CAPACITY,
            DEFAULT_INBOUND_CAPACITY,
        ));

        // The client's own inbox is constructed inside `TailClient::new`;
        // the server's return link must target that inbox's handle, not a
        // separately-constructed one, or `AckTx`/`NotifyTx` would vanish
        // into a multiplexer nothing ever reads from.
        let to_client = MultiplexerLink::new(
            format!("server->client[{client_id}]"),
            scheduler.clone(),
            trace.clone(),
            client.inbox_handle(),
            options.server_options.read_capacity,
            DEFAULT_INBOUND_CAPACITY,
            CLIENT_LINK_LATENCY,
        );
        server.connect(client_id, to_client);

        clients.push(client);
    }

    let server = Arc::new(server);
    server.spawn_workers(options.server_options.concurrency);
    for client in &clients {
        client.clone().spawn();
    }

    scheduler.run_until_quiescent();

    let metrics = fold_tail_metrics(&trace.events());
    log::info!(
        "confirmed {} txs, max throughput {:.2}/s, actual throughput {:.2}/s, read {:.1} kbit/s, write {:.1} kbit/s",
        metrics.confirmed_txs,
        metrics.max_throughput(slot_length),
        metrics.actual_throughput(),
        metrics.read_usage_kbit_per_sec(VirtualTime::from_micros(metrics.last_tx_time.as_micros().max(1))),
        metrics.write_usage_kbit_per_sec(VirtualTime::from_micros(metrics.last_tx_time.as_micros().max(1))),
    );
    Ok(SimulationReport::Tail(metrics))
}

fn run_head(committee_size: u32, num_txs: u32) -> SimulationReport {
    let scheduler = Scheduler::new();
    let trace: TraceRecorder<HeadTraceEvent<MockTx>> = TraceRecorder::new();

    let sks: Vec<SKey> = (0..committee_size as u64).map(SKey::new).collect();
    let vks = sks.iter().map(|sk| sk.derive_vkey()).collect::<Vec<_>>();

    let mut nodes: Vec<HeadNode<MockTx>> = (0..committee_size)
        .map(|i| {
            let state = offsim_head::HState::genesis(NodeId::new(i), sks[i as usize], vks.clone(), BTreeSet::new());
            HeadNode::new(state, scheduler.clone(), trace.clone(), DEFAULT_READ_CAPACITY, DEFAULT_INBOUND_CAPACITY)
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
                DEFAULT_READ_CAPACITY,
                DEFAULT_INBOUND_CAPACITY,
                VirtualTime::from_micros(500),
            );
            node.connect(*peer_id, link);
        }
    }
    let nodes: Vec<Arc<HeadNode<MockTx>>> = nodes.into_iter().map(Arc::new).collect();

    for node in &nodes {
        scheduler.spawn({
            let node = node.clone();
            async move { node.run().await }
        });
    }

    for i in 0..num_txs {
        let tx = MockTx::new(ClientId::new(i), 0, 1_000, 256);
        nodes[0].submit(HeadProtocol::New(tx));
    }

    scheduler.run_until_quiescent();

    let mut tx_latencies = Vec::new();
    let mut snap_latencies = Vec::new();
    let events = trace.events();
    for node in &nodes {
        let (txs, snaps) = fold_head_latencies(&format!("head[{}]", node.id()), &events);
        tx_latencies.extend(txs);
        snap_latencies.extend(snaps);
    }

    log::info!("committee of {committee_size} confirmed {} tx-latency samples, {} snapshot-latency samples", tx_latencies.len(), snap_latencies.len());
    SimulationReport::Head { tx_latencies, snap_latencies }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("offsim-cli-test-{}-{name}", std::process::id()))
    }

    fn write_json(path: &std::path::Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn run_prepare_writes_one_csv_row_per_client_event() {
        let config_path = scratch_path("prepare.json");
        let out_path = scratch_path("tape.csv");
        write_json(
            &config_path,
            r#"{"number_of_clients": 3, "duration": 50, "client_options": {"online_likelihood": 0.9, "submit_likelihood": 0.5}}"#,
        );

        let report = run_prepare(config_path.to_str().unwrap(), out_path.to_str().unwrap()).unwrap();
        let SimulationReport::Prepared { event_count, .. } = report else { panic!("expected Prepared") };
        assert!(event_count > 0);

        let events = offsim_io::csv::read_events(out_path.to_str().unwrap()).unwrap();
        assert_eq!(events.len(), event_count);

        let _ = std::fs::remove_file(&config_path);
        let _ = std::fs::remove_file(&out_path);
    }

    #[test]
    fn run_tail_confirms_txs_from_a_prepared_tape() {
        let prepare_config_path = scratch_path("run_tail_prepare.json");
        let tape_path = scratch_path("run_tail_tape.csv");
        let run_config_path = scratch_path("run_tail_run.json");

        write_json(
            &prepare_config_path,
            r#"{"number_of_clients": 2, "duration": 30, "client_options": {"online_likelihood": 1.0, "submit_likelihood": 1.0}}"#,
        );
        run_prepare(prepare_config_path.to_str().unwrap(), tape_path.to_str().unwrap()).unwrap();

        write_json(
            &run_config_path,
            r#"{
                "slot_length_micros": 1000,
                "settlement_delay": 2,
                "payment_window": null,
                "server_options": {"region": "UsEast", "write_capacity": 1000000, "read_capacity": 1000000, "concurrency": 2}
            }"#,
        );

        let report = run_tail(run_config_path.to_str().unwrap(), tape_path.to_str().unwrap()).unwrap();
        let SimulationReport::Tail(metrics) = report else { panic!("expected Tail") };
        // With both clients always online and always submitting, at least one tx should clear the mailbox.
        assert!(metrics.confirmed_txs > 0 || metrics.last_slot_seen > 0);

        let _ = std::fs::remove_file(&prepare_config_path);
        let _ = std::fs::remove_file(&tape_path);
        let _ = std::fs::remove_file(&run_config_path);
    }

    #[test]
    fn run_head_confirms_every_submitted_tx_across_the_committee() {
        let report = run_head(3, 5);
        let SimulationReport::Head { tx_latencies, .. } = report else { panic!("expected Head") };
        // 3 nodes each confirm all 5 txs once the committee quiesces.
        assert_eq!(tx_latencies.len(), 15);
    }
}
