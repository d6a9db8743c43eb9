mod args;
mod driver;
mod error;

use args::Args;
use driver::SimulationReport;
use std::process::exit;

pub fn main() {
    let args = Args::parse();
    offsim_core::log::init_logger(None, args.log_level());

    match driver::run(args) {
        Ok(SimulationReport::Prepared { path, event_count }) => {
            println!("prepared {event_count} events at {path}");
        }
        Ok(SimulationReport::Tail(metrics)) => {
            println!("confirmed_txs={}", metrics.confirmed_txs);
            println!("read_usage_bytes={}", metrics.read_usage_bytes);
            println!("write_usage_bytes={}", metrics.write_usage_bytes);
        }
        Ok(SimulationReport::Head { tx_latencies, snap_latencies }) => {
            println!("tx_latency_samples={}", tx_latencies.len());
            println!("snap_latency_samples={}", snap_latencies.len());
        }
        Err(e) => {
            log::error!("{e}");
            exit(1);
        }
    }
}
