use clap::{arg, command, value_parser, Arg, Command};

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug)]
pub enum Args {
    /// Generates a CSV event tape for `number_of_clients` clients and writes
    /// it to `out`.
    Prepare { config: String, out: String, log_level: String },
    /// Runs the tail protocol (server + clients) against a pre-generated
    /// event tape and reports throughput/usage metrics.
    RunTail { config: String, events: String, log_level: String },
    /// Runs the head protocol across a fixed committee, submitting
    /// `num_txs` mock transactions, and reports confirmation latencies.
    RunHead { committee_size: u32, num_txs: u32, log_level: String },
}

fn cli() -> Command {
    command!()
        .about(format!("{} v{}", env!("CARGO_PKG_DESCRIPTION"), env!("CARGO_PKG_VERSION")))
        .arg(log_level_arg())
        .subcommand_required(true)
        .subcommand(
            Command::new("prepare")
                .about("Generate a client event tape as CSV")
                .arg(arg!(-c --config <PATH> "PrepareOptions JSON config").required(true))
                .arg(arg!(-o --out <PATH> "Output CSV path").required(true))
                .arg(log_level_arg()),
        )
        .subcommand(
            Command::new("run-tail")
                .about("Run the tail protocol against a prepared event tape")
                .arg(arg!(-c --config <PATH> "RunOptions JSON config").required(true))
                .arg(arg!(-e --events <PATH> "CSV event tape produced by `prepare`").required(true))
                .arg(log_level_arg()),
        )
        .subcommand(
            Command::new("run-head")
                .about("Run the head protocol across a fixed committee")
                .arg(Arg::new("committee-size").long("committee-size").value_name("N").value_parser(value_parser!(u32)).default_value("4").help("Number of committee members"))
                .arg(Arg::new("num-txs").long("num-txs").value_name("N").value_parser(value_parser!(u32)).default_value("10").help("Number of mock transactions to submit"))
                .arg(log_level_arg()),
        )
}

fn log_level_arg() -> Arg {
    Arg::new("log_level").short('d').long("loglevel").value_name("log_level").default_value(DEFAULT_LOG_LEVEL).help("Specify log level.")
}

impl Args {
    pub fn parse() -> Args {
        let m = cli().get_matches();
        let log_level = m.get_one::<String>("log_level").cloned().unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        match m.subcommand() {
            Some(("prepare", sub)) => Args::Prepare {
                config: sub.get_one::<String>("config").unwrap().clone(),
                out: sub.get_one::<String>("out").unwrap().clone(),
                log_level: sub.get_one::<String>("log_level").cloned().unwrap_or(log_level),
            },
            Some(("run-tail", sub)) => Args::RunTail {
                config: sub.get_one::<String>("config").unwrap().clone(),
                events: sub.get_one::<String>("events").unwrap().clone(),
                log_level: sub.get_one::<String>("log_level").cloned().unwrap_or(log_level),
            },
            Some(("run-head", sub)) => Args::RunHead {
                committee_size: *sub.get_one::<u32>("committee-size").unwrap(),
                num_txs: *sub.get_one::<u32>("num-txs").unwrap(),
                log_level: sub.get_one::<String>("log_level").cloned().unwrap_or(log_level),
            },
            _ => unreachable!("clap enforces subcommand_required"),
        }
    }

    pub fn log_level(&self) -> &str {
        match self {
            Args::Prepare { log_level, .. } | Args::RunTail { log_level, .. } | Args::RunHead { log_level, .. } => log_level,
        }
    }
}
