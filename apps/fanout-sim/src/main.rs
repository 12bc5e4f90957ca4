use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

mod config;
mod sim;

use config::SimConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-process cluster over a shared in-memory log (default)
    Run {
        /// Number of engine nodes
        #[arg(long)]
        nodes: Option<usize>,
        /// Messages published round-robin across nodes
        #[arg(long)]
        messages: Option<usize>,
    },
}

fn main() {
    let filter = std::env::var("FANOUT_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut cfg = match SimConfig::new(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("config load failed: {err}");
            std::process::exit(1);
        }
    };
    if let Some(Commands::Run { nodes, messages }) = cli.command {
        cfg.nodes = nodes.unwrap_or(cfg.nodes);
        cfg.messages = messages.unwrap_or(cfg.messages);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&interrupted)) {
            warn!("failed to install signal handler: {err}");
        }
    }

    info!(nodes = cfg.nodes, messages = cfg.messages, channel = %cfg.channel, "starting simulation");
    let report = match sim::run(&cfg, &interrupted) {
        Ok(report) => report,
        Err(err) => {
            error!("simulation failed: {err}");
            std::process::exit(1);
        }
    };

    for node in &report.nodes {
        println!("{}: {}/{}", node.node, node.received, report.expected_per_node);
    }
    println!("log records: {}", report.log_records);
    if !report.is_complete() {
        std::process::exit(2);
    }
}
