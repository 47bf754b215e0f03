//! Entry point for `telemetry-over-udp`.
//!
//! Parses CLI arguments and dispatches into **collector**, **sensor**, or
//! **relay** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use telemetry_over_udp::{
    client,
    config::{parse_probability, CollectorConfig, SensorConfig, DEFAULT_COLLECTOR_ADDR},
    recorder::CsvRecorder,
    server::Collector,
    simulator::{Relay, SimulatorConfig},
    timer::TimerConfig,
};

/// Sensor telemetry over UDP with acknowledgements and retransmission.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive, classify, record, and acknowledge frames.
    Collector {
        /// Local address to bind.
        #[arg(short, long, default_value = DEFAULT_COLLECTOR_ADDR)]
        bind: SocketAddr,
        /// Live CSV log, truncated at start.
        #[arg(long, default_value = "Telemetry_Results.csv")]
        log: PathBuf,
        /// CSV written at shutdown, sorted by sensor timestamp.
        #[arg(long, default_value = "Telemetry_Results_sorted.csv")]
        sorted: PathBuf,
        /// Receive poll interval in milliseconds (bounds shutdown latency).
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
    /// Simulate one sensor device.
    Sensor {
        /// Device id stamped on every frame.
        #[arg(short, long, default_value_t = 1)]
        device_id: u16,
        /// Collector (or relay) address.
        #[arg(short, long, default_value = DEFAULT_COLLECTOR_ADDR)]
        collector: SocketAddr,
        /// Local address to bind; port 0 picks one.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Send each reading in its own frame.
        #[arg(long)]
        no_batching: bool,
        /// Reading loop period in milliseconds.
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Quiet time in milliseconds before a heartbeat is sent.
        #[arg(long, default_value_t = 5000)]
        heartbeat_ms: u64,
        /// Chance that a tick sends readings.
        #[arg(long, default_value_t = 0.8, value_parser = parse_probability)]
        data_probability: f64,
        /// Most readings generated per tick.
        #[arg(long, default_value_t = 3)]
        max_readings: usize,
        /// Milliseconds to wait for an ACK before resending.
        #[arg(long, default_value_t = 1000)]
        ack_timeout_ms: u64,
        /// Resends allowed per DATA frame before it is given up on.
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Period of the timeout sweep in milliseconds.
        #[arg(long, default_value_t = 100)]
        sweep_ms: u64,
    },
    /// Forward traffic between sensors and a collector, injecting faults.
    Relay {
        /// Address sensors send to.
        #[arg(short, long, default_value = "127.0.0.1:5006")]
        listen: SocketAddr,
        /// Collector to forward to.
        #[arg(short, long, default_value = DEFAULT_COLLECTOR_ADDR)]
        upstream: SocketAddr,
        /// Drop probability for sensor → collector datagrams.
        #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
        upstream_loss: f64,
        /// Drop probability for collector → sensor datagrams.
        #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
        downstream_loss: f64,
        /// Chance a surviving datagram is delivered twice.
        #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
        duplicate_rate: f64,
        /// RNG seed for reproducible runs.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let shutdown = shutdown_on_ctrl_c();

    match cli.mode {
        Mode::Collector {
            bind,
            log,
            sorted,
            poll_ms,
        } => {
            let config = CollectorConfig {
                bind,
                log_path: log,
                sorted_path: sorted,
                timers: TimerConfig {
                    recv_poll: Duration::from_millis(poll_ms),
                    ..TimerConfig::default()
                },
            };
            let sink = CsvRecorder::create(&config.log_path, config.sorted_path.clone())
                .with_context(|| format!("creating {}", config.log_path.display()))?;
            let mut collector = Collector::bind(config.bind, sink, config.timers)
                .await
                .with_context(|| format!("binding collector to {}", config.bind))?;
            collector.run(shutdown).await?;
        }
        Mode::Sensor {
            device_id,
            collector,
            bind,
            no_batching,
            interval_ms,
            heartbeat_ms,
            data_probability,
            max_readings,
            ack_timeout_ms,
            max_retries,
            sweep_ms,
        } => {
            let config = SensorConfig {
                device_id,
                collector,
                bind,
                batching: !no_batching,
                data_interval: Duration::from_millis(interval_ms),
                heartbeat_interval: Duration::from_millis(heartbeat_ms),
                data_probability,
                max_readings,
                timers: TimerConfig {
                    ack_timeout: Duration::from_millis(ack_timeout_ms),
                    max_retries,
                    sweep_interval: Duration::from_millis(sweep_ms),
                    ..TimerConfig::default()
                },
            };
            client::run(config, shutdown).await?;
        }
        Mode::Relay {
            listen,
            upstream,
            upstream_loss,
            downstream_loss,
            duplicate_rate,
            seed,
        } => {
            let config = SimulatorConfig {
                upstream_loss,
                downstream_loss,
                duplicate_rate,
                seed,
            };
            let relay = Relay::bind(listen, upstream, config)
                .await
                .with_context(|| format!("binding relay to {listen}"))?;
            relay.run(shutdown).await?;
        }
    }
    Ok(())
}

/// Flip the returned flag to `true` on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for Ctrl-C: {e}");
            return;
        }
        log::info!("interrupt received, shutting down");
        let _ = tx.send(true);
    });
    rx
}
