//! # sr — The "Switchboard" of STREAMRELAY
//!
//! Command line front end for the relay.
//!
//! - `sr start` — Relay the upstream (serial device or TCP) to TCP clients.
//! - `sr verify` — Run the Kani proofs.
//! - `sr watch` — Follow connectivity changes on the status socket.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sr_io::tap::HexDumpTap;
use sr_io::telemetry::{LogTelemetry, Telemetry};
use sr_io::transport::{Listener, TcpRelayListener};
use sr_io::upstream::Upstream;
use sr_io::{Relay, RelayError};

mod config;

use config::{Config, UpstreamConfig};

const DEFAULT_STATUS_SOCKET: &str = "/tmp/sr-status.sock";

/// STREAMRELAY — share one serial line with any number of TCP clients.
#[derive(Parser)]
#[command(name = "sr", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until Ctrl+C.
    Start(StartArgs),

    /// Run Kani formal verification proofs.
    Verify,

    /// Print connectivity updates from a running relay.
    Watch {
        /// Status socket of the relay.
        #[arg(long, default_value = DEFAULT_STATUS_SOCKET)]
        socket: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct StartArgs {
    /// Path to config file.
    #[arg(long, default_value = "sr.toml")]
    config: PathBuf,

    /// TCP port clients connect to.
    #[arg(long)]
    port: Option<u16>,

    /// Address to listen on.
    #[arg(long)]
    bind: Option<String>,

    /// Ring buffer size in bytes (power of two).
    #[arg(long)]
    capacity: Option<usize>,

    /// Serial device to relay.
    #[arg(long, conflicts_with = "upstream_tcp")]
    device: Option<PathBuf>,

    /// Relay a TCP endpoint (host:port) instead of a device.
    #[arg(long)]
    upstream_tcp: Option<String>,

    /// Publish connectivity on this Unix socket.
    #[arg(long)]
    status_socket: Option<PathBuf>,

    /// Log every upstream chunk as hex (debug level).
    #[arg(long)]
    hex_dump: bool,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Config {
    /// Command-line flags win over the file.
    fn with_overrides(mut self, args: &StartArgs) -> Self {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(bind) = &args.bind {
            self.server.bind = bind.clone();
        }
        if let Some(capacity) = args.capacity {
            self.relay.capacity = capacity;
        }
        if let Some(path) = &args.device {
            self.upstream = UpstreamConfig::Device { path: path.clone() };
        }
        if let Some(address) = &args.upstream_tcp {
            self.upstream = UpstreamConfig::Tcp {
                address: address.clone(),
            };
        }
        if let Some(path) = &args.status_socket {
            self.telemetry.status_socket = Some(path.clone());
        }
        self.log.hex_dump |= args.hex_dump;
        self
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => start(args),
        Commands::Verify => verify(),
        Commands::Watch { socket } => watch(&socket),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "sr=debug,sr_io=debug"
    } else {
        "sr=info,sr_io=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn dump_config(config: &Config) {
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  STREAMRELAY v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Listen:    {}:{}", config.server.bind, config.server.port);
    tracing::info!("  Upstream:  {}", config.upstream);
    tracing::info!("  Buffer:    {} bytes", config.relay.capacity);
    tracing::info!("  Tick:      {} ms", config.relay.tick_interval_ms);
    match &config.telemetry.status_socket {
        Some(path) => tracing::info!("  Status:    {}", path.display()),
        None => tracing::info!("  Status:    disabled"),
    }
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn start(args: StartArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    let config = Config::load(&args.config)?.with_overrides(&args);
    config.validate()?;
    dump_config(&config);

    let listener = TcpRelayListener::bind((config.server.bind.as_str(), config.server.port))
        .with_context(|| {
            format!(
                "binding listener on {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let upstream = config.upstream.open()?;
    let telemetry = build_telemetry(&config)?;

    let mut relay = Relay::new(config.relay.capacity, listener, upstream, telemetry)
        .context("invalid [relay] capacity")?;
    if config.log.hex_dump {
        relay = relay.with_tap(HexDumpTap::default());
    }
    tracing::info!(
        "Listening on {}, relaying {}",
        relay.listener().local_addr(),
        relay.upstream().describe()
    );

    let retry = (config.relay.upstream_retry_ms > 0)
        .then(|| Duration::from_millis(config.relay.upstream_retry_ms));
    let upstream_config = config.upstream.clone();

    // Ticks are cooperative and never overlap: one thread, one relay.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building scheduler runtime")?;
    runtime.block_on(run(
        relay,
        Duration::from_millis(config.relay.tick_interval_ms),
        retry,
        move || upstream_config.open(),
    ))
}

#[cfg(unix)]
fn build_telemetry(config: &Config) -> anyhow::Result<Vec<Box<dyn Telemetry>>> {
    use sr_io::status::{StatusLine, StatusPublisher};

    let mut telemetry: Vec<Box<dyn Telemetry>> = vec![Box::new(LogTelemetry)];
    if let Some(path) = &config.telemetry.status_socket {
        let publisher = StatusPublisher::start(path)
            .with_context(|| format!("starting status socket {}", path.display()))?;
        publisher.publish(StatusLine::for_count(0));
        telemetry.push(Box::new(publisher));
    }
    Ok(telemetry)
}

#[cfg(not(unix))]
fn build_telemetry(config: &Config) -> anyhow::Result<Vec<Box<dyn Telemetry>>> {
    if config.telemetry.status_socket.is_some() {
        bail!("the status socket needs Unix domain sockets");
    }
    Ok(vec![Box::new(LogTelemetry)])
}

/// Runs the relay each tick and reopens a lost upstream.
///
/// With `retry` set, an upstream error parks the relay and a reopen is tried
/// every `retry` until one succeeds. Clients stay connected meanwhile.
/// Without it, and for every other error, the tick error is returned.
struct Supervisor<R> {
    retry: Option<Duration>,
    reopen: R,
    reopen_at: Option<Instant>,
}

impl<R> Supervisor<R> {
    fn new(retry: Option<Duration>, reopen: R) -> Self {
        Self {
            retry,
            reopen,
            reopen_at: None,
        }
    }

    fn step<L, U, T>(&mut self, relay: &mut Relay<L, U, T>, now: Instant) -> Result<(), RelayError>
    where
        L: Listener,
        U: Upstream,
        T: Telemetry,
        R: FnMut() -> anyhow::Result<U>,
    {
        if let Some(at) = self.reopen_at {
            if now < at {
                return Ok(());
            }
            match (self.reopen)() {
                Ok(upstream) => {
                    relay.replace_upstream(upstream);
                    tracing::info!("Upstream reopened: {}", relay.upstream().describe());
                    self.reopen_at = None;
                }
                Err(e) => {
                    tracing::warn!("Failed to reopen upstream: {:#}", e);
                    self.reopen_at = Some(now + self.retry.unwrap_or_default());
                    return Ok(());
                }
            }
        }

        match (relay.tick(), self.retry) {
            (Ok(_), _) => Ok(()),
            (Err(e), Some(delay)) if e.is_upstream() => {
                tracing::error!("Upstream {} lost: {}", relay.upstream().describe(), e);
                self.reopen_at = Some(now + delay);
                Ok(())
            }
            (Err(e), _) => Err(e),
        }
    }
}

async fn run<L, U, T, R>(
    mut relay: Relay<L, U, T>,
    period: Duration,
    retry: Option<Duration>,
    reopen: R,
) -> anyhow::Result<()>
where
    L: Listener,
    U: Upstream,
    T: Telemetry,
    R: FnMut() -> anyhow::Result<U>,
{
    let mut supervisor = Supervisor::new(retry, reopen);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::warn!("Failed to wait for Ctrl+C: {}", e);
                }
                tracing::info!("Shutdown requested");
                break Ok(());
            }
            _ = ticker.tick() => {
                if let Err(e) = supervisor.step(&mut relay, Instant::now()) {
                    tracing::error!("Relay stopped: {}", e);
                    break Err(e);
                }
            }
        }
    };

    relay.shutdown();
    outcome.context("relay failed")
}

fn verify() -> anyhow::Result<()> {
    eprintln!("STREAMRELAY: Running formal verification...");
    eprintln!("   Tool: Kani Model Checker");
    eprintln!("   Targets: sr-core (ring window), sr-verify (reader cursors)");
    eprintln!();

    let mut failed = Vec::new();
    for package in ["sr-core", "sr-verify"] {
        match Command::new("cargo")
            .args(["kani", "--package", package])
            .status()
        {
            Ok(status) if status.success() => eprintln!("   ✅ {}: ALL PROOFS PASSED", package),
            Ok(_) => {
                eprintln!("   ❌ {}: PROOF FAILURE", package);
                failed.push(package);
            }
            Err(e) => {
                eprintln!("   ⚠️  Kani not found: {}", e);
                eprintln!("   Install with: cargo install kani-verifier && cargo kani setup");
                failed.push(package);
            }
        }
    }

    eprintln!();
    if !failed.is_empty() {
        bail!("verification incomplete: {}", failed.join(", "));
    }
    eprintln!("STREAMRELAY: Verification complete.");
    Ok(())
}

#[cfg(unix)]
fn watch(socket: &Path) -> anyhow::Result<()> {
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixStream;

    use sr_io::status::StatusLine;

    let stream = UnixStream::connect(socket)
        .with_context(|| format!("connecting to status socket {}", socket.display()))?;
    eprintln!("Watching {} (Ctrl+C to stop)", socket.display());

    for line in BufReader::new(stream).lines() {
        let line = line.context("reading status socket")?;
        let status: StatusLine = serde_json::from_str(&line)
            .with_context(|| format!("malformed status line: {}", line))?;
        println!(
            "{}  connected={}  clients={}",
            chrono::Local::now().format("%H:%M:%S"),
            status.connected,
            status.connection_count
        );
    }
    eprintln!("Relay closed the status socket.");
    Ok(())
}

#[cfg(not(unix))]
fn watch(_socket: &Path) -> anyhow::Result<()> {
    bail!("watch needs Unix domain sockets")
}
