//! `matchd` — matchmaking and relay server binary (spec.md §6 "CLI").
//!
//! This crate is a thin shell: CLI parsing, process lifecycle
//! (daemonizing, PID file, start/stop/restart), and the TCP/UDP listener
//! loops that feed frames into `matchd_core::dispatch`. Everything else
//! lives in `matchd-core`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio::net::{TcpListener, UdpSocket};

use matchd::accept_loop;
use matchd_core::auth::FileAuthenticator;
use matchd_core::config::ServerConfig;
use matchd_core::geo::NullGeoLocator;
use matchd_core::handlers::Context;
use matchd_core::recorder::Recorder;
use matchd_core::state::State;
use matchd_core::udp_rendezvous::{serve as serve_rendezvous, RendezvousTable};

#[derive(Parser)]
#[command(name = "matchd")]
#[command(about = "Matchmaking and relay server for arcade netplay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server.
    Start(StartArgs),
    /// Send SIGTERM to the process named in the PID file.
    Stop(PidArgs),
    /// Stop, then start again with the same arguments.
    Restart(StartArgs),
}

#[derive(clap::Args)]
struct PidArgs {
    /// PID file to read, overriding the config file's setting.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[derive(clap::Args, Clone)]
struct StartArgs {
    /// Address to bind the TCP listener to.
    #[arg(long, default_value = "0.0.0.0")]
    listen_address: String,

    /// Port to bind the TCP listener to.
    #[arg(long, default_value_t = 7000)]
    listen_port: u16,

    /// Emit debug-level logs (overrides RUST_LOG).
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Log to stdout instead of the configured log sink.
    #[arg(long)]
    log_to_stdout: bool,

    /// Stay attached to the controlling terminal instead of daemonizing.
    #[arg(long)]
    foreground: bool,

    /// Route getpeer replies through the loopback UDP rendezvous proxy
    /// instead of telling emulators to connect directly.
    #[arg(long)]
    udp_holepunch: bool,

    /// Config file to load; defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// PID file to write, overriding the config file's setting.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args),
        Commands::Stop(args) => run_stop(args),
        Commands::Restart(args) => {
            run_stop(PidArgs { pid_file: args.pid_file.clone() }).ok();
            run_start(args)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn run_stop(args: PidArgs) -> Result<()> {
    let pid_file = args.pid_file.unwrap_or_else(|| ServerConfig::default().pid_file);
    let raw = std::fs::read_to_string(&pid_file)
        .with_context(|| format!("reading PID file {}", pid_file.display()))?;
    let pid: u32 = raw.trim().parse().with_context(|| format!("PID file {} is not a number", pid_file.display()))?;

    tracing::info!(pid, "sending SIGTERM");
    let status = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .context("invoking kill(1)")?;
    if !status.success() {
        anyhow::bail!("kill(1) exited with {status}");
    }
    Ok(())
}

fn run_start(args: StartArgs) -> Result<()> {
    init_tracing(args.verbose);

    let config_path = args.config.clone().unwrap_or_else(ServerConfig::default_config_path);
    let mut config = ServerConfig::load(&config_path)?;
    config.tcp_bind = format!("{}:{}", args.listen_address, args.listen_port);
    if let Some(pid_file) = &args.pid_file {
        config.pid_file = pid_file.clone();
    }
    config.udp_holepunch = config.udp_holepunch || args.udp_holepunch;

    if !args.foreground {
        daemonize(&config)?;
    } else {
        std::fs::write(&config.pid_file, std::process::id().to_string())
            .with_context(|| format!("writing PID file {}", config.pid_file.display()))?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?;
    runtime.block_on(serve(config))
}

fn daemonize(config: &ServerConfig) -> Result<()> {
    daemonize::Daemonize::new()
        .pid_file(&config.pid_file)
        .start()
        .context("daemonizing")?;
    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    let data_dir = config.resolved_data_dir();
    let user_file = config.resolved_user_file();
    let authenticator = match FileAuthenticator::load(&user_file) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, path = %user_file.display(), "no user file, starting with an empty user store");
            FileAuthenticator::empty()
        }
    };

    let ctx = Context {
        state: Arc::new(State::new(config.motd.clone())),
        config: Arc::new(config.clone()),
        authenticator: Arc::new(authenticator),
        geo: Arc::new(NullGeoLocator),
        recorder: Arc::new(Recorder::new(data_dir)),
    };

    let tcp_addr: SocketAddr = config.tcp_bind.parse().context("parsing tcp_bind")?;
    let listener = TcpListener::bind(tcp_addr).await.with_context(|| format!("binding TCP {tcp_addr}"))?;
    tracing::info!(%tcp_addr, "listening for TCP connections");

    let udp_addr: SocketAddr = config.udp_bind.parse().context("parsing udp_bind")?;
    let udp_socket = UdpSocket::bind(udp_addr).await.with_context(|| format!("binding UDP {udp_addr}"))?;
    tracing::info!(%udp_addr, "listening for UDP rendezvous datagrams");
    tokio::spawn(async move {
        let table = RendezvousTable::new();
        if let Err(e) = serve_rendezvous(udp_socket, &table).await {
            tracing::error!(error = %e, "UDP rendezvous service exited");
        }
    });

    accept_loop(ctx, listener).await
}
