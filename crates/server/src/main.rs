mod config;
mod events;
mod server;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;
use shellnet::BlueprintRegistry;

#[derive(Parser)]
#[command(name = "shellnet-server")]
#[command(about = "Authoritative shellnet host")]
struct Args {
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_sessions: Option<usize>,

    #[arg(long, help = "Blueprint file, overriding the config")]
    blueprints: Option<PathBuf>,

    #[arg(long, help = "Stop after this many seconds")]
    run_for: Option<u64>,

    #[arg(long, default_value_t = 10, help = "Seconds between status lines")]
    report_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = if args.config.exists() {
        ServerConfig::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        warn!("{} not found, using defaults", args.config.display());
        ServerConfig::default()
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.sync.tick_rate = tick_rate;
    }
    if let Some(max_sessions) = args.max_sessions {
        config.max_sessions = max_sessions;
    }
    if let Some(blueprints) = args.blueprints {
        config.blueprints = blueprints;
    }

    let blueprints = BlueprintRegistry::load(&config.blueprints)
        .with_context(|| format!("loading {}", config.blueprints.display()))?;
    let mut server = GameServer::new(config, blueprints)?;
    info!("Server started on {}", server.local_addr());

    run(
        &mut server,
        args.run_for.map(Duration::from_secs),
        Duration::from_secs(args.report_secs.max(1)),
    );

    info!("Server shutting down");
    server.shutdown_connections();
    log_events(&mut server);
    Ok(())
}

fn run(server: &mut GameServer, limit: Option<Duration>, report_every: Duration) {
    let start = Instant::now();
    let mut last_report = Instant::now();

    while limit.is_none_or(|limit| start.elapsed() < limit) {
        server.tick_once();
        log_events(server);

        if last_report.elapsed() >= report_every {
            last_report = Instant::now();
            let stats = server.stats();
            info!(
                "tick {} | sessions {}/{} | adapters {} | entities {} | sent {} recv {} rejected {}",
                stats.tick,
                stats.session_count,
                stats.max_sessions,
                stats.adapter_count,
                stats.entity_count,
                stats.network_stats.packets_sent,
                stats.network_stats.packets_received,
                stats.network_stats.packets_rejected,
            );
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}

fn log_events(server: &mut GameServer) {
    for event in server.drain_events() {
        match event {
            ServerEvent::ClientConnecting { addr } => {
                info!("Connection request from {addr}");
            }
            ServerEvent::ClientConnected {
                session,
                addr,
                player,
            } => match player {
                Some(net_id) => info!("Session {session} connected from {addr} (net id {net_id})"),
                None => info!("Session {session} connected from {addr}"),
            },
            ServerEvent::ClientDisconnected {
                session,
                reason,
                released,
            } => {
                info!(
                    "Session {session} {} ({released} entities released)",
                    reason.as_str()
                );
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                warn!("Connection denied to {addr}: {reason}");
            }
            ServerEvent::Error { message } => {
                error!("{message}");
            }
        }
    }
}
