mod client;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use client::{ConnectionState, ObserverClient};
use config::ObserverConfig;
use shellnet::{BlueprintRegistry, Replicator};

#[derive(Parser)]
#[command(name = "shellnet-observer")]
#[command(about = "Headless shellnet observer")]
struct Args {
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], shellnet::net::DEFAULT_PORT)))]
    server: SocketAddr,

    #[arg(short, long, default_value = "observer")]
    name: String,

    #[arg(short = 'B', long, default_value = "Scout")]
    blueprint: String,

    #[arg(long, default_value = "config/blueprints.toml")]
    blueprints: PathBuf,

    #[arg(short, long, default_value_t = shellnet::net::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(long, help = "Steer the player craft toward this heading in degrees")]
    heading: Option<f32>,

    #[arg(long, default_value_t = 5, help = "Seconds between husk reports")]
    report_secs: u64,

    #[arg(long, help = "Disconnect after this many seconds")]
    run_for: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let blueprints = BlueprintRegistry::load(&args.blueprints)
        .with_context(|| format!("loading {}", args.blueprints.display()))?;

    let mut config = ObserverConfig::new(args.server);
    config.player_name = args.name;
    config.blueprint = args.blueprint;
    config.sync.tick_rate = args.tick_rate;
    config.heading = args.heading;
    config.report_interval = Duration::from_secs(args.report_secs.max(1));
    let report_interval = config.report_interval;

    let mut client = ObserverClient::new(config, blueprints)?;
    info!("Observer bound to {}", client.local_addr());
    client.connect()?;

    let start = Instant::now();
    let limit = args.run_for.map(Duration::from_secs);
    let mut last_report = Instant::now();

    while client.state() != ConnectionState::Disconnected {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            client.disconnect()?;
            break;
        }
        client.update()?;

        if last_report.elapsed() >= report_interval {
            last_report = Instant::now();
            if let Some(replicator) = client.replicator() {
                report(replicator, client.stats().rtt_ms);
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    if let Some(replicator) = client.replicator() {
        report(replicator, client.stats().rtt_ms);
    }
    info!("Observer exiting");
    Ok(())
}

fn report(replicator: &Replicator, rtt_ms: f32) {
    info!(
        "session {} | tick {} | {} adapters | rtt {rtt_ms:.1} ms",
        replicator.local_session_id(),
        replicator.tick_count(),
        replicator.adapter_count()
    );
    for adapter in replicator.adapters() {
        let Some(entity) = adapter.husk().and_then(|h| replicator.world().get(h)) else {
            info!("  #{} {:?}", adapter.net_id(), adapter.phase());
            continue;
        };
        info!(
            "  #{} `{}` faction {} at ({:.1}, {:.1}, {:.1}) health {:.0}/{:.0}/{:.0} parts {}",
            adapter.net_id(),
            entity.id,
            entity.faction,
            entity.position.x,
            entity.position.y,
            entity.position.z,
            entity.health.shell,
            entity.health.core,
            entity.health.energy,
            entity.network_parts().count(),
        );
    }
}
