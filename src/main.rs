#![cfg_attr(not(test), deny(clippy::panic))]

use altruist_server::config;
use altruist_server::logging;
use altruist_server::server::{game_portal, AltruistServer};
use altruist_server::world::{GameWorldManager, World, WorldPartitioner};
use clap::Parser;
use std::sync::Arc;

/// Altruist -- on-premise real-time multiplayer game server framework
#[derive(Parser, Debug)]
#[command(name = "altruist-server")]
#[command(about = "Real-time multiplayer game server: tick engine, routing, delta sync, spatial worlds")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from config.json if present; otherwise use code defaults.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    if cli.validate_config {
        println!("Configuration validation passed");
        println!();
        println!("Configuration summary:");
        println!("  Port: {}", cfg.port);
        println!("  Engine rate: {} ms", cfg.engine.engine_rate_ms);
        println!("  Physics: {} Hz", cfg.engine.physics_hz);
        println!("  Room capacity: {}", cfg.world.default_room_capacity);
        println!("  Bridge enabled: {}", cfg.bridge.enabled);
        return Ok(());
    }

    logging::init_with_config(&cfg.logging);

    let port = cfg.port;
    tracing::info!(port, "Starting Altruist server");

    let default_world = GameWorldManager::new(
        World {
            index: 0,
            width: 1024.0,
            height: 1024.0,
        },
        WorldPartitioner::new(
            cfg.world.partition_width,
            cfg.world.partition_height,
            cfg.world.cell_size,
        ),
    );

    let server = AltruistServer::builder(cfg)
        .world(default_world)
        .build()?;

    let portal = game_portal(
        "/game",
        Arc::clone(server.store()),
        Arc::clone(server.router()),
        Arc::clone(server.coordinator()),
    )?;

    let server = server.with_portal(portal)?;

    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "Server exited with error");
        std::process::exit(1);
    }

    Ok(())
}
