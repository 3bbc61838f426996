//! Gatekeeper agent - keeps a site's doors in sync with the keymaster

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::{ChannelKey, ControllerRegistry, Gatekeeper, SecureChannel};
use gatekeeper_agent::{Args, SyncAgent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    if args.generate_key {
        println!("{}", ChannelKey::generate().to_base64());
        return Ok(());
    }

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("gatekeeper={log_level},gatekeeper_agent={log_level},warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Gatekeeper agent");
    info!("======================================");
    info!("Keymaster: {}", args.keymaster_url.as_deref().unwrap_or_default());
    info!("Sync interval: {}s", args.sync_interval_secs);
    info!("Message TTL: {}s", args.message_ttl_secs);
    info!("Door timeout: {}ms", args.door_timeout_ms);
    info!("Check-in: {}", if args.check_in { "enabled" } else { "disabled" });
    info!("======================================");

    let channel = SecureChannel::from_config(&args.channel_config()).context("Could not build keymaster channel")?;
    let gatekeeper =
        Gatekeeper::new(channel, ControllerRegistry::default()).with_config(args.gatekeeper_config());

    gatekeeper
        .test_keymaster_connection()
        .await
        .context("Keymaster handshake failed")?;

    let mut agent = SyncAgent::new(gatekeeper, args.cycle_options(), args.sync_interval());

    if args.once {
        let report = agent.run_once().await.context("Sync cycle failed")?;
        info!(
            doors = report.doors,
            codes_pulled = report.codes_pulled,
            changes = report.changes,
            "Sync cycle complete"
        );
        return Ok(());
    }

    agent
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Gatekeeper agent stopped");
    Ok(())
}
