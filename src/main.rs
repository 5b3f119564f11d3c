//! simlink - drive the donkey-car simulator from the command line.
//!
//! Connects, loads a scene, spawns the car, then logs telemetry while
//! holding the car still with a neutral-control failsafe until Ctrl-C.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simlink::config::LinkConfig;
use simlink::link::SimClient;
use simlink::protocol::{CarConfig, Command, SimEvent, DEFAULT_SCENE};

/// Time the simulator needs to act on scene changes before the next command.
const SCENE_SETTLE: Duration = Duration::from_secs(1);

/// Failsafe period: a neutral control command is sent this often.
const FAILSAFE_PERIOD: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "simlink=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tracing::info!("Starting simlink v{}", env!("CARGO_PKG_VERSION"));

    let config = LinkConfig::from_env().context("Invalid simulator link configuration")?;
    let scene = std::env::var("SIMLINK_SCENE").unwrap_or_else(|_| DEFAULT_SCENE.to_string());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut client = SimClient::new(config, tx);
    client.connect().await;

    let result = run(&client, &mut rx, &scene).await;

    client.stop().await;
    if let Err(e) = &result {
        tracing::error!("simlink error: {:#}", e);
    } else {
        tracing::info!("simlink exited cleanly");
    }
    result
}

/// Set up the scene and car, then stream telemetry until Ctrl-C.
async fn run(client: &SimClient, rx: &mut UnboundedReceiver<Value>, scene: &str) -> Result<()> {
    client.send_message(&Command::load_scene(scene))?;
    tokio::time::sleep(SCENE_SETTLE).await;
    client.send_message(&Command::CarConfig(CarConfig::default()))?;

    wait_for_car(client, rx).await?;
    info!("Car loaded in scene {}", scene);

    let mut failsafe = tokio::time::interval(FAILSAFE_PERIOD);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted; leaving scene");
                client.send_message(&Command::ExitScene)?;
                tokio::time::sleep(SCENE_SETTLE).await;
                return Ok(());
            }
            _ = failsafe.tick() => {
                if !client.is_active() {
                    bail!("Simulator closed the connection");
                }
                client.send_message(&Command::neutral())?;
            }
            message = rx.recv() => {
                // The sender lives inside `client`, which outlives this loop,
                // so `None` only shows up if that ever changes.
                let Some(message) = message else {
                    bail!("Simulator link closed");
                };
                handle_event(message)?;
            }
        }
    }
}

/// Consume messages until the simulator reports the car is in the scene.
///
/// Gives up if the link goes down quietly (peer close) while waiting.
async fn wait_for_car(client: &SimClient, rx: &mut UnboundedReceiver<Value>) -> Result<()> {
    let mut progress = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = progress.tick() => {
                if !client.is_active() {
                    bail!("Simulator closed the connection while loading");
                }
                info!("Waiting for car to load");
            }
            message = rx.recv() => {
                // Same as in `run`: unreachable while `client` is alive.
                let Some(message) = message else {
                    bail!("Simulator link closed while loading");
                };
                match SimEvent::from_message(message) {
                    Ok(SimEvent::CarLoaded) => return Ok(()),
                    Ok(SimEvent::Disconnected) => bail!("Simulator link failed while loading"),
                    Ok(other) => debug!("Ignoring {} while loading", other.msg_type()),
                    Err(e) => warn!("Unrecognised message: {}", e),
                }
            }
        }
    }
}

fn handle_event(message: Value) -> Result<()> {
    match SimEvent::from_message(message) {
        Ok(SimEvent::Telemetry(t)) => {
            let [x, y, z] = t.position();
            debug!(
                speed = t.speed,
                heading = t.wrapped_heading(),
                cte = t.cte,
                x, y, z,
                "Telemetry"
            );
            if t.is_colliding() {
                warn!("Collision with {}", t.hit);
            }
        }
        Ok(SimEvent::Disconnected) => bail!("Simulator link failed"),
        Ok(other) => debug!("Ignoring {}", other.msg_type()),
        Err(e) => warn!("Unrecognised message: {}", e),
    }
    Ok(())
}
