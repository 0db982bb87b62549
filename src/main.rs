//! Wavebridge - exposes wavemaker pumps to an MQTT-speaking automation hub.
//!
//! Startup wires four pieces together: the configuration (read once), the
//! MQTT bus connection, the registry of per-pump sessions, and two dispatch
//! loops — one publishing state events onto the bus, one routing inbound
//! `/set` messages into the matching session's command queue. Both loops are
//! single-threaded on purpose: per-pump command ordering comes from queueing,
//! not locking.

pub mod bus;
pub mod config;
pub mod mapper;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use bus::{InboundMessage, MqttBus};
use config::{BridgeConfig, PumpConfig};
use mapper::BusMessage;
use registry::BridgeRegistry;
use session::{DeviceState, StateEvent};
use transport::TcpTransport;

#[derive(Parser, Debug)]
#[command(
    name = "wavebridge",
    about = "Bridges wavemaker pumps onto MQTT for home-automation hubs"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "wavebridge.toml")]
    config: PathBuf,

    /// Verbose protocol logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.debug)?;

    if !args.config.exists() {
        std::fs::write(&args.config, config::EXAMPLE_CONFIG)?;
        error!(
            "Config file not found; wrote a starter config to {}",
            args.config.display()
        );
        info!("Edit it and start the bridge again");
        std::process::exit(1);
    }

    let config = BridgeConfig::load(&args.config)?;
    let root = config.bridge.root_topic.clone();

    // Bus startup failure is one of the two process-fatal conditions (the
    // other being the config load above); everything past this point
    // recovers on its own.
    let (mqtt_bus, inbound_rx) = MqttBus::connect(&config.mqtt, &root).await?;

    let registry = Arc::new(BridgeRegistry::start(&config, Arc::new(TcpTransport)));
    let events = registry
        .take_events()
        .ok_or_else(|| eyre!("state event stream already claimed"))?;

    let pumps: HashMap<String, PumpConfig> = config
        .pumps
        .iter()
        .map(|pump| (pump.id.clone(), pump.clone()))
        .collect();

    let publisher = tokio::spawn(run_state_publisher(
        events,
        mqtt_bus.clone(),
        root.clone(),
        config.bridge.discovery_prefix.clone(),
        pumps,
        config.bridge.refresh_interval(),
    ));
    let dispatcher = tokio::spawn(run_command_dispatch(
        inbound_rx,
        registry.clone(),
        root.clone(),
    ));

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    registry.shutdown().await;
    // Sessions are gone, so the event stream closes and the publisher
    // drains the final disconnected states before exiting.
    let _ = publisher.await;
    dispatcher.abort();
    mqtt_bus.announce_offline(&root).await;
    info!("Bridge stopped");
    Ok(())
}

fn setup(debug: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let level = if debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(error) => {
                warn!("Cannot listen for SIGTERM: {}", error);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Consume the merged state event stream and publish onto the bus.
///
/// Also owns the two pieces of dispatch bookkeeping: which pumps have had
/// their discovery announcement (once per first Ready transition), and the
/// last snapshot per pump for the periodic refresh republish.
async fn run_state_publisher(
    mut events: mpsc::Receiver<StateEvent>,
    mqtt_bus: MqttBus,
    root: String,
    discovery_prefix: String,
    pumps: HashMap<String, PumpConfig>,
    refresh_interval: Duration,
) {
    let mut announced: HashSet<String> = HashSet::new();
    let mut last_seen: HashMap<String, DeviceState> = HashMap::new();
    let mut refresh = tokio::time::interval(refresh_interval);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };

                if event.state.connected && !announced.contains(&event.pump_id) {
                    if let Some(pump) = pumps.get(&event.pump_id) {
                        info!("[{}] publishing discovery announcement", event.pump_id);
                        for message in mapper::discovery_messages(&discovery_prefix, &root, pump) {
                            publish_logged(&mqtt_bus, message).await;
                        }
                        announced.insert(event.pump_id.clone());
                    }
                }

                for message in mapper::state_messages(&root, &event.pump_id, &event.state) {
                    publish_logged(&mqtt_bus, message).await;
                }
                last_seen.insert(event.pump_id, event.state);
            }

            _ = refresh.tick() => {
                // Republish unchanged state now and then so the hub's
                // history stays continuous.
                for (pump_id, state) in &last_seen {
                    if state.connected {
                        for message in mapper::state_messages(&root, pump_id, state) {
                            publish_logged(&mqtt_bus, message).await;
                        }
                    }
                }
            }
        }
    }
    debug!("State publisher stopped");
}

async fn publish_logged(mqtt_bus: &MqttBus, message: BusMessage) {
    if let Err(error) = mqtt_bus.publish(message).await {
        warn!("Publish failed: {}", error);
    }
}

/// Route inbound `/set` messages into the matching session's queue.
///
/// Enqueueing is fast and happens in arrival order; awaiting each command's
/// outcome is pushed onto a side task so one slow pump cannot stall
/// commands addressed to the others.
async fn run_command_dispatch(
    mut inbound: mpsc::Receiver<InboundMessage>,
    registry: Arc<BridgeRegistry>,
    root: String,
) {
    while let Some(message) = inbound.recv().await {
        let Some(parsed) = mapper::parse_command_topic(&root, &message.topic) else {
            debug!("Ignoring message on {}", message.topic);
            continue;
        };

        let Some(handle) = registry.lookup(parsed.pump_id) else {
            warn!("{}", mapper::MapperError::NotFound(parsed.pump_id.to_string()));
            continue;
        };

        let command = match mapper::decode_payload(parsed.field, &message.payload, handle.pump()) {
            Ok(command) => command,
            Err(error) => {
                warn!("[{}] rejected command: {}", parsed.pump_id, error);
                continue;
            }
        };

        match handle.submit(command).await {
            Ok(outcome) => {
                let pump_id = parsed.pump_id.to_string();
                tokio::spawn(async move {
                    match outcome.await {
                        Ok(Ok(())) => {
                            debug!("[{}] {} command acknowledged", pump_id, command.field_name());
                        }
                        Ok(Err(error)) => {
                            warn!(
                                "[{}] {} command failed: {}",
                                pump_id,
                                command.field_name(),
                                error
                            );
                        }
                        Err(_) => {
                            debug!("[{}] session dropped before reporting outcome", pump_id);
                        }
                    }
                });
            }
            Err(error) => {
                warn!("[{}] could not enqueue command: {}", parsed.pump_id, error);
            }
        }
    }
    debug!("Command dispatcher stopped");
}
