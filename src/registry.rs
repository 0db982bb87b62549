//! Bridge registry: the fixed set of pump sessions.
//!
//! Built once at startup from configuration and never mutated afterwards —
//! sessions are looked up, not replaced. Each session runs independently; a
//! reconnect storm on one pump never delays another. The registry also owns
//! the fan-in side of the state event stream the topic mapper consumes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BridgeConfig;
use crate::session::{SessionHandle, StateEvent};
use crate::transport::Transport;

/// Delay between the initial connection attempts of successive pumps, so a
/// shared adapter isn't hit by every session at once.
const STARTUP_STAGGER: Duration = Duration::from_secs(2);

pub struct BridgeRegistry {
    sessions: HashMap<String, SessionHandle>,
    events: std::sync::Mutex<Option<mpsc::Receiver<StateEvent>>>,
    cancel: CancellationToken,
    grace: Duration,
}

impl BridgeRegistry {
    /// Spawn one session per configured pump.
    pub fn start(config: &BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        let settings = Arc::new(config.bridge.clone());
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(256);

        let mut sessions = HashMap::new();
        for (index, pump) in config.pumps.iter().enumerate() {
            let handle = SessionHandle::spawn(
                Arc::new(pump.clone()),
                settings.clone(),
                transport.clone(),
                event_tx.clone(),
                STARTUP_STAGGER * index as u32,
                cancel.child_token(),
            );
            sessions.insert(pump.id.clone(), handle);
        }
        info!("Bridge registry started with {} session(s)", sessions.len());

        Self {
            sessions,
            events: std::sync::Mutex::new(Some(event_rx)),
            cancel,
            grace: settings.shutdown_grace(),
        }
    }

    pub fn lookup(&self, pump_id: &str) -> Option<&SessionHandle> {
        self.sessions.get(pump_id)
    }

    /// The merged state event stream. Single consumer; yields `None` after
    /// the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<StateEvent>> {
        self.events.lock().ok()?.take()
    }

    /// Cooperative teardown of every session, each bounded by the configured
    /// grace period.
    pub async fn shutdown(&self) {
        info!("Shutting down {} session(s)", self.sessions.len());
        self.cancel.cancel();
        for handle in self.sessions.values() {
            handle.join_with_grace(self.grace).await;
        }
        info!("All sessions stopped");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::time::Instant;

    use crate::config::PumpConfig;
    use crate::transport::{Link, TransportError};

    use super::*;

    /// Transport whose connects never complete; sessions stay parked on the
    /// connect await, which is exactly where cancellation must reach them.
    struct StuckTransport;

    #[async_trait]
    impl Transport for StuckTransport {
        async fn connect(&self, _address: &str) -> Result<Box<dyn Link>, TransportError> {
            std::future::pending().await
        }
    }

    fn two_pump_config() -> BridgeConfig {
        BridgeConfig {
            pumps: vec![
                PumpConfig {
                    name: "Left".into(),
                    address: "left:1".into(),
                    id: "left".into(),
                    passcode: 0,
                    flow_min: 30,
                    flow_max: 100,
                    frequency_min: 5,
                    frequency_max: 20,
                },
                PumpConfig {
                    name: "Right".into(),
                    address: "right:1".into(),
                    id: "right".into(),
                    passcode: 0,
                    flow_min: 30,
                    flow_max: 100,
                    frequency_min: 5,
                    frequency_max: 20,
                },
            ],
            ..BridgeConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_finds_configured_pumps_only() {
        let registry = BridgeRegistry::start(&two_pump_config(), Arc::new(StuckTransport));
        assert!(registry.lookup("left").is_some());
        assert!(registry.lookup("right").is_some());
        assert!(registry.lookup("missing").is_none());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn events_stream_is_single_consumer() {
        let registry = BridgeRegistry::start(&two_pump_config(), Arc::new(StuckTransport));
        assert!(registry.take_events().is_some());
        assert!(registry.take_events().is_none());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_stuck_sessions_within_grace() {
        let registry = BridgeRegistry::start(&two_pump_config(), Arc::new(StuckTransport));
        let started = Instant::now();
        registry.shutdown().await;
        // Cancellation reaches the connect await; nothing runs into the
        // forced-abort path, let alone twice the grace period.
        assert!(started.elapsed() < registry.grace * 2);
    }
}
