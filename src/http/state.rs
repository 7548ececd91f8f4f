use crate::config::{Config, SimulationConfig, WebSocketConfig};
use crate::relay::{ConnectionRegistry, Dispatcher, LifecycleHandler, ServerClock};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    /// Connection lifecycle; owns the dispatcher and registry
    pub lifecycle: LifecycleHandler,

    pub websocket: WebSocketConfig,

    pub simulation: SimulationConfig,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Arc<Vec<String>>,

    /// Flipped to `true` once the server starts shutting down
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let clock = Arc::new(ServerClock::new());
        let dispatcher = Dispatcher::new(registry, clock, config.websocket.broadcast_policy);
        let (shutdown, _) = watch::channel(false);

        Self {
            lifecycle: LifecycleHandler::new(dispatcher, config.websocket.notify_malformed),
            websocket: config.websocket.clone(),
            simulation: config.simulation.clone(),
            cors_origins: Arc::new(config.security.cors_origins.clone()),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.lifecycle.dispatcher()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.dispatcher().registry()
    }

    /// Receiver that fires when the server begins shutting down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Tell every open WebSocket session to close
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
