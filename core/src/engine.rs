//! Router - Wires the routing engine together.
//!
//! Opens the app's virtual port pairs, waits until they are visible to other
//! processes, wires the default routes and keeps a hot-plug monitor running.
//! Presentation layers talk to this type and read its event bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::adapters::{FreshEnumerator, MidiDriver, SubprocessLauncher};
use crate::application::{ConnectionManager, HotPlugMonitor, MonitorHandle, PortRegistry};
use crate::config::Config;
use crate::domain::{
    Connection, ConnectionId, ConnectionStatus, Port, PortDiff, PortDirection, PortOrigin,
    PortSnapshot,
};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::routing::VirtualPortPair;

/// Name the router registers with the MIDI driver.
pub const CLIENT_NAME: &str = "midicable";

/// The routing engine.
pub struct Router {
    // Held for the lifetime of the router; pairs were opened through it.
    _driver: MidiDriver,
    pairs: Vec<Arc<VirtualPortPair>>,
    registry: Arc<PortRegistry<FreshEnumerator>>,
    manager: Arc<ConnectionManager<SubprocessLauncher>>,
    monitor: Arc<HotPlugMonitor<FreshEnumerator, SubprocessLauncher>>,
    monitor_handle: Mutex<Option<MonitorHandle>>,
    events: EventBus,
    stopped: AtomicBool,
}

impl Router {
    /// Start the engine with the given configuration.
    ///
    /// Pairs that fail to open are logged and skipped. If the pairs do not
    /// become visible in time the router still starts and reports the
    /// timeout as a `Log` event.
    pub async fn start(config: &Config) -> Result<Self> {
        config.validate()?;
        let driver = MidiDriver::new(CLIENT_NAME)?;
        let events = EventBus::new();

        let mut pairs = Vec::with_capacity(config.virtual_ports.len());
        for name in &config.virtual_ports {
            match VirtualPortPair::open(&driver, name, config.pair_settings()) {
                Ok(pair) => pairs.push(Arc::new(pair)),
                Err(e) => {
                    warn!("Could not open virtual port pair '{}': {}", name, e);
                    events.log(format!("Could not open virtual port pair '{}': {}", name, e));
                }
            }
        }
        let pair_names: Vec<String> = pairs.iter().map(|p| p.name().to_string()).collect();

        let enumerator =
            FreshEnumerator::new(config.enumeration_timeout(), config.min_enumeration_spacing())?;
        let registry = Arc::new(PortRegistry::new(enumerator, pair_names.clone()));
        let launcher = SubprocessLauncher::new(config.worker_startup_timeout())?;
        let manager = Arc::new(ConnectionManager::new(
            launcher,
            &pairs,
            events.clone(),
            config.manager_settings(),
        ));
        let monitor = Arc::new(HotPlugMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            events.clone(),
            config.monitor_settings(),
        ));

        if let Err(e) = monitor.await_ports(&pair_names).await {
            warn!("{}; continuing anyway", e);
            events.log(format!("{}; continuing anyway", e));
        }
        if let Err(e) = monitor.tick().await {
            warn!("Initial port refresh failed: {}", e);
        }

        let router = Self {
            _driver: driver,
            pairs,
            registry,
            manager,
            monitor: Arc::clone(&monitor),
            monitor_handle: Mutex::new(None),
            events,
            stopped: AtomicBool::new(false),
        };

        if config.default_wiring {
            for name in &pair_names {
                if let Err(e) = router.add(name, name) {
                    warn!("Default route for '{}' failed: {}", name, e);
                }
            }
        }

        *router.monitor_handle.lock() = Some(monitor.spawn()?);
        info!("Router started with {} virtual port pairs", router.pairs.len());
        Ok(router)
    }

    /// Resolve a port by name. The app's own pairs resolve even before
    /// the enumeration has caught up with them.
    fn resolve(&self, direction: PortDirection, name: &str) -> Result<Port> {
        match self.registry.find(direction, name) {
            Ok(port) => Ok(port),
            Err(_) if self.pairs.iter().any(|p| p.name() == name) => {
                Ok(Port::new(name, direction, PortOrigin::AppVirtual))
            }
            Err(e) => Err(e),
        }
    }

    /// Connect the input named `source` to the output named `destination`.
    pub fn add(&self, source: &str, destination: &str) -> Result<ConnectionId> {
        let source = self.resolve(PortDirection::Input, source)?;
        let destination = self.resolve(PortDirection::Output, destination)?;
        self.manager.add(source, destination)
    }

    /// Close a connection. Unknown ids return false.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.manager.remove(id)
    }

    /// Enumerate now, with the same effects as a monitor tick.
    pub async fn refresh(&self) -> Result<PortDiff> {
        self.monitor.tick().await
    }

    /// Ask the monitor to refresh as soon as possible.
    pub fn notify_change(&self) {
        if let Some(handle) = self.monitor_handle.lock().as_ref() {
            handle.notify_change();
        }
    }

    pub fn ports(&self) -> PortSnapshot {
        self.registry.snapshot()
    }

    pub fn connections(&self) -> Vec<(Connection, ConnectionStatus)> {
        self.manager.connections()
    }

    pub fn virtual_ports(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.name().to_string()).collect()
    }

    /// Receiver for engine events.
    pub fn subscribe(&self) -> Receiver<Event> {
        self.events.subscribe()
    }

    /// Stop the monitor, close every connection and the virtual ports.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self.monitor_handle.lock().take();
        drop(handle);

        self.manager.shutdown();
        for pair in &self.pairs {
            pair.close();
        }
        info!("Router stopped");
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutdown();
    }
}
