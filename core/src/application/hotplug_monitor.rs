//! Hot-plug detection.
//!
//! A long-running process never sees ports attached after it started, so the
//! monitor re-enumerates through fresh processes, on a timer and whenever it
//! is told something may have changed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::connection_manager::ConnectionManager;
use super::port_registry::PortRegistry;
use crate::domain::{PortDiff, RawPorts};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::ports::{PortEnumerator, WorkerLauncher};

/// Timing for the monitor loop and the startup barrier.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub barrier_attempts: u32,
    pub barrier_interval: Duration,
    pub barrier_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            barrier_attempts: 20,
            barrier_interval: Duration::from_millis(250),
            barrier_timeout: Duration::from_secs(5),
        }
    }
}

/// Keeps the port list current and connections consistent with it.
pub struct HotPlugMonitor<E: PortEnumerator, L: WorkerLauncher> {
    registry: Arc<PortRegistry<E>>,
    manager: Arc<ConnectionManager<L>>,
    events: EventBus,
    settings: MonitorSettings,
    first_tick: AtomicBool,
}

impl<E, L> HotPlugMonitor<E, L>
where
    E: PortEnumerator + 'static,
    L: WorkerLauncher + 'static,
{
    pub fn new(
        registry: Arc<PortRegistry<E>>,
        manager: Arc<ConnectionManager<L>>,
        events: EventBus,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            registry,
            manager,
            events,
            settings,
            first_tick: AtomicBool::new(true),
        }
    }

    /// One refresh: enumerate, close connections to vanished ports, reap
    /// dead workers and announce the new port list if it changed.
    pub async fn tick(&self) -> Result<PortDiff> {
        let diff = self.registry.refresh().await?;

        if !diff.removed.is_empty() {
            let closed = self.manager.handle_removed_ports(&diff.removed_ids());
            if !closed.is_empty() {
                info!("Closed {} connections to removed ports", closed.len());
            }
        }
        self.manager.reap_exited();

        let first = self.first_tick.swap(false, Ordering::SeqCst);
        if first || !diff.is_empty() {
            debug!(
                "Port list changed: +{} -{}",
                diff.added.len(),
                diff.removed.len()
            );
            self.events.emit(Event::PortListChanged {
                snapshot: self.registry.snapshot(),
            });
        }
        Ok(diff)
    }

    /// Wait until every pair in `names` is visible as both input and output.
    ///
    /// Gives up with `EnumerationTimeout` after the configured number of
    /// attempts or the overall timeout, whichever comes first.
    pub async fn await_ports(&self, names: &[String]) -> Result<RawPorts> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.registry.enumerate_raw().await {
                Ok(raw) if names.iter().all(|n| raw.has_virtual_pair(n)) => {
                    debug!("Virtual ports visible after {} enumerations", attempts);
                    return Ok(raw);
                }
                Ok(_) => debug!("Virtual ports not visible yet (attempt {})", attempts),
                Err(e) => debug!("Enumeration failed (attempt {}): {}", attempts, e),
            }

            let waited = started.elapsed();
            if attempts >= self.settings.barrier_attempts
                || waited + self.settings.barrier_interval > self.settings.barrier_timeout
            {
                return Err(Error::EnumerationTimeout { attempts, waited });
            }
            tokio::time::sleep(self.settings.barrier_interval).await;
        }
    }

    /// Run the monitor loop on its own thread.
    pub fn spawn(self: Arc<Self>) -> Result<MonitorHandle> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let notify = Arc::new(Notify::new());
        let wake = Arc::clone(&notify);
        let poll_interval = self.settings.poll_interval;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .enable_io()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create monitor runtime: {}", e)))?;

        let thread = thread::Builder::new()
            .name("midicable-hotplug".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        if let Err(e) = self.tick().await {
                            warn!("Port refresh failed: {}", e);
                        }

                        tokio::select! {
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                            _ = wake.notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    debug!("Hot-plug monitor stopped");
                });
            })?;

        Ok(MonitorHandle {
            shutdown: shutdown_tx,
            notify,
            thread: Some(thread),
        })
    }
}

/// Control handle for a running monitor. Dropping it stops the monitor.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    notify: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Ask for a refresh now instead of at the next poll.
    pub fn notify_change(&self) {
        self.notify.notify_one();
    }

    /// Stop the loop and wait for the current iteration to finish.
    pub fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Hot-plug monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ManagerSettings;
    use crate::domain::{ConnectionStatus, PortDirection};
    use crate::error::Result;
    use crate::ports::MessageTarget;
    use crate::routing::{PairSettings, VirtualPortPair};
    use crate::worker::WorkerHandle;
    use parking_lot::RwLock;
    use std::sync::atomic::AtomicU32;

    /// Mock enumerator whose ports appear after `hidden_for` calls.
    struct MockEnumerator {
        ports: Arc<RwLock<RawPorts>>,
        hidden_for: u32,
        calls: AtomicU32,
    }

    impl PortEnumerator for MockEnumerator {
        async fn enumerate(&self) -> Result<RawPorts> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.hidden_for {
                return Ok(RawPorts::default());
            }
            Ok(self.ports.read().clone())
        }
    }

    struct NoWorkers;

    impl WorkerLauncher for NoWorkers {
        fn spawn_pipe(&self, _destination: &str) -> Result<WorkerHandle> {
            Err(Error::SpawnFailure("no workers in tests".to_string()))
        }

        fn spawn_relay(&self, _source: &str, _destination: &str) -> Result<WorkerHandle> {
            Err(Error::SpawnFailure("no workers in tests".to_string()))
        }
    }

    struct Sink;

    impl MessageTarget for Sink {
        fn send(&mut self, _msg: &[u8]) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "sink"
        }
    }

    struct Fixture {
        monitor: Arc<HotPlugMonitor<MockEnumerator, NoWorkers>>,
        registry: Arc<PortRegistry<MockEnumerator>>,
        manager: Arc<ConnectionManager<NoWorkers>>,
        ports: Arc<RwLock<RawPorts>>,
        events: EventBus,
        _pairs: Vec<Arc<VirtualPortPair>>,
    }

    fn fixture(hidden_for: u32, settings: MonitorSettings) -> Fixture {
        let names = vec!["A".to_string(), "B".to_string()];
        let ports = Arc::new(RwLock::new(RawPorts {
            inputs: vec!["A".into(), "B".into(), "Keys".into()],
            outputs: vec!["A".into(), "B".into()],
        }));
        let enumerator = MockEnumerator {
            ports: Arc::clone(&ports),
            hidden_for,
            calls: AtomicU32::new(0),
        };
        let pairs: Vec<Arc<VirtualPortPair>> = names
            .iter()
            .map(|n| {
                Arc::new(VirtualPortPair::detached(n, Box::new(Sink), PairSettings::default()).unwrap())
            })
            .collect();

        let events = EventBus::new();
        let registry = Arc::new(PortRegistry::new(enumerator, names));
        let manager = Arc::new(ConnectionManager::new(
            NoWorkers,
            &pairs,
            events.clone(),
            ManagerSettings::default(),
        ));
        let monitor = Arc::new(HotPlugMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            events.clone(),
            settings,
        ));
        Fixture {
            monitor,
            registry,
            manager,
            ports,
            events,
            _pairs: pairs,
        }
    }

    fn fast() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(20),
            barrier_attempts: 5,
            barrier_interval: Duration::from_millis(10),
            barrier_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_tick_emits_only_on_change() {
        let f = fixture(0, fast());

        f.monitor.tick().await.unwrap();
        assert!(matches!(
            f.events.drain().as_slice(),
            [Event::PortListChanged { .. }]
        ));

        f.monitor.tick().await.unwrap();
        assert!(f.events.drain().is_empty());

        f.ports.write().inputs.push("Pads".into());
        let diff = f.monitor.tick().await.unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(f.events.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_removed_port_cascades_once() {
        let f = fixture(0, fast());
        f.monitor.tick().await.unwrap();

        let source = f.registry.find(PortDirection::Input, "A").unwrap();
        let destination = f.registry.find(PortDirection::Output, "B").unwrap();
        let id = f.manager.add(source, destination).unwrap();
        f.events.drain();

        // Pair B disappears from the driver's view.
        {
            let mut ports = f.ports.write();
            ports.inputs.retain(|n| n != "B");
            ports.outputs.retain(|n| n != "B");
        }
        f.monitor.tick().await.unwrap();
        f.monitor.tick().await.unwrap();

        let closed: Vec<_> = f
            .events
            .drain()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::ConnectionStatusChanged { id: closed, status: ConnectionStatus::Closed, .. }
                        if *closed == id
                )
            })
            .collect();
        assert_eq!(closed.len(), 1);
        assert!(f.manager.is_empty());
    }

    #[tokio::test]
    async fn test_barrier_waits_for_ports() {
        let f = fixture(3, fast());
        let raw = f
            .monitor
            .await_ports(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert!(raw.has_virtual_pair("A"));
    }

    #[tokio::test]
    async fn test_barrier_timeout() {
        let f = fixture(u32::MAX, fast());
        match f.monitor.await_ports(&["A".to_string()]).await {
            Err(Error::EnumerationTimeout { attempts, .. }) => assert_eq!(attempts, 5),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_spawned_monitor_reacts_to_notify() {
        let settings = MonitorSettings {
            poll_interval: Duration::from_secs(60),
            ..fast()
        };
        let f = fixture(0, settings);
        let rx = f.events.subscribe();
        let handle = Arc::clone(&f.monitor).spawn().unwrap();

        // First tick always reports.
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Ok(Event::PortListChanged { .. })
        ));

        f.ports.write().outputs.push("Synth".into());
        handle.notify_change();
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Event::PortListChanged { snapshot }) => {
                assert!(snapshot.find(PortDirection::Output, "Synth").is_some())
            }
            other => panic!("unexpected: {:?}", other),
        }

        drop(handle);
    }
}
