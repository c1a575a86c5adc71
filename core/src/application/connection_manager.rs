//! Connection lifecycle management.
//!
//! Sets connections up with the strategy their endpoints call for, tears
//! them down on request or when a port disappears, and reports every final
//! status change on the event bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{
    relay_port_name, Connection, ConnectionId, ConnectionStatus, Port, PortId, Strategy,
};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::ports::WorkerLauncher;
use crate::routing::{PipeWriter, TargetId, VirtualPortPair};
use crate::worker::WorkerHandle;

/// Tuning for connection setup and teardown.
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    /// How long teardown waits for a worker to exit before reaping it in
    /// the background.
    pub termination_grace: Duration,
    pub pipe_queue_capacity: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            termination_grace: Duration::from_millis(200),
            pipe_queue_capacity: 256,
        }
    }
}

/// What a live connection holds on to.
enum Resources {
    InProcess {
        pair: Arc<VirtualPortPair>,
        target: TargetId,
    },
    Pipe {
        pair: Arc<VirtualPortPair>,
        target: TargetId,
        handle: WorkerHandle,
    },
    Relay {
        handle: WorkerHandle,
    },
}

impl Resources {
    fn worker(&mut self) -> Option<&mut WorkerHandle> {
        match self {
            Resources::InProcess { .. } => None,
            Resources::Pipe { handle, .. } | Resources::Relay { handle } => Some(handle),
        }
    }
}

struct Entry {
    connection: Connection,
    status: ConnectionStatus,
    seq: u64,
    resources: Resources,
}

/// A route whose setup is in progress.
struct Pending {
    connection: Connection,
    seq: u64,
    /// Endpoint that disappeared while the setup was running.
    lost: Option<PortId>,
}

#[derive(Default)]
struct State {
    entries: HashMap<ConnectionId, Entry>,
    pending: HashMap<(PortId, PortId), Pending>,
    next_seq: u64,
}

/// Owns every connection and its resources.
///
/// All map access goes through one lock, which is never held while a worker
/// is spawned or torn down.
pub struct ConnectionManager<L: WorkerLauncher> {
    launcher: L,
    pairs: HashMap<String, Arc<VirtualPortPair>>,
    state: Mutex<State>,
    events: EventBus,
    settings: ManagerSettings,
}

impl<L: WorkerLauncher> ConnectionManager<L> {
    /// Create a manager routing through the given app pairs.
    pub fn new(
        launcher: L,
        pairs: &[Arc<VirtualPortPair>],
        events: EventBus,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            launcher,
            pairs: pairs
                .iter()
                .map(|p| (p.name().to_string(), Arc::clone(p)))
                .collect(),
            state: Mutex::new(State::default()),
            events,
            settings,
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Connect `source` to `destination`.
    ///
    /// On success the connection is `Active` and one event reports it. A
    /// failed setup emits one `Failed` event and returns the error; nothing
    /// is kept. Invalid or duplicate requests are rejected without an event.
    ///
    /// While the setup runs the route is listed as `Starting`. If one of its
    /// ports is reported removed in that window, the finished setup is torn
    /// down again and the add fails with `PortNotFound`.
    pub fn add(&self, source: Port, destination: Port) -> Result<ConnectionId> {
        let connection = Connection::new(source, destination)?;
        let route = (connection.source.id(), connection.destination.id());

        let seq = {
            let mut state = self.state.lock();
            let active = state
                .entries
                .values()
                .any(|e| e.connection.same_route(&connection));
            if active || state.pending.contains_key(&route) {
                return Err(Error::AlreadyConnected(connection.to_string()));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                route.clone(),
                Pending {
                    connection: connection.clone(),
                    seq,
                    lost: None,
                },
            );
            seq
        };

        debug!("Connecting {} ({})", connection, connection.strategy);
        let setup = self.set_up(&connection);

        let mut state = self.state.lock();
        let lost = state.pending.remove(&route).and_then(|p| p.lost);
        match (setup, lost) {
            (Ok(resources), Some(port)) => {
                drop(state);

                warn!("{} went away while connecting {}", port, connection);
                self.release(resources);
                self.events.status(&connection, ConnectionStatus::Failed);
                Err(Error::PortNotFound {
                    direction: port.direction,
                    name: port.name,
                })
            }
            (Ok(resources), None) => {
                state.entries.insert(
                    connection.id,
                    Entry {
                        connection: connection.clone(),
                        status: ConnectionStatus::Active,
                        seq,
                        resources,
                    },
                );
                drop(state);

                info!("Connected {} via {}", connection, connection.strategy);
                self.events.status(&connection, ConnectionStatus::Active);
                Ok(connection.id)
            }
            (Err(e), _) => {
                drop(state);

                warn!("Failed to connect {}: {}", connection, e);
                self.events.status(&connection, ConnectionStatus::Failed);
                Err(e)
            }
        }
    }

    fn pair(&self, port: &Port) -> Result<&Arc<VirtualPortPair>> {
        self.pairs.get(&port.name).ok_or_else(|| Error::PortNotFound {
            direction: port.direction,
            name: port.name.clone(),
        })
    }

    fn set_up(&self, connection: &Connection) -> Result<Resources> {
        match connection.strategy {
            Strategy::InProcess => {
                let pair = Arc::clone(self.pair(&connection.source)?);
                let destination = self.pair(&connection.destination)?;
                let target = pair.add_target(destination.output_target());
                Ok(Resources::InProcess { pair, target })
            }
            Strategy::PipeWorker => {
                let pair = Arc::clone(self.pair(&connection.source)?);
                let mut handle = self.launcher.spawn_pipe(&connection.destination.name)?;
                let stdin = handle.take_stdin().ok_or_else(|| {
                    Error::SpawnFailure(format!("pipe worker {} has no stdin", handle.pid()))
                })?;
                let writer = PipeWriter::spawn(
                    &connection.destination.name,
                    stdin,
                    self.settings.pipe_queue_capacity,
                )?;
                let target = pair.add_pipe(writer);
                Ok(Resources::Pipe {
                    pair,
                    target,
                    handle,
                })
            }
            Strategy::RelayWorker => {
                // An app pair is fed through its relay input, which reaches
                // the pair's output and none of its routes.
                let destination = if connection.destination.is_app_virtual() {
                    relay_port_name(self.pair(&connection.destination)?.name())
                } else {
                    connection.destination.name.clone()
                };
                let handle = self
                    .launcher
                    .spawn_relay(&connection.source.name, &destination)?;
                Ok(Resources::Relay { handle })
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Close a connection. Unknown ids are ignored and return false.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let entry = self.state.lock().entries.remove(&id);
        match entry {
            Some(entry) => {
                self.close(entry, ConnectionStatus::Closed);
                true
            }
            None => {
                debug!("Connection {} already gone", id);
                false
            }
        }
    }

    /// Close every connection that references one of `ports`.
    ///
    /// Routes still being set up are marked lost; their `add` fails once the
    /// setup returns, so they are not in the returned list.
    pub fn handle_removed_ports(&self, ports: &[PortId]) -> Vec<ConnectionId> {
        if ports.is_empty() {
            return Vec::new();
        }
        {
            let mut state = self.state.lock();
            for pending in state.pending.values_mut() {
                if let Some(port) = ports.iter().find(|p| pending.connection.references(p)) {
                    debug!("{} went away while connecting {}", port, pending.connection);
                    if pending.lost.is_none() {
                        pending.lost = Some(port.clone());
                    }
                }
            }
        }

        let affected = self.take_where(|e| ports.iter().any(|p| e.connection.references(p)));

        let mut closed = Vec::with_capacity(affected.len());
        for entry in affected {
            info!("Port for {} went away", entry.connection);
            closed.push(entry.connection.id);
            self.close(entry, ConnectionStatus::Closed);
        }
        closed
    }

    /// Mark connections whose worker exited on its own as failed.
    pub fn reap_exited(&self) -> Vec<ConnectionId> {
        let exited = self.take_where(|e| {
            e.resources
                .worker()
                .map(|h| matches!(h.try_exit_status(), Ok(Some(_))))
                .unwrap_or(false)
        });

        let mut failed = Vec::with_capacity(exited.len());
        for entry in exited {
            warn!("Worker for {} exited unexpectedly", entry.connection);
            failed.push(entry.connection.id);
            self.close(entry, ConnectionStatus::Failed);
        }
        failed
    }

    /// Close every connection.
    pub fn shutdown(&self) {
        for entry in self.take_where(|_| true) {
            self.close(entry, ConnectionStatus::Closed);
        }
    }

    /// Remove matching entries under the lock, in creation order.
    fn take_where(&self, mut matches: impl FnMut(&mut Entry) -> bool) -> Vec<Entry> {
        let mut state = self.state.lock();
        let ids: Vec<ConnectionId> = state
            .entries
            .iter_mut()
            .filter_map(|(id, entry)| matches(entry).then_some(*id))
            .collect();
        let mut taken: Vec<Entry> = ids
            .iter()
            .filter_map(|id| state.entries.remove(id))
            .collect();
        taken.sort_by_key(|e| e.seq);
        taken
    }

    /// Release an entry's resources and report its final status.
    fn close(&self, entry: Entry, status: ConnectionStatus) {
        let Entry {
            connection,
            resources,
            ..
        } = entry;
        self.release(resources);

        debug!("{} is {}", connection, status);
        self.events.status(&connection, status);
    }

    fn release(&self, resources: Resources) {
        let grace = self.settings.termination_grace;
        match resources {
            Resources::InProcess { pair, target } => {
                pair.remove_target(target);
            }
            Resources::Pipe {
                pair,
                target,
                handle,
            } => {
                // Dropping the writer closes the pipe; the worker exits on EOF.
                pair.remove_target(target);
                handle.release(grace);
            }
            Resources::Relay { handle } => handle.release(grace),
        }
    }

    // =========================================================================
    // State Access
    // =========================================================================

    /// Live connections with their status, in creation order. Routes still
    /// being set up are listed as `Starting`.
    pub fn connections(&self) -> Vec<(Connection, ConnectionStatus)> {
        let state = self.state.lock();
        let mut listed: Vec<(u64, Connection, ConnectionStatus)> = state
            .entries
            .values()
            .map(|e| (e.seq, e.connection.clone(), e.status))
            .chain(
                state
                    .pending
                    .values()
                    .map(|p| (p.seq, p.connection.clone(), ConnectionStatus::Starting)),
            )
            .collect();
        listed.sort_by_key(|(seq, ..)| *seq);
        listed
            .into_iter()
            .map(|(_, connection, status)| (connection, status))
            .collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<(Connection, ConnectionStatus)> {
        let state = self.state.lock();
        if let Some(entry) = state.entries.get(&id) {
            return Some((entry.connection.clone(), entry.status));
        }
        state
            .pending
            .values()
            .find(|p| p.connection.id == id)
            .map(|p| (p.connection.clone(), ConnectionStatus::Starting))
    }

    /// Number of established connections.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{PortDirection, PortOrigin};
    use crate::events::Event;
    use crate::ports::MessageTarget;
    use crate::routing::PairSettings;
    use crate::worker::WorkerKind;
    use std::path::PathBuf;
    use std::process::{Command, Stdio};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    /// Launcher that starts stand-in processes: `cat` for pipe workers,
    /// `sleep` for relay workers.
    #[derive(Default)]
    struct StandInLauncher {
        fail: AtomicBool,
        relay_delay: parking_lot::Mutex<Duration>,
        /// When set, pipe workers touch this file after a clean EOF.
        pipe_marker: parking_lot::Mutex<Option<PathBuf>>,
        relays: parking_lot::Mutex<Vec<(String, String)>>,
        pids: parking_lot::Mutex<Vec<u32>>,
    }

    impl StandInLauncher {
        fn start(&self, kind: WorkerKind, program: &str, args: &[&str]) -> Result<WorkerHandle> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::SpawnFailure("exited with code 2".to_string()));
            }
            let child = Command::new(program)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .spawn()?;
            self.pids.lock().push(child.id());
            Ok(WorkerHandle::new(kind, child))
        }
    }

    impl WorkerLauncher for StandInLauncher {
        fn spawn_pipe(&self, _destination: &str) -> Result<WorkerHandle> {
            let marker = self.pipe_marker.lock().clone();
            match marker {
                Some(marker) => {
                    let marker = marker.to_string_lossy().into_owned();
                    self.start(
                        WorkerKind::Pipe,
                        "sh",
                        &["-c", "cat > /dev/null && touch \"$0\"", &marker],
                    )
                }
                None => self.start(WorkerKind::Pipe, "cat", &[]),
            }
        }

        fn spawn_relay(&self, source: &str, destination: &str) -> Result<WorkerHandle> {
            self.relays
                .lock()
                .push((source.to_string(), destination.to_string()));
            let delay = *self.relay_delay.lock();
            thread::sleep(delay);
            self.start(WorkerKind::Relay, "sleep", &["30"])
        }
    }

    fn is_running(pid: u32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    struct Recorder {
        sent: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
        fail: bool,
    }

    impl MessageTarget for Recorder {
        fn send(&mut self, msg: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::SendFailure {
                    target: "recorder".to_string(),
                    reason: "device error".to_string(),
                });
            }
            self.sent.lock().push(msg.to_vec());
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    type Sent = Arc<parking_lot::Mutex<Vec<Vec<u8>>>>;

    fn pair(name: &str, fail: bool) -> (Arc<VirtualPortPair>, Sent) {
        let sent: Sent = Arc::default();
        let output = Box::new(Recorder {
            sent: Arc::clone(&sent),
            fail,
        });
        let pair = VirtualPortPair::detached(name, output, PairSettings::default()).unwrap();
        (Arc::new(pair), sent)
    }

    fn app_input(name: &str) -> Port {
        Port::new(name, PortDirection::Input, PortOrigin::AppVirtual)
    }

    fn app_output(name: &str) -> Port {
        Port::new(name, PortDirection::Output, PortOrigin::AppVirtual)
    }

    fn external(name: &str, direction: PortDirection) -> Port {
        Port::new(name, direction, PortOrigin::External)
    }

    fn manager(pairs: &[Arc<VirtualPortPair>]) -> (ConnectionManager<StandInLauncher>, EventBus) {
        let events = EventBus::new();
        let manager = ConnectionManager::new(
            StandInLauncher::default(),
            pairs,
            events.clone(),
            ManagerSettings::default(),
        );
        (manager, events)
    }

    fn statuses(events: &EventBus) -> Vec<ConnectionStatus> {
        events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::ConnectionStatusChanged { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_failing_target_does_not_affect_others() {
        let (a, _) = pair("A", false);
        let (b, b_sent) = pair("B", false);
        let (c, c_sent) = pair("C", false);
        let (d, _) = pair("D", true);
        let (manager, events) = manager(&[a.clone(), b, c, d]);

        let ids: Vec<ConnectionId> = ["B", "C", "D"]
            .iter()
            .map(|dst| manager.add(app_input("A"), app_output(dst)).unwrap())
            .collect();
        assert_eq!(statuses(&events), vec![ConnectionStatus::Active; 3]);

        for note in 0..20u8 {
            assert!(a.ingest(&[0x90, note, 0x40]));
        }
        assert!(wait_for(|| b_sent.lock().len() == 20 && c_sent.lock().len() == 20));

        for id in ids {
            assert_eq!(manager.get(id).unwrap().1, ConnectionStatus::Active);
        }
        assert!(statuses(&events).is_empty());
    }

    #[test]
    fn test_rejects_invalid_and_duplicate() {
        let (a, _) = pair("A", false);
        let (manager, events) = manager(&[a]);

        let keys = external("Keys", PortDirection::Output);
        let synth = external("Synth", PortDirection::Output);
        assert!(matches!(
            manager.add(keys, synth),
            Err(Error::InvalidConnection(_))
        ));

        manager.add(app_input("A"), app_output("A")).unwrap();
        assert!(matches!(
            manager.add(app_input("A"), app_output("A")),
            Err(Error::AlreadyConnected(_))
        ));
        assert_eq!(statuses(&events), vec![ConnectionStatus::Active]);
    }

    #[test]
    fn test_spawn_failure_is_reported_once() {
        let (a, _) = pair("A", false);
        let (manager, events) = manager(&[a]);
        manager.launcher.fail.store(true, Ordering::SeqCst);

        let result = manager.add(app_input("A"), external("Synth", PortDirection::Output));
        assert!(matches!(result, Err(Error::SpawnFailure(_))));
        assert_eq!(statuses(&events), vec![ConnectionStatus::Failed]);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (a, _) = pair("A", false);
        let (manager, events) = manager(&[a.clone()]);
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pipe-eof");
        *manager.launcher.pipe_marker.lock() = Some(marker.clone());

        let pipe = manager
            .add(app_input("A"), external("Synth", PortDirection::Output))
            .unwrap();
        let relay = manager
            .add(
                external("Keys", PortDirection::Input),
                external("Synth", PortDirection::Output),
            )
            .unwrap();
        assert_eq!(a.target_count(), 1);
        let pipe_pid = manager.launcher.pids.lock()[0];

        assert!(manager.remove(pipe));
        assert!(!manager.remove(pipe));
        // The pipe worker ran to its clean EOF exit; a signal would have
        // stopped the shell before the marker was written.
        assert!(wait_for(|| marker.exists()));
        assert!(wait_for(|| !is_running(pipe_pid)));
        assert!(manager.remove(relay));
        assert!(!manager.remove(relay));

        assert_eq!(a.target_count(), 0);
        assert_eq!(
            statuses(&events),
            vec![
                ConnectionStatus::Active,
                ConnectionStatus::Active,
                ConnectionStatus::Closed,
                ConnectionStatus::Closed
            ]
        );
    }

    #[test]
    fn test_removed_port_closes_connection_once() {
        let (a, _) = pair("A", false);
        let (b, _) = pair("B", false);
        let (manager, events) = manager(&[a.clone(), b]);

        let to_b = manager.add(app_input("A"), app_output("B")).unwrap();
        let to_a = manager.add(app_input("A"), app_output("A")).unwrap();
        events.drain();

        let gone = app_output("B").id();
        assert_eq!(manager.handle_removed_ports(&[gone.clone()]), vec![to_b]);
        assert_eq!(statuses(&events), vec![ConnectionStatus::Closed]);

        // A second report of the same loss changes nothing.
        assert!(manager.handle_removed_ports(&[gone]).is_empty());
        assert!(statuses(&events).is_empty());

        assert!(manager.get(to_b).is_none());
        assert!(manager.get(to_a).is_some());
        assert_eq!(a.target_count(), 1);
    }

    #[test]
    fn test_port_removed_during_setup_is_not_kept() {
        let (a, _) = pair("A", false);
        let (manager, events) = manager(&[a]);
        *manager.launcher.relay_delay.lock() = Duration::from_millis(300);
        let manager = Arc::new(manager);

        let keys = external("Keys", PortDirection::Input);
        let adding = {
            let manager = Arc::clone(&manager);
            let keys = keys.clone();
            thread::spawn(move || manager.add(keys, external("Synth", PortDirection::Output)))
        };

        assert!(wait_for(|| {
            manager
                .connections()
                .iter()
                .any(|(_, status)| *status == ConnectionStatus::Starting)
        }));
        assert!(manager.handle_removed_ports(&[keys.id()]).is_empty());

        let result = adding.join().unwrap();
        assert!(matches!(
            result,
            Err(Error::PortNotFound { ref name, .. }) if name == "Keys"
        ));
        assert!(manager.is_empty());
        assert!(manager.connections().is_empty());
        assert_eq!(statuses(&events), vec![ConnectionStatus::Failed]);

        let relay_pid = manager.launcher.pids.lock()[0];
        assert!(wait_for(|| !is_running(relay_pid)));
    }

    #[test]
    fn test_relay_into_app_pair_uses_relay_input() {
        let (a, _) = pair("A", false);
        let (b, _) = pair("B", false);
        let (manager, _events) = manager(&[a, b]);

        // Whatever A routes to must not see relayed traffic.
        manager.add(app_input("A"), app_output("B")).unwrap();
        manager
            .add(external("Keys", PortDirection::Input), app_output("A"))
            .unwrap();
        manager
            .add(
                external("Keys", PortDirection::Input),
                external("Synth", PortDirection::Output),
            )
            .unwrap();

        assert_eq!(
            *manager.launcher.relays.lock(),
            vec![
                ("Keys".to_string(), relay_port_name("A")),
                ("Keys".to_string(), "Synth".to_string()),
            ]
        );
    }

    #[test]
    fn test_reap_exited_marks_failed() {
        let (a, _) = pair("A", false);
        let (manager, events) = manager(&[a]);

        let relay = manager
            .add(
                external("Keys", PortDirection::Input),
                external("Synth", PortDirection::Output),
            )
            .unwrap();
        events.drain();
        assert!(manager.reap_exited().is_empty());

        // Kill the stand-in behind the manager's back.
        let pid = {
            let mut state = manager.state.lock();
            let entry = state.entries.get_mut(&relay).unwrap();
            entry.resources.worker().unwrap().pid()
        };
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();

        assert!(wait_for(|| !manager.reap_exited().is_empty()));
        assert_eq!(statuses(&events), vec![ConnectionStatus::Failed]);
        assert!(!manager.remove(relay));
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let (a, _) = pair("A", false);
        let (manager, events) = manager(&[a.clone()]);
        manager.add(app_input("A"), app_output("A")).unwrap();
        manager
            .add(app_input("A"), external("Synth", PortDirection::Output))
            .unwrap();
        events.drain();

        manager.shutdown();
        assert!(manager.is_empty());
        assert_eq!(a.target_count(), 0);
        assert_eq!(statuses(&events), vec![ConnectionStatus::Closed; 2]);
    }
}
