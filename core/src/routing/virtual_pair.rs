//! A virtual input and a virtual output published under one name.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use midir::MidiInputConnection;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::fanout::{FanOut, SharedTarget, TargetId};
use super::pipe::PipeWriter;
use crate::adapters::MidiDriver;
use crate::domain::{relay_port_name, validate, Validation};
use crate::error::{Error, Result};
use crate::ports::MessageTarget;

/// Tuning for a pair's ingress queue.
#[derive(Debug, Clone, Copy)]
pub struct PairSettings {
    pub ingress_capacity: usize,
}

impl Default for PairSettings {
    fn default() -> Self {
        Self {
            ingress_capacity: 1024,
        }
    }
}

/// Where a queued message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    /// Every registered target.
    Routed,
    /// Only this pair's virtual output.
    Relayed,
}

/// One app-owned virtual port pair.
///
/// Messages arriving on the virtual input are validated in the driver
/// callback, queued, and handed by a dispatcher thread to every registered
/// target, one message at a time. A second, private input named by
/// [`relay_port_name`] feeds the pair's output only; relay workers bound to
/// the pair write there.
pub struct VirtualPortPair {
    name: String,
    fanout: Arc<FanOut>,
    output: SharedTarget,
    ingress: Mutex<Option<Sender<(Lane, Vec<u8>)>>>,
    inputs: Mutex<Vec<MidiInputConnection<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualPortPair {
    /// Publish a pair named `name` through the driver.
    #[cfg(unix)]
    pub fn open(driver: &MidiDriver, name: &str, settings: PairSettings) -> Result<Self> {
        let output = driver.create_virtual_output(name)?;
        let pair = Self::detached(name, Box::new(output), settings)?;

        let ingress = pair.ingress.lock().clone();
        let Some(ingress) = ingress else {
            return Err(Error::Midi(format!("Pair '{}' closed while opening", name)));
        };
        let routed = {
            let (ingress, pair_name) = (ingress.clone(), name.to_string());
            driver.create_virtual_input(name, move |msg| {
                enqueue(&ingress, &pair_name, Lane::Routed, msg);
            })?
        };
        pair.inputs.lock().push(routed);

        let relay_name = relay_port_name(name);
        let pair_name = name.to_string();
        let relayed = driver.create_virtual_input(&relay_name, move |msg| {
            enqueue(&ingress, &pair_name, Lane::Relayed, msg);
        })?;
        pair.inputs.lock().push(relayed);

        info!("Opened virtual port pair '{}'", name);
        Ok(pair)
    }

    #[cfg(not(unix))]
    pub fn open(_driver: &MidiDriver, name: &str, _settings: PairSettings) -> Result<Self> {
        Err(Error::UnsupportedPlatform(format!(
            "virtual MIDI ports are not available here, cannot open '{}'",
            name
        )))
    }

    /// A pair with no OS ports behind it. Messages enter through
    /// [`VirtualPortPair::ingest`] and the output is `output`.
    pub fn detached(
        name: &str,
        output: Box<dyn MessageTarget>,
        settings: PairSettings,
    ) -> Result<Self> {
        let fanout = Arc::new(FanOut::new(name));
        let output: SharedTarget = Arc::new(Mutex::new(output));
        let (tx, rx) = bounded::<(Lane, Vec<u8>)>(settings.ingress_capacity.max(1));

        let dispatch_fanout = Arc::clone(&fanout);
        let dispatch_output = Arc::clone(&output);
        let pair_name = name.to_string();
        let dispatcher = thread::Builder::new()
            .name(format!("midicable-dispatch-{}", name))
            .spawn(move || {
                for (lane, msg) in rx {
                    match lane {
                        Lane::Routed => {
                            dispatch_fanout.deliver(&msg);
                        }
                        Lane::Relayed => {
                            if let Err(e) = dispatch_output.lock().send(&msg) {
                                warn!("'{}' dropped a relayed message: {}", pair_name, e);
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            fanout,
            output,
            ingress: Mutex::new(Some(tx)),
            inputs: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Feed a message in as if it arrived on the virtual input.
    ///
    /// Returns false when the message was rejected or dropped.
    pub fn ingest(&self, msg: &[u8]) -> bool {
        self.enqueue(Lane::Routed, msg)
    }

    /// Feed a message in as if it arrived on the relay input. It reaches
    /// this pair's output and nothing else.
    pub fn ingest_relayed(&self, msg: &[u8]) -> bool {
        self.enqueue(Lane::Relayed, msg)
    }

    fn enqueue(&self, lane: Lane, msg: &[u8]) -> bool {
        match self.ingress.lock().as_ref() {
            Some(ingress) => enqueue(ingress, &self.name, lane, msg),
            None => false,
        }
    }

    /// Register an in-process target.
    pub fn add_target(&self, target: SharedTarget) -> TargetId {
        self.fanout.add_target(target)
    }

    /// Register a pipe worker's writer.
    pub fn add_pipe(&self, pipe: PipeWriter) -> TargetId {
        self.fanout.add_pipe(pipe)
    }

    pub fn remove_target(&self, id: TargetId) -> bool {
        self.fanout.remove(id)
    }

    pub fn target_count(&self) -> usize {
        self.fanout.len()
    }

    /// Target that sends through this pair's virtual output.
    pub fn output_target(&self) -> SharedTarget {
        Arc::clone(&self.output)
    }

    /// Close the virtual inputs and stop the dispatcher after it drains.
    pub fn close(&self) {
        let inputs = std::mem::take(&mut *self.inputs.lock());
        for input in inputs {
            input.close();
        }
        drop(self.ingress.lock().take());

        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if dispatcher.join().is_err() {
                warn!("Dispatcher for '{}' panicked", self.name);
            }
            debug!("Closed virtual port pair '{}'", self.name);
        }
    }
}

impl Drop for VirtualPortPair {
    fn drop(&mut self) {
        self.close();
    }
}

fn enqueue(ingress: &Sender<(Lane, Vec<u8>)>, name: &str, lane: Lane, msg: &[u8]) -> bool {
    let bytes = match validate(msg) {
        Validation::Valid { bytes, .. } => bytes,
        Validation::Invalid(reason) => {
            debug!("'{}' rejected a message: {}", name, reason);
            return false;
        }
    };
    match ingress.try_send((lane, bytes.to_vec())) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("'{}' ingress queue full, message dropped", name);
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    struct Recorder {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MessageTarget for Recorder {
        fn send(&mut self, msg: &[u8]) -> Result<()> {
            self.sent.lock().push(msg.to_vec());
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn pair(name: &str) -> (VirtualPortPair, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let output = Box::new(Recorder {
            sent: Arc::clone(&sent),
        });
        (
            VirtualPortPair::detached(name, output, PairSettings::default()).unwrap(),
            sent,
        )
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
    fn test_routes_to_own_output() {
        let (cable, sent) = pair("Cable A");
        cable.add_target(cable.output_target());

        assert!(cable.ingest(&[0x90, 0x40, 0x7F]));
        assert!(!cable.ingest(&[0xB0, 0x07]));
        assert!(cable.ingest(&[0xC0, 0x01, 0x02]));

        assert!(wait_for(|| sent.lock().len() == 2));
        assert_eq!(
            *sent.lock(),
            vec![vec![0x90, 0x40, 0x7F], vec![0xC0, 0x01]]
        );
    }

    #[test]
    fn test_removed_target_stops_receiving() {
        let (a, _) = pair("Cable A");
        let (b, b_sent) = pair("Cable B");
        let id = a.add_target(b.output_target());

        a.ingest(&[0xF8]);
        assert!(wait_for(|| b_sent.lock().len() == 1));
        assert!(a.remove_target(id));
        a.close();

        assert_eq!(b_sent.lock().len(), 1);
        assert!(!a.ingest(&[0xF8]));
    }

    #[test]
    fn test_relayed_messages_reach_own_output_only() {
        let (a, a_sent) = pair("Cable A");
        let (synth, synth_sent) = pair("Synth");
        a.add_target(synth.output_target());

        assert!(a.ingest_relayed(&[0x90, 0x40, 0x7F]));
        assert!(!a.ingest_relayed(&[0x90, 0x40]));
        assert!(wait_for(|| a_sent.lock().len() == 1));
        assert_eq!(a_sent.lock()[0], vec![0x90, 0x40, 0x7F]);

        // Routed traffic still follows the targets.
        a.ingest(&[0xF8]);
        assert!(wait_for(|| synth_sent.lock().len() == 1));
        a.close();
        assert_eq!(a_sent.lock().len(), 1);
        assert_eq!(*synth_sent.lock(), vec![vec![0xF8]]);
    }

    #[test]
    fn test_relayed_messages_need_no_targets() {
        let (a, a_sent) = pair("Cable A");
        assert_eq!(a.target_count(), 0);
        a.ingest_relayed(&[0xC0, 0x05]);
        a.close();
        assert_eq!(*a_sent.lock(), vec![vec![0xC0, 0x05]]);
    }

    #[test]
    fn test_close_drains_queue() {
        let (a, sent) = pair("Cable A");
        a.add_target(a.output_target());
        for _ in 0..50 {
            a.ingest(&[0xF8]);
        }
        a.close();
        assert_eq!(sent.lock().len(), 50);
    }
}
