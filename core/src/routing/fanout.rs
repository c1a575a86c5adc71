//! Delivery of one source's messages to many targets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::pipe::PipeWriter;
use crate::ports::MessageTarget;

/// A target shared between fan-outs, such as a pair's virtual output.
pub type SharedTarget = Arc<Mutex<Box<dyn MessageTarget>>>;

/// Registration handle returned by [`FanOut::add_target`] and [`FanOut::add_pipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(u64);

/// Result of delivering one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Targets {
    in_process: Vec<(TargetId, SharedTarget)>,
    pipes: Vec<(TargetId, PipeWriter)>,
}

/// The registered targets of one source.
///
/// The lists are only touched under the lock; delivery works on a snapshot
/// taken under the lock and sends after releasing it, so a slow target never
/// blocks registration. Failures are isolated per target.
pub struct FanOut {
    name: String,
    targets: Mutex<Targets>,
    next_id: AtomicU64,
}

impl FanOut {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Mutex::new(Targets::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> TargetId {
        TargetId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an in-process target.
    pub fn add_target(&self, target: SharedTarget) -> TargetId {
        let id = self.next_id();
        self.targets.lock().in_process.push((id, target));
        id
    }

    /// Register a pipe worker's writer.
    pub fn add_pipe(&self, pipe: PipeWriter) -> TargetId {
        let id = self.next_id();
        self.targets.lock().pipes.push((id, pipe));
        id
    }

    /// Deregister a target. Returns false for unknown ids.
    pub fn remove(&self, id: TargetId) -> bool {
        // Dropped outside the lock: dropping a pipe writer can close a pipe.
        let removed_pipe;
        {
            let mut targets = self.targets.lock();
            if let Some(pos) = targets.in_process.iter().position(|(t, _)| *t == id) {
                targets.in_process.remove(pos);
                return true;
            }
            let Some(pos) = targets.pipes.iter().position(|(t, _)| *t == id) else {
                return false;
            };
            removed_pipe = targets.pipes.remove(pos);
        }
        drop(removed_pipe);
        true
    }

    pub fn len(&self) -> usize {
        let targets = self.targets.lock();
        targets.in_process.len() + targets.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `msg` to every target registered right now.
    pub fn deliver(&self, msg: &[u8]) -> DeliveryReport {
        let (in_process, pipes) = {
            let targets = self.targets.lock();
            let in_process: Vec<SharedTarget> =
                targets.in_process.iter().map(|(_, t)| Arc::clone(t)).collect();
            let pipes: Vec<PipeWriter> = targets.pipes.iter().map(|(_, p)| p.clone()).collect();
            (in_process, pipes)
        };

        let mut report = DeliveryReport::default();
        for target in &in_process {
            let mut target = target.lock();
            match target.send(msg) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("{} dropped a message: {}", self.name, e);
                    report.failed += 1;
                }
            }
        }
        for pipe in &pipes {
            match pipe.try_send(msg) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("{} dropped a message: {}", self.name, e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};

    struct Recorder {
        name: String,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail: bool,
    }

    impl MessageTarget for Recorder {
        fn send(&mut self, msg: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::SendFailure {
                    target: self.name.clone(),
                    reason: "unplugged".to_string(),
                });
            }
            self.sent.lock().push(msg.to_vec());
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn recorder(name: &str, fail: bool) -> (SharedTarget, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let target: Box<dyn MessageTarget> = Box::new(Recorder {
            name: name.to_string(),
            sent: Arc::clone(&sent),
            fail,
        });
        (Arc::new(Mutex::new(target)), sent)
    }

    #[test]
    fn test_failing_target_is_isolated() {
        let fanout = FanOut::new("Cable A");
        let (a, a_sent) = recorder("a", false);
        let (b, _) = recorder("b", true);
        let (c, c_sent) = recorder("c", false);
        fanout.add_target(a);
        fanout.add_target(b);
        fanout.add_target(c);

        for note in 0..10u8 {
            let report = fanout.deliver(&[0x90, note, 0x7F]);
            assert_eq!(report, DeliveryReport { delivered: 2, failed: 1 });
        }
        assert_eq!(a_sent.lock().len(), 10);
        assert_eq!(c_sent.lock().len(), 10);
    }

    #[test]
    fn test_remove() {
        let fanout = FanOut::new("Cable A");
        let (a, a_sent) = recorder("a", false);
        let id = fanout.add_target(a);

        fanout.deliver(&[0xF8]);
        assert!(fanout.remove(id));
        assert!(!fanout.remove(id));
        fanout.deliver(&[0xF8]);

        assert_eq!(a_sent.lock().len(), 1);
        assert!(fanout.is_empty());
    }
}
