//! MIDI port domain models and enumeration snapshots.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// ============================================================================
// PortDirection / PortOrigin
// ============================================================================

/// Which way messages flow through a port, seen from the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortDirection {
    /// The router reads messages from this port.
    Input,
    /// The router writes messages to this port.
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Input => write!(f, "Input"),
            PortDirection::Output => write!(f, "Output"),
        }
    }
}

/// Who created a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortOrigin {
    /// A virtual port owned by this application.
    AppVirtual,
    /// Hardware or another application's port.
    External,
}

/// Name of the private input a pair publishes for relay workers. Writes to
/// it go to the pair's output and nowhere else.
pub fn relay_port_name(pair: &str) -> String {
    format!("{} relay", pair)
}

// ============================================================================
// Port
// ============================================================================

/// Identity of a port across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId {
    pub direction: PortDirection,
    pub name: String,
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.direction, self.name)
    }
}

/// A port as reported by one enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Display name reported by the driver.
    pub name: String,
    pub direction: PortDirection,
    pub origin: PortOrigin,
    /// Present in the most recent enumeration.
    pub is_live: bool,
}

impl Port {
    /// Create a live port.
    pub fn new(name: impl Into<String>, direction: PortDirection, origin: PortOrigin) -> Self {
        Self {
            name: name.into(),
            direction,
            origin,
            is_live: true,
        }
    }

    /// Identity of this port.
    pub fn id(&self) -> PortId {
        PortId {
            direction: self.direction,
            name: self.name.clone(),
        }
    }

    /// Check if this port is the one identified by `id`.
    pub fn is(&self, id: &PortId) -> bool {
        self.direction == id.direction && self.name == id.name
    }

    /// A copy of this port marked as no longer present.
    pub fn gone(&self) -> Self {
        Self {
            is_live: false,
            ..self.clone()
        }
    }

    pub fn is_app_virtual(&self) -> bool {
        self.origin == PortOrigin::AppVirtual
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ============================================================================
// RawPorts
// ============================================================================

/// Raw driver enumeration, in driver order.
///
/// `inputs` are the ports a MIDI input client can read from, `outputs` the
/// ports an output client can write to. This is the document printed by
/// `midicable list-ports --json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPorts {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl RawPorts {
    /// True when a pair named `name` is visible from outside: its virtual
    /// input shows up as a writable port and its virtual output as a
    /// readable one.
    pub fn has_virtual_pair(&self, name: &str) -> bool {
        self.inputs.iter().any(|n| n == name) && self.outputs.iter().any(|n| n == name)
    }
}

// ============================================================================
// PortSnapshot
// ============================================================================

/// Routing view of one enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl PortSnapshot {
    /// Build the routing view of a raw enumeration.
    ///
    /// App virtual ports come first, in `app_pairs` order, followed by
    /// external ports in driver order. A pair's virtual input is visible in
    /// the raw *outputs* list (other clients write to it), so it becomes a
    /// routing input; its virtual output likewise becomes a routing output.
    /// The pairs' relay inputs are internal and left out.
    pub fn classify(raw: &RawPorts, app_pairs: &[String]) -> Self {
        let relay_names: Vec<String> = app_pairs.iter().map(|p| relay_port_name(p)).collect();
        let is_app = |name: &String| app_pairs.contains(name) || relay_names.contains(name);

        let mut inputs: Vec<Port> = app_pairs
            .iter()
            .filter(|name| raw.outputs.contains(*name))
            .map(|name| Port::new(name.clone(), PortDirection::Input, PortOrigin::AppVirtual))
            .collect();
        inputs.extend(
            raw.inputs
                .iter()
                .filter(|name| !is_app(*name))
                .map(|name| Port::new(name.clone(), PortDirection::Input, PortOrigin::External)),
        );

        let mut outputs: Vec<Port> = app_pairs
            .iter()
            .filter(|name| raw.inputs.contains(*name))
            .map(|name| Port::new(name.clone(), PortDirection::Output, PortOrigin::AppVirtual))
            .collect();
        outputs.extend(
            raw.outputs
                .iter()
                .filter(|name| !is_app(*name))
                .map(|name| Port::new(name.clone(), PortDirection::Output, PortOrigin::External)),
        );

        Self { inputs, outputs }
    }

    /// Ports of one direction, in snapshot order.
    pub fn ports(&self, direction: PortDirection) -> &[Port] {
        match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        }
    }

    /// First port with this direction and name.
    pub fn find(&self, direction: PortDirection, name: &str) -> Option<&Port> {
        self.ports(direction).iter().find(|p| p.name == name)
    }

    /// Check if a port with this identity is present.
    pub fn contains(&self, id: &PortId) -> bool {
        self.ports(id.direction).iter().any(|p| p.is(id))
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Compare against the previous snapshot.
    pub fn diff(&self, previous: &PortSnapshot) -> PortDiff {
        let ids = |s: &PortSnapshot| -> HashSet<PortId> {
            s.inputs.iter().chain(s.outputs.iter()).map(Port::id).collect()
        };
        let current_ids = ids(self);
        let previous_ids = ids(previous);

        let added = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .filter(|p| !previous_ids.contains(&p.id()))
            .cloned()
            .collect();
        let removed = previous
            .inputs
            .iter()
            .chain(previous.outputs.iter())
            .filter(|p| !current_ids.contains(&p.id()))
            .map(Port::gone)
            .collect();

        PortDiff { added, removed }
    }
}

/// Difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDiff {
    pub added: Vec<Port>,
    /// Ports that disappeared, marked not live.
    pub removed: Vec<Port>,
}

impl PortDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Identities of the removed ports.
    pub fn removed_ids(&self) -> Vec<PortId> {
        self.removed.iter().map(Port::id).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
