//! The Health Agent's data model: [`Probe`], [`NodeStatus`],
//! [`SystemStatus`], [`TimelineEvent`] (§3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Running,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub checker_name: String,
    pub status: ProbeStatus,
    pub severity: Severity,
    pub error_message: Option<String>,
}

impl Probe {
    pub fn running(checker_name: impl Into<String>) -> Probe {
        Probe {
            checker_name: checker_name.into(),
            status: ProbeStatus::Running,
            severity: Severity::Info,
            error_message: None,
        }
    }

    pub fn failed(
        checker_name: impl Into<String>,
        severity: Severity,
        error_message: impl Into<String>,
    ) -> Probe {
        Probe {
            checker_name: checker_name.into(),
            status: ProbeStatus::Failed,
            severity,
            error_message: Some(error_message.into()),
        }
    }

    /// Whether this probe alone is enough to degrade the node it came
    /// from: failed with a severity above `Info`.
    pub fn degrades_node(&self) -> bool {
        self.status == ProbeStatus::Failed && self.severity > Severity::Info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatusKind {
    Running,
    Degraded,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub status: NodeStatusKind,
    pub member: bool,
    pub probes: Vec<Probe>,
}

impl NodeStatus {
    /// An `Unknown` placeholder for a peer that didn't respond within
    /// its collection timeout.
    pub fn unknown(name: impl Into<String>) -> NodeStatus {
        NodeStatus {
            name: name.into(),
            status: NodeStatusKind::Unknown,
            member: true,
            probes: Vec::new(),
        }
    }

    /// Aggregates a set of local probes into the node's own status:
    /// `Degraded` if any probe failed with severity above `Info`, else
    /// `Running`.
    pub fn from_probes(name: impl Into<String>, probes: Vec<Probe>) -> NodeStatus {
        let status = if probes.iter().any(Probe::degrades_node) {
            NodeStatusKind::Degraded
        } else {
            NodeStatusKind::Running
        };
        NodeStatus {
            name: name.into(),
            status,
            member: true,
            probes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: NodeStatusKind,
    pub nodes: Vec<NodeStatus>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: String,
    pub metadata: serde_json::Value,
}

impl TimelineEvent {
    pub fn new(
        timestamp: chrono::DateTime<chrono::Utc>,
        kind: impl Into<String>,
        metadata: serde_json::Value,
    ) -> TimelineEvent {
        TimelineEvent {
            timestamp,
            kind: kind.into(),
            metadata,
        }
    }
}
