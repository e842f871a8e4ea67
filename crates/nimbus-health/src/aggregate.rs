//! Cluster-wide status aggregation (P7/S6) and local-timeline diffing
//! (P6). Peer collection itself lives in `agent.rs`; this module is the
//! pure function from a set of per-node observations to a
//! [`SystemStatus`], and from a pair of consecutive [`NodeStatus`]
//! values to the [`TimelineEvent`]s that separate them.

use crate::types::{NodeStatus, NodeStatusKind, Probe, SystemStatus, TimelineEvent};

/// Composes a [`SystemStatus`] from the collected [`NodeStatus`] of every
/// member (including `Unknown` placeholders for peers that didn't
/// respond). Implements P7: Degraded iff no master is present among
/// members, or any known member is missing (`Unknown`), or any node is
/// itself `Degraded`. S6: the summary names the missing member when at
/// least one master did respond; if no responder carries `role=master`
/// it is the fixed string `"master node unavailable"`.
pub fn aggregate_system_status(
    timestamp: chrono::DateTime<chrono::Utc>,
    nodes: Vec<NodeStatus>,
    master_names: &[String],
) -> SystemStatus {
    let missing_members: Vec<&NodeStatus> = nodes
        .iter()
        .filter(|n| n.member && n.status == NodeStatusKind::Unknown)
        .collect();
    let any_node_degraded = nodes.iter().any(|n| n.status == NodeStatusKind::Degraded);
    let responding_master = nodes
        .iter()
        .any(|n| master_names.iter().any(|m| m == &n.name) && n.status != NodeStatusKind::Unknown);
    let no_master = !responding_master;

    let degraded = no_master || !missing_members.is_empty() || any_node_degraded;

    let summary = if degraded {
        if no_master {
            "master node unavailable".to_string()
        } else if let Some(first_missing) = missing_members.first() {
            format!("member {} is not responding", first_missing.name)
        } else {
            "one or more nodes are degraded".to_string()
        }
    } else {
        "all nodes healthy".to_string()
    };

    let status = if degraded {
        NodeStatusKind::Degraded
    } else {
        NodeStatusKind::Running
    };

    SystemStatus {
        timestamp,
        status,
        nodes,
        summary,
    }
}

/// Diffs `previous` against `current` probe-by-probe, producing one
/// `TimelineEvent` per probe whose status or severity changed, plus one
/// `node_status_changed` event when the node's own aggregate status
/// moved. Rerunning with an unchanged `current` produces no events
/// (P6's idempotence clause).
pub fn diff_node_status(
    timestamp: chrono::DateTime<chrono::Utc>,
    previous: Option<&NodeStatus>,
    current: &NodeStatus,
) -> Vec<TimelineEvent> {
    let mut events = Vec::new();
    let empty = Vec::new();
    let previous_probes: &Vec<Probe> = previous.map(|p| &p.probes).unwrap_or(&empty);

    for probe in &current.probes {
        let prior = previous_probes.iter().find(|p| p.checker_name == probe.checker_name);
        let changed = match prior {
            None => true,
            Some(prior) => prior.status != probe.status || prior.severity != probe.severity,
        };
        if changed {
            events.push(TimelineEvent::new(
                timestamp,
                "probe_changed",
                serde_json::json!({
                    "checker_name": probe.checker_name,
                    "status": probe.status,
                    "severity": probe.severity,
                    "error_message": probe.error_message,
                }),
            ));
        }
    }

    let status_changed = previous.map(|p| p.status) != Some(current.status);
    if status_changed {
        events.push(TimelineEvent::new(
            timestamp,
            "node_status_changed",
            serde_json::json!({
                "name": current.name,
                "status": current.status,
            }),
        ));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn degraded_when_no_master_responds() {
        let nodes = vec![
            NodeStatus::from_probes("n1", vec![]),
            NodeStatus::from_probes("n2", vec![]),
        ];
        let status = aggregate_system_status(now(), nodes, &["master1".to_string()]);
        assert_eq!(status.status, NodeStatusKind::Degraded);
        assert_eq!(status.summary, "master node unavailable");
    }

    #[test]
    fn degraded_with_missing_member_names_it_in_the_summary() {
        let nodes = vec![
            NodeStatus::from_probes("master1", vec![]),
            NodeStatus::unknown("n2"),
        ];
        let status = aggregate_system_status(now(), nodes, &["master1".to_string()]);
        assert_eq!(status.status, NodeStatusKind::Degraded);
        assert!(status.summary.contains("n2"));
    }

    #[test]
    fn running_when_master_present_and_all_members_reporting() {
        let nodes = vec![
            NodeStatus::from_probes("master1", vec![]),
            NodeStatus::from_probes("n2", vec![]),
        ];
        let status = aggregate_system_status(now(), nodes, &["master1".to_string()]);
        assert_eq!(status.status, NodeStatusKind::Running);
        assert_eq!(status.summary, "all nodes healthy");
    }

    #[test]
    fn degraded_when_a_member_node_itself_is_degraded_even_with_master_present() {
        let nodes = vec![
            NodeStatus::from_probes("master1", vec![]),
            NodeStatus::from_probes("n2", vec![Probe::failed("disk", Severity::Critical, "full")]),
        ];
        let status = aggregate_system_status(now(), nodes, &["master1".to_string()]);
        assert_eq!(status.status, NodeStatusKind::Degraded);
    }

    #[test]
    fn diffing_identical_consecutive_status_produces_no_events() {
        let node = NodeStatus::from_probes("n1", vec![Probe::running("disk")]);
        let events = diff_node_status(now(), Some(&node), &node);
        assert!(events.is_empty());
    }

    #[test]
    fn a_newly_failing_probe_produces_a_probe_changed_event() {
        let previous = NodeStatus::from_probes("n1", vec![Probe::running("disk")]);
        let current = NodeStatus::from_probes(
            "n1",
            vec![Probe::failed("disk", Severity::Critical, "full")],
        );
        let events = diff_node_status(now(), Some(&previous), &current);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "probe_changed");
        assert_eq!(events[1].kind, "node_status_changed");
    }
}
