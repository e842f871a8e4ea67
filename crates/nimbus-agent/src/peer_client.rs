//! The status-collection loop's outbound leg: dials a peer's `Agent`
//! gRPC service over mutual TLS and fetches its local status. Grounded
//! in the teacher workspace's `mz_service::grpc` client-construction
//! pattern, adapted to use a `rustls`-backed `tonic::transport::Channel`
//! instead of the teacher's plaintext-only variant.

use std::time::Duration;

use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};

use nimbus_health::{NodeStatus, NodeStatusKind, PeerAddress, Probe, ProbeStatus, Severity};
use nimbus_proto::agent_client::AgentClient;
use nimbus_proto::Empty;

use crate::config::TlsMaterial;

fn domain_probe_status(wire: i32) -> ProbeStatus {
    match wire {
        2 => ProbeStatus::Failed,
        _ => ProbeStatus::Running,
    }
}

fn domain_severity(wire: i32) -> Severity {
    match wire {
        2 => Severity::Warning,
        3 => Severity::Critical,
        _ => Severity::Info,
    }
}

fn domain_node_status_kind(wire: i32) -> NodeStatusKind {
    match wire {
        1 => NodeStatusKind::Running,
        2 => NodeStatusKind::Degraded,
        _ => NodeStatusKind::Unknown,
    }
}

fn domain_probe(wire: nimbus_proto::Probe) -> Probe {
    Probe {
        checker_name: wire.checker_name,
        status: domain_probe_status(wire.status),
        severity: domain_severity(wire.severity),
        error_message: (!wire.error_message.is_empty()).then_some(wire.error_message),
    }
}

fn domain_node_status(wire: nimbus_proto::NodeStatus) -> NodeStatus {
    NodeStatus {
        name: wire.name,
        status: domain_node_status_kind(wire.status),
        member: wire.member,
        probes: wire.probes.into_iter().map(domain_probe).collect(),
    }
}

/// Builds the client-side mutual-TLS configuration shared by every
/// outbound peer dial.
fn client_tls_config(material: &TlsMaterial) -> Result<ClientTlsConfig, anyhow::Error> {
    let ca = Certificate::from_pem(&material.ca_cert_pem);
    let identity = Identity::from_pem(&material.cert_pem, &material.key_pem);
    Ok(ClientTlsConfig::new().ca_certificate(ca).identity(identity))
}

/// Dials `peer` and fetches its local status, returning `None` on any
/// connection error or timeout so the caller can fold it into an
/// `Unknown` node (§4.E "tolerating per-peer timeouts").
pub async fn fetch_peer_status(
    peer: PeerAddress,
    tls: &TlsMaterial,
    timeout: Duration,
) -> Option<NodeStatus> {
    let tls_config = client_tls_config(tls).ok()?;
    let endpoint = Channel::from_shared(format!("https://{}", peer.rpc_addr))
        .ok()?
        .tls_config(tls_config)
        .ok()?
        .timeout(timeout)
        .connect_timeout(timeout);

    let channel = tokio::time::timeout(timeout, endpoint.connect())
        .await
        .ok()?
        .ok()?;
    let mut client = AgentClient::new(channel);
    let response = tokio::time::timeout(timeout, client.local_status(Empty {}))
        .await
        .ok()?
        .ok()?;
    Some(domain_node_status(response.into_inner()))
}
