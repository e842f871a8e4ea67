//! The gRPC service implementation, wired against the `nimbus-proto`
//! generated `agent_server::Agent` trait. Grounded in the teacher
//! workspace's `mz_service::grpc::GrpcServer`: a thin adapter struct
//! holding an `Arc<Agent>` and translating domain types to and from
//! their wire messages, with role-gated RPCs rejected by
//! `HealthError::NotMaster` (§4.E point 4).

use std::sync::Arc;

use tonic::{Request, Response, Status};

use nimbus_proto::agent_server::Agent as AgentService;
use nimbus_proto::{
    Empty, LastSeenRequest, LastSeenResponse, NodeStatus as WireNodeStatus, Probe as WireProbe,
    SystemStatus as WireSystemStatus, TimeResponse, TimelineEvent as WireTimelineEvent,
    TimelineRequest, TimelineResponse, UpdateTimelineRequest, UpdateTimelineResponse,
};

use crate::agent::Agent;
use crate::error::HealthError;
use crate::types;

pub struct AgentRpc {
    agent: Arc<Agent>,
}

impl AgentRpc {
    pub fn new(agent: Arc<Agent>) -> AgentRpc {
        AgentRpc { agent }
    }
}

fn wire_probe_status(status: types::ProbeStatus) -> i32 {
    match status {
        types::ProbeStatus::Running => nimbus_proto::ProbeStatus::Running as i32,
        types::ProbeStatus::Failed => nimbus_proto::ProbeStatus::Failed as i32,
    }
}

fn wire_severity(severity: types::Severity) -> i32 {
    match severity {
        types::Severity::Info => nimbus_proto::Severity::Info as i32,
        types::Severity::Warning => nimbus_proto::Severity::Warning as i32,
        types::Severity::Critical => nimbus_proto::Severity::Critical as i32,
    }
}

fn wire_node_status_kind(kind: types::NodeStatusKind) -> i32 {
    match kind {
        types::NodeStatusKind::Running => nimbus_proto::NodeStatusKind::Running as i32,
        types::NodeStatusKind::Degraded => nimbus_proto::NodeStatusKind::Degraded as i32,
        types::NodeStatusKind::Unknown => nimbus_proto::NodeStatusKind::Unknown as i32,
    }
}

fn to_wire_probe(probe: &types::Probe) -> WireProbe {
    WireProbe {
        checker_name: probe.checker_name.clone(),
        status: wire_probe_status(probe.status),
        severity: wire_severity(probe.severity),
        error_message: probe.error_message.clone().unwrap_or_default(),
    }
}

fn to_wire_node_status(node: &types::NodeStatus) -> WireNodeStatus {
    WireNodeStatus {
        name: node.name.clone(),
        status: wire_node_status_kind(node.status),
        member: node.member,
        probes: node.probes.iter().map(to_wire_probe).collect(),
    }
}

fn to_wire_system_status(status: &types::SystemStatus) -> WireSystemStatus {
    WireSystemStatus {
        timestamp_millis: status.timestamp.timestamp_millis(),
        status: wire_node_status_kind(status.status),
        nodes: status.nodes.iter().map(to_wire_node_status).collect(),
        summary: status.summary.clone(),
    }
}

fn to_wire_event(event: &types::TimelineEvent) -> WireTimelineEvent {
    WireTimelineEvent {
        timestamp_millis: event.timestamp.timestamp_millis(),
        kind: event.kind.clone(),
        metadata_json: event.metadata.to_string(),
    }
}

fn from_wire_event(event: &WireTimelineEvent) -> types::TimelineEvent {
    let metadata = serde_json::from_str(&event.metadata_json).unwrap_or(serde_json::Value::Null);
    types::TimelineEvent::new(
        chrono::DateTime::from_timestamp_millis(event.timestamp_millis).unwrap_or_else(chrono::Utc::now),
        event.kind.clone(),
        metadata,
    )
}

#[tonic::async_trait]
impl AgentService for AgentRpc {
    async fn status(&self, _request: Request<Empty>) -> Result<Response<WireSystemStatus>, Status> {
        let status = self.agent.system_status().ok_or_else(|| {
            Status::unavailable("no status-collection round has completed yet")
        })?;
        Ok(Response::new(to_wire_system_status(&status)))
    }

    async fn local_status(&self, _request: Request<Empty>) -> Result<Response<WireNodeStatus>, Status> {
        let status = self
            .agent
            .local_status()
            .ok_or_else(|| Status::unavailable("no probe round has completed yet"))?;
        Ok(Response::new(to_wire_node_status(&status)))
    }

    async fn time(&self, _request: Request<Empty>) -> Result<Response<TimeResponse>, Status> {
        Ok(Response::new(TimeResponse {
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
        }))
    }

    async fn timeline(
        &self,
        request: Request<TimelineRequest>,
    ) -> Result<Response<TimelineResponse>, Status> {
        let cluster_timeline = self.agent.cluster_timeline().ok_or(HealthError::NotMaster)?;
        let since = chrono::DateTime::from_timestamp_millis(request.into_inner().since_millis)
            .unwrap_or_else(chrono::Utc::now);
        let events = cluster_timeline
            .since(since, None)
            .map_err(Status::from)?;
        Ok(Response::new(TimelineResponse {
            events: events.iter().map(to_wire_event).collect(),
        }))
    }

    async fn update_timeline(
        &self,
        request: Request<UpdateTimelineRequest>,
    ) -> Result<Response<UpdateTimelineResponse>, Status> {
        let cluster_timeline = self.agent.cluster_timeline().ok_or(HealthError::NotMaster)?;
        let request = request.into_inner();
        let events: Vec<types::TimelineEvent> = request.events.iter().map(from_wire_event).collect();
        let accepted = events.len() as i64;
        cluster_timeline
            .accept(&request.peer, &events)
            .map_err(Status::from)?;
        Ok(Response::new(UpdateTimelineResponse { accepted }))
    }

    async fn update_local_timeline(
        &self,
        request: Request<UpdateTimelineRequest>,
    ) -> Result<Response<UpdateTimelineResponse>, Status> {
        let request = request.into_inner();
        let events: Vec<types::TimelineEvent> = request.events.iter().map(from_wire_event).collect();
        let accepted = events.len() as i64;
        self.agent
            .local_timeline()
            .append(&events)
            .map_err(Status::from)?;
        Ok(Response::new(UpdateTimelineResponse { accepted }))
    }

    async fn last_seen(
        &self,
        request: Request<LastSeenRequest>,
    ) -> Result<Response<LastSeenResponse>, Status> {
        let cluster_timeline = self.agent.cluster_timeline().ok_or(HealthError::NotMaster)?;
        let peer = request.into_inner().peer;
        let timestamp_millis = cluster_timeline
            .last_seen(&peer)
            .map_err(Status::from)?
            .map(|ts| ts.timestamp_millis())
            .unwrap_or(0);
        Ok(Response::new(LastSeenResponse { timestamp_millis }))
    }
}
