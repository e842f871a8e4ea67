//! Generated protobuf/gRPC types for the health agent's RPC surface
//! (`nimbus.agent.v1`), built with `tonic-build` the way `nimbus-proto`'s
//! sibling crates in the teacher workspace (`mz-service`,
//! `mz-orchestrator-tracing`) generate theirs in `build.rs`.

tonic::include_proto!("nimbus.agent.v1");

pub const FILE_DESCRIPTOR_NAME: &str = "nimbus.agent.v1";
