//! Streaming decode of Kubernetes manifest streams (YAML or JSON), with
//! image rewrite and image extraction traversals over the recognized
//! workload kinds.
//!
//! Grounded in the same `k8s-openapi` types the teacher's
//! orchestrator crate builds workload specs with; unlike that crate,
//! this one treats manifests as data to transform rather than specs to
//! submit, so a document the codec doesn't recognize is never an error
//! -- it round-trips as an [`Unknown`](types::Unknown).

pub mod decode;
pub mod encode;
pub mod error;
pub mod extract;
pub mod rewrite;
pub mod types;

pub use error::CodecError;
pub use types::{Document, Encoding, Object, Unknown, Workload};
