//! Re-emits documents in their originally detected encoding, in input
//! order. `Unknown` objects are written back out verbatim (their
//! stored raw text), satisfying the bit-identical round-trip
//! requirement; workloads are re-serialized through `k8s-openapi`'s
//! `Serialize` impl, since a rewritten workload has no "original bytes"
//! to preserve.

use crate::error::CodecError;
use crate::types::{Document, Encoding, Object, Workload};

pub fn encode_stream(documents: &[Document]) -> Result<String, CodecError> {
    let mut out = String::new();
    for (index, document) in documents.iter().enumerate() {
        match document.encoding {
            Encoding::Yaml => {
                if index > 0 {
                    out.push_str("---\n");
                }
                out.push_str(&encode_yaml_document(document)?);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Encoding::Json => {
                out.push_str(&encode_json_document(document)?);
            }
        }
    }
    Ok(out)
}

fn encode_yaml_document(document: &Document) -> Result<String, CodecError> {
    match &document.object {
        Object::Unknown(unknown) => Ok(unknown.raw.clone()),
        Object::Workload(workload) => Ok(workload_to_yaml(workload)?),
    }
}

fn encode_json_document(document: &Document) -> Result<String, CodecError> {
    match &document.object {
        Object::Unknown(unknown) => Ok(unknown.raw.clone()),
        Object::Workload(workload) => Ok(workload_to_json(workload)?),
    }
}

macro_rules! workload_match {
    ($workload:expr, $f:expr) => {
        match $workload {
            Workload::Pod(w) => $f(w.as_ref()),
            Workload::ReplicationController(w) => $f(w.as_ref()),
            Workload::Deployment(w) => $f(w.as_ref()),
            Workload::DaemonSet(w) => $f(w.as_ref()),
            Workload::ReplicaSet(w) => $f(w.as_ref()),
            Workload::StatefulSet(w) => $f(w.as_ref()),
            Workload::Job(w) => $f(w.as_ref()),
            Workload::CronJob(w) => $f(w.as_ref()),
        }
    };
}

fn workload_to_yaml(workload: &Workload) -> Result<String, serde_yaml::Error> {
    workload_match!(workload, serde_yaml::to_string)
}

fn workload_to_json(workload: &Workload) -> Result<String, serde_json::Error> {
    workload_match!(workload, serde_json::to_string_pretty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_stream;

    #[test]
    fn unknown_documents_round_trip_bit_identically() {
        let input = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  labels:\n    x: \"1\"\n";
        let docs = decode_stream(input).unwrap();
        let out = encode_stream(&docs).unwrap();
        assert_eq!(out.trim(), input.trim());
    }

    #[test]
    fn re_emits_multiple_yaml_documents_with_framer_in_order() {
        let input = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: b\n";
        let docs = decode_stream(input).unwrap();
        let out = encode_stream(&docs).unwrap();
        let a_pos = out.find("name: a").unwrap();
        let b_pos = out.find("name: b").unwrap();
        assert!(a_pos < b_pos);
        assert!(out.contains("---\n"));
    }
}
