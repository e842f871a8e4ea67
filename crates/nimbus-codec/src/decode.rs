//! Streaming decode: auto-detects YAML vs. JSON by a buffered
//! first-byte peek, then splits the stream into per-document raw text
//! (so `Unknown` objects round-trip bit-identically) before
//! dispatching each document to a typed workload or `Unknown`.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, ReplicationController};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::CodecError;
use crate::types::{Document, Encoding, Object, TypeMeta, Unknown, Workload};

/// Peeks past leading whitespace for the first non-whitespace byte: `{`
/// means a JSON stream, anything else (including `---`) means YAML.
pub fn detect_encoding(input: &str) -> Encoding {
    match input.trim_start().as_bytes().first() {
        Some(b'{') => Encoding::Json,
        _ => Encoding::Yaml,
    }
}

pub fn decode_stream(input: &str) -> Result<Vec<Document>, CodecError> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    match detect_encoding(input) {
        Encoding::Yaml => decode_yaml_stream(input),
        Encoding::Json => decode_json_stream(input),
    }
}

fn split_yaml_documents(input: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in input.lines() {
        if line.trim_end() == "---" {
            docs.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    docs.push(current);
    docs
}

fn decode_yaml_stream(input: &str) -> Result<Vec<Document>, CodecError> {
    let mut documents = Vec::new();
    for raw in split_yaml_documents(input) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: serde_yaml::Value = serde_yaml::from_str(trimmed)?;
        if value.is_null() {
            continue;
        }
        let json_value: serde_json::Value = serde_json::to_value(&value)
            .expect("a parsed YAML value always converts to a JSON value");
        let object = classify(json_value, trimmed.to_string())?;
        documents.push(Document {
            encoding: Encoding::Yaml,
            object,
        });
    }
    Ok(documents)
}

fn decode_json_stream(input: &str) -> Result<Vec<Document>, CodecError> {
    let mut documents = Vec::new();
    let mut deserializer = serde_json::Deserializer::from_str(input).into_iter::<serde_json::Value>();
    let mut last_offset = 0usize;
    while let Some(item) = deserializer.next() {
        let value = item?;
        let offset = deserializer.byte_offset();
        let raw = input[last_offset..offset].trim().to_string();
        last_offset = offset;
        if value.is_null() || raw.is_empty() {
            continue;
        }
        let object = classify(value, raw)?;
        documents.push(Document {
            encoding: Encoding::Json,
            object,
        });
    }
    Ok(documents)
}

/// Classifies one decoded value as a recognized [`Workload`] or an
/// [`Unknown`]. An empty `kind` (or a `kind` outside the recognized
/// set) is always `Unknown`, passed through rather than rejected.
fn classify(value: serde_json::Value, raw: String) -> Result<Object, CodecError> {
    let type_meta: TypeMeta = serde_json::from_value(value.clone()).unwrap_or_default();
    if !Workload::recognized_kinds().contains(&type_meta.kind.as_str()) {
        let object_meta: Option<ObjectMeta> = value
            .get("metadata")
            .and_then(|m| serde_json::from_value(m.clone()).ok());
        return Ok(Object::Unknown(Unknown {
            type_meta,
            object_meta,
            raw,
            value,
        }));
    }

    let workload = match type_meta.kind.as_str() {
        "Pod" => Workload::Pod(Box::new(serde_json::from_value::<Pod>(value)?)),
        "ReplicationController" => Workload::ReplicationController(Box::new(
            serde_json::from_value::<ReplicationController>(value)?,
        )),
        "Deployment" => {
            Workload::Deployment(Box::new(serde_json::from_value::<Deployment>(value)?))
        }
        "DaemonSet" => Workload::DaemonSet(Box::new(serde_json::from_value::<DaemonSet>(value)?)),
        "ReplicaSet" => {
            Workload::ReplicaSet(Box::new(serde_json::from_value::<ReplicaSet>(value)?))
        }
        "StatefulSet" => {
            Workload::StatefulSet(Box::new(serde_json::from_value::<StatefulSet>(value)?))
        }
        "Job" => Workload::Job(Box::new(serde_json::from_value::<Job>(value)?)),
        "CronJob" => Workload::CronJob(Box::new(serde_json::from_value::<CronJob>(value)?)),
        other => unreachable!("recognized_kinds and this match must stay in sync: {other}"),
    };
    Ok(Object::Workload(workload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_vs_yaml_by_first_byte() {
        assert_eq!(detect_encoding("  \n{\"kind\":\"Pod\"}"), Encoding::Json);
        assert_eq!(detect_encoding("apiVersion: v1\nkind: Pod"), Encoding::Yaml);
    }

    #[test]
    fn decodes_multi_document_yaml_stream() {
        let input = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: Pod\nmetadata:\n  name: b\nspec:\n  containers: []\n";
        let docs = decode_stream(input).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].object.kind(), "ConfigMap");
        assert_eq!(docs[1].object.kind(), "Pod");
        assert!(matches!(docs[0].object, Object::Unknown(_)));
        assert!(matches!(docs[1].object, Object::Workload(Workload::Pod(_))));
    }

    #[test]
    fn skips_empty_documents_silently() {
        let input = "---\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n";
        let docs = decode_stream(input).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn missing_kind_is_unknown_pass_through() {
        let input = "apiVersion: v1\nmetadata:\n  name: a\n";
        let docs = decode_stream(input).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(matches!(docs[0].object, Object::Unknown(_)));
        assert_eq!(docs[0].object.kind(), "");
    }

    #[test]
    fn decodes_concatenated_json_stream() {
        let input = r#"{"apiVersion":"v1","kind":"Namespace","metadata":{"name":"a"}}{"apiVersion":"v1","kind":"Pod","metadata":{"name":"b"},"spec":{"containers":[]}}"#;
        let docs = decode_stream(input).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].object.kind(), "Namespace");
        assert_eq!(docs[1].object.kind(), "Pod");
    }
}
