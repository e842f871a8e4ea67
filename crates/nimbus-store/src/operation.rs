//! Operations and their append-only progress logs, stored under the
//! `operations/` prefix. An Operation is created by the installer
//! component and never deleted while a Site references it as its
//! active operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nimbus_kv::{KvStore, Ttl};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Install,
    Expand,
    Update,
    Uninstall,
    Shrink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Created,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub site_id: String,
    pub account_id: String,
    pub operation_type: OperationType,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub state: OperationState,
    pub provisioner: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub completion: u8,
    pub message: String,
}

pub struct Operations {
    inner: Collection<Operation>,
    progress_kv: Arc<dyn KvStore>,
}

impl Operations {
    pub fn new(kv: Arc<dyn KvStore>) -> Operations {
        Operations {
            inner: Collection::new(kv.clone(), "operations", "Operation"),
            progress_kv: kv,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Operation, StoreError> {
        self.inner.get(id).await
    }

    pub async fn list_for_site(&self, site_id: &str) -> Result<Vec<Operation>, StoreError> {
        let all = self.inner.list().await?;
        Ok(all.into_iter().filter(|op| op.site_id == site_id).collect())
    }

    pub async fn create(&self, operation: &Operation) -> Result<(), StoreError> {
        self.inner.create(&operation.id, operation, Ttl::Forever).await
    }

    pub async fn put(&self, operation: &Operation) -> Result<(), StoreError> {
        self.inner.put(&operation.id, operation, Ttl::Forever).await
    }

    /// Appends one entry to an operation's progress log. Entries are
    /// keyed by `operations/<id>/progress/<rfc3339-timestamp>` so
    /// `list_children` returns them in chronological order without
    /// needing a separate index.
    pub async fn append_progress(&self, entry: &ProgressEntry) -> Result<(), StoreError> {
        let key = format!(
            "operations/{}/progress/{}",
            nimbus_kv::escape_component(&entry.operation_id),
            nimbus_kv::escape_component(&entry.timestamp.to_rfc3339()),
        );
        let bytes = serde_json::to_vec(entry).expect("progress entries are always serializable");
        self.progress_kv.create(&key, bytes, Ttl::Forever).await?;
        Ok(())
    }

    pub async fn list_progress(&self, operation_id: &str) -> Result<Vec<ProgressEntry>, StoreError> {
        let prefix = format!(
            "operations/{}/progress",
            nimbus_kv::escape_component(operation_id)
        );
        let children = self.progress_kv.list_children(&prefix).await?;
        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let key = format!("{prefix}/{child}");
            match self.progress_kv.get(&key).await {
                Ok(bytes) => {
                    let entry: ProgressEntry = serde_json::from_slice(&bytes).map_err(|source| {
                        StoreError::Decode {
                            entity: "ProgressEntry",
                            key: key.clone(),
                            source,
                        }
                    })?;
                    entries.push(entry);
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }
}
