//! The Chart Index: exactly one key (`charts/index`), a single-row
//! opaque blob updated via CAS to serialize concurrent writers
//! publishing a Helm-style chart repository.

use std::sync::Arc;

use nimbus_kv::KvStore;
use serde::{Deserialize, Serialize};

use crate::collection::SingletonDocument;
use crate::error::StoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartIndex {
    pub entries: Vec<ChartEntry>,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartEntry {
    pub name: String,
    pub version: semver::Version,
    pub digest: String,
}

pub struct ChartIndexStore {
    inner: SingletonDocument<ChartIndex>,
}

impl ChartIndexStore {
    pub fn new(kv: Arc<dyn KvStore>) -> ChartIndexStore {
        ChartIndexStore {
            inner: SingletonDocument::new(kv, "charts/index", "ChartIndex"),
        }
    }

    pub async fn get(&self) -> Result<ChartIndex, StoreError> {
        match self.inner.get().await {
            Ok(index) => Ok(index),
            Err(err) if err.is_not_found() => Ok(ChartIndex::default()),
            Err(err) => Err(err),
        }
    }

    /// Adds or replaces `entry` in the index, retrying the
    /// read-modify-CAS-write loop on concurrent writers.
    pub async fn upsert_entry(&self, entry: ChartEntry) -> Result<ChartIndex, StoreError> {
        self.inner
            .update_with(move |current| {
                let mut index = current.unwrap_or_default();
                index.entries.retain(|existing| existing.name != entry.name);
                index.entries.push(entry.clone());
                index.entries.sort_by(|a, b| a.name.cmp(&b.name));
                index.generation += 1;
                index
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_kv::embedded::Embedded;

    #[tokio::test]
    async fn concurrent_upserts_all_land_without_losing_entries() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let store = Arc::new(ChartIndexStore::new(kv));

        let mut handles = Vec::new();
        for n in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_entry(ChartEntry {
                        name: format!("chart-{n}"),
                        version: "1.0.0".parse().unwrap(),
                        digest: format!("sha256:{n}"),
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let index = store.get().await.unwrap();
        assert_eq!(index.entries.len(), 5);
        assert_eq!(index.generation, 5);
    }
}
