//! A generic typed accessor over one entity family's key prefix.
//! Mirrors the shape of the teacher workspace's per-entity
//! `TypedCollection` wrappers: a fixed prefix, JSON-encoded values, and
//! the race-safe "list then get, skip NotFound" iteration rule the
//! domain store contract requires.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use nimbus_kv::{KvError, KvStore, Ttl};

use crate::error::StoreError;

/// A typed view over the keys under `prefix/`, JSON-encoding values of
/// type `T`. `entity` is used only in error messages.
pub struct Collection<T> {
    kv: Arc<dyn KvStore>,
    prefix: &'static str,
    entity: &'static str,
    _marker: PhantomData<T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(kv: Arc<dyn KvStore>, prefix: &'static str, entity: &'static str) -> Collection<T> {
        Collection {
            kv,
            prefix,
            entity,
            _marker: PhantomData,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}/{}", self.prefix, nimbus_kv::escape_component(id))
    }

    fn decode(&self, id: &str, bytes: &[u8]) -> Result<T, StoreError> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Decode {
            entity: self.entity,
            key: id.to_string(),
            source,
        })
    }

    pub async fn get(&self, id: &str) -> Result<T, StoreError> {
        let bytes = self.kv.get(&self.key(id)).await?;
        self.decode(id, &bytes)
    }

    /// `NotFound` is swallowed into `None` rather than an error, since
    /// missing-and-absent are the same thing to a caller of `get_opt`.
    pub async fn get_opt(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self.get(id).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn put(&self, id: &str, value: &T, ttl: Ttl) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).expect("entity values are always serializable");
        self.kv.upsert(&self.key(id), bytes, ttl).await?;
        Ok(())
    }

    pub async fn create(&self, id: &str, value: &T, ttl: Ttl) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).expect("entity values are always serializable");
        self.kv.create(&self.key(id), bytes, ttl).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.kv.delete(&self.key(id)).await?;
        Ok(())
    }

    /// Reads `listChildren` under the family prefix, then `get`s each
    /// one; an entry that disappears between the list and the get
    /// (`NotFound`) is skipped rather than failing the whole listing,
    /// since that race is an ordinary consequence of concurrent
    /// deletion.
    pub async fn list(&self) -> Result<Vec<T>, StoreError> {
        let ids = self.kv.list_children(self.prefix).await?;
        let mut values = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(value) => values.push(value),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(values)
    }

    /// Atomically replaces the value at `id` if and only if its current
    /// encoded bytes equal `expected`'s encoding.
    pub async fn compare_and_swap(
        &self,
        id: &str,
        new: &T,
        expected: &T,
        ttl: Ttl,
    ) -> Result<(), StoreError> {
        let new_bytes = serde_json::to_vec(new).expect("entity values are always serializable");
        let expected_bytes =
            serde_json::to_vec(expected).expect("entity values are always serializable");
        match self
            .kv
            .compare_and_swap(&self.key(id), new_bytes, &expected_bytes, ttl)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// A single, un-keyed document shared by the whole collection family
/// (e.g. the chart index): exactly one key, updated via CAS to
/// serialize concurrent writers.
pub struct SingletonDocument<T> {
    kv: Arc<dyn KvStore>,
    key: &'static str,
    entity: &'static str,
    _marker: PhantomData<T>,
}

impl<T> SingletonDocument<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(kv: Arc<dyn KvStore>, key: &'static str, entity: &'static str) -> SingletonDocument<T> {
        SingletonDocument {
            kv,
            key,
            entity,
            _marker: PhantomData,
        }
    }

    pub async fn get(&self) -> Result<T, StoreError> {
        let bytes = self.kv.get(self.key).await?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
            entity: self.entity,
            key: self.key.to_string(),
            source,
        })
    }

    /// Reads the current value (`None` if absent), computes `update`,
    /// and CAS-writes it back, retrying on `CompareFailed` -- the
    /// serialize-concurrent-writers pattern the chart index requires.
    pub async fn update_with<F>(&self, mut update: F) -> Result<T, StoreError>
    where
        F: FnMut(Option<T>) -> T,
        T: Clone,
    {
        loop {
            let current_bytes = match self.kv.get(self.key).await {
                Ok(bytes) => Some(bytes),
                Err(KvError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            };
            let current: Option<T> = match &current_bytes {
                Some(bytes) => Some(serde_json::from_slice(bytes).map_err(|source| {
                    StoreError::Decode {
                        entity: self.entity,
                        key: self.key.to_string(),
                        source,
                    }
                })?),
                None => None,
            };
            let next = update(current.clone());
            let next_bytes =
                serde_json::to_vec(&next).expect("entity values are always serializable");

            let result = match current_bytes {
                Some(expected_bytes) => {
                    self.kv
                        .compare_and_swap(self.key, next_bytes, &expected_bytes, Ttl::Forever)
                        .await
                }
                None => self.kv.create(self.key, next_bytes, Ttl::Forever).await,
            };
            match result {
                Ok(()) => return Ok(next),
                Err(KvError::CompareFailed(_)) | Err(KvError::AlreadyExists(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}
