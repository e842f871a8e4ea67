//! User, Role, Token, and TrustedCluster documents: marshaled bytes
//! under their canonical prefix, opaque to the KV layer and decoded
//! here by dedicated unmarshalers rather than being interpreted
//! generically.

use std::sync::Arc;

use nimbus_kv::{KvStore, Ttl};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub roles: Vec<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub action: String,
    pub collection: String,
    /// `*` is the wildcard collection_id sentinel.
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub user: String,
    pub expires: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedCluster {
    pub name: String,
    pub enabled: bool,
    pub roles: Vec<String>,
}

macro_rules! rbac_collection {
    ($name:ident, $entity:ty, $prefix:literal, $label:literal) => {
        pub struct $name {
            inner: Collection<$entity>,
        }

        impl $name {
            pub fn new(kv: Arc<dyn KvStore>) -> $name {
                $name {
                    inner: Collection::new(kv, $prefix, $label),
                }
            }

            pub async fn get(&self, id: &str) -> Result<$entity, StoreError> {
                self.inner.get(id).await
            }

            pub async fn get_opt(&self, id: &str) -> Result<Option<$entity>, StoreError> {
                self.inner.get_opt(id).await
            }

            pub async fn list(&self) -> Result<Vec<$entity>, StoreError> {
                self.inner.list().await
            }

            pub async fn put(&self, id: &str, value: &$entity) -> Result<(), StoreError> {
                self.inner.put(id, value, Ttl::Forever).await
            }

            pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
                self.inner.delete(id).await
            }
        }
    };
}

rbac_collection!(Users, User, "users", "User");
rbac_collection!(Roles, Role, "roles", "Role");
rbac_collection!(Tokens, Token, "tokens", "Token");
// TrustedClusters are a kind of cluster configuration document, so they
// share the `clusterconfig/` prefix the domain store contract reserves
// for that family rather than inventing a tenth prefix.
rbac_collection!(TrustedClusters, TrustedCluster, "clusterconfig", "TrustedCluster");
