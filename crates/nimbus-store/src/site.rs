//! Sites (clusters), stored under the `sites/` prefix. `CompareAndSwapSiteState`
//! is the only legal way to mutate a Site's `state` field; every other
//! field is updated with an ordinary `put`.

use std::sync::Arc;

use nimbus_kv::{KvError, KvStore, Ttl};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::StoreError;
use crate::package::PackageId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteState {
    Created,
    Installing,
    Active,
    Updating,
    Degraded,
    Uninstalling,
    Uninstalled,
}

/// A deployed cluster instance. The in-memory field is named
/// `provisioner`; only the wire (API) representation renames it to
/// `provider`, per the canonical naming this store settled on for Site
/// rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub domain_name: String,
    pub account_id: String,
    pub state: SiteState,
    pub provisioner: String,
    pub provisioner_state: serde_json::Value,
    pub package: PackageId,
    pub local: bool,
}

pub struct Sites {
    inner: Collection<Site>,
}

impl Sites {
    pub fn new(kv: Arc<dyn KvStore>) -> Sites {
        Sites {
            inner: Collection::new(kv, "sites", "Site"),
        }
    }

    pub async fn get(&self, domain: &str) -> Result<Site, StoreError> {
        self.inner.get(domain).await
    }

    pub async fn get_opt(&self, domain: &str) -> Result<Option<Site>, StoreError> {
        self.inner.get_opt(domain).await
    }

    pub async fn list(&self) -> Result<Vec<Site>, StoreError> {
        self.inner.list().await
    }

    pub async fn create(&self, site: &Site) -> Result<(), StoreError> {
        self.inner.create(&site.domain_name, site, Ttl::Forever).await
    }

    /// Updates every field except `state`. Callers must not use this to
    /// change `state`; use [`Sites::compare_and_swap_state`] instead.
    pub async fn put(&self, site: &Site) -> Result<(), StoreError> {
        self.inner.put(&site.domain_name, site, Ttl::Forever).await
    }

    pub async fn delete(&self, domain: &str) -> Result<(), StoreError> {
        self.inner.delete(domain).await
    }

    /// The only legal way to mutate a Site's `state` field: reads the
    /// current Site, verifies its state is `old`, then CAS-writes a copy
    /// with `state` set to `new`. Fails with
    /// `StoreError::SiteStateConflict` if another writer mutated the
    /// Site (any field) in between.
    pub async fn compare_and_swap_state(
        &self,
        domain: &str,
        old: SiteState,
        new: SiteState,
    ) -> Result<Site, StoreError> {
        let current = self.inner.get(domain).await?;
        if current.state != old {
            return Err(StoreError::SiteStateConflict {
                domain: domain.to_string(),
            });
        }
        let mut updated = current.clone();
        updated.state = new;
        match self
            .inner
            .compare_and_swap(domain, &updated, &current, Ttl::Forever)
            .await
        {
            Ok(()) => Ok(updated),
            Err(StoreError::Kv(KvError::CompareFailed(_))) => Err(StoreError::SiteStateConflict {
                domain: domain.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    /// Rewrites `domain`'s `package` field to [`PackageId::phony`] if it
    /// still points at `package`, retrying on a concurrent write. A Site
    /// whose Package no longer exists falls back to the phony triple
    /// rather than dangling (invariant I1).
    pub async fn mask_deleted_package(
        &self,
        domain: &str,
        package: &PackageId,
    ) -> Result<(), StoreError> {
        loop {
            let current = match self.inner.get(domain).await {
                Ok(site) => site,
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err),
            };
            if &current.package != package {
                return Ok(());
            }
            let mut updated = current.clone();
            updated.package = PackageId::phony();
            match self
                .inner
                .compare_and_swap(domain, &updated, &current, Ttl::Forever)
                .await
            {
                Ok(()) => return Ok(()),
                Err(StoreError::Kv(KvError::CompareFailed(_))) => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_kv::embedded::Embedded;

    fn sample_site(domain: &str) -> Site {
        Site {
            id: "site-1".into(),
            domain_name: domain.into(),
            account_id: "acct-1".into(),
            state: SiteState::Created,
            provisioner: "onprem".into(),
            provisioner_state: serde_json::json!({}),
            package: PackageId::phony(),
            local: true,
        }
    }

    #[tokio::test]
    async fn compare_and_swap_state_rejects_stale_expected_state() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let sites = Sites::new(kv);
        sites.create(&sample_site("example.com")).await.unwrap();

        sites
            .compare_and_swap_state("example.com", SiteState::Created, SiteState::Installing)
            .await
            .unwrap();

        let err = sites
            .compare_and_swap_state("example.com", SiteState::Created, SiteState::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SiteStateConflict { .. }));

        let site = sites.get("example.com").await.unwrap();
        assert_eq!(site.state, SiteState::Installing);
    }
}
