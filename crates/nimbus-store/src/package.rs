//! Packages: opaque blobs or application packages (manifest non-null),
//! keyed by `(repository, name, version)` under the `packages/` prefix.

use std::sync::Arc;

use nimbus_kv::{KvStore, Ttl};
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::error::StoreError;
use crate::site::Sites;

/// The "does not exist but a Site still references it" sentinel from
/// invariant I1, letting Sites survive Package deletions.
pub const PHONY_PACKAGE: (&str, &str, &str) = ("phony", "unknown", "0.0.0");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageType {
    User,
    Service,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageId {
    pub repository: String,
    pub name: String,
    pub version: semver::Version,
}

impl PackageId {
    pub fn phony() -> PackageId {
        PackageId {
            repository: PHONY_PACKAGE.0.to_string(),
            name: PHONY_PACKAGE.1.to_string(),
            version: PHONY_PACKAGE.2.parse().expect("phony version is valid semver"),
        }
    }

    /// The storage key component: repository/name/version joined with
    /// `:` so a single id is still one path segment once escaped.
    pub fn storage_id(&self) -> String {
        format!("{}:{}:{}", self.repository, self.name, self.version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub sha512: String,
    pub size_bytes: u64,
    pub hidden: bool,
    pub package_type: Option<PackageType>,
    /// Non-null manifest makes this an application package.
    pub manifest: Option<serde_json::Value>,
}

impl Package {
    pub fn is_application(&self) -> bool {
        self.manifest.is_some()
    }
}

pub struct Packages {
    kv: Arc<dyn KvStore>,
    inner: Collection<Package>,
}

impl Packages {
    pub fn new(kv: Arc<dyn KvStore>) -> Packages {
        Packages {
            inner: Collection::new(kv.clone(), "packages", "Package"),
            kv,
        }
    }

    pub async fn get(&self, id: &PackageId) -> Result<Package, StoreError> {
        self.inner.get(&id.storage_id()).await
    }

    pub async fn get_opt(&self, id: &PackageId) -> Result<Option<Package>, StoreError> {
        self.inner.get_opt(&id.storage_id()).await
    }

    pub async fn list(&self) -> Result<Vec<Package>, StoreError> {
        self.inner.list().await
    }

    pub async fn create(&self, package: &Package) -> Result<(), StoreError> {
        self.inner
            .create(&package.id.storage_id(), package, Ttl::Forever)
            .await
    }

    /// Deletes the Package, then masks any Site still referencing it to
    /// [`PackageId::phony`] (invariant I1: a Site survives a Package
    /// deletion rather than dangling).
    pub async fn delete(&self, id: &PackageId) -> Result<(), StoreError> {
        self.inner.delete(&id.storage_id()).await?;
        let sites = Sites::new(self.kv.clone());
        for site in sites.list().await? {
            if &site.package == id {
                sites.mask_deleted_package(&site.domain_name, id).await?;
            }
        }
        Ok(())
    }

    /// Cascade-deletes every Package under `repository` (§3 "Repository:
    /// named container of Packages; deletion cascades"), masking every
    /// Site that referenced one of them along the way.
    pub async fn delete_repository(&self, repository: &str) -> Result<(), StoreError> {
        for package in self.list().await? {
            if package.id.repository == repository {
                self.delete(&package.id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{Site, SiteState};
    use nimbus_kv::embedded::Embedded;

    fn sample_package(name: &str) -> Package {
        Package {
            id: PackageId {
                repository: "gravitational".to_string(),
                name: name.to_string(),
                version: "1.2.3".parse().unwrap(),
            },
            sha512: "deadbeef".to_string(),
            size_bytes: 1024,
            hidden: false,
            package_type: Some(PackageType::User),
            manifest: Some(serde_json::json!({})),
        }
    }

    fn sample_site(domain: &str, package: PackageId) -> Site {
        Site {
            id: "site-1".into(),
            domain_name: domain.into(),
            account_id: "acct-1".into(),
            state: SiteState::Created,
            provisioner: "onprem".into(),
            provisioner_state: serde_json::json!({}),
            package,
            local: true,
        }
    }

    #[tokio::test]
    async fn deleting_a_package_masks_any_referencing_site_to_the_phony_package() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let packages = Packages::new(kv.clone());
        let sites = Sites::new(kv.clone());

        let package = sample_package("app");
        packages.create(&package).await.unwrap();
        sites
            .create(&sample_site("example.com", package.id.clone()))
            .await
            .unwrap();

        packages.delete(&package.id).await.unwrap();

        let site = sites.get("example.com").await.unwrap();
        assert_eq!(site.package, PackageId::phony());
        assert!(packages.get_opt(&package.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_repository_cascades_to_every_package_under_it() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let packages = Packages::new(kv.clone());

        let a = sample_package("a");
        let mut b = sample_package("b");
        b.id.name = "b".to_string();
        packages.create(&a).await.unwrap();
        packages.create(&b).await.unwrap();

        packages.delete_repository("gravitational").await.unwrap();

        assert!(packages.get_opt(&a.id).await.unwrap().is_none());
        assert!(packages.get_opt(&b.id).await.unwrap().is_none());
    }
}
