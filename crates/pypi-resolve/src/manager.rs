//! The stateful service mapping `Spec → Link → (version, hash, deps, info)`,
//! backed by the four persistent caches in [`crate::cache::CacheSet`] and an
//! in-memory unpack cache, invoking hooks at each extension point.
//!
//! Grounded on `examples/original_source/pypi2nix/package_manager.py`'s
//! `PackageManager` class.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::{canonical_key, CacheSet};
use crate::error::{ResolveCoreError, ResolveResult};
use crate::extractor::Package;
use crate::hooks::{HookPolicy, Override, OverrideConfig};
use crate::index::{pick_best_link, ArtifactStore, Index, Link};
use crate::introspect::Introspector;
use crate::rfc822::Rfc822;
use crate::spec::Spec;
use crate::version::Version;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedLink {
    link: Link,
    version: String,
}

/// `get_pkg_info` output: the raw PKG-INFO headers plus the has-tests flag
/// the source implementation bolts on alongside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkgInfo {
    pub headers: Rfc822,
    pub has_tests: bool,
}

pub struct PackageManager {
    caches: CacheSet,
    index: Arc<dyn Index>,
    artifacts: Arc<dyn ArtifactStore>,
    introspector: Arc<dyn Introspector>,
    hooks: Arc<dyn HookPolicy>,
    overrides: OverrideConfig,
    /// Archive path -> unpack dir, mirroring the source's `_extract_cache`;
    /// scoped to one process/resolve, not persisted to disk.
    extract_cache: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl PackageManager {
    pub fn new(
        caches: CacheSet,
        index: Arc<dyn Index>,
        artifacts: Arc<dyn ArtifactStore>,
        introspector: Arc<dyn Introspector>,
        hooks: Arc<dyn HookPolicy>,
        overrides: OverrideConfig,
    ) -> PackageManager {
        PackageManager {
            caches,
            index,
            artifacts,
            introspector,
            hooks,
            overrides,
            extract_cache: Mutex::new(HashMap::new()),
        }
    }

    fn override_for(&self, name: &str) -> Override {
        self.overrides.get(name)
    }

    fn override_key(ov: &Override) -> String {
        crate::cache::hashable_map(&serde_json::to_value(ov).unwrap_or_default())
    }

    /// `find_best_match(spec) → version`. Cache key is `(spec without
    /// extras, override)`, keyed in the shared link cache.
    pub async fn find_best_match(&self, spec: &Spec) -> ResolveResult<Version> {
        let no_extra = spec.no_extra();
        let ov = self.override_for(&spec.name);
        let key = canonical_key(&[&no_extra.to_string(), &Self::override_key(&ov)]);

        if let Some(cached) = self.caches.links.get::<CachedLink>(&key)? {
            tracing::debug!(name = %spec.name, "link cache hit");
            return cached
                .version
                .parse()
                .map_err(|_| ResolveCoreError::ParseError {
                    what: "cached version".to_string(),
                    detail: cached.version,
                });
        }

        let links = self.index.links_for(&spec.name).await?;
        let best = pick_best_link(&no_extra, &spec.name, &links, false)
            .or_else(|| pick_best_link(&no_extra, &spec.name, &links, true));
        let Some((mut version, mut link)) = best else {
            return Err(ResolveCoreError::NoPackageMatch {
                spec_line: spec.to_string(),
            });
        };

        let (hooked_link, version_hint) = self.hooks.link_hook(&ov, spec, link.clone());
        link = hooked_link;
        if let Some(hint) = version_hint.and_then(|h| h.parse().ok()) {
            version = hint;
        }

        // Preserve a pin that disagrees with the filename-derived version:
        // an Open Question decision (SPEC_FULL.md §9) carried forward from
        // the source's double-keying of the link cache.
        if let Some(pinned) = &spec.pinned {
            if pinned != &version {
                tracing::debug!(
                    name = %spec.name, filename_version = %version, pinned = %pinned,
                    "preferring spec's pinned version over filename-derived version"
                );
                version = pinned.clone();
            }
        }

        let record = CachedLink {
            link: link.clone(),
            version: version.to_string(),
        };
        self.caches.links.set(&key, &record)?;

        let pinned_key = canonical_key(&[&format!("{}-{}", no_extra.name, version)]);
        if self.caches.links.get::<CachedLink>(&pinned_key)?.is_none() {
            self.caches.links.set(&pinned_key, &record)?;
        }

        tracing::info!(name = %spec.name, %version, "picked best match");
        Ok(version)
    }

    /// `get_dependencies(name, version, extras) → [(spec, section)]`.
    pub async fn get_dependencies(
        &self,
        name: &str,
        version: &Version,
        extras: &IndexSet<String>,
    ) -> ResolveResult<Vec<(Spec, String)>> {
        let pinned = Spec {
            name: name.to_string(),
            extras: extras.clone(),
            preds: vec![],
            source: String::new(),
            pinned: Some(version.clone()),
        };
        let ov = self.override_for(name);
        let key = canonical_key(&[&pinned.fullname(), &Self::override_key(&ov)]);

        if let Some(deps) = self.caches.deps.get::<Vec<(Spec, String)>>(&key)? {
            tracing::debug!(%name, %version, "dependency cache hit");
            return Ok(deps);
        }

        let package = self.get_package_by_version(name, version).await?;
        let raw_deps = package.get_deps(extras, self.introspector.as_ref()).await?;
        let deps = self.hooks.dependency_hook(&ov, &pinned, raw_deps, &package);
        let deps: Vec<(Spec, String)> = deps
            .into_iter()
            .map(|(d, section)| (self.hooks.spec_hook(&self.override_for(&d.name), &d), section))
            .collect();

        self.caches.deps.set(&key, &deps)?;
        let links = package.get_dependency_links()?;
        self.caches
            .deps
            .set(&canonical_key(&[&key, "links"]), &links)?;

        Ok(deps)
    }

    /// `get_pkg_info(name, version) → pkginfo`.
    pub async fn get_pkg_info(&self, name: &str, version: &Version) -> ResolveResult<PkgInfo> {
        let key = format!("{name}-{version}");
        if let Some(info) = self.caches.pkg_info.get::<PkgInfo>(&key)? {
            tracing::debug!(%name, %version, "pkg-info cache hit");
            return Ok(info);
        }
        let package = self.get_package_by_version(name, version).await?;
        let headers = package.get_pkg_info(self.introspector.as_ref()).await?;
        let has_tests = package.has_tests(self.introspector.as_ref()).await.unwrap_or_else(|e| {
            tracing::warn!(%name, %version, error = %e, "setup-script introspection failed, assuming no tests");
            false
        });
        let info = PkgInfo { headers, has_tests };
        self.caches.pkg_info.set(&key, &info)?;
        Ok(info)
    }

    /// `get_hash(link) → (algo, digest)`.
    pub async fn get_hash(&self, link: &Link) -> ResolveResult<(String, String)> {
        if let Some(hash) = &link.hash {
            return Ok(hash.clone());
        }
        let path = self.artifacts.get_or_download(link).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| crate::index::FetchError::Io {
                url: link.url.clone(),
                source,
            })?;
        let digest = rattler_digest::compute_bytes_digest::<rattler_digest::Sha256>(&bytes);
        Ok(("sha256".to_string(), format!("{digest:x}")))
    }

    /// `get_link(name, version) → link`, assuming `find_best_match` already
    /// warmed the link cache for this pinned spec.
    pub async fn get_link(&self, name: &str, version: &Version) -> ResolveResult<Link> {
        let key = canonical_key(&[&format!("{name}-{version}")]);
        match self.caches.links.get::<CachedLink>(&key)? {
            Some(cached) => Ok(cached.link),
            None => {
                let spec = Spec {
                    name: name.to_string(),
                    extras: IndexSet::new(),
                    preds: vec![],
                    source: String::new(),
                    pinned: Some(version.clone()),
                }
                .pin_to(version);
                self.find_best_match(&spec).await?;
                self.get_link(name, version).await
            }
        }
    }

    /// `get_package(spec) → Package`: ensures the artifact is downloaded and
    /// unpacked, reusing an in-process unpack cache keyed by archive path.
    pub async fn get_package(&self, spec: &Spec) -> ResolveResult<Package> {
        let version = spec
            .pinned
            .clone()
            .unwrap_or(self.find_best_match(spec).await?);
        self.get_package_by_version(&spec.name, &version).await
    }

    async fn get_package_by_version(&self, name: &str, version: &Version) -> ResolveResult<Package> {
        let link = self.get_link(name, version).await?;
        let archive_path = self.artifacts.get_or_download(&link).await?;

        if let Some(cached_dir) = self.extract_cache.lock().get(&archive_path).cloned() {
            return Ok(Package::new(cached_dir, name, version.clone()));
        }

        let unpacked = self.artifacts.unpack(&archive_path).await?;
        self.extract_cache
            .lock()
            .insert(archive_path, unpacked.clone());
        Ok(Package::new(unpacked, name, version.clone()))
    }
}
