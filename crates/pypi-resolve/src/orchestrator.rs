//! Component G: the outer driver that turns `(specs, external versions,
//! overrides)` into a resolved package graph, then breaks cycles in it.
//!
//! Grounded on `examples/original_source/pypi2nix/package_resolver.py`'s
//! `PackageResolver.resolve`/`_remove_circular_deps`.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::cache::CacheSet;
use crate::constraints::{parse_buildout, parse_requirements, render_template, ConstraintError};
use crate::error::{ResolveCoreError, ResolveResult};
use crate::hooks::{ConfiguredHooks, HookPolicy, Override, OverrideConfig, TestProfile};
use crate::index::{ArtifactStore, Index};
use crate::introspect::Introspector;
use crate::manager::PackageManager;
use crate::output::{PackageMeta, ResolveOutput, ResolvedPackage, SrcInfo};
use crate::resolver;
use crate::spec::Spec;
use crate::spec_set::SpecSet;

/// The collaborators a resolve needs, assembled once by the caller (CLI or
/// test harness) and reused across environments.
pub struct Orchestrator {
    index: Arc<dyn Index>,
    artifacts: Arc<dyn ArtifactStore>,
    introspector: Arc<dyn Introspector>,
    http: reqwest::Client,
    pub test_profile: TestProfile,
    pub remove_circular_deps: bool,
}

impl Orchestrator {
    pub fn new(
        index: Arc<dyn Index>,
        artifacts: Arc<dyn ArtifactStore>,
        introspector: Arc<dyn Introspector>,
        http: reqwest::Client,
        test_profile: TestProfile,
        remove_circular_deps: bool,
    ) -> Orchestrator {
        Orchestrator {
            index,
            artifacts,
            introspector,
            http,
            test_profile,
            remove_circular_deps,
        }
    }

    /// Run one full resolve for one environment: build the initial
    /// `SpecSet`, expand external pins, run the fixed-point resolver, build
    /// the output graph, then break cycles.
    pub async fn resolve(
        &self,
        caches: CacheSet,
        target_specs: Vec<Spec>,
        mut overrides: IndexMap<String, Override>,
        external_versions: Vec<String>,
    ) -> ResolveResult<ResolveOutput> {
        let mut spec_set = SpecSet::new();
        let mut tlp = Vec::new();

        for spec in &target_specs {
            spec_set.add(spec.clone());
            overrides.entry(spec.name.clone()).or_default().tlp = true;
            tlp.push(spec.name.clone());
        }

        for pinned in self.expand_versions(&external_versions, None).await? {
            spec_set.add(pinned);
        }

        // Per-name `versions` overrides are additional external pins, scoped
        // to the package they're attached to.
        for (name, ov) in &overrides {
            if ov.versions.is_empty() {
                continue;
            }
            let template_spec = Spec::new(name.clone(), "overrides");
            for pinned in self.expand_versions(&ov.versions, Some(&template_spec)).await? {
                spec_set.add(pinned);
            }
        }

        let override_config = OverrideConfig::from_map(overrides);
        let hooks: Arc<dyn HookPolicy> = Arc::new(ConfiguredHooks);
        let manager = PackageManager::new(
            caches,
            self.index.clone(),
            self.artifacts.clone(),
            self.introspector.clone(),
            hooks,
            override_config,
        );

        tracing::info!("normalizing requirements");
        spec_set = spec_set.normalize()?;

        tracing::info!("resolving full tree");
        let pinned = resolver::resolve(&manager, spec_set).await?;

        tracing::info!("generating output");
        let mut pkg_map: IndexMap<String, ResolvedPackage> = IndexMap::new();
        for name in pinned.names() {
            let spec = &pinned.get(name)[0];
            let version = spec
                .pinned
                .clone()
                .expect("resolver output must be fully pinned");

            manager.find_best_match(spec).await?;
            let pkg_info = manager.get_pkg_info(&spec.name, &version).await?;
            let link = manager.get_link(&spec.name, &version).await?;
            let hash = manager.get_hash(&link).await?;
            let is_tlp = tlp.iter().any(|n| n == &spec.name);
            let has_tests = pkg_info.has_tests
                && match self.test_profile {
                    TestProfile::All => true,
                    TestProfile::TopLevel => is_tlp,
                    TestProfile::None => false,
                };

            let mut deps = Vec::new();
            let mut extra: std::collections::BTreeMap<String, Vec<String>> =
                std::collections::BTreeMap::new();
            for (dep, section) in manager
                .get_dependencies(&spec.name, &version, &spec.extras)
                .await?
            {
                if !self.test_profile.keep_section(&section, is_tlp) {
                    continue;
                }
                let dep_pinned = pinned.get(&dep.name).first().cloned();
                let Some(dep_pinned) = dep_pinned else {
                    continue;
                };
                if dep_pinned.fullname() == spec.fullname() {
                    continue;
                }
                if section == "None" {
                    deps.push(dep_pinned.fullname());
                } else {
                    extra.entry(section).or_default().push(dep_pinned.fullname());
                }
            }

            pkg_map.insert(
                spec.fullname(),
                ResolvedPackage {
                    name: spec.name.clone(),
                    version: version.to_string(),
                    fullname: spec.fullname(),
                    src: SrcInfo {
                        url: link.url.clone(),
                        algo: hash.0,
                        sum: hash.1,
                    },
                    deps,
                    extra,
                    meta: PackageMeta {
                        homepage: pkg_info.headers.maybe_take("Home-page").ok().flatten(),
                    },
                    has_tests,
                    has_circular_deps: false,
                },
            );
        }

        let roots: IndexMap<String, String> = target_specs
            .iter()
            .filter_map(|spec| {
                let resolved = pinned.get(&spec.name).first()?;
                Some((spec.name.clone(), resolved.fullname()))
            })
            .collect();

        if self.remove_circular_deps {
            let mut checked = HashSet::new();
            for fullname in roots.values() {
                remove_circular_deps(&mut pkg_map, fullname, &mut Vec::new(), &mut checked);
            }
        }

        Ok(ResolveOutput { pkg_map, roots })
    }

    /// Expand one `versions` list (either literal pinned requirement lines,
    /// or `http(s)://` URLs to `requirements.txt`/buildout `.cfg` documents)
    /// into concrete pinned [`Spec`]s. Mirrors `_parse_versions`, narrowed to
    /// the schemes this crate's network layer can fetch (`file://` relative
    /// to an unpacked package is not supported — see DESIGN.md).
    async fn expand_versions(&self, lines: &[String], spec: Option<&Spec>) -> ResolveResult<Vec<Spec>> {
        let mut out = Vec::new();
        for line in lines {
            let rendered = render_template(line, spec);
            if !rendered.starts_with("http://") && !rendered.starts_with("https://") {
                let parsed = Spec::parse(&rendered, "overrides").map_err(|e| ResolveCoreError::ParseError {
                    what: "external version line".to_string(),
                    detail: e.to_string(),
                })?;
                out.push(parsed);
                continue;
            }
            out.extend(self.expand_versions_url(&rendered).await?);
        }
        Ok(out)
    }

    fn expand_versions_url<'a>(
        &'a self,
        url: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ResolveResult<Vec<Spec>>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(%url, "fetching external constraint file");
            let body = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|source| crate::index::FetchError::Http {
                    url: url.to_string(),
                    source,
                })?
                .text()
                .await
                .map_err(|source| crate::index::FetchError::Http {
                    url: url.to_string(),
                    source,
                })?;

            if url.ends_with(".cfg") {
                let cfg = parse_buildout(&body).map_err(constraint_err)?;
                let mut out = Vec::with_capacity(cfg.pins.len());
                for (name, version) in cfg.pins {
                    out.push(
                        Spec::parse(&format!("{name}=={version}"), "overrides")
                            .map_err(|e| ResolveCoreError::ParseError {
                                what: "external version pin".to_string(),
                                detail: e.to_string(),
                            })?,
                    );
                }
                for extends_url in cfg.extends {
                    let resolved = resolve_relative(url, &extends_url);
                    out.extend(self.expand_versions_url(&resolved).await?);
                }
                Ok(out)
            } else {
                parse_requirements(&body, "overrides").map_err(constraint_err)
            }
        })
    }
}

fn constraint_err(e: ConstraintError) -> ResolveCoreError {
    ResolveCoreError::ParseError {
        what: "constraint file".to_string(),
        detail: e.to_string(),
    }
}

fn resolve_relative(base: &str, reference: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(reference)) {
        Ok(joined) => joined.to_string(),
        Err(_) => reference.to_string(),
    }
}

/// Depth-first cycle-breaking over the already-built output graph: an edge
/// to a name already on the current path is dropped, and the node that
/// dropped it is flagged. Self-referential deps never occur here since
/// `resolve` already skips them while building `pkg_map`.
fn remove_circular_deps(
    pkg_map: &mut IndexMap<String, ResolvedPackage>,
    fullname: &str,
    visited: &mut Vec<String>,
    checked: &mut HashSet<String>,
) {
    if checked.contains(fullname) {
        return;
    }
    let Some(pkg) = pkg_map.get(fullname) else {
        return;
    };
    let deps = pkg.deps.clone();
    let extra = pkg.extra.clone();

    visited.push(fullname.to_string());

    let mut new_deps = Vec::with_capacity(deps.len());
    for dep in deps.iter() {
        if visited.contains(dep) {
            continue;
        }
        remove_circular_deps(pkg_map, dep, visited, checked);
        new_deps.push(dep.clone());
    }

    let mut new_extra = std::collections::BTreeMap::new();
    for (section, section_deps) in extra.iter() {
        let mut kept = Vec::with_capacity(section_deps.len());
        for dep in section_deps.iter() {
            if visited.contains(dep) {
                continue;
            }
            remove_circular_deps(pkg_map, dep, visited, checked);
            kept.push(dep.clone());
        }
        new_extra.insert(section.clone(), kept);
    }

    visited.pop();

    let pkg = pkg_map.get_mut(fullname).expect("looked up above");
    if pkg.deps != new_deps || pkg.extra != new_extra {
        tracing::info!(%fullname, "circular dependency detected, dropping back-edge");
        pkg.has_circular_deps = true;
        pkg.deps = new_deps;
        pkg.extra = new_extra;
    }
    checked.insert(fullname.to_string());
}
