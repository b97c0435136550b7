//! The hook/override policy surface (SPEC_FULL.md §4.10). A closed,
//! enumerated set of knobs — not a general escape hatch — modeled as a
//! small trait whose default implementation is identity, per the "hook as
//! policy" design note.
//!
//! Grounded on `examples/original_source/pypi2nix/package_resolver.py`'s
//! `_link_hook`/`_dependency_hook`/`_spec_hook`.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::extractor::Package;
use crate::index::Link;
use crate::spec::Spec;

/// The override record for a single package name, as parsed from the
/// caller-supplied JSON (`overrides[name]`, or the `override` shorthand
/// folded into it by the orchestrator).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Override {
    pub src: Option<String>,
    pub append_deps: Vec<String>,
    pub new_deps: Option<Vec<String>>,
    pub replace_deps: BTreeMap<String, String>,
    pub remove_deps: Vec<String>,
    pub versions: Vec<String>,
    pub spec: Option<String>,
    /// Internal: set by the orchestrator, not accepted from caller JSON.
    #[serde(skip)]
    pub tlp: bool,
}

/// Parsed `overrides{}` map from a `ResolveRequest`, keyed by package name.
#[derive(Debug, Clone, Default)]
pub struct OverrideConfig {
    by_name: IndexMap<String, Override>,
}

impl OverrideConfig {
    pub fn from_map(overrides: IndexMap<String, Override>) -> OverrideConfig {
        OverrideConfig { by_name: overrides }
    }

    pub fn get(&self, name: &str) -> Override {
        self.by_name.get(name).cloned().unwrap_or_default()
    }

    pub fn mark_top_level(&mut self, name: &str) {
        self.by_name.entry(name.to_string()).or_default().tlp = true;
    }
}

/// One method per hook in SPEC_FULL.md §4.10; the default implementation
/// (used when an override record has no entry for the relevant key) is
/// identity.
pub trait HookPolicy: Send + Sync {
    /// `(override, spec, link) -> (link', version_hint?)`. Rewrites the
    /// artifact link the index chose, e.g. to point at a mirror.
    fn link_hook(&self, ov: &Override, spec: &Spec, link: Link) -> (Link, Option<String>) {
        match &ov.src {
            Some(template) => {
                let url = template.replace("{spec.name}", &spec.name).replace(
                    "{spec.pinned}",
                    &spec
                        .pinned
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
                let filename = url.rsplit('/').next().unwrap_or(&url).to_string();
                (
                    Link {
                        url,
                        filename,
                        hash: None,
                        egg_fragment: link.egg_fragment,
                    },
                    None,
                )
            }
            None => (link, None),
        }
    }

    /// `(override, spec, deps, package) -> deps'`. Rewrites the declared
    /// dependency list before it re-enters the resolver.
    fn dependency_hook(
        &self,
        ov: &Override,
        _spec: &Spec,
        deps: Vec<(Spec, String)>,
        _package: &Package,
    ) -> Vec<(Spec, String)> {
        let mut deps = if let Some(new_deps) = &ov.new_deps {
            new_deps
                .iter()
                .filter_map(|line| Spec::parse(line, "override:new_deps").ok())
                .map(|s| (s, "None".to_string()))
                .collect()
        } else {
            deps
        };

        if !ov.remove_deps.is_empty() {
            deps.retain(|(d, _)| !ov.remove_deps.iter().any(|n| n == &d.name));
        }

        if !ov.replace_deps.is_empty() {
            for (d, _section) in deps.iter_mut() {
                if let Some(line) = ov.replace_deps.get(&d.name) {
                    if let Ok(replacement) = Spec::parse(line, "override:replace_deps") {
                        *d = replacement;
                    }
                }
            }
        }

        for line in &ov.append_deps {
            if let Ok(extra) = Spec::parse(line, "override:append_deps") {
                deps.push((extra, "None".to_string()));
            }
        }

        deps
    }

    /// `(override, spec) -> spec'`. Replaces a dependency's identity
    /// wholesale, preserving extras/preds the replacement line omits.
    fn spec_hook(&self, ov: &Override, spec: &Spec) -> Spec {
        match &ov.spec {
            None => spec.clone(),
            Some(line) => match Spec::parse(line, spec.source.clone()) {
                Ok(mut replacement) => {
                    if replacement.extras.is_empty() {
                        replacement.extras = spec.extras.clone();
                    }
                    if replacement.preds.is_empty() {
                        replacement.preds = spec.preds.clone();
                        replacement.refresh_pinned();
                    }
                    replacement
                }
                Err(_) => spec.clone(),
            },
        }
    }
}

/// The hook policy driven entirely by the parsed override JSON — no
/// additional behavior beyond what [`HookPolicy`]'s default methods already
/// implement from the `Override` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfiguredHooks;

impl HookPolicy for ConfiguredHooks {}

/// `test_profile` from SPEC_FULL.md §4.11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestProfile {
    #[default]
    None,
    TopLevel,
    All,
}

impl TestProfile {
    const TEST_SECTIONS: &'static [&'static str] = &["_tests_require", "_test_suite", "testing"];

    /// Whether a dependency row tagged `section` should be kept for a node
    /// whose top-level status is `is_tlp`.
    pub fn keep_section(&self, section: &str, is_tlp: bool) -> bool {
        if !Self::TEST_SECTIONS.contains(&section) {
            return true;
        }
        match self {
            TestProfile::All => true,
            TestProfile::TopLevel => is_tlp,
            TestProfile::None => false,
        }
    }
}
