//! The result shape a resolve produces (SPEC_FULL.md §3, §6): a flat map of
//! every resolved package keyed by fullname, plus which fullname each
//! requested root ended up pinned to.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrcInfo {
    pub url: String,
    pub algo: String,
    pub sum: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageMeta {
    pub homepage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub fullname: String,
    pub src: SrcInfo,
    pub deps: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
    pub meta: PackageMeta,
    pub has_tests: bool,
    pub has_circular_deps: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveOutput {
    pub pkg_map: IndexMap<String, ResolvedPackage>,
    pub roots: IndexMap<String, String>,
}
