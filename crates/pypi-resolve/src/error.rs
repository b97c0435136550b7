//! The top-level error taxonomy. Subsystems (cache I/O, archive extraction,
//! HTTP) own smaller `thiserror` enums and are composed into
//! [`ResolveCoreError`] via `#[from]`/`#[source]`, the same layering the
//! teacher applies between `WheelBuildError`, `SDistError`, and the
//! `package_database`'s `NotCached`.

use miette::Diagnostic;
use thiserror::Error;

use crate::cache::CacheError;
use crate::extractor::ExtractError;
use crate::index::FetchError;

/// Every failure mode a resolve can surface, per SPEC_FULL.md §7.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveCoreError {
    #[error("failed to parse {what}: {detail}")]
    #[diagnostic(code(pypi_resolve::parse_error))]
    ParseError { what: String, detail: String },

    #[error("conflicting requirements for {names:?}: {source_a} conflicts with {source_b}")]
    #[diagnostic(code(pypi_resolve::conflict_error))]
    ConflictError {
        names: Vec<String>,
        source_a: String,
        source_b: String,
    },

    #[error("resolution did not converge for {unresolved:?}: {reason}")]
    #[diagnostic(code(pypi_resolve::resolve_error))]
    ResolveError {
        unresolved: Vec<String>,
        reason: String,
    },

    #[error("no package found matching {spec_line:?} (even allowing pre-releases)")]
    #[diagnostic(code(pypi_resolve::no_package_match))]
    NoPackageMatch { spec_line: String },

    #[error("failed to fetch artifact: {0}")]
    #[diagnostic(code(pypi_resolve::fetch_error))]
    FetchError(#[from] FetchError),

    #[error("failed to extract package: {0}")]
    #[diagnostic(code(pypi_resolve::extract_error))]
    ExtractError(#[from] ExtractError),

    #[error("cache error: {0}")]
    #[diagnostic(code(pypi_resolve::cache_error))]
    CacheError(#[from] CacheError),

    #[error("setup-script introspection failed: {0}")]
    #[diagnostic(code(pypi_resolve::introspection_failure), severity(warning))]
    IntrospectionFailure(String),
}

pub type ResolveResult<T> = Result<T, ResolveCoreError>;
