//! Given an unpacked sdist directory, recovers declared name/version,
//! per-section dependency rows, dependency-links, descriptive metadata, and
//! the has-tests flag (SPEC_FULL.md §4.4).
//!
//! Grounded on `examples/original_source/pypi2nix/package_manager.py`'s
//! `Package` class: egg-info `requires.txt` parsing, the `setup.py`
//! introspection fallback, and the `--help-commands` has-tests probe.

use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use thiserror::Error;

use crate::introspect::{IntrospectError, Introspector};
use crate::rfc822::{Rfc822, Rfc822Error};
use crate::spec::{ParseSpecError, Spec};
use crate::version::Version;

/// Section tag for a dependency row that belongs to no extra — pypi2nix's
/// own sentinel, carried through unchanged so it round-trips through
/// [`crate::hooks::TestProfile`] and cache keys without a `None` variant
/// needing special-casing everywhere.
pub const BASE_SECTION: &str = "None";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("i/o error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PKG-INFO not found for {name}")]
    MissingPkgInfo { name: String },
    #[error("malformed PKG-INFO for {name}: {source}")]
    MalformedPkgInfo {
        name: String,
        #[source]
        source: Rfc822Error,
    },
    #[error("malformed requirement {0:?} in requires.txt: {1}")]
    MalformedRequirement(String, ParseSpecError),
    #[error(transparent)]
    Introspect(#[from] IntrospectError),
}

/// The result of unpacking and inspecting a single sdist.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: Version,
    pub dist_dir: PathBuf,
}

impl Package {
    pub fn new(dist_dir: PathBuf, name: impl Into<String>, version: Version) -> Package {
        Package {
            dist_dir,
            name: name.into(),
            version,
        }
    }

    /// Locate `{name}.egg-info/` (hyphens/underscores folded, case
    /// insensitive) anywhere under the unpack directory, requiring it to
    /// contain a `PKG-INFO` file.
    fn egg_info_dir(&self) -> Option<PathBuf> {
        find_egg_info_dir(&self.dist_dir, &self.name)
    }

    /// As [`Self::egg_info_dir`], but if no egg-info is present yet, first
    /// asks the introspector to generate one (`setup.py egg_info`). A
    /// non-zero exit, or a spawn failure, is treated as "no egg-info" —
    /// the generation step persists to disk, so later calls on the same
    /// unpack directory find it without invoking the introspector again.
    async fn ensure_egg_info_dir(&self, introspector: &dyn Introspector) -> Option<PathBuf> {
        if let Some(dir) = self.egg_info_dir() {
            return Some(dir);
        }
        match introspector.run_egg_info(&self.dist_dir).await {
            Ok(true) => self.egg_info_dir(),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(name = %self.name, error = %e, "egg_info generation failed, assuming no egg-info");
                None
            }
        }
    }

    /// Declared dependencies, grouped by section: `BASE_SECTION` for the
    /// unconditional base requirements, an extra's own name for its
    /// requirements, or one of `_tests_require`/`_setup_requires`/
    /// `_test_suite` for the setup.py-introspection-derived rows.
    pub async fn get_deps(
        &self,
        extras: &IndexSet<String>,
        introspector: &dyn Introspector,
    ) -> Result<Vec<(Spec, String)>, ExtractError> {
        let egg_info = self.ensure_egg_info_dir(introspector).await;
        let mut rows = self.read_requires_txt_at(egg_info.as_deref(), extras)?;

        let setup_args = introspector.setup_arguments(&self.dist_dir).await?;

        if rows.is_empty() {
            if let Some(args) = &setup_args {
                for line in args.install_requires.iter().chain(args.requires.iter()) {
                    rows.push((line.clone(), BASE_SECTION.to_string()));
                }
            }
        }

        if let Some(args) = &setup_args {
            for line in &args.tests_require {
                rows.push((line.clone(), "_tests_require".to_string()));
            }
            for line in &args.setup_requires {
                rows.push((line.clone(), "_setup_requires".to_string()));
            }
            let uses_nose = args
                .test_suite
                .as_deref()
                .map(|s| s.contains("nose.collector"))
                .unwrap_or(false);
            if uses_nose && self.name != "nose" {
                rows.push(("nose".to_string(), "_test_suite".to_string()));
            }
        }

        rows.into_iter()
            .map(|(line, section)| {
                Spec::parse(&line, format!("{}-{}:{}", self.name, self.version, section))
                    .map(|spec| (spec, section))
                    .map_err(|e| ExtractError::MalformedRequirement(line, e))
            })
            .collect()
    }

    /// Read `requires.txt` section by section, keeping the base (no-header)
    /// section and any section whose name is in `extras`. Returns an empty
    /// vec if there's no egg-info or no `requires.txt` — the caller then
    /// falls back to setup.py introspection.
    fn read_requires_txt_at(
        &self,
        egg_info: Option<&Path>,
        extras: &IndexSet<String>,
    ) -> Result<Vec<(String, String)>, ExtractError> {
        let Some(egg_info) = egg_info else {
            return Ok(Vec::new());
        };
        let requires_path = egg_info.join("requires.txt");
        let contents = match std::fs::read_to_string(&requires_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ExtractError::Io {
                    path: requires_path,
                    source,
                })
            }
        };

        let mut rows = Vec::new();
        let mut section = BASE_SECTION.to_string();
        let mut skip_section = false;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.to_string();
                skip_section = !extras.contains(name);
                continue;
            }
            if !skip_section {
                rows.push((line.to_string(), section.clone()));
            }
        }
        Ok(rows)
    }

    /// Parse the `PKG-INFO` header file. Missing is a hard error, per spec.
    pub async fn get_pkg_info(&self, introspector: &dyn Introspector) -> Result<Rfc822, ExtractError> {
        let dir = self
            .ensure_egg_info_dir(introspector)
            .await
            .unwrap_or_else(|| self.dist_dir.clone());
        let path = dir.join("PKG-INFO");
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractError::MissingPkgInfo {
                    name: self.name.clone(),
                })
            }
            Err(source) => return Err(ExtractError::Io { path, source }),
        };
        Rfc822::parse(&contents).map_err(|source| ExtractError::MalformedPkgInfo {
            name: self.name.clone(),
            source,
        })
    }

    /// `dependency_links.txt`, if present under egg-info.
    pub fn get_dependency_links(&self) -> Result<Vec<String>, ExtractError> {
        // Only consults egg-info already on disk: by the time this is
        // called (after `get_deps`), `ensure_egg_info_dir` has already run
        // if generation was possible.
        let Some(egg_info) = self.egg_info_dir() else {
            return Ok(Vec::new());
        };
        let path = egg_info.join("dependency_links.txt");
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(ExtractError::Io { path, source }),
        }
    }

    /// True iff `setup.py --help-commands` mentions `test`. A subprocess
    /// failure is treated as "has tests" by the source implementation
    /// (err on the side of not silently dropping a test section); this
    /// crate instead surfaces the failure as [`ExtractError::Introspect`]
    /// and leaves the soft-fallback decision to the caller, which maps it
    /// to `IntrospectionFailure` and a `tracing::warn!` per SPEC_FULL.md §7.
    pub async fn has_tests(&self, introspector: &dyn Introspector) -> Result<bool, ExtractError> {
        Ok(introspector.has_test_command(&self.dist_dir).await?)
    }
}

fn find_egg_info_dir(dist_dir: &Path, name: &str) -> Option<PathBuf> {
    let target = format!("{}.egg-info", name.replace('-', "_")).to_ascii_lowercase();
    let mut stack = vec![dist_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let matches = path
                .file_name()
                .map(|f| f.to_string_lossy().to_ascii_lowercase() == target)
                .unwrap_or(false);
            if matches && path.join("PKG-INFO").is_file() {
                return Some(path);
            }
            stack.push(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn finds_egg_info_with_underscore_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let egg_info = dir.path().join("my_pkg.egg-info");
        write(&egg_info.join("PKG-INFO"), "Name: my-pkg\nVersion: 1.0\n");
        let found = find_egg_info_dir(dir.path(), "my-pkg").unwrap();
        assert_eq!(found, egg_info);
    }

    #[test]
    fn reads_requires_txt_sections() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = Package::new(dir.path().to_path_buf(), "sentry", Version::from_str("7.0").unwrap());
        let egg_info = dir.path().join("sentry.egg-info");
        write(
            &egg_info.join("requires.txt"),
            "django>=1.5\n\n[postgres]\npsycopg2\n\n[mysql]\nmysqlclient\n",
        );
        write(&egg_info.join("PKG-INFO"), "Name: sentry\nVersion: 7.0\n");

        let mut extras = IndexSet::new();
        extras.insert("postgres".to_string());
        let rows = pkg.read_requires_txt_at(Some(&egg_info), &extras).unwrap();
        assert_eq!(
            rows,
            vec![
                ("django>=1.5".to_string(), BASE_SECTION.to_string()),
                ("psycopg2".to_string(), "postgres".to_string()),
            ]
        );
    }

    struct NoEggInfoIntrospector;

    #[async_trait::async_trait]
    impl Introspector for NoEggInfoIntrospector {
        async fn setup_arguments(
            &self,
            _dist_dir: &Path,
        ) -> Result<Option<crate::introspect::SetupArguments>, IntrospectError> {
            Ok(None)
        }
        async fn has_test_command(&self, _dist_dir: &Path) -> Result<bool, IntrospectError> {
            Ok(false)
        }
        async fn run_egg_info(&self, _dist_dir: &Path) -> Result<bool, IntrospectError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn missing_pkg_info_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = Package::new(dir.path().to_path_buf(), "foo", Version::from_str("1.0").unwrap());
        assert!(matches!(
            pkg.get_pkg_info(&NoEggInfoIntrospector).await,
            Err(ExtractError::MissingPkgInfo { .. })
        ));
    }
}
