//! Isolation boundary around the one genuinely external, opaque step this
//! crate performs: running a package's `setup.py` in a subprocess to recover
//! the arguments it would have passed to `setuptools.setup`/
//! `distutils.core.setup`, for packages that ship no `egg-info`.
//!
//! Grounded on `examples/original_source/pypi2nix/package_manager.py`'s
//! `_get_package_setup_arguments` (the monkeypatch-and-dump-JSON technique)
//! and on `rattler_installs_packages/src/wheel_builder/build_environment.rs`'s
//! `include_str!`-embedded-script-plus-subprocess idiom; this crate does not
//! attempt to reimplement `setuptools`/`distutils` in-process.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

const SETUP_INTROSPECTION_STUB: &str = include_str!("setup_introspection_stub.py");
const SENTINEL: &str = "#**#";

#[derive(Debug, Error)]
pub enum IntrospectError {
    #[error("could not spawn {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },
    #[error("setup.py exited with status {0}")]
    NonZeroExit(std::process::ExitStatus),
    #[error("could not parse introspection output as JSON: {0}")]
    MalformedOutput(#[from] serde_json::Error),
    #[error("sentinel markers not found in introspection output")]
    MissingSentinel,
}

/// The subset of `setup()` keyword arguments SPEC_FULL.md §4.4 needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupArguments {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub install_requires: Vec<String>,
    #[serde(default)]
    pub setup_requires: Vec<String>,
    #[serde(default)]
    pub tests_require: Vec<String>,
    pub test_suite: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Isolates the two subprocess calls `get_deps`/`has_tests` fall back to,
/// so tests can substitute a scripted fake instead of actually invoking
/// Python (SPEC_FULL.md §4.15, design note in spec §9).
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Run the package's `setup.py` with the setup-call shimmed to dump its
    /// arguments as JSON. Returns `None` if the package has no `setup.py` at
    /// all (distinguished from a hard failure).
    async fn setup_arguments(&self, dist_dir: &Path) -> Result<Option<SetupArguments>, IntrospectError>;

    /// Run `setup.py --help-commands` and report whether the literal token
    /// `test` appears in its output.
    async fn has_test_command(&self, dist_dir: &Path) -> Result<bool, IntrospectError>;

    /// Run `setup.py egg_info`, reporting whether it succeeded.
    async fn run_egg_info(&self, dist_dir: &Path) -> Result<bool, IntrospectError>;
}

/// Invokes a real Python interpreter as a subprocess.
pub struct SubprocessIntrospector {
    pub python: String,
}

impl SubprocessIntrospector {
    pub fn new(python: impl Into<String>) -> SubprocessIntrospector {
        SubprocessIntrospector {
            python: python.into(),
        }
    }
}

impl Default for SubprocessIntrospector {
    fn default() -> Self {
        SubprocessIntrospector::new("python3")
    }
}

#[async_trait]
impl Introspector for SubprocessIntrospector {
    async fn setup_arguments(&self, dist_dir: &Path) -> Result<Option<SetupArguments>, IntrospectError> {
        if !dist_dir.join("setup.py").is_file() {
            return Ok(None);
        }
        let output = Command::new(&self.python)
            .arg("-c")
            .arg(SETUP_INTROSPECTION_STUB)
            .current_dir(dist_dir)
            .output()
            .await
            .map_err(|source| IntrospectError::Spawn {
                interpreter: self.python.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(IntrospectError::NonZeroExit(output.status));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let json = stdout
            .split(SENTINEL)
            .nth(1)
            .ok_or(IntrospectError::MissingSentinel)?;
        Ok(Some(serde_json::from_str(json)?))
    }

    async fn has_test_command(&self, dist_dir: &Path) -> Result<bool, IntrospectError> {
        let output = Command::new(&self.python)
            .arg("setup.py")
            .arg("--help-commands")
            .current_dir(dist_dir)
            .output()
            .await
            .map_err(|source| IntrospectError::Spawn {
                interpreter: self.python.clone(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&output.stdout).contains("test"))
    }

    async fn run_egg_info(&self, dist_dir: &Path) -> Result<bool, IntrospectError> {
        let status = Command::new(&self.python)
            .arg("setup.py")
            .arg("egg_info")
            .current_dir(dist_dir)
            .status()
            .await
            .map_err(|source| IntrospectError::Spawn {
                interpreter: self.python.clone(),
                source,
            })?;
        Ok(status.success())
    }
}
