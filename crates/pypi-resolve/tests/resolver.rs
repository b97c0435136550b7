//! End-to-end resolves against in-memory fakes, covering the scenarios a
//! real PyPI index and a real subprocess interpreter would otherwise be
//! needed for.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use pypi_resolve::cache::CacheSet;
use pypi_resolve::error::ResolveCoreError;
use pypi_resolve::hooks::{Override, TestProfile};
use pypi_resolve::index::{ArtifactStore, FetchError, Index, Link};
use pypi_resolve::introspect::{IntrospectError, Introspector, SetupArguments};
use pypi_resolve::orchestrator::Orchestrator;
use pypi_resolve::spec::Spec;

struct FakeIndex {
    links: HashMap<String, Vec<Link>>,
}

#[async_trait]
impl Index for FakeIndex {
    async fn links_for(&self, name: &str) -> Result<Vec<Link>, FetchError> {
        Ok(self.links.get(name).cloned().unwrap_or_default())
    }
}

struct FakeArtifactStore {
    root: PathBuf,
    dirs: Mutex<HashMap<String, PathBuf>>,
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn get_or_download(&self, link: &Link) -> Result<PathBuf, FetchError> {
        let path = self.root.join(&link.filename);
        std::fs::write(&path, link.filename.as_bytes()).map_err(|source| FetchError::Io {
            url: link.url.clone(),
            source,
        })?;
        Ok(path)
    }

    async fn unpack(&self, path: &Path) -> Result<PathBuf, FetchError> {
        let filename = path.file_name().unwrap().to_string_lossy().to_string();
        let stem = filename.strip_suffix(".tar.gz").unwrap_or(&filename);
        self.dirs
            .lock()
            .get(stem)
            .cloned()
            .ok_or_else(|| FetchError::UnsupportedArchive { filename })
    }
}

struct FakeIntrospector;

#[async_trait]
impl Introspector for FakeIntrospector {
    async fn setup_arguments(&self, _dist_dir: &Path) -> Result<Option<SetupArguments>, IntrospectError> {
        Ok(None)
    }
    async fn has_test_command(&self, _dist_dir: &Path) -> Result<bool, IntrospectError> {
        Ok(false)
    }
    async fn run_egg_info(&self, _dist_dir: &Path) -> Result<bool, IntrospectError> {
        Ok(false)
    }
}

struct Fixture {
    _root: tempfile::TempDir,
    links: HashMap<String, Vec<Link>>,
    dirs: HashMap<String, PathBuf>,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture {
            _root: tempfile::tempdir().unwrap(),
            links: HashMap::new(),
            dirs: HashMap::new(),
        }
    }

    fn add(&mut self, name: &str, version: &str, base_deps: &[&str], extra_sections: &[(&str, &[&str])]) {
        let dist_dir = tempfile::tempdir().unwrap().into_path();
        let egg_info = dist_dir.join(format!("{name}.egg-info"));
        std::fs::create_dir_all(&egg_info).unwrap();
        std::fs::write(
            egg_info.join("PKG-INFO"),
            format!("Name: {name}\nVersion: {version}\nHome-page: https://example.invalid/{name}\n"),
        )
        .unwrap();

        let mut requires = String::new();
        for dep in base_deps {
            requires.push_str(dep);
            requires.push('\n');
        }
        for (section, deps) in extra_sections {
            requires.push_str(&format!("\n[{section}]\n"));
            for dep in *deps {
                requires.push_str(dep);
                requires.push('\n');
            }
        }
        std::fs::write(egg_info.join("requires.txt"), requires).unwrap();

        let stem = format!("{name}-{version}");
        let filename = format!("{stem}.tar.gz");
        self.links.entry(name.to_string()).or_default().push(Link {
            url: format!("https://index.invalid/{filename}"),
            filename,
            hash: None,
            egg_fragment: None,
        });
        self.dirs.insert(stem, dist_dir);
    }

    fn orchestrator(self) -> (Orchestrator, tempfile::TempDir) {
        let download_root = tempfile::tempdir().unwrap();
        let index = Arc::new(FakeIndex { links: self.links });
        let artifacts = Arc::new(FakeArtifactStore {
            root: download_root.path().to_path_buf(),
            dirs: Mutex::new(self.dirs),
        });
        let introspector = Arc::new(FakeIntrospector);
        let orchestrator = Orchestrator::new(
            index,
            artifacts,
            introspector,
            reqwest::Client::new(),
            TestProfile::TopLevel,
            true,
        );
        (orchestrator, download_root)
    }
}

fn caches() -> (CacheSet, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (CacheSet::open(dir.path(), "test"), dir)
}

#[tokio::test]
async fn simple_transitive_closure() {
    let mut fx = Fixture::new();
    fx.add("foo", "1.0", &["bar>=0.5"], &[]);
    fx.add("bar", "0.7", &[], &[]);
    let (orchestrator, _dl) = fx.orchestrator();
    let (caches, _cache_dir) = caches();

    let specs = vec![Spec::parse("foo", "top").unwrap()];
    let out = orchestrator
        .resolve(caches, specs, IndexMap::new(), vec![])
        .await
        .unwrap();

    assert_eq!(out.roots.get("foo").unwrap(), "foo-1.0");
    assert!(out.pkg_map.contains_key("foo-1.0"));
    assert!(out.pkg_map.contains_key("bar-0.7"));
    assert_eq!(out.pkg_map["foo-1.0"].deps, vec!["bar-0.7".to_string()]);
}

#[tokio::test]
async fn external_pin_overrides_index_pick() {
    let mut fx = Fixture::new();
    fx.add("foo", "1.0", &["bar>=0.5"], &[]);
    fx.add("bar", "0.7", &[], &[]);
    fx.add("bar", "0.5", &[], &[]);
    let (orchestrator, _dl) = fx.orchestrator();
    let (caches, _cache_dir) = caches();

    let specs = vec![Spec::parse("foo", "top").unwrap()];
    let out = orchestrator
        .resolve(caches, specs, IndexMap::new(), vec!["bar==0.5".to_string()])
        .await
        .unwrap();

    assert!(out.pkg_map.contains_key("bar-0.5"));
    assert!(!out.pkg_map.contains_key("bar-0.7"));
}

#[tokio::test]
async fn conflicting_requirements_raise_conflict_error() {
    let mut fx = Fixture::new();
    fx.add("foo", "1.0", &["bar>=0.5"], &[]);
    fx.add("bar", "0.7", &[], &[]);
    let (orchestrator, _dl) = fx.orchestrator();
    let (caches, _cache_dir) = caches();

    let specs = vec![
        Spec::parse("foo", "top").unwrap(),
        Spec::parse("bar<0.5", "top").unwrap(),
    ];
    let err = orchestrator
        .resolve(caches, specs, IndexMap::new(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveCoreError::ConflictError { .. }));
}

#[tokio::test]
async fn extras_pull_in_extra_section_deps() {
    let mut fx = Fixture::new();
    fx.add(
        "sentry",
        "7.0",
        &["django>=1.5"],
        &[("postgres", &["psycopg2"])],
    );
    fx.add("django", "1.5.0", &[], &[]);
    fx.add("psycopg2", "1.0", &[], &[]);
    let (orchestrator, _dl) = fx.orchestrator();
    let (caches, _cache_dir) = caches();

    let specs = vec![Spec::parse("sentry[postgres]", "top").unwrap()];
    let out = orchestrator
        .resolve(caches, specs, IndexMap::new(), vec![])
        .await
        .unwrap();

    let sentry = &out.pkg_map["sentry-7.0"];
    assert_eq!(sentry.deps, vec!["django-1.5.0".to_string()]);
    assert_eq!(
        sentry.extra.get("postgres").cloned().unwrap_or_default(),
        vec!["psycopg2-1.0".to_string()]
    );
}

#[tokio::test]
async fn circular_dependency_back_edge_is_dropped() {
    let mut fx = Fixture::new();
    fx.add("a", "1", &["b"], &[]);
    fx.add("b", "1", &["a"], &[]);
    let (orchestrator, _dl) = fx.orchestrator();
    let (caches, _cache_dir) = caches();

    let specs = vec![Spec::parse("a", "top").unwrap()];
    let out = orchestrator
        .resolve(caches, specs, IndexMap::new(), vec![])
        .await
        .unwrap();

    assert_eq!(out.pkg_map["a-1"].deps, vec!["b-1".to_string()]);
    assert!(out.pkg_map["b-1"].deps.is_empty());
    assert!(out.pkg_map["b-1"].has_circular_deps);
}

#[tokio::test]
async fn src_override_rewrites_artifact_url() {
    let mut fx = Fixture::new();
    fx.add("foo", "1.0", &[], &[]);
    let (orchestrator, _dl) = fx.orchestrator();
    let (caches, _cache_dir) = caches();

    let mut overrides = IndexMap::new();
    overrides.insert(
        "foo".to_string(),
        Override {
            src: Some("https://mirror.invalid/{spec.name}-{spec.pinned}.tar.gz".to_string()),
            ..Default::default()
        },
    );

    let specs = vec![Spec::parse("foo", "top").unwrap()];
    let out = orchestrator
        .resolve(caches, specs, overrides, vec![])
        .await
        .unwrap();

    assert!(out.pkg_map["foo-1.0"].src.url.starts_with("https://mirror.invalid/"));
}
