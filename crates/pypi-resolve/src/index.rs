//! The abstract collaborators that sit between the resolver and the network:
//! [`Index`] (name/spec → candidate links) and [`ArtifactStore`] (link →
//! local unpacked directory). A default HTTP-backed implementation of each is
//! provided; tests substitute in-memory fakes (SPEC_FULL.md §4.15).
//!
//! Grounded on `rattler_installs_packages/src/index/html.rs` (simple-index
//! HTML parsing) and `src/index/http.rs` (the `reqwest` client shape),
//! trimmed to sdist-only (no wheel tag matching, no METADATA shortcuts).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::spec::Spec;
use crate::version::Version;

/// An artifact location plus its filename, content hash (if the index
/// supplied one) and `egg=` fragment (if the URL carried one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub filename: String,
    pub hash: Option<(String, String)>,
    pub egg_fragment: Option<String>,
}

impl Link {
    /// Version inferred from the `egg=name-version` URL fragment, if any.
    pub fn egg_version(&self) -> Option<Version> {
        let fragment = self.egg_fragment.as_deref()?;
        let (_, version) = fragment.rsplit_once('-')?;
        version.parse().ok()
    }

    /// Version inferred from the filename, stripping a recognized sdist
    /// extension and the leading `{name}-` prefix.
    pub fn filename_version(&self, name: &str) -> Option<Version> {
        let stem = strip_sdist_extension(&self.filename)?;
        let prefix = format!("{name}-");
        let prefix = stem
            .to_ascii_lowercase()
            .find(&prefix.to_ascii_lowercase())
            .map(|_| prefix.len())?;
        stem.get(prefix..)?.parse().ok()
    }
}

fn strip_sdist_extension(filename: &str) -> Option<&str> {
    for ext in [".tar.gz", ".tar.bz2", ".tgz", ".tar", ".zip"] {
        if let Some(stem) = filename.strip_suffix(ext) {
            return Some(stem);
        }
    }
    None
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not parse index response for {name}: {detail}")]
    MalformedIndex { name: String, detail: String },
    #[error("i/o error fetching artifact {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported archive format for {filename}")]
    UnsupportedArchive { filename: String },
}

/// Looks up candidate artifact links for a requirement. Implementations
/// return every link the index knows about for the name; filtering by
/// predicate and prerelease policy is the caller's job (see
/// [`crate::manager::PackageManager::find_best_match`]).
#[async_trait]
pub trait Index: Send + Sync {
    async fn links_for(&self, name: &str) -> Result<Vec<Link>, FetchError>;
}

/// Fetches and unpacks artifacts referenced by a [`Link`].
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Download (or reuse a cached copy of) the artifact, returning its local
    /// path.
    async fn get_or_download(&self, link: &Link) -> Result<PathBuf, FetchError>;

    /// Unpack a downloaded archive into a fresh temporary directory.
    async fn unpack(&self, path: &Path) -> Result<PathBuf, FetchError>;
}

/// The default [`Index`] implementation: queries a PyPI-simple-index-shaped
/// HTTP endpoint and parses the HTML listing.
pub struct HttpIndex {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpIndex {
    pub fn new(client: reqwest::Client, base_url: Url) -> HttpIndex {
        HttpIndex { client, base_url }
    }
}

#[async_trait]
impl Index for HttpIndex {
    async fn links_for(&self, name: &str) -> Result<Vec<Link>, FetchError> {
        let url = self
            .base_url
            .join(&format!("{}/", crate::package_name::normalize(name)))
            .map_err(|e| FetchError::MalformedIndex {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        let body = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?
            .text()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        parse_simple_index_html(&url, &body).map_err(|detail| FetchError::MalformedIndex {
            name: name.to_string(),
            detail,
        })
    }
}

/// Parse a PyPI simple-index listing page (`<a href="...">name</a>` per
/// artifact) into [`Link`]s. Grounded on the teacher's `tl`-based
/// `parse_project_info_html`, simplified to the fields this crate needs
/// (url, filename, hash fragment, egg fragment) without wheel-tag parsing.
fn parse_simple_index_html(base: &Url, body: &str) -> Result<Vec<Link>, String> {
    let dom = tl::parse(body, tl::ParserOptions::default()).map_err(|e| e.to_string())?;
    let parser = dom.parser();
    let mut links = Vec::new();
    let Some(anchors) = dom.query_selector("a") else {
        return Ok(links);
    };
    for handle in anchors {
        let Some(tag) = handle.get(parser).and_then(|n| n.as_tag()) else {
            continue;
        };
        let Some(href) = tag.attributes().get("href").flatten() else {
            continue;
        };
        let href = href.as_utf8_str();
        let Ok(url) = base.join(href.as_ref()) else {
            continue;
        };
        let filename = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default()
            .to_string();
        if filename.is_empty() {
            continue;
        }
        let hash = url.fragment().and_then(|f| {
            f.split_once('=')
                .map(|(algo, digest)| (algo.to_string(), digest.to_string()))
        });
        let egg_fragment = url
            .fragment()
            .and_then(|f| f.strip_prefix("egg="))
            .map(|s| s.to_string());
        let mut clean = url.clone();
        clean.set_fragment(None);
        links.push(Link {
            url: clean.to_string(),
            filename,
            hash,
            egg_fragment,
        });
    }
    Ok(links)
}

/// The default [`ArtifactStore`] implementation: downloads over HTTP into a
/// content-addressed (by URL) download cache directory and unpacks via `tar`
/// or `zip` depending on extension.
pub struct HttpArtifactStore {
    client: reqwest::Client,
    download_cache_root: PathBuf,
}

impl HttpArtifactStore {
    pub fn new(client: reqwest::Client, download_cache_root: PathBuf) -> HttpArtifactStore {
        HttpArtifactStore {
            client,
            download_cache_root,
        }
    }

    fn cache_path(&self, link: &Link) -> PathBuf {
        let encoded = url::form_urlencoded::byte_serialize(link.url.as_bytes()).collect::<String>();
        self.download_cache_root.join(encoded)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn get_or_download(&self, link: &Link) -> Result<PathBuf, FetchError> {
        let path = self.cache_path(link);
        if path.is_file() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FetchError::Io {
                url: link.url.clone(),
                source,
            })?;
        }
        let bytes = self
            .client
            .get(&link.url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: link.url.clone(),
                source,
            })?
            .bytes()
            .await
            .map_err(|source| FetchError::Http {
                url: link.url.clone(),
                source,
            })?;
        std::fs::write(&path, &bytes).map_err(|source| FetchError::Io {
            url: link.url.clone(),
            source,
        })?;
        Ok(path)
    }

    async fn unpack(&self, path: &Path) -> Result<PathBuf, FetchError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = tempfile::Builder::new()
            .prefix("pypi-resolve-unpack-")
            .tempdir()
            .map_err(|source| FetchError::Io {
                url: filename.clone(),
                source,
            })?
            .into_path();

        if filename.ends_with(".zip") {
            let file = std::fs::File::open(path).map_err(|source| FetchError::Io {
                url: filename.clone(),
                source,
            })?;
            let mut archive = zip::ZipArchive::new(file).map_err(|_| FetchError::UnsupportedArchive {
                filename: filename.clone(),
            })?;
            archive.extract(&dest).map_err(|_| FetchError::UnsupportedArchive {
                filename: filename.clone(),
            })?;
        } else if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
            let file = std::fs::File::open(path).map_err(|source| FetchError::Io {
                url: filename.clone(),
                source,
            })?;
            let decoder = flate2::read::GzDecoder::new(file);
            tar::Archive::new(decoder)
                .unpack(&dest)
                .map_err(|source| FetchError::Io {
                    url: filename.clone(),
                    source,
                })?;
        } else if filename.ends_with(".tar.bz2") {
            let file = std::fs::File::open(path).map_err(|source| FetchError::Io {
                url: filename.clone(),
                source,
            })?;
            let decoder = bzip2::read::BzDecoder::new(file);
            tar::Archive::new(decoder)
                .unpack(&dest)
                .map_err(|source| FetchError::Io {
                    url: filename.clone(),
                    source,
                })?;
        } else if filename.ends_with(".tar") {
            let file = std::fs::File::open(path).map_err(|source| FetchError::Io {
                url: filename.clone(),
                source,
            })?;
            tar::Archive::new(file)
                .unpack(&dest)
                .map_err(|source| FetchError::Io {
                    url: filename.clone(),
                    source,
                })?;
        } else {
            return Err(FetchError::UnsupportedArchive { filename });
        }

        // Sdist archives conventionally contain a single `{name}-{version}/`
        // top-level directory; return it directly when there's exactly one.
        let mut entries = std::fs::read_dir(&dest)
            .map_err(|source| FetchError::Io {
                url: filename.clone(),
                source,
            })?
            .filter_map(|e| e.ok());
        let first = entries.next();
        let second = entries.next();
        match (first, second) {
            (Some(only), None) if only.path().is_dir() => Ok(only.path()),
            _ => Ok(dest),
        }
    }
}

/// Resolve a `Spec`'s best-matching [`Link`] from everything an [`Index`]
/// reports, optionally restricted to non-prerelease versions. Pure function
/// over already-fetched data so it's trivially unit-testable without a real
/// index.
pub fn pick_best_link(
    spec: &Spec,
    name: &str,
    links: &[Link],
    allow_prerelease: bool,
) -> Option<(Version, Link)> {
    links
        .iter()
        .filter_map(|link| {
            let version = link
                .egg_version()
                .or_else(|| link.filename_version(name))?;
            if !allow_prerelease && version.is_prerelease() {
                return None;
            }
            if !spec.matches(&version).ok()? {
                return None;
            }
            Some((version, link.clone()))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
}
