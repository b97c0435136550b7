//! PEP 440 version parsing and total ordering.
//!
//! Implementation technique (the range-based predicate algebra in
//! [`crate::specifier`]) follows the same approach used by posy's
//! `pep440`/`specifier` modules, but the `Version` type here is hand-rolled
//! rather than delegated to an external crate.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A pre-release qualifier: `aN`, `bN` or `rcN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PreRelease {
    /// `aN` — alpha.
    A(u32),
    /// `bN` — beta.
    B(u32),
    /// `rcN` — release candidate.
    Rc(u32),
}

impl PreRelease {
    fn bump(self) -> Self {
        match self {
            PreRelease::A(n) => PreRelease::A(n + 1),
            PreRelease::B(n) => PreRelease::B(n + 1),
            PreRelease::Rc(n) => PreRelease::Rc(n + 1),
        }
    }
}

/// A fully parsed, normalized PEP 440 version.
///
/// Ordering follows PEP 440 §Summary of permitted suffixes: `dev < {a,b,rc} <
/// release < post`, local versions sort after their public counterpart.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Version {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<PreRelease>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Vec<LocalSegment>,
}

/// One dot-separated component of a `+local` version segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LocalSegment {
    Numeric(u64),
    Alpha(String),
}

#[derive(Debug, Clone, Error)]
pub enum ParseVersionError {
    #[error("not a valid version: {0:?}")]
    Malformed(String),
}

impl Version {
    /// The smallest version this crate will ever construct: smaller than any
    /// real release, used as the lower sentinel for open ranges.
    pub fn zero() -> Version {
        Version {
            epoch: 0,
            release: vec![0],
            pre: Some(PreRelease::A(0)),
            post: None,
            dev: Some(0),
            local: vec![],
        }
    }

    /// A version larger than any release anyone will plausibly publish.
    pub fn infinity() -> Version {
        Version {
            epoch: u64::MAX,
            release: vec![u64::MAX, u64::MAX, u64::MAX],
            pre: None,
            post: Some(u64::MAX),
            dev: None,
            local: vec![],
        }
    }

    /// The smallest version strictly greater than `self`.
    ///
    /// You can't attach a `.postN` after a `.devN` (the next step is
    /// `.dev(N+1)`), and you can't attach a second `.postN` after a `.postN`
    /// (the next step is `.post(N+1)`); otherwise the next value is obtained
    /// by tacking on `.post0.dev0`.
    pub fn next(&self) -> Version {
        let mut v = self.clone();
        if let Some(dev) = v.dev {
            v.dev = Some(dev + 1);
        } else if let Some(post) = v.post {
            v.post = Some(post + 1);
        } else {
            v.post = Some(0);
            v.dev = Some(0);
        }
        v
    }

    /// Release with the last numeric segment bumped by one. Used when
    /// expanding wildcard (`==X.*`) specifiers.
    pub fn bump_release(&self) -> Version {
        let mut v = self.clone();
        if let Some(post) = v.post {
            v.post = Some(post + 1);
        } else if let Some(pre) = v.pre {
            v.pre = Some(pre.bump());
        } else {
            *v.release.last_mut().unwrap() += 1;
        }
        v.dev = Some(0);
        v
    }

    /// This version with `dev`/`pre` stripped and `dev0` reattached: the
    /// smallest version sharing this release segment.
    pub fn release_dev0(&self) -> Version {
        let mut v = self.clone();
        v.pre = None;
        v.post = None;
        v.local = vec![];
        v.dev = Some(0);
        v
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release = self
            .release
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{release}")?;
        match self.pre {
            Some(PreRelease::A(n)) => write!(f, "a{n}")?,
            Some(PreRelease::B(n)) => write!(f, "b{n}")?,
            Some(PreRelease::Rc(n)) => write!(f, "rc{n}")?,
            None => {}
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if !self.local.is_empty() {
            let local = self
                .local
                .iter()
                .map(|seg| match seg {
                    LocalSegment::Numeric(n) => n.to_string(),
                    LocalSegment::Alpha(s) => s.clone(),
                })
                .collect::<Vec<_>>()
                .join(".");
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::reqparse::version(s.trim()).map_err(|_| ParseVersionError::Malformed(s.to_string()))
    }
}

/// The ordering key: `(epoch, release-as-padded-tuple, qualifier-rank,
/// qualifier-value, post, local)`. `release` tuples of differing lengths are
/// compared as if padded with trailing zeros (`1.0 == 1.0.0`).
fn release_cmp(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// dev < pre < "no qualifier" < post. A `dev`-only version (no `pre`) ranks
/// below a `pre`-only version of the same release, which in turn ranks below
/// a plain release; `post` is handled separately via `self.post`.
fn pre_rank(pre: &Option<PreRelease>, dev: &Option<u64>) -> i32 {
    match (pre, dev) {
        (None, Some(_)) => 0,
        (Some(_), _) => 1,
        (None, None) => 2,
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| release_cmp(&self.release, &other.release))
            .then_with(|| pre_rank(&self.pre, &self.dev).cmp(&pre_rank(&other.pre, &other.dev)))
            .then_with(|| self.pre.cmp(&other.pre))
            .then_with(|| {
                // dev releases sort below everything else at this point,
                // release-without-dev sorts above a dev of the same release.
                match (&self.dev, &other.dev) {
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (a, b) => a.cmp(b),
                }
            })
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Strip trailing zeros from the release tuple so that versions equal
        // under `release_cmp` (e.g. `1.0` and `1.0.0`) also hash equal.
        let mut release = self.release.clone();
        while release.len() > 1 && release.last() == Some(&0) {
            release.pop();
        }
        self.epoch.hash(state);
        release.hash(state);
        self.pre.hash(state);
        self.dev.hash(state);
        self.post.hash(state);
        self.local.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    #[test]
    fn dev_sorts_below_pre_sorts_below_release_sorts_below_post() {
        assert!(v("1.0.dev456") < v("1.0a1"));
        assert!(v("1.0a1") < v("1.0"));
        assert!(v("1.0") < v("1.0.post1"));
        assert!(v("1.0.dev456") < v("1.0.post1"));
    }

    #[test]
    fn pre_with_dev_sorts_below_pre_alone() {
        assert!(v("1.0a1.dev1") < v("1.0a1"));
    }

    #[test]
    fn dev_only_versions_compare_by_dev_number() {
        assert!(v("1.0.dev1") < v("1.0.dev2"));
    }

    #[test]
    fn release_tuples_compare_as_if_zero_padded() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0.1") > v("1.0"));
    }
}
