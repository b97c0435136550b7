//! Predicate algebra: a [`CompareOp`] plus a version string is converted into
//! a union of half-open `Range<Version>`s, and satisfaction/subsumption/
//! collapse all reduce to interval arithmetic over that representation.
//!
//! Grounded on `rattler_installs_packages/src/specifier.rs` (itself vendored
//! from posy), adapted to the hand-rolled [`crate::version::Version`] instead
//! of the external `pep440` crate.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use smallvec::{smallvec, SmallVec};
use thiserror::Error;

use crate::version::{PreRelease, Version};

pub static VERSION_ZERO: Lazy<Version> = Lazy::new(Version::zero);
pub static VERSION_INFINITY: Lazy<Version> = Lazy::new(Version::infinity);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    LessThanEqual,
    StrictlyLessThan,
    NotEqual,
    Equal,
    GreaterThanEqual,
    StrictlyGreaterThan,
    Compatible,
    /// `===` arbitrary-equality: not supported, rejected at parse time.
    ArbitraryEqual,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CompareOp::*;
        write!(
            f,
            "{}",
            match self {
                LessThanEqual => "<=",
                StrictlyLessThan => "<",
                NotEqual => "!=",
                Equal => "==",
                GreaterThanEqual => ">=",
                StrictlyGreaterThan => ">",
                Compatible => "~=",
                ArbitraryEqual => "===",
            }
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum SpecifierError {
    #[error("unrecognized comparison operator: {0:?}")]
    UnknownOperator(String),
    #[error("'===' (arbitrary equality) is not supported")]
    ArbitraryEqualityUnsupported,
    #[error("failed to parse version {0:?}: {1}")]
    BadVersion(String, crate::version::ParseVersionError),
    #[error("version wildcards can't carry a dev or local suffix: {0:?}")]
    WildcardWithSuffix(String),
    #[error("wildcard form can only be used with == or !=, not {0}")]
    WildcardWithWrongOp(CompareOp),
    #[error("operator {0} cannot be used on a version with a +local suffix")]
    LocalWithOrderedOp(CompareOp),
    #[error("~= requires a version with at least two release segments (X.Y)")]
    CompatibleNeedsTwoSegments,
    #[error("failed to parse specifier clause: {0}")]
    Grammar(String),
}

impl FromStr for CompareOp {
    type Err = SpecifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        use CompareOp::*;
        Ok(match value {
            "==" => Equal,
            "!=" => NotEqual,
            "<=" => LessThanEqual,
            "<" => StrictlyLessThan,
            ">=" => GreaterThanEqual,
            ">" => StrictlyGreaterThan,
            "~=" => Compatible,
            "===" => return Err(SpecifierError::ArbitraryEqualityUnsupported),
            other => return Err(SpecifierError::UnknownOperator(other.to_string())),
        })
    }
}

/// One `op value` clause, e.g. `>= 1.3`. Keeps the raw value text (not a
/// parsed [`Version`]) because `==`/`!=` accept a `.*` wildcard suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Specifier {
    pub op: CompareOp,
    pub value: String,
}

impl Specifier {
    pub fn new(op: CompareOp, value: impl Into<String>) -> Self {
        Specifier {
            op,
            value: value.into(),
        }
    }

    pub fn satisfied_by(&self, version: &Version) -> Result<bool, SpecifierError> {
        Ok(self.to_ranges()?.iter().any(|r| r.contains(version)))
    }

    pub fn to_ranges(&self) -> Result<SmallVec<[Range<Version>; 1]>, SpecifierError> {
        self.op.ranges(&self.value)
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.value)
    }
}

/// An ordered, comma-joined list of [`Specifier`]s, e.g. `>=1.3,<1.4`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Specifiers(pub Vec<Specifier>);

impl Specifiers {
    pub fn satisfied_by(&self, version: &Version) -> Result<bool, SpecifierError> {
        for s in &self.0 {
            if !s.satisfied_by(version)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for Specifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for s in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{s}")?;
        }
        Ok(())
    }
}

impl FromStr for Specifiers {
    type Err = SpecifierError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let clauses =
            crate::reqparse::clauses(input).map_err(|e| SpecifierError::Grammar(e.to_string()))?;
        let mut specs = Vec::with_capacity(clauses.len());
        for (op, value) in clauses {
            let op = CompareOp::from_str(&op)?;
            specs.push(Specifier { op, value });
        }
        Ok(Specifiers(specs))
    }
}

fn parse_version_wildcard(input: &str) -> Result<(Version, bool), SpecifierError> {
    let (vstr, wildcard) = if let Some(v) = input.strip_suffix(".*") {
        (v, true)
    } else {
        (input, false)
    };
    let version = Version::from_str(vstr)
        .map_err(|e| SpecifierError::BadVersion(vstr.to_string(), e))?;
    Ok((version, wildcard))
}

impl CompareOp {
    /// Converts a comparison like `">= 1.2"` into a union of half-open ranges.
    pub fn ranges(&self, rhs: &str) -> Result<SmallVec<[Range<Version>; 1]>, SpecifierError> {
        use CompareOp::*;
        let (version, wildcard) = parse_version_wildcard(rhs)?;
        if wildcard {
            if version.dev.is_some() || !version.local.is_empty() {
                return Err(SpecifierError::WildcardWithSuffix(rhs.to_string()));
            }
            // == X.* is the half-open range [X.dev0, (X+1).dev0)
            let low = version.release_dev0();
            let high = version.bump_release();
            return Ok(match self {
                Equal => smallvec![low..high],
                NotEqual => smallvec![
                    VERSION_ZERO.clone()..low,
                    high..VERSION_INFINITY.clone()
                ],
                _ => return Err(SpecifierError::WildcardWithWrongOp(*self)),
            });
        }

        if !matches!(self, Equal | NotEqual) && !version.local.is_empty() {
            return Err(SpecifierError::LocalWithOrderedOp(*self));
        }

        Ok(match self {
            LessThanEqual => smallvec![VERSION_ZERO.clone()..version.next()],
            GreaterThanEqual => smallvec![version..VERSION_INFINITY.clone()],
            Equal => smallvec![version.clone()..version.next()],
            NotEqual => smallvec![
                VERSION_ZERO.clone()..version.clone(),
                version.next()..VERSION_INFINITY.clone()
            ],
            // "The exclusive ordered comparison >V MUST NOT allow a
            // post-release of the given version unless V itself is a post
            // release."
            StrictlyGreaterThan => {
                let mut low = version.clone();
                if let Some(dev) = version.dev {
                    low.dev = Some(dev + 1);
                } else if let Some(post) = version.post {
                    low.post = Some(post + 1);
                } else {
                    low.post = Some(u64::MAX);
                }
                smallvec![low..VERSION_INFINITY.clone()]
            }
            // "The exclusive ordered comparison <V MUST NOT allow a
            // pre-release of the specified version unless the specified
            // version is itself a pre-release."
            StrictlyLessThan => {
                if version.pre.is_none() && version.dev.is_none() {
                    smallvec![VERSION_ZERO.clone()..version.release_dev0()]
                } else {
                    smallvec![VERSION_ZERO.clone()..version]
                }
            }
            // ~= X.Y.suffixes == >= X.Y.suffixes && == X.*
            Compatible => {
                if version.release.len() < 2 {
                    return Err(SpecifierError::CompatibleNeedsTwoSegments);
                }
                let mut new_max = Version {
                    epoch: version.epoch,
                    release: version.release.clone(),
                    pre: None,
                    post: None,
                    dev: Some(0),
                    local: vec![],
                };
                new_max.release.pop();
                *new_max.release.last_mut().unwrap() += 1;
                smallvec![version..new_max]
            }
            ArbitraryEqual => return Err(SpecifierError::ArbitraryEqualityUnsupported),
        })
    }
}

#[allow(dead_code)]
fn ensure_prerelease_marker(v: &Version) -> bool {
    matches!(v.pre, Some(PreRelease::A(_) | PreRelease::B(_) | PreRelease::Rc(_)))
        || v.dev.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    #[test]
    fn equal_is_half_open_unit_range() {
        let spec = Specifier::new(CompareOp::Equal, "1.2.3");
        assert!(spec.satisfied_by(&v("1.2.3")).unwrap());
        assert!(!spec.satisfied_by(&v("1.2.4")).unwrap());
    }

    #[test]
    fn wildcard_equal_matches_prefix() {
        let spec = Specifier::new(CompareOp::Equal, "1.2.*");
        assert!(spec.satisfied_by(&v("1.2.0")).unwrap());
        assert!(spec.satisfied_by(&v("1.2.99")).unwrap());
        assert!(!spec.satisfied_by(&v("1.3.0")).unwrap());
    }

    #[test]
    fn compatible_release() {
        let spec = Specifier::new(CompareOp::Compatible, "1.4.2");
        assert!(spec.satisfied_by(&v("1.4.5")).unwrap());
        assert!(!spec.satisfied_by(&v("1.5.0")).unwrap());
    }

    #[test]
    fn strictly_greater_excludes_post_of_self() {
        let spec = Specifier::new(CompareOp::StrictlyGreaterThan, "1.0");
        assert!(!spec.satisfied_by(&v("1.0.post1")).unwrap());
        assert!(spec.satisfied_by(&v("1.1")).unwrap());
    }

    #[test]
    fn strictly_less_excludes_prerelease_of_self() {
        let spec = Specifier::new(CompareOp::StrictlyLessThan, "1.0");
        assert!(!spec.satisfied_by(&v("1.0a1")).unwrap());
        assert!(spec.satisfied_by(&v("0.9")).unwrap());
    }
}
