//! A single requirement: `name[extras] op1 v1, op2 v2 ...`.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::package_name::normalize as normalize_name;
use crate::specifier::{CompareOp, Specifier};
use crate::version::Version;

/// A package requirement as described by SPEC_FULL.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    pub extras: IndexSet<String>,
    pub preds: Vec<Specifier>,
    pub source: String,
    pub pinned: Option<Version>,
}

impl Spec {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Spec {
        Spec {
            name: normalize_name(&name.into()),
            extras: IndexSet::new(),
            preds: Vec::new(),
            source: source.into(),
            pinned: None,
        }
    }

    /// Parse a requirement line (`name[extra1,extra2] op1 v1, op2 v2`) with
    /// the given provenance tag.
    pub fn parse(line: &str, source: impl Into<String>) -> Result<Spec, ParseSpecError> {
        let (name, extras, clauses) = crate::reqparse::spec_line(line.trim())
            .map_err(|e| ParseSpecError::Grammar(line.to_string(), e.to_string()))?;
        let mut preds = Vec::with_capacity(clauses.len());
        for (op, value) in clauses {
            let op = CompareOp::from_str(&op)
                .map_err(|e| ParseSpecError::BadOperator(line.to_string(), e.to_string()))?;
            preds.push(Specifier { op, value });
        }
        let mut spec = Spec {
            name: normalize_name(&name),
            extras: extras.into_iter().collect(),
            preds,
            source: source.into(),
            pinned: None,
        };
        spec.refresh_pinned();
        Ok(spec)
    }

    /// Recompute `pinned` from `preds`: set iff `preds` is exactly one `==`
    /// clause on a literal (non-wildcard) version.
    pub fn refresh_pinned(&mut self) {
        self.pinned = match self.preds.as_slice() {
            [p] if p.op == CompareOp::Equal && !p.value.ends_with(".*") => {
                Version::from_str(&p.value).ok()
            }
            _ => None,
        };
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }

    /// `name-version`, once pinned. Panics if called on an unpinned spec.
    pub fn fullname(&self) -> String {
        format!(
            "{}-{}",
            self.name,
            self.pinned.as_ref().expect("fullname() on an unpinned spec")
        )
    }

    /// This spec with `extras` cleared — used as a cache key for
    /// metadata-level lookups that don't vary by extras.
    pub fn no_extra(&self) -> Spec {
        Spec {
            extras: IndexSet::new(),
            ..self.clone()
        }
    }

    pub fn matches(&self, version: &Version) -> Result<bool, crate::specifier::SpecifierError> {
        for p in &self.preds {
            if !p.satisfied_by(version)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Pin this spec to an exact version, replacing `preds` with a single
    /// `==` clause. Used by the resolver once `find_best_match` picks a
    /// candidate.
    pub fn pin_to(&self, version: &Version) -> Spec {
        Spec {
            name: self.name.clone(),
            extras: self.extras.clone(),
            preds: vec![Specifier::new(CompareOp::Equal, version.to_string())],
            source: self.source.clone(),
            pinned: Some(version.clone()),
        }
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(
                f,
                "[{}]",
                self.extras.iter().cloned().collect::<Vec<_>>().join(",")
            )?;
        }
        let preds = self
            .preds
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        if !preds.is_empty() {
            write!(f, "{preds}")?;
        }
        Ok(())
    }
}

/// Equality/hashing is on the identity of the requirement, deliberately
/// excluding `source`: SPEC_FULL.md's open-question decision treats `source`
/// as informational, not canonical (repeated `normalize()` passes may
/// reorder it without changing the requirement).
impl PartialEq for Spec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.extras == other.extras && self.preds == other.preds
    }
}
impl Eq for Spec {}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseSpecError {
    #[error("failed to parse requirement line {0:?}: {1}")]
    Grammar(String, String),
    #[error("failed to parse requirement line {0:?}: {1}")]
    BadOperator(String, String),
}
