//! `SpecSet`: a multimap `name -> [Spec]` with a `normalize()` that reduces
//! each name's specs to their intersection, expressed over the half-open
//! version ranges from [`crate::specifier`].
//!
//! Grounded on `examples/original_source/pypi2nix/package_resolver.py`'s use
//! of `SpecSet`, with the exact normalization behavior pinned down by
//! `examples/original_source/tests/test_spec_set.py`.

use std::ops::Range;

use indexmap::{IndexMap, IndexSet};

use crate::spec::Spec;
use crate::specifier::{CompareOp, Specifier, VERSION_INFINITY, VERSION_ZERO};
use crate::version::Version;

#[derive(Debug, Clone, Default)]
pub struct SpecSet {
    by_name: IndexMap<String, Vec<Spec>>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("conflicting requirements for {name}: {source_a:?} conflicts with {source_b:?}")]
pub struct ConflictError {
    pub name: String,
    pub source_a: String,
    pub source_b: String,
}

impl SpecSet {
    pub fn new() -> SpecSet {
        SpecSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(|s| s.as_str())
    }

    pub fn get(&self, name: &str) -> &[Spec] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Add a spec without merging it against any existing spec for the name.
    pub fn add(&mut self, spec: Spec) {
        self.by_name.entry(spec.name.clone()).or_default().push(spec);
    }

    /// One-predicate-per-spec fan-out of all specs registered for `name`.
    pub fn explode(&self, name: &str) -> Vec<Spec> {
        let mut out = Vec::new();
        for spec in self.get(name) {
            if spec.preds.is_empty() {
                out.push(Spec {
                    preds: Vec::new(),
                    ..spec.clone()
                });
                continue;
            }
            for p in &spec.preds {
                out.push(Spec {
                    preds: vec![p.clone()],
                    ..spec.clone()
                });
            }
        }
        out
    }

    /// Reduce this set so that every name has exactly one [`Spec`]
    /// representing the intersection of every predicate registered for it.
    pub fn normalize(&self) -> Result<SpecSet, ConflictError> {
        let mut out = SpecSet::new();
        for name in self.by_name.keys() {
            out.by_name.insert(name.clone(), vec![self.normalize_name(name)?]);
        }
        Ok(out)
    }

    fn normalize_name(&self, name: &str) -> Result<Spec, ConflictError> {
        let specs = self.get(name);

        let mut extras = IndexSet::new();
        let mut sources: IndexSet<String> = IndexSet::new();
        for s in specs {
            extras.extend(s.extras.iter().cloned());
            sources.insert(s.source.clone());
        }

        // allowed := intersection, as a sorted union of disjoint half-open
        // ranges, of every predicate's own range union.
        let mut allowed: Vec<Range<Version>> = vec![VERSION_ZERO.clone()..VERSION_INFINITY.clone()];
        // Track, for each predicate, which source contributed it, so a
        // conflict can name the two offending sources.
        let mut last_source = specs.first().map(|s| s.source.clone()).unwrap_or_default();
        let mut prior_source = last_source.clone();

        for s in specs {
            for p in &s.preds {
                let ranges = p
                    .to_ranges()
                    .map_err(|e| ConflictError {
                        name: name.to_string(),
                        source_a: s.source.clone(),
                        source_b: e.to_string(),
                    })?
                    .to_vec();
                let next = intersect_range_unions(&allowed, &ranges);
                if next.is_empty() && !allowed.is_empty() {
                    return Err(ConflictError {
                        name: name.to_string(),
                        source_a: prior_source.clone(),
                        source_b: s.source.clone(),
                    });
                }
                prior_source = last_source.clone();
                last_source = s.source.clone();
                allowed = next;
            }
        }

        if allowed.is_empty() {
            return Err(ConflictError {
                name: name.to_string(),
                source_a: prior_source,
                source_b: last_source,
            });
        }

        let mut sorted_sources: Vec<String> = sources.into_iter().collect();
        sorted_sources.sort();
        let merged_source = sorted_sources.join(" and ");

        let preds = ranges_to_predicates(&allowed);

        let mut spec = Spec {
            name: name.to_string(),
            extras,
            preds,
            source: merged_source,
            pinned: None,
        };
        spec.refresh_pinned();
        Ok(spec)
    }
}

/// Intersect two sorted, mutually-disjoint unions of half-open ranges.
fn intersect_range_unions(a: &[Range<Version>], b: &[Range<Version>]) -> Vec<Range<Version>> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.clone().max(b[j].start.clone());
        let end = a[i].end.clone().min(b[j].end.clone());
        if start < end {
            out.push(start..end);
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Reconstruct a minimal predicate list from a merged range union: an outer
/// `>=`/`<` pair (dropped at the sentinel bounds) plus one `!=` per
/// unit-width gap between disjoint ranges (the common case of accumulated
/// `!=` values). A non-unit-width gap — only reachable via wildcard `!=`
/// combined with an overlapping ordered bound, vanishingly rare in practice
/// — is conservatively represented by narrowing to its surrounding range
/// only, which remains a sound (if not maximally precise) over-approximation.
fn ranges_to_predicates(allowed: &[Range<Version>]) -> Vec<Specifier> {
    let low = &allowed.first().expect("allowed is non-empty").start;
    let high = &allowed.last().expect("allowed is non-empty").end;

    // Single contiguous range of exactly one version: ==low.
    if allowed.len() == 1 && &low.next() == high {
        return vec![Specifier::new(CompareOp::Equal, low.to_string())];
    }

    let mut preds = Vec::new();
    if low != &*VERSION_ZERO {
        preds.push(Specifier::new(CompareOp::GreaterThanEqual, low.to_string()));
    }
    if high != &*VERSION_INFINITY {
        preds.push(Specifier::new(CompareOp::StrictlyLessThan, high.to_string()));
    }
    for w in allowed.windows(2) {
        let gap_start = &w[0].end;
        let gap_end = &w[1].start;
        if &gap_start.next() == gap_end {
            preds.push(Specifier::new(CompareOp::NotEqual, gap_start.to_string()));
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Spec;

    fn spec(line: &str, source: &str) -> Spec {
        Spec::parse(line, source).unwrap()
    }

    #[test]
    fn idempotent() {
        let mut set = SpecSet::new();
        set.add(spec("foo>=1.3,<1.4", "a"));
        let once = set.normalize().unwrap();
        // direct re-normalization of the already-normalized set is a no-op
        // on the predicate set (source strings are informational only).
        let twice = once.normalize().unwrap();
        assert_eq!(
            once.get("foo").first().unwrap().preds,
            twice.get("foo").first().unwrap().preds
        );
    }

    #[test]
    fn merges_to_tightest_bounds() {
        let mut set = SpecSet::new();
        set.add(spec("foo>=1.3", "a"));
        set.add(spec("foo<1.4", "b"));
        set.add(spec("foo>=1.3.2", "c"));
        set.add(spec("foo<1.3.99", "d"));
        let norm = set.normalize().unwrap();
        let merged = &norm.get("foo")[0];
        assert_eq!(merged.preds.len(), 2);
        assert!(merged.matches(&"1.3.5".parse().unwrap()).unwrap());
        assert!(!merged.matches(&"1.3.1".parse().unwrap()).unwrap());
        assert!(!merged.matches(&"1.3.99".parse().unwrap()).unwrap());
    }

    #[test]
    fn collapses_to_pinned_with_matching_upper_bound() {
        let mut set = SpecSet::new();
        set.add(spec("foo>=1.3.2", "a"));
        set.add(spec("foo<=1.3.2", "b"));
        let norm = set.normalize().unwrap();
        let merged = &norm.get("foo")[0];
        assert!(merged.is_pinned());
        assert_eq!(merged.pinned.as_ref().unwrap().to_string(), "1.3.2");
    }

    #[test]
    fn drops_subsumed_unbounded_spec() {
        let mut set = SpecSet::new();
        set.add(spec("django", "a"));
        set.add(spec("django<1.4", "b"));
        let norm = set.normalize().unwrap();
        let merged = &norm.get("django")[0];
        assert_eq!(merged.preds.len(), 1);
        assert_eq!(merged.preds[0].op, CompareOp::StrictlyLessThan);
    }

    #[test]
    fn accumulates_multiple_not_equal() {
        let mut set = SpecSet::new();
        set.add(spec("foo!=1.3", "a"));
        set.add(spec("foo!=1.4", "b"));
        let norm = set.normalize().unwrap();
        let merged = &norm.get("foo")[0];
        assert!(!merged.matches(&"1.3".parse().unwrap()).unwrap());
        assert!(!merged.matches(&"1.4".parse().unwrap()).unwrap());
        assert!(merged.matches(&"1.5".parse().unwrap()).unwrap());
    }

    #[test]
    fn detects_conflict() {
        let mut set = SpecSet::new();
        set.add(spec("foo==1.3.2", "a"));
        set.add(spec("foo!=1.3.2", "b"));
        let err = set.normalize().unwrap_err();
        assert_eq!(err.name, "foo");
    }

    #[test]
    fn detects_conflict_across_bounds() {
        let mut set = SpecSet::new();
        set.add(spec("foo>1.5", "a"));
        set.add(spec("foo<1.2", "b"));
        assert!(set.normalize().is_err());
    }

    #[test]
    fn preserves_every_source() {
        let mut set = SpecSet::new();
        set.add(spec("foo>=1.0", "requirements.txt"));
        set.add(spec("foo<2.0", "overrides"));
        let norm = set.normalize().unwrap();
        let merged = &norm.get("foo")[0];
        assert!(merged.source.contains("requirements.txt"));
        assert!(merged.source.contains("overrides"));
    }
}
