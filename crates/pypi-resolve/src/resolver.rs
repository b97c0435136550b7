//! The iterative fixed-point solver: repeatedly normalize, pin the best
//! match for each unpinned name, and harvest newly-discovered dependencies,
//! until nothing changes (SPEC_FULL.md §4.7).
//!
//! Grounded on `examples/original_source/pypi2nix/package_resolver.py`'s
//! `resolve()` outer loop.

use crate::error::ResolveResult;
use crate::manager::PackageManager;
use crate::spec::Spec;
use crate::spec_set::SpecSet;

const MAX_ITERATIONS: usize = 64;

/// Drive `state` to a fixed point: every name pinned, every transitively
/// declared dependency present. Deterministic — each pass processes names
/// in the insertion-order snapshot taken at the start of that pass.
pub async fn resolve(manager: &PackageManager, mut state: SpecSet) -> ResolveResult<SpecSet> {
    for iteration in 0..MAX_ITERATIONS {
        state = state.normalize()?;
        let mut changed = false;

        let names: Vec<String> = state.names().map(|n| n.to_string()).collect();
        for name in names {
            let spec = state.get(&name)[0].clone();

            let version = manager.find_best_match(&spec).await?;
            if spec.pinned.as_ref() != Some(&version) {
                state.add(spec.pin_to(&version));
                changed = true;
            }

            let deps = manager
                .get_dependencies(&spec.name, &version, &spec.extras)
                .await?;
            for (dep, _section) in deps {
                if !is_already_covered(&state, &dep) {
                    state.add(dep);
                    changed = true;
                }
            }
        }

        if !changed {
            tracing::info!(iterations = iteration + 1, "resolver converged");
            return Ok(state.normalize()?);
        }
    }

    let unresolved: Vec<String> = state
        .names()
        .filter(|n| !state.get(n).iter().any(|s| s.is_pinned()))
        .map(|n| n.to_string())
        .collect();
    Err(crate::error::ResolveCoreError::ResolveError {
        unresolved,
        reason: format!("exceeded {MAX_ITERATIONS} iterations without converging"),
    })
}

/// A name is "already covered" once it's registered in the set at all — the
/// next normalize pass folds the new predicate in regardless.
fn is_already_covered(state: &SpecSet, dep: &Spec) -> bool {
    let existing = state.get(&dep.name);
    if existing.is_empty() {
        return false;
    }
    // An identical spec (same preds/extras) contributes nothing new.
    existing.iter().any(|s| s == dep)
}
