//! Parsers for the two external constraint-file formats SPEC_FULL.md §6
//! names: `requirements.txt` and buildout `.cfg`.
//!
//! Grounded on `examples/original_source/pypi2nix/package_resolver.py`'s
//! `_parse_requirements`/`_parse_buildout`.

use configparser::ini::Ini;
use thiserror::Error;

use crate::spec::{ParseSpecError, Spec};

#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("malformed requirement on line {line}: {source}")]
    MalformedRequirement {
        line: String,
        #[source]
        source: ParseSpecError,
    },
    #[error("malformed buildout .cfg: {0}")]
    MalformedCfg(String),
}

/// One requirement per non-comment, non-blank line.
pub fn parse_requirements(content: &str, source: &str) -> Result<Vec<Spec>, ConstraintError> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            Spec::parse(line, source).map_err(|e| ConstraintError::MalformedRequirement {
                line: line.to_string(),
                source: e,
            })
        })
        .collect()
}

/// Parsed buildout `.cfg`: `[versions]` pins plus any `[buildout] extends=`
/// URLs still to be followed by the caller (recursion crosses an I/O
/// boundary this module doesn't own).
#[derive(Debug, Default)]
pub struct BuildoutCfg {
    pub pins: Vec<(String, String)>,
    pub extends: Vec<String>,
}

/// Parse `[versions] name = version` pairs and the `[buildout] extends=`
/// URL list (space-separated, per the source format) from one `.cfg`
/// document. Malformed sections are reported via the returned error rather
/// than silently ignored, per the Open Question decision in DESIGN.md.
pub fn parse_buildout(content: &str) -> Result<BuildoutCfg, ConstraintError> {
    let mut ini = Ini::new_cs();
    let map = ini
        .read(content.to_string())
        .map_err(ConstraintError::MalformedCfg)?;

    let mut cfg = BuildoutCfg::default();

    if let Some(versions) = map.get("versions") {
        for (package, version) in versions {
            match version {
                Some(v) => cfg.pins.push((package.clone(), v.clone())),
                None => tracing::warn!(section = "versions", key = %package, "malformed buildout entry with no value"),
            }
        }
    }

    if let Some(buildout) = map.get("buildout") {
        if let Some(Some(extends)) = buildout.get("extends") {
            cfg.extends = extends.split_whitespace().map(str::to_string).collect();
        }
    }

    Ok(cfg)
}

/// Render `{spec.name}`/`{spec.pinned}` placeholders against the spec that
/// triggered this constraint lookup, mirroring the substitution
/// [`crate::hooks::HookPolicy::link_hook`] applies to `src` templates.
pub fn render_template(line: &str, spec: Option<&Spec>) -> String {
    match spec {
        None => line.to_string(),
        Some(spec) => line.replace("{spec.name}", &spec.name).replace(
            "{spec.pinned}",
            &spec
                .pinned
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requirements_with_comments() {
        let content = "django>=1.5\n# a comment\n\npsycopg2==2.9\n";
        let specs = parse_requirements(content, "requirements.txt").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "django");
    }

    #[test]
    fn parses_buildout_versions_and_extends() {
        let content = "[buildout]\nextends = base.cfg extra.cfg\n\n[versions]\ndjango = 1.5.0\npsycopg2 = 2.9\n";
        let cfg = parse_buildout(content).unwrap();
        assert_eq!(cfg.extends, vec!["base.cfg", "extra.cfg"]);
        assert_eq!(cfg.pins.len(), 2);
    }
}
