//! `peg`-based grammars for PEP 440 versions/specifiers and for the
//! `name[extras] op1 v1, op2 v2 ...` requirement-line syntax used by [`crate::spec::Spec`].
//!
//! Grounded on the version/specifier/name-requirement grammar in
//! `rattler_installs_packages`'s `src/reqparse.rs`, trimmed of the
//! environment-marker and URL-requirement rules this crate doesn't need.

use crate::version::{LocalSegment, PreRelease, Version};

peg::parser! {
    grammar versions() for str {
        rule wsp() = quiet!{[' ' | '\t']}

        rule _() = wsp()*

        rule digits() -> &'input str = s:$(['0'..='9']+) { s }

        rule epoch() -> u64
            = n:digits() "!" { n.parse().unwrap() }

        rule release() -> Vec<u64>
            = n:digits() ++ "." {
                n.iter().map(|s| s.parse().unwrap()).collect()
            }

        rule pre() -> PreRelease
            = ("a" / "alpha") "-"? "."? n:digits()? { PreRelease::A(n.map(|s| s.parse().unwrap()).unwrap_or(0)) }
            / ("b" / "beta") "-"? "."? n:digits()? { PreRelease::B(n.map(|s| s.parse().unwrap()).unwrap_or(0)) }
            / ("rc" / "c" / "pre" / "preview") "-"? "."? n:digits()? { PreRelease::Rc(n.map(|s| s.parse().unwrap()).unwrap_or(0)) }

        rule sep() = ("." / "-" / "_")

        rule post_label() = "post" / "rev" / "r"

        /// `-N` shorthand, or `[-_.]?(post|rev|r)[-_.]?N?`.
        rule post() -> u64
            = "-" n:digits() { n.parse().unwrap() }
            / sep()? post_label() sep()? n:digits()? { n.map(|s| s.parse().unwrap()).unwrap_or(0) }

        rule dev() -> u64
            = sep()? "dev" sep()? n:digits()? { n.map(|s| s.parse().unwrap()).unwrap_or(0) }

        rule local_segment() -> LocalSegment
            = n:digits() { LocalSegment::Numeric(n.parse().unwrap()) }
            / s:$(['a'..='z' | 'A'..='Z' | '0'..='9']+) { LocalSegment::Alpha(s.to_ascii_lowercase()) }

        rule local() -> Vec<LocalSegment>
            = "+" segs:local_segment() ++ sep() { segs }

        /// Top-level version grammar: `v`-prefix is accepted and ignored.
        pub rule version() -> Version
            = "v"? ep:(e:epoch() {e})? rel:release()
              pre_part:(sep()? p:pre() {p})?
              post_part:(post())?
              dev_part:(dev())?
              local_part:(local())?
            {
                Version {
                    epoch: ep.unwrap_or(0),
                    release: rel,
                    pre: pre_part,
                    post: post_part,
                    dev: dev_part,
                    local: local_part.unwrap_or_default(),
                }
            }

        rule cmp_op() -> &'input str
            = $("===" / "==" / "!=" / "<=" / ">=" / "~=" / "<" / ">")

        /// A single `op value` clause. `value` is kept as raw text because
        /// `==`/`!=` accept a `.*` wildcard suffix that isn't a parseable
        /// [`Version`] on its own.
        rule one_clause() -> (&'input str, &'input str)
            = op:cmp_op() _ v:$((!("," / wsp()) [_])+) { (op, v) }

        /// Comma-separated list of clauses, e.g. `>=1.3,<1.4,!=1.3.5`.
        pub rule clauses() -> Vec<(String, String)>
            = _ c:one_clause() ++ (_ "," _) _ {
                c.into_iter().map(|(op, v)| (op.to_string(), v.to_string())).collect()
            }
            / _ { Vec::new() }

        rule identifier() -> &'input str
            = $(['A'..='Z' | 'a'..='z' | '0'..='9'] (['A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.'])*)

        pub rule name() -> &'input str = identifier()

        rule extra() -> &'input str = identifier()

        rule extras() -> Vec<String>
            = "[" _ e:extra() ++ (_ "," _) _ "]" { e.into_iter().map(String::from).collect() }

        /// `name[extra1,extra2] op1 v1, op2 v2, ...`
        pub rule spec_line() -> (String, Vec<String>, Vec<(String, String)>)
            = _ n:name() _ ex:extras()? _ c:clauses() _ {
                (n.to_string(), ex.unwrap_or_default(), c)
            }
    }
}

/// Parse a bare version string (no operator, no wildcard).
pub fn version(input: &str) -> Result<Version, peg::error::ParseError<peg::str::LineCol>> {
    versions::version(input)
}

/// Parse the comma-separated clause list of a version specifier, e.g.
/// `">=1.3,<1.4"`. Returns raw `(op, value)` pairs; wildcard handling lives in
/// [`crate::specifier`].
pub fn clauses(
    input: &str,
) -> Result<Vec<(String, String)>, peg::error::ParseError<peg::str::LineCol>> {
    versions::clauses(input)
}

/// Parse a full requirement line into `(name, extras, clauses)`.
pub fn spec_line(
    input: &str,
) -> Result<(String, Vec<String>, Vec<(String, String)>), peg::error::ParseError<peg::str::LineCol>>
{
    versions::spec_line(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_release() {
        let v = version("1.2.3").unwrap();
        assert_eq!(v.release, vec![1, 2, 3]);
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn parses_pre_post_dev() {
        let v = version("1.0a1.post2.dev3").unwrap();
        assert_eq!(v.release, vec![1, 0]);
        assert!(matches!(v.pre, Some(PreRelease::A(1))));
        assert_eq!(v.post, Some(2));
        assert_eq!(v.dev, Some(3));
    }

    #[test]
    fn parses_epoch_and_local() {
        let v = version("1!2.0+deadbeef.1").unwrap();
        assert_eq!(v.epoch, 1);
        assert_eq!(v.release, vec![2, 0]);
        assert_eq!(v.local.len(), 2);
    }

    #[test]
    fn parses_spec_line_with_extras() {
        let (name, extras, clauses) = spec_line("sentry[postgres]>=7.0,<8.0").unwrap();
        assert_eq!(name, "sentry");
        assert_eq!(extras, vec!["postgres".to_string()]);
        assert_eq!(clauses.len(), 2);
    }

    #[test]
    fn parses_bare_name() {
        let (name, extras, clauses) = spec_line("Django").unwrap();
        assert_eq!(name, "Django");
        assert!(extras.is_empty());
        assert!(clauses.is_empty());
    }
}
