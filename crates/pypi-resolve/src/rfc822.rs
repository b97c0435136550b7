//! A lenient RFC-822-ish header parser, used for `PKG-INFO` files.
//!
//! Grounded on `rattler_installs_packages/src/rfc822ish.rs`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rfc822 {
    pub fields: HashMap<String, Vec<String>>,
    pub body: Option<String>,
}

#[derive(Debug, Error)]
pub enum Rfc822Error {
    #[error("malformed header section at line {0}")]
    Malformed(usize),
    #[error("field {0:?} appears more than once, expected a single value")]
    DuplicateField(String),
    #[error("field {0:?} is required but missing")]
    MissingField(String),
}

impl Rfc822 {
    /// Parse RFC-822-ish headers followed by an optional blank-line-
    /// delimited free-text body (as `PKG-INFO`'s `Description` sometimes is,
    /// when not folded into the `Description` header itself).
    pub fn parse(input: &str) -> Result<Rfc822, Rfc822Error> {
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();
        let mut lines = input.lines().enumerate().peekable();
        let mut current: Option<(String, String)> = None;

        let flush = |fields: &mut HashMap<String, Vec<String>>, current: Option<(String, String)>| {
            if let Some((name, value)) = current {
                fields.entry(name).or_default().push(value.trim_end().to_string());
            }
        };

        let mut body_start = None;
        while let Some((lineno, line)) = lines.next() {
            if line.is_empty() {
                body_start = lines.peek().map(|_| lineno + 1);
                break;
            }
            if line.starts_with([' ', '\t']) {
                match &mut current {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(line.trim_start());
                    }
                    None => return Err(Rfc822Error::Malformed(lineno)),
                }
                continue;
            }
            let Some(colon) = line.find(':') else {
                return Err(Rfc822Error::Malformed(lineno));
            };
            flush(&mut fields, current.take());
            let name = line[..colon].trim().to_string();
            let value = line[colon + 1..].trim().to_string();
            current = Some((name, value));
        }
        flush(&mut fields, current.take());

        let body = body_start.map(|start| {
            input
                .lines()
                .skip(start)
                .collect::<Vec<_>>()
                .join("\n")
        });

        Ok(Rfc822 { fields, body })
    }

    /// All values recorded for `name`, in file order.
    pub fn take_all(&self, name: &str) -> Vec<String> {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    /// The single value for `name`, if present; errors if it appears more
    /// than once.
    pub fn maybe_take(&self, name: &str) -> Result<Option<String>, Rfc822Error> {
        match self.fields.get(name) {
            None => Ok(None),
            Some(values) if values.len() == 1 => Ok(Some(values[0].clone())),
            Some(_) => Err(Rfc822Error::DuplicateField(name.to_string())),
        }
    }

    /// The single, required value for `name`.
    pub fn take(&self, name: &str) -> Result<String, Rfc822Error> {
        self.maybe_take(name)?
            .ok_or_else(|| Rfc822Error::MissingField(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_headers() {
        let doc = "Metadata-Version: 1.0\nName: sentry\nVersion: 7.0.0\n";
        let parsed = Rfc822::parse(doc).unwrap();
        assert_eq!(parsed.take("Name").unwrap(), "sentry");
        assert_eq!(parsed.take("Version").unwrap(), "7.0.0");
    }

    #[test]
    fn supports_repeated_fields_and_continuations() {
        let doc = "Name: foo\nClassifier: A\nClassifier: B\nDescription: line one\n  line two\n";
        let parsed = Rfc822::parse(doc).unwrap();
        assert_eq!(parsed.take_all("Classifier"), vec!["A", "B"]);
        assert_eq!(parsed.take("Description").unwrap(), "line one\nline two");
    }

    #[test]
    fn duplicate_single_value_field_errors() {
        let doc = "Name: foo\nName: bar\n";
        let parsed = Rfc822::parse(doc).unwrap();
        assert!(parsed.take("Name").is_err());
    }

    #[test]
    fn body_after_blank_line_is_kept() {
        let doc = "Name: foo\n\nThis is the long description.\nSecond line.";
        let parsed = Rfc822::parse(doc).unwrap();
        assert_eq!(
            parsed.body.as_deref(),
            Some("This is the long description.\nSecond line.")
        );
    }
}
