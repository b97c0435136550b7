//! Normalized package names (PEP 503).

/// Normalize a name: fold `-`/`_`/`.` together and lowercase. Used wherever
/// two spellings of the same package name need to compare equal — requirement
/// names, index lookups, egg-info directory matching.
pub fn normalize(s: &str) -> String {
    let mut n = s.replace(['-', '_', '.'], "-");
    n.make_ascii_lowercase();
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separators() {
        assert_eq!(normalize("Django_Rest.Framework"), "django-rest-framework");
        assert_eq!(normalize("django-rest-framework"), "django-rest-framework");
    }
}
