//! Small pattern extractors for the device's unstructured text responses.
//! Reject rather than coerce on malformed input — callers surface a
//! protocol error instead of guessing.

/// `'var count="69";'` → `Some(69)`. `None` on anything unparseable.
pub fn parse_count(text: &str) -> Option<u32> {
    first_quoted(text)?.parse().ok()
}

/// `'var capability="emr,norm,GPSdata,";'` → `["emr", "norm", "GPSdata"]`.
pub fn parse_capability(text: &str) -> Option<Vec<String>> {
    let inner = first_quoted(text)?;
    Some(
        inner
            .trim_end_matches(',')
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
    )
}

/// `"a/b.TS; c/d.TS;"` → `["a/b.TS", "c/d.TS"]`. Empty string → `[]`.
pub fn parse_file_list(text: &str) -> Vec<String> {
    text.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// The substring inside the first pair of double quotes.
fn first_quoted(text: &str) -> Option<&str> {
    let start = text.find('"')? + 1;
    let end = text[start..].find('"')? + start;
    Some(&text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_zero() {
        assert_eq!(parse_count(r#"var count="0";"#), Some(0));
    }

    #[test]
    fn count_nonzero() {
        assert_eq!(parse_count(r#"var count="69";"#), Some(69));
    }

    #[test]
    fn count_unparseable() {
        assert_eq!(parse_count(r#"var count="abc";"#), None);
    }

    #[test]
    fn file_list_basic() {
        assert_eq!(
            parse_file_list("a/b.TS; c/d.TS;"),
            vec!["a/b.TS".to_string(), "c/d.TS".to_string()]
        );
    }

    #[test]
    fn file_list_empty() {
        assert_eq!(parse_file_list(""), Vec::<String>::new());
    }

    #[test]
    fn capability_parses_trailing_comma() {
        assert_eq!(
            parse_capability(r#"var capability="emr,norm,GPSdata,";"#),
            Some(vec![
                "emr".to_string(),
                "norm".to_string(),
                "GPSdata".to_string()
            ])
        );
    }
}
