//! Wildcard URL matching for page-view triggers.

use regex::Regex;
use tracing::warn;

/// Translate a wildcard pattern into an anchored regex.
///
/// Every regex metacharacter is taken literally except `*`, which matches any
/// run of characters (including `/`).
pub fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    match Regex::new(&format!("^{}$", body)) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "Could not compile URL pattern");
            None
        }
    }
}

/// Whether `path` satisfies `pattern`. No pattern matches everything.
pub fn matches_url(pattern: Option<&str>, path: &str) -> bool {
    let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
        return true;
    };
    wildcard_regex(pattern)
        .map(|re| re.is_match(path))
        .unwrap_or(false)
}
