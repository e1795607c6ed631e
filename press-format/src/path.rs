//! Path policy applied to entries on their way out of an archive:
//! exclusion, prefix rewriting and separator handling.

use std::path::MAIN_SEPARATOR;

/// One prefix rewrite, applied to entry paths before they are joined to
/// the destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub from: String,
    pub to: String,
}

impl RewriteRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> RewriteRule {
        RewriteRule {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// An entry is excluded when a rule covers a whole leading run of its
/// path components. A rule `foo` covers `foo` and `foo/bar` but never
/// `foo2`.
pub fn is_excluded<S: AsRef<str>>(path: &str, rules: &[S]) -> bool {
    rules.iter().any(|rule| has_prefix(path, rule.as_ref()))
}

/// Applies the first rule whose `from` covers a leading run of path
/// components, substituting only the matched prefix. Without a match the
/// path passes through unchanged.
pub fn rewrite(path: &str, rules: &[RewriteRule]) -> String {
    for rule in rules {
        if has_prefix(path, &rule.from) {
            return format!("{}{}", rule.to, &path[rule.from.len()..]);
        }
    }
    path.to_string()
}

/// Component-boundary prefix test: both sides get a trailing separator so
/// `foo` cannot match into `foo2`.
fn has_prefix(path: &str, prefix: &str) -> bool {
    format!("{}{}", path, MAIN_SEPARATOR).starts_with(&format!("{}{}", prefix, MAIN_SEPARATOR))
}

/// Collapses every run of backslashes into an escaped pair before the
/// path touches the filesystem.
pub(crate) fn escape_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut in_run = false;
    for c in path.chars() {
        if c == '\\' {
            if !in_run {
                out.push_str("\\\\");
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

#[cfg(windows)]
pub(crate) fn normalize_separators(path: &str) -> String {
    path.replace('/', "\\")
}

#[cfg(not(windows))]
pub(crate) fn normalize_separators(path: &str) -> String {
    path.to_string()
}
