use once_cell::sync::Lazy;
use regex::Regex;

/// Identifier used when sanitization strips a branch name down to nothing.
pub const DEFAULT_NAME: &str = "default";

/// Branch sentinel recorded for worktrees checked out at a bare commit.
pub const DETACHED_BRANCH: &str = "HEAD";

/// Name recorded for worktrees checked out at a bare commit.
pub const DETACHED_NAME: &str = "detached-head";

static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9-]").expect("valid regex"));
static HYPHEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").expect("valid regex"));

/// Converts a branch name to a URL-safe identifier.
///
/// Lowercases, maps `/`, `_` and `.` to `-`, strips everything outside
/// `[a-z0-9-]`, collapses hyphen runs and trims the ends. An input that
/// sanitizes to nothing yields [`DEFAULT_NAME`].
///
/// Examples:
///   - "feature/auth" -> "feature-auth"
///   - "bugfix/JIRA-123" -> "bugfix-jira-123"
///   - "feature/user_profile" -> "feature-user-profile"
pub fn sanitize(raw: &str) -> String {
    let mut result = raw.to_lowercase();
    result = result.replace(['/', '_', '.'], "-");
    result = INVALID_CHARS.replace_all(&result, "").into_owned();
    result = HYPHEN_RUNS.replace_all(&result, "-").into_owned();
    let result = result.trim_matches('-');

    if result.is_empty() {
        return DEFAULT_NAME.to_string();
    }
    result.to_string()
}

/// Checks whether an externally supplied name is usable as an identifier.
///
/// Stricter than [`sanitize`]'s own output contract in one spot: the first
/// character must be a letter. The sanitizer's fallback happens to pass this
/// rule; the two are not otherwise coupled.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return false;
    }

    if name.ends_with('-') {
        return false;
    }

    !name.contains("--")
}
