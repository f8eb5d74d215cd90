/// Checks whether a host falls under a scope pattern
///
/// Two pattern forms are understood:
/// 1. `example.com` matches only `example.com`
/// 2. `*.example.com` matches `example.com` and every subdomain of it
///
/// Both sides are expected to be lowercase already.
///
/// ```
/// use tidewater::url::matches_scope;
///
/// assert!(matches_scope("*.example.com", "api.v2.example.com"));
/// assert!(!matches_scope("example.com", "blog.example.com"));
/// ```
pub fn matches_scope(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => host == pattern,
    }
}
