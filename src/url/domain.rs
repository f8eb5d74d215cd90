use url::Url;

/// Extracts the lowercase host of a URL, or `None` if it has none
///
/// # Examples
///
/// ```
/// use url::Url;
/// use tidewater::url::extract_domain;
///
/// let url = Url::parse("https://Blog.Example.com:8443/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
