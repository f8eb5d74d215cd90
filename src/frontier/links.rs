//! Outbound link extraction from parsed HTML
//!
//! **Include:**
//! - `<a href="...">` anywhere in the document
//! - `<link rel="canonical" href="...">`
//!
//! **Exclude:**
//! - `<a href="..." download>`
//! - `javascript:`, `mailto:`, `tel:` and `data:` links
//! - fragment-only links (same page anchors)
//!
//! Relative links resolve against `<base href>` when the document declares
//! one, and against the document URL otherwise.

use scraper::{Html, Selector};
use url::Url;

/// Extracts every followable link in a document as an absolute URL
///
/// # Example
///
/// ```
/// use scraper::Html;
/// use tidewater::frontier::extract_links;
/// use url::Url;
///
/// let doc = Html::parse_document(r#"<a href="/page">Link</a>"#);
/// let base = Url::parse("https://example.com/dir/").unwrap();
/// let links = extract_links(&doc, &base);
/// assert_eq!(links[0].as_str(), "https://example.com/page");
/// ```
pub fn extract_links(document: &Html, document_url: &Url) -> Vec<Url> {
    let base = base_href(document, document_url).unwrap_or_else(|| document_url.clone());
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, &base)) {
                links.push(url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, &base)) {
                links.push(url);
            }
        }
    }

    links
}

fn base_href(document: &Html, document_url: &Url) -> Option<Url> {
    let selector = Selector::parse("base[href]").ok()?;
    let href = document.select(&selector).next()?.value().attr("href")?;
    document_url.join(href.trim()).ok()
}

/// Resolves an href against the base URL, or `None` if it should not be followed
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}
