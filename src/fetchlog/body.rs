//! Document body extraction from stored responses

use super::record::HttpResponse;
use thiserror::Error;

/// What a stored response contains, as far as link extraction cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentBody {
    /// A decoded HTML document
    Ok { content_type: String, body: String },

    /// The response is not an HTML document
    NotHtml { content_type: String },

    /// The response status carries no document
    BadStatus(u16),
}

/// Errors decoding a stored response body
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Malformed HTTP block: {0}")]
    Malformed(String),

    #[error("Unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("Body is not valid UTF-8")]
    InvalidUtf8,
}

/// Extracts the document body of a stored response
///
/// Bodies are stored as received. Anything still content-encoded (gzip,
/// brotli, ...) or declared in a charset other than UTF-8/ASCII is an error;
/// the caller skips such records instead of guessing.
pub fn extract_body(response: &HttpResponse) -> Result<DocumentBody, BodyError> {
    if !(200..300).contains(&response.status) {
        return Ok(DocumentBody::BadStatus(response.status));
    }

    if let Some(encoding) = response.header("content-encoding") {
        let encoding = encoding.trim().to_lowercase();
        if !encoding.is_empty() && encoding != "identity" {
            return Err(BodyError::UnsupportedEncoding(encoding));
        }
    }

    let content_type = response
        .header("content-type")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let mut params = content_type.split(';');
    let mime = params.next().unwrap_or_default().trim().to_string();

    let is_html = match mime.as_str() {
        "text/html" | "application/xhtml+xml" => true,
        "" => looks_like_html(&response.body),
        _ => false,
    };

    if !is_html {
        return Ok(DocumentBody::NotHtml { content_type: mime });
    }

    let charset = params
        .filter_map(|p| p.trim().strip_prefix("charset="))
        .map(|c| c.trim_matches('"').to_string())
        .next();

    match charset.as_deref() {
        None | Some("utf-8") | Some("utf8") | Some("us-ascii") | Some("ascii") => {}
        Some(other) => return Err(BodyError::UnsupportedCharset(other.to_string())),
    }

    let body = String::from_utf8(response.body.clone()).map_err(|_| BodyError::InvalidUtf8)?;

    Ok(DocumentBody::Ok {
        content_type: if mime.is_empty() {
            "text/html".to_string()
        } else {
            mime
        },
        body,
    })
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = &body[..body.len().min(512)];
    let head = String::from_utf8_lossy(head).to_lowercase();
    let head = head.trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<html")
}
