//! Fetch log record types

use super::body::BodyError;
use super::format::payload_digest;
use super::UNCHANGED_PROFILE;
use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

/// The closed set of record kinds a fetch log holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Request,
    Response,
    Revisit,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Revisit => "revisit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "revisit" => Some(Self::Revisit),
            _ => None,
        }
    }
}

/// Fields shared by every record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_id: Uuid,
    pub date: DateTime<Utc>,
    pub target_uri: String,
    /// `sha256:<hex>` over the payload block
    pub payload_digest: String,
}

impl RecordHeader {
    /// Builds a header for a new record, stamping a fresh id and the current time
    pub fn new(target: &Url, payload: &[u8]) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            date: Utc::now(),
            target_uri: target.to_string(),
            payload_digest: payload_digest(payload),
        }
    }
}

/// A request the worker sent (or was about to send)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl RequestRecord {
    pub fn new(target: &Url, method: &str) -> Self {
        let payload = format!("{} {} HTTP/1.1\r\n\r\n", method, target).into_bytes();
        Self {
            header: RecordHeader::new(target, &payload),
            payload,
        }
    }

    /// The request method from the request line, if it is readable
    pub fn method(&self) -> Option<&str> {
        let line = self.payload.split(|b| *b == b'\r').next()?;
        std::str::from_utf8(line).ok()?.split_whitespace().next()
    }
}

/// A response as it came off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl ResponseRecord {
    pub fn new(target: &Url, status: u16, headers: &[(String, String)], body: &[u8]) -> Self {
        let payload = HttpResponse::encode(status, headers, body);
        Self {
            header: RecordHeader::new(target, &payload),
            payload,
        }
    }

    /// Parses the stored HTTP response block
    pub fn http(&self) -> Result<HttpResponse, BodyError> {
        HttpResponse::parse(&self.payload)
    }
}

/// A fetch whose outcome is reported relative to an earlier crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisitRecord {
    pub header: RecordHeader,
    pub profile: String,
    pub payload: Vec<u8>,
}

impl RevisitRecord {
    pub fn new(
        target: &Url,
        profile: &str,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Self {
        let payload = HttpResponse::encode(status, headers, body);
        Self {
            header: RecordHeader::new(target, &payload),
            profile: profile.to_string(),
            payload,
        }
    }

    /// True if this revisit reports unchanged content in the well-known profile
    pub fn is_unchanged(&self) -> bool {
        self.profile == UNCHANGED_PROFILE
    }

    pub fn http(&self) -> Result<HttpResponse, BodyError> {
        HttpResponse::parse(&self.payload)
    }
}

/// One entry of a fetch log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRecord {
    Request(RequestRecord),
    Response(ResponseRecord),
    Revisit(RevisitRecord),
}

impl FetchRecord {
    pub fn header(&self) -> &RecordHeader {
        match self {
            Self::Request(r) => &r.header,
            Self::Response(r) => &r.header,
            Self::Revisit(r) => &r.header,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Request(_) => RecordType::Request,
            Self::Response(_) => RecordType::Response,
            Self::Revisit(_) => RecordType::Revisit,
        }
    }

    pub fn target_uri(&self) -> &str {
        &self.header().target_uri
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Request(r) => &r.payload,
            Self::Response(r) => &r.payload,
            Self::Revisit(r) => &r.payload,
        }
    }
}

/// A decoded HTTP response block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Serializes a status line, headers and body into an HTTP response block
    pub fn encode(status: u16, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");

        let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason).into_bytes();
        for (name, value) in headers {
            // Header values with line breaks would break the block framing
            let value = value.replace(['\r', '\n'], " ");
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out
    }

    /// Parses an HTTP response block
    pub fn parse(block: &[u8]) -> Result<Self, BodyError> {
        let split = block
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| BodyError::Malformed("no end of HTTP headers".to_string()))?;

        let head = std::str::from_utf8(&block[..split])
            .map_err(|_| BodyError::Malformed("HTTP headers are not UTF-8".to_string()))?;
        let body = block[split + 4..].to_vec();

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.split_whitespace();

        match parts.next() {
            Some(version) if version.starts_with("HTTP/") => {}
            _ => {
                return Err(BodyError::Malformed(format!(
                    "bad status line {:?}",
                    status_line
                )))
            }
        }

        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| BodyError::Malformed(format!("bad status line {:?}", status_line)))?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| BodyError::Malformed(format!("bad header line {:?}", line)))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Case-insensitive header lookup, first match wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[test]
    fn test_request_method() {
        let req = RequestRecord::new(&target(), "GET");
        assert_eq!(req.method(), Some("GET"));
        assert_eq!(req.header.target_uri, "https://example.com/page");
    }

    #[test]
    fn test_response_http_view() {
        let headers = vec![("Content-Type".to_string(), "text/html".to_string())];
        let rsp = ResponseRecord::new(&target(), 200, &headers, b"<html></html>");
        let http = rsp.http().unwrap();

        assert_eq!(http.status, 200);
        assert_eq!(http.header("content-type"), Some("text/html"));
        assert_eq!(http.body, b"<html></html>");
    }

    #[test]
    fn test_header_value_line_breaks_flattened() {
        let headers = vec![("X-Odd".to_string(), "a\r\nb".to_string())];
        let rsp = ResponseRecord::new(&target(), 200, &headers, b"");
        assert_eq!(rsp.http().unwrap().header("x-odd"), Some("a  b"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(HttpResponse::parse(b"garbage").is_err());
        assert!(HttpResponse::parse(b"FTP 200\r\n\r\n").is_err());
        assert!(HttpResponse::parse(b"HTTP/1.1 abc\r\n\r\n").is_err());
    }

    #[test]
    fn test_revisit_profile() {
        let rv = RevisitRecord::new(&target(), UNCHANGED_PROFILE, 200, &[], b"");
        assert!(rv.is_unchanged());

        let other = RevisitRecord::new(&target(), "urn:other", 200, &[], b"");
        assert!(!other.is_unchanged());
    }
}
