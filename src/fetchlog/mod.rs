//! Append-only fetch log
//!
//! Every fetch a crawl worker makes is written to a per-domain log as a
//! sequence of typed records (request, response, revisit). The log is never
//! rewritten in place; after a crash the resynchronizer reads it back and
//! copies every intact record into a fresh log.
//!
//! # Record framing
//!
//! ```text
//! TIDELOG/1.0\r\n
//! Record-Type: response\r\n
//! Record-ID: <urn:uuid:...>\r\n
//! Date: 2024-01-01T00:00:00+00:00\r\n
//! Target-URI: https://example.com/\r\n
//! Content-Length: 1234\r\n
//! Payload-Digest: sha256:<hex>\r\n
//! \r\n
//! <payload bytes>\r\n\r\n
//! ```
//!
//! Response and revisit payloads are HTTP response blocks (status line,
//! headers, blank line, body). Revisit records also carry a `Profile` field.

mod body;
mod format;
mod reader;
mod record;
mod recorder;

pub use body::{extract_body, BodyError, DocumentBody};
pub use format::{decode_record, encode_record, payload_digest};
pub use reader::LogReader;
pub use record::{
    FetchRecord, HttpResponse, RecordHeader, RecordType, RequestRecord, ResponseRecord,
    RevisitRecord,
};
pub use recorder::LogRecorder;

use thiserror::Error;

/// Revisit profile marking a fetch whose body was unchanged since a prior crawl
pub const UNCHANGED_PROFILE: &str = "urn:tidewater:revisit:unchanged";

/// Magic line opening every record
pub const RECORD_MAGIC: &str = "TIDELOG/1.0";

/// Errors raised while reading or writing a fetch log
///
/// Any of these coming out of a [`LogReader`] ends iteration: once framing
/// is in doubt nothing after it can be trusted.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad record magic at offset {offset}: {found:?}")]
    BadMagic { offset: u64, found: String },

    #[error("Truncated record at offset {offset}")]
    Truncated { offset: u64 },

    #[error("Record at offset {offset} is missing the {field} field")]
    MissingField { offset: u64, field: &'static str },

    #[error("Payload digest mismatch for {target}: expected {expected}, got {actual}")]
    DigestMismatch {
        target: String,
        expected: String,
        actual: String,
    },

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Result type for fetch log operations
pub type LogResult<T> = Result<T, LogError>;
