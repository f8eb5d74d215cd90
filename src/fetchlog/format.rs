//! Record framing: encoding and decoding of single records

use super::record::{
    FetchRecord, RecordHeader, RecordType, RequestRecord, ResponseRecord, RevisitRecord,
};
use super::{LogError, LogResult, RECORD_MAGIC};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::{BufRead, ErrorKind, Read};
use uuid::Uuid;

/// Upper bound on a single payload; anything larger is treated as corruption
const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// Upper bound on one header line, line ending included
const MAX_HEADER_LINE: usize = 64 * 1024;

const TRAILER: &[u8; 4] = b"\r\n\r\n";

/// Computes the `sha256:<hex>` digest of a payload block
pub fn payload_digest(payload: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(payload)))
}

/// Serializes one record, framing included
pub fn encode_record(record: &FetchRecord) -> Vec<u8> {
    let header = record.header();
    let payload = record.payload();

    let mut out = Vec::with_capacity(payload.len() + 512);
    push_line(&mut out, RECORD_MAGIC);
    push_field(&mut out, "Record-Type", record.record_type().as_str());
    push_field(
        &mut out,
        "Record-ID",
        &format!("<urn:uuid:{}>", header.record_id),
    );
    push_field(&mut out, "Date", &header.date.to_rfc3339());
    push_field(&mut out, "Target-URI", &header.target_uri);
    if let FetchRecord::Revisit(revisit) = record {
        push_field(&mut out, "Profile", &revisit.profile);
    }
    push_field(&mut out, "Content-Length", &payload.len().to_string());
    push_field(&mut out, "Payload-Digest", &header.payload_digest);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(payload);
    out.extend_from_slice(TRAILER);
    out
}

fn push_line(out: &mut Vec<u8>, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn push_field(out: &mut Vec<u8>, name: &str, value: &str) {
    push_line(out, &format!("{}: {}", name, value));
}

/// Reads one record starting at `offset`
///
/// Returns `Ok(None)` on a clean end of input (no bytes left before a record
/// begins) and the record plus the number of bytes it occupied otherwise.
pub fn decode_record<R: BufRead>(
    reader: &mut R,
    offset: u64,
) -> LogResult<Option<(FetchRecord, u64)>> {
    let mut consumed = 0u64;
    let mut line = Vec::new();

    let n = read_header_line(reader, &mut line, offset)?;
    if n == 0 {
        return Ok(None);
    }
    consumed += n as u64;

    let magic = trim_crlf(&line);
    if magic != RECORD_MAGIC.as_bytes() {
        return Err(LogError::BadMagic {
            offset,
            found: String::from_utf8_lossy(magic).chars().take(40).collect(),
        });
    }

    let mut fields: Vec<(String, String)> = Vec::new();
    loop {
        line.clear();
        let n = read_header_line(reader, &mut line, offset)?;
        if n == 0 || !line.ends_with(b"\n") {
            return Err(LogError::Truncated { offset });
        }
        consumed += n as u64;

        let text = trim_crlf(&line);
        if text.is_empty() {
            break;
        }

        let text = std::str::from_utf8(text).map_err(|_| {
            LogError::Malformed(format!("non-UTF-8 header line at offset {}", offset))
        })?;
        let (name, value) = text.split_once(':').ok_or_else(|| {
            LogError::Malformed(format!("bad header line {:?} at offset {}", text, offset))
        })?;
        fields.push((name.trim().to_string(), value.trim().to_string()));
    }

    let field = |name: &'static str| -> LogResult<&str> {
        fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .ok_or(LogError::MissingField {
                offset,
                field: name,
            })
    };

    let record_type = RecordType::parse(field("Record-Type")?).ok_or_else(|| {
        LogError::Malformed(format!("unknown record type at offset {}", offset))
    })?;

    let record_id = field("Record-ID")?;
    let record_id = record_id
        .strip_prefix("<urn:uuid:")
        .and_then(|s| s.strip_suffix('>'))
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| LogError::Malformed(format!("bad record id {:?}", record_id)))?;

    let date = field("Date")?;
    let date = DateTime::parse_from_rfc3339(date)
        .map_err(|e| LogError::Malformed(format!("bad date {:?}: {}", date, e)))?
        .with_timezone(&Utc);

    let target_uri = field("Target-URI")?.to_string();
    let expected_digest = field("Payload-Digest")?.to_string();

    let length: usize = field("Content-Length")?
        .parse()
        .map_err(|_| LogError::Malformed(format!("bad content length at offset {}", offset)))?;
    if length > MAX_PAYLOAD_LEN {
        return Err(LogError::Malformed(format!(
            "content length {} at offset {} exceeds limit",
            length, offset
        )));
    }

    let profile = match record_type {
        RecordType::Revisit => Some(field("Profile")?.to_string()),
        _ => None,
    };

    let mut payload = vec![0u8; length];
    read_exact_or_truncated(reader, &mut payload, offset)?;

    let mut trailer = [0u8; 4];
    read_exact_or_truncated(reader, &mut trailer, offset)?;
    if &trailer != TRAILER {
        return Err(LogError::Malformed(format!(
            "missing record trailer at offset {}",
            offset
        )));
    }
    consumed += (length + TRAILER.len()) as u64;

    let actual_digest = payload_digest(&payload);
    if actual_digest != expected_digest {
        return Err(LogError::DigestMismatch {
            target: target_uri,
            expected: expected_digest,
            actual: actual_digest,
        });
    }

    let header = RecordHeader {
        record_id,
        date,
        target_uri,
        payload_digest: expected_digest,
    };

    let record = match (record_type, profile) {
        (RecordType::Request, _) => FetchRecord::Request(RequestRecord { header, payload }),
        (RecordType::Response, _) => FetchRecord::Response(ResponseRecord { header, payload }),
        (RecordType::Revisit, profile) => FetchRecord::Revisit(RevisitRecord {
            header,
            profile: profile.unwrap_or_default(),
            payload,
        }),
    };

    Ok(Some((record, consumed)))
}

/// Reads up to and including the next newline, or fails once the line
/// outgrows `MAX_HEADER_LINE`
fn read_header_line<R: BufRead>(
    reader: &mut R,
    line: &mut Vec<u8>,
    offset: u64,
) -> LogResult<usize> {
    let n = reader
        .by_ref()
        .take(MAX_HEADER_LINE as u64)
        .read_until(b'\n', line)?;
    if n == MAX_HEADER_LINE && !line.ends_with(b"\n") {
        return Err(LogError::Malformed(format!(
            "header line at offset {} exceeds {} bytes",
            offset, MAX_HEADER_LINE
        )));
    }
    Ok(n)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> LogResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => LogError::Truncated { offset },
        _ => LogError::Io(e),
    })
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn sample_response() -> FetchRecord {
        let url = Url::parse("https://example.com/").unwrap();
        let headers = vec![("Content-Type".to_string(), "text/html".to_string())];
        FetchRecord::Response(ResponseRecord::new(&url, 200, &headers, b"<p>hi</p>"))
    }

    #[test]
    fn test_decode_encoded_record() {
        let record = sample_response();
        let bytes = encode_record(&record);

        let (decoded, consumed) = decode_record(&mut &bytes[..], 0).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len() as u64);
    }

    #[test]
    fn test_revisit_keeps_profile() {
        let url = Url::parse("https://example.com/").unwrap();
        let record = FetchRecord::Revisit(RevisitRecord::new(&url, "urn:x", 304, &[], b""));
        let bytes = encode_record(&record);

        let (decoded, _) = decode_record(&mut &bytes[..], 0).unwrap().unwrap();
        match decoded {
            FetchRecord::Revisit(rv) => assert_eq!(rv.profile, "urn:x"),
            other => panic!("expected revisit, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_is_clean_end() {
        assert!(decode_record(&mut &b""[..], 0).unwrap().is_none());
    }

    #[test]
    fn test_bad_magic() {
        let err = decode_record(&mut &b"WARC/1.0\r\n"[..], 7).unwrap_err();
        assert!(matches!(err, LogError::BadMagic { offset: 7, .. }));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = encode_record(&sample_response());
        let cut = &bytes[..bytes.len() - 10];

        let err = decode_record(&mut &cut[..], 0).unwrap_err();
        assert!(matches!(err, LogError::Truncated { .. }));
    }

    #[test]
    fn test_truncated_header_block() {
        let bytes = encode_record(&sample_response());
        let cut = &bytes[..40];

        let err = decode_record(&mut &cut[..], 0).unwrap_err();
        assert!(matches!(err, LogError::Truncated { .. }));
    }

    #[test]
    fn test_endless_header_line_is_not_buffered() {
        let mut bytes = b"TIDELOG/1.0\r\nRecord-Type: ".to_vec();
        bytes.resize(bytes.len() + 4 * MAX_HEADER_LINE, b'x');
        let mut cursor = std::io::Cursor::new(&bytes[..]);

        let err = decode_record(&mut cursor, 0).unwrap_err();
        assert!(matches!(err, LogError::Malformed(ref m) if m.contains("exceeds")));
        assert!(cursor.position() <= (MAX_HEADER_LINE + 64) as u64);
    }

    #[test]
    fn test_flipped_payload_byte_fails_digest() {
        let mut bytes = encode_record(&sample_response());
        let pos = bytes.len() - 6;
        bytes[pos] ^= 0x20;

        let err = decode_record(&mut &bytes[..], 0).unwrap_err();
        assert!(matches!(err, LogError::DigestMismatch { .. }));
    }

    #[test]
    fn test_missing_field() {
        let bytes = b"TIDELOG/1.0\r\nRecord-Type: request\r\n\r\n";
        let err = decode_record(&mut &bytes[..], 0).unwrap_err();
        assert!(matches!(err, LogError::MissingField { field: "Record-ID", .. }));
    }
}
