use super::format::{decode_record, encode_record, payload_digest};
use super::record::{FetchRecord, RequestRecord, ResponseRecord};
use super::{LogError, LogResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use url::Url;

/// Appends records to a fetch log
///
/// A recorder only ever appends. Records handed to [`LogRecorder::resync`]
/// are re-framed and re-checked before they are written, so a recorder fed
/// from a damaged log produces a log with intact framing throughout.
pub struct LogRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: u64,
}

impl LogRecorder {
    /// Creates a new, empty log (truncating any existing file)
    pub fn create(path: &Path) -> LogResult<Self> {
        let file = File::create(path)?;
        Ok(Self::with_file(path, file))
    }

    /// Opens an existing log for appending, creating it if absent
    pub fn open_append(path: &Path) -> LogResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::with_file(path, file))
    }

    fn with_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records_written: 0,
        }
    }

    /// Appends a record as-is
    pub fn append(&mut self, record: &FetchRecord) -> LogResult<()> {
        let bytes = encode_record(record);
        self.writer.write_all(&bytes)?;
        self.records_written += 1;
        Ok(())
    }

    /// Copies a record read from another log into this one
    ///
    /// The payload digest is recomputed and compared against the stored one,
    /// the target URI must parse, and the re-encoded framing must decode back
    /// to the same header. A record failing any check is not written.
    pub fn resync(&mut self, record: &FetchRecord) -> LogResult<()> {
        let header = record.header();

        let actual = payload_digest(record.payload());
        if actual != header.payload_digest {
            return Err(LogError::DigestMismatch {
                target: header.target_uri.clone(),
                expected: header.payload_digest.clone(),
                actual,
            });
        }

        Url::parse(&header.target_uri).map_err(|e| {
            LogError::Malformed(format!("bad target URI {:?}: {}", header.target_uri, e))
        })?;

        if let FetchRecord::Revisit(revisit) = record {
            if revisit.profile.is_empty() {
                return Err(LogError::Malformed(format!(
                    "revisit of {} has no profile",
                    header.target_uri
                )));
            }
        }

        let bytes = encode_record(record);
        match decode_record(&mut &bytes[..], 0)? {
            Some((copy, _)) if copy.header() == header => {}
            _ => {
                return Err(LogError::Malformed(format!(
                    "record for {} does not survive re-framing",
                    header.target_uri
                )))
            }
        }

        self.writer.write_all(&bytes)?;
        self.records_written += 1;
        Ok(())
    }

    /// Records that a request for `url` is being made
    pub fn record_request(&mut self, url: &Url) -> LogResult<()> {
        self.append(&FetchRecord::Request(RequestRecord::new(url, "GET")))
    }

    /// Records a response received for `url`
    pub fn record_response(
        &mut self,
        url: &Url,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) -> LogResult<()> {
        self.append(&FetchRecord::Response(ResponseRecord::new(
            url, status, headers, body,
        )))
    }

    pub fn flush(&mut self) -> LogResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs the log, returning its path
    pub fn finish(mut self) -> LogResult<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written through this recorder
    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchlog::LogReader;
    use tempfile::TempDir;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://example.com{}", path)).unwrap()
    }

    #[test]
    fn test_append_then_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("example.com.tlog");

        let mut recorder = LogRecorder::create(&path).unwrap();
        recorder.record_request(&url("/")).unwrap();
        recorder.record_response(&url("/"), 200, &[], b"ok").unwrap();
        assert_eq!(recorder.records_written(), 2);
        recorder.finish().unwrap();

        let records: Vec<_> = LogReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], FetchRecord::Request(_)));
        assert!(matches!(records[1], FetchRecord::Response(_)));
    }

    #[test]
    fn test_open_append_keeps_existing_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");

        let mut first = LogRecorder::create(&path).unwrap();
        first.record_request(&url("/a")).unwrap();
        first.finish().unwrap();

        let mut second = LogRecorder::open_append(&path).unwrap();
        second.record_request(&url("/b")).unwrap();
        second.finish().unwrap();

        assert_eq!(LogReader::open(&path).unwrap().count(), 2);
    }

    #[test]
    fn test_resync_preserves_record_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let original = FetchRecord::Response(ResponseRecord::new(&url("/x"), 200, &[], b"body"));

        let mut recorder = LogRecorder::create(&path).unwrap();
        recorder.resync(&original).unwrap();
        recorder.finish().unwrap();

        let copied = LogReader::open(&path).unwrap().next().unwrap().unwrap();
        assert_eq!(copied, original);
    }

    #[test]
    fn test_resync_rejects_tampered_payload() {
        let dir = TempDir::new().unwrap();
        let mut recorder = LogRecorder::create(&dir.path().join("log")).unwrap();

        let mut record = ResponseRecord::new(&url("/x"), 200, &[], b"body");
        record.payload.extend_from_slice(b"extra");

        let err = recorder
            .resync(&FetchRecord::Response(record))
            .unwrap_err();
        assert!(matches!(err, LogError::DigestMismatch { .. }));
        assert_eq!(recorder.records_written(), 0);
    }

    #[test]
    fn test_resync_rejects_bad_target() {
        let dir = TempDir::new().unwrap();
        let mut recorder = LogRecorder::create(&dir.path().join("log")).unwrap();

        let mut record = RequestRecord::new(&url("/x"), "GET");
        record.header.target_uri = "not a url".to_string();

        let err = recorder.resync(&FetchRecord::Request(record)).unwrap_err();
        assert!(matches!(err, LogError::Malformed(_)));
    }
}
