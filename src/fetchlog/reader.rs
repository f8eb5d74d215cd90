use super::format::decode_record;
use super::record::FetchRecord;
use super::LogResult;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Sequential reader over a fetch log
///
/// Yields records in file order. The first error (I/O failure, truncated or
/// corrupt record) is yielded once and then iteration stops for good, so a
/// `for` loop over the reader naturally ends at a crash point.
pub struct LogReader<R: BufRead = BufReader<File>> {
    reader: R,
    offset: u64,
    done: bool,
}

impl LogReader<BufReader<File>> {
    /// Opens a log file for reading from the start
    pub fn open(path: &Path) -> LogResult<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> LogReader<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next record to be read
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = LogResult<FetchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match decode_record(&mut self.reader, self.offset) {
            Ok(Some((record, consumed))) => {
                self.offset += consumed;
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
