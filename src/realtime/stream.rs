//! On-disk real-time stream format (§4.3/§6), grounded in
//! `original_source/sources/realtime.cpp` (`REALTIME_STREAM_VERSION`, the `REAL` magic, the
//! 56-byte reserved header and the fixed-size LE record layout).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::CoreError;

const MAGIC: &[u8; 4] = b"REAL";
const CURRENT_VERSION: i32 = 1;
const HEADER_PAD_LEN: usize = 56;
const HEADER_LEN: u64 = 4 + 4 + HEADER_PAD_LEN as u64;
const RECORD_LEN: usize = 8 + 16 + 8 + 8;
const MAX_RECORD_AGE_SECS: i64 = 31 * 24 * 60 * 60;

/// One appended real-time tick (§3 `RealtimeStock`'s per-record shape).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRecord {
    pub timestamp: i64,
    pub code: [u8; 16],
    pub price: f64,
    pub volume: f64,
}

impl StreamRecord {
    #[must_use]
    pub fn new(timestamp: i64, code_str: &str, price: f64, volume: f64) -> Self {
        let mut code = [0u8; 16];
        let bytes = code_str.as_bytes();
        let n = bytes.len().min(16);
        code[..n].copy_from_slice(&bytes[..n]);
        Self { timestamp, code, price, volume }
    }

    #[must_use]
    pub fn code_str(&self) -> String {
        let end = self.code.iter().position(|&b| b == 0).unwrap_or(16);
        String::from_utf8_lossy(&self.code[..end]).into_owned()
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.timestamp.to_le_bytes())?;
        w.write_all(&self.code)?;
        w.write_all(&self.price.to_le_bytes())?;
        w.write_all(&self.volume.to_le_bytes())?;
        Ok(())
    }

    fn read(r: &mut impl Read) -> io::Result<Self> {
        let mut ts = [0u8; 8];
        r.read_exact(&mut ts)?;
        let mut code = [0u8; 16];
        r.read_exact(&mut code)?;
        let mut price = [0u8; 8];
        r.read_exact(&mut price)?;
        let mut volume = [0u8; 8];
        r.read_exact(&mut volume)?;
        Ok(Self {
            timestamp: i64::from_le_bytes(ts),
            code,
            price: f64::from_le_bytes(price),
            volume: f64::from_le_bytes(volume),
        })
    }
}

/// An append-only handle onto the on-disk real-time stream.
pub struct RealtimeStream {
    file: File,
}

impl RealtimeStream {
    /// Opens (creating if absent) the stream at `path`, validating the header and migrating
    /// the file in place if the magic is missing or the version is out of date (§4.3
    /// "a migrating rewrite is performed").
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;
            write_header(&mut file)?;
        }

        let needs_migration = {
            let mut file = OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;
            !header_is_current(&mut file)?
        };

        if needs_migration {
            migrate(path)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;
        Ok(Self { file })
    }

    /// Appends one record to the end of the stream.
    pub fn append(&mut self, record: &StreamRecord) -> Result<(), CoreError> {
        record
            .write(&mut self.file)
            .map_err(|e| CoreError::StreamCorrupt(e.to_string()))
    }

    /// Reads every record from the stream, skipping ones older than 31 days or with a
    /// non-finite price (§4.3 "Records older than 31 days or with non-finite price are
    /// skipped on load"). `now` is the current Unix timestamp.
    pub fn load_all(&mut self, now: i64) -> Result<Vec<StreamRecord>, CoreError> {
        self.file
            .seek(SeekFrom::Start(HEADER_LEN))
            .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;

        let mut out = Vec::new();
        let mut buf = [0u8; RECORD_LEN];
        loop {
            match self.file.read_exact(&mut buf) {
                Ok(()) => {
                    let mut cursor = &buf[..];
                    let record = StreamRecord::read(&mut cursor)
                        .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;
                    if now.saturating_sub(record.timestamp) > MAX_RECORD_AGE_SECS {
                        continue;
                    }
                    if !record.price.is_finite() {
                        continue;
                    }
                    out.push(record);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(CoreError::StreamCorrupt(e.to_string())),
            }
        }
        Ok(out)
    }
}

fn write_header(file: &mut File) -> Result<(), CoreError> {
    file.write_all(MAGIC)
        .and_then(|()| file.write_all(&CURRENT_VERSION.to_le_bytes()))
        .and_then(|()| file.write_all(&[0u8; HEADER_PAD_LEN]))
        .map_err(|e| CoreError::StreamCorrupt(e.to_string()))
}

fn header_is_current(file: &mut File) -> Result<bool, CoreError> {
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return Ok(false);
    }
    if &magic != MAGIC {
        return Ok(false);
    }
    let mut version = [0u8; 4];
    if file.read_exact(&mut version).is_err() {
        return Ok(false);
    }
    Ok(i32::from_le_bytes(version) == CURRENT_VERSION)
}

/// Copies every still-valid record from `path` into a freshly-headered temp file, then
/// atomically renames it over the original (§4.3 "a migrating rewrite is performed").
fn migrate(path: &Path) -> Result<(), CoreError> {
    let tmp_path = path.with_extension("migrating");
    {
        let mut src = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;

        // Best-effort: skip whatever header is there, old or new, then read records until EOF.
        let _ = src.seek(SeekFrom::Start(HEADER_LEN));

        let mut dst = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?;
        write_header(&mut dst)?;

        let mut buf = [0u8; RECORD_LEN];
        loop {
            match src.read_exact(&mut buf) {
                Ok(()) => dst
                    .write_all(&buf)
                    .map_err(|e| CoreError::StreamCorrupt(e.to_string()))?,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(_) => break,
            }
        }
    }
    std::fs::rename(&tmp_path, path).map_err(|e| CoreError::StreamCorrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_records_through_a_fresh_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.bin");

        let mut stream = RealtimeStream::open(&path).unwrap();
        stream
            .append(&StreamRecord::new(1_700_000_000, "AAPL.US", 150.0, 1000.0))
            .unwrap();
        stream
            .append(&StreamRecord::new(1_700_000_060, "AAPL.US", 151.0, 1200.0))
            .unwrap();

        let records = stream.load_all(1_700_000_100).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].code_str(), "AAPL.US");
        assert!((records[1].price - 151.0).abs() < 1e-9);
    }

    #[test]
    fn stale_and_non_finite_records_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.bin");

        let mut stream = RealtimeStream::open(&path).unwrap();
        stream
            .append(&StreamRecord::new(0, "OLD.US", 10.0, 1.0))
            .unwrap();
        stream
            .append(&StreamRecord::new(1_700_000_000, "NAN.US", f64::NAN, 1.0))
            .unwrap();
        stream
            .append(&StreamRecord::new(1_700_000_000, "OK.US", 10.0, 1.0))
            .unwrap();

        let records = stream.load_all(1_700_000_000).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code_str(), "OK.US");
    }

    #[test]
    fn reopening_an_up_to_date_stream_does_not_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.bin");
        {
            let mut s = RealtimeStream::open(&path).unwrap();
            s.append(&StreamRecord::new(1_700_000_000, "A.US", 1.0, 1.0)).unwrap();
        }
        let mut reopened = RealtimeStream::open(&path).unwrap();
        let records = reopened.load_all(1_700_000_000).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn migrates_file_with_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.bin");
        std::fs::write(&path, b"NOTAREALFILE_______________________________________").unwrap();

        let mut stream = RealtimeStream::open(&path).unwrap();
        let records = stream.load_all(1_700_000_000).unwrap();
        assert!(records.is_empty());
    }
}
