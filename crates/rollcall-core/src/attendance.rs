//! Append-only attendance log.
//!
//! On disk it is a header-less CSV of `identity,YYYY-MM-DD HH:MM:SS` rows.
//! Like the record store it is not locked against concurrent writers.

use chrono::NaiveDateTime;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp layout used in the log and in user-facing messages.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column headers written by [`CsvAttendanceLog::export`].
pub const EXPORT_HEADER: [&str; 2] = ["Name", "Date & Time"];

#[derive(Error, Debug)]
pub enum LogError {
    #[error("attendance log I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("attendance log CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed attendance row {row}: {reason}")]
    Malformed { row: usize, reason: String },
}

/// One marked attendance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEntry {
    pub identity: String,
    pub timestamp: NaiveDateTime,
}

impl AttendanceEntry {
    pub fn new(identity: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            identity: identity.into(),
            timestamp,
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Destination for attendance entries.
pub trait AttendanceSink {
    fn record(&mut self, entry: &AttendanceEntry) -> Result<(), LogError>;
}

impl AttendanceSink for Vec<AttendanceEntry> {
    fn record(&mut self, entry: &AttendanceEntry) -> Result<(), LogError> {
        self.push(entry.clone());
        Ok(())
    }
}

/// CSV attendance log at a fixed path.
pub struct CsvAttendanceLog {
    path: PathBuf,
}

impl CsvAttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read every entry in file order. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<AttendanceEntry>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let mut entries = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let row = i + 1;
            let (Some(identity), Some(ts)) = (record.get(0), record.get(1)) else {
                return Err(LogError::Malformed {
                    row,
                    reason: format!("expected 2 fields, got {}", record.len()),
                });
            };
            let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).map_err(|e| {
                LogError::Malformed {
                    row,
                    reason: format!("bad timestamp {ts:?}: {e}"),
                }
            })?;
            entries.push(AttendanceEntry::new(identity, timestamp));
        }

        Ok(entries)
    }

    /// Write the whole log as CSV with an `EXPORT_HEADER` row.
    pub fn export<W: Write>(&self, out: W) -> Result<usize, LogError> {
        let entries = self.read_all()?;
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(EXPORT_HEADER)?;
        for entry in &entries {
            let ts = entry.formatted_timestamp();
            writer.write_record([entry.identity.as_str(), ts.as_str()])?;
        }
        writer.flush()?;
        Ok(entries.len())
    }
}

impl AttendanceSink for CsvAttendanceLog {
    fn record(&mut self, entry: &AttendanceEntry) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let ts = entry.formatted_timestamp();
        writer.write_record([entry.identity.as_str(), ts.as_str()])?;
        writer.flush()?;

        tracing::info!(
            identity = %entry.identity,
            timestamp = %ts,
            path = %self.path.display(),
            "attendance appended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_append_writes_headerless_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvAttendanceLog::new(dir.path().join("attendance.csv"));
        log.record(&AttendanceEntry::new("alice", at(9, 5, 0))).unwrap();
        log.record(&AttendanceEntry::new("bob", at(9, 6, 30))).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "alice,2026-03-14 09:05:00\nbob,2026-03-14 09:06:30\n");
    }

    #[test]
    fn test_read_all_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvAttendanceLog::new(dir.path().join("attendance.csv"));
        let entries = vec![
            AttendanceEntry::new("carol", at(8, 0, 0)),
            AttendanceEntry::new("alice", at(7, 0, 0)),
        ];
        for e in &entries {
            log.record(e).unwrap();
        }
        assert_eq!(log.read_all().unwrap(), entries);
    }

    #[test]
    fn test_identity_with_comma_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvAttendanceLog::new(dir.path().join("attendance.csv"));
        let entry = AttendanceEntry::new("Doe, Jane", at(10, 0, 0));
        log.record(&entry).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![entry]);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvAttendanceLog::new(dir.path().join("attendance.csv"));
        assert!(!log.exists());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "alice,yesterday\n").unwrap();
        let err = CsvAttendanceLog::new(path).read_all().unwrap_err();
        assert!(matches!(err, LogError::Malformed { row: 1, .. }));
    }

    #[test]
    fn test_export_adds_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvAttendanceLog::new(dir.path().join("attendance.csv"));
        log.record(&AttendanceEntry::new("alice", at(9, 5, 0))).unwrap();

        let mut out = Vec::new();
        let count = log.export(&mut out).unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Name,Date & Time\nalice,2026-03-14 09:05:00\n"
        );
    }

    #[test]
    fn test_vec_sink() {
        let mut sink: Vec<AttendanceEntry> = Vec::new();
        sink.record(&AttendanceEntry::new("alice", at(1, 2, 3))).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].formatted_timestamp(), "2026-03-14 01:02:03");
    }
}
