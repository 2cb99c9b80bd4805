//! Persistent replay log.
//!
//! Relayed persistent messages are appended to `<dir>/current` as
//! netstring-framed JSON [`LogEntry`] records inside a gzip stream. Closed
//! segments are renamed to the integer Unix time just past their newest
//! entry, so file names order segments chronologically.
//!
//! Readers are lenient: a crash can leave a segment truncated, and reading
//! simply stops at the first record that cannot be decoded.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use vigil_transport::frame::{read_netstring, write_netstring};

use crate::message::Security;
use crate::types::{now, Timestamp};
use crate::ClusterError;

/// A segment is rotated once it holds this many entries.
pub const MAX_SEGMENT_ENTRIES: usize = 50_000;

/// Upper bound for one encoded log record.
const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

const CURRENT: &str = "current";

/// One durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    /// Endpoint the message was received from; absent for local events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The serialized message, exactly as it goes on the wire.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
}

/// A closed segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub timestamp: u64,
    pub path: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ClusterError + '_ {
    move |source| ClusterError::Log {
        path: path.display().to_string(),
        source,
    }
}

/// Closed segments in `dir`, oldest first. Non-numeric names are ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<Segment>, ClusterError> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let Some(timestamp) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        else {
            continue;
        };
        segments.push(Segment {
            timestamp,
            path: entry.path(),
        });
    }
    segments.sort_by_key(|s| s.timestamp);
    Ok(segments)
}

// ── Writer ────────────────────────────────────────────────────────────

/// The append side of the log. Not thread-safe; callers serialize access.
pub struct ReplayLog {
    dir: PathBuf,
    writer: Option<GzEncoder<File>>,
    /// Entries appended since the last `open`.
    entries: usize,
    /// Timestamp of the newest entry since the last `open`, 0 when none.
    last_timestamp: Timestamp,
    /// `current` did not exist (or was empty) when it was opened.
    fresh: bool,
}

impl ReplayLog {
    /// Use `dir` for segments, creating it when missing. The log starts closed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ClusterError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        Ok(Self {
            dir,
            writer: None,
            entries: 0,
            last_timestamp: 0.0,
            fresh: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT)
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Entries appended since the log was last opened.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Open `current` for appending and reset the counters.
    pub fn open(&mut self) -> Result<(), ClusterError> {
        if self.writer.is_some() {
            return Ok(());
        }
        let path = self.current_path();
        let existing = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;

        self.writer = Some(GzEncoder::new(file, Compression::default()));
        self.entries = 0;
        self.last_timestamp = 0.0;
        self.fresh = !existing;
        Ok(())
    }

    /// Append one record. Returns `true` when the append caused a rotation.
    pub fn append(&mut self, entry: &LogEntry) -> Result<bool, ClusterError> {
        let path = self.current_path();
        let record = serde_json::to_string(entry)?;
        let writer = self.writer.as_mut().ok_or_else(|| ClusterError::Log {
            path: path.display().to_string(),
            source: io::Error::new(io::ErrorKind::NotConnected, "log is closed"),
        })?;

        write_netstring(writer, &record)
            .and_then(|()| writer.flush())
            .map_err(io_error(&path))?;

        self.entries += 1;
        self.last_timestamp = entry.timestamp;

        if self.entries >= MAX_SEGMENT_ENTRIES {
            self.close()?;
            self.rotate()?;
            self.open()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Finish the gzip stream of `current`. No-op when already closed.
    pub fn close(&mut self) -> Result<(), ClusterError> {
        if let Some(writer) = self.writer.take() {
            let path = self.current_path();
            let file = writer.finish().map_err(io_error(&path))?;
            file.sync_data().map_err(io_error(&path))?;
        }
        Ok(())
    }

    /// Close `current` and rename it to its closing timestamp.
    ///
    /// The target is `floor(newest entry) + 1` (now + 1 when nothing was
    /// written), raised past every existing segment so names stay ordered.
    /// A `current` opened fresh and never written to is removed instead.
    pub fn rotate(&mut self) -> Result<Option<PathBuf>, ClusterError> {
        self.close()?;

        let current = self.current_path();
        if !current.exists() {
            return Ok(None);
        }

        if self.fresh && self.entries == 0 {
            fs::remove_file(&current).map_err(io_error(&current))?;
            self.fresh = false;
            return Ok(None);
        }

        let newest = if self.last_timestamp == 0.0 {
            now()
        } else {
            self.last_timestamp
        };
        let natural = newest.max(0.0).floor() as u64 + 1;
        let past_existing = list_segments(&self.dir)?
            .last()
            .map_or(0, |s| s.timestamp + 1);
        let target = self.dir.join(natural.max(past_existing).to_string());

        fs::rename(&current, &target).map_err(io_error(&current))?;
        self.fresh = false;
        tracing::debug!(path = %target.display(), entries = self.entries, "rotated replay log segment");
        Ok(Some(target))
    }

    /// Closed segments, oldest first.
    pub fn segments(&self) -> Result<Vec<Segment>, ClusterError> {
        list_segments(&self.dir)
    }

    /// See [`prune_segments`].
    pub fn prune(&self, needed: impl Fn(u64) -> bool) -> Result<Vec<PathBuf>, ClusterError> {
        prune_segments(&self.dir, needed)
    }
}

/// Delete every closed segment in `dir` for which `needed` returns false.
///
/// Only closed segments are touched, so this does not need the writer.
/// Already-missing files are not an error. Returns the removed paths.
pub fn prune_segments(
    dir: &Path,
    needed: impl Fn(u64) -> bool,
) -> Result<Vec<PathBuf>, ClusterError> {
    let mut removed = Vec::new();
    for segment in list_segments(dir)? {
        if needed(segment.timestamp) {
            continue;
        }
        match fs::remove_file(&segment.path) {
            Ok(()) => {
                tracing::info!("Removing old log file: {}", segment.path.display());
                removed.push(segment.path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %segment.path.display(), error = %e, "could not remove log file");
            }
        }
    }
    Ok(removed)
}

// ── Reader ────────────────────────────────────────────────────────────

/// Iterates the records of one segment in append order.
///
/// Stops quietly at the first truncated or undecodable record.
pub struct SegmentReader {
    inner: BufReader<MultiGzDecoder<File>>,
    path: PathBuf,
    done: bool,
}

impl SegmentReader {
    pub fn open(path: &Path) -> Result<Self, ClusterError> {
        let file = File::open(path).map_err(io_error(path))?;
        Ok(Self {
            inner: BufReader::new(MultiGzDecoder::new(file)),
            path: path.to_path_buf(),
            done: false,
        })
    }
}

impl Iterator for SegmentReader {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        if self.done {
            return None;
        }
        let record = match read_netstring(&mut self.inner, MAX_RECORD_SIZE) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "log segment ends early");
                self.done = true;
                return None;
            }
        };
        match serde_json::from_str(&record) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "undecodable log record");
                self.done = true;
                None
            }
        }
    }
}
