//! Append-only record of every file move.
//!
//! Each move becomes one line of plain text:
//!
//! ```text
//! 2024-05-01 14:03:27.512094 : Moved '/home/me/Downloads/a.jpg' -> '/home/me/Downloads/Images/2024-05-01/a.jpg'
//! ```

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{LazyLock, Mutex};
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

static LINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<timestamp>.+?) : Moved '(?P<source>.*)' -> '(?P<destination>.*)'$")
        .expect("log line pattern is valid")
});

/// One recorded move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Local time of the move.
    pub timestamp: NaiveDateTime,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl LogEntry {
    /// Creates an entry stamped with the current local time.
    pub fn now(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : Moved '{}' -> '{}'",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.source.display(),
            self.destination.display()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized log line: {0}")]
pub struct ParseLogEntryError(String);

impl FromStr for LogEntry {
    type Err = ParseLogEntryError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseLogEntryError(line.to_string());
        let captures = LINE_PATTERN.captures(line).ok_or_else(invalid)?;
        let timestamp = NaiveDateTime::parse_from_str(&captures["timestamp"], "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|_| invalid())?;

        Ok(Self {
            timestamp,
            source: PathBuf::from(&captures["source"]),
            destination: PathBuf::from(&captures["destination"]),
        })
    }
}

/// Handle on the log file.
///
/// Appends are serialized so that a manual pass and a watch pass never
/// interleave partial lines.
#[derive(Debug)]
pub struct ActionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ActionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, creating the file if needed.
    pub fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{entry}")
    }

    /// Reads back every entry, oldest first.
    ///
    /// A missing file is an empty log. Lines that do not parse are skipped
    /// with a warning.
    pub fn entries(&self) -> io::Result<Vec<LogEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match line.parse::<LogEntry>() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(path = %self.path.display(), "{e}");
                    None
                }
            })
            .collect())
    }

    /// Returns the last `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> io::Result<Vec<LogEntry>> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}
