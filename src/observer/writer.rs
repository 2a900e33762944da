//! JSONL transcript observer with one file per UTC day.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{SessionObserver, TranscriptEntry};
use crate::models::event::SessionEvent;
use crate::{AppError, Result};

/// The transcript file currently receiving lines.
struct DayFile {
    date: NaiveDate,
    out: BufWriter<File>,
}

impl DayFile {
    fn open(path: &Path, date: NaiveDate) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                AppError::Io(format!("failed to open transcript {}: {e}", path.display()))
            })?;
        debug!(path = %path.display(), "transcript: opened");
        Ok(Self {
            date,
            out: BufWriter::new(file),
        })
    }

    /// Append one complete line and push it to disk.
    fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.out.write_all(line)?;
        self.out.flush()
    }
}

/// Appends every session event as one JSON line to
/// `<dir>/transcript-YYYY-MM-DD.jsonl`.
///
/// The file is chosen by each entry's own timestamp, so a session that runs
/// past midnight continues in the next day's file. Entries are serialized
/// before the file lock is taken.
pub struct JsonlTranscriptWriter {
    dir: PathBuf,
    current: Mutex<Option<DayFile>>,
}

impl std::fmt::Debug for JsonlTranscriptWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlTranscriptWriter")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl JsonlTranscriptWriter {
    /// Transcript writer rooted at `dir`, created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Config(format!(
                "failed to create transcript directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    /// Path of the transcript file for `date`.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("transcript-{date}.jsonl"))
    }

    /// Append `entry` to the file for its day.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the entry cannot be serialized or the file
    /// cannot be opened or written.
    pub fn append(&self, entry: &TranscriptEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| AppError::Io(format!("failed to serialize transcript entry: {e}")))?;
        line.push(b'\n');
        let date = entry.timestamp.date_naive();

        let mut current = self
            .current
            .lock()
            .map_err(|_| AppError::Io("transcript writer mutex poisoned".to_owned()))?;
        let file = match current.take() {
            Some(file) if file.date == date => current.insert(file),
            _ => current.insert(DayFile::open(&self.path_for(date), date)?),
        };
        file.append(&line).map_err(|e| {
            warn!(session = %entry.session, kind = entry.kind, error = %e, "transcript: write failed");
            AppError::Io(format!("transcript write failed: {e}"))
        })
    }
}

impl SessionObserver for JsonlTranscriptWriter {
    fn on_event(&self, session: &str, event: &SessionEvent) -> Result<()> {
        self.append(&TranscriptEntry::from_event(session, event))
    }
}
