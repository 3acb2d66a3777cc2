//! Rotation-aware log file tailer.
//!
//! Polls a file path on a fixed interval and yields newly appended,
//! terminator-complete lines. Detects replacement (new inode) and
//! truncation (file shorter than the tracked offset) and restarts from
//! offset 0 in both cases, so rotated content is never skipped and old
//! content is never re-read from the new file.

use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity token used to detect file replacement across polls and
/// restarts. On Unix this is the device/inode pair; elsewhere it falls
/// back to the file creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device number (0 on non-Unix platforms).
    pub dev: u64,
    /// Inode number, or creation time in milliseconds on non-Unix.
    pub ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn from_metadata(meta: &Metadata) -> Self {
        let created_ms = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            dev: 0,
            ino: created_ms,
        }
    }
}

/// One complete line read from the watched file.
///
/// `start..end` is the byte span in the source file, including the line
/// terminator. Ownership passes to the parser and the line is dropped
/// after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Line content without the terminator (and without a trailing `\r`).
    pub text: String,
    /// Byte offset of the first byte of the line.
    pub start: u64,
    /// Byte offset just past the line terminator. This is the value a
    /// checkpoint records once the line is delivered.
    pub end: u64,
}

/// Result of one poll.
#[derive(Debug, Default)]
pub struct Polled {
    /// Complete lines appended since the last poll, in file order.
    pub lines: Vec<RawLine>,
    /// Whether rotation or truncation was detected this poll.
    pub rotated: bool,
    /// Identity of the file the lines were read from.
    pub identity: Option<FileIdentity>,
}

/// Tailer errors. All of these are recoverable — the pipeline logs them
/// and keeps polling.
#[derive(Debug, Error)]
pub enum TailError {
    /// Reading the watched file failed (permissions, disk I/O).
    #[error("failed to read log file: {0}")]
    Io(#[from] std::io::Error),
}

/// Polling tailer over a single log file.
///
/// Holds the tracked identity and byte offset as explicit state, so a
/// restored checkpoint can seed it and tests can drive it with plain
/// temp files and no timers.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    identity: Option<FileIdentity>,
    offset: u64,
}

impl LogTailer {
    /// Create a tailer starting at offset 0 of whatever file appears at
    /// `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            identity: None,
            offset: 0,
        }
    }

    /// Create a tailer resuming from a restored checkpoint position.
    ///
    /// If the file at `path` no longer matches `identity`, the first
    /// poll detects rotation and resets to offset 0.
    pub fn resume(path: impl Into<PathBuf>, identity: FileIdentity, offset: u64) -> Self {
        Self {
            path: path.into(),
            identity: Some(identity),
            offset,
        }
    }

    /// Skip everything currently in the file and tail only content
    /// appended from now on. Used when no checkpoint exists and the
    /// operator configured `skip_backlog`.
    ///
    /// A missing file is fine — the tailer starts at offset 0 when the
    /// file appears.
    pub fn skip_to_end(&mut self) -> Result<(), TailError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => {
                self.identity = Some(FileIdentity::from_metadata(&meta));
                self.offset = meta.len();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TailError::Io(e)),
        }
    }

    /// The path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current tracked byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Identity of the file currently being tracked, if one has been seen.
    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    /// Read everything appended since the last poll.
    ///
    /// A missing file is "no new data", not an error. A partial trailing
    /// line without a terminator is left in place for the next poll —
    /// the offset only advances past terminated lines.
    ///
    /// Identity, length, and bytes all come from one opened handle, so a
    /// rotation landing between syscalls cannot make the offset check and
    /// the read refer to different files.
    pub fn poll(&mut self) -> Result<Polled, TailError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Polled::default());
            }
            Err(e) => return Err(TailError::Io(e)),
        };
        let meta = file.metadata()?;

        let current = FileIdentity::from_metadata(&meta);
        let mut rotated = false;

        match self.identity {
            Some(tracked) if tracked != current => {
                // The file was replaced under us.
                rotated = true;
                self.identity = Some(current);
                self.offset = 0;
            }
            Some(_) => {}
            None => {
                self.identity = Some(current);
            }
        }

        if meta.len() < self.offset {
            // Truncated in place.
            rotated = true;
            self.offset = 0;
        }

        if meta.len() == self.offset {
            return Ok(Polled {
                lines: Vec::new(),
                rotated,
                identity: self.identity,
            });
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let lines = self.split_complete_lines(&buf);

        Ok(Polled {
            lines,
            rotated,
            identity: self.identity,
        })
    }

    /// Split the freshly read bytes into terminated lines, advancing the
    /// tracked offset past each one. Bytes after the last terminator are
    /// not consumed.
    fn split_complete_lines(&mut self, buf: &[u8]) -> Vec<RawLine> {
        let mut lines = Vec::new();
        let mut line_start = 0usize;

        for (i, byte) in buf.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            let mut content = &buf[line_start..i];
            if content.last() == Some(&b'\r') {
                content = &content[..content.len().saturating_sub(1)];
            }
            // Tolerate invalid UTF-8 the way the log producer does:
            // replace, never fail.
            let text = String::from_utf8_lossy(content).into_owned();
            let start = self.offset.saturating_add(line_start as u64);
            let end = self.offset.saturating_add(i as u64).saturating_add(1);
            lines.push(RawLine { text, start, end });
            line_start = i.saturating_add(1);
        }

        self.offset = self.offset.saturating_add(line_start as u64);
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_log() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server_log.txt");
        (dir, path)
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open log for append");
        file.write_all(content.as_bytes()).expect("append");
    }

    #[test]
    fn missing_file_is_no_data() {
        let (_dir, path) = temp_log();
        let mut tailer = LogTailer::new(&path);
        let polled = tailer.poll().expect("missing file is not an error");
        assert!(polled.lines.is_empty());
        assert!(!polled.rotated);
    }

    #[test]
    fn yields_appended_lines_in_order() {
        let (_dir, path) = temp_log();
        append(&path, "first\nsecond\n");

        let mut tailer = LogTailer::new(&path);
        let polled = tailer.poll().expect("poll");
        let texts: Vec<&str> = polled.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(tailer.offset(), 13);

        append(&path, "third\n");
        let polled = tailer.poll().expect("poll");
        assert_eq!(polled.lines.len(), 1);
        assert_eq!(polled.lines[0].text, "third");
        assert_eq!(polled.lines[0].start, 13);
        assert_eq!(polled.lines[0].end, 19);
    }

    #[test]
    fn partial_trailing_line_waits_for_terminator() {
        let (_dir, path) = temp_log();
        append(&path, "complete\npartial");

        let mut tailer = LogTailer::new(&path);
        let polled = tailer.poll().expect("poll");
        assert_eq!(polled.lines.len(), 1);
        assert_eq!(polled.lines[0].text, "complete");
        assert_eq!(tailer.offset(), 9);

        // Finishing the line yields it on the next poll.
        append(&path, " now done\n");
        let polled = tailer.poll().expect("poll");
        assert_eq!(polled.lines.len(), 1);
        assert_eq!(polled.lines[0].text, "partial now done");
    }

    #[test]
    fn crlf_terminators_are_stripped() {
        let (_dir, path) = temp_log();
        append(&path, "windows line\r\n");

        let mut tailer = LogTailer::new(&path);
        let polled = tailer.poll().expect("poll");
        assert_eq!(polled.lines[0].text, "windows line");
        // Offset still covers the full terminator.
        assert_eq!(polled.lines[0].end, 14);
    }

    #[test]
    fn truncation_resets_to_zero() {
        let (_dir, path) = temp_log();
        append(&path, "a long line that will disappear\n");

        let mut tailer = LogTailer::new(&path);
        tailer.poll().expect("poll");
        assert!(tailer.offset() > 0);

        // Truncate to empty, then append new content.
        std::fs::write(&path, "").expect("truncate");
        append(&path, "fresh\n");

        let polled = tailer.poll().expect("poll");
        assert!(polled.rotated, "truncation must be reported as rotation");
        assert_eq!(polled.lines.len(), 1);
        assert_eq!(polled.lines[0].text, "fresh");
        assert_eq!(polled.lines[0].start, 0);
    }

    #[test]
    fn replacement_adopts_new_identity() {
        let (_dir, path) = temp_log();
        append(&path, "old file content here\n");

        let mut tailer = LogTailer::new(&path);
        tailer.poll().expect("poll");
        let old_identity = tailer.identity().expect("identity tracked");

        // Rotate: remove and recreate (new inode).
        std::fs::remove_file(&path).expect("remove");
        append(&path, "new\n");

        let polled = tailer.poll().expect("poll");
        assert!(polled.rotated);
        assert_eq!(polled.lines.len(), 1);
        assert_eq!(polled.lines[0].text, "new");
        assert_ne!(tailer.identity().expect("identity"), old_identity);
    }

    #[test]
    fn replacement_with_longer_file_rereads_from_zero() {
        let (_dir, path) = temp_log();
        append(&path, "short\n");

        let mut tailer = LogTailer::new(&path);
        tailer.poll().expect("poll");
        assert_eq!(tailer.offset(), 6);

        // Replace with a longer file: the tracked offset is still valid
        // as a position, so only the identity check can tell the files
        // apart. Reading from the old offset would yield a mid-line
        // fragment of the new content.
        std::fs::remove_file(&path).expect("remove");
        append(&path, "entirely new first line\nsecond\n");

        let polled = tailer.poll().expect("poll");
        assert!(polled.rotated);
        let texts: Vec<&str> = polled.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["entirely new first line", "second"]);
        assert_eq!(polled.lines[0].start, 0);

        // Nothing left over: a subsequent poll yields no duplicates.
        let polled = tailer.poll().expect("poll");
        assert!(polled.lines.is_empty());
        assert!(!polled.rotated);
    }

    #[test]
    fn resume_from_checkpoint_skips_delivered_content() {
        let (_dir, path) = temp_log();
        append(&path, "delivered\npending\n");

        let mut first = LogTailer::new(&path);
        let polled = first.poll().expect("poll");
        let identity = polled.identity.expect("identity");

        // Restart as if only "delivered" (10 bytes) was checkpointed.
        let mut resumed = LogTailer::resume(&path, identity, 10);
        let polled = resumed.poll().expect("poll");
        assert_eq!(polled.lines.len(), 1);
        assert_eq!(polled.lines[0].text, "pending");
        assert!(!polled.rotated);
    }

    #[test]
    fn resume_with_stale_identity_restarts_at_zero() {
        let (_dir, path) = temp_log();
        append(&path, "content\n");

        let stale = FileIdentity { dev: 1, ino: 1 };
        let mut tailer = LogTailer::resume(&path, stale, 4);
        let polled = tailer.poll().expect("poll");
        assert!(polled.rotated);
        assert_eq!(polled.lines[0].text, "content");
        assert_eq!(polled.lines[0].start, 0);
    }

    #[test]
    fn skip_to_end_ignores_backlog() {
        let (_dir, path) = temp_log();
        append(&path, "backlog one\nbacklog two\n");

        let mut tailer = LogTailer::new(&path);
        tailer.skip_to_end().expect("skip");
        let polled = tailer.poll().expect("poll");
        assert!(polled.lines.is_empty());

        append(&path, "live\n");
        let polled = tailer.poll().expect("poll");
        assert_eq!(polled.lines.len(), 1);
        assert_eq!(polled.lines[0].text, "live");
    }

    #[test]
    fn skip_to_end_on_missing_file_is_ok() {
        let (_dir, path) = temp_log();
        let mut tailer = LogTailer::new(&path);
        tailer.skip_to_end().expect("missing file is fine");
        assert_eq!(tailer.offset(), 0);
    }
}
