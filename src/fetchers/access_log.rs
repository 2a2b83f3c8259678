// Access log tailing fetcher
// This file incrementally reads a web server access log, counting matching
// lines per label combination and surviving truncation or rotation of the file
//
// Numan Thabit 2025 Nov

use super::{FetchSample, LabelExtractor};
use crate::counter::LabelKeyedCounter;
use crate::errors::ExporterError;
use regex::Regex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info, warn};

/// Longest unterminated line held between reads; longer lines are dropped.
const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Device and inode of an opened log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// Open handle on the tailed file plus the read position.
#[derive(Debug)]
struct LogCursor {
    reader: BufReader<File>,
    /// Bytes consumed from the file, including `partial`.
    position: u64,
    /// Tail of the file not yet terminated by a newline.
    partial: Vec<u8>,
    /// Set while skipping the rest of an overlong line.
    discarding: bool,
}

impl LogCursor {
    async fn open(path: &Path, offset: u64) -> Result<(Self, Option<FileIdentity>), ExporterError> {
        let mut file = File::open(path)
            .await
            .map_err(|e| ExporterError::file(path, e))?;
        let identity = file
            .metadata()
            .await
            .map_err(|e| ExporterError::file(path, e))
            .map(|meta| FileIdentity::of(&meta))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| ExporterError::file(path, e))?;
        }
        let cursor = Self {
            reader: BufReader::new(file),
            position: offset,
            partial: Vec::new(),
            discarding: false,
        };
        Ok((cursor, identity))
    }
}

#[derive(Debug)]
pub struct AccessLogTailFetcher {
    name: String,
    path: PathBuf,
    line_pattern: Regex,
    labels: LabelExtractor,
    counter: LabelKeyedCounter,
    cursor: Option<LogCursor>,
    /// Identity of the file the cursor was last opened on.
    identity: Option<FileIdentity>,
    /// Offset just past the last counted line.
    committed: u64,
}

impl AccessLogTailFetcher {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        line_pattern: Regex,
        labels: LabelExtractor,
        counter: LabelKeyedCounter,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            line_pattern,
            labels,
            counter,
            cursor: None,
            identity: None,
            committed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Count matching lines appended since the last call and return the
    /// cumulative per-label totals.
    ///
    /// The cursor is only stored back once end-of-file is reached, so an error
    /// or a cancelled call leaves it empty and the next call reopens at the
    /// committed offset.
    pub async fn fetch_count(&mut self) -> Result<Vec<FetchSample>, ExporterError> {
        let mut cursor = self.recover_cursor().await?;
        let mut counted = 0usize;

        loop {
            let available = cursor
                .reader
                .fill_buf()
                .await
                .map_err(|e| ExporterError::file(&self.path, e))?;
            if available.is_empty() {
                break;
            }
            let (taken, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if !cursor.discarding {
                cursor.partial.extend_from_slice(&available[..taken]);
            }
            cursor.reader.consume(taken);
            cursor.position += taken as u64;

            if !complete {
                if cursor.partial.len() > MAX_PARTIAL_LINE {
                    warn!(
                        name = %self.name,
                        path = %self.path.display(),
                        held = cursor.partial.len(),
                        "access log line exceeds limit; dropping it"
                    );
                    cursor.partial.clear();
                    cursor.discarding = true;
                }
                // wait for the writer to finish the line
                continue;
            }

            if cursor.discarding {
                cursor.discarding = false;
            } else {
                let line = String::from_utf8_lossy(&cursor.partial);
                if self.line_pattern.is_match(&line) {
                    let labels = self.labels.extract(&line);
                    self.counter.increment(labels);
                    counted += 1;
                }
            }
            cursor.partial.clear();
            self.committed = cursor.position;
        }

        debug!(
            name = %self.name,
            counted = counted,
            offset = cursor.position,
            pending = cursor.partial.len(),
            "access log tailed to end"
        );
        self.cursor = Some(cursor);

        Ok(self.counter.results().iter().map(FetchSample::from).collect())
    }

    /// Validate the held cursor against the file currently at `path`. The
    /// file is treated as rotated, and reopened at its end, when it is a
    /// different file or shrank below the read position.
    async fn recover_cursor(&mut self) -> Result<LogCursor, ExporterError> {
        let held = self.cursor.take();

        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| ExporterError::file(&self.path, e))?;
        let size = meta.len();
        let replaced = matches!(
            (self.identity, FileIdentity::of(&meta)),
            (Some(known), Some(current)) if known != current
        );

        match held {
            Some(cursor) if !replaced && cursor.position <= size => Ok(cursor),
            Some(cursor) => {
                info!(
                    name = %self.name,
                    path = %self.path.display(),
                    position = cursor.position,
                    size = size,
                    replaced = replaced,
                    "access log truncated or rotated; reopening at end"
                );
                drop(cursor);
                self.reopen(size).await
            }
            None => {
                let resumable = !replaced
                    && self.committed <= size
                    && self.ends_line_at(self.committed).await?;
                if resumable {
                    self.reopen(self.committed).await
                } else {
                    info!(
                        name = %self.name,
                        path = %self.path.display(),
                        committed = self.committed,
                        size = size,
                        replaced = replaced,
                        "access log changed while closed; reopening at end"
                    );
                    self.reopen(size).await
                }
            }
        }
    }

    async fn reopen(&mut self, offset: u64) -> Result<LogCursor, ExporterError> {
        let (cursor, identity) = LogCursor::open(&self.path, offset).await?;
        self.identity = identity;
        self.committed = offset;
        Ok(cursor)
    }

    /// Whether `offset` sits on a line boundary of the file at `path`.
    async fn ends_line_at(&self, offset: u64) -> Result<bool, ExporterError> {
        if offset == 0 {
            return Ok(true);
        }
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| ExporterError::file(&self.path, e))?;
        file.seek(SeekFrom::Start(offset - 1))
            .await
            .map_err(|e| ExporterError::file(&self.path, e))?;
        let byte = file
            .read_u8()
            .await
            .map_err(|e| ExporterError::file(&self.path, e))?;
        Ok(byte == b'\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    const HIT_AMD64: &str = "1.2.3.4 - - \"GET /dl/app-amd64.tar.gz HTTP/1.1\" 200 512\n";
    const HIT_ARM64: &str = "1.2.3.5 - - \"GET /dl/app-arm64.tar.gz HTTP/1.1\" 200 512\n";
    const MISS: &str = "1.2.3.6 - - \"GET /index.html HTTP/1.1\" 200 99\n";

    fn fetcher(path: &Path) -> AccessLogTailFetcher {
        let patterns: BTreeMap<String, String> =
            [("arch".to_string(), "app-(amd64|arm64)".to_string())]
                .into_iter()
                .collect();
        AccessLogTailFetcher::new(
            "nginx",
            path,
            Regex::new(r#""GET /dl/[^ ]+ HTTP/[0-9.]+" 200"#).unwrap(),
            LabelExtractor::compile("nginx", patterns.iter()).unwrap(),
            LabelKeyedCounter::new(vec!["arch".to_string()]),
        )
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn total(samples: &[FetchSample]) -> u64 {
        samples.iter().map(|s| s.count).sum()
    }

    fn count_for(samples: &[FetchSample], arch: &str) -> u64 {
        samples
            .iter()
            .find(|s| s.labels.get("arch").map(String::as_str) == Some(arch))
            .map_or(0, |s| s.count)
    }

    #[tokio::test]
    async fn first_fetch_counts_existing_lines_and_second_is_idle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, &[HIT_AMD64, MISS, HIT_ARM64, HIT_AMD64].concat());

        let mut f = fetcher(&path);
        let first = f.fetch_count().await.unwrap();
        assert_eq!(total(&first), 3);
        assert_eq!(count_for(&first, "amd64"), 2);
        assert_eq!(count_for(&first, "arm64"), 1);

        let second = f.fetch_count().await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn appended_lines_are_counted_incrementally() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, HIT_AMD64);

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 1);

        append(&path, &[HIT_ARM64, MISS, HIT_ARM64].concat());
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "amd64"), 1);
        assert_eq!(count_for(&samples, "arm64"), 2);
    }

    #[tokio::test]
    async fn truncated_file_is_reopened_at_new_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, &[HIT_AMD64, HIT_AMD64, HIT_ARM64].concat());

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 3);

        // shorter content that already holds a matching line
        std::fs::write(&path, HIT_ARM64).unwrap();
        let after_rotation = f.fetch_count().await.unwrap();
        assert_eq!(total(&after_rotation), 3);
        assert_eq!(count_for(&after_rotation, "arm64"), 1);

        append(&path, HIT_ARM64);
        let resumed = f.fetch_count().await.unwrap();
        assert_eq!(total(&resumed), 4);
        assert_eq!(count_for(&resumed, "arm64"), 2);
    }

    #[tokio::test]
    async fn renamed_replacement_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, &[HIT_AMD64, HIT_AMD64].concat());

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 2);

        let fresh = dir.path().join("access.log.new");
        append(&fresh, MISS);
        std::fs::rename(&fresh, &path).unwrap();
        assert_eq!(total(&f.fetch_count().await.unwrap()), 2);

        append(&path, HIT_AMD64);
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "amd64"), 3);
    }

    #[tokio::test]
    async fn partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        let (head, tail) = HIT_ARM64.split_at(20);
        append(&path, head);

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 0);

        append(&path, tail);
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "arm64"), 1);
    }

    #[tokio::test]
    async fn missing_file_fails_then_recovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");

        let mut f = fetcher(&path);
        let err = f.fetch_count().await.unwrap_err();
        assert!(matches!(err, ExporterError::File { .. }));

        append(&path, &[HIT_AMD64, MISS].concat());
        assert_eq!(total(&f.fetch_count().await.unwrap()), 1);
    }

    /// Content of `HIT_AMD64.len()` bytes that does not end a line.
    fn misaligned_prefix() -> String {
        let mut prefix = String::from("9.9.9.9 - - \"POST /upload/");
        while prefix.len() < HIT_AMD64.len() {
            prefix.push('x');
        }
        prefix
    }

    #[tokio::test]
    async fn recreated_file_is_read_from_its_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, HIT_AMD64);

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 1);

        std::fs::remove_file(&path).unwrap();
        assert!(f.fetch_count().await.is_err());

        // a full matching line starts exactly at the old committed offset
        append(&path, &[misaligned_prefix().as_str(), HIT_ARM64].concat());
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "amd64"), 1);
        assert_eq!(count_for(&samples, "arm64"), 0);

        append(&path, HIT_ARM64);
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "amd64"), 1);
        assert_eq!(count_for(&samples, "arm64"), 1);
    }

    #[tokio::test]
    async fn rewritten_in_place_off_line_boundary_is_read_from_its_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, HIT_AMD64);

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 1);

        // lose the open handle, then regrow the same inode past the offset
        f.cursor = None;
        std::fs::write(&path, [misaligned_prefix().as_str(), HIT_ARM64].concat()).unwrap();
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(total(&samples), 1);
        assert_eq!(count_for(&samples, "arm64"), 0);
    }

    #[tokio::test]
    async fn lost_handle_resumes_at_committed_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, &[HIT_AMD64, HIT_ARM64].concat());

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 2);

        f.cursor = None;
        append(&path, HIT_ARM64);
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "amd64"), 1);
        assert_eq!(count_for(&samples, "arm64"), 2);
    }

    #[tokio::test]
    async fn cancelled_reads_never_double_count() {
        const LINES: usize = 50_000;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        let body: String = (0..LINES)
            .map(|i| if i % 2 == 0 { HIT_AMD64 } else { HIT_ARM64 })
            .collect();
        append(&path, &body);

        let mut f = fetcher(&path);
        let mut cancelled = 0;
        let mut finished = None;
        for attempt in 0..500u64 {
            match tokio::time::timeout(Duration::from_millis(attempt), f.fetch_count()).await {
                Ok(result) => {
                    finished = Some(result.unwrap());
                    break;
                }
                Err(_) => cancelled += 1,
            }
        }

        let samples = finished.expect("a fetch eventually completes");
        assert!(cancelled >= 1);
        assert_eq!(total(&samples), LINES as u64);
        assert_eq!(count_for(&samples, "amd64"), (LINES / 2) as u64);

        let again = f.fetch_count().await.unwrap();
        assert_eq!(total(&again), LINES as u64);
    }

    #[tokio::test]
    async fn overlong_line_is_dropped_without_buffering_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, &"x".repeat(MAX_PARTIAL_LINE + 4096));

        let mut f = fetcher(&path);
        assert_eq!(total(&f.fetch_count().await.unwrap()), 0);
        let held = f.cursor.as_ref().map(|c| c.partial.len()).unwrap();
        assert!(held <= MAX_PARTIAL_LINE);

        // the end of the dropped line would match on its own
        append(&path, "\"GET /dl/app-amd64.tar.gz HTTP/1.1\" 200 1\n");
        append(&path, HIT_ARM64);
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "amd64"), 0);
        assert_eq!(count_for(&samples, "arm64"), 1);

        append(&path, HIT_AMD64);
        let samples = f.fetch_count().await.unwrap();
        assert_eq!(count_for(&samples, "amd64"), 1);
    }
}
