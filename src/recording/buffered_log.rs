//! Buffered, thread-safe CSV session writer.
//!
//! Lines accumulate in memory and reach the disk only when one of three
//! independent triggers fires after an append: the entry count hits a multiple
//! of the flush interval, the buffer outgrows its byte threshold, or too much
//! wall-clock time has passed since the last flush. Buffer, counters, flush
//! clock and file handle live behind one mutex and change together.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SuiteError, SuiteResult};
use crate::models::{LogSession, LogStats};
use crate::{log_error, log_info, log_warn};

use super::csv::{encode_header, encode_row};

const ENABLE_LOGS: bool = true;

const SUBJECT_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUBJECT_ID_LEN: usize = 6;

/// Flush policy for the session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// Flush once the in-memory buffer exceeds this many bytes.
    pub buffer_size: usize,
    /// Flush whenever the entry count reaches a multiple of this value.
    pub flush_interval: u64,
    /// Flush when this many seconds have passed since the previous flush.
    pub auto_flush_secs: f64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            flush_interval: 100,
            auto_flush_secs: 5.0,
        }
    }
}

impl LogConfig {
    pub fn auto_flush_interval(&self) -> Duration {
        Duration::from_secs_f64(self.auto_flush_secs.max(0.0))
    }
}

/// Destination of flushed bytes.
pub(crate) trait LogSink: Write + Send {
    /// Force written bytes to durable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

struct OpenSession {
    info: LogSession,
    sink: Box<dyn LogSink>,
}

struct LogState {
    session: Option<OpenSession>,
    buffer: String,
    entry_count: u64,
    flush_count: u64,
    last_flush: Instant,
}

pub struct BufferedLog {
    directory: PathBuf,
    config: LogConfig,
    state: Mutex<LogState>,
}

impl BufferedLog {
    pub fn new(directory: impl Into<PathBuf>, config: LogConfig) -> Self {
        let buffer = String::with_capacity(config.buffer_size);
        Self {
            directory: directory.into(),
            config,
            state: Mutex::new(LogState {
                session: None,
                buffer,
                entry_count: 0,
                flush_count: 0,
                last_flush: Instant::now(),
            }),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Open a new session file, closing the active one first.
    ///
    /// A blank or missing subject id is replaced by a generated one.
    pub fn start(&self, subject_id: Option<&str>) -> SuiteResult<LogSession> {
        let mut state = self.lock();

        if state.session.is_some() {
            self.close_locked(&mut state);
        }

        let subject_id = match subject_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_subject_id(),
        };

        fs::create_dir_all(&self.directory)
            .map_err(|err| SuiteError::io(&self.directory, err))?;

        let created_at = Local::now();
        let file_path = self.session_path(&subject_id, &created_at);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .map_err(|err| SuiteError::io(&file_path, err))?;

        let info = LogSession {
            subject_id,
            created_at,
            file_path,
        };

        state.buffer.clear();
        state.entry_count = 0;
        state.flush_count = 0;
        state.last_flush = Instant::now();
        state.session = Some(OpenSession {
            info: info.clone(),
            sink: Box::new(file),
        });

        log_info!(
            "Started CSV recording for subject {} at {}",
            info.subject_id,
            info.file_path.display()
        );
        Ok(info)
    }

    /// Flush and close the active session. Returns the session that was closed.
    pub fn stop(&self) -> Option<LogSession> {
        let mut state = self.lock();
        self.close_locked(&mut state)
    }

    /// Append the header line. Counts as one entry.
    pub fn write_header<S: AsRef<str>>(&self, fields: &[S]) -> bool {
        match encode_header(fields) {
            Ok(record) => self.append("header", record),
            Err(err) => {
                log_error!("Error encoding header: {err}");
                false
            }
        }
    }

    /// Append one escaped data row and evaluate the flush triggers.
    pub fn write_row<S: AsRef<str>>(&self, fields: &[S]) -> bool {
        match encode_row(fields) {
            Ok(record) => self.append("row", record),
            Err(err) => {
                log_error!("Error encoding row: {err}");
                false
            }
        }
    }

    /// Append a pre-formatted line verbatim.
    pub fn write_line(&self, line: &str) -> bool {
        self.append("line", format!("{line}\n"))
    }

    pub fn flush(&self) {
        let mut state = self.lock();
        Self::flush_locked(&mut state, Instant::now());
    }

    /// Flush if the auto-flush interval has elapsed, even without new writes.
    pub fn flush_if_stale(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        if state.session.is_some()
            && now.duration_since(state.last_flush) > self.config.auto_flush_interval()
        {
            Self::flush_locked(&mut state, now);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn current_session(&self) -> Option<LogSession> {
        self.lock().session.as_ref().map(|s| s.info.clone())
    }

    pub fn stats(&self) -> LogStats {
        let state = self.lock();
        LogStats {
            entry_count: state.entry_count,
            buffered_bytes: state.buffer.len(),
            flush_count: state.flush_count,
        }
    }

    /// `record` already ends with its line terminator.
    fn append(&self, kind: &str, record: String) -> bool {
        let mut state = self.lock();
        if state.session.is_none() {
            log_warn!("Cannot write {kind} - recording not started");
            return false;
        }

        state.buffer.push_str(&record);
        state.entry_count += 1;

        let now = Instant::now();
        if self.should_flush(&state, now) {
            Self::flush_locked(&mut state, now);
        }
        true
    }

    fn should_flush(&self, state: &LogState, now: Instant) -> bool {
        let by_count =
            self.config.flush_interval > 0 && state.entry_count % self.config.flush_interval == 0;
        let by_size = state.buffer.len() > self.config.buffer_size;
        let by_time = now.duration_since(state.last_flush) > self.config.auto_flush_interval();
        by_count || by_size || by_time
    }

    /// Write the buffer out and force it to disk. A failed write keeps the
    /// buffer for the next attempt.
    fn flush_locked(state: &mut LogState, now: Instant) -> bool {
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        if state.buffer.is_empty() {
            return false;
        }

        let result = session
            .sink
            .write_all(state.buffer.as_bytes())
            .and_then(|_| session.sink.sync());

        match result {
            Ok(()) => {
                state.buffer.clear();
                state.last_flush = now;
                state.flush_count += 1;
                true
            }
            Err(err) => {
                log::error!(
                    "Error flushing {} buffered bytes to {}: {err}",
                    state.buffer.len(),
                    session.info.file_path.display()
                );
                false
            }
        }
    }

    fn close_locked(&self, state: &mut LogState) -> Option<LogSession> {
        state.session.as_ref()?;

        Self::flush_locked(state, Instant::now());
        if !state.buffer.is_empty() {
            log::error!(
                "Discarding {} unflushed bytes while closing session",
                state.buffer.len()
            );
            state.buffer.clear();
        }

        let closed = state.session.take().map(|session| {
            // Dropping the sink closes the file.
            let OpenSession { info, sink } = session;
            drop(sink);
            info
        });

        if let Some(info) = &closed {
            log_info!(
                "Stopped CSV recording for subject {}. Total entries written: {}",
                info.subject_id,
                state.entry_count
            );
        }
        closed
    }

    fn session_path(&self, subject_id: &str, created_at: &DateTime<Local>) -> PathBuf {
        let stem = format!(
            "SensorData_{}_{}",
            file_safe(subject_id),
            created_at.format("%Y%m%d_%H%M%S")
        );
        let mut path = self.directory.join(format!("{stem}.csv"));
        let mut suffix = 1;
        while path.exists() {
            path = self.directory.join(format!("{stem}_{suffix}.csv"));
            suffix += 1;
        }
        path
    }

    #[cfg(test)]
    fn replace_sink(&self, sink: Box<dyn LogSink>) {
        if let Some(session) = self.lock().session.as_mut() {
            session.sink = sink;
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for BufferedLog {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn generate_subject_id() -> String {
    let mut rng = rand::thread_rng();
    (0..SUBJECT_ID_LEN)
        .map(|_| SUBJECT_ID_CHARSET[rng.gen_range(0..SUBJECT_ID_CHARSET.len())] as char)
        .collect()
}

fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn quiet_config() -> LogConfig {
        LogConfig {
            buffer_size: 1 << 20,
            flush_interval: 100,
            auto_flush_secs: 3600.0,
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn generated_subject_ids_are_six_uppercase_alphanumerics() {
        for _ in 0..50 {
            let id = generate_subject_id();
            assert_eq!(id.len(), 6);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn start_names_file_after_subject_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path().join("SensorData"), quiet_config());

        let session = log.start(Some("P01")).unwrap();
        let name = session.file_path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("SensorData_P01_"));
        assert!(name.ends_with(".csv"));
        // SensorData_P01_yyyyMMdd_HHmmss.csv
        assert_eq!(name.len(), "SensorData_P01_".len() + 15 + 4);
        assert!(session.file_path.exists());
        assert!(log.is_recording());
    }

    #[test]
    fn blank_subject_gets_generated_id() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());

        let session = log.start(Some("   ")).unwrap();
        assert_eq!(session.subject_id.len(), 6);
    }

    #[test]
    fn unsafe_subject_characters_stay_out_of_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());

        let session = log.start(Some("../evil")).unwrap();
        assert_eq!(session.subject_id, "../evil");
        assert_eq!(session.file_path.parent().unwrap(), dir.path());
    }

    #[test]
    fn writes_without_session_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());

        assert!(!log.write_header(&["A", "B"]));
        assert!(!log.write_row(&["1", "2"]));
        assert_eq!(log.stats(), LogStats::default());
    }

    #[test]
    fn stop_flushes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());

        let session = log.start(Some("S1")).unwrap();
        assert!(log.write_header(&["Timestamp", "Event", "Value"]));
        assert!(log.write_row(&["t0", "NOTE", "a,b"]));
        assert_eq!(log.stats().entry_count, 2);
        assert!(log.stats().buffered_bytes > 0);

        let closed = log.stop().unwrap();
        assert_eq!(closed, session);
        assert_eq!(
            read_lines(&session.file_path),
            vec!["Timestamp,Event,Value", "t0,NOTE,\"a,b\""]
        );
        assert!(!log.is_recording());
    }

    #[test]
    fn entry_count_interval_triggers_exactly_one_flush() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());
        log.start(Some("COUNT")).unwrap();

        for i in 0..99 {
            log.write_row(&[i.to_string()]);
        }
        assert_eq!(log.stats().flush_count, 0);

        log.write_row(&["99"]);
        let stats = log.stats();
        assert_eq!(stats.flush_count, 1);
        assert_eq!(stats.buffered_bytes, 0);
        assert_eq!(stats.entry_count, 100);
    }

    #[test]
    fn oversized_row_triggers_flush_regardless_of_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            buffer_size: 64,
            ..quiet_config()
        };
        let log = BufferedLog::new(dir.path(), config);
        let session = log.start(Some("SIZE")).unwrap();

        let big = "x".repeat(128);
        log.write_row(&[big.as_str()]);

        assert_eq!(log.stats().flush_count, 1);
        assert_eq!(read_lines(&session.file_path), vec![big]);
    }

    #[test]
    fn elapsed_time_triggers_flush_on_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            auto_flush_secs: 0.05,
            ..quiet_config()
        };
        let log = BufferedLog::new(dir.path(), config);
        log.start(Some("TIME")).unwrap();

        log.write_row(&["first"]);
        assert_eq!(log.stats().flush_count, 0);

        thread::sleep(Duration::from_millis(80));
        log.write_row(&["second"]);
        assert_eq!(log.stats().flush_count, 1);
        assert_eq!(log.stats().buffered_bytes, 0);
    }

    #[test]
    fn stale_buffer_is_flushed_by_housekeeping() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            auto_flush_secs: 0.05,
            ..quiet_config()
        };
        let log = BufferedLog::new(dir.path(), config);
        let session = log.start(Some("IDLE")).unwrap();
        log.write_row(&["pending"]);

        log.flush_if_stale();
        assert_eq!(log.stats().flush_count, 0);

        thread::sleep(Duration::from_millis(80));
        log.flush_if_stale();
        assert_eq!(log.stats().flush_count, 1);
        assert_eq!(read_lines(&session.file_path), vec!["pending"]);
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());
        log.flush();
        log.start(None).unwrap();
        log.flush();
        assert_eq!(log.stats().flush_count, 0);
    }

    #[test]
    fn restarting_closes_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());

        let first = log.start(Some("A")).unwrap();
        log.write_row(&["from-a"]);
        let second = log.start(Some("B")).unwrap();
        log.write_row(&["from-b"]);
        log.stop();

        assert_eq!(read_lines(&first.file_path), vec!["from-a"]);
        assert_eq!(read_lines(&second.file_path), vec!["from-b"]);
    }

    #[test]
    fn repeated_cycles_leave_one_complete_file_each() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());

        for cycle in 0..5 {
            log.start(Some("SAME")).unwrap();
            for row in 0..7 {
                log.write_row(&[format!("{cycle}-{row}")]);
            }
            log.stop();
        }

        let mut files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        assert_eq!(files.len(), 5);
        for file in files {
            assert_eq!(read_lines(&file).len(), 7);
        }
    }

    #[test]
    fn writes_after_stop_leave_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());
        let session = log.start(Some("POST")).unwrap();
        log.write_row(&["kept"]);
        log.stop();

        assert!(!log.write_row(&["late"]));
        log.flush();
        assert!(log.stop().is_none());
        assert_eq!(read_lines(&session.file_path), vec!["kept"]);
    }

    #[test]
    fn concurrent_writers_never_interleave_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(BufferedLog::new(
            dir.path(),
            LogConfig {
                buffer_size: 256,
                ..quiet_config()
            },
        ));
        let session = log.start(Some("MT")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = log.clone();
                thread::spawn(move || {
                    for row in 0..50 {
                        log.write_row(&[worker.to_string(), row.to_string(), "x".repeat(20)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        log.stop();

        let lines = read_lines(&session.file_path);
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|line| line.split(',').count() == 3));
    }

    struct FlakySink {
        file: File,
        failing: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.file.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl LogSink for FlakySink {
        fn sync(&mut self) -> io::Result<()> {
            self.file.sync_data()
        }
    }

    #[test]
    fn failed_flush_keeps_rows_for_the_next_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());
        let session = log.start(Some("RETRY")).unwrap();

        let failing = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let file = OpenOptions::new()
            .append(true)
            .open(&session.file_path)
            .unwrap();
        log.replace_sink(Box::new(FlakySink {
            file,
            failing: failing.clone(),
        }));

        assert!(log.write_row(&["first"]));
        assert!(log.write_row(&["second"]));
        log.flush();

        let stats = log.stats();
        assert_eq!(stats.flush_count, 0);
        assert!(stats.buffered_bytes > 0);
        assert!(log.is_recording());
        assert_eq!(fs::metadata(&session.file_path).unwrap().len(), 0);

        failing.store(false, std::sync::atomic::Ordering::SeqCst);
        log.flush();
        let stats = log.stats();
        assert_eq!(stats.flush_count, 1);
        assert_eq!(stats.buffered_bytes, 0);
        assert_eq!(read_lines(&session.file_path), vec!["first", "second"]);
    }

    #[test]
    fn raw_lines_are_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());
        assert!(!log.write_line("# orphan"));

        let session = log.start(Some("RAW")).unwrap();
        assert!(log.write_line("# calibration,\"pass\""));
        assert!(log.write_row(&["1", "2"]));
        assert_eq!(log.stats().entry_count, 2);
        log.stop();

        assert_eq!(
            read_lines(&session.file_path),
            vec!["# calibration,\"pass\"", "1,2"]
        );
    }

    #[test]
    fn carriage_returns_keep_rows_tabular() {
        let dir = tempfile::tempdir().unwrap();
        let log = BufferedLog::new(dir.path(), quiet_config());
        let session = log.start(Some("CR")).unwrap();
        log.write_header(&["A", "B", "C"]);
        log.write_row(&["1", "a\rb", "3"]);
        log.stop();

        let widths: Vec<_> = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&session.file_path)
            .unwrap()
            .records()
            .map(|record| record.unwrap().len())
            .collect();
        assert_eq!(widths, vec![3, 3]);
    }
}
