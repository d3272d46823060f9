//! Decoupled logging pipeline for test cycles.
//!
//! Every `log` macro call is forwarded through an unbounded crossbeam channel
//! to a background thread that owns the log files, so a hardware worker never
//! waits on disk or on the console.
//!
//! ```text
//! log::info!/error!/log_success!
//!     |
//! [LogCollector] (non-blocking)
//!     |
//! [disk thread] ---> logs/full/<ts>.log      every line
//!     |          \-> logs/results/<ts>.log   target "result" and errors
//!     v
//! console channel (try_send, may drop under load)
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Target used for operator-facing success lines.
pub const RESULT_TARGET: &str = "result";

const FULL: &str = "full";
const RESULTS: &str = "results";

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once every earlier line is on disk.
    Flush(std::sync::mpsc::Sender<()>),
}

/// Session file name, plus a generation counter so the disk thread can drop
/// stale file handles when a new session starts.
#[derive(Clone, Debug, Default)]
struct SessionState {
    file_name: Option<String>,
    generation: u64,
}

/// Directory for logs relative to the working directory: ./logs
pub fn get_global_logs_path() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current working directory: {}", e))?;
    Ok(cwd.join("logs"))
}

pub fn ensure_logs_dir_exists(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create logs directory: {}", e))
}

/// Severity class of a line as shown to the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LineKind,
    /// HH:MM:SS.mmm
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String, kind: LineKind) -> Self {
        LogLine {
            message,
            kind,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    /// Whether the line also belongs in the results log.
    pub fn is_result(&self) -> bool {
        matches!(self.kind, LineKind::Success | LineKind::Error)
    }

    fn formatted(&self) -> String {
        format!("[{}] {}\n", self.timestamp, self.message)
    }
}

/// `log::Log` implementation that persists to disk and feeds a console.
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    console_tx: Option<tokio::sync::mpsc::Sender<LogLine>>,
    session_state: Arc<Mutex<SessionState>>,
    max_level: Level,
}

impl LogCollector {
    /// Create the `full/` and `results/` directories and spawn the disk thread.
    pub fn new(log_dir: PathBuf, console_tx: Option<tokio::sync::mpsc::Sender<LogLine>>) -> Result<Self, String> {
        for sub in [FULL, RESULTS] {
            std::fs::create_dir_all(log_dir.join(sub))
                .map_err(|e| format!("Failed to create {} log dir: {}", sub, e))?;
        }

        let (tx, rx) = unbounded::<LogMessage>();
        let session_state = Arc::new(Mutex::new(SessionState::default()));

        let thread_dir = log_dir.clone();
        let thread_session = Arc::clone(&session_state);
        let thread_console = console_tx.clone();

        // A plain OS thread rather than a tokio task: it must keep draining
        // even while the runtime is shutting down.
        std::thread::spawn(move || {
            let mut handles: HashMap<&'static str, File> = HashMap::new();
            let mut seen_generation = 0u64;
            let mut fallback_name: Option<String> = None;

            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let file_name = {
                            let session = thread_session.lock().unwrap_or_else(|p| p.into_inner());
                            if session.generation != seen_generation {
                                handles.clear();
                                seen_generation = session.generation;
                            }
                            session.file_name.clone()
                        };
                        let file_name = file_name
                            .unwrap_or_else(|| fallback_name.get_or_insert_with(timestamped_name).clone());

                        write_line(&mut handles, &thread_dir, FULL, &file_name, &line);
                        if line.is_result() {
                            write_line(&mut handles, &thread_dir, RESULTS, &file_name, &line);
                        }

                        if let Some(ref console) = thread_console {
                            let _ = console.try_send(line);
                        }
                    }
                    LogMessage::Flush(done) => {
                        for file in handles.values_mut() {
                            let _ = file.flush();
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_dir,
            console_tx,
            session_state,
            max_level: Level::Info,
        })
    }

    /// Change the most verbose level that is recorded.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Route following lines to `full/<file_name>` and `results/<file_name>`.
    pub fn start_new_session(&self, file_name: &str) -> Result<PathBuf, String> {
        let mut session = self
            .session_state
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        session.file_name = Some(file_name.to_string());
        session.generation = session.generation.wrapping_add(1);
        Ok(self.log_dir.join(FULL).join(file_name))
    }

    pub fn get_session_log_path(&self) -> Option<PathBuf> {
        self.session_state
            .lock()
            .ok()
            .and_then(|s| s.file_name.clone())
            .map(|name| self.log_dir.join(FULL).join(name))
    }

    pub fn push(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Wait until every line sent so far has been written out.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;

        tokio::task::spawn_blocking(move || done_rx.recv())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            tx: self.tx.clone(),
            log_dir: self.log_dir.clone(),
            console_tx: self.console_tx.clone(),
            session_state: Arc::clone(&self.session_state),
            max_level: self.max_level,
        }
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let kind = match record.level() {
            Level::Error => LineKind::Error,
            Level::Warn => LineKind::Warning,
            _ if record.target() == RESULT_TARGET => LineKind::Success,
            _ => LineKind::Info,
        };
        self.push(LogLine::new(format!("[{}] {}", record.level(), record.args()), kind));
    }

    fn flush(&self) {}
}

fn timestamped_name() -> String {
    format!("{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

fn write_line(
    handles: &mut HashMap<&'static str, File>,
    log_dir: &Path,
    sub: &'static str,
    file_name: &str,
    line: &LogLine,
) {
    if !handles.contains_key(sub) {
        let path = log_dir.join(sub).join(file_name);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                handles.insert(sub, file);
            }
            Err(e) => {
                eprintln!("[Log] Failed to open {}: {}", path.display(), e);
                return;
            }
        }
    }

    if let Some(file) = handles.get_mut(sub) {
        let _ = file.write_all(line.formatted().as_bytes());
    }
}

/// Log an operator-facing success line (green in the console, kept in the
/// results log).
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::log::info!(target: $crate::log_collector::RESULT_TARGET, "{}", msg);
    }}
}
