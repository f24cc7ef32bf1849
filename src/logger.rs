// SPDX-License-Identifier: MIT
//! Non-blocking asynchronous logger: an MPSC queue feeding a single
//! consumer thread, with a configurable overflow policy (spec §1, §6
//! "Logger sink", §2 "Logger (external)").
//!
//! This is a distinct component from the `tracing` facade used for the
//! crate's own internal diagnostics (see `lib.rs`); it is the addressable
//! sink the server engine feeds line-oriented events into, and a caller
//! may also feed its own application-level events into the same instance.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Sender, TrySendError};

/// Minimum severity a record must meet to be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One line-oriented diagnostic event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub target: &'static str,
    pub message: String,
    pub unix_millis: u128,
}

impl LogRecord {
    fn formatted(&self) -> String {
        format!(
            "{} [{:?}] {}: {}",
            self.unix_millis,
            self.level,
            self.target,
            self.message
        )
    }
}

/// What happens when the queue is full and the consumer hasn't drained it
/// in time (spec §5 "The Logger's enqueue may suspend at most
/// `wait_timeout` seconds under the `WaitTimeout` overflow policy").
#[derive(Debug, Clone, Copy)]
pub enum OverflowPolicy {
    /// Drop the record that didn't fit; the caller never blocks.
    DropNewest,
    /// Evict the oldest queued record to make room for the new one.
    OverwriteOldest,
    /// Block the caller until space is available.
    WaitForever,
    /// Block up to the given duration, then drop the record.
    WaitTimeout(Duration),
}

/// How the file rotation keeps individual log files bounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationPolicy {
    /// Rotate once the active file exceeds this many bytes.
    pub max_bytes: Option<u64>,
    /// Rotate whenever the wall-clock day changes.
    pub by_date: bool,
}

/// Where formatted records are written.
pub enum LogOutput {
    Stdout,
    Stderr,
    File {
        path: PathBuf,
        rotation: RotationPolicy,
    },
    Callback(Arc<dyn Fn(&LogRecord) + Send + Sync>),
}

pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub output: LogOutput,
    pub overflow_policy: OverflowPolicy,
    pub queue_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            min_level: LogLevel::Info,
            output: LogOutput::Stderr,
            overflow_policy: OverflowPolicy::DropNewest,
            queue_capacity: 4096,
        }
    }
}

enum Message {
    Record(LogRecord),
    Shutdown,
}

/// The logger handle: cheap to clone (an `Arc`-free handle holding just a
/// channel sender), safe to share across the Acceptor, every IoWorker, and
/// external callers. Its lifetime spans `init`..`deinit` and outlives
/// individual `run`/`stop` cycles (spec §3 "Lifecycle").
pub struct Logger {
    sender: Sender<Message>,
    min_level: LogLevel,
    overflow_policy: OverflowPolicy,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Logger {
    pub fn start(config: LoggerConfig) -> Self {
        let (tx, rx) = bounded::<Message>(config.queue_capacity.max(1));
        let output = config.output;
        let consumer = std::thread::Builder::new()
            .name("logger-consumer".into())
            .spawn(move || run_consumer(rx, output))
            .expect("failed to spawn logger consumer thread");

        Logger {
            sender: tx,
            min_level: config.min_level,
            overflow_policy: config.overflow_policy,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    pub fn log(&self, level: LogLevel, target: &'static str, message: impl Into<String>) {
        if level < self.min_level {
            return;
        }
        let record = LogRecord {
            level,
            target,
            message: message.into(),
            unix_millis: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
        };
        self.enqueue(Message::Record(record));
    }

    fn enqueue(&self, msg: Message) {
        match self.overflow_policy {
            OverflowPolicy::DropNewest => {
                let _ = self.sender.try_send(msg);
            }
            OverflowPolicy::OverwriteOldest => match self.sender.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(msg)) => {
                    // Best-effort: the consumer may win the race and drain
                    // concurrently, which just means we tried for nothing.
                    let _ = self.sender.try_send(msg);
                }
                Err(TrySendError::Disconnected(_)) => {}
            },
            OverflowPolicy::WaitForever => {
                let _ = self.sender.send(msg);
            }
            OverflowPolicy::WaitTimeout(timeout) => {
                let _ = self.sender.send_timeout(msg, timeout);
            }
        }
    }

    /// Stop the consumer thread and join it. Idempotent: a second call is
    /// a no-op. Takes `&self` (interior mutability) so the logger can be
    /// shared via `Arc` across the Acceptor, every IoWorker, and external
    /// callers while still allowing any one of them to request shutdown.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_consumer(rx: crossbeam_channel::Receiver<Message>, output: LogOutput) {
    let mut sink = FileSink::new();
    for msg in rx.iter() {
        match msg {
            Message::Shutdown => break,
            Message::Record(record) => write_record(&output, &mut sink, &record),
        }
    }
}

struct FileSink {
    file: Option<File>,
    bytes_written: u64,
    opened_day: Option<u64>,
}

impl FileSink {
    fn new() -> Self {
        FileSink {
            file: None,
            bytes_written: 0,
            opened_day: None,
        }
    }

    fn ensure_open(&mut self, path: &PathBuf, rotation: RotationPolicy) {
        let today = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() / 86_400)
            .unwrap_or(0);

        let needs_date_rotation =
            rotation.by_date && self.opened_day.is_some() && self.opened_day != Some(today);
        let needs_size_rotation = rotation
            .max_bytes
            .map(|max| self.bytes_written >= max)
            .unwrap_or(false);

        if self.file.is_none() || needs_date_rotation || needs_size_rotation {
            if self.file.is_some() {
                rotate_existing(path);
            }
            self.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok();
            self.bytes_written = 0;
            self.opened_day = Some(today);
        }
    }
}

fn rotate_existing(path: &PathBuf) {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut rotated = path.clone();
    rotated.set_extension(format!("{suffix}.log"));
    let _ = std::fs::rename(path, rotated);
}

fn write_record(output: &LogOutput, sink: &mut FileSink, record: &LogRecord) {
    let line = record.formatted();
    match output {
        LogOutput::Stdout => println!("{line}"),
        LogOutput::Stderr => eprintln!("{line}"),
        LogOutput::File { path, rotation } => {
            sink.ensure_open(path, *rotation);
            if let Some(file) = sink.file.as_mut() {
                if writeln!(file, "{line}").is_ok() {
                    sink.bytes_written += line.len() as u64 + 1;
                }
            }
        }
        LogOutput::Callback(cb) => cb(record),
    }
}
