//! Log sink setup: console output plus a daily `log-YYYY-MM-DD.txt` file.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// `MakeWriter` that appends to a per-day log file under `dir`.
///
/// The file name is resolved on every event, so the sink rolls over at
/// midnight without a background task.
pub struct DailyLogWriter {
    dir: PathBuf,
}

impl DailyLogWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn current_path(&self) -> PathBuf {
        self.dir
            .join(format!("log-{}.txt", Utc::now().format("%Y-%m-%d")))
    }
}

pub enum LogFile {
    Open(File),
    // Log output must never take the process down.
    Discard,
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogFile::Open(file) => file.write(buf),
            LogFile::Discard => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogFile::Open(file) => file.flush(),
            LogFile::Discard => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DailyLogWriter {
    type Writer = LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())
        {
            Ok(file) => LogFile::Open(file),
            Err(_) => LogFile::Discard,
        }
    }
}

/// Initializes the global subscriber: human-readable console layer plus a
/// plain (no ANSI) file layer in the configured log directory.
pub fn init(log_dir: &str) {
    let _ = std::fs::create_dir_all(log_dir);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(DailyLogWriter::new(log_dir)),
        )
        .init();
}
