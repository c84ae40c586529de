//! logging setup.
//!
//! Call sites use the `tracing` macros; this module turns the `logging`
//! configuration section into a subscriber. Lines are buffered to a
//! background writer thread so a slow disk or terminal never stalls a
//! worker, and a full buffer drops lines instead of blocking.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use chrono::{Datelike, Local};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::{
    Layer, Registry,
    filter::LevelFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{Appender, LogFormat, LogLevel, LoggingConfig};

/// Keeps the background writers alive; dropping it flushes what is left.
/// Hold it for the life of the process.
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
}

pub fn init(config: &LoggingConfig) -> io::Result<LogGuard> {
    let level = match config.level {
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut workers = Vec::new();

    for appender in &config.appender_flags {
        match appender {
            Appender::Console => {
                let (writer, guard) = NonBlockingBuilder::default()
                    .buffered_lines_limit(config.buffer_size)
                    .lossy(true)
                    .finish(io::stdout());
                workers.push(guard);
                layers.push(match config.format {
                    LogFormat::Plain => fmt::layer()
                        .with_writer(writer)
                        .with_filter(level)
                        .boxed(),
                    LogFormat::Json => fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_filter(level)
                        .boxed(),
                });
            }
            Appender::File => {
                let Some(path) = config.file.clone() else {
                    continue;
                };
                let file =
                    RollingFile::open(path, config.rollover_size, config.rollover_daily)?;
                let (writer, guard) = NonBlockingBuilder::default()
                    .buffered_lines_limit(config.buffer_size)
                    .lossy(true)
                    .finish(file);
                workers.push(guard);
                layers.push(match config.format {
                    LogFormat::Plain => fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(level)
                        .boxed(),
                    LogFormat::Json => fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_filter(level)
                        .boxed(),
                });
            }
        }
    }

    // a second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(layers).try_init();
    Ok(LogGuard { _workers: workers })
}

/// Appending file writer with size and daily rollover. On rollover the
/// current file is renamed to `<name>.<timestamp>.bak` and a fresh one is
/// opened.
struct RollingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_size: u64,
    daily: bool,
    day: (i32, u32),
}

impl RollingFile {
    fn open(path: PathBuf, max_size: u64, daily: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_size,
            daily,
            day: today(),
        })
    }

    fn due(&self, incoming: usize) -> bool {
        if self.max_size > 0 && self.written + incoming as u64 >= self.max_size {
            return true;
        }
        self.daily && today() != self.day
    }

    fn rollover(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let backup = PathBuf::from(format!("{}.{stamp}.bak", self.path.display()));
        fs::rename(&self.path, backup)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        self.day = today();
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.due(buf.len()) {
            self.rollover()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn today() -> (i32, u32) {
    let now = Local::now();
    (now.year(), now.ordinal())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn size_rollover_renames_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emme.log");
        let mut file = RollingFile::open(path.clone(), 64, false).unwrap();

        file.write_all(&[b'a'; 32]).unwrap();
        assert!(path.exists());
        // crossing the limit swaps in a fresh file.
        file.write_all(&[b'b'; 40]).unwrap();
        file.flush().unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(entries.iter().any(|name| name.ends_with(".bak")));
        assert_eq!(fs::read(&path).unwrap(), [b'b'; 40]);
    }

    #[test]
    fn no_rollover_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emme.log");
        let mut file = RollingFile::open(path.clone(), 0, false).unwrap();
        file.write_all(&[b'a'; 4096]).unwrap();
        file.write_all(&[b'b'; 4096]).unwrap();
        file.flush().unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), 8192);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("emme.log");
        let mut file = RollingFile::open(path.clone(), 0, false).unwrap();
        file.write_all(b"line\n").unwrap();
        file.flush().unwrap();
        assert!(path.exists());
    }
}
