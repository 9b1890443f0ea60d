//! Shared logging utilities for Atrium binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "atrium=info,atrium_schema=info,atrium_db=info";
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Atrium binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Also write to a log file under the Atrium home directory.
    pub log_to_file: bool,
}

/// Initialize tracing with stderr output and an optional size-capped file.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let env_filter = || {
        EnvFilter::try_from_env("ATRIUM_LOG").unwrap_or_else(|_| {
            if config.verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new(DEFAULT_LOG_FILTER)
            }
        })
    };

    if config.log_to_file {
        let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
        let writer = CappedLogWriter::open(log_dir, config.app_name)
            .context("Failed to open log file")?;
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter()),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter()),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter()),
            )
            .init();
    }

    Ok(())
}

/// The Atrium home directory: ~/.atrium, or `ATRIUM_HOME` when set.
pub fn atrium_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("ATRIUM_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".atrium")
}

/// The logs directory: ~/.atrium/logs
pub fn logs_dir() -> PathBuf {
    atrium_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Append-only log file with a single rotated backup.
///
/// When the active file would exceed the size cap it is renamed to
/// `<name>.log.1`, replacing any previous backup, and a fresh file opens.
struct CappedLogFile {
    dir: PathBuf,
    base_name: String,
    max_size: u64,
    file: File,
    current_size: u64,
}

impl CappedLogFile {
    fn open(dir: PathBuf, base_name: &str, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let base_name = sanitize_name(base_name);
        let path = dir.join(format!("{}.log", base_name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata()?.len();
        let mut log = Self {
            dir,
            base_name,
            max_size,
            file,
            current_size,
        };
        if log.current_size > log.max_size {
            log.rotate()?;
        }
        Ok(log)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();
        let current = self.current_path();
        let backup = self.dir.join(format!("{}.log.1", self.base_name));
        if current.exists() {
            fs::rename(&current, &backup)?;
        }
        self.file = OpenOptions::new().create(true).append(true).open(&current)?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for CappedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct CappedLogWriter {
    inner: Arc<Mutex<CappedLogFile>>,
}

impl CappedLogWriter {
    fn open(dir: PathBuf, base_name: &str) -> Result<Self> {
        let file = CappedLogFile::open(dir, base_name, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct CappedLogGuard {
    inner: Arc<Mutex<CappedLogFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CappedLogWriter {
    type Writer = CappedLogGuard;

    fn make_writer(&'a self) -> Self::Writer {
        CappedLogGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for CappedLogGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CappedLogFile::open(dir.path().to_path_buf(), "test", 16).unwrap();

        log.write_all(b"0123456789").unwrap();
        log.write_all(b"0123456789").unwrap();
        log.flush().unwrap();

        let backup = dir.path().join("test.log.1");
        assert!(backup.exists());
        assert_eq!(fs::read_to_string(backup).unwrap(), "0123456789");
        assert_eq!(
            fs::read_to_string(dir.path().join("test.log")).unwrap(),
            "0123456789"
        );
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("atrium admin"), "atrium_admin");
        assert_eq!(sanitize_name("a/b"), "a_b");
    }
}
