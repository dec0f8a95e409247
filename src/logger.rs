use crate::prelude::*;
use simplelog::{CombinedLogger, ConfigBuilder, SharedLogger, WriteLogger};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const LOG_FILENAME: &str = "sandbox-monitor.log";
pub const LOG_MAX_BYTES: u64 = 1_000_000;

/// Append-only log file that moves itself to `<path>.1` once it would reach `max_bytes`
///
/// Writes are buffered up to the end of the line so a record never spans two files.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    size: u64,
    pending: Vec<u8>,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path)
            .with_context(|| format!("Failed to open log file at {}", path.display()))?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            max_bytes,
            file,
            size,
            pending: vec![],
        })
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut backup = self.path.clone().into_os_string();
        backup.push(".1");
        PathBuf::from(backup)
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if self.size > 0 && self.size + line.len() as u64 >= self.max_bytes {
            self.rotate()?;
        }

        self.file.write_all(line)?;
        self.size += line.len() as u64;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        self.file = open_append(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.write_line(&line)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let partial = std::mem::take(&mut self.pending);
            self.write_line(&partial)?;
        }
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Log level from `SANDBOX_MONITOR_LOG`, debug by default
fn get_log_level() -> log::LevelFilter {
    env::var("SANDBOX_MONITOR_LOG")
        .ok()
        .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Debug)
}

pub fn get_file_logger(path: &Path) -> Result<Box<dyn SharedLogger>> {
    let config = ConfigBuilder::new()
        .set_time_level(log::LevelFilter::Trace)
        .set_time_format_rfc3339()
        .set_thread_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_location_level(log::LevelFilter::Off)
        .build();

    let file = RotatingFile::open(path, LOG_MAX_BYTES)?;
    Ok(WriteLogger::new(get_log_level(), config, file))
}

pub fn init_file_logger(path: &Path) -> Result<()> {
    let logger = get_file_logger(path)?;
    CombinedLogger::init(vec![logger])?;
    Ok(())
}

/// `sandbox-monitor.log` next to the running executable
pub fn default_log_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(env::temp_dir)
        .join(LOG_FILENAME)
}
