//! Tracing setup and the line-oriented application log.
//!
//! Besides stderr, a fmt layer writes plain lines to `.logging.txt` in the
//! data directory, rotating to `.logging.txt.1` at ~1 MiB so the file the
//! `/logs/api` endpoint serves stays bounded.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE: &str = ".logging.txt";
const MAX_LOG_BYTES: u64 = 1024 * 1024;
/// `/logs/api` refuses to hand out more lines than this at once.
pub const MAX_LOG_LINES: usize = 5000;

struct RollingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
}

impl RollingFile {
    fn open(path: PathBuf, max_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_bytes,
        })
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        if self.written < self.max_bytes {
            return Ok(());
        }
        self.file.flush()?;
        let rotated = self.path.with_extension("txt.1");
        std::fs::rename(&self.path, &rotated)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

/// Cloneable writer handle for the fmt layer.
#[derive(Clone)]
pub struct RollingWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl RollingWriter {
    pub fn open(path: PathBuf) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(path, MAX_LOG_BYTES)?)),
        })
    }

    #[cfg(test)]
    fn with_max(path: PathBuf, max_bytes: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(path, max_bytes)?)),
        })
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        inner.rotate_if_needed()?;
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global subscriber: stderr plus the rotating file.
pub fn init(data_dir: &Path) -> anyhow::Result<()> {
    let writer = RollingWriter::open(data_dir.join(LOG_FILE))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
        .with(EnvFilter::from_default_env().add_directive("wavecast=info".parse()?))
        .init();
    Ok(())
}

/// Read `count` lines of the log starting at line `start` (0-based).
///
/// Returns the lines plus whether more follow. `count` is capped at
/// [`MAX_LOG_LINES`].
pub fn read_lines(path: &Path, start: usize, count: usize) -> io::Result<(Vec<String>, bool)> {
    let count = count.min(MAX_LOG_LINES).max(1);
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader
        .lines()
        .skip(start)
        .take(count)
        .collect::<Result<_, _>>()?;
    let has_more = lines.len() == count;
    Ok((lines, has_more))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_append_and_rotate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOG_FILE);
        let mut writer = RollingWriter::with_max(path.clone(), 64).unwrap();

        for i in 0..20 {
            writeln!(writer, "log line number {i}").unwrap();
        }
        writer.flush().unwrap();

        let rotated = path.with_extension("txt.1");
        assert!(rotated.exists(), "rotation file missing");
        assert!(path.exists());
        // Active file restarted below the cap
        assert!(std::fs::metadata(&path).unwrap().len() <= 64 + 32);
    }

    #[test]
    fn read_lines_ranges() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOG_FILE);
        std::fs::write(&path, "a\nb\nc\nd\ne\n").unwrap();

        let (lines, has_more) = read_lines(&path, 1, 2).unwrap();
        assert_eq!(lines, vec!["b", "c"]);
        assert!(has_more);

        let (lines, has_more) = read_lines(&path, 3, 10).unwrap();
        assert_eq!(lines, vec!["d", "e"]);
        assert!(!has_more);

        let (lines, _) = read_lines(&path, 99, 10).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn read_lines_missing_file_errors() {
        let dir = tempdir().unwrap();
        assert!(read_lines(&dir.path().join("nope.txt"), 0, 10).is_err());
    }
}
