use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{Local, NaiveDate};

pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Destination for formatted log lines. The drainer (or the sync writer)
/// holds exclusive ownership, so implementations need no interior locking.
pub trait LogSink: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File sink rotated on local-day change and on a line-count threshold.
///
/// File names are `{dir}/{YYYY}_{MM}_{DD}{suffix}`; same-day rollovers get
/// `_{N}` appended before the suffix.
pub struct RollingFile {
    dir: PathBuf,
    suffix: String,
    max_lines: usize,
    file: Option<BufWriter<File>>,
    day: NaiveDate,
    lines: usize,
    seq: u32,
}

impl RollingFile {
    pub fn create(dir: PathBuf, suffix: String, max_lines: usize) -> io::Result<Self> {
        assert!(max_lines > 0, "rotation threshold must be positive");
        std::fs::create_dir_all(&dir)?;
        let mut this = Self {
            dir,
            suffix,
            max_lines,
            file: None,
            day: Local::now().date_naive(),
            lines: 0,
            seq: 0,
        };
        this.open_current()?;
        Ok(this)
    }

    pub fn current_file_name(&self) -> String {
        let date = self.day.format("%Y_%m_%d");
        if self.seq == 0 {
            format!("{date}{}", self.suffix)
        } else {
            format!("{date}_{}{}", self.seq, self.suffix)
        }
    }

    fn open_current(&mut self) -> io::Result<()> {
        if let Some(old) = self.file.take() {
            drop(old); // flushes
        }
        let path = self.dir.join(self.current_file_name());
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.file = Some(BufWriter::new(file));
        self.lines = 0;
        Ok(())
    }

    fn roll_if_needed(&mut self) -> io::Result<()> {
        let today = Local::now().date_naive();
        if today != self.day {
            self.day = today;
            self.seq = 0;
            self.open_current()
        } else if self.lines >= self.max_lines {
            self.seq += 1;
            self.open_current()
        } else {
            Ok(())
        }
    }
}

impl LogSink for RollingFile {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.roll_if_needed()?;
        let file = self.file.as_mut().expect("log file open");
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// In-memory sink for tests; the handle returned alongside observes every
/// line written.
pub struct VecSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl VecSink {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (Self { lines: Arc::clone(&lines) }, lines)
    }
}

impl LogSink for VecSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        locked(&self.lines).push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rolls_over_on_line_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink =
            RollingFile::create(dir.path().to_path_buf(), ".log".to_string(), 3).unwrap();
        let first = sink.current_file_name();
        for i in 0..4 {
            sink.write_line(&format!("line {i}")).unwrap();
        }
        let second = sink.current_file_name();
        sink.flush().unwrap();
        drop(sink);

        assert_ne!(first, second);
        assert!(second.contains("_1"));

        let first_body = std::fs::read_to_string(dir.path().join(&first)).unwrap();
        let second_body = std::fs::read_to_string(dir.path().join(&second)).unwrap();
        assert_eq!(first_body.lines().count(), 3);
        assert_eq!(second_body.lines().collect::<Vec<_>>(), vec!["line 3"]);
    }

    #[test]
    fn file_name_encodes_date_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RollingFile::create(dir.path().to_path_buf(), ".log".to_string(), 10).unwrap();
        let name = sink.current_file_name();
        let date = Local::now().date_naive().format("%Y_%m_%d").to_string();
        assert_eq!(name, format!("{date}.log"));
    }
}
