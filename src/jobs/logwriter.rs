//! # Rotated per-job output log.
//!
//! Each job with a non-empty `error_log_path` gets its own directory holding
//! files named `<unix-seconds>_log.txt`, so lexicographic order equals
//! chronological order. Appends always target the newest file and rotation
//! keeps the directory bounded:
//!
//! - **Size rotation**: once the target reaches `error_log_max_kb_size` KB, a
//!   fresh file takes over.
//! - **Count rotation**: with a positive `error_log_max_files`, the oldest
//!   file is removed whenever a write would leave more than that many files.
//!
//! One file handle is kept open under the writer's mutex and reopened only
//! when the target moves to another path. Filesystem errors are reported to
//! the supervisor log and swallowed: a job loop is never aborted because its
//! logging failed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::warn;

/// Append-only, rotated text log for one job's captured output.
pub struct JobLogWriter {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Log directory; `None` means logging is disabled for this job.
    dir: Option<PathBuf>,
    /// Size threshold in KB. Non-positive disables size rotation.
    max_kb: f64,
    /// File-count bound. 0 disables count rotation.
    max_files: u32,
    /// Currently open target, kept across appends.
    open: Option<(PathBuf, File)>,
}

impl JobLogWriter {
    /// Creates the writer for one job. The directory is `<base><job_name>`,
    /// created lazily on first write.
    pub fn new(base: &str, job_name: &str, max_kb: f64, max_files: u32) -> Self {
        let dir = if base.is_empty() {
            None
        } else {
            Some(PathBuf::from(format!("{base}{job_name}")))
        };
        Self {
            inner: Mutex::new(Inner {
                dir,
                max_kb,
                max_files,
                open: None,
            }),
        }
    }

    /// True when this job logs its output.
    pub fn enabled(&self) -> bool {
        self.inner.lock().unwrap().dir.is_some()
    }

    /// Appends one timestamped line built from `parts` joined with spaces.
    /// No-op when logging is disabled or the joined content is empty.
    pub fn append(&self, parts: &[String]) {
        let content = parts.join(" ");
        if content.is_empty() {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.dir.is_none() {
            return;
        }
        let line = format!("[{}] {}\n", Local::now().format("%Y-%m-%dT%H:%M:%S"), content);
        if let Err(err) = inner.write_line(&line) {
            warn!(error = %err, "job log write failed");
        }
    }
}

impl Inner {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let dir = self.dir.clone().expect("checked by caller");
        ensure_dir(&dir)?;

        let target = self.select_target(&dir)?;
        let reuse = matches!(&self.open, Some((path, _)) if *path == target);
        if !reuse {
            let file = OpenOptions::new().create(true).append(true).open(&target)?;
            self.open = Some((target, file));
        }

        let (_, file) = self.open.as_mut().expect("opened above");
        file.write_all(line.as_bytes())?;
        file.sync_all()
    }

    /// Picks the file the next write goes to, applying rotation.
    ///
    /// The target is the lexicographically greatest file, or a fresh
    /// `<now>_log.txt` when the directory is empty or the greatest file has
    /// reached the size threshold. Count rotation removes the smallest
    /// file(s) so the directory never exceeds `max_files` entries.
    fn select_target(&self, dir: &Path) -> io::Result<PathBuf> {
        let mut files: Vec<String> = fs::read_dir(dir)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                entry
                    .file_type()
                    .ok()?
                    .is_file()
                    .then(|| entry.file_name().to_string_lossy().into_owned())
            })
            .collect();
        files.sort_unstable();

        // Bound pre-existing overfull directories first.
        if self.max_files >= 1 {
            while files.len() as u32 > self.max_files {
                fs::remove_file(dir.join(&files[0]))?;
                files.remove(0);
            }
        }

        let fresh_needed = match files.last() {
            None => true,
            Some(newest) if self.max_kb > 0.0 => {
                let size = fs::metadata(dir.join(newest))?.len();
                size as f64 >= self.max_kb * 1024.0
            }
            Some(_) => false,
        };

        if fresh_needed {
            if self.max_files >= 1 && files.len() as u32 >= self.max_files {
                fs::remove_file(dir.join(&files[0]))?;
            }
            return Ok(dir.join(fresh_name()));
        }

        Ok(dir.join(files.last().expect("non-empty")))
    }
}

fn fresh_name() -> String {
    format!("{}_log.txt", Local::now().timestamp())
}

#[cfg(unix)]
fn ensure_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if !dir.exists() {
        fs::DirBuilder::new().mode(0o760).create(dir)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        fs::create_dir(dir)?;
    }
    Ok(())
}
