//! Run history: one JSON summary per line, append-only.

use crate::result::RunSummary;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, summary: &RunSummary) -> io::Result<()> {
        let json = serde_json::to_string(summary)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Every readable summary, oldest first. Malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<RunSummary>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for (n, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunSummary>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!(line = n + 1, error = %e, "skipping malformed history line"),
            }
        }
        Ok(entries)
    }

    /// The newest `n` summaries, newest first.
    pub fn recent(&self, n: usize) -> io::Result<Vec<RunSummary>> {
        let mut all = self.read_all()?;
        all.reverse();
        all.truncate(n);
        Ok(all)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
