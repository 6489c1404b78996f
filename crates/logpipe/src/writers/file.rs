use crate::error::WriteError;
use crate::format::{TextFormatter, TextStyle};
use crate::line::LogEntry;
use crate::writer::Writer;
use chrono::{DateTime, Local};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;

/// Where log files go: `{root}/{folder(time)}/{name(time)}.{ext}`.
///
/// `folder` and `name` are `chrono` format strings, e.g. `%Y-%m` and
/// `%Y-%m-%d` give `./logs/2023-05/2023-05-13.log`.
#[derive(Debug, Clone)]
pub struct FileLayout {
    pub root: PathBuf,
    pub folder: String,
    pub name: String,
    pub ext: String,
}

impl Default for FileLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./logs"),
            folder: "%Y-%m".to_string(),
            name: "%Y-%m-%d".to_string(),
            ext: "log".to_string(),
        }
    }
}

impl FileLayout {
    /// Directory and file path for a line stamped `time`.
    pub fn paths(&self, time: &DateTime<Local>) -> (PathBuf, PathBuf) {
        let dir = self.root.join(stamp(time, &self.folder));
        let mut file = stamp(time, &self.name);
        file.push('.');
        file.push_str(&self.ext);
        let path = dir.join(file);
        (dir, path)
    }
}

fn stamp(time: &DateTime<Local>, format: &str) -> String {
    let mut out = String::new();
    // An invalid format string renders as far as it parses.
    let _ = write!(out, "{}", time.format(format));
    out
}

/// Appends lines to date-partitioned files.
///
/// A batch is grouped by target file (order kept within each file) and every
/// file gets its lines in a single append. Files are written concurrently.
#[derive(Debug)]
pub struct FileWriter {
    layout: FileLayout,
    formatter: TextFormatter,
    created: Mutex<HashSet<PathBuf>>,
}

impl FileWriter {
    pub fn new(layout: FileLayout, time_format: impl Into<String>) -> Self {
        Self {
            layout,
            formatter: TextFormatter::new(TextStyle::File, time_format),
            created: Mutex::new(HashSet::new()),
        }
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Groups rendered lines by file path, in first-seen order.
    fn group(&self, batch: &[LogEntry]) -> Vec<(PathBuf, PathBuf, String)> {
        let mut files: Vec<(PathBuf, PathBuf, String)> = Vec::new();
        let mut index: HashMap<PathBuf, usize> = HashMap::new();

        for line in batch {
            let (dir, path) = self.layout.paths(&line.time);
            let slot = *index.entry(path.clone()).or_insert_with(|| {
                files.push((dir, path, String::new()));
                files.len() - 1
            });
            let body = &mut files[slot].2;
            self.formatter.format_into(line, body);
            body.push('\n');
        }
        files
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<(), WriteError> {
        let known = self
            .created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(dir);
        if !known {
            tokio::fs::create_dir_all(dir).await?;
            self.created
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(dir.to_path_buf());
        }
        Ok(())
    }

    async fn append(&self, dir: &Path, path: &Path, body: &str) -> Result<(), WriteError> {
        self.ensure_dir(dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

impl Writer<LogEntry> for FileWriter {
    async fn write(&self, batch: &[LogEntry]) -> Result<(), WriteError> {
        let files = self.group(batch);
        let results = join_all(
            files
                .iter()
                .map(|(dir, path, body)| self.append(dir, path, body)),
        )
        .await;

        // Every file was attempted; report the first failure.
        results.into_iter().collect()
    }

    fn name(&self) -> &str {
        "file"
    }
}
