//! Durable append-only storage for audit events.
//!
//! # Design Decisions
//! - One JSON object per line; a record is a single `write_all` of line + `\n`
//! - A torn trailing record (crash mid-write) is cut off when the file is opened
//! - Retention rewrites to a temp file and renames it over the log, under the
//!   same lock as appends, so readers see the old or the new file, never a mix
//! - A failed write is trimmed back to the previous record boundary
//! - Before each append the cached handle is checked against the path, so a
//!   log replaced by another sink or process is reopened instead of written
//!   through a stale inode
//! - Retention is meant to run inside the service; an outside process racing
//!   the read-then-rename can still lose appends made in between

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::event::AuditEvent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write timed out after {0} ms")]
    Timeout(u64),

    #[error("audit queue still full after {0} ms")]
    QueueFull(u64),

    #[error("local buffer full ({0} events)")]
    BufferFull(usize),

    #[error("audit writer has stopped")]
    Closed,

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), SinkError>;

    /// Every stored event in write order.
    async fn load(&self) -> Result<Vec<AuditEvent>, SinkError>;

    /// Drop events older than `cutoff`. Returns how many were removed.
    async fn retain_since(&self, cutoff: DateTime<Utc>) -> Result<usize, SinkError>;
}

/// JSON-lines file sink.
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAuditSink {
    /// Open (or create) the log, truncating a partial trailing record.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        match fs::read(&path).await {
            Ok(bytes) => {
                let complete = bytes
                    .iter()
                    .rposition(|b| *b == b'\n')
                    .map(|i| i + 1)
                    .unwrap_or(0);
                if complete < bytes.len() {
                    tracing::warn!(
                        path = %path.display(),
                        dropped_bytes = bytes.len() - complete,
                        "Truncating partial trailing audit record"
                    );
                    let file = OpenOptions::new().write(true).open(&path).await?;
                    file.set_len(complete as u64).await?;
                    file.sync_all().await?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            file: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Whether the cached handle still refers to the file at `path`. Another
    /// process may have swapped the log out from under it.
    async fn handle_is_current(&self, file: &File) -> bool {
        match (file.metadata().await, fs::metadata(&self.path).await) {
            (Ok(open), Ok(on_disk)) => same_file(&open, &on_disk),
            _ => false,
        }
    }

    async fn read_events(&self) -> Result<Vec<AuditEvent>, SinkError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(line = lineno + 1, error = %e, "Skipping unreadable audit record"),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let stale = match guard.as_ref() {
            Some(file) => !self.handle_is_current(file).await,
            None => false,
        };
        if stale {
            tracing::info!(path = %self.path.display(), "Audit log replaced on disk, reopening");
            *guard = None;
        }
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Err(SinkError::Closed);
        };

        let start = file.metadata().await?.len();
        let written: std::io::Result<()> = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // cut the torn record so the next one starts on a clean line
            if let Err(trim) = file.set_len(start).await {
                tracing::error!(error = %trim, "Failed to trim partial audit record");
            }
            *guard = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<AuditEvent>, SinkError> {
        let _guard = self.file.lock().await;
        self.read_events().await
    }

    async fn retain_since(&self, cutoff: DateTime<Utc>) -> Result<usize, SinkError> {
        let mut guard = self.file.lock().await;
        let events = self.read_events().await?;
        let total = events.len();
        let kept: Vec<&AuditEvent> = events.iter().filter(|e| e.timestamp >= cutoff).collect();
        let removed = total - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut body = Vec::new();
        for event in kept {
            serde_json::to_writer(&mut body, event)?;
            body.push(b'\n');
        }

        let temp = self.temp_path();
        let mut file = File::create(&temp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &self.path).await?;

        // the old handle points at the replaced inode
        *guard = None;
        tracing::info!(path = %self.path.display(), removed, "Audit retention sweep complete");
        Ok(removed)
    }
}

#[cfg(unix)]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// No cheap identity check; reopen before every append.
#[cfg(not(unix))]
fn same_file(_: &std::fs::Metadata, _: &std::fs::Metadata) -> bool {
    false
}

/// In-memory sink with a switch to simulate outages.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: StdMutex<Vec<AuditEvent>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `SinkError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("audit sink mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.check()?;
        self.events
            .lock()
            .expect("audit sink mutex poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<AuditEvent>, SinkError> {
        self.check()?;
        Ok(self.events.lock().expect("audit sink mutex poisoned").clone())
    }

    async fn retain_since(&self, cutoff: DateTime<Utc>) -> Result<usize, SinkError> {
        self.check()?;
        let mut events = self.events.lock().expect("audit sink mutex poisoned");
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok(before - events.len())
    }
}
