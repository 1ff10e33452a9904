//! Event Log Store: the durable, append-only record of everything a room
//! supervisor observed, and the reader the report pipeline (and the
//! `regenerate` CLI path) replays it from.
//!
//! Grounded on the original Go project's `internal/logs/storage.go` and
//! `internal/logs/item.go` (one JSON object per line, one file per room
//! lifetime, an in-memory mirror alongside the file, a closed-and-empty
//! store deletes its file), cast in the teacher's async-file idiom
//! (`tokio::fs`, `anyhow::Context`, a mutex around the shared writer state
//! the way `crates/server/src/session.rs` guards its connection map).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use janvlog_protocol::{Event, RoomId};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

struct Inner {
    file: File,
    records: Vec<Event>,
}

/// An open, append-only raw log for one room's lifetime. Rotated (closed
/// and replaced) by the room supervisor every time the participant set
/// empties out.
pub struct LogStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl LogStore {
    /// Opens a fresh raw log under `<root>/raw/room-<room_id>/<unix-sec>.jsonl`,
    /// creating every parent directory needed. Each open gets a new
    /// timestamped filename so two rotations of the same room never
    /// collide.
    pub async fn open(root: &Path, room_id: RoomId) -> Result<Self> {
        let dir = root.join("raw").join(format!("room-{room_id}"));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating raw log directory {}", dir.display()))?;

        let path = dir.join(format!("{}.jsonl", Utc::now().timestamp()));
        let file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .await
            .with_context(|| format!("creating raw log {}", path.display()))?;

        debug!(path = %path.display(), "opened raw event log");
        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                records: Vec::new(),
            }),
        })
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.path
    }

    /// Appends events as JSON lines and keeps the in-memory mirror in
    /// sync. Serialized under a mutex: the track-close rename and the
    /// poller's own emissions both append here. Every `Event` carries its
    /// own `Timestamp` already (callers stamp it with `Utc::now()` at the
    /// moment they observe the change, matching capture-time order).
    pub async fn add(&self, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        for event in &events {
            let mut line = serde_json::to_vec(event).context("serializing event")?;
            line.push(b'\n');
            inner
                .file
                .write_all(&line)
                .await
                .context("writing event to raw log")?;
        }
        inner.file.flush().await.context("flushing raw log")?;
        inner.records.extend(events);
        Ok(())
    }

    /// A snapshot of every record added so far.
    pub async fn items(&self) -> Vec<Event> {
        self.inner.lock().await.records.clone()
    }

    /// Closes the file. If nothing was ever added, removes it: an empty
    /// log is not retained on disk.
    pub async fn close(self) -> Result<()> {
        let is_empty = {
            let inner = self.inner.lock().await;
            inner.records.is_empty()
        };
        drop(self.inner);
        if is_empty {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => debug!(path = %self.path.display(), "removed empty raw log"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context(format!("removing empty raw log {}", self.path.display())),
            }
        }
        Ok(())
    }
}

/// Replays every event recorded in a raw log file, in the order it was
/// written. Used both by the report pipeline right after a room closes and
/// by the `regenerate` CLI path against an arbitrary earlier log.
pub async fn load_events(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("opening raw log {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut events = Vec::new();
    while let Some(line) = lines.next_line().await.context("reading raw log")? {
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)
            .with_context(|| format!("parsing raw log line: {line}"))?;
        events.push(event);
    }
    Ok(events)
}
