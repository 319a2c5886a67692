//! Append-only JSONL session files for local mode.
//!
//! Each session gets `<sessionId>.jsonl` under the state directory.
//! When the live file crosses the rotation threshold (10 MB) it is
//! renamed to `<sessionId>.<n>.jsonl` and a fresh file begins; readers
//! stitch rotated segments back in order.

use std::path::{Path, PathBuf};

use ah_domain::error::{Error, Result};
use ah_domain::message::ChatMessage;

const ROTATE_BYTES: u64 = 10 * 1024 * 1024;

pub struct LocalSessionStore {
    base_dir: PathBuf,
    rotate_bytes: u64,
}

impl LocalSessionStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            rotate_bytes: ROTATE_BYTES,
        })
    }

    /// Lowered rotation threshold, for tests.
    pub fn with_rotate_bytes(mut self, bytes: u64) -> Self {
        self.rotate_bytes = bytes;
        self
    }

    fn live_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    fn segment_path(&self, session_id: &str, n: u32) -> PathBuf {
        self.base_dir.join(format!("{session_id}.{n}.jsonl"))
    }

    /// Rotated segment indices for a session, ascending.
    fn segments(&self, session_id: &str) -> Vec<u32> {
        let mut out = Vec::new();
        let mut n = 1;
        while self.segment_path(session_id, n).exists() {
            out.push(n);
            n += 1;
        }
        out
    }

    fn rotate_if_needed(&self, session_id: &str) -> Result<()> {
        let live = self.live_path(session_id);
        let Ok(meta) = std::fs::metadata(&live) else {
            return Ok(());
        };
        if meta.len() < self.rotate_bytes {
            return Ok(());
        }
        let next = self.segments(session_id).last().copied().unwrap_or(0) + 1;
        let target = self.segment_path(session_id, next);
        std::fs::rename(&live, &target).map_err(Error::Io)?;
        tracing::info!(
            session_id = session_id,
            segment = next,
            "rotated session log"
        );
        Ok(())
    }

    fn read_file(path: &Path, out: &mut Vec<ChatMessage>) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(msg) => out.push(msg),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping malformed session log line"
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::SessionStore for LocalSessionStore {
    async fn append(&self, message: &ChatMessage) -> Result<()> {
        self.rotate_if_needed(&message.session_id)?;

        let json = serde_json::to_string(message)
            .map_err(|e| Error::Other(format!("serializing chat message: {e}")))?;

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path(&message.session_id))
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let mut out = Vec::new();
        for n in self.segments(session_id) {
            Self::read_file(&self.segment_path(session_id, n), &mut out)?;
        }
        Self::read_file(&self.live_path(session_id), &mut out)?;
        Ok(out)
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut ids = std::collections::BTreeSet::new();
        let entries = std::fs::read_dir(&self.base_dir).map_err(Error::Io)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Strip a rotation suffix: "<id>.3" -> "<id>".
            let id = match stem.rsplit_once('.') {
                Some((head, tail)) if tail.chars().all(|c| c.is_ascii_digit()) => head,
                _ => stem,
            };
            ids.insert(id.to_string());
        }
        Ok(ids.into_iter().collect())
    }
}
