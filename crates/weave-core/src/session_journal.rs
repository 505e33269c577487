use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use weave_model::Message;

/// One append-only entry in a session's NDJSON journal: a full conversation
/// snapshot, not a single message. §4.10, §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalRecord {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// Append-only NDJSON log of session activity. §4.10.
///
/// Each line is one JSON-encoded [`JournalRecord`]. A missing or empty file
/// is not an error — both read as zero records.
pub struct SessionJournal {
    path: PathBuf,
}

impl SessionJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &JournalRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("creating journal directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening journal at {}", self.path.display()))?;
        let line = serde_json::to_string(record).context("serializing journal record")?;
        writeln!(file, "{line}").context("appending journal record")?;
        Ok(())
    }

    pub fn all(&self) -> anyhow::Result<Vec<JournalRecord>> {
        read_records(&self.path)
    }

    pub fn last(&self) -> anyhow::Result<Option<JournalRecord>> {
        Ok(self.all()?.pop())
    }

    /// The most recently appended record with the given `id` — later
    /// appends of the same id supersede earlier ones.
    pub fn get(&self, id: &str) -> anyhow::Result<Option<JournalRecord>> {
        Ok(self.all()?.into_iter().filter(|r| r.id == id).last())
    }
}

/// §6: "readers tolerate partial last lines by skipping them" — a malformed
/// line (most commonly a truncated final write) is logged and dropped rather
/// than failing the whole read.
fn read_records(path: &Path) -> anyhow::Result<Vec<JournalRecord>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading journal at {}", path.display())),
    };
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<JournalRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "skipping unparsable journal line");
                None
            }
        })
        .collect())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
