use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

/// A single captured file state, taken before a write/execute tool call
/// touches it. `previous_content` is `None` when the file did not exist
/// (undo deletes it) or when it could not be read (undo is then a no-op for
/// that entry, per the unrecoverable-read-failure rule). §4.4.
struct Checkpoint {
    path: PathBuf,
    previous_content: Option<Vec<u8>>,
}

/// Bounded LIFO undo stack over file snapshots. §4.4.
///
/// Capacity defaults to 50 entries (`AgentConfig::checkpoint_cap`); pushing
/// past capacity drops the oldest entry.
pub struct Checkpointer {
    cap: usize,
    stack: Mutex<Vec<Checkpoint>>,
}

impl Checkpointer {
    pub fn new(cap: usize) -> Self {
        Self { cap, stack: Mutex::new(Vec::new()) }
    }

    /// Snapshot `path`'s current contents before it is mutated. If the file
    /// is unreadable for any reason other than not existing, the snapshot is
    /// still pushed with `previous_content: None` so `undo()` stays
    /// consistent — it just cannot restore prior bytes in that case.
    pub fn snapshot(&self, path: &Path) {
        let previous_content = match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint snapshot could not read file; undo will be a no-op for this entry");
                None
            }
        };
        let mut stack = self.stack.lock().unwrap();
        stack.push(Checkpoint { path: path.to_path_buf(), previous_content });
        if stack.len() > self.cap {
            stack.remove(0);
        }
    }

    /// Pop the most recent checkpoint and restore the file to its prior
    /// state, deleting it if it did not previously exist. Deleting a file
    /// that is already missing is treated as success (idempotent). Returns
    /// `None` if the stack is empty.
    pub fn undo(&self) -> Option<PathBuf> {
        let checkpoint = self.stack.lock().unwrap().pop()?;
        match &checkpoint.previous_content {
            Some(bytes) => {
                if let Err(e) = std::fs::write(&checkpoint.path, bytes) {
                    warn!(path = %checkpoint.path.display(), error = %e, "undo failed to restore file");
                }
            }
            None => match std::fs::remove_file(&checkpoint.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %checkpoint.path.display(), error = %e, "undo failed to delete file"),
            },
        }
        Some(checkpoint.path)
    }

    pub fn len(&self) -> usize {
        self.stack.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
