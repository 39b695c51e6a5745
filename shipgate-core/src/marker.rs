//! Chunk-completion marker: a cross-process dead-drop.
//!
//! An implementation agent writes the marker when it believes a chunk is
//! finished; the gate consumes it. At most one live marker exists at a time,
//! and a marker older than the staleness threshold is deleted on observation
//! so a crashed or abandoned chunk cannot trigger validation arbitrarily far
//! in the future.

use crate::config::GateConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Completion claim written by an implementation agent.
///
/// All fields are required; a marker missing any of them is corrupt and is
/// discarded without raising.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Chunk identifier (e.g. "1A").
    pub chunk: String,
    /// Owning feature name.
    pub feature: String,
    /// Workflow phase the chunk belongs to.
    pub phase: String,
    /// What the chunk did, for the commit message and progress log.
    pub description: String,
    /// ISO-8601 creation time.
    pub timestamp: String,
}

impl CompletionMarker {
    /// Age of the marker relative to `now`, or None when the timestamp does
    /// not parse.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let created = DateTime::parse_from_rfc3339(&self.timestamp).ok()?;
        Some(now.signed_duration_since(created.with_timezone(&Utc)))
    }
}

/// Reads and deletes the completion marker file.
pub struct MarkerStore {
    path: PathBuf,
    max_age: Duration,
}

impl MarkerStore {
    /// Create a store for the configured marker location.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            path: config.marker_path(),
            max_age: config.marker_max_age,
        }
    }

    /// Read the marker, if one is live.
    ///
    /// Returns None when the file is absent, corrupt, or stale. A corrupt or
    /// stale marker is deleted as a side effect of being observed, so a
    /// second read also returns None without error.
    pub fn read(&self) -> Option<CompletionMarker> {
        let raw = fs::read_to_string(&self.path).ok()?;

        let marker: CompletionMarker = match serde_json::from_str(&raw) {
            Ok(marker) => marker,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "discarding corrupt marker");
                self.delete();
                return None;
            }
        };

        // An unparseable timestamp is tolerated; staleness only applies when
        // the age is known.
        if let Some(age) = marker.age(Utc::now()) {
            if age.num_seconds() > self.max_age.as_secs() as i64 {
                debug!(chunk = %marker.chunk, age_secs = age.num_seconds(), "deleting stale marker");
                self.delete();
                return None;
            }
        }

        Some(marker)
    }

    /// Delete the marker file. Returns false only on an IO error; a missing
    /// file counts as deleted.
    pub fn delete(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to delete marker");
                false
            }
        }
    }
}
