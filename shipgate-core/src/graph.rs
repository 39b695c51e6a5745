//! Feature status graph.
//!
//! The graph document is keyed by feature, each block carrying a `status`
//! scalar among sibling fields owned by surrounding tooling. The gate only
//! ever reads or rewrites that one scalar, through the line patcher, so the
//! rest of the document survives byte-for-byte.

use crate::config::GateConfig;
use crate::patch;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Reads and rewrites the status field of one feature block.
pub struct StatusGraph {
    path: PathBuf,
}

impl StatusGraph {
    /// Create a graph over the configured document location.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            path: config.graph_path(),
        }
    }

    /// Current status of the feature, if the document and block exist.
    pub fn get_status(&self, feature: &str) -> Option<String> {
        let content = fs::read_to_string(&self.path).ok()?;
        patch::get_block_field(&content, feature, "status")
    }

    /// Rewrite the feature's status in place.
    ///
    /// Returns false (no-op) when the document, block, or field cannot be
    /// located, or when the status already holds the requested value.
    pub fn set_status(&self, feature: &str, status: &str) -> bool {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return false,
        };
        match patch::set_block_field(&content, feature, "status", status) {
            Some(updated) if updated != content => match fs::write(&self.path, updated) {
                Ok(()) => true,
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "failed to write status graph");
                    false
                }
            },
            _ => false,
        }
    }
}
