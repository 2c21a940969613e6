//! Virtual path resolution over the node tree and its mount points.

use std::sync::Arc;

use rand::distr::{Alphanumeric, SampleString};
use uuid::Uuid;

use vaultfs_core::types::VfsPath;
use vaultfs_entity::file::File;
use vaultfs_entity::storage::StoragePolicy;

/// Result of walking a virtual path.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// The normalized path.
    pub path: VfsPath,
    /// Owner whose tree was walked.
    pub owner_id: Uuid,
    /// Existing nodes from the root down, `nodes[0]` being the root.
    pub nodes: Vec<File>,
    /// Path segments below the deepest existing node.
    pub missing: Vec<String>,
    /// Policy serving the deepest mount covering the path.
    pub policy: Arc<StoragePolicy>,
    /// Path relative to the mount, prefixed by the owner ID when the
    /// default policy applies.
    pub relative: String,
}

impl ResolvedPath {
    /// The node at the path, if every segment exists.
    pub fn node(&self) -> Option<&File> {
        if self.missing.is_empty() {
            self.nodes.last()
        } else {
            None
        }
    }

    /// Deepest existing node.
    pub fn deepest(&self) -> &File {
        // `walk` always pushes the root.
        &self.nodes[self.nodes.len() - 1]
    }

    /// Physical key of the path itself under its policy.
    pub fn physical_key(&self) -> String {
        self.policy.physical_key(&self.relative)
    }

    /// Physical key of an ancestor of the path, `up` levels above it.
    pub fn ancestor_key(&self, up: usize) -> String {
        let parts: Vec<&str> = self.relative.split('/').filter(|s| !s.is_empty()).collect();
        let keep = parts.len().saturating_sub(up);
        self.policy.physical_key(&parts[..keep].join("/"))
    }

    /// A fresh, collision-free physical key for a new object named after
    /// the last path segment. Entities are immutable, so every write gets
    /// its own key.
    pub fn object_key(&self) -> String {
        let salt = Alphanumeric.sample_string(&mut rand::rng(), 8);
        let name = self.path.name().unwrap_or("object");
        let dir = self
            .relative
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");
        let file = format!("{salt}_{name}");
        if dir.is_empty() {
            self.policy.physical_key(&file)
        } else {
            self.policy.physical_key(&format!("{dir}/{file}"))
        }
    }
}

/// Relative path under a policy.
///
/// Below a mount the path is taken from the mount node; under the default
/// policy it is scoped by owner so trees of different users never share keys.
pub(crate) fn relative_path(owner_id: Uuid, mounted: bool, segments: &[&str]) -> String {
    let joined = segments.join("/");
    if mounted {
        joined
    } else if joined.is_empty() {
        owner_id.to_string()
    } else {
        format!("{owner_id}/{joined}")
    }
}
