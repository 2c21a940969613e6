//! Path locker: serialises structural mutations per virtual path.
//!
//! Entries are keyed by canonical path strings, not node IDs, because a
//! mount point can remap a subtree to another backend. Multi-path callers
//! lock in lexicographic order so two moves that target each other's
//! paths cannot deadlock. Structural mutations also lock the directory
//! whose children they change, so trashing a directory excludes moves,
//! copies and creates that land in it. Unused entries are dropped when the
//! last guard holding them is released.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_core::types::VfsPath;

use crate::context::RequestContext;

/// Registry of per-path mutexes.
#[derive(Debug, Default)]
pub struct PathLocker {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds one or more path locks until dropped.
#[derive(Debug)]
pub struct PathGuard {
    locker: Arc<PathLocker>,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl PathLocker {
    /// Create an empty locker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lock key for a path in one owner's tree.
    pub fn key(owner_id: Uuid, path: &VfsPath) -> String {
        format!("{owner_id}:{path}")
    }

    /// Acquire every key, in sorted order, waiting until each is free or
    /// the context is cancelled.
    pub async fn acquire(
        self: &Arc<Self>,
        ctx: &RequestContext,
        keys: impl IntoIterator<Item = String>,
    ) -> AppResult<PathGuard> {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guard = PathGuard {
            locker: self.clone(),
            keys: Vec::with_capacity(keys.len()),
            guards: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let mutex = self.locks.entry(key.clone()).or_default().clone();
            // Track the key first so a cancelled wait still collects the entry.
            guard.keys.push(key);
            let held = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Err(AppError::cancelled("Cancelled while waiting for a path lock"));
                }
                held = mutex.lock_owned() => held,
            };
            guard.guards.push(held);
        }
        debug!(keys = ?guard.keys, "Path locks acquired");
        Ok(guard)
    }

    /// Lock paths in one owner's tree.
    pub async fn lock_paths(
        self: &Arc<Self>,
        ctx: &RequestContext,
        owner_id: Uuid,
        paths: &[&VfsPath],
    ) -> AppResult<PathGuard> {
        self.acquire(ctx, paths.iter().map(|p| Self::key(owner_id, p)))
            .await
    }

    /// Lock paths together with their parent directories.
    pub async fn lock_with_parents(
        self: &Arc<Self>,
        ctx: &RequestContext,
        owner_id: Uuid,
        paths: &[&VfsPath],
    ) -> AppResult<PathGuard> {
        let keys = paths.iter().flat_map(|p| {
            std::iter::once(Self::key(owner_id, p))
                .chain(p.parent().map(|parent| Self::key(owner_id, &parent)))
        });
        self.acquire(ctx, keys.collect::<Vec<_>>()).await
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no entries are live.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl PathGuard {
    /// Keys held by this guard.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            self.locker
                .locks
                .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
