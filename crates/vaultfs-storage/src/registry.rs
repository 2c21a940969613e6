//! Storage policy registry: routes a policy ID to its row and provider.
//!
//! Read-mostly. Lookups take a shared lock on the in-memory cache; admin
//! edits go through [`PolicyRegistry::upsert`], which writes the store
//! first and then swaps the cached row under the exclusive lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use vaultfs_core::config::StorageConfig;
use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_database::repositories::PolicyRepository;
use vaultfs_entity::storage::{PolicyType, StoragePolicy};

use crate::provider::StorageProvider;

/// Result of probing one policy's backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyHealth {
    /// Policy ID.
    pub policy_id: Uuid,
    /// Policy name.
    pub name: String,
    /// Failure description, `None` when healthy.
    pub error: Option<String>,
}

impl PolicyHealth {
    /// Whether the probe succeeded.
    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// Central registry of storage policies and the providers serving them.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    /// Durable policy rows.
    repository: Arc<dyn PolicyRepository>,
    /// One provider per backend type.
    providers: Arc<HashMap<PolicyType, Arc<dyn StorageProvider>>>,
    /// Cached policy rows by ID.
    policies: Arc<RwLock<HashMap<Uuid, Arc<StoragePolicy>>>>,
    /// The policy used where no mount point applies.
    default_id: Arc<RwLock<Option<Uuid>>>,
}

impl PolicyRegistry {
    /// Create a registry over `repository` served by `providers`.
    pub fn new(
        repository: Arc<dyn PolicyRepository>,
        providers: Vec<Arc<dyn StorageProvider>>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.provider_type(), p))
            .collect();
        Self {
            repository,
            providers: Arc::new(providers),
            policies: Arc::new(RwLock::new(HashMap::new())),
            default_id: Arc::new(RwLock::new(None)),
        }
    }

    /// Create missing bootstrap policies, load every row and pick the default.
    pub async fn bootstrap(&self, config: &StorageConfig) -> AppResult<()> {
        for entry in &config.policies {
            if self.repository.find_by_name(&entry.name).await?.is_none() {
                let policy = StoragePolicy::from_config(entry)?;
                self.ensure_provider(policy.policy_type)?;
                self.repository.upsert(policy).await?;
                info!(policy = %entry.name, policy_type = %entry.policy_type, "Created storage policy");
            }
        }

        let count = self.load().await?;
        let default = self
            .repository
            .find_by_name(&config.default_policy)
            .await?
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "Default storage policy '{}' does not exist",
                    config.default_policy
                ))
            })?;
        *self.default_id.write().await = Some(default.id);
        info!(policies = count, default = %default.name, "Storage policy registry ready");
        Ok(())
    }

    /// Reload every policy from the store.
    pub async fn load(&self) -> AppResult<usize> {
        let rows = self.repository.list().await?;
        let mut policies = self.policies.write().await;
        policies.clear();
        for row in rows {
            if !self.providers.contains_key(&row.policy_type) {
                warn!(policy = %row.name, policy_type = %row.policy_type, "No provider for policy type");
            }
            policies.insert(row.id, Arc::new(row));
        }
        Ok(policies.len())
    }

    fn ensure_provider(&self, policy_type: PolicyType) -> AppResult<()> {
        if self.providers.contains_key(&policy_type) {
            Ok(())
        } else {
            Err(AppError::configuration(format!(
                "No storage provider registered for type '{policy_type}'"
            )))
        }
    }

    /// Get a policy by ID.
    pub async fn policy(&self, id: Uuid) -> AppResult<Arc<StoragePolicy>> {
        if let Some(policy) = self.policies.read().await.get(&id) {
            return Ok(policy.clone());
        }
        let row = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Storage policy {id} not found")))?;
        let row = Arc::new(row);
        self.policies.write().await.insert(id, row.clone());
        Ok(row)
    }

    /// The provider serving `policy`.
    pub fn provider(&self, policy: &StoragePolicy) -> AppResult<Arc<dyn StorageProvider>> {
        self.providers
            .get(&policy.policy_type)
            .cloned()
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "No storage provider registered for type '{}'",
                    policy.policy_type
                ))
            })
    }

    /// Policy row and provider for `id`.
    pub async fn resolve(
        &self,
        id: Uuid,
    ) -> AppResult<(Arc<StoragePolicy>, Arc<dyn StorageProvider>)> {
        let policy = self.policy(id).await?;
        let provider = self.provider(&policy)?;
        Ok((policy, provider))
    }

    /// The default policy.
    pub async fn default_policy(&self) -> AppResult<Arc<StoragePolicy>> {
        let id = self
            .default_id
            .read()
            .await
            .ok_or_else(|| AppError::configuration("No default storage policy configured"))?;
        self.policy(id).await
    }

    /// Set the default policy.
    pub async fn set_default(&self, id: Uuid) -> AppResult<()> {
        self.policy(id).await?;
        *self.default_id.write().await = Some(id);
        Ok(())
    }

    /// All cached policies, by name.
    pub async fn list(&self) -> Vec<Arc<StoragePolicy>> {
        let mut all: Vec<_> = self.policies.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Policies bound to a directory node, keyed by that node.
    pub async fn mounts(&self) -> HashMap<Uuid, Arc<StoragePolicy>> {
        self.policies
            .read()
            .await
            .values()
            .filter_map(|p| p.mount_node_id.map(|node| (node, p.clone())))
            .collect()
    }

    /// Insert or replace a policy.
    pub async fn upsert(&self, mut policy: StoragePolicy) -> AppResult<Arc<StoragePolicy>> {
        self.ensure_provider(policy.policy_type)?;
        let mut policies = self.policies.write().await;
        if let Some(node) = policy.mount_node_id {
            if policies
                .values()
                .any(|p| p.id != policy.id && p.mount_node_id == Some(node))
            {
                warn!(policy = %policy.name, node_id = %node, "Mount point already taken");
                return Err(AppError::conflict(format!(
                    "Directory {node} already has a storage policy mounted"
                )));
            }
        }

        policy.updated_at = Utc::now();
        let saved = Arc::new(self.repository.upsert(policy).await?);
        policies.insert(saved.id, saved.clone());
        info!(policy_id = %saved.id, policy = %saved.name, "Storage policy updated");
        Ok(saved)
    }

    /// Bind a policy to a directory node, or unbind it with `None`.
    pub async fn mount(&self, id: Uuid, node_id: Option<Uuid>) -> AppResult<Arc<StoragePolicy>> {
        let mut policy = (*self.policy(id).await?).clone();
        policy.mount_node_id = node_id;
        self.upsert(policy).await
    }

    /// Remove a policy. The default policy cannot be removed.
    pub async fn remove(&self, id: Uuid) -> AppResult<()> {
        if *self.default_id.read().await == Some(id) {
            return Err(AppError::invalid_operation(
                "The default storage policy cannot be removed",
            ));
        }
        self.repository.delete(id).await?;
        self.policies.write().await.remove(&id);
        info!(policy_id = %id, "Storage policy removed");
        Ok(())
    }

    /// Probe every policy's backend.
    pub async fn health_check_all(&self) -> Vec<PolicyHealth> {
        let mut results = Vec::new();
        for policy in self.list().await {
            let error = match self.provider(&policy) {
                Ok(provider) => provider
                    .health_check(&policy)
                    .await
                    .err()
                    .map(|e| e.to_string()),
                Err(e) => Some(e.to_string()),
            };
            results.push(PolicyHealth {
                policy_id: policy.id,
                name: policy.name.clone(),
                error,
            });
        }
        results
    }
}
