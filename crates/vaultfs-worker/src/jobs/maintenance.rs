//! Storage statistics and policy health checks.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use vaultfs_database::Store;
use vaultfs_entity::job::{Job, JobPayload};
use vaultfs_storage::PolicyRegistry;

use crate::executor::{JobExecutionError, JobHandler, decode_payload};

/// Handles the periodic reporting jobs.
#[derive(Debug)]
pub struct MaintenanceJobHandler {
    store: Store,
    registry: PolicyRegistry,
}

impl MaintenanceJobHandler {
    /// Create a new maintenance job handler.
    pub fn new(store: Store, registry: PolicyRegistry) -> Self {
        Self { store, registry }
    }

    async fn storage_stats(&self) -> Result<Value, JobExecutionError> {
        let owners = self.store.files.usage_by_owner().await?;
        let policies = self.store.files.usage_by_policy().await?;

        for usage in &owners {
            debug!(
                owner_id = %usage.owner_id,
                used_bytes = usage.used_bytes,
                files = usage.file_count,
                "Owner usage"
            );
        }
        for usage in &policies {
            debug!(
                policy_id = %usage.policy_id,
                entities = usage.entity_count,
                total_bytes = usage.total_bytes,
                "Policy usage"
            );
        }

        let total_bytes: i64 = policies.iter().map(|p| p.total_bytes).sum();
        info!(
            owners = owners.len(),
            policies = policies.len(),
            total_bytes,
            "Storage statistics aggregated"
        );
        Ok(serde_json::json!({ "owners": owners, "policies": policies }))
    }

    /// Unhealthy backends are reported, not retried; the next tick checks again.
    async fn policy_health(&self) -> Result<Value, JobExecutionError> {
        let results = self.registry.health_check_all().await;
        let mut unhealthy = Vec::new();
        for health in &results {
            if let Some(error) = &health.error {
                warn!(
                    policy_id = %health.policy_id,
                    policy = %health.name,
                    error = %error,
                    "Storage policy unhealthy"
                );
                unhealthy.push(health.policy_id);
            }
        }
        info!(
            checked = results.len(),
            unhealthy = unhealthy.len(),
            "Policy health check finished"
        );
        Ok(serde_json::json!({ "checked": results.len(), "unhealthy": unhealthy }))
    }
}

#[async_trait]
impl JobHandler for MaintenanceJobHandler {
    fn job_types(&self) -> &'static [&'static str] {
        &["storage_stats", "policy_health"]
    }

    async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let result = match decode_payload(job)? {
            JobPayload::StorageStats => self.storage_stats().await?,
            JobPayload::PolicyHealth => self.policy_health().await?,
            other => {
                return Err(JobExecutionError::Permanent(format!(
                    "Unknown maintenance task: '{}'",
                    other.job_type()
                )));
            }
        };
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;
    use vaultfs_core::config::{PolicyConfig, WorkerConfig};
    use vaultfs_database::repositories::{OwnerUsage, PolicyUsage};
    use vaultfs_entity::file::{CreateEntity, CreateFile, EntityKind, FileType};
    use vaultfs_entity::storage::StoragePolicy;
    use vaultfs_storage::UrlSigner;
    use vaultfs_storage::providers::LocalStorageProvider;

    use super::*;
    use crate::broker::Broker;

    fn local(name: &str, base: &str) -> PolicyConfig {
        PolicyConfig {
            name: name.into(),
            policy_type: "local".into(),
            server: String::new(),
            bucket: String::new(),
            region: String::new(),
            base_path: base.into(),
            access_key: String::new(),
            secret_key: String::new(),
            refresh_token: String::new(),
            is_private: true,
            source_auth: false,
            chunk_size: None,
            upload_mode: None,
            cdn_domain: None,
            max_size: 0,
            allowed_extensions: Vec::new(),
        }
    }

    fn handler(store: &Store) -> MaintenanceJobHandler {
        let signer = Arc::new(UrlSigner::new("k", "http://h").unwrap());
        let registry = PolicyRegistry::new(
            store.policies.clone(),
            vec![Arc::new(LocalStorageProvider::new(signer))],
        );
        MaintenanceJobHandler::new(store.clone(), registry)
    }

    async fn run(
        store: &Store,
        handler: &MaintenanceJobHandler,
        payload: JobPayload,
    ) -> Result<Option<Value>, JobExecutionError> {
        let broker = Broker::new(store.jobs.clone(), WorkerConfig::default());
        let id = broker.submit(&payload).await.unwrap();
        let job = broker.job(id).await.unwrap().unwrap();
        handler.execute(&job).await
    }

    /// A file of `size` bytes backed by one object on `policy_id`.
    async fn seed(store: &Store, owner_id: Uuid, name: &str, size: i64, policy_id: Uuid) {
        let root = store.files.ensure_root(owner_id).await.unwrap();
        let mut file = CreateFile {
            owner_id,
            parent_id: root.id,
            name: name.into(),
            file_type: FileType::File,
        }
        .into_file();
        file.size = size;
        let file = store.files.insert(file).await.unwrap();
        store
            .files
            .attach_thumbnail(
                file.id,
                CreateEntity {
                    kind: EntityKind::Thumbnail,
                    policy_id,
                    source: format!("{name}.thumb"),
                    size,
                    mime_type: None,
                    checksum: None,
                    created_by: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_storage_stats_aggregates_per_owner_and_policy() {
        let store = Store::memory();
        let handler = handler(&store);
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (hot, cold) = (Uuid::new_v4(), Uuid::new_v4());
        seed(&store, alice, "a.bin", 10, hot).await;
        seed(&store, alice, "b.bin", 5, cold).await;
        seed(&store, bob, "c.bin", 7, hot).await;

        let value = run(&store, &handler, JobPayload::StorageStats)
            .await
            .unwrap()
            .unwrap();
        let owners: Vec<OwnerUsage> = serde_json::from_value(value["owners"].clone()).unwrap();
        let policies: Vec<PolicyUsage> = serde_json::from_value(value["policies"].clone()).unwrap();

        let of_owner = |id| owners.iter().find(|u| u.owner_id == id).unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!((of_owner(alice).used_bytes, of_owner(alice).file_count), (15, 2));
        assert_eq!((of_owner(bob).used_bytes, of_owner(bob).file_count), (7, 1));

        let of_policy = |id| policies.iter().find(|u| u.policy_id == id).unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!((of_policy(hot).total_bytes, of_policy(hot).entity_count), (17, 2));
        assert_eq!((of_policy(cold).total_bytes, of_policy(cold).entity_count), (5, 1));
    }

    #[tokio::test]
    async fn test_policy_health_reports_unreachable_backend() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let store = Store::memory();
        let handler = handler(&store);
        let healthy = local("main", &dir.path().join("data").display().to_string());
        let broken = local("broken", &blocker.join("data").display().to_string());
        handler
            .registry
            .upsert(StoragePolicy::from_config(&healthy).unwrap())
            .await
            .unwrap();
        let broken = handler
            .registry
            .upsert(StoragePolicy::from_config(&broken).unwrap())
            .await
            .unwrap();

        let value = run(&store, &handler, JobPayload::PolicyHealth)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["checked"], 2);
        assert_eq!(value["unhealthy"], serde_json::json!([broken.id]));
    }

    #[tokio::test]
    async fn test_foreign_payload_is_permanent_failure() {
        let store = Store::memory();
        let handler = handler(&store);
        let err = run(&store, &handler, JobPayload::TrashPurge).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
