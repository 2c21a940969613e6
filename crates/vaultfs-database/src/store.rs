//! The repository bundle handed to services.

use std::sync::Arc;

use tracing::info;

use vaultfs_core::config::{DatabaseBackend, DatabaseConfig};
use vaultfs_core::result::AppResult;

use crate::connection::DatabasePool;
use crate::memory::MemoryStore;
use crate::migration::run_migrations;
use crate::postgres::PgStore;
use crate::repositories::{
    FileRepository, JobRepository, LinkRepository, PolicyRepository, SessionRepository,
    UserRepository,
};

/// One handle per repository, all backed by the same store.
#[derive(Debug, Clone)]
pub struct Store {
    /// Files, entities and versions.
    pub files: Arc<dyn FileRepository>,
    /// Upload sessions.
    pub sessions: Arc<dyn SessionRepository>,
    /// Storage policies.
    pub policies: Arc<dyn PolicyRepository>,
    /// Direct links.
    pub links: Arc<dyn LinkRepository>,
    /// Broker jobs.
    pub jobs: Arc<dyn JobRepository>,
    /// Users and groups.
    pub users: Arc<dyn UserRepository>,
}

impl Store {
    /// Bundle a single implementation of every repository.
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: FileRepository
            + SessionRepository
            + PolicyRepository
            + LinkRepository
            + JobRepository
            + UserRepository,
    {
        Self {
            files: backend.clone(),
            sessions: backend.clone(),
            policies: backend.clone(),
            links: backend.clone(),
            jobs: backend.clone(),
            users: backend,
        }
    }

    /// A fresh in-memory store.
    pub fn memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }

    /// Open the store selected by configuration, running migrations for PostgreSQL.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        match config.backend {
            DatabaseBackend::Memory => {
                info!("Using in-memory metadata store");
                Ok(Self::memory())
            }
            DatabaseBackend::Postgres => {
                let pool = DatabasePool::connect(config).await?;
                run_migrations(pool.pool()).await?;
                Ok(Self::from_backend(Arc::new(PgStore::new(pool.into_pool()))))
            }
        }
    }
}
