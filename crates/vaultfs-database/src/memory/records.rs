//! Policy, link, job and user repositories over the in-memory state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_entity::job::{CreateJob, Job, JobState};
use vaultfs_entity::link::DirectLink;
use vaultfs_entity::storage::StoragePolicy;
use vaultfs_entity::user::{Group, User};

use super::MemoryStore;
use crate::repositories::{JobRepository, LinkRepository, PolicyRepository, UserRepository};

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn list(&self) -> AppResult<Vec<StoragePolicy>> {
        let mut policies: Vec<StoragePolicy> =
            self.state.read().await.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(policies)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<StoragePolicy>> {
        Ok(self.state.read().await.policies.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> AppResult<Option<StoragePolicy>> {
        Ok(self
            .state
            .read()
            .await
            .policies
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn upsert(&self, policy: StoragePolicy) -> AppResult<StoragePolicy> {
        let mut state = self.state.write().await;
        if state
            .policies
            .values()
            .any(|p| p.name == policy.name && p.id != policy.id)
        {
            return Err(AppError::conflict(format!(
                "Policy '{}' already exists",
                policy.name
            )));
        }
        state.policies.insert(policy.id, policy.clone());
        Ok(policy)
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        self.state
            .write()
            .await
            .policies
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(format!("Policy {id} not found")))
    }
}

#[async_trait]
impl LinkRepository for MemoryStore {
    async fn find_by_file(&self, file_id: Uuid) -> AppResult<Option<DirectLink>> {
        Ok(self
            .state
            .read()
            .await
            .links
            .values()
            .find(|l| l.file_id == file_id)
            .cloned())
    }

    async fn find_by_public_id(&self, public_id: &str) -> AppResult<Option<DirectLink>> {
        Ok(self
            .state
            .read()
            .await
            .links
            .values()
            .find(|l| l.public_id == public_id)
            .cloned())
    }

    async fn insert_or_get(&self, link: DirectLink) -> AppResult<DirectLink> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.links.values().find(|l| l.file_id == link.file_id) {
            return Ok(existing.clone());
        }
        state.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn increment_downloads(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        if let Some(link) = state.links.get_mut(&id) {
            link.downloads += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn insert(&self, job: CreateJob) -> AppResult<Job> {
        let job = job.into_job();
        self.state.write().await.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> AppResult<Option<Job>> {
        let mut state = self.state.write().await;
        let next = state
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state.is_runnable() && j.next_run_at <= now)
            .min_by_key(|j| (j.next_run_at, j.created_at))
            .map(|j| j.id);
        let Some(id) = next else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::internal("Claimed job vanished"))?;
        job.state = JobState::Running;
        job.attempts += 1;
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn next_due(&self, queue: &str) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self
            .state
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state.is_runnable())
            .map(|j| j.next_run_at)
            .min())
    }

    async fn mark_succeeded(&self, id: Uuid) -> AppResult<()> {
        self.update_job(id, |job, now| {
            job.state = JobState::Succeeded;
            job.last_error = None;
            job.finished_at = Some(now);
        })
        .await
    }

    async fn mark_retryable(
        &self,
        id: Uuid,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.update_job(id, |job, _| {
            job.state = JobState::FailedRetryable;
            job.last_error = Some(error.to_string());
            job.next_run_at = next_run_at;
        })
        .await
    }

    async fn mark_terminal(&self, id: Uuid, error: &str) -> AppResult<()> {
        self.update_job(id, |job, now| {
            job.state = JobState::FailedTerminal;
            job.last_error = Some(error.to_string());
            job.finished_at = Some(now);
        })
        .await
    }

    async fn list_by_state(&self, state: JobState) -> AppResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(jobs)
    }

    async fn recover_running(&self) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut recovered = 0;
        for job in state.jobs.values_mut().filter(|j| j.state == JobState::Running) {
            job.state = JobState::FailedRetryable;
            job.last_error = Some("interrupted by shutdown".to_string());
            job.next_run_at = now;
            job.updated_at = now;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn delete_succeeded_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, j| {
            !(j.state == JobState::Succeeded && j.finished_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - state.jobs.len()) as u64)
    }
}

impl MemoryStore {
    async fn update_job(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut Job, DateTime<Utc>) + Send,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        let now = Utc::now();
        apply(job, now);
        job.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_group(&self, id: Uuid) -> AppResult<Option<Group>> {
        Ok(self.state.read().await.groups.get(&id).cloned())
    }

    async fn upsert_user(&self, user: User) -> AppResult<()> {
        self.state.write().await.users.insert(user.id, user);
        Ok(())
    }

    async fn upsert_group(&self, group: Group) -> AppResult<()> {
        self.state.write().await.groups.insert(group.id, group);
        Ok(())
    }
}
