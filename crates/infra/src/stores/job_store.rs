//! Scheduled job storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use hearth_chains::{ScheduledJob, ScheduledJobId};
use hearth_core::FamilyId;

use super::StoreError;

/// Scheduled job store abstraction.
pub trait ScheduledJobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: ScheduledJob) -> Result<ScheduledJobId, StoreError>;

    /// Claim jobs due at `now`, flipping each to `Fired` in the same call so
    /// a second poll cannot claim them again. Due jobs come back earliest
    /// `fire_at` first.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledJob>, StoreError>;

    /// Get a job by ID.
    fn get(
        &self,
        family_id: FamilyId,
        job_id: ScheduledJobId,
    ) -> Result<Option<ScheduledJob>, StoreError>;

    /// Cancel a pending job. Fired and cancelled jobs are immutable.
    fn cancel(&self, family_id: FamilyId, job_id: ScheduledJobId) -> Result<(), StoreError>;

    /// All of a family's jobs, earliest `fire_at` first.
    fn list_for_family(&self, family_id: FamilyId) -> Result<Vec<ScheduledJob>, StoreError>;
}

/// In-memory scheduled job store for tests/dev.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<ScheduledJobId, ScheduledJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduledJobStore for InMemoryJobStore {
    fn enqueue(&self, job: ScheduledJob) -> Result<ScheduledJobId, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::poisoned())?;

        let mut due: Vec<_> = jobs
            .values()
            .filter(|job| job.is_due(now))
            .map(|job| job.id)
            .collect();

        due.sort_by_key(|id| {
            jobs.get(id)
                .map(|job| (job.fire_at, job.created_at))
                .unwrap_or((now, now))
        });
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(job) = jobs.get_mut(&id) {
                job.mark_fired(now);
                claimed.push(job.clone());
            }
        }

        Ok(claimed)
    }

    fn get(
        &self,
        family_id: FamilyId,
        job_id: ScheduledJobId,
    ) -> Result<Option<ScheduledJob>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::poisoned())?;
        match jobs.get(&job_id) {
            Some(job) if job.family_id == family_id => Ok(Some(job.clone())),
            Some(_) => Err(StoreError::FamilyIsolation),
            None => Ok(None),
        }
    }

    fn cancel(&self, family_id: FamilyId, job_id: ScheduledJobId) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::poisoned())?;
        match jobs.get_mut(&job_id) {
            Some(job) if job.family_id != family_id => Err(StoreError::FamilyIsolation),
            Some(job) if job.status.is_terminal() => {
                Err(StoreError::Terminal(job_id.to_string()))
            }
            Some(job) => {
                job.mark_cancelled();
                Ok(())
            }
            None => Err(StoreError::NotFound(job_id.to_string())),
        }
    }

    fn list_for_family(&self, family_id: FamilyId) -> Result<Vec<ScheduledJob>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::poisoned())?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|job| job.family_id == family_id)
            .cloned()
            .collect();

        result.sort_by_key(|job| (job.fire_at, job.created_at));
        Ok(result)
    }
}
