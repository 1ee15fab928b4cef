//! Jobs table

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::{StoreError, Table};
use crate::types::{JobId, JobStatus, ScrapingJob};

/// Filter for listing jobs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Matches the source name, domain or URL (case-insensitive substring)
    pub source: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    fn matches(&self, job: &ScrapingJob) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(source) = &self.source {
            let needle = source.to_lowercase();
            let hit = [&job.source_name, &job.source_domain, &job.source_url]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Persisted scraping jobs. All state changes go through [`transition`]
/// (status moves) or [`record_progress`] (counter and log updates while
/// running), so a terminal job can never change again except through an
/// allowed retry.
///
/// [`transition`]: JobStore::transition
/// [`record_progress`]: JobStore::record_progress
pub struct JobStore {
    table: Table<ScrapingJob>,
}

impl JobStore {
    pub(crate) fn new(table: Table<ScrapingJob>) -> Self {
        Self { table }
    }

    pub fn insert(&self, job: &ScrapingJob) -> Result<(), StoreError> {
        self.table.insert(job.id, job.clone())
    }

    pub fn get(&self, id: &JobId) -> Option<ScrapingJob> {
        self.table.get(id)
    }

    /// Current status without copying the row
    pub fn status_of(&self, id: &JobId) -> Option<JobStatus> {
        self.table.peek(id, |job| job.status)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a job to `next`, applying `f` to the row in the same write.
    pub fn transition<F>(&self, id: &JobId, next: JobStatus, f: F) -> Result<ScrapingJob, StoreError>
    where
        F: FnOnce(&mut ScrapingJob),
    {
        self.table.update(id, |job| {
            if !job.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id: job.id,
                    from: job.status,
                    to: next,
                });
            }
            job.status = next;
            f(job);
            Ok(())
        })
    }

    /// Update a running job's counters, warnings and errors. Refused once the
    /// job has left `Running`. Progress is write-behind; the next status
    /// transition or store flush puts it on disk.
    pub fn record_progress<F>(&self, id: &JobId, f: F) -> Result<ScrapingJob, StoreError>
    where
        F: FnOnce(&mut ScrapingJob),
    {
        self.table.update_deferred(id, |job| {
            if job.status != JobStatus::Running {
                return Err(StoreError::NotRunning {
                    id: job.id,
                    status: job.status,
                });
            }
            f(job);
            job.last_progress_at = Some(Utc::now());
            Ok(())
        })
    }

    pub(super) fn is_dirty(&self) -> bool {
        self.table.is_dirty()
    }

    pub(super) fn flush(&self) -> Result<bool, StoreError> {
        self.table.flush()
    }

    /// Jobs matching `filter`, newest first, paginated
    pub fn list(&self, filter: &JobFilter) -> Vec<ScrapingJob> {
        let mut jobs = self.table.filter(|j| filter.matches(j));
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs.into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn with_status(&self, status: JobStatus) -> Vec<ScrapingJob> {
        self.table.filter(|j| j.status == status)
    }

    pub fn count_by_status(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for job in self.table.filter(|_| true) {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    /// Terminal jobs that finished at or after `since`
    pub fn finished_since(&self, since: DateTime<Utc>) -> Vec<ScrapingJob> {
        self.table.filter(|j| {
            j.status.is_terminal() && j.completed_at.or(j.cancelled_at).map_or(false, |t| t >= since)
        })
    }

    /// Delete terminal jobs that finished before `cutoff`
    pub fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.table.remove_where(|j| {
            j.status.is_terminal() && j.completed_at.or(j.cancelled_at).map_or(false, |t| t < cutoff)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::JobRequest;
    use tempfile::TempDir;

    fn job(name: &str) -> ScrapingJob {
        let request = JobRequest {
            source_url: format!("https://{}/list", name),
            source_name: None,
            job_type: Default::default(),
            priority: Default::default(),
            force_update: false,
        };
        ScrapingJob::new(&request, name.to_string(), 3)
    }

    #[test]
    fn test_transition_rules_enforced() {
        let store = Store::in_memory();
        let j = job("ugc.ac.in");
        store.jobs.insert(&j).unwrap();

        let err = store.jobs.transition(&j.id, JobStatus::Completed, |_| {}).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        store.jobs.transition(&j.id, JobStatus::Running, |_| {}).unwrap();
        let done = store
            .jobs
            .transition(&j.id, JobStatus::Completed, |j| j.completed_at = Some(Utc::now()))
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(store.jobs.transition(&j.id, JobStatus::Pending, |_| {}).is_err());
    }

    #[test]
    fn test_progress_refused_after_terminal() {
        let store = Store::in_memory();
        let j = job("ugc.ac.in");
        store.jobs.insert(&j).unwrap();
        store.jobs.transition(&j.id, JobStatus::Running, |_| {}).unwrap();
        store.jobs.record_progress(&j.id, |j| j.items_scraped += 3).unwrap();
        store.jobs.transition(&j.id, JobStatus::Cancelled, |_| {}).unwrap();

        let err = store.jobs.record_progress(&j.id, |j| j.items_scraped += 1).unwrap_err();
        assert!(matches!(err, StoreError::NotRunning { status: JobStatus::Cancelled, .. }));
        assert_eq!(store.jobs.get(&j.id).unwrap().items_scraped, 3);
    }

    #[test]
    fn test_list_filters_and_paginates() {
        let store = Store::in_memory();
        for name in ["ugc.ac.in", "buddy4study.com", "aicte-india.org"] {
            store.jobs.insert(&job(name)).unwrap();
        }
        let all = store.jobs.list(&JobFilter::default());
        assert_eq!(all.len(), 3);

        let buddy = store.jobs.list(&JobFilter {
            source: Some("Buddy4Study".to_string()),
            ..Default::default()
        });
        assert_eq!(buddy.len(), 1);

        let page = store.jobs.list(&JobFilter {
            limit: Some(2),
            offset: Some(2),
            ..Default::default()
        });
        assert_eq!(page.len(), 1);

        let running = store.jobs.list(&JobFilter {
            status: Some(JobStatus::Running),
            ..Default::default()
        });
        assert!(running.is_empty());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let j = job("scholarships.gov.in");
        {
            let store = Store::open(dir.path()).unwrap();
            store.jobs.insert(&j).unwrap();
            store.jobs.transition(&j.id, JobStatus::Running, |j| j.attempts = 1).unwrap();
        }
        let store = Store::open(dir.path()).unwrap();
        let loaded = store.jobs.get(&j.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.attempts, 1);
    }

    #[test]
    fn test_progress_reaches_disk_with_next_transition() {
        let dir = TempDir::new().unwrap();
        let j = job("scholarships.gov.in");
        {
            let store = Store::open(dir.path()).unwrap();
            store.jobs.insert(&j).unwrap();
            store.jobs.transition(&j.id, JobStatus::Running, |_| {}).unwrap();
            store.jobs.record_progress(&j.id, |j| j.items_scraped = 12).unwrap();
            assert!(store.is_dirty());
        }
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.jobs.get(&j.id).unwrap().items_scraped, 0);

        store.jobs.record_progress(&j.id, |j| j.items_scraped = 12).unwrap();
        store
            .jobs
            .transition(&j.id, JobStatus::Completed, |j| j.completed_at = Some(Utc::now()))
            .unwrap();
        assert!(!store.is_dirty());
        drop(store);

        let store = Store::open(dir.path()).unwrap();
        let loaded = store.jobs.get(&j.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.items_scraped, 12);
        assert_eq!(store.jobs.status_of(&j.id), Some(JobStatus::Completed));
    }

    #[test]
    fn test_retention_removes_only_old_terminal_jobs() {
        let store = Store::in_memory();
        let old = job("ugc.ac.in");
        let active = job("buddy4study.com");
        store.jobs.insert(&old).unwrap();
        store.jobs.insert(&active).unwrap();
        store.jobs.transition(&old.id, JobStatus::Running, |_| {}).unwrap();
        store
            .jobs
            .transition(&old.id, JobStatus::Completed, |j| {
                j.completed_at = Some(Utc::now() - chrono::Duration::days(40))
            })
            .unwrap();

        let removed = store
            .jobs
            .remove_finished_before(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.jobs.get(&old.id).is_none());
        assert!(store.jobs.get(&active.id).is_some());
    }
}
