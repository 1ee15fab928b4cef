//! Records table

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::{StoreError, Table};
use crate::types::{JobId, RecordId, ScholarshipRecord, ValidationStatus};

/// Filter for listing records
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    pub job_id: Option<JobId>,
    pub status: Option<ValidationStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn is_live(record: &ScholarshipRecord) -> bool {
    record.duplicate_of.is_none() && record.validation_status != ValidationStatus::Duplicate
}

/// Persisted scholarship records. Writes are write-behind; see
/// [`Store::flush`](super::Store::flush).
pub struct RecordStore {
    table: Table<ScholarshipRecord>,
}

impl RecordStore {
    pub(crate) fn new(table: Table<ScholarshipRecord>) -> Self {
        Self { table }
    }

    pub fn insert(&self, record: &ScholarshipRecord) -> Result<(), StoreError> {
        self.table.insert(record.id, record.clone())
    }

    pub fn get(&self, id: &RecordId) -> Option<ScholarshipRecord> {
        self.table.get(id)
    }

    /// Read-modify-write of one record
    pub fn update<F>(&self, id: &RecordId, f: F) -> Result<ScholarshipRecord, StoreError>
    where
        F: FnOnce(&mut ScholarshipRecord),
    {
        self.table.update(id, |record| {
            f(record);
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put back a record exactly as it was
    pub fn restore(&self, record: ScholarshipRecord) -> Result<(), StoreError> {
        self.table.put(record.id, record)
    }

    /// Delete one record; returns whether it existed
    pub fn remove(&self, id: &RecordId) -> Result<bool, StoreError> {
        let target = *id;
        Ok(self.table.remove_where(|r| r.id == target)? > 0)
    }

    /// Records new candidates are compared against: everything that is not
    /// itself marked as a duplicate.
    pub fn live(&self) -> Vec<ScholarshipRecord> {
        self.table.filter(is_live)
    }

    /// Run `f` over the live records in place, without copying them
    pub fn with_live<R>(&self, f: impl FnOnce(&mut dyn Iterator<Item = &ScholarshipRecord>) -> R) -> R {
        self.table.scan(|rows| f(&mut rows.filter(|r| is_live(r))))
    }

    /// Live records last validated before `cutoff`, stalest first, at most
    /// `limit`. Expired records are final and never come back.
    pub fn due_for_revalidation(&self, cutoff: DateTime<Utc>, limit: usize) -> Vec<ScholarshipRecord> {
        let mut due = self.table.filter(|r| {
            is_live(r) && r.validation_status != ValidationStatus::Expired && r.last_validated_at < cutoff
        });
        due.sort_by(|a, b| a.last_validated_at.cmp(&b.last_validated_at).then_with(|| a.id.cmp(&b.id)));
        due.truncate(limit);
        due
    }

    /// Mark validated records whose deadline is before `today` as expired
    pub fn expire_before(&self, today: NaiveDate) -> Result<usize, StoreError> {
        let now = Utc::now();
        self.table.update_where(
            |r| {
                is_live(r)
                    && r.validation_status == ValidationStatus::Validated
                    && r.candidate.deadline.map_or(false, |d| d < today)
            },
            |r| {
                r.validation_status = ValidationStatus::Expired;
                r.updated_at = now;
            },
        )
    }

    pub(super) fn is_dirty(&self) -> bool {
        self.table.is_dirty()
    }

    pub(super) fn flush(&self) -> Result<bool, StoreError> {
        self.table.flush()
    }

    /// Records matching `filter`, oldest first, paginated
    pub fn list(&self, filter: &RecordFilter) -> Vec<ScholarshipRecord> {
        let mut records = self.table.filter(|r| {
            filter.job_id.map_or(true, |id| r.candidate.job_id == id)
                && filter.status.map_or(true, |s| r.validation_status == s)
        });
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn count_by_status(&self) -> HashMap<ValidationStatus, usize> {
        let mut counts = HashMap::new();
        for record in self.table.filter(|_| true) {
            *counts.entry(record.validation_status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::{CandidateRecord, TrustTier};
    use chrono::Utc;
    use uuid::Uuid;

    fn record(title: &str, job_id: JobId, status: ValidationStatus) -> ScholarshipRecord {
        let now = Utc::now();
        ScholarshipRecord {
            id: Uuid::new_v4(),
            candidate: CandidateRecord::new(title, "https://ugc.ac.in/schemes", job_id),
            source_name: "UGC".to_string(),
            quality_score: 70,
            validation_status: status,
            trust_tier: TrustTier::Trusted,
            last_validated_at: now,
            duplicate_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_live_excludes_duplicates() {
        let store = Store::in_memory();
        let job = Uuid::new_v4();
        let original = record("Merit Scholarship 2024", job, ValidationStatus::Validated);
        let mut dup = record("Merit Scholarship  2024", job, ValidationStatus::Duplicate);
        dup.duplicate_of = Some(original.id);
        store.records.insert(&original).unwrap();
        store.records.insert(&dup).unwrap();

        let live = store.records.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, original.id);
    }

    #[test]
    fn test_with_live_sees_same_rows_as_live() {
        let store = Store::in_memory();
        let job = Uuid::new_v4();
        let kept = record("National Merit Scholarship", job, ValidationStatus::Validated);
        let mut dup = record("National Merit Scholarship", job, ValidationStatus::Duplicate);
        dup.duplicate_of = Some(kept.id);
        store.records.insert(&kept).unwrap();
        store.records.insert(&dup).unwrap();

        let ids: Vec<_> = store.records.with_live(|live| live.map(|r| r.id).collect());
        assert_eq!(ids, vec![kept.id]);
    }

    #[test]
    fn test_expiry_and_revalidation_selection() {
        let store = Store::in_memory();
        let job = Uuid::new_v4();
        let today = Utc::now().date_naive();
        let week_ago = Utc::now() - chrono::Duration::days(7);

        let mut lapsed = record("Lapsed Merit Award", job, ValidationStatus::Validated);
        lapsed.candidate.deadline = Some(today - chrono::Duration::days(1));
        let mut stale = record("Stale Research Grant", job, ValidationStatus::Validated);
        stale.candidate.deadline = Some(today + chrono::Duration::days(30));
        stale.last_validated_at = week_ago;
        let mut staler = record("Staler Sports Fellowship", job, ValidationStatus::Failed);
        staler.last_validated_at = week_ago - chrono::Duration::days(1);
        let fresh = record("Fresh Minority Scholarship", job, ValidationStatus::Validated);
        for r in [&lapsed, &stale, &staler, &fresh] {
            store.records.insert(r).unwrap();
        }

        assert_eq!(store.records.expire_before(today).unwrap(), 1);
        assert_eq!(
            store.records.get(&lapsed.id).unwrap().validation_status,
            ValidationStatus::Expired
        );
        assert_eq!(store.records.expire_before(today).unwrap(), 0);

        let cutoff = Utc::now() - chrono::Duration::days(1);
        let due: Vec<_> = store
            .records
            .due_for_revalidation(cutoff, 10)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(due, vec![staler.id, stale.id]);
        assert_eq!(store.records.due_for_revalidation(cutoff, 1).len(), 1);
    }

    #[test]
    fn test_remove_and_restore() {
        let store = Store::in_memory();
        let mut r = record("Post Matric Scholarship", Uuid::new_v4(), ValidationStatus::Validated);
        store.records.insert(&r).unwrap();
        let original = r.clone();

        store.records.update(&r.id, |rec| rec.quality_score = 10).unwrap();
        store.records.restore(original.clone()).unwrap();
        assert_eq!(store.records.get(&r.id), Some(original));

        assert!(store.records.remove(&r.id).unwrap());
        assert!(!store.records.remove(&r.id).unwrap());
        assert!(store.records.is_empty());

        // Restoring a removed record brings it back
        r.quality_score = 55;
        store.records.restore(r.clone()).unwrap();
        assert_eq!(store.records.get(&r.id).unwrap().quality_score, 55);
    }

    #[test]
    fn test_list_by_job_and_status() {
        let store = Store::in_memory();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.records.insert(&record("First Scholarship", a, ValidationStatus::Validated)).unwrap();
        store.records.insert(&record("Second Scholarship", a, ValidationStatus::Duplicate)).unwrap();
        store.records.insert(&record("Third Scholarship", b, ValidationStatus::Validated)).unwrap();

        let by_job = store.records.list(&RecordFilter {
            job_id: Some(a),
            ..Default::default()
        });
        assert_eq!(by_job.len(), 2);

        let validated = store.records.list(&RecordFilter {
            status: Some(ValidationStatus::Validated),
            ..Default::default()
        });
        assert_eq!(validated.len(), 2);
        assert_eq!(store.records.count_by_status()[&ValidationStatus::Duplicate], 1);
    }

    #[test]
    fn test_insert_twice_is_refused() {
        let store = Store::in_memory();
        let r = record("Merit Scholarship 2024", Uuid::new_v4(), ValidationStatus::Validated);
        store.records.insert(&r).unwrap();
        assert!(matches!(
            store.records.insert(&r),
            Err(StoreError::AlreadyExists { .. })
        ));
    }
}
