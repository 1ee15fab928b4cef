//! One attempt of a scraping job
//!
//! Walks the source page by page and pushes every candidate through
//! normalize, validate, dedup and score. Page and record failures are
//! logged onto the job and never stop it; only a source that yields no page
//! at all fails the attempt.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::JobError;
use crate::config::Config;
use crate::daemon::metrics::{PipelineMetrics, Timer};
use crate::dedup::{Deduplicator, DuplicateMatch};
use crate::normalize::{is_plausible_deadline, Normalizer};
use crate::scoring;
use crate::scraping::{ContentExtractor, Crawler, ExtractionError, PageEvent, PageFetcher, PolitenessController};
use crate::store::{Store, StoreError};
use crate::util::bare_host;
use crate::types::{
    CandidateRecord, JobStatus, JobType, RecordId, ScholarshipRecord, ScrapingJob, ValidationStatus,
};
use crate::validation::{LinkCache, LinkChecker, ValidationOutcome, Validator};

/// How an attempt ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stopped by a cancel request or shutdown; the job row is left as the
    /// canceller wrote it
    Cancelled,
}

#[derive(Debug)]
enum Halt {
    Cancelled,
    Error(JobError),
}

impl From<StoreError> for Halt {
    fn from(err: StoreError) -> Self {
        match err {
            // Someone else moved the job out of Running: a cancel won the race
            StoreError::NotRunning { .. } => Halt::Cancelled,
            other => Halt::Error(JobError::Store(other)),
        }
    }
}

/// What happened to one candidate
enum Verdict {
    Saved,
    Updated,
    Duplicate { title: String, of: DuplicateMatch },
    Rejected(String),
}

/// Outcome of one maintenance pass over stored records
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Revalidation {
    /// Records that went through validation again
    pub checked: usize,
    /// Records newly marked expired
    pub expired: usize,
    /// Records that no longer pass validation
    pub invalidated: usize,
    /// Previously failing records that pass again
    pub restored: usize,
    /// Records whose check timed out; they stay due
    pub skipped: usize,
}

/// Record write made for one candidate, kept until its counters land
enum Written {
    Nothing,
    Inserted(RecordId),
    Replaced(Box<ScholarshipRecord>),
}

/// Components shared by every job attempt
pub struct Pipeline {
    crawler: Crawler,
    normalizer: Normalizer,
    validator: Validator,
    dedup: Deduplicator,
    store: Arc<Store>,
    metrics: Arc<PipelineMetrics>,
    record_timeout: Duration,
    /// Serializes dedup lookups with the record writes they decide
    write_turn: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        crawler: Crawler,
        normalizer: Normalizer,
        validator: Validator,
        dedup: Deduplicator,
        store: Arc<Store>,
        metrics: Arc<PipelineMetrics>,
        record_timeout: Duration,
    ) -> Self {
        Self {
            crawler,
            normalizer,
            validator,
            dedup,
            store,
            metrics,
            record_timeout,
            write_turn: Mutex::new(()),
        }
    }

    /// Wire up every stage from configuration around the given network seams
    pub fn from_config(
        config: &Config,
        fetcher: Arc<dyn PageFetcher>,
        checker: Arc<dyn LinkChecker>,
        store: Arc<Store>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, ExtractionError> {
        let extractor = ContentExtractor::from_config(&config.scraping, &config.extraction)?;
        let politeness = PolitenessController::new(config.scraping.clone());
        let crawler = Crawler::new(
            fetcher,
            Arc::new(politeness),
            Arc::new(extractor),
            config.scraping.clone(),
        );
        Ok(Self::new(
            crawler,
            Normalizer::new(config.normalize.clone()),
            Validator::new(config.validation.clone(), checker),
            Deduplicator::new(config.dedup.clone()),
            store,
            metrics,
            Duration::from_secs(config.scheduler.record_timeout_secs.max(1)),
        ))
    }

    /// Run one attempt of `job`, which must already be `Running`.
    pub async fn run(&self, job: ScrapingJob, cancel: Arc<AtomicBool>) -> Result<RunOutcome, JobError> {
        match self.crawl(&job, &cancel).await {
            Ok(()) => Ok(RunOutcome::Completed),
            Err(Halt::Cancelled) => {
                info!("Scrape job {}: stopped", job.id);
                Ok(RunOutcome::Cancelled)
            }
            Err(Halt::Error(e)) => Err(e),
        }
    }

    async fn crawl(&self, job: &ScrapingJob, cancel: &AtomicBool) -> Result<(), Halt> {
        let start = Url::parse(&job.source_url)
            .map_err(|e| Halt::Error(JobError::InvalidRequest(format!("{}: {}", job.source_url, e))))?;
        info!("Scrape job {}: crawling {} ({:?})", job.id, start, job.job_type);

        let today = Utc::now().date_naive();
        let mut session = self.crawler.session(job.id, start);
        let mut links = LinkCache::new();
        let mut last_error: Option<String> = None;

        loop {
            if cancel.load(Ordering::Acquire) {
                return Err(Halt::Cancelled);
            }
            let timer = Timer::start();
            let Some(event) = session.next_page().await else {
                break;
            };
            timer.record(&self.metrics.fetch_latency);

            match event {
                PageEvent::Extracted { url, extraction } => {
                    self.metrics.pages_fetched.inc();
                    let batch = self.dedup.dedup_batch(extraction.candidates);
                    let found = (batch.unique.len() + batch.duplicates.len()) as u64;
                    self.metrics.items_scraped.add(found);

                    let strategy = extraction.strategy;
                    let dropped = extraction.dropped;
                    let in_page: Vec<String> = batch
                        .duplicates
                        .iter()
                        .map(|(dup, _)| format!("{}: '{}' repeated on the same page", url, dup.title))
                        .collect();
                    self.store.jobs.record_progress(&job.id, |j| {
                        j.pages_fetched += 1;
                        j.items_scraped += found;
                        if dropped > 0 {
                            j.warnings.push(format!(
                                "{}: {} items dropped by {} for a short title or description",
                                url, dropped, strategy
                            ));
                        }
                        j.warnings.extend(in_page);
                    })?;

                    let mut fresh = 0;
                    for candidate in batch.unique {
                        if cancel.load(Ordering::Acquire) {
                            return Err(Halt::Cancelled);
                        }
                        let (verdict, written) = self.process(job, candidate, today, &mut links, cancel).await?;
                        if matches!(verdict, Verdict::Saved | Verdict::Updated) {
                            fresh += 1;
                        }
                        if let Err(halt) = self.tally(job, verdict) {
                            self.undo(job, written);
                            return Err(halt);
                        }
                    }

                    if job.job_type == JobType::Incremental && fresh == 0 {
                        info!("Scrape job {}: nothing new on {}, stopping incremental crawl", job.id, url);
                        session.stop();
                    }
                }
                PageEvent::ExtractionFailed { url, error } => {
                    self.metrics.pages_fetched.inc();
                    self.metrics.extraction_failures.inc();
                    debug!("Scrape job {}: extraction failed on {}: {}", job.id, url, error);
                    self.store.jobs.record_progress(&job.id, |j| {
                        j.pages_fetched += 1;
                        j.warnings.push(format!("{}: {}", url, error));
                    })?;
                }
                PageEvent::FetchFailed { url, error } => {
                    self.metrics.fetch_errors.inc();
                    warn!("Scrape job {}: fetch failed for {}: {}", job.id, url, error);
                    let message = format!("{}: {}", url, error);
                    last_error = Some(message.clone());
                    let timed_out = error.is_timeout();
                    self.store.jobs.record_progress(&job.id, |j| {
                        if timed_out {
                            j.errors.push(message);
                        } else {
                            j.warnings.push(message);
                        }
                    })?;
                }
                PageEvent::Skipped { url, reason } => {
                    debug!("Scrape job {}: skipped {}: {}", job.id, url, reason);
                    last_error = Some(format!("{}: {}", url, reason));
                    self.store.jobs.record_progress(&job.id, |j| {
                        j.warnings.push(format!("{}: skipped, {}", url, reason));
                    })?;
                }
            }
        }

        if session.pages_fetched() == 0 {
            return Err(Halt::Error(JobError::SourceUnreachable {
                attempted: session.pages_attempted(),
                last_error: last_error.unwrap_or_else(|| "no pages fetched".to_string()),
            }));
        }
        info!(
            "Scrape job {}: crawl finished, {} of {} pages fetched",
            job.id,
            session.pages_fetched(),
            session.pages_attempted()
        );
        Ok(())
    }

    /// Normalize, validate, dedup and persist one candidate
    async fn process(
        &self,
        job: &ScrapingJob,
        mut candidate: CandidateRecord,
        today: NaiveDate,
        links: &mut LinkCache,
        cancel: &AtomicBool,
    ) -> Result<(Verdict, Written), Halt> {
        let notes: Vec<String> = self
            .normalizer
            .normalize(&mut candidate)
            .into_iter()
            .map(|w| w.to_string())
            .collect();
        if !notes.is_empty() {
            self.store.jobs.record_progress(&job.id, |j| j.warnings.extend(notes))?;
        }
        if let Some(deadline) = candidate.deadline {
            if deadline > today && !is_plausible_deadline(deadline, today) {
                let note = format!("implausible deadline {} in '{}'", deadline, candidate.title);
                self.store.jobs.record_progress(&job.id, |j| j.warnings.push(note))?;
                candidate.deadline = None;
            }
        }

        let timer = Timer::start();
        let validated = tokio::time::timeout(
            self.record_timeout,
            self.validator.validate(&candidate, today, links),
        )
        .await;
        timer.record(&self.metrics.validation_latency);
        let outcome = match validated {
            Ok(outcome) => outcome,
            Err(_) => {
                let reason = format!(
                    "'{}': validation timed out after {:?}",
                    candidate.title, self.record_timeout
                );
                return Ok((Verdict::Rejected(reason), Written::Nothing));
            }
        };
        if !outcome.passed() {
            let reason = format!("'{}' {}: {}", candidate.title, outcome.status, outcome.summary());
            return Ok((Verdict::Rejected(reason), Written::Nothing));
        }

        self.persist(job, candidate, &outcome, today, cancel)
    }

    /// Dedup a validated candidate against the store and write it. Workers
    /// take turns here so two of them never both miss the same twin.
    fn persist(
        &self,
        job: &ScrapingJob,
        candidate: CandidateRecord,
        outcome: &ValidationOutcome,
        today: NaiveDate,
        cancel: &AtomicBool,
    ) -> Result<(Verdict, Written), Halt> {
        let _turn = self.write_turn.lock();
        // A stop that landed during validation: nothing may be written
        if cancel.load(Ordering::Acquire) || self.store.jobs.status_of(&job.id) != Some(JobStatus::Running) {
            return Err(Halt::Cancelled);
        }

        self.metrics.dedup_checks.inc();
        let now = Utc::now();
        let quality_score = scoring::score(&candidate, today);
        let found = self
            .store
            .records
            .with_live(|live| self.dedup.find_match(&candidate, live));

        if let Some(found) = found {
            let refreshable = self
                .store
                .records
                .get(&found.record_id)
                .filter(|twin| from_earlier_attempt(twin, job) || (job.force_update && same_source(twin, job)));
            if let Some(previous) = refreshable {
                let source_name = job.source_name.clone();
                self.store.records.update(&found.record_id, |r| {
                    r.candidate = candidate;
                    r.source_name = source_name;
                    r.quality_score = quality_score;
                    r.validation_status = ValidationStatus::Validated;
                    r.trust_tier = outcome.trust_tier;
                    r.last_validated_at = now;
                    r.updated_at = now;
                })?;
                return Ok((Verdict::Updated, Written::Replaced(Box::new(previous))));
            }

            self.metrics.duplicates_found.inc();
            let title = candidate.title.clone();
            let id = uuid::Uuid::new_v4();
            self.store.records.insert(&ScholarshipRecord {
                id,
                candidate,
                source_name: job.source_name.clone(),
                quality_score,
                validation_status: ValidationStatus::Duplicate,
                trust_tier: outcome.trust_tier,
                last_validated_at: now,
                duplicate_of: Some(found.record_id),
                created_at: now,
                updated_at: now,
            })?;
            return Ok((Verdict::Duplicate { title, of: found }, Written::Inserted(id)));
        }

        let id = uuid::Uuid::new_v4();
        self.store.records.insert(&ScholarshipRecord {
            id,
            candidate,
            source_name: job.source_name.clone(),
            quality_score,
            validation_status: ValidationStatus::Validated,
            trust_tier: outcome.trust_tier,
            last_validated_at: now,
            duplicate_of: None,
            created_at: now,
            updated_at: now,
        })?;
        Ok((Verdict::Saved, Written::Inserted(id)))
    }

    /// Take back a record write whose counters were refused
    fn undo(&self, job: &ScrapingJob, written: Written) {
        let _turn = self.write_turn.lock();
        let undone = match written {
            Written::Nothing => return,
            Written::Inserted(id) => self.store.records.remove(&id).map(|_| ()),
            Written::Replaced(previous) => self.store.records.restore(*previous),
        };
        match undone {
            Ok(()) => debug!("Scrape job {}: took back a record written as the job stopped", job.id),
            Err(e) => warn!("Scrape job {}: could not take back record write: {}", job.id, e),
        }
    }

    /// Maintenance pass over stored records. Passed deadlines are marked
    /// expired first. Then up to `limit` records last validated before
    /// `cutoff` go through validation again and get a fresh quality score.
    pub async fn revalidate(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Revalidation, StoreError> {
        let today = Utc::now().date_naive();
        let mut report = Revalidation {
            expired: self.store.records.expire_before(today)?,
            ..Default::default()
        };
        let mut links = LinkCache::new();

        for record in self.store.records.due_for_revalidation(cutoff, limit) {
            let checked = tokio::time::timeout(
                self.record_timeout,
                self.validator.validate(&record.candidate, today, &mut links),
            )
            .await;
            let Ok(outcome) = checked else {
                debug!("Revalidation of record {} timed out", record.id);
                report.skipped += 1;
                continue;
            };
            let lapsed = record.candidate.deadline.map_or(false, |d| d < today);
            let status = match outcome.status {
                ValidationStatus::Validated if lapsed => ValidationStatus::Expired,
                other => other,
            };
            let quality_score = scoring::score(&record.candidate, today);
            let now = Utc::now();
            let seen = record.updated_at;

            let mut moved = false;
            let applied = self.store.records.update(&record.id, |r| {
                // Rewritten by a job since it was read; its own check stands
                if r.updated_at != seen {
                    return;
                }
                moved = r.validation_status != status;
                r.validation_status = status;
                r.trust_tier = outcome.trust_tier;
                r.quality_score = quality_score;
                r.last_validated_at = now;
                if moved {
                    r.updated_at = now;
                }
            });
            match applied {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }

            report.checked += 1;
            if moved {
                match status {
                    ValidationStatus::Validated => report.restored += 1,
                    ValidationStatus::Expired => report.expired += 1,
                    _ => {
                        debug!("Record {} is now {}: {}", record.id, status, outcome.summary());
                        report.invalidated += 1;
                    }
                }
            }
        }

        self.metrics.records_revalidated.add(report.checked as u64);
        self.metrics.records_expired.add(report.expired as u64);
        Ok(report)
    }

    /// Fold one verdict into the job counters in a single write
    fn tally(&self, job: &ScrapingJob, verdict: Verdict) -> Result<(), Halt> {
        let (saved, updated) = match &verdict {
            Verdict::Saved => (true, false),
            Verdict::Updated => (true, true),
            Verdict::Duplicate { .. } | Verdict::Rejected(_) => (false, false),
        };

        self.store.jobs.record_progress(&job.id, |j| {
            j.items_validated += 1;
            match verdict {
                Verdict::Saved => j.items_saved += 1,
                Verdict::Updated => {
                    j.items_saved += 1;
                    j.items_updated += 1;
                }
                Verdict::Duplicate { title, of } => {
                    j.items_rejected += 1;
                    j.warnings.push(format!(
                        "'{}' duplicates record {} ({:?})",
                        title, of.record_id, of.reason
                    ));
                }
                Verdict::Rejected(reason) => {
                    j.items_rejected += 1;
                    j.warnings.push(reason);
                }
            }
        })?;

        self.metrics.items_validated.inc();
        if saved {
            self.metrics.items_saved.inc();
        } else {
            self.metrics.items_rejected.inc();
        }
        if updated {
            self.metrics.items_updated.inc();
        }
        Ok(())
    }
}

/// Saved by a previous attempt of this job, before the current one started.
/// Twins from the current attempt are ordinary duplicates.
fn from_earlier_attempt(record: &ScholarshipRecord, job: &ScrapingJob) -> bool {
    record.candidate.job_id == job.id && job.attempt_started_at.map_or(false, |started| record.created_at < started)
}

/// Whether `record` came from the same source as `job`
fn same_source(record: &ScholarshipRecord, job: &ScrapingJob) -> bool {
    if record.source_name.eq_ignore_ascii_case(&job.source_name) {
        return true;
    }
    let job_host = job.source_domain.to_ascii_lowercase();
    bare_host(&record.candidate.source_url)
        .map_or(false, |host| host == job_host.trim_start_matches("www."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::{FetchError, FetchResult};
    use crate::types::{JobRequest, TrustTier};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl PageFetcher for Offline {
        async fn fetch(&self, _url: &Url) -> Result<FetchResult, FetchError> {
            Err(FetchError::Status(503))
        }
    }

    #[async_trait]
    impl LinkChecker for Offline {
        async fn check(&self, _url: &Url) -> Result<u16, FetchError> {
            Ok(200)
        }
    }

    /// Links whose path mentions "closed" answer 404
    struct ClosedLinks;

    #[async_trait]
    impl LinkChecker for ClosedLinks {
        async fn check(&self, url: &Url) -> Result<u16, FetchError> {
            Ok(if url.path().contains("closed") { 404 } else { 200 })
        }
    }

    fn pipeline(store: Arc<Store>) -> Pipeline {
        Pipeline::from_config(
            &Config::default(),
            Arc::new(Offline),
            Arc::new(Offline),
            store,
            PipelineMetrics::shared(),
        )
        .unwrap()
    }

    fn running_job(store: &Store) -> ScrapingJob {
        let request = JobRequest {
            source_url: "https://ugc.ac.in/list".to_string(),
            source_name: None,
            job_type: Default::default(),
            priority: Default::default(),
            force_update: false,
        };
        let job = ScrapingJob::new(&request, "ugc.ac.in".to_string(), 0);
        store.jobs.insert(&job).unwrap();
        store
            .jobs
            .transition(&job.id, JobStatus::Running, |j| j.attempt_started_at = Some(Utc::now()))
            .unwrap()
    }

    fn passed() -> ValidationOutcome {
        ValidationOutcome {
            status: ValidationStatus::Validated,
            failures: Vec::new(),
            trust_tier: TrustTier::Trusted,
            trust_score: 1.0,
            http_status: Some(200),
        }
    }

    fn candidate(job: &ScrapingJob) -> CandidateRecord {
        let mut c = CandidateRecord::new(
            "Post Matric Scholarship for Minorities 2024",
            "https://ugc.ac.in/list",
            job.id,
        );
        c.description = "For students from minority communities in classes 11 and above".to_string();
        c.application_url = Some("https://ugc.ac.in/apply/pms".to_string());
        c
    }

    fn stored(title: &str, apply: &str, status: ValidationStatus, validated_days_ago: i64) -> ScholarshipRecord {
        let now = Utc::now();
        let mut c = CandidateRecord::new(title, "https://ugc.ac.in/list", uuid::Uuid::new_v4());
        c.description = "Annual award for students with outstanding board results".to_string();
        c.eligibility = Some("Class 12 pass with at least 80%".to_string());
        c.amount = Some(50_000);
        c.deadline = Some(now.date_naive() + chrono::Duration::days(60));
        c.application_url = Some(format!("https://ugc.ac.in{}", apply));
        ScholarshipRecord {
            id: uuid::Uuid::new_v4(),
            candidate: c,
            source_name: "ugc.ac.in".to_string(),
            quality_score: 0,
            validation_status: status,
            trust_tier: TrustTier::Trusted,
            last_validated_at: now - chrono::Duration::days(validated_days_ago),
            duplicate_of: None,
            created_at: now - chrono::Duration::days(30),
            updated_at: now - chrono::Duration::days(30),
        }
    }

    #[tokio::test]
    async fn test_revalidation_pass() {
        let store = Arc::new(Store::in_memory());
        let metrics = PipelineMetrics::shared();
        let mut config = Config::default();
        config.validation.retry_backoff_ms = 0;
        let p = Pipeline::from_config(&config, Arc::new(Offline), Arc::new(ClosedLinks), store.clone(), metrics.clone())
            .unwrap();

        let closed = stored("Merit Cum Means Scholarship", "/apply/closed", ValidationStatus::Validated, 10);
        let back = stored("Post Graduate Indira Gandhi Scholarship", "/apply/pg", ValidationStatus::Failed, 10);
        let mut lapsed = stored("Ishan Uday Special Scholarship", "/apply/ishan", ValidationStatus::Validated, 1);
        lapsed.candidate.deadline = Some(Utc::now().date_naive() - chrono::Duration::days(2));
        let recent = stored("Central Sector Scheme", "/apply/closed-too", ValidationStatus::Validated, 0);
        for r in [&closed, &back, &lapsed, &recent] {
            store.records.insert(r).unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let report = p.revalidate(cutoff, 10).await.unwrap();
        assert_eq!(
            report,
            Revalidation {
                checked: 2,
                expired: 1,
                invalidated: 1,
                restored: 1,
                skipped: 0,
            }
        );

        let closed = store.records.get(&closed.id).unwrap();
        assert_eq!(closed.validation_status, ValidationStatus::Failed);
        assert!(closed.last_validated_at > cutoff);
        let back = store.records.get(&back.id).unwrap();
        assert_eq!(back.validation_status, ValidationStatus::Validated);
        assert!(back.quality_score > 0);
        assert_eq!(store.records.get(&lapsed.id).unwrap().validation_status, ValidationStatus::Expired);
        // Checked recently, so its link is not looked at again
        assert_eq!(store.records.get(&recent.id).unwrap(), recent);
        assert_eq!(metrics.records_revalidated.get(), 2);
        assert_eq!(metrics.records_expired.get(), 1);

        // Everything is fresh now
        assert_eq!(p.revalidate(cutoff, 10).await.unwrap().checked, 0);
    }

    #[test]
    fn test_concurrent_writers_keep_one_live_record() {
        let store = Arc::new(Store::in_memory());
        let p = pipeline(store.clone());
        let job = running_job(&store);
        let today = Utc::now().date_naive();
        let cancel = AtomicBool::new(false);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let _ = p.persist(&job, candidate(&job), &passed(), today, &cancel);
                });
            }
        });

        assert_eq!(store.records.len(), 8);
        assert_eq!(store.records.live().len(), 1);
    }

    #[test]
    fn test_stopped_job_writes_nothing() {
        let store = Arc::new(Store::in_memory());
        let p = pipeline(store.clone());
        let today = Utc::now().date_naive();

        let flagged = running_job(&store);
        let cancel = AtomicBool::new(true);
        let result = p.persist(&flagged, candidate(&flagged), &passed(), today, &cancel);
        assert!(matches!(result, Err(Halt::Cancelled)));

        // Cancelled in the store before the flag was raised
        let cancelled = running_job(&store);
        store.jobs.transition(&cancelled.id, JobStatus::Cancelled, |_| {}).unwrap();
        let cancel = AtomicBool::new(false);
        let result = p.persist(&cancelled, candidate(&cancelled), &passed(), today, &cancel);
        assert!(matches!(result, Err(Halt::Cancelled)));

        assert!(store.records.is_empty());
    }

    #[test]
    fn test_refused_tally_takes_back_the_write() {
        let store = Arc::new(Store::in_memory());
        let p = pipeline(store.clone());
        let job = running_job(&store);
        let today = Utc::now().date_naive();
        let cancel = AtomicBool::new(false);

        let (verdict, written) = p.persist(&job, candidate(&job), &passed(), today, &cancel).unwrap();
        assert_eq!(store.records.len(), 1);

        store.jobs.transition(&job.id, JobStatus::Cancelled, |_| {}).unwrap();
        assert!(matches!(p.tally(&job, verdict), Err(Halt::Cancelled)));
        p.undo(&job, written);

        assert!(store.records.is_empty());
        let job = store.jobs.get(&job.id).unwrap();
        assert_eq!(job.items_saved, 0);
        assert!(job.counters_consistent());
    }

    #[test]
    fn test_undo_restores_refreshed_record() {
        let store = Arc::new(Store::in_memory());
        let p = pipeline(store.clone());
        let today = Utc::now().date_naive();
        let cancel = AtomicBool::new(false);

        let first = running_job(&store);
        p.persist(&first, candidate(&first), &passed(), today, &cancel).unwrap();
        let original = store.records.live().pop().unwrap();

        // A later attempt of the same job refreshes the record in place
        let mut later = store.jobs.get(&first.id).unwrap();
        later.attempt_started_at = Some(Utc::now() + chrono::Duration::seconds(1));
        let mut refreshed = candidate(&later);
        refreshed.description = "Revised eligibility for the 2024 cycle".to_string();
        let (verdict, written) = p.persist(&later, refreshed, &passed(), today, &cancel).unwrap();
        assert!(matches!(verdict, Verdict::Updated));
        assert_ne!(store.records.get(&original.id).unwrap().candidate.description, original.candidate.description);

        p.undo(&later, written);
        assert_eq!(store.records.get(&original.id), Some(original));
    }
}
