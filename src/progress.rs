//! Progress aggregation for crawl jobs.
//!
//! [`ProgressTracker`] folds the ordered stream of [`JobEvent`]s into a
//! monotonic [`ProgressSnapshot`] suitable for rendering, and produces the
//! final [`CompletionStats`] exactly once per job.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::events::{CompletionPayload, JobEvent};

/// Coarse job state, reflected into every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Whether a completed job crawled everything it found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Partial,
}

/// Point-in-time view of a job. Percentage and counters never regress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub percentage: u8,
    pub step: String,
    pub found: u64,
    pub crawled: u64,
    pub related: u64,
    pub attachments: u64,
    pub error_message: Option<String>,
}

impl ProgressSnapshot {
    fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            percentage: 0,
            step: "pending".to_string(),
            found: 0,
            crawled: 0,
            related: 0,
            attachments: 0,
            error_message: None,
        }
    }
}

/// Final tally for a finished job. Produced at most once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionStats {
    pub total_issues: u64,
    pub successful_issues: u64,
    pub related_issues: u64,
    pub attachments: u64,
    pub duration_seconds: f64,
    pub outcome: JobOutcome,
    pub result_ids: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

/// What [`ProgressTracker::apply`] produced for one event.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerUpdate {
    /// Nothing consumer-visible changed.
    None,
    /// The snapshot advanced.
    Progress(ProgressSnapshot),
    /// The job finished successfully. Carried alongside the final snapshot.
    Completed(ProgressSnapshot, CompletionStats),
    /// The job reported failure or cancellation.
    Failed(ProgressSnapshot),
}

// Percentage checkpoints for the crawl pipeline. Crawling interpolates
// between CRAWL_FLOOR and CRAWL_CEILING by issues done.
const AUTHENTICATED_PCT: u8 = 10;
const SEARCH_DONE_PCT: u8 = 20;
const CRAWL_FLOOR: u8 = 20;
const CRAWL_CEILING: u8 = 80;
const ATTACHMENTS_PCT: u8 = 85;
const EMBEDDING_PCT: u8 = 90;

// Trailing window of in-band errors kept for diagnostics; a flaky producer
// can emit these for the whole life of a job.
const MAX_STREAM_ERRORS: usize = 50;

/// Monotonic aggregator: one instance per job, fed events in arrival order.
pub struct ProgressTracker {
    snapshot: ProgressSnapshot,
    /// Total reported by `search_completed`, preferred over the running
    /// `found` counter when sizing the crawl phase.
    total_from_search: Option<u64>,
    started_at: Option<Instant>,
    completed: bool,
    stream_errors: VecDeque<String>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            snapshot: ProgressSnapshot::pending(),
            total_from_search: None,
            started_at: None,
            completed: false,
            stream_errors: VecDeque::new(),
        }
    }

    /// Fold one event into the snapshot.
    ///
    /// Terminal states are sticky: once the job completed or failed, later
    /// events are ignored. Transport-level `StreamError` events are logged
    /// but never change the job status; the connection layer decides whether
    /// they are fatal.
    pub fn apply(&mut self, event: &JobEvent) -> TrackerUpdate {
        if let JobEvent::StreamError { message } = event {
            debug!(error = %message, "stream error during job, status unchanged");
            while self.stream_errors.len() >= MAX_STREAM_ERRORS {
                self.stream_errors.pop_front();
            }
            self.stream_errors.push_back(message.clone());
            return TrackerUpdate::None;
        }

        if self.is_terminal() {
            debug!(?event, "event after terminal state ignored");
            return TrackerUpdate::None;
        }

        match event {
            JobEvent::JobStarted => {
                self.snapshot.status = JobStatus::Running;
                self.snapshot.step = "starting".to_string();
                self.started_at = Some(Instant::now());
                self.progress()
            }
            JobEvent::Authenticating => self.step("authenticating"),
            JobEvent::Authenticated => {
                self.bump(AUTHENTICATED_PCT);
                self.step("authenticated")
            }
            JobEvent::Searching => self.step("searching"),
            JobEvent::SearchCompleted { total_issues } => {
                self.snapshot.found = self.snapshot.found.max(*total_issues);
                self.total_from_search = Some(*total_issues);
                self.bump(SEARCH_DONE_PCT);
                self.step("search completed")
            }
            JobEvent::CrawlingIssue {
                issue_number,
                total_issues,
            } => {
                self.snapshot.crawled = self.snapshot.crawled.max(*issue_number);
                let total = total_issues
                    .or(self.total_from_search)
                    .unwrap_or(self.snapshot.found);
                self.bump(crawl_percentage(self.snapshot.crawled, total));
                self.step("crawling issues")
            }
            JobEvent::RelatedIssuesFound { related_count } => {
                // Each event reports a fresh batch, so the counter adds up
                // rather than taking a max.
                self.snapshot.related += related_count;
                self.progress()
            }
            JobEvent::ProcessingAttachments { count } => {
                if let Some(count) = count {
                    self.snapshot.attachments = self.snapshot.attachments.max(*count);
                }
                self.bump(ATTACHMENTS_PCT);
                self.step("processing attachments")
            }
            JobEvent::Embedding => {
                self.bump(EMBEDDING_PCT);
                self.step("embedding")
            }
            JobEvent::JobCompleted(payload) => self.complete(payload),
            JobEvent::JobFailed { message } => self.fail(Some(message.clone())),
            JobEvent::Cancelled { reason } => self.fail(reason.clone()),
            JobEvent::Unknown { name } => {
                debug!(name = %name, "unrecognised job event ignored");
                TrackerUpdate::None
            }
            // Handled before the terminal check above.
            JobEvent::StreamError { .. } => TrackerUpdate::None,
        }
    }

    fn complete(&mut self, payload: &CompletionPayload) -> TrackerUpdate {
        if self.completed {
            warn!("duplicate completion event ignored");
            return TrackerUpdate::None;
        }
        self.completed = true;

        // Producer-reported tallies win over our own running counters.
        let total = payload
            .total_issues
            .or(self.total_from_search)
            .unwrap_or(self.snapshot.found);
        let successful = payload.crawled_issues.unwrap_or(self.snapshot.crawled);
        let related = payload.related_issues.unwrap_or(self.snapshot.related);
        let attachments = payload.attachments.unwrap_or(self.snapshot.attachments);

        self.snapshot.status = JobStatus::Completed;
        self.snapshot.percentage = 100;
        self.snapshot.step = "completed".to_string();
        self.snapshot.found = self.snapshot.found.max(total);
        self.snapshot.crawled = self.snapshot.crawled.max(successful);
        self.snapshot.related = self.snapshot.related.max(related);
        self.snapshot.attachments = self.snapshot.attachments.max(attachments);

        let stats = CompletionStats {
            total_issues: total,
            successful_issues: successful,
            related_issues: related,
            attachments,
            duration_seconds: self
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            outcome: if successful >= total {
                JobOutcome::Success
            } else {
                JobOutcome::Partial
            },
            result_ids: payload.result_ids.clone(),
            finished_at: Utc::now(),
        };
        TrackerUpdate::Completed(self.snapshot.clone(), stats)
    }

    fn fail(&mut self, message: Option<String>) -> TrackerUpdate {
        self.snapshot.status = JobStatus::Failed;
        self.snapshot.step = "failed".to_string();
        self.snapshot.error_message = message;
        TrackerUpdate::Failed(self.snapshot.clone())
    }

    fn bump(&mut self, percentage: u8) {
        self.snapshot.percentage = self.snapshot.percentage.max(percentage);
    }

    fn step(&mut self, step: &str) -> TrackerUpdate {
        self.snapshot.step = step.to_string();
        self.progress()
    }

    fn progress(&self) -> TrackerUpdate {
        TrackerUpdate::Progress(self.snapshot.clone())
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.snapshot.status,
            JobStatus::Completed | JobStatus::Failed
        )
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    /// Trailing window of transport errors observed while the job ran,
    /// oldest retained first.
    pub fn stream_errors(&self) -> impl Iterator<Item = &str> {
        self.stream_errors.iter().map(String::as_str)
    }
}

/// Interpolate crawl progress between the checkpoints. Clamped so a noisy
/// producer can never push the bar past the crawl phase early.
fn crawl_percentage(crawled: u64, total: u64) -> u8 {
    if total == 0 {
        return CRAWL_FLOOR;
    }
    let span = f64::from(CRAWL_CEILING - CRAWL_FLOOR);
    let ratio = (crawled as f64 / total as f64).min(1.0);
    CRAWL_FLOOR + (span * ratio) as u8
}
