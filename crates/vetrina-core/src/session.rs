//! Crawl-session aggregates: configuration, live counters, and the
//! outcome handed back to the caller.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::product::ProductRecord;

/// Caps imposed by the calling application's plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub max_products: usize,
}

impl PlanLimits {
    pub fn new(max_products: usize) -> Self {
        Self { max_products }
    }

    pub fn unlimited() -> Self {
        Self {
            max_products: usize::MAX,
        }
    }
}

impl Default for PlanLimits {
    /// Anonymous/trial cap.
    fn default() -> Self {
        Self { max_products: 15 }
    }
}

/// Orchestrator state machine. Transitions are one-directional; no phase
/// loops back into an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    Idle,
    BulkAttempt,
    ParallelCrawl,
    Recovery,
    Done,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlPhase::Idle => "idle",
            CrawlPhase::BulkAttempt => "bulk_attempt",
            CrawlPhase::ParallelCrawl => "parallel_crawl",
            CrawlPhase::Recovery => "recovery",
            CrawlPhase::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Orchestrator knobs. Defaults follow the production deployment this
/// pipeline was extracted from.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Global ceiling on concurrent workers, over any profile's own cap.
    pub max_workers: usize,
    /// Overall wall-clock budget for one extraction call.
    pub wall_clock: Duration,
    /// Independent timeout for each bulk-discovery request.
    pub bulk_request_timeout: Duration,
    /// Transient fetch failures a worker may retry (with a fresh identity)
    /// before giving up on its chunk.
    pub max_transient_retries: u32,
    /// Page-number offset between adjacent workers' starting cursors.
    pub worker_page_stride: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_workers: 100,
            wall_clock: Duration::from_secs(600),
            bulk_request_timeout: Duration::from_secs(10),
            max_transient_retries: 2,
            worker_page_stride: 10,
        }
    }
}

impl CrawlConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_wall_clock(mut self, budget: Duration) -> Self {
        self.wall_clock = budget;
        self
    }

    pub fn with_bulk_request_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_request_timeout = timeout;
        self
    }
}

/// Live counters shared by all workers of one crawl. Atomic so workers
/// never contend on a lock for bookkeeping.
#[derive(Debug, Default)]
pub struct CrawlStats {
    fetched: AtomicU64,
    blocked: AtomicU64,
    errors: AtomicU64,
    identities_used: AtomicU64,
}

impl CrawlStats {
    pub fn record_fetch(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_identity(&self) {
        self.identities_used.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, count: usize, elapsed: Duration) -> StatsSnapshot {
        StatsSnapshot {
            count,
            elapsed_seconds: elapsed.as_secs_f64(),
            fetched: self.fetched.load(Ordering::Relaxed),
            blocks: self.blocked.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            identities_used: self.identities_used.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time summary returned with the product list.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub count: usize,
    pub elapsed_seconds: f64,
    pub fetched: u64,
    pub blocks: u64,
    pub errors: u64,
    pub identities_used: u64,
}

/// Final result of one extraction call.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlOutcome {
    pub products: Vec<ProductRecord>,
    pub stats: StatsSnapshot,
    /// True when the wall-clock budget expired and unfinished workers were
    /// abandoned; the products list is whatever arrived before that.
    pub truncated: bool,
}
