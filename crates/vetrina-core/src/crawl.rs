//! The extraction orchestrator.
//!
//! One call walks the phases `Idle → BulkAttempt → ParallelCrawl →
//! Recovery → Done`, one-directionally. Bulk discovery is a fast
//! sequential pre-pass; the parallel phase partitions the remaining
//! target across workers that each own one identity and one page-offset
//! range. A wall-clock budget cancels stragglers; whatever they streamed
//! back before cancellation is still merged.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::bulk::BulkDiscovery;
use crate::dedup;
use crate::error::CrawlError;
use crate::extract;
use crate::fetch::PacedFetcher;
use crate::identity::IdentityPool;
use crate::product::ProductRecord;
use crate::profile::{ProfileResolver, SelectorSet, SiteProfile};
use crate::session::{CrawlConfig, CrawlOutcome, CrawlPhase, CrawlStats, PlanLimits};
use crate::traits::Fetcher;

/// Yield threshold (in tenths) below which the recovery phase runs.
const RECOVERY_THRESHOLD_TENTHS: usize = 7;

/// Coordinates one extraction call end to end. Generic over the fetcher
/// for dependency injection; identity pool and profile resolver are
/// explicit shared services, not process globals.
pub struct CrawlService<F> {
    fetcher: F,
    identities: Arc<IdentityPool>,
    profiles: Arc<ProfileResolver>,
    config: CrawlConfig,
}

impl<F: Fetcher + 'static> CrawlService<F> {
    pub fn new(
        fetcher: F,
        identities: Arc<IdentityPool>,
        profiles: Arc<ProfileResolver>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            identities,
            profiles,
            config,
        }
    }

    /// Extract up to `target` products from the catalog at `url`, bounded
    /// by the caller's plan limits and the configured wall-clock budget.
    ///
    /// Partial yield at budget expiry is returned with `truncated` set;
    /// the `Timeout` error is reserved for a budget that expired with
    /// nothing to show.
    pub async fn extract(
        &self,
        url: &str,
        target: usize,
        limits: &PlanLimits,
    ) -> Result<CrawlOutcome, CrawlError> {
        let started = Instant::now();
        let profile = self.profiles.resolve(url)?;
        let (origin, domain) = origin_and_host(url)?;

        let target = target.min(limits.max_products);
        if target == 0 {
            return Err(CrawlError::NoProductsFound);
        }

        tracing::info!(%url, target, kind = %profile.kind, "extraction started");

        let stats = Arc::new(CrawlStats::default());
        let cancel = CancellationToken::new();
        let budget_secs = self.config.wall_clock.as_secs();
        let budget_timer = tokio::spawn({
            let cancel = cancel.clone();
            let budget = self.config.wall_clock;
            async move {
                tokio::time::sleep(budget).await;
                tracing::warn!(budget = ?budget, "wall-clock budget expired, cancelling workers");
                cancel.cancel();
            }
        });

        let mut collected: Vec<ProductRecord> = Vec::new();

        let mut phase = CrawlPhase::BulkAttempt;
        tracing::info!(%phase, "phase started");
        let bulk = BulkDiscovery::new(self.fetcher.clone())
            .with_request_timeout(self.config.bulk_request_timeout);
        tokio::select! {
            records = bulk.discover(&origin) => collected.extend(records),
            () = cancel.cancelled() => {}
        }

        if collected.len() < target && !cancel.is_cancelled() {
            phase = CrawlPhase::ParallelCrawl;
            let remaining = target - collected.len();
            let workers = remaining
                .min(profile.max_parallel)
                .min(self.config.max_workers)
                .max(1);
            let quota = remaining.div_ceil(workers);
            tracing::info!(%phase, workers, quota, "phase started");

            self.run_workers(url, &domain, &profile, &stats, &cancel, workers, quota, &mut collected)
                .await;
        }

        if collected.len() * 10 < target * RECOVERY_THRESHOLD_TENTHS && !cancel.is_cancelled() {
            phase = CrawlPhase::Recovery;
            tracing::info!(%phase, collected = collected.len(), target, "yield below threshold");
            let recovered = self
                .recovery_pass(url, &domain, &profile, &stats, &cancel)
                .await;
            collected.extend(recovered);
        }

        phase = CrawlPhase::Done;
        budget_timer.abort();
        let truncated = cancel.is_cancelled();

        let mut products = dedup::reduce(collected);
        products.truncate(target);
        if products.is_empty() {
            return Err(if truncated {
                CrawlError::Timeout { budget_secs }
            } else {
                CrawlError::NoProductsFound
            });
        }

        let snapshot = stats.snapshot(products.len(), started.elapsed());
        tracing::info!(
            %phase,
            count = snapshot.count,
            blocks = snapshot.blocks,
            identities = snapshot.identities_used,
            truncated,
            "extraction completed in {:.1}s",
            snapshot.elapsed_seconds,
        );
        Ok(CrawlOutcome {
            products,
            stats: snapshot,
            truncated,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_workers(
        &self,
        url: &str,
        domain: &str,
        profile: &Arc<SiteProfile>,
        stats: &Arc<CrawlStats>,
        cancel: &CancellationToken,
        workers: usize,
        quota: usize,
        collected: &mut Vec<ProductRecord>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<ProductRecord>>();
        let mut tasks: JoinSet<()> = JoinSet::new();

        for index in 0..workers {
            let worker = ChunkWorker {
                fetcher: self.fetcher.clone(),
                pool: Arc::clone(&self.identities),
                profile: Arc::clone(profile),
                stats: Arc::clone(stats),
                cancel: cancel.clone(),
                url: url.to_string(),
                domain: domain.to_string(),
                start_page: index * self.config.worker_page_stride,
                quota,
                max_transient_retries: self.config.max_transient_retries,
            };
            let tx = tx.clone();
            tasks.spawn(async move { worker.run(tx).await });
        }
        drop(tx);

        // Workers stream per-page batches; the channel closes once every
        // worker has finished or been cancelled, so partial results from
        // abandoned workers are still merged.
        while let Some(batch) = rx.recv().await {
            collected.extend(batch);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                stats.record_error();
                tracing::warn!(error = %e, "crawl worker aborted");
            }
        }
    }

    /// Last-resort strategy for low-yield crawls: one universal-selector
    /// pass over the base listing with a fresh identity. Allowed to come
    /// back empty.
    async fn recovery_pass(
        &self,
        url: &str,
        domain: &str,
        profile: &SiteProfile,
        stats: &Arc<CrawlStats>,
        cancel: &CancellationToken,
    ) -> Vec<ProductRecord> {
        let identity = self.identities.allocate(domain);
        stats.record_identity();
        let mut paced = PacedFetcher::new(
            self.fetcher.clone(),
            &identity,
            profile,
            domain,
            cancel.clone(),
        );

        match paced.fetch_page(url).await {
            Ok(body) => {
                stats.record_fetch();
                let records = extract::extract_records(&body, &SelectorSet::universal());
                if !records.is_empty() {
                    self.identities.mark_success(&identity.id, records.len() as u64);
                    tracing::info!(found = records.len(), "recovery pass yielded records");
                }
                records
            }
            Err(e) if e.is_block() => {
                stats.record_block();
                self.identities.mark_blocked(&identity.id);
                Vec::new()
            }
            Err(CrawlError::Cancelled) => Vec::new(),
            Err(e) => {
                stats.record_error();
                tracing::debug!(error = %e, "recovery fetch failed");
                Vec::new()
            }
        }
    }
}

/// One parallel-phase worker: a single identity crawling a distinct
/// page-number range until quota, block, or an empty page.
struct ChunkWorker<F> {
    fetcher: F,
    pool: Arc<IdentityPool>,
    profile: Arc<SiteProfile>,
    stats: Arc<CrawlStats>,
    cancel: CancellationToken,
    url: String,
    domain: String,
    start_page: usize,
    quota: usize,
    max_transient_retries: u32,
}

impl<F: Fetcher> ChunkWorker<F> {
    async fn run(&self, tx: mpsc::UnboundedSender<Vec<ProductRecord>>) {
        let mut identity = self.pool.allocate(&self.domain);
        self.stats.record_identity();
        let mut paced = PacedFetcher::new(
            self.fetcher.clone(),
            &identity,
            &self.profile,
            self.domain.clone(),
            self.cancel.clone(),
        );

        let mut found = 0usize;
        let mut page = self.start_page;
        let mut retries = 0u32;

        while found < self.quota {
            let page_url = page_url(&self.url, page);
            match paced.fetch_page(&page_url).await {
                Ok(body) => {
                    self.stats.record_fetch();
                    let records = extract::extract_records(&body, &self.profile.selectors);
                    if records.is_empty() {
                        tracing::debug!(page, "page yielded nothing, layout exhausted");
                        break;
                    }
                    found += records.len();
                    if tx.send(records).is_err() {
                        break;
                    }
                    page += 1;
                }
                Err(e) if e.is_block() => {
                    self.stats.record_block();
                    self.pool.mark_blocked(&identity.id);
                    tracing::warn!(
                        identity = %identity.id,
                        domain = %self.domain,
                        error = %e,
                        "identity blocked, aborting chunk"
                    );
                    break;
                }
                Err(CrawlError::Cancelled) => break,
                Err(e) if e.is_transient() && retries < self.max_transient_retries => {
                    retries += 1;
                    self.stats.record_error();
                    tracing::debug!(error = %e, retry = retries, "transient failure, rotating identity");
                    identity = self.pool.allocate(&self.domain);
                    self.stats.record_identity();
                    paced = PacedFetcher::new(
                        self.fetcher.clone(),
                        &identity,
                        &self.profile,
                        self.domain.clone(),
                        self.cancel.clone(),
                    );
                }
                Err(e) => {
                    self.stats.record_error();
                    tracing::warn!(error = %e, page, "chunk fetch failed");
                    break;
                }
            }
        }

        if found > 0 {
            self.pool.mark_success(&identity.id, found as u64);
        }
    }
}

fn page_url(base: &str, page: usize) -> String {
    if base.contains('?') {
        format!("{base}&page={page}")
    } else {
        format!("{base}?page={page}")
    }
}

fn origin_and_host(url: &str) -> Result<(String, String), CrawlError> {
    let parsed = Url::parse(url).map_err(|e| CrawlError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| CrawlError::InvalidUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    };
    Ok((origin, host.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::{MockFetcher, instant_profile, product_grid};

    const BASE: &str = "https://shop.test/catalog";

    fn service(fetcher: MockFetcher, profile: SiteProfile) -> CrawlService<MockFetcher> {
        service_with_config(fetcher, profile, CrawlConfig::default())
    }

    fn service_with_config(
        fetcher: MockFetcher,
        profile: SiteProfile,
        config: CrawlConfig,
    ) -> CrawlService<MockFetcher> {
        let profiles = Arc::new(ProfileResolver::new());
        profiles.register("shop.test", profile);
        CrawlService::new(fetcher, Arc::new(IdentityPool::new(16)), profiles, config)
    }

    fn page_request_count(fetcher: &MockFetcher) -> usize {
        fetcher
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains("page="))
            .count()
    }

    #[test]
    fn page_url_appends_or_extends_query() {
        assert_eq!(page_url("https://a.example/c", 3), "https://a.example/c?page=3");
        assert_eq!(
            page_url("https://a.example/c?sort=asc", 3),
            "https://a.example/c?sort=asc&page=3"
        );
    }

    #[tokio::test]
    async fn rejects_invalid_urls_before_any_network_access() {
        let fetcher = MockFetcher::new();
        let svc = service(fetcher.clone(), instant_profile());
        let err = svc
            .extract("not a url", 10, &PlanLimits::unlimited())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidUrl { .. }));

        let err = svc
            .extract("ftp://shop.test/catalog", 10, &PlanLimits::unlimited())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidUrl { .. }));
        assert_eq!(fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn worker_stops_on_first_empty_page() {
        // Pause-after-2 profile, single worker; pages 0-1 carry products,
        // page 2 is empty, so the chunk ends with exactly pages 0-1.
        let mut profile = instant_profile();
        profile.max_requests_before_pause = 2;
        profile.pause_ms = (1, 2);

        let fetcher = MockFetcher::new()
            .route(
                "https://shop.test/catalog?page=0",
                &product_grid(&[("Leather Tote", "€120"), ("Silk Scarf", "€80")]),
            )
            .route(
                "https://shop.test/catalog?page=1",
                &product_grid(&[("Wool Coat", "€450"), ("Gold Necklace", "€900")]),
            );
        let svc = service(fetcher.clone(), profile);

        let outcome = svc.extract(BASE, 10, &PlanLimits::unlimited()).await.unwrap();

        let names: Vec<&str> = outcome.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            ["Leather Tote", "Silk Scarf", "Wool Coat", "Gold Necklace"]
        );
        assert!(!outcome.truncated);
        // Worker touched pages 0, 1 and the empty page 2, nothing further.
        assert_eq!(page_request_count(&fetcher), 3);
        // One crawl identity plus one recovery identity (4 < 70% of 10).
        assert_eq!(outcome.stats.identities_used, 2);
    }

    #[tokio::test]
    async fn low_yield_triggers_recovery_and_merges_its_records() {
        let forty: Vec<(String, String)> = (0..40)
            .map(|i| (format!("Catalog Piece {i}"), "€100".to_string()))
            .collect();
        let forty_refs: Vec<(&str, &str)> =
            forty.iter().map(|(n, p)| (n.as_str(), p.as_str())).collect();

        let fetcher = MockFetcher::new()
            .route("https://shop.test/catalog?page=0", &product_grid(&forty_refs))
            // Recovery re-reads the base listing and finds one extra item.
            .route(
                BASE,
                &product_grid(&[("Recovery Special", "€75"), ("Catalog Piece 0", "€100")]),
            );
        let svc = service(fetcher, instant_profile());

        let outcome = svc.extract(BASE, 100, &PlanLimits::unlimited()).await.unwrap();

        // 40 crawled + 1 new from recovery; the duplicate merged away.
        assert_eq!(outcome.products.len(), 41);
        assert!(outcome.products.iter().any(|p| p.name == "Recovery Special"));
        assert_eq!(outcome.stats.identities_used, 2);
    }

    #[tokio::test]
    async fn healthy_yield_skips_recovery() {
        let fetcher = MockFetcher::new().route(
            "https://shop.test/catalog?page=0",
            &product_grid(&[
                ("Leather Tote", "€120"),
                ("Silk Scarf", "€80"),
                ("Wool Coat", "€450"),
            ]),
        );
        let svc = service(fetcher, instant_profile());

        let outcome = svc.extract(BASE, 4, &PlanLimits::unlimited()).await.unwrap();
        assert_eq!(outcome.products.len(), 3);
        // No recovery allocation: a single identity did the whole crawl.
        assert_eq!(outcome.stats.identities_used, 1);
    }

    #[tokio::test]
    async fn plan_limits_cap_the_target() {
        let fetcher = MockFetcher::new().route(
            "https://shop.test/catalog?page=0",
            &product_grid(&[
                ("Leather Tote", "€120"),
                ("Silk Scarf", "€80"),
                ("Wool Coat", "€450"),
                ("Gold Necklace", "€900"),
                ("Velvet Sofa", "€1.200"),
            ]),
        );
        let svc = service(fetcher, instant_profile());

        let outcome = svc.extract(BASE, 50, &PlanLimits::new(2)).await.unwrap();
        assert_eq!(outcome.products.len(), 2);
    }

    #[tokio::test]
    async fn zero_yield_is_no_products_found() {
        let svc = service(MockFetcher::new(), instant_profile());
        let err = svc.extract(BASE, 10, &PlanLimits::unlimited()).await.unwrap_err();
        assert!(matches!(err, CrawlError::NoProductsFound));
    }

    #[tokio::test]
    async fn blocked_page_rotates_out_and_stops_the_chain() {
        let fetcher = MockFetcher::new().route(
            "https://shop.test/catalog?page=0",
            "Access Denied. Suspicious activity from your network.",
        );
        let svc = service(fetcher.clone(), instant_profile());

        let err = svc.extract(BASE, 10, &PlanLimits::unlimited()).await.unwrap_err();
        assert!(matches!(err, CrawlError::NoProductsFound));
        // The worker aborted its chain after the blocked page 0.
        assert_eq!(page_request_count(&fetcher), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_with_a_fresh_identity() {
        let fetcher = MockFetcher::new()
            .route_error(
                "https://shop.test/catalog?page=0",
                CrawlError::Http {
                    url: "https://shop.test/catalog?page=0".into(),
                    status: 503,
                },
            )
            .route(
                "https://shop.test/catalog?page=1",
                &product_grid(&[("Silk Scarf", "€80")]),
            );
        let svc = service(fetcher.clone(), instant_profile());

        // Page 0 always 503s; after the bounded retries the worker gives up.
        let err = svc.extract(BASE, 10, &PlanLimits::unlimited()).await.unwrap_err();
        assert!(matches!(err, CrawlError::NoProductsFound));
        // Initial attempt plus two identity-rotated retries.
        assert_eq!(page_request_count(&fetcher), 3);
    }

    #[tokio::test]
    async fn budget_expiry_returns_partial_results_truncated() {
        let mut profile = instant_profile();
        profile.request_delay_ms = (40, 40);

        let fetcher = MockFetcher::new()
            .route(
                "https://shop.test/catalog?page=0",
                &product_grid(&[("Leather Tote", "€120"), ("Silk Scarf", "€80")]),
            )
            .route(
                "https://shop.test/catalog?page=1",
                &product_grid(&[("Wool Coat", "€450")]),
            );
        let config = CrawlConfig::default().with_wall_clock(Duration::from_millis(60));
        let svc = service_with_config(fetcher, profile, config);

        let outcome = svc.extract(BASE, 50, &PlanLimits::unlimited()).await.unwrap();
        assert!(outcome.truncated);
        // Page 0 landed before the budget fired; page 1's delay did not.
        assert_eq!(outcome.products.len(), 2);
    }

    #[tokio::test]
    async fn budget_expiry_with_nothing_is_a_timeout() {
        let mut profile = instant_profile();
        profile.request_delay_ms = (80, 80);
        let config = CrawlConfig::default().with_wall_clock(Duration::from_millis(20));
        let svc = service_with_config(MockFetcher::new(), profile, config);

        let err = svc.extract(BASE, 10, &PlanLimits::unlimited()).await.unwrap_err();
        assert!(matches!(err, CrawlError::Timeout { .. }));
    }

    #[tokio::test]
    async fn bulk_hits_merge_with_crawled_pages() {
        let sitemap = r#"<?xml version="1.0"?>
            <urlset>
              <url><loc>https://shop.test/product/leather-tote-bag</loc></url>
              <url><loc>https://shop.test/product/gold-necklace</loc></url>
            </urlset>"#;
        let fetcher = MockFetcher::new()
            .route("https://shop.test/sitemap.xml", sitemap)
            .route(
                "https://shop.test/catalog?page=0",
                &product_grid(&[("Silk Scarf", "€80")]),
            );
        let svc = service(fetcher, instant_profile());

        let outcome = svc.extract(BASE, 10, &PlanLimits::unlimited()).await.unwrap();
        let names: Vec<&str> = outcome.products.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"Leather Tote Bag"));
        assert!(names.contains(&"Gold Necklace"));
        assert!(names.contains(&"Silk Scarf"));
    }

    #[tokio::test]
    async fn reaching_target_in_bulk_still_caps_output() {
        let sitemap = r#"<?xml version="1.0"?>
            <urlset>
              <url><loc>https://shop.test/product/leather-tote-bag</loc></url>
              <url><loc>https://shop.test/product/gold-necklace</loc></url>
              <url><loc>https://shop.test/product/velvet-sofa</loc></url>
            </urlset>"#;
        let fetcher = MockFetcher::new().route("https://shop.test/sitemap.xml", sitemap);
        let svc = service(fetcher.clone(), instant_profile());

        let outcome = svc.extract(BASE, 2, &PlanLimits::unlimited()).await.unwrap();
        assert_eq!(outcome.products.len(), 2);
        // Target met in bulk: no paged crawling happened at all.
        assert_eq!(page_request_count(&fetcher), 0);
    }
}
