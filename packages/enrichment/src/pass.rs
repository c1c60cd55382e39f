//! Batch enrichment pass over a parcel set.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{StreamExt, stream};
use parcel_map_config::{EnrichmentConfig, ScoringConfig};
use parcel_map_geometry::morton::morton_key;
use parcel_map_parcel_models::{Enrichment, Parcel};
use parcel_map_progress::ProgressCallback;

use crate::{AddressPointSource, EnrichmentError, Matcher, Throttle};

/// Outcome counts for one enrichment pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Parcels without a site address that were handed to a batch.
    pub processed: usize,
    /// Parcels that received a site address.
    pub updated: usize,
    /// Parcels with no matching address point.
    pub not_found: usize,
    /// Parcels left alone because they already had a site address.
    pub skipped: usize,
    /// Parcels whose batch lookup failed.
    pub errored: usize,
    /// Batches whose lookup failed.
    pub failed_batches: usize,
}

impl fmt::Display for EnrichmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, updated {}, not found {}, skipped {}, errored {} ({} failed batches)",
            self.processed,
            self.updated,
            self.not_found,
            self.skipped,
            self.errored,
            self.failed_batches
        )
    }
}

struct BatchOutcome {
    matched: Vec<(usize, Parcel)>,
    not_found: usize,
    skipped: usize,
    errored: usize,
    failed: bool,
}

/// Fills missing site addresses from an [`AddressPointSource`].
///
/// Parcels are sorted along a Z-order curve of their centroids and cut
/// into batches, so each batch covers a compact area. Each batch waits for
/// a throttle slot, fetches every candidate point inside the batch's
/// envelope (grown by the proximity tolerance) in one lookup, and matches
/// its parcels against them. Up to `concurrency` batches are in flight. A
/// failed lookup is logged, counted, and delays later batches; it never
/// aborts the pass.
pub struct EnrichmentPass {
    source: Arc<dyn AddressPointSource>,
    matcher: Matcher,
    throttle: Throttle,
    batch_size: usize,
    concurrency: usize,
    failure_backoff: Duration,
    source_tag: String,
    max_parcels: Option<usize>,
}

impl EnrichmentPass {
    /// Creates a pass against `source` using the `[enrichment]` settings.
    #[must_use]
    pub fn new(
        source: Arc<dyn AddressPointSource>,
        config: &EnrichmentConfig,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            source,
            matcher: Matcher::new(config.proximity_tolerance_degrees, scoring),
            throttle: Throttle::new(Duration::from_millis(config.batch_delay_ms)),
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            failure_backoff: Duration::from_millis(config.failure_backoff_ms),
            source_tag: config.source_tag.clone(),
            max_parcels: None,
        }
    }

    /// Stops after `max` parcels without a site address have been tried.
    #[must_use]
    pub const fn with_max_parcels(mut self, max: Option<usize>) -> Self {
        self.max_parcels = max;
        self
    }

    /// Runs the pass, writing matches back into `parcels`.
    pub async fn run(
        &self,
        parcels: &mut [Parcel],
        progress: &Arc<dyn ProgressCallback>,
    ) -> EnrichmentReport {
        let stamp = Enrichment {
            enriched_at: Utc::now(),
            source: self.source_tag.clone(),
        };

        let mut report = EnrichmentReport::default();
        let mut targets = Vec::new();
        for (i, parcel) in parcels.iter().enumerate() {
            if parcel.attributes.has_site_address() {
                report.skipped += 1;
            } else {
                targets.push(i);
            }
        }
        if let Some(max) = self.max_parcels {
            targets.truncate(max);
        }
        targets.sort_by_key(|&i| morton_key(parcels[i].centroid));
        report.processed = targets.len();

        log::info!(
            "Enriching {} parcels from {} ({} already have a site address)",
            targets.len(),
            self.source.name(),
            report.skipped
        );
        progress.set_total(targets.len() as u64);
        progress.set_message(format!("Matching against {}", self.source.name()));

        let outcomes: Vec<BatchOutcome> = {
            let snapshot: &[Parcel] = parcels;
            stream::iter(targets.chunks(self.batch_size).enumerate())
                .map(|(n, batch)| self.run_batch(snapshot, n, batch, &stamp, progress))
                .buffer_unordered(self.concurrency)
                .collect()
                .await
        };

        for outcome in outcomes {
            report.updated += outcome.matched.len();
            report.not_found += outcome.not_found;
            report.skipped += outcome.skipped;
            report.errored += outcome.errored;
            if outcome.failed {
                report.failed_batches += 1;
            }
            for (i, parcel) in outcome.matched {
                parcels[i] = parcel;
            }
        }

        log::info!("Enrichment complete: {report}");
        progress.finish(format!("Enrichment complete: {report}"));

        report
    }

    async fn run_batch(
        &self,
        parcels: &[Parcel],
        n: usize,
        batch: &[usize],
        stamp: &Enrichment,
        progress: &Arc<dyn ProgressCallback>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            matched: Vec::new(),
            not_found: 0,
            skipped: 0,
            errored: 0,
            failed: false,
        };

        let Some(envelope) = batch
            .iter()
            .map(|&i| parcels[i].bbox)
            .reduce(|a, b| a.union(&b))
        else {
            return outcome;
        };

        self.throttle.acquire().await;

        let candidates = match self
            .source
            .points_within(&envelope.expand(self.matcher.tolerance()))
            .await
        {
            Ok(points) => points,
            Err(e) => {
                log::error!("Batch {n} ({} parcels) failed: {e}", batch.len());
                self.throttle.penalize(self.failure_backoff).await;
                outcome.errored = batch.len();
                outcome.failed = true;
                progress.inc(batch.len() as u64);
                return outcome;
            }
        };

        log::debug!("Batch {n}: {} candidate points", candidates.len());

        for &i in batch {
            match self.matcher.match_parcel(&parcels[i], &candidates, stamp) {
                Ok(Some(enriched)) => outcome.matched.push((i, enriched)),
                Ok(None) => outcome.not_found += 1,
                Err(e @ EnrichmentError::TargetAlreadyPopulated { .. }) => {
                    log::debug!("{e}");
                    outcome.skipped += 1;
                }
                Err(e) => {
                    log::warn!("Parcel {}: {e}", parcels[i].id);
                    outcome.errored += 1;
                }
            }
        }

        progress.inc(batch.len() as u64);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parcel_map_parcel_models::{AddressPoint, BoundingBox, SiteAddress};
    use parcel_map_progress::null_progress;

    use super::*;
    use crate::AddressPointIndex;
    use crate::matcher::tests::{address, square};

    /// Fails any lookup whose rectangle spans `fail_lng`.
    struct FlakySource {
        inner: AddressPointIndex,
        fail_lng: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AddressPointSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn points_within(
            &self,
            bbox: &BoundingBox,
        ) -> Result<Vec<AddressPoint>, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if bbox.west <= self.fail_lng && bbox.east >= self.fail_lng {
                return Err(EnrichmentError::EnrichmentSourceUnavailable {
                    source_name: "flaky".to_string(),
                    message: "503 Service Unavailable".to_string(),
                });
            }
            Ok(self.inner.within(bbox))
        }
    }

    fn lng(i: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let i = i as f64;
        0.02f64.mul_add(i, -97.80)
    }

    /// Seven parcels in a row; the first already has a site address and
    /// the last has no point inside it.
    fn fixture() -> (Vec<Parcel>, Arc<FlakySource>) {
        let mut parcels: Vec<Parcel> = (0..7)
            .map(|i| square(&format!("p{i}"), lng(i), 30.27))
            .collect();
        parcels[0].attributes.site = Some(SiteAddress {
            address: "1 EXISTING WAY".to_string(),
            city: None,
            state: None,
            zip: None,
        });

        let points = (0..6)
            .map(|i| address(lng(i) + 0.0005, 30.2705, &format!("{i} POINT ST")))
            .collect();

        let source = Arc::new(FlakySource {
            inner: AddressPointIndex::new("points", points),
            fail_lng: -97.73,
            calls: AtomicUsize::new(0),
        });
        (parcels, source)
    }

    fn config() -> EnrichmentConfig {
        EnrichmentConfig {
            batch_size: 2,
            ..EnrichmentConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_counted_and_pass_completes() {
        let (mut parcels, source) = fixture();
        let pass = EnrichmentPass::new(source.clone(), &config(), ScoringConfig::default());

        let report = pass.run(&mut parcels, &null_progress()).await;

        assert_eq!(
            report,
            EnrichmentReport {
                processed: 6,
                updated: 3,
                not_found: 1,
                skipped: 1,
                errored: 2,
                failed_batches: 1,
            }
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        let site = |i: usize| parcels[i].attributes.site.as_ref().map(|s| s.address.as_str());
        assert_eq!(site(0), Some("1 EXISTING WAY"));
        assert_eq!(site(1), Some("1 POINT ST"));
        assert_eq!(site(2), Some("2 POINT ST"));
        assert_eq!(site(3), None);
        assert_eq!(site(4), None);
        assert_eq!(site(5), Some("5 POINT ST"));
        assert_eq!(site(6), None);

        let stamp = parcels[1].attributes.enrichment.as_ref().unwrap();
        assert_eq!(stamp.source, "ADDRESS_POINTS");
        assert!(parcels[0].attributes.enrichment.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn max_parcels_limits_the_run() {
        let (mut parcels, source) = fixture();
        let pass = EnrichmentPass::new(source.clone(), &config(), ScoringConfig::default())
            .with_max_parcels(Some(2));

        let report = pass.run(&mut parcels, &null_progress()).await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.updated, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(parcels[5].attributes.site.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn second_pass_leaves_enriched_parcels_alone() {
        let (mut parcels, source) = fixture();
        let pass = EnrichmentPass::new(source, &config(), ScoringConfig::default());

        pass.run(&mut parcels, &null_progress()).await;
        let first_stamp = parcels[1].attributes.enrichment.clone();
        let report = pass.run(&mut parcels, &null_progress()).await;

        assert_eq!(report.skipped, 4);
        assert_eq!(report.processed, 3);
        assert_eq!(report.updated, 0);
        assert_eq!(parcels[1].attributes.enrichment, first_stamp);
    }

    /// Records every lookup rectangle.
    struct RecordingSource {
        inner: AddressPointIndex,
        lookups: Mutex<Vec<BoundingBox>>,
    }

    #[async_trait]
    impl AddressPointSource for RecordingSource {
        fn name(&self) -> &str {
            "recording"
        }

        async fn points_within(
            &self,
            bbox: &BoundingBox,
        ) -> Result<Vec<AddressPoint>, EnrichmentError> {
            self.lookups.lock().unwrap().push(*bbox);
            Ok(self.inner.within(bbox))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batches_group_nearby_parcels_regardless_of_input_order() {
        // Input alternates between Austin and Dallas.
        let mut parcels = Vec::new();
        let mut points = Vec::new();
        for i in 0..4_u32 {
            let (lng, lat) = if i % 2 == 0 {
                (f64::from(i).mul_add(0.01, -97.74), 30.27)
            } else {
                (f64::from(i).mul_add(0.01, -96.80), 32.78)
            };
            parcels.push(square(&format!("p{i}"), lng, lat));
            points.push(address(lng + 0.0005, lat + 0.0005, &format!("{i} POINT ST")));
        }

        let source = Arc::new(RecordingSource {
            inner: AddressPointIndex::new("points", points),
            lookups: Mutex::new(Vec::new()),
        });
        let pass = EnrichmentPass::new(source.clone(), &config(), ScoringConfig::default());

        let report = pass.run(&mut parcels, &null_progress()).await;
        assert_eq!(report.updated, 4);

        let lookups = source.lookups.lock().unwrap();
        assert_eq!(lookups.len(), 2);
        assert!(
            lookups.iter().all(|b| b.width() < 0.1 && b.height() < 0.1),
            "{lookups:?}"
        );

        for (i, parcel) in parcels.iter().enumerate() {
            let site = parcel.attributes.site.as_ref().unwrap();
            assert_eq!(site.address, format!("{i} POINT ST"));
        }
    }
}
