use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    cluster::Cluster,
    types::{DomainRecord, FetchFailure, FetchFailureKind},
};

/// Fetch-level counters, bumped concurrently by every in-flight request.
#[derive(Debug, Default)]
pub struct FetchCounters {
    requests: AtomicUsize,
    retries: AtomicUsize,
    image_fetches: AtomicUsize,
    image_successes: AtomicUsize,
    failures: [AtomicUsize; FetchFailureKind::COUNT],
}

impl FetchCounters {
    /// One logical fetch that took `attempts` HTTP requests.
    pub fn record_attempts(&self, attempts: usize) {
        self.requests.fetch_add(attempts, Ordering::Relaxed);
        self.retries
            .fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
    }

    pub fn record_image_success(&self) {
        self.image_fetches.fetch_add(1, Ordering::Relaxed);
        self.image_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image_failure(&self, failure: &FetchFailure) {
        self.image_fetches.fetch_add(1, Ordering::Relaxed);
        self.failures[failure.kind().index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FetchStatistics {
        let failures = FetchFailureKind::ALL
            .iter()
            .filter_map(|kind| {
                let n = self.failures[kind.index()].load(Ordering::Relaxed);
                (n > 0).then(|| (kind.label().to_string(), n))
            })
            .collect();
        FetchStatistics {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            image_fetches: self.image_fetches.load(Ordering::Relaxed),
            image_successes: self.image_successes.load(Ordering::Relaxed),
            image_failures: failures,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStatistics {
    /// Every HTTP request sent, page fetches and probes included.
    pub requests: usize,
    pub retries: usize,
    pub image_fetches: usize,
    pub image_successes: usize,
    pub image_failures: BTreeMap<String, usize>,
}

/// Summary of a whole run. Per-domain outcomes are folded in by the pipeline
/// coordinator, which is the only writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub domains_total: usize,
    pub domains_with_candidates: usize,
    pub candidates_resolved: usize,
    pub candidates_by_strategy: BTreeMap<String, usize>,
    pub logos_downloaded: usize,
    pub fingerprints_computed: usize,
    pub domain_failures: BTreeMap<String, usize>,
    pub fetch: FetchStatistics,
    pub clusters_formed: usize,
    pub singleton_clusters: usize,
    pub largest_cluster: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatistics {
    pub fn started() -> Self {
        RunStatistics {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn record(&mut self, record: &DomainRecord) {
        self.domains_total += 1;
        if record.candidates > 0 {
            self.domains_with_candidates += 1;
            self.candidates_resolved += record.candidates;
            if let Some(strategy) = record.strategy {
                *self
                    .candidates_by_strategy
                    .entry(strategy.to_string())
                    .or_insert(0) += 1;
            }
        }
        if record.was_downloaded() {
            self.logos_downloaded += 1;
        }
        if record.is_fingerprinted() {
            self.fingerprints_computed += 1;
        }
        if let Some(failure) = &record.failure {
            *self.domain_failures.entry(failure.label()).or_insert(0) += 1;
        }
    }

    pub fn record_clusters(&mut self, clusters: &[Cluster]) {
        self.clusters_formed = clusters.len();
        self.singleton_clusters = clusters.iter().filter(|c| c.is_singleton()).count();
        self.largest_cluster = clusters.iter().map(|c| c.size()).max().unwrap_or(0);
    }

    pub fn domains_failed(&self) -> usize {
        self.domain_failures.values().sum()
    }
}
