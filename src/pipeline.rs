use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::task;

use crate::{
    fetcher::Fetcher,
    fingerprint::{
        Fingerprinter, PerceptualHasher, DEFAULT_MIN_IMAGE_SIZE, DEFAULT_NORMALIZE_SIZE,
    },
    resolver::{CandidateResolver, CandidateStrategy},
    stats::{FetchCounters, RunStatistics},
    types::{Candidate, DecodeError, DomainRecord, FailureReason, LogomatchError, StrategyKind},
    utils::DEFAULT_SCHEMES,
};

pub const DEFAULT_MAX_CANDIDATES: usize = 10;
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

#[derive(Builder, Debug, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct PipelineOptions {
    /// Per request, every attempt gets its own.
    #[builder(default = "Duration::from_secs(8)")]
    pub timeout: Duration,
    #[builder(default = "1")]
    pub max_retries: usize,
    #[builder(default = "Duration::from_millis(500)")]
    pub retry_delay: Duration,
    #[builder(default = "100")]
    pub batch_size: usize,
    /// Ceiling on HTTP requests in flight, and on domains worked on at once.
    #[builder(default = "20")]
    pub max_concurrent: usize,
    #[builder(default = "200")]
    pub hash_chunk_size: usize,
    #[builder(default = "DEFAULT_MAX_CANDIDATES")]
    pub max_candidates: usize,
    /// How many of a domain's candidates are downloaded before giving up.
    #[builder(default = "3")]
    pub max_fetch_candidates: usize,
    #[builder(default = "DEFAULT_MAX_REDIRECTS")]
    pub max_redirects: usize,
    #[builder(default = "self.default_schemes()")]
    pub schemes: Vec<String>,
    #[builder(default = "DEFAULT_MIN_IMAGE_SIZE")]
    pub min_image_size: u32,
    #[builder(default = "DEFAULT_NORMALIZE_SIZE")]
    pub normalize_size: u32,
}

impl PipelineOptions {
    pub fn default_builder() -> PipelineOptionsBuilder {
        PipelineOptionsBuilder::default()
    }
}

impl PipelineOptionsBuilder {
    fn default_schemes(&self) -> Vec<String> {
        DEFAULT_SCHEMES.iter().map(|s| s.to_string()).collect()
    }

    fn validate(&self) -> Result<(), String> {
        let counts = [
            ("batch_size", self.batch_size),
            ("max_concurrent", self.max_concurrent),
            ("hash_chunk_size", self.hash_chunk_size),
            ("max_candidates", self.max_candidates),
            ("max_fetch_candidates", self.max_fetch_candidates),
        ];
        for (name, value) in counts {
            if value == Some(0) {
                return Err(format!("{} must be at least 1", name));
            }
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err("timeout must be greater than zero".into());
        }
        if let Some(schemes) = &self.schemes {
            if schemes.is_empty() {
                return Err("at least one scheme is required".into());
            }
            if let Some(s) = schemes.iter().find(|s| *s != "http" && *s != "https") {
                return Err(format!("unsupported scheme {}", s));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PipelineOutput {
    /// One per input domain, in input order.
    pub records: Vec<DomainRecord>,
    pub statistics: RunStatistics,
}

struct Download {
    domain: String,
    logo_url: String,
    bytes: Vec<u8>,
    candidates: Vec<Candidate>,
    /// Index of the first candidate not yet downloaded.
    next: usize,
}

impl Download {
    fn strategy(&self) -> Option<StrategyKind> {
        self.candidates.first().map(|c| c.strategy)
    }
}

enum Acquisition {
    Downloaded(Download),
    Failed(DomainRecord),
}

/// Drives domains through resolve, download and hash, one batch at a time.
pub struct Pipeline {
    options: PipelineOptions,
    counters: Arc<FetchCounters>,
    fetcher: Arc<Fetcher>,
    resolver: CandidateResolver,
    hasher: Arc<dyn Fingerprinter>,
    should_terminate: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Result<Self, LogomatchError> {
        let counters = Arc::new(FetchCounters::default());
        let fetcher = Arc::new(Fetcher::new(&options, counters.clone())?);
        let resolver = CandidateResolver::new(fetcher.clone(), &options);
        let hasher = Arc::new(PerceptualHasher::new(
            options.normalize_size,
            options.min_image_size,
        ));
        Ok(Pipeline {
            options,
            counters,
            fetcher,
            resolver,
            hasher,
            should_terminate: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn Fingerprinter>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn CandidateStrategy>>) -> Self {
        self.resolver =
            CandidateResolver::with_strategies(self.fetcher.clone(), &self.options, strategies);
        self
    }

    /// Flag checked between batches; once set, the remaining domains are
    /// recorded as cancelled.
    pub fn with_termination_flag(mut self, should_terminate: Arc<AtomicBool>) -> Self {
        self.should_terminate = should_terminate;
        self
    }

    pub async fn run(&self, domains: Vec<String>) -> PipelineOutput {
        let mut statistics = RunStatistics::started();
        let mut records: Vec<DomainRecord> = Vec::with_capacity(domains.len());
        let batch_size = self.options.batch_size;
        let batches = (domains.len() + batch_size - 1) / batch_size;

        info!(
            "processing {} domains in {} batches of up to {}",
            domains.len(),
            batches,
            batch_size
        );

        for (n, batch) in domains.chunks(batch_size).enumerate() {
            if self.should_terminate.load(Ordering::Relaxed) {
                warn!(
                    "termination requested, {} domains left unprocessed",
                    domains.len() - records.len()
                );
                break;
            }
            let batch_records = self.run_batch(batch).await;
            let fingerprinted = batch_records.iter().filter(|r| r.is_fingerprinted()).count();
            for r in batch_records.iter() {
                statistics.record(r);
            }
            records.extend(batch_records);
            info!(
                "batch {}/{} done: {}/{} fingerprinted ({} domains so far)",
                n + 1,
                batches,
                fingerprinted,
                batch.len(),
                records.len()
            );
        }

        for domain in domains[records.len()..].iter() {
            let r = DomainRecord::cancelled(domain);
            statistics.record(&r);
            records.push(r);
        }

        statistics.fetch = self.counters.snapshot();
        statistics.finish();
        PipelineOutput {
            records,
            statistics,
        }
    }

    async fn run_batch(&self, batch: &[String]) -> Vec<DomainRecord> {
        let mut slots: Vec<Option<DomainRecord>> = (0..batch.len()).map(|_| None).collect();
        let mut downloads: Vec<(usize, Download)> = Vec::new();

        let mut stream = tokio_stream::iter(batch.iter().enumerate())
            .map(|(i, domain)| async move { (i, self.acquire(domain).await) })
            .buffer_unordered(self.options.max_concurrent);
        while let Some((i, acquisition)) = stream.next().await {
            match acquisition {
                Acquisition::Downloaded(d) => downloads.push((i, d)),
                Acquisition::Failed(r) => slots[i] = Some(r),
            }
        }

        // Logos that fail to decode send their domain back for its next
        // candidate, until one hashes or the candidates run out.
        while !downloads.is_empty() {
            let undecodable = self.hash_downloads(downloads, &mut slots).await;
            downloads = Vec::new();
            let mut stream = tokio_stream::iter(undecodable)
                .map(|(i, d, e)| async move {
                    (i, self.download_after_decode_failure(d, e).await)
                })
                .buffer_unordered(self.options.max_concurrent);
            while let Some((i, acquisition)) = stream.next().await {
                match acquisition {
                    Acquisition::Downloaded(d) => downloads.push((i, d)),
                    Acquisition::Failed(r) => slots[i] = Some(r),
                }
            }
        }

        slots
            .into_iter()
            .zip(batch)
            .map(|(slot, domain)| slot.unwrap_or_else(|| DomainRecord::cancelled(domain)))
            .collect()
    }

    /// Hashes `downloads` at most `hash_chunk_size` at a time, filling
    /// `slots` with the results. Decode failures of domains that still have
    /// untried candidates are handed back instead.
    async fn hash_downloads(
        &self,
        downloads: Vec<(usize, Download)>,
        slots: &mut [Option<DomainRecord>],
    ) -> Vec<(usize, Download, DecodeError)> {
        let mut undecodable = Vec::new();
        let mut pending = downloads.into_iter();
        loop {
            let chunk: Vec<(usize, Download)> =
                pending.by_ref().take(self.options.hash_chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let mut jobs = Vec::with_capacity(chunk.len());
            for (i, mut d) in chunk {
                let bytes = std::mem::take(&mut d.bytes);
                let hasher = self.hasher.clone();
                jobs.push((i, d, task::spawn_blocking(move || hasher.digest(&bytes))));
            }
            for (i, d, job) in jobs {
                let digest = match job.await {
                    Ok(res) => res,
                    Err(e) => Err(DecodeError::Task(e.to_string())),
                };
                match digest {
                    Ok(digest) => {
                        let strategy = d.strategy();
                        slots[i] = Some(DomainRecord::fingerprinted(
                            digest.into_fingerprint(&d.domain, &d.logo_url),
                            d.candidates.len(),
                            strategy,
                        ));
                    }
                    Err(e) => {
                        debug!("{}: could not fingerprint {}: {}", d.domain, d.logo_url, e);
                        if d.next < self.fetch_limit(&d.candidates) {
                            undecodable.push((i, d, e));
                        } else {
                            let strategy = d.strategy();
                            slots[i] = Some(DomainRecord::failed(
                                &d.domain,
                                Some(d.logo_url),
                                FailureReason::Decode(e),
                                d.candidates.len(),
                                strategy,
                            ));
                        }
                    }
                }
            }
        }
        undecodable
    }

    fn fetch_limit(&self, candidates: &[Candidate]) -> usize {
        self.options.max_fetch_candidates.min(candidates.len())
    }

    /// Resolves the domain's candidates and downloads the first one that
    /// turns out to be an image.
    async fn acquire(&self, domain: &str) -> Acquisition {
        let candidates = match self.resolver.resolve(domain).await {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("{}: {}", domain, e);
                return Acquisition::Failed(DomainRecord::failed(
                    domain,
                    None,
                    FailureReason::Fetch(e),
                    0,
                    None,
                ));
            }
        };
        self.download_from(domain, candidates, 0, None).await
    }

    async fn download_after_decode_failure(&self, d: Download, e: DecodeError) -> Acquisition {
        let Download {
            domain,
            logo_url,
            candidates,
            next,
            ..
        } = d;
        let failed = Some((logo_url, FailureReason::Decode(e)));
        self.download_from(&domain, candidates, next, failed).await
    }

    /// Downloads candidates from index `start` on until one is an image. When
    /// none is, the record keeps the last failure and the URL it came from.
    async fn download_from(
        &self,
        domain: &str,
        candidates: Vec<Candidate>,
        start: usize,
        mut last_failure: Option<(String, FailureReason)>,
    ) -> Acquisition {
        for idx in start..self.fetch_limit(&candidates) {
            let url = candidates[idx].url.clone();
            let res = self.fetcher.fetch_image(&url).await;
            match res {
                Ok(resource) => {
                    return Acquisition::Downloaded(Download {
                        domain: domain.into(),
                        logo_url: url.to_string(),
                        bytes: resource.bytes,
                        candidates,
                        next: idx + 1,
                    })
                }
                Err(e) => last_failure = Some((url.to_string(), FailureReason::Fetch(e))),
            }
        }

        let strategy = candidates.first().map(|c| c.strategy);
        let record = match last_failure {
            Some((url, failure)) => {
                DomainRecord::failed(domain, Some(url), failure, candidates.len(), strategy)
            }
            None => DomainRecord::failed(domain, None, FailureReason::NoCandidates, 0, None),
        };
        debug!(
            "{}: no logo ({})",
            domain,
            record
                .failure
                .as_ref()
                .map(|f| f.label())
                .unwrap_or_default()
        );
        Acquisition::Failed(record)
    }
}
