use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use logomatch::{
    cluster::{Clusterer, EXACT_MATCH_THRESHOLD, NEAR_DUPLICATE_THRESHOLD, SIMILAR_THRESHOLD},
    fingerprint::DistancePolicy,
    input::read_domains,
    pipeline::{Pipeline, PipelineOptions},
    reporter::Reporter,
};
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Tolerance {
    Exact,
    NearDuplicate,
    Similar,
}

impl Tolerance {
    fn threshold(&self) -> u32 {
        match self {
            Tolerance::Exact => EXACT_MATCH_THRESHOLD,
            Tolerance::NearDuplicate => NEAR_DUPLICATE_THRESHOLD,
            Tolerance::Similar => SIMILAR_THRESHOLD,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Groups domains by the visual similarity of their logos", long_about = None)]
struct Args {
    /// Domain list: .csv, .json or one domain per line
    input: PathBuf,
    /// Directory the reports are written to
    #[arg(short = 'o', long, default_value = "output")]
    output: PathBuf,
    /// Per-request timeout in seconds
    #[arg(short = 't', long, default_value_t = 8)]
    timeout: u64,
    /// Number of retries for timeouts, connection errors and 5xx responses
    #[arg(short = 'r', long, default_value_t = 1)]
    retries: usize,
    /// Delay between attempts in milliseconds
    #[arg(long, default_value_t = 500)]
    retry_delay_ms: u64,
    /// Domains per batch
    #[arg(short = 'b', long, default_value_t = 100)]
    batch_size: usize,
    /// Maximum number of HTTP requests in flight
    #[arg(short = 'c', long, default_value_t = 20)]
    max_concurrent: usize,
    /// Maximum number of images decoded and hashed at once
    #[arg(long, default_value_t = 200)]
    hash_chunk_size: usize,
    /// Candidates downloaded per domain before giving up
    #[arg(long, default_value_t = 3)]
    max_fetch_candidates: usize,
    /// Images smaller than this many pixels on a side are rejected
    #[arg(long, default_value_t = 16)]
    min_image_size: u32,
    /// Clustering tolerance preset
    #[arg(long, value_enum, default_value_t = Tolerance::NearDuplicate)]
    tolerance: Tolerance,
    /// Explicit distance threshold, overrides --tolerance
    #[arg(long)]
    threshold: Option<u32>,
    /// phash, dhash, ahash, whash, sum or max
    #[arg(short = 'd', long, default_value = "phash")]
    distance: DistancePolicy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("starting with {:#?}", args);

    let threshold = args.threshold.unwrap_or_else(|| args.tolerance.threshold());
    if threshold > args.distance.max_distance() {
        return Err(anyhow!(
            "threshold {} is above the largest possible {} distance ({})",
            threshold,
            args.distance,
            args.distance.max_distance()
        ));
    }

    let options = PipelineOptions::default_builder()
        .timeout(Duration::from_secs(args.timeout))
        .max_retries(args.retries)
        .retry_delay(Duration::from_millis(args.retry_delay_ms))
        .batch_size(args.batch_size)
        .max_concurrent(args.max_concurrent)
        .hash_chunk_size(args.hash_chunk_size)
        .max_fetch_candidates(args.max_fetch_candidates)
        .min_image_size(args.min_image_size)
        .build()
        .context("invalid configuration")?;

    let domains = read_domains(&args.input)?;

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let pipeline = Pipeline::new(options)?.with_termination_flag(should_terminate);
    let mut output = pipeline.run(domains).await;

    let clusters = Clusterer::new(threshold, args.distance).cluster_records(&output.records);
    output.statistics.record_clusters(&clusters);

    Reporter::new(&args.output).write(&output.records, &clusters, &output.statistics)?;

    let s = &output.statistics;
    info!(
        "{} domains, {} fingerprinted, {} failed, {} clusters ({} singletons, largest {})",
        s.domains_total,
        s.fingerprints_computed,
        s.domains_failed(),
        s.clusters_formed,
        s.singleton_clusters,
        s.largest_cluster
    );
    info!(
        "{} requests, {} retries, {} of {} image downloads succeeded",
        s.fetch.requests, s.fetch.retries, s.fetch.image_successes, s.fetch.image_fetches
    );

    Ok(())
}
