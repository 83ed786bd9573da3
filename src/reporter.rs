use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Serialize;

use crate::{
    cluster::Cluster,
    fingerprint::HashAlgorithm,
    stats::RunStatistics,
    types::DomainRecord,
};

pub const CLUSTERS_JSON: &str = "clusters.json";
pub const CLUSTERS_CSV: &str = "clusters.csv";
pub const DOMAINS_CSV: &str = "domains.csv";
pub const STATISTICS_JSON: &str = "statistics.json";

const UNCLUSTERED: &str = "unclustered";
const CLUSTERS_CSV_HEADER: [&str; 4] = ["cluster_id", "domain", "logo_url", "cluster_size"];
const DOMAINS_CSV_HEADER: [&str; 4] = ["domain", "cluster_id", "logo_url", "failure"];

#[derive(Debug, Serialize)]
struct ClusterSummary<'a> {
    cluster_id: usize,
    size: usize,
    domains: &'a [String],
    representative: &'a str,
    phash: String,
}

#[derive(Debug, Serialize)]
struct ClusterRow<'a> {
    cluster_id: usize,
    domain: &'a str,
    logo_url: &'a str,
    cluster_size: usize,
}

#[derive(Debug, Serialize)]
struct DomainRow<'a> {
    domain: &'a str,
    cluster_id: String,
    logo_url: &'a str,
    failure: String,
}

/// Writes the run's results as JSON and CSV files into one directory.
pub struct Reporter {
    dir: PathBuf,
}

impl Reporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Reporter { dir: dir.into() }
    }

    pub fn write(
        &self,
        records: &[DomainRecord],
        clusters: &[Cluster],
        statistics: &RunStatistics,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("could not create {}", self.dir.display()))?;

        self.write_clusters_json(clusters)?;
        self.write_clusters_csv(records, clusters)?;
        self.write_domains_csv(records, clusters)?;
        self.write_json(STATISTICS_JSON, statistics)?;

        info!(
            "wrote {} clusters for {} domains to {}",
            clusters.len(),
            records.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn write_clusters_json(&self, clusters: &[Cluster]) -> anyhow::Result<()> {
        let summaries: Vec<ClusterSummary> = clusters
            .iter()
            .map(|c| ClusterSummary {
                cluster_id: c.id,
                size: c.size(),
                domains: &c.domains,
                representative: &c.representative,
                phash: c.representative_hashes.hex(HashAlgorithm::Perceptual),
            })
            .collect();
        self.write_json(CLUSTERS_JSON, &summaries)
    }

    fn write_clusters_csv(
        &self,
        records: &[DomainRecord],
        clusters: &[Cluster],
    ) -> anyhow::Result<()> {
        let mut w = csv_writer(&self.dir.join(CLUSTERS_CSV), &CLUSTERS_CSV_HEADER)?;
        for c in clusters {
            for &m in c.members.iter() {
                let r = &records[m];
                w.serialize(ClusterRow {
                    cluster_id: c.id,
                    domain: &r.domain,
                    logo_url: r.logo_url.as_deref().unwrap_or_default(),
                    cluster_size: c.size(),
                })?;
            }
        }
        w.flush()?;
        Ok(())
    }

    fn write_domains_csv(
        &self,
        records: &[DomainRecord],
        clusters: &[Cluster],
    ) -> anyhow::Result<()> {
        let mut cluster_of = vec![None; records.len()];
        for c in clusters {
            for &m in c.members.iter() {
                cluster_of[m] = Some(c.id);
            }
        }

        let mut w = csv_writer(&self.dir.join(DOMAINS_CSV), &DOMAINS_CSV_HEADER)?;
        for (r, cluster) in records.iter().zip(cluster_of) {
            w.serialize(DomainRow {
                domain: &r.domain,
                cluster_id: cluster
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| UNCLUSTERED.to_string()),
                logo_url: r.logo_url.as_deref().unwrap_or_default(),
                failure: r.failure.as_ref().map(|f| f.label()).unwrap_or_default(),
            })?;
        }
        w.flush()?;
        Ok(())
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("could not write {}", path.display()))?;
        Ok(())
    }
}

/// Header rows are written up front so a report with no rows still has one.
fn csv_writer(path: &Path, header: &[&str]) -> anyhow::Result<csv::Writer<fs::File>> {
    let mut w = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("could not create {}", path.display()))?;
    w.write_record(header)?;
    Ok(w)
}
