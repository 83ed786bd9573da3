use std::{fs, path::Path};

use anyhow::{bail, Context};
use serde_json::Value;

use crate::utils::clean_domain;

/// Reads the domain list at `path`; the extension picks the format. Order and
/// duplicates are kept.
pub fn read_domains(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("could not read input file {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    let domains = match extension.as_deref() {
        Some("csv") => parse_csv(&content),
        Some("json") => parse_json(&content),
        Some("parquet") => bail!(
            "parquet input is not supported, export the domain column to csv or json: {}",
            path.display()
        ),
        _ => Ok(parse_lines(&content)),
    }
    .with_context(|| format!("could not parse input file {}", path.display()))?;

    info!("read {} domains from {}", domains.len(), path.display());
    Ok(domains)
}

/// Uses the `domain` column when the first row has a cell named exactly
/// that, otherwise the first field of every row.
pub fn parse_csv(content: &str) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());
    let mut records = reader.records();
    let first = match records.next() {
        Some(record) => record?,
        None => return Ok(vec![]),
    };

    let header = first
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("domain"));
    let mut domains = vec![];
    let idx = match header {
        Some(idx) => idx,
        None => {
            domains.extend(first.get(0).and_then(clean_domain));
            0
        }
    };
    for record in records {
        if let Some(domain) = record?.get(idx).and_then(clean_domain) {
            domains.push(domain);
        }
    }
    Ok(domains)
}

pub fn parse_json(content: &str) -> anyhow::Result<Vec<String>> {
    let value: Value = serde_json::from_str(content)?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("domains") {
            Some(Value::Array(items)) => items,
            Some(_) => bail!("domains must be an array"),
            None => bail!("json object has no domains array"),
        },
        _ => bail!("expected an array of domains or an object with a domains array"),
    };

    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj.get("domain").and_then(|v| v.as_str()),
            _ => None,
        })
        .filter_map(clean_domain)
        .collect())
}

pub fn parse_lines(content: &str) -> Vec<String> {
    content.lines().filter_map(clean_domain).collect()
}
