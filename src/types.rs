use std::fmt;

use reqwest::Url;
use serde::Serialize;
use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Errors that end a run. Anything that goes wrong for a single domain is a
/// [`FailureReason`] on its record instead.
#[derive(Error, Debug)]
pub enum LogomatchError {
    #[error("invalid_configuration: {0}")]
    InvalidConfiguration(String),
    #[error("http_client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Why a single HTTP fetch did not produce a usable resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("timeout")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("http error {0}")]
    HttpStatus(u16),
    #[error("invalid content type: {0}")]
    InvalidContentType(String),
    #[error("invalid image")]
    InvalidImage,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("could not decode response body: {0}")]
    Body(String),
}

/// Coarse grouping of [`FetchFailure`]s used by the concurrent fetch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchFailureKind {
    Timeout,
    Connection,
    ClientError,
    ServerError,
    InvalidContentType,
    InvalidImage,
    InvalidUrl,
    TooManyRedirects,
    Body,
}

impl FetchFailureKind {
    pub const COUNT: usize = 9;

    pub const ALL: [FetchFailureKind; FetchFailureKind::COUNT] = [
        FetchFailureKind::Timeout,
        FetchFailureKind::Connection,
        FetchFailureKind::ClientError,
        FetchFailureKind::ServerError,
        FetchFailureKind::InvalidContentType,
        FetchFailureKind::InvalidImage,
        FetchFailureKind::InvalidUrl,
        FetchFailureKind::TooManyRedirects,
        FetchFailureKind::Body,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchFailureKind::Timeout => "timeout",
            FetchFailureKind::Connection => "connection_error",
            FetchFailureKind::ClientError => "http_client_error",
            FetchFailureKind::ServerError => "http_server_error",
            FetchFailureKind::InvalidContentType => "invalid_content_type",
            FetchFailureKind::InvalidImage => "invalid_image",
            FetchFailureKind::InvalidUrl => "invalid_url",
            FetchFailureKind::TooManyRedirects => "too_many_redirects",
            FetchFailureKind::Body => "body_error",
        }
    }
}

impl FetchFailure {
    /// Transient failures: timeouts, connection errors and 5xx responses.
    /// Redirect loops and undecodable bodies answer the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Timeout | FetchFailure::Connection(_) => true,
            FetchFailure::HttpStatus(status) => *status >= 500,
            FetchFailure::InvalidContentType(_)
            | FetchFailure::InvalidImage
            | FetchFailure::InvalidUrl(_)
            | FetchFailure::TooManyRedirects
            | FetchFailure::Body(_) => false,
        }
    }

    pub fn kind(&self) -> FetchFailureKind {
        match self {
            FetchFailure::Timeout => FetchFailureKind::Timeout,
            FetchFailure::Connection(_) => FetchFailureKind::Connection,
            FetchFailure::HttpStatus(status) if *status >= 500 => FetchFailureKind::ServerError,
            FetchFailure::HttpStatus(_) => FetchFailureKind::ClientError,
            FetchFailure::InvalidContentType(_) => FetchFailureKind::InvalidContentType,
            FetchFailure::InvalidImage => FetchFailureKind::InvalidImage,
            FetchFailure::InvalidUrl(_) => FetchFailureKind::InvalidUrl,
            FetchFailure::TooManyRedirects => FetchFailureKind::TooManyRedirects,
            FetchFailure::Body(_) => FetchFailureKind::Body,
        }
    }

    /// Stable label for statistics. HTTP errors keep their status code.
    pub fn label(&self) -> String {
        match self {
            FetchFailure::HttpStatus(status) => format!("http_{}", status),
            other => other.kind().label().to_string(),
        }
    }

    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchFailure::Timeout;
        }
        if e.is_redirect() {
            return FetchFailure::TooManyRedirects;
        }
        if e.is_builder() {
            return FetchFailure::InvalidUrl(e.to_string());
        }
        if e.is_decode() {
            return FetchFailure::Body(e.to_string());
        }
        if let Some(status) = e.status() {
            return FetchFailure::HttpStatus(status.as_u16());
        }
        FetchFailure::Connection(e.to_string())
    }
}

/// Why a downloaded logo could not be turned into a fingerprint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported image format")]
    Unsupported,
    #[error("could not decode image: {0}")]
    Malformed(String),
    #[error("image too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },
    #[error("hashing task failed: {0}")]
    Task(String),
}

impl DecodeError {
    pub fn label(&self) -> &'static str {
        match self {
            DecodeError::Unsupported => "decode_unsupported_format",
            DecodeError::Malformed(_) => "decode_error",
            DecodeError::TooSmall { .. } => "image_too_small",
            DecodeError::Task(_) => "hash_task_failed",
        }
    }
}

/// Terminal failure of a domain record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("no candidates found")]
    NoCandidates,
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchFailure),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("cancelled before processing")]
    Cancelled,
}

impl FailureReason {
    pub fn label(&self) -> String {
        match self {
            FailureReason::NoCandidates => "no_candidates".into(),
            FailureReason::Fetch(f) => f.label(),
            FailureReason::Decode(d) => d.label().into(),
            FailureReason::Cancelled => "cancelled".into(),
        }
    }
}

/// Candidate discovery strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    HtmlHints,
    ConventionalPath,
    Favicon,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::HtmlHints => "html_hints",
            StrategyKind::ConventionalPath => "conventional_path",
            StrategyKind::Favicon => "favicon",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: Url,
    pub strategy: StrategyKind,
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub final_url: Url,
}

pub type FetchResult = Result<FetchedResource, FetchFailure>;

/// Outcome of the pipeline for one input domain. Exactly one of
/// `fingerprint` and `failure` is set.
#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub domain: String,
    pub logo_url: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub failure: Option<FailureReason>,
    pub candidates: usize,
    pub strategy: Option<StrategyKind>,
}

impl DomainRecord {
    pub fn fingerprinted(
        fingerprint: Fingerprint,
        candidates: usize,
        strategy: Option<StrategyKind>,
    ) -> Self {
        DomainRecord {
            domain: fingerprint.domain.clone(),
            logo_url: Some(fingerprint.logo_url.clone()),
            fingerprint: Some(fingerprint),
            failure: None,
            candidates,
            strategy,
        }
    }

    pub fn failed(
        domain: &str,
        logo_url: Option<String>,
        failure: FailureReason,
        candidates: usize,
        strategy: Option<StrategyKind>,
    ) -> Self {
        DomainRecord {
            domain: domain.into(),
            logo_url,
            fingerprint: None,
            failure: Some(failure),
            candidates,
            strategy,
        }
    }

    pub fn cancelled(domain: &str) -> Self {
        Self::failed(domain, None, FailureReason::Cancelled, 0, None)
    }

    pub fn is_fingerprinted(&self) -> bool {
        self.fingerprint.is_some()
    }

    /// Whether the logo bytes made it to the hashing stage.
    pub fn was_downloaded(&self) -> bool {
        self.fingerprint.is_some() || matches!(self.failure, Some(FailureReason::Decode(_)))
    }
}
