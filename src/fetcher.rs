use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use reqwest::{
    header::{self, CONTENT_TYPE},
    redirect::Policy,
    Client, Method, RequestBuilder, Url,
};
use tokio::sync::Semaphore;

use crate::{
    pipeline::PipelineOptions,
    retry::RetryPolicy,
    stats::FetchCounters,
    types::{FetchFailure, FetchResult, FetchedResource, LogomatchError},
    utils::{is_image_content_type, random_user_agent, ACCEPT, ACCEPT_LANGUAGE},
};

/// Process-wide HTTP worker pool.
///
/// Every attempt holds one permit of a shared semaphore while it is on the
/// wire, so at most `max_concurrent` requests are in flight no matter how many
/// domains are being worked on. Permits are released before the retry delay.
pub struct Fetcher {
    client: Client,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    retry: RetryPolicy<FetchFailure>,
    counters: Arc<FetchCounters>,
}

impl Fetcher {
    pub fn new(
        options: &PipelineOptions,
        counters: Arc<FetchCounters>,
    ) -> Result<Self, LogomatchError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.timeout)
            .redirect(Policy::limited(options.max_redirects))
            .pool_max_idle_per_host(options.max_concurrent)
            .gzip(true)
            .build()?;

        Ok(Fetcher {
            client,
            permits: Arc::new(Semaphore::new(options.max_concurrent)),
            max_concurrent: options.max_concurrent,
            retry: RetryPolicy::for_fetches(options.max_retries, options.retry_delay),
            counters,
        })
    }

    pub fn counters(&self) -> Arc<FetchCounters> {
        self.counters.clone()
    }

    /// Requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// GET with timeout and retry; any 2xx body is a success.
    pub async fn fetch(&self, url: &Url) -> FetchResult {
        self.with_retry(url, || self.get_once(url)).await
    }

    /// [`Fetcher::fetch`] followed by a check that the body is an image.
    pub async fn fetch_image(&self, url: &Url) -> FetchResult {
        let res = match self.fetch(url).await {
            Ok(resource) => validate_image(resource),
            Err(e) => Err(e),
        };
        match &res {
            Ok(resource) => {
                debug!(
                    "fetched image {} ({} bytes, {:?})",
                    url,
                    resource.bytes.len(),
                    resource.content_type
                );
                self.counters.record_image_success();
            }
            Err(e) => {
                debug!("image fetch of {} failed: {}", url, e);
                self.counters.record_image_failure(e);
            }
        }
        res
    }

    /// Fetches an HTML page, returning its text and the URL it ended on.
    pub async fn fetch_page(&self, url: &Url) -> Result<(String, Url), FetchFailure> {
        let resource = self.fetch(url).await?;
        let html = String::from_utf8_lossy(&resource.bytes).into_owned();
        Ok((html, resource.final_url))
    }

    /// HEAD existence check: true for a 2xx answer with an image content type.
    /// Failures of any kind only mean "not here".
    pub async fn probe(&self, url: &Url) -> bool {
        match self.with_retry(url, || self.head_once(url)).await {
            Ok(Some(content_type)) => is_image_content_type(&content_type),
            Ok(None) => false,
            Err(e) => {
                debug!("probe of {} failed: {}", url, e);
                false
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, url: &Url, op: F) -> Result<T, FetchFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchFailure>>,
    {
        let attempts = AtomicUsize::new(0);
        let res = self
            .retry
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n > 0 {
                    warn!(
                        "retrying {} ({} of {} retries)",
                        url,
                        n,
                        self.retry.max_retries()
                    );
                }
                op()
            })
            .await;
        self.counters.record_attempts(attempts.into_inner());
        res
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        self.client
            .request(method, url.clone())
            .header(header::USER_AGENT, random_user_agent())
            .header(header::ACCEPT, ACCEPT)
            .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
    }

    async fn get_once(&self, url: &Url) -> FetchResult {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchFailure::Connection("fetch pool closed".into()))?;

        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().clone();
        let content_type = header_content_type(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        Ok(FetchedResource {
            bytes: bytes.to_vec(),
            content_type,
            final_url,
        })
    }

    async fn head_once(&self, url: &Url) -> Result<Option<String>, FetchFailure> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchFailure::Connection("fetch pool closed".into()))?;

        let response = self
            .request(Method::HEAD, url)
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchFailure::HttpStatus(status.as_u16()));
        }
        if !status.is_success() {
            return Ok(None);
        }
        Ok(header_content_type(response.headers()))
    }
}

fn header_content_type(headers: &header::HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Accepts a download only when its magic bytes name a format this build can
/// decode. Anything else (SVG, HTML error pages, unknown blobs) is rejected so
/// the next candidate gets a chance.
pub fn validate_image(resource: FetchedResource) -> FetchResult {
    if resource.bytes.is_empty() {
        return Err(FetchFailure::InvalidImage);
    }
    let decodable = image::guess_format(&resource.bytes)
        .map(|format| format.reading_enabled())
        .unwrap_or(false);
    if decodable {
        return Ok(resource);
    }
    match resource.content_type {
        Some(content_type) if !is_image_content_type(&content_type) => {
            Err(FetchFailure::InvalidContentType(content_type))
        }
        _ => Err(FetchFailure::InvalidImage),
    }
}
