use std::{
    collections::HashSet,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Url;
use scraper::{ElementRef, Html};

use crate::{
    fetcher::Fetcher,
    pipeline::PipelineOptions,
    types::{Candidate, FetchFailure, StrategyKind},
    utils::{
        contains_logo_keyword, domain_base_url, is_valid_image_url, normalize_url, origin_of,
        CONVENTIONAL_PATHS, FAVICON_PATH, LOGO_HINT_SELECTOR, META_IMAGE_KEYS,
    },
};

/// What the strategies of one `resolve` call share: the domain, its root URL
/// for every configured scheme, and the origin the root page answered from.
pub struct ResolveContext {
    domain: String,
    bases: Vec<Url>,
    origin: OnceLock<Url>,
}

impl ResolveContext {
    pub fn new(domain: &str, bases: Vec<Url>) -> Self {
        ResolveContext {
            domain: domain.into(),
            bases,
            origin: OnceLock::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn bases(&self) -> &[Url] {
        &self.bases
    }

    /// Origin learned from the root page (after redirects), otherwise the
    /// root URL of the primary scheme.
    pub fn origin(&self) -> &Url {
        self.origin.get().unwrap_or(&self.bases[0])
    }

    pub fn set_origin(&self, origin: Url) {
        let _ = self.origin.set(origin);
    }
}

#[async_trait]
pub trait CandidateStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Candidate URLs in preference order. Network trouble only ever yields
    /// an empty list.
    async fn discover(&self, ctx: &ResolveContext, fetcher: &Fetcher) -> Vec<Url>;
}

/// Icons, social preview images and logo-looking `<img>`s of the root page.
pub struct HtmlHints;

#[async_trait]
impl CandidateStrategy for HtmlHints {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HtmlHints
    }

    async fn discover(&self, ctx: &ResolveContext, fetcher: &Fetcher) -> Vec<Url> {
        for base in ctx.bases() {
            match fetcher.fetch_page(base).await {
                Ok((html, final_url)) => {
                    if let Some(origin) = origin_of(&final_url) {
                        ctx.set_origin(origin);
                    }
                    let hints = extract_logo_hints(&html, &final_url);
                    debug!(
                        "{}: {} logo hints on {}",
                        ctx.domain(),
                        hints.len(),
                        final_url
                    );
                    return hints;
                }
                Err(e) => {
                    debug!("{}: could not load {}: {}", ctx.domain(), base, e);
                }
            }
        }
        vec![]
    }
}

/// HEAD probes of well-known logo locations.
pub struct ConventionalPaths;

#[async_trait]
impl CandidateStrategy for ConventionalPaths {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ConventionalPath
    }

    async fn discover(&self, ctx: &ResolveContext, fetcher: &Fetcher) -> Vec<Url> {
        let urls: Vec<Url> = CONVENTIONAL_PATHS
            .iter()
            .filter_map(|path| ctx.origin().join(path).ok())
            .collect();
        let found = join_all(urls.iter().map(|u| fetcher.probe(u))).await;
        urls.into_iter()
            .zip(found)
            .filter_map(|(url, ok)| ok.then_some(url))
            .collect()
    }
}

/// `/favicon.ico`, assumed to exist. Costs no request.
pub struct FaviconFallback;

#[async_trait]
impl CandidateStrategy for FaviconFallback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Favicon
    }

    async fn discover(&self, ctx: &ResolveContext, _fetcher: &Fetcher) -> Vec<Url> {
        ctx.origin().join(FAVICON_PATH).into_iter().collect()
    }
}

pub fn default_strategies() -> Vec<Box<dyn CandidateStrategy>> {
    vec![
        Box::new(HtmlHints),
        Box::new(ConventionalPaths),
        Box::new(FaviconFallback),
    ]
}

/// Logo candidates found in `html`, in document order, resolved against the
/// URL the page was served from.
pub fn extract_logo_hints(html: &str, page_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(&LOGO_HINT_SELECTOR)
        .filter_map(|el| logo_hint(&el))
        .filter_map(|raw| normalize_url(page_url, raw))
        .filter(is_valid_image_url)
        .collect()
}

fn logo_hint<'a>(el: &ElementRef<'a>) -> Option<&'a str> {
    let attrs = el.value();
    match attrs.name() {
        "link" => {
            let rel = attrs.attr("rel")?.to_lowercase();
            rel.contains("icon").then(|| attrs.attr("href")).flatten()
        }
        "meta" => {
            let key = attrs.attr("property").or_else(|| attrs.attr("name"))?;
            let key = key.trim().to_lowercase();
            META_IMAGE_KEYS
                .contains(&key.as_str())
                .then(|| attrs.attr("content"))
                .flatten()
        }
        "img" => {
            let logo_like = ["alt", "class", "id"]
                .iter()
                .filter_map(|a| attrs.attr(a))
                .any(contains_logo_keyword);
            logo_like.then(|| attrs.attr("src")).flatten()
        }
        _ => None,
    }
}

pub struct CandidateResolver {
    fetcher: Arc<Fetcher>,
    strategies: Vec<Box<dyn CandidateStrategy>>,
    schemes: Vec<String>,
    max_candidates: usize,
}

impl CandidateResolver {
    pub fn new(fetcher: Arc<Fetcher>, options: &PipelineOptions) -> Self {
        Self::with_strategies(fetcher, options, default_strategies())
    }

    pub fn with_strategies(
        fetcher: Arc<Fetcher>,
        options: &PipelineOptions,
        strategies: Vec<Box<dyn CandidateStrategy>>,
    ) -> Self {
        CandidateResolver {
            fetcher,
            strategies,
            schemes: options.schemes.clone(),
            max_candidates: options.max_candidates,
        }
    }

    /// Runs the strategies in order and returns the candidates of the first
    /// one that finds any, deduplicated and capped at `max_candidates`. An
    /// empty list means no strategy found anything; an error means the domain
    /// cannot even be turned into an URL.
    pub async fn resolve(&self, domain: &str) -> Result<Vec<Candidate>, FetchFailure> {
        let mut bases = Vec::with_capacity(self.schemes.len());
        let mut invalid = None;
        for scheme in self.schemes.iter() {
            match domain_base_url(scheme, domain) {
                Ok(url) => bases.push(url),
                Err(e) => invalid = Some(e),
            }
        }
        if bases.is_empty() {
            return Err(invalid.unwrap_or_else(|| FetchFailure::InvalidUrl(domain.into())));
        }

        let ctx = ResolveContext::new(domain, bases);
        for strategy in self.strategies.iter() {
            let urls = strategy.discover(&ctx, &self.fetcher).await;
            let mut seen = HashSet::new();
            let candidates: Vec<Candidate> = urls
                .into_iter()
                .filter(|u| seen.insert(u.to_string()))
                .take(self.max_candidates)
                .enumerate()
                .map(|(rank, url)| Candidate {
                    url,
                    strategy: strategy.kind(),
                    rank,
                })
                .collect();
            if !candidates.is_empty() {
                debug!(
                    "{}: {} candidates from {}",
                    domain,
                    candidates.len(),
                    strategy.kind()
                );
                return Ok(candidates);
            }
        }
        Ok(vec![])
    }
}
