use rand::seq::SliceRandom;
use reqwest::Url;
use scraper::Selector;

use crate::types::FetchFailure;

pub const FAVICON_PATH: &str = "/favicon.ico";
pub const DEFAULT_SCHEMES: [&str; 2] = ["https", "http"];
pub const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

pub const IMAGE_EXTENSIONS: [&str; 7] = [".png", ".jpg", ".jpeg", ".gif", ".ico", ".svg", ".webp"];
pub const IMAGE_URL_KEYWORDS: [&str; 3] = ["logo", "icon", "favicon"];
pub const LOGO_KEYWORDS: [&str; 2] = ["logo", "brand"];
pub const META_IMAGE_KEYS: [&str; 3] = ["og:image", "twitter:image", "twitter:image:src"];

pub const CONVENTIONAL_PATHS: [&str; 9] = [
    "/logo.png",
    "/logo.svg",
    "/assets/logo.png",
    "/assets/logo.svg",
    "/images/logo.png",
    "/img/logo.png",
    "/static/logo.png",
    "/static/images/logo.png",
    "/wp-content/uploads/logo.png",
];

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0 Safari/537.36",
];

lazy_static! {
    // link, meta and img in one selector so matches come back in document order
    pub static ref LOGO_HINT_SELECTOR: Selector =
        Selector::parse("link[href], meta[content], img[src]").expect("static selector is valid");
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Root URL of `domain` for the given scheme, e.g. `https://example.com/`.
pub fn domain_base_url(scheme: &str, domain: &str) -> Result<Url, FetchFailure> {
    let raw = format!("{}://{}/", scheme, domain);
    Url::parse(&raw).map_err(|e| FetchFailure::InvalidUrl(format!("{}: {}", raw, e)))
}

/// `scheme://host[:port]/` of an URL, used once redirects tell us where a site lives.
pub fn origin_of(url: &Url) -> Option<Url> {
    let mut origin = url.join("/").ok()?;
    origin.set_query(None);
    origin.set_fragment(None);
    Some(origin)
}

/// Resolves a possibly relative reference against the page it was found on.
/// Only http(s) results are kept and fragments are dropped.
pub fn normalize_url(base_url: &Url, url: &str) -> Option<Url> {
    let url = url.trim();
    if url.is_empty() || url.starts_with("data:") {
        return None;
    }
    match base_url.join(url) {
        Ok(mut new_url) => {
            if new_url.scheme() != "http" && new_url.scheme() != "https" {
                return None;
            }
            // we remove the fragments (#)
            new_url.set_fragment(None);
            Some(new_url)
        }
        Err(_e) => None,
    }
}

pub fn is_valid_image_url(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return true;
    }
    IMAGE_URL_KEYWORDS.iter().any(|k| path.contains(k))
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type.trim().to_lowercase().starts_with("image/")
}

pub fn contains_logo_keyword(value: &str) -> bool {
    let value = value.to_lowercase();
    LOGO_KEYWORDS.iter().any(|k| value.contains(k))
}

/// Normalises a domain coming from an input file: trims, lowercases, drops
/// any scheme and trailing path. Returns `None` for blanks and comments.
pub fn clean_domain(raw: &str) -> Option<String> {
    let raw = raw.trim().trim_matches('"').trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lower = raw.to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = without_scheme.split('/').next().unwrap_or(without_scheme).trim();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    Some(host.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/about/").unwrap()
    }

    #[test]
    fn remove_path_fragments() {
        assert_eq!(
            normalize_url(&base(), "https://example.com/logo.png#top")
                .unwrap()
                .to_string(),
            "https://example.com/logo.png"
        );

        assert_eq!(
            normalize_url(&base(), "/img/logo.png#test")
                .unwrap()
                .to_string(),
            "https://example.com/img/logo.png"
        );
    }

    #[test]
    fn resolves_relative_and_protocol_relative() {
        assert_eq!(
            normalize_url(&base(), "logo.svg").unwrap().to_string(),
            "https://example.com/about/logo.svg"
        );
        assert_eq!(
            normalize_url(&base(), "//cdn.example.net/brand.png")
                .unwrap()
                .to_string(),
            "https://cdn.example.net/brand.png"
        );
        assert!(normalize_url(&base(), "").is_none());
        assert!(normalize_url(&base(), "data:image/png;base64,AAAA").is_none());
        assert!(normalize_url(&base(), "javascript:void(0)").is_none());
    }

    #[test]
    fn image_url_heuristics() {
        let u = |s: &str| Url::parse(s).unwrap();
        assert!(is_valid_image_url(&u("https://a.com/x/Header.PNG")));
        assert!(is_valid_image_url(&u("https://a.com/assets/site-logo")));
        assert!(is_valid_image_url(&u("https://a.com/apple-touch-icon")));
        assert!(!is_valid_image_url(&u("https://a.com/index.html")));
    }

    #[test]
    fn image_content_types() {
        assert!(is_image_content_type("image/png"));
        assert!(is_image_content_type(" Image/X-Icon "));
        assert!(!is_image_content_type("text/html; charset=utf-8"));
    }

    #[test]
    fn base_urls() {
        assert_eq!(
            domain_base_url("https", "example.com").unwrap().to_string(),
            "https://example.com/"
        );
        assert_eq!(
            domain_base_url("http", "127.0.0.1:8080").unwrap().to_string(),
            "http://127.0.0.1:8080/"
        );
        assert!(domain_base_url("https", "exa mple.com").is_err());
        let o = origin_of(&Url::parse("https://www.example.com/home?x=1#y").unwrap()).unwrap();
        assert_eq!(o.to_string(), "https://www.example.com/");
    }

    #[test]
    fn cleans_domains() {
        assert_eq!(clean_domain("  Example.COM "), Some("example.com".into()));
        assert_eq!(
            clean_domain("https://shop.example.com/path"),
            Some("shop.example.com".into())
        );
        assert_eq!(clean_domain("# comment"), None);
        assert_eq!(clean_domain("   "), None);
        assert_eq!(clean_domain("\"quoted.org\""), Some("quoted.org".into()));
    }

    #[test]
    fn user_agent_is_from_the_list() {
        assert!(USER_AGENTS.contains(&random_user_agent()));
    }
}
