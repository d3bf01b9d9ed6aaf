//! Retailer detection and Amazon URL handling.

use regex::Regex;
use reqwest::Url;
use std::{fmt, sync::LazyLock};

pub const AMAZON_BASE_URL: &str = "https://www.amazon.in";

static ASIN_IN_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:dp|gp/product|gp/aw/d|exec/obidos/asin|o/ASIN)/([A-Z0-9]{10})(?:[/?#]|$)")
        .expect("ASIN pattern is valid")
});

static ASIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{10}$").expect("ASIN pattern is valid"));

const AMAZON_DOMAINS: [&str; 12] = [
    "amazon.in",
    "amazon.com",
    "amazon.co.uk",
    "amazon.de",
    "amazon.ca",
    "amazon.com.au",
    "amazon.co.jp",
    "amazon.fr",
    "amazon.it",
    "amazon.es",
    "amazon.ae",
    "amazon.sg",
];

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retailer {
    Amazon,
    Flipkart,
    Meesho,
}

impl Retailer {
    pub const ALL: [Retailer; 3] = [Retailer::Amazon, Retailer::Flipkart, Retailer::Meesho];

    /// Detects the retailer from the URL host. Returns `None` for malformed
    /// URLs, non-web schemes, explicit ports and unsupported sites. Hosts
    /// must be a listed domain or a subdomain of one.
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url.trim()).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.port().is_some() {
            return None;
        }
        let host = parsed.host_str()?.to_ascii_lowercase();

        if AMAZON_DOMAINS.iter().any(|domain| host_matches(&host, domain)) {
            Some(Retailer::Amazon)
        } else if host_matches(&host, "flipkart.com") {
            Some(Retailer::Flipkart)
        } else if host_matches(&host, "meesho.com") {
            Some(Retailer::Meesho)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Retailer::Amazon => "Amazon",
            Retailer::Flipkart => "Flipkart",
            Retailer::Meesho => "Meesho",
        }
    }
}

impl fmt::Display for Retailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn extract_asin(url: &str) -> Option<String> {
    ASIN_IN_PATH
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_valid_asin(candidate: &str) -> bool {
    ASIN.is_match(candidate)
}

pub fn amazon_product_url(asin: &str) -> String {
    format!("{}/dp/{}", AMAZON_BASE_URL, asin)
}

/// Rewrites an Amazon link to its bare `/dp/<ASIN>` form, dropping
/// tracking parameters and slugs. Links without an ASIN come back as-is.
pub fn clean_amazon_url(url: &str) -> String {
    match extract_asin(url) {
        Some(asin) => amazon_product_url(&asin),
        None => url.to_string(),
    }
}
