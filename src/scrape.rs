//! Page fetching and per-retailer price extraction.
//!
//! Selectors are plain data, one table per retailer, tried in order. They
//! track each site's current markup and are expected to drift.

use reqwest::{header::USER_AGENT, Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info};

use crate::pricing::parse_price;
use crate::retailer::{amazon_product_url, clean_amazon_url, Retailer, AMAZON_BASE_URL};

const SCRAPERAPI_ENDPOINT: &str = "http://api.scraperapi.com";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("unsupported retailer for {0}")]
    Unsupported(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("no price found on {0}")]
    PriceNotFound(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductListing {
    pub title: Option<String>,
    pub price: Option<f64>,
    pub price_text: Option<String>,
    pub image: Option<String>,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub asin: Option<String>,
    pub title: String,
    pub price: Option<f64>,
    pub price_text: Option<String>,
    pub link: Option<String>,
}

struct PageSelectors {
    title: &'static [&'static str],
    price: &'static [&'static str],
    image: &'static [&'static str],
}

fn page_selectors(retailer: Retailer) -> PageSelectors {
    match retailer {
        Retailer::Amazon => PageSelectors {
            title: &["#productTitle", "#title"],
            price: &[
                "#corePriceDisplay_desktop_feature_div span.a-offscreen",
                "#corePrice_feature_div span.a-offscreen",
                "#priceblock_dealprice",
                "#priceblock_ourprice",
                "span.a-price span.a-offscreen",
                "span.a-offscreen",
            ],
            image: &["#landingImage", "#imgBlkFront", "#main-image-container img"],
        },
        Retailer::Flipkart => PageSelectors {
            title: &["span.B_NuCI", "span.VU-ZEz", "h1"],
            price: &["div._30jeq3._16Jk6d", "._30jeq3._16Jk6d", "div.Nx9bqj.CxhGGd", "div.Nx9bqj"],
            image: &["img._396cs4", "img.DByuf4", "img._53J4C-"],
        },
        Retailer::Meesho => PageSelectors {
            title: &["span.Text__StyledText-sc-oo0kvp-0", "h1"],
            price: &["h5.Text__StyledText-sc-oo0kvp-0", "h4"],
            image: &["picture img", "img"],
        },
    }
}

mod search {
    pub const RESULT: &str = "div[data-component-type='s-search-result']";
    pub const TITLE: &[&str] = &["h2 a span", "h2 span", "span.a-text-normal"];
    pub const PRICE: &[&str] = &["span.a-price span.a-offscreen", "span.a-price-whole"];
    pub const LINK: &[&str] = &["h2 a", "a.a-link-normal.s-no-outline", "a.a-link-normal"];
}

#[derive(Clone)]
pub struct PageFetcher {
    http: Client,
    scraperapi_key: Option<String>,
}

impl PageFetcher {
    pub fn new(http: Client, scraperapi_key: Option<String>) -> Self {
        PageFetcher { http, scraperapi_key }
    }

    /// Fetches rendered HTML through ScraperAPI when a key is configured,
    /// otherwise directly with a desktop browser user agent.
    pub async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        let request = match &self.scraperapi_key {
            Some(key) => {
                debug!("Fetching {} through ScraperAPI", url);
                self.http.get(SCRAPERAPI_ENDPOINT).query(&[
                    ("api_key", key.as_str()),
                    ("render", "true"),
                    ("country_code", "in"),
                    ("url", url),
                ])
            }
            None => {
                debug!("Fetching {} directly", url);
                self.http.get(url).header(USER_AGENT, BROWSER_USER_AGENT)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status,
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }

    pub async fn listing(&self, url: &str) -> Result<ProductListing, ScrapeError> {
        let retailer =
            Retailer::from_url(url).ok_or_else(|| ScrapeError::Unsupported(url.to_string()))?;
        let link = match retailer {
            Retailer::Amazon => clean_amazon_url(url),
            _ => url.trim().to_string(),
        };

        info!("Scraping {} page {}", retailer, link);
        let html = self.fetch_html(&link).await?;
        Ok(extract_listing(retailer, &html, &link))
    }

    /// Like [`PageFetcher::listing`], but a page without a readable price is
    /// an error.
    pub async fn price(&self, url: &str) -> Result<(f64, ProductListing), ScrapeError> {
        require_price(self.listing(url).await?)
    }

    pub async fn search_amazon(&self, query: &str) -> Result<Vec<SearchHit>, ScrapeError> {
        let mut search_url = reqwest::Url::parse(AMAZON_BASE_URL)
            .map_err(|_| ScrapeError::Unsupported(AMAZON_BASE_URL.to_string()))?;
        search_url.set_path("/s");
        search_url.query_pairs_mut().append_pair("k", query);

        let html = self.fetch_html(search_url.as_str()).await?;
        let hits = extract_search_hits(&html);
        debug!("Amazon search for {:?} returned {} hits", query, hits.len());
        Ok(hits)
    }
}

pub fn extract_listing(retailer: Retailer, html: &str, link: &str) -> ProductListing {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let selectors = page_selectors(retailer);

    let price_text = first_text(root, selectors.price);
    ProductListing {
        title: first_text(root, selectors.title),
        price: price_text.as_deref().and_then(parse_price),
        price_text,
        image: first_attr(root, selectors.image, &["data-old-hires", "src"]),
        link: link.to_string(),
    }
}

pub fn extract_search_hits(html: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let Ok(card_selector) = Selector::parse(search::RESULT) else {
        return Vec::new();
    };

    document
        .select(&card_selector)
        .filter_map(|card| {
            let title = first_text(card, search::TITLE)?;
            let asin = card
                .value()
                .attr("data-asin")
                .map(str::trim)
                .filter(|asin| !asin.is_empty())
                .map(str::to_string);
            let price_text = first_text(card, search::PRICE);
            let link = match &asin {
                Some(asin) => Some(amazon_product_url(asin)),
                None => first_attr(card, search::LINK, &["href"]).map(|href| absolute_url(&href)),
            };

            Some(SearchHit {
                asin,
                title,
                price: price_text.as_deref().and_then(parse_price),
                price_text,
                link,
            })
        })
        .collect()
}

/// Picks the hit sharing the most query words (three characters or longer)
/// with its title. Ties keep the earlier hit; no overlap yields `None`.
pub fn best_match<'a>(query: &str, hits: &'a [SearchHit]) -> Option<&'a SearchHit> {
    let keywords = keywords(query);
    let mut best: Option<(&SearchHit, usize)> = None;

    for hit in hits {
        let title = hit.title.to_lowercase();
        let score = keywords.iter().filter(|word| title.contains(word.as_str())).count();
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((hit, score));
        }
    }

    best.map(|(hit, _)| hit)
}

fn keywords(query: &str) -> Vec<String> {
    let mut words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    words.sort();
    words.dedup();
    words
}

fn first_text(scope: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        scope.select(&selector).find_map(|element| {
            let text = element.text().collect::<Vec<_>>().join(" ");
            let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!cleaned.is_empty()).then_some(cleaned)
        })
    })
}

fn first_attr(scope: ElementRef<'_>, selectors: &[&str], attrs: &[&str]) -> Option<String> {
    selectors.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        scope.select(&selector).find_map(|element| {
            attrs
                .iter()
                .filter_map(|attr| element.value().attr(attr))
                .map(str::trim)
                .find(|value| !value.is_empty())
                .map(str::to_string)
        })
    })
}

fn absolute_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        format!("{}{}", AMAZON_BASE_URL, href)
    }
}

pub fn require_price(listing: ProductListing) -> Result<(f64, ProductListing), ScrapeError> {
    match listing.price {
        Some(price) => Ok((price, listing)),
        None => Err(ScrapeError::PriceNotFound(listing.link)),
    }
}
