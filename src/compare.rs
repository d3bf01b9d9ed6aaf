//! Cross-platform price comparison through SerpApi Google Shopping.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::models::PriceComparison;
use crate::pricing::parse_price;
use crate::retailer::Retailer;
use crate::scrape::ProductListing;

const SERPAPI_URL: &str = "https://serpapi.com/search.json";

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("SERPAPI_KEY is not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SerpApi returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ShoppingResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: String,
    pub price: Option<String>,
    pub extracted_price: Option<f64>,
    pub link: Option<String>,
    pub product_link: Option<String>,
}

impl ShoppingResult {
    fn amount(&self) -> Option<f64> {
        self.extracted_price
            .or_else(|| self.price.as_deref().and_then(parse_price))
    }
}

#[derive(Debug, Deserialize)]
struct ShoppingResponse {
    #[serde(default)]
    shopping_results: Vec<ShoppingResult>,
}

#[derive(Clone)]
pub struct CompareClient {
    http: Client,
    serpapi_key: Option<String>,
}

impl CompareClient {
    pub fn new(http: Client, serpapi_key: Option<String>) -> Self {
        CompareClient { http, serpapi_key }
    }

    pub async fn shopping_results(&self, query: &str) -> Result<Vec<ShoppingResult>, CompareError> {
        let key = self.serpapi_key.as_deref().ok_or(CompareError::NotConfigured)?;

        let response = self
            .http
            .get(SERPAPI_URL)
            .query(&[
                ("engine", "google_shopping"),
                ("q", query),
                ("gl", "in"),
                ("hl", "en"),
                ("api_key", key),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompareError::Status(status));
        }

        let body: ShoppingResponse = response.json().await?;
        debug!("SerpApi returned {} shopping results for {:?}", body.shopping_results.len(), query);
        Ok(body.shopping_results)
    }
}

/// One row per supported platform, in [`Retailer::ALL`] order. The platform
/// the user came from is priced from its own page; the others from the
/// first shopping result sold by them.
pub fn compare_across(
    source: Retailer,
    listing: &ProductListing,
    results: &[ShoppingResult],
) -> Vec<PriceComparison> {
    Retailer::ALL
        .iter()
        .map(|platform| {
            if *platform == source && listing.price.is_some() {
                return PriceComparison {
                    platform: platform.name().to_string(),
                    price: listing.price,
                    link: Some(listing.link.clone()),
                };
            }

            let needle = platform.name().to_lowercase();
            let offer = results
                .iter()
                .filter(|result| result.source.to_lowercase().contains(&needle))
                .find(|result| result.amount().is_some());

            PriceComparison {
                platform: platform.name().to_string(),
                price: offer.and_then(ShoppingResult::amount),
                link: offer.and_then(|result| result.link.clone().or_else(|| result.product_link.clone())),
            }
        })
        .collect()
}
