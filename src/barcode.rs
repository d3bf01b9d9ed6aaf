//! Barcode lookups against public product databases.

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const RAPIDAPI_HOST: &str = "barcodes1.p.rapidapi.com";
const UPCITEMDB_URL: &str = "https://api.upcitemdb.com/prod/trial/lookup";
const OPENFOODFACTS_URL: &str = "https://world.openfoodfacts.org/api/v0/product";

#[derive(Debug, Error)]
pub enum BarcodeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} returned status {status}")]
    Status {
        provider: &'static str,
        status: reqwest::StatusCode,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeProduct {
    pub title: String,
    pub brand: Option<String>,
    pub image: Option<String>,
    pub price: Option<f64>,
    pub link: Option<String>,
}

/// EAN-8, UPC-A, EAN-13 and GTIN-14 codes.
pub fn is_valid_barcode(code: &str) -> bool {
    matches!(code.len(), 8 | 12 | 13 | 14) && code.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::One(item) => Some(item),
            OneOrMany::Many(items) => items.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RapidApiResponse {
    product: Option<OneOrMany<RapidApiProduct>>,
}

#[derive(Debug, Deserialize)]
struct RapidApiProduct {
    title: Option<String>,
    brand: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpcItemDbResponse {
    #[serde(default)]
    items: Vec<UpcItem>,
}

#[derive(Debug, Deserialize)]
struct UpcItem {
    title: Option<String>,
    brand: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    offers: Vec<UpcOffer>,
    lowest_recorded_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UpcOffer {
    price: Option<f64>,
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenFoodFactsResponse {
    status: Option<i64>,
    product: Option<OpenFoodFactsProduct>,
}

#[derive(Debug, Deserialize)]
struct OpenFoodFactsProduct {
    product_name: Option<String>,
    brands: Option<String>,
    image_url: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn from_rapidapi(body: RapidApiResponse) -> Option<BarcodeProduct> {
    let product = body.product?.into_first()?;
    Some(BarcodeProduct {
        title: non_blank(product.title)?,
        brand: non_blank(product.brand),
        image: product.images.into_iter().next(),
        price: None,
        link: None,
    })
}

fn from_upcitemdb(body: UpcItemDbResponse) -> Option<BarcodeProduct> {
    let item = body.items.into_iter().next()?;
    let cheapest = item
        .offers
        .iter()
        .filter(|offer| offer.price.is_some_and(|p| p > 0.0))
        .min_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));

    Some(BarcodeProduct {
        price: cheapest
            .and_then(|offer| offer.price)
            .or(item.lowest_recorded_price.filter(|p| *p > 0.0)),
        link: cheapest.and_then(|offer| offer.link.clone()),
        title: non_blank(item.title)?,
        brand: non_blank(item.brand),
        image: item.images.into_iter().next(),
    })
}

fn from_openfoodfacts(body: OpenFoodFactsResponse) -> Option<BarcodeProduct> {
    if body.status != Some(1) {
        return None;
    }
    let product = body.product?;
    Some(BarcodeProduct {
        title: non_blank(product.product_name)?,
        brand: non_blank(product.brands),
        image: non_blank(product.image_url),
        price: None,
        link: None,
    })
}

#[derive(Clone)]
pub struct BarcodeClient {
    http: Client,
    rapidapi_key: Option<String>,
}

impl BarcodeClient {
    pub fn new(http: Client, rapidapi_key: Option<String>) -> Self {
        BarcodeClient { http, rapidapi_key }
    }

    /// Tries each provider in turn; a provider that fails or has no match
    /// hands over to the next one.
    pub async fn lookup(&self, code: &str) -> Option<BarcodeProduct> {
        if let Some(key) = &self.rapidapi_key {
            match self.rapidapi(code, key).await {
                Ok(Some(product)) => return Some(product),
                Ok(None) => debug!("RapidAPI has no match for {}", code),
                Err(e) => warn!("RapidAPI lookup for {} failed: {}", code, e),
            }
        }

        match self.upcitemdb(code).await {
            Ok(Some(product)) => return Some(product),
            Ok(None) => debug!("UPCItemDB has no match for {}", code),
            Err(e) => warn!("UPCItemDB lookup for {} failed: {}", code, e),
        }

        match self.openfoodfacts(code).await {
            Ok(Some(product)) => Some(product),
            Ok(None) => {
                info!("No provider knows barcode {}", code);
                None
            }
            Err(e) => {
                warn!("OpenFoodFacts lookup for {} failed: {}", code, e);
                None
            }
        }
    }

    async fn rapidapi(&self, code: &str, key: &str) -> Result<Option<BarcodeProduct>, BarcodeError> {
        let request = self
            .http
            .get(format!("https://{}/", RAPIDAPI_HOST))
            .query(&[("barcode", code)])
            .header("X-RapidAPI-Key", key)
            .header("X-RapidAPI-Host", RAPIDAPI_HOST);
        let body: RapidApiResponse = fetch_json("RapidAPI", request).await?;
        Ok(from_rapidapi(body))
    }

    async fn upcitemdb(&self, code: &str) -> Result<Option<BarcodeProduct>, BarcodeError> {
        let request = self.http.get(UPCITEMDB_URL).query(&[("upc", code)]);
        let body: UpcItemDbResponse = fetch_json("UPCItemDB", request).await?;
        Ok(from_upcitemdb(body))
    }

    async fn openfoodfacts(&self, code: &str) -> Result<Option<BarcodeProduct>, BarcodeError> {
        let request = self.http.get(format!("{}/{}.json", OPENFOODFACTS_URL, code));
        let body: OpenFoodFactsResponse = fetch_json("OpenFoodFacts", request).await?;
        Ok(from_openfoodfacts(body))
    }
}

async fn fetch_json<T: DeserializeOwned>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, BarcodeError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(BarcodeError::Status { provider, status });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_standard_barcode_lengths() {
        assert!(is_valid_barcode("73513537"));
        assert!(is_valid_barcode("036000291452"));
        assert!(is_valid_barcode("8901058851298"));
        assert!(is_valid_barcode("10036000291459"));
        assert!(!is_valid_barcode("12345"));
        assert!(!is_valid_barcode("89010588512A8"));
        assert!(!is_valid_barcode("８９０１０５８８５１２９８"));
    }

    #[test]
    fn rapidapi_product_may_be_object_or_array() {
        let object: RapidApiResponse = serde_json::from_str(
            r#"{"product":{"title":"Maggi Noodles","brand":"Nestle","images":["https://img/1.jpg"]}}"#,
        )
        .unwrap();
        let product = from_rapidapi(object).unwrap();
        assert_eq!(product.title, "Maggi Noodles");
        assert_eq!(product.image.as_deref(), Some("https://img/1.jpg"));

        let array: RapidApiResponse = serde_json::from_str(
            r#"{"product":[{"title":"First","brand":null},{"title":"Second"}]}"#,
        )
        .unwrap();
        assert_eq!(from_rapidapi(array).unwrap().title, "First");

        let empty: RapidApiResponse = serde_json::from_str(r#"{"product":[]}"#).unwrap();
        assert!(from_rapidapi(empty).is_none());
    }

    #[test]
    fn upcitemdb_uses_cheapest_offer() {
        let body: UpcItemDbResponse = serde_json::from_str(
            r#"{"code":"OK","items":[{"title":"Coca-Cola 12oz","brand":"Coca-Cola","images":[],
                "lowest_recorded_price":3.1,
                "offers":[{"price":5.49,"link":"https://a"},{"price":4.99,"link":"https://b"},{"price":0}]}]}"#,
        )
        .unwrap();
        let product = from_upcitemdb(body).unwrap();
        assert_eq!(product.price, Some(4.99));
        assert_eq!(product.link.as_deref(), Some("https://b"));
        assert_eq!(product.image, None);
    }

    #[test]
    fn upcitemdb_falls_back_to_lowest_recorded_price() {
        let body: UpcItemDbResponse = serde_json::from_str(
            r#"{"items":[{"title":"Thing","lowest_recorded_price":7.5,"offers":[]}]}"#,
        )
        .unwrap();
        assert_eq!(from_upcitemdb(body).unwrap().price, Some(7.5));
    }

    #[test]
    fn openfoodfacts_requires_found_status_and_name() {
        let found: OpenFoodFactsResponse = serde_json::from_str(
            r#"{"status":1,"product":{"product_name":"Parle-G","brands":"Parle","image_url":"https://off/p.jpg"}}"#,
        )
        .unwrap();
        let product = from_openfoodfacts(found).unwrap();
        assert_eq!(product.brand.as_deref(), Some("Parle"));

        let missing: OpenFoodFactsResponse =
            serde_json::from_str(r#"{"status":0,"status_verbose":"product not found"}"#).unwrap();
        assert!(from_openfoodfacts(missing).is_none());

        let blank: OpenFoodFactsResponse =
            serde_json::from_str(r#"{"status":1,"product":{"product_name":"  "}}"#).unwrap();
        assert!(from_openfoodfacts(blank).is_none());
    }
}
