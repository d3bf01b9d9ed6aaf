use chrono::{DateTime as ChronoDateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

// Stored documents

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Product {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub last_price_text: Option<String>,
    pub created_at: DateTime,
    #[serde(default)]
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PriceEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub product_id: ObjectId,
    pub price: Option<f64>,
    #[serde(default)]
    pub price_text: Option<String>,
    pub timestamp: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Watcher {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub product_id: ObjectId,
    pub asin: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub fcm_token: Option<String>,
    pub target_price: f64,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub last_notified_price: Option<f64>,
    pub created_at: DateTime,
}

/// Legacy flat tracking record: one URL, one target, one email.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Track {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub url: String,
    pub target_price: f64,
    pub email: String,
    pub is_active: bool,
    #[serde(default)]
    pub last_checked_price: Option<f64>,
    pub created_at: DateTime,
}

// Requests

#[derive(Debug, Deserialize, Validate)]
pub struct UrlRequest {
    #[validate(url)]
    pub url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTrackRequest {
    #[validate(url)]
    pub url: String,
    #[serde(rename = "targetPrice", alias = "target_price", deserialize_with = "number_or_string")]
    pub target_price: f64,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWatchRequest {
    #[validate(length(min = 10))]
    pub asin: String,
    #[validate(email)]
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "fcmToken", alias = "fcm_token")]
    pub fcm_token: Option<String>,
    #[serde(alias = "targetPrice", deserialize_with = "number_or_string")]
    pub target_price: f64,
}

// Responses

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub price: f64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct WatchCreated {
    #[serde(rename = "watcherId")]
    pub watcher_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PriceComparison {
    pub platform: String,
    pub price: Option<f64>,
    pub link: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub results: Vec<PriceComparison>,
}

#[derive(Debug, Serialize)]
pub struct ProductView {
    pub id: String,
    pub asin: Option<String>,
    pub barcode: Option<String>,
    pub title: String,
    pub brand: Option<String>,
    pub image: Option<String>,
    pub url: Option<String>,
    pub last_price: Option<f64>,
    pub last_price_text: Option<String>,
}

impl From<&Product> for ProductView {
    fn from(product: &Product) -> Self {
        ProductView {
            id: product.id.map(|id| id.to_hex()).unwrap_or_default(),
            asin: product.asin.clone(),
            barcode: product.barcode.clone(),
            title: product.title.clone(),
            brand: product.brand.clone(),
            image: product.image.clone(),
            url: product.url.clone(),
            last_price: product.last_price,
            last_price_text: product.last_price_text.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductEnvelope {
    pub product: ProductView,
}

#[derive(Debug, Serialize)]
pub struct PricePoint {
    pub price: Option<f64>,
    pub price_text: Option<String>,
    pub timestamp: ChronoDateTime<Utc>,
}

impl From<PriceEntry> for PricePoint {
    fn from(entry: PriceEntry) -> Self {
        PricePoint {
            price: entry.price,
            price_text: entry.price_text,
            timestamp: entry.timestamp.to_chrono(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub product: ProductView,
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Serialize)]
pub struct AlertView {
    #[serde(rename = "watcherId")]
    pub watcher_id: String,
    pub asin: String,
    pub title: String,
    pub image: Option<String>,
    pub url: Option<String>,
    pub target_price: f64,
}

/// Form inputs send prices as strings, API clients send numbers.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(value) => Ok(value),
        NumberOrString::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid price: {:?}", text))),
    }
}
