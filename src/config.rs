use mongodb::{Client, Database};
use std::{env, path::PathBuf, time::Duration};
use dotenv::dotenv;

pub struct MongoConfig {
    pub database: Database,
}

impl MongoConfig {
    pub async fn init() -> Result<Self, mongodb::error::Error> {
        dotenv().ok();

        let mongo_uri = env::var("MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let database_name = env::var("DATABASE_NAME")
            .unwrap_or_else(|_| "price_tracker".to_string());

        let client = Client::with_uri_str(&mongo_uri).await?;
        let database = client.database(&database_name);

        Ok(MongoConfig { database })
    }
}

/// Runtime settings for the HTTP server, the upstream providers and the
/// polling job. Provider keys are optional; a missing key disables or
/// degrades the matching feature instead of failing startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub scraperapi_key: Option<String>,
    pub serpapi_key: Option<String>,
    pub rapidapi_key: Option<String>,
    pub sendgrid_api_key: Option<String>,
    pub alert_from_email: String,
    pub firebase_credentials: PathBuf,
    pub poll_interval: Duration,
    pub poll_item_delay: Duration,
    pub http_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv().ok();

        Settings {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            scraperapi_key: optional_env("SCRAPERAPI_KEY"),
            serpapi_key: optional_env("SERPAPI_KEY"),
            rapidapi_key: optional_env("RAPIDAPI_KEY"),
            sendgrid_api_key: optional_env("SENDGRID_API_KEY"),
            alert_from_email: env::var("ALERT_FROM_EMAIL")
                .unwrap_or_else(|_| "alerts@price-tracker.local".to_string()),
            firebase_credentials: env::var("FIREBASE_CREDENTIALS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("serviceAccountKey.json")),
            poll_interval: Duration::from_secs(numeric_env("POLL_INTERVAL_SECS", 3600).max(1)),
            poll_item_delay: Duration::from_millis(numeric_env("POLL_ITEM_DELAY_MS", 1500)),
            http_timeout: Duration::from_secs(numeric_env("HTTP_TIMEOUT_SECS", 60)),
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn numeric_env(name: &str, default: u64) -> u64 {
    match optional_env(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring non-numeric {}={:?}, using {}", name, raw, default);
            default
        }),
        None => default,
    }
}
