mod barcode;
mod compare;
mod config;
mod error;
mod handlers;
mod models;
mod notifier;
mod pricing;
mod retailer;
mod scrape;
mod store;
mod tracker;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use barcode::BarcodeClient;
use compare::CompareClient;
use config::{MongoConfig, Settings};
use notifier::{EmailSender, Notifier, PushSender};
use scrape::PageFetcher;
use std::sync::Arc;
use store::Store;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{self, EnvFilter};
use tracker::PriceTracker;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,actix_web=info,price_tracker=debug")),
        )
        .init();

    info!("Starting price tracker server");
    let settings = Settings::from_env();

    let mongo_config = MongoConfig::init().await.map_err(|e| {
        tracing::error!("Failed to initialize MongoDB: {}", e);
        std::io::Error::other(e)
    })?;

    let store = Store::new(mongo_config.database);
    if let Err(e) = store.ensure_indexes().await {
        warn!("Could not ensure database indexes: {}", e);
    }
    info!("MongoDB connection established");

    let http = reqwest::Client::builder()
        .timeout(settings.http_timeout)
        .build()
        .map_err(std::io::Error::other)?;

    let fetcher = PageFetcher::new(http.clone(), settings.scraperapi_key.clone());
    let notifier = Notifier {
        email: EmailSender::new(
            http.clone(),
            settings.sendgrid_api_key.clone(),
            settings.alert_from_email.clone(),
        ),
        push: PushSender::from_key_file(http.clone(), &settings.firebase_credentials),
    };

    let tracker = Arc::new(PriceTracker::new(
        store.clone(),
        fetcher.clone(),
        notifier,
        settings.poll_item_delay,
    ));
    actix_web::rt::spawn(tracker.run(settings.poll_interval));

    let store_data = web::Data::new(store);
    let fetcher_data = web::Data::new(fetcher);
    let barcode_data = web::Data::new(BarcodeClient::new(http.clone(), settings.rapidapi_key.clone()));
    let compare_data = web::Data::new(CompareClient::new(http, settings.serpapi_key.clone()));

    info!("Listening on http://{}", settings.bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .app_data(store_data.clone())
            .app_data(fetcher_data.clone())
            .app_data(barcode_data.clone())
            .app_data(compare_data.clone())
            .configure(handlers::configure)
    })
    .bind(&settings.bind_addr)?
    .run()
    .await
}
