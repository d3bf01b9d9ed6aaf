use actix_web::{error::InternalError, web, HttpResponse};
use mongodb::bson::{oid::ObjectId, DateTime};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::{
    barcode::{is_valid_barcode, BarcodeClient},
    compare::{compare_across, CompareClient},
    error::AppError,
    models::{
        AlertView, CompareResponse, CreateTrackRequest, CreateWatchRequest, HistoryResponse,
        MessageResponse, PricePoint, PriceResponse, Product, ProductEnvelope, ProductView, Track,
        UrlRequest, WatchCreated, Watcher,
    },
    retailer::{amazon_product_url, extract_asin, is_valid_asin, Retailer},
    scrape::{best_match, PageFetcher},
    store::{ProductDetails, Store},
};

const UNSUPPORTED_URL: &str = "URL must be from Amazon, Flipkart, or Meesho.";
const SCRAPE_FAILED: &str = "Could not get a price. The site may be blocking us.";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        InternalError::from_response(err, HttpResponse::BadRequest().json(json!({ "message": message })))
            .into()
    }))
    .service(
        web::scope("/api")
            .route("/scrape-price", web::post().to(scrape_price))
            .route("/compare-prices", web::post().to(compare_prices))
            .route("/track", web::post().to(create_track))
            .route("/watch", web::post().to(create_watch))
            .route("/watch/{asin}/{watcher_id}", web::delete().to(delete_watch))
            .route("/product/barcode/{code}", web::get().to(product_by_barcode))
            .route("/product/history/{barcode}", web::get().to(history_by_barcode))
            .route("/product/{asin}", web::get().to(get_product))
            .route("/prices/{asin}", web::get().to(price_history))
            .route("/user/alerts", web::get().to(list_alerts)),
    );
}

fn supported_retailer(url: &str) -> Result<Retailer, AppError> {
    Retailer::from_url(url).ok_or_else(|| AppError::BadRequest(UNSUPPORTED_URL.to_string()))
}

fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(raw).map_err(|_| {
        debug!("Invalid {} format: {}", what, raw);
        AppError::BadRequest(format!("Invalid {} format", what))
    })
}

fn require_asin(raw: &str) -> Result<String, AppError> {
    let candidate = raw.trim();
    if is_valid_asin(candidate) {
        return Ok(candidate.to_string());
    }
    extract_asin(candidate).ok_or_else(|| AppError::BadRequest("Invalid ASIN".to_string()))
}

fn require_target_price(target_price: f64) -> Result<f64, AppError> {
    if target_price.is_finite() && target_price > 0.0 {
        Ok(target_price)
    } else {
        Err(AppError::BadRequest("Target price must be a positive number".to_string()))
    }
}

pub async fn scrape_price(
    fetcher: web::Data<PageFetcher>,
    body: web::Json<UrlRequest>,
) -> Result<HttpResponse, AppError> {
    body.validate()?;
    supported_retailer(&body.url)?;

    debug!("Scraping price for {}", body.url);
    let (price, listing) = fetcher.price(&body.url).await.map_err(|e| {
        error!("Scrape error for {}: {}", body.url, e);
        AppError::Upstream(SCRAPE_FAILED.to_string())
    })?;

    info!("Scraped price {} for {}", price, listing.link);
    Ok(HttpResponse::Ok().json(PriceResponse { price }))
}

pub async fn compare_prices(
    fetcher: web::Data<PageFetcher>,
    compare: web::Data<CompareClient>,
    body: web::Json<UrlRequest>,
) -> Result<HttpResponse, AppError> {
    body.validate()?;
    let source = supported_retailer(&body.url)?;

    let listing = fetcher.listing(&body.url).await.map_err(|e| {
        error!("Scrape error for {}: {}", body.url, e);
        AppError::Upstream("Could not read the product page.".to_string())
    })?;
    let title = listing
        .title
        .clone()
        .ok_or_else(|| AppError::Upstream("Could not read the product title.".to_string()))?;

    let offers = match compare.shopping_results(&title).await {
        Ok(offers) => offers,
        Err(e) => {
            warn!("Price comparison for {:?} unavailable: {}", title, e);
            Vec::new()
        }
    };

    let results = compare_across(source, &listing, &offers);
    info!("Compared {} platforms for {:?}", results.len(), title);
    Ok(HttpResponse::Ok().json(CompareResponse { results }))
}

pub async fn create_track(
    store: web::Data<Store>,
    body: web::Json<CreateTrackRequest>,
) -> Result<HttpResponse, AppError> {
    body.validate()?;
    supported_retailer(&body.url)?;
    let target_price = require_target_price(body.target_price)?;

    let track = Track {
        id: None,
        url: body.url.trim().to_string(),
        target_price,
        email: body.email.clone(),
        is_active: true,
        last_checked_price: None,
        created_at: DateTime::now(),
    };

    let id = store.insert_track(&track).await.map_err(|e| {
        error!("Failed to save track request: {}", e);
        AppError::from(e)
    })?;

    info!("New track request saved with ID: {:?}", id);
    Ok(HttpResponse::Created().json(MessageResponse {
        message: "Tracking started successfully!".to_string(),
    }))
}

/// Returns the stored product for `asin`, scraping and storing it first when
/// it is unknown.
async fn ensure_amazon_product(
    store: &Store,
    fetcher: &PageFetcher,
    asin: &str,
) -> Result<Product, AppError> {
    if let Some(product) = store.find_product_by_asin(asin).await? {
        return Ok(product);
    }

    let url = amazon_product_url(asin);
    let listing = fetcher.listing(&url).await.map_err(|e| {
        error!("Could not scrape new product {}: {}", asin, e);
        AppError::Upstream("Could not fetch product details.".to_string())
    })?;

    let details = ProductDetails {
        title: listing.title.clone().unwrap_or_else(|| format!("Amazon product {}", asin)),
        brand: None,
        image: listing.image.clone(),
        url: Some(url),
    };
    let product = store
        .upsert_amazon_product(asin, &details)
        .await?
        .ok_or_else(|| AppError::Upstream("Product could not be stored.".to_string()))?;

    if let (Some(id), Some(price)) = (product.id, listing.price) {
        store.record_price(id, Some(price), listing.price_text.clone()).await?;
    }

    info!("Stored new product {} ({})", asin, product.title);
    Ok(product)
}

pub async fn create_watch(
    store: web::Data<Store>,
    fetcher: web::Data<PageFetcher>,
    body: web::Json<CreateWatchRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    body.validate()?;
    let asin = require_asin(&body.asin)?;
    let target_price = require_target_price(body.target_price)?;

    let email = body.email.filter(|e| !e.trim().is_empty());
    let fcm_token = body.fcm_token.filter(|t| !t.trim().is_empty());
    if email.is_none() && fcm_token.is_none() {
        return Err(AppError::BadRequest(
            "An email or a push token is required".to_string(),
        ));
    }

    let product = ensure_amazon_product(&store, &fetcher, &asin).await?;
    let product_id = product
        .id
        .ok_or_else(|| AppError::Upstream("Product could not be stored.".to_string()))?;

    let watcher = Watcher {
        id: None,
        product_id,
        asin: asin.clone(),
        email,
        fcm_token,
        target_price,
        notified: false,
        last_notified_price: None,
        created_at: DateTime::now(),
    };

    let watcher_id = store
        .insert_watcher(&watcher)
        .await?
        .ok_or_else(|| AppError::Upstream("Watcher could not be stored.".to_string()))?;

    info!("Watcher {} created for {}", watcher_id, asin);
    Ok(HttpResponse::Created().json(WatchCreated {
        watcher_id: watcher_id.to_hex(),
    }))
}

pub async fn delete_watch(
    store: web::Data<Store>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (asin, watcher_id) = path.into_inner();
    let watcher_id = parse_object_id(&watcher_id, "watcher ID")?;

    debug!("Deleting watcher {} for {}", watcher_id, asin);
    if store.delete_watcher(&asin, watcher_id).await? {
        info!("Watcher deleted successfully: {}", watcher_id);
        Ok(HttpResponse::Ok().json(MessageResponse {
            message: "Watcher deleted".to_string(),
        }))
    } else {
        debug!("Watcher not found for deletion: {}", watcher_id);
        Err(AppError::NotFound("Watcher not found".to_string()))
    }
}

pub async fn product_by_barcode(
    store: web::Data<Store>,
    fetcher: web::Data<PageFetcher>,
    barcodes: web::Data<BarcodeClient>,
    code: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let code = code.into_inner();
    if !is_valid_barcode(&code) {
        return Err(AppError::BadRequest("Invalid barcode".to_string()));
    }

    if let Some(product) = store.find_product_by_barcode(&code).await? {
        debug!("Found product for barcode {} in the database", code);
        return Ok(HttpResponse::Ok().json(ProductEnvelope {
            product: ProductView::from(&product),
        }));
    }

    info!("Barcode {} not in the database, querying providers", code);
    let found = barcodes
        .lookup(&code)
        .await
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    let mut price = found.price.map(|p| (p, None));
    let mut url = found.link.clone();
    if price.is_none() {
        match fetcher.search_amazon(&found.title).await {
            Ok(hits) => {
                if let Some(hit) = best_match(&found.title, &hits) {
                    debug!("Best Amazon match for {:?} is {:?}", found.title, hit.title);
                    price = hit.price.map(|p| (p, hit.price_text.clone()));
                    url = hit.link.clone().or(url);
                }
            }
            Err(e) => warn!("Amazon search fallback for {:?} failed: {}", found.title, e),
        }
    }

    let mut product = store
        .insert_barcode_product(
            &code,
            ProductDetails {
                title: found.title,
                brand: found.brand,
                image: found.image,
                url,
            },
        )
        .await?;

    if let (Some(id), Some((amount, text))) = (product.id, price) {
        store.record_price(id, Some(amount), text.clone()).await?;
        product.last_price = Some(amount);
        product.last_price_text = text;
    }

    Ok(HttpResponse::Ok().json(ProductEnvelope {
        product: ProductView::from(&product),
    }))
}

pub async fn history_by_barcode(
    store: web::Data<Store>,
    barcode: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let product = store
        .find_product_by_barcode(barcode.as_str())
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
    let history = history_points(&store, &product).await?;

    Ok(HttpResponse::Ok().json(HistoryResponse {
        product: ProductView::from(&product),
        history,
    }))
}

pub async fn get_product(
    store: web::Data<Store>,
    asin: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let asin = require_asin(&asin)?;
    let product = store
        .find_product_by_asin(&asin)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    Ok(HttpResponse::Ok().json(ProductView::from(&product)))
}

pub async fn price_history(
    store: web::Data<Store>,
    asin: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let asin = require_asin(&asin)?;
    let product = store
        .find_product_by_asin(&asin)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
    let history = history_points(&store, &product).await?;

    debug!("Returning {} price points for {}", history.len(), asin);
    Ok(HttpResponse::Ok().json(history))
}

async fn history_points(store: &Store, product: &Product) -> Result<Vec<PricePoint>, AppError> {
    let Some(product_id) = product.id else {
        return Ok(Vec::new());
    };
    let entries = store.price_history_for(product_id).await.map_err(|e| {
        error!("Failed to load price history for {}: {}", product_id, e);
        AppError::from(e)
    })?;
    Ok(entries.into_iter().map(PricePoint::from).collect())
}

pub async fn list_alerts(store: web::Data<Store>) -> Result<HttpResponse, AppError> {
    let watchers = store.all_watchers().await?;

    let mut product_ids: Vec<ObjectId> = watchers.iter().map(|w| w.product_id).collect();
    product_ids.sort();
    product_ids.dedup();
    let products: HashMap<ObjectId, Product> = store
        .products_by_ids(&product_ids)
        .await?
        .into_iter()
        .filter_map(|p| p.id.map(|id| (id, p)))
        .collect();

    let alerts: Vec<AlertView> = watchers
        .into_iter()
        .filter_map(|watcher| {
            let watcher_id = watcher.id?;
            let product = products.get(&watcher.product_id);
            Some(AlertView {
                watcher_id: watcher_id.to_hex(),
                title: product
                    .map(|p| p.title.clone())
                    .unwrap_or_else(|| watcher.asin.clone()),
                image: product.and_then(|p| p.image.clone()),
                url: product
                    .and_then(|p| p.url.clone())
                    .or_else(|| Some(amazon_product_url(&watcher.asin))),
                asin: watcher.asin,
                target_price: watcher.target_price,
            })
        })
        .collect();

    info!("Retrieved {} alerts", alerts.len());
    Ok(HttpResponse::Ok().json(alerts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test, App};
    use mongodb::Client;
    use serde_json::Value;

    // The driver connects lazily; every request below is rejected before any
    // database round-trip.
    macro_rules! test_app {
        () => {{
            let client = Client::with_uri_str("mongodb://127.0.0.1:1").await.unwrap();
            let store = Store::new(client.database("price_tracker_test"));
            let http = reqwest::Client::new();

            actix_test::init_service(
                App::new()
                    .app_data(web::Data::new(store))
                    .app_data(web::Data::new(PageFetcher::new(http.clone(), None)))
                    .app_data(web::Data::new(BarcodeClient::new(http.clone(), None)))
                    .app_data(web::Data::new(CompareClient::new(http, None)))
                    .configure(configure),
            )
            .await
        }};
    }

    async fn message_of(resp: actix_web::dev::ServiceResponse) -> String {
        let body: Value = actix_test::read_body_json(resp).await;
        body["message"].as_str().unwrap_or_default().to_string()
    }

    #[actix_web::test]
    async fn scrape_price_rejects_unsupported_sites() {
        let app = test_app!();
        let req = actix_test::TestRequest::post()
            .uri("/api/scrape-price")
            .set_json(json!({ "url": "https://www.example.com/item/1" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, UNSUPPORTED_URL);
    }

    #[actix_web::test]
    async fn scrape_price_requires_a_url() {
        let app = test_app!();
        let req = actix_test::TestRequest::post()
            .uri("/api/scrape-price")
            .set_json(json!({}))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(message_of(resp).await.contains("url"));
    }

    #[actix_web::test]
    async fn compare_rejects_malformed_urls() {
        let app = test_app!();
        let req = actix_test::TestRequest::post()
            .uri("/api/compare-prices")
            .set_json(json!({ "url": "amazon dot in" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn track_validates_email_and_target() {
        let app = test_app!();

        let bad_email = actix_test::TestRequest::post()
            .uri("/api/track")
            .set_json(json!({
                "url": "https://www.amazon.in/dp/B0CHX1W1XY",
                "targetPrice": "999",
                "email": "not-an-email"
            }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, bad_email).await.status(), StatusCode::BAD_REQUEST);

        let negative = actix_test::TestRequest::post()
            .uri("/api/track")
            .set_json(json!({
                "url": "https://www.amazon.in/dp/B0CHX1W1XY",
                "targetPrice": -5,
                "email": "buyer@example.com"
            }))
            .to_request();
        let resp = actix_test::call_service(&app, negative).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "Target price must be a positive number");
    }

    #[actix_web::test]
    async fn watch_requires_asin_and_a_channel() {
        let app = test_app!();

        let bad_asin = actix_test::TestRequest::post()
            .uri("/api/watch")
            .set_json(json!({ "asin": "https://www.amazon.in/s?k=tv", "email": "a@b.co", "target_price": 10 }))
            .to_request();
        let resp = actix_test::call_service(&app, bad_asin).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "Invalid ASIN");

        let no_channel = actix_test::TestRequest::post()
            .uri("/api/watch")
            .set_json(json!({ "asin": "B0CHX1W1XY", "fcmToken": "  ", "target_price": 10 }))
            .to_request();
        let resp = actix_test::call_service(&app, no_channel).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "An email or a push token is required");
    }

    #[actix_web::test]
    async fn delete_watch_rejects_malformed_ids() {
        let app = test_app!();
        let req = actix_test::TestRequest::delete()
            .uri("/api/watch/B0CHX1W1XY/not-an-object-id")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "Invalid watcher ID format");
    }

    #[actix_web::test]
    async fn barcode_and_price_routes_validate_identifiers() {
        let app = test_app!();

        let barcode = actix_test::TestRequest::get().uri("/api/product/barcode/12ab").to_request();
        assert_eq!(actix_test::call_service(&app, barcode).await.status(), StatusCode::BAD_REQUEST);

        let prices = actix_test::TestRequest::get().uri("/api/prices/short").to_request();
        assert_eq!(actix_test::call_service(&app, prices).await.status(), StatusCode::BAD_REQUEST);

        let product = actix_test::TestRequest::get().uri("/api/product/lowercase1").to_request();
        assert_eq!(actix_test::call_service(&app, product).await.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn accepts_asin_or_amazon_url() {
        assert_eq!(require_asin(" B0CHX1W1XY ").unwrap(), "B0CHX1W1XY");
        assert_eq!(
            require_asin("https://www.amazon.in/Echo/dp/B09B8V1LZ3/ref=x").unwrap(),
            "B09B8V1LZ3"
        );
        assert!(require_asin("B0CHX").is_err());
    }
}
