//! MongoDB access for products, price history, watchers and tracks.

use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, DateTime},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use tracing::{debug, info};

use crate::models::{PriceEntry, Product, Track, Watcher};

type DbResult<T> = Result<T, mongodb::error::Error>;

/// Fields scraped or looked up for a product, before it has an id.
#[derive(Debug, Clone, Default)]
pub struct ProductDetails {
    pub title: String,
    pub brand: Option<String>,
    pub image: Option<String>,
    pub url: Option<String>,
}

#[derive(Clone)]
pub struct Store {
    database: Database,
}

impl Store {
    pub fn new(database: Database) -> Self {
        Store { database }
    }

    fn products(&self) -> Collection<Product> {
        self.database.collection("products")
    }

    fn price_history(&self) -> Collection<PriceEntry> {
        self.database.collection("price_history")
    }

    fn watchers(&self) -> Collection<Watcher> {
        self.database.collection("watchers")
    }

    fn tracks(&self) -> Collection<Track> {
        self.database.collection("tracks")
    }

    /// Unique sparse indexes keep one product per ASIN and per barcode.
    pub async fn ensure_indexes(&self) -> DbResult<()> {
        let unique_sparse = || IndexOptions::builder().unique(true).sparse(true).build();

        self.products()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "asin": 1 })
                    .options(unique_sparse())
                    .build(),
                None,
            )
            .await?;
        self.products()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "barcode": 1 })
                    .options(unique_sparse())
                    .build(),
                None,
            )
            .await?;
        self.price_history()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "product_id": 1, "timestamp": 1 })
                    .build(),
                None,
            )
            .await?;
        self.watchers()
            .create_index(IndexModel::builder().keys(doc! { "product_id": 1 }).build(), None)
            .await?;
        self.tracks()
            .create_index(IndexModel::builder().keys(doc! { "is_active": 1 }).build(), None)
            .await?;

        info!("Database indexes ensured");
        Ok(())
    }

    // Products

    pub async fn find_product_by_asin(&self, asin: &str) -> DbResult<Option<Product>> {
        self.products().find_one(doc! { "asin": asin }, None).await
    }

    pub async fn find_product_by_barcode(&self, barcode: &str) -> DbResult<Option<Product>> {
        self.products().find_one(doc! { "barcode": barcode }, None).await
    }

    /// Inserts or refreshes the product for `asin` and returns the stored
    /// document.
    pub async fn upsert_amazon_product(
        &self,
        asin: &str,
        details: &ProductDetails,
    ) -> DbResult<Option<Product>> {
        let now = DateTime::now();
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        self.products()
            .find_one_and_update(
                doc! { "asin": asin },
                doc! {
                    "$set": {
                        "title": &details.title,
                        "brand": details.brand.clone(),
                        "image": details.image.clone(),
                        "url": details.url.clone(),
                        "updated_at": now,
                    },
                    "$setOnInsert": { "created_at": now },
                },
                options,
            )
            .await
    }

    pub async fn insert_barcode_product(
        &self,
        barcode: &str,
        details: ProductDetails,
    ) -> DbResult<Product> {
        let mut product = Product {
            id: None,
            asin: None,
            barcode: Some(barcode.to_string()),
            title: details.title,
            brand: details.brand,
            image: details.image,
            url: details.url,
            last_price: None,
            last_price_text: None,
            created_at: DateTime::now(),
            updated_at: None,
        };

        let result = self.products().insert_one(&product, None).await?;
        product.id = result.inserted_id.as_object_id();
        debug!("Inserted product for barcode {}", barcode);
        Ok(product)
    }

    /// Stores the latest price on the product and appends it to the history.
    pub async fn record_price(
        &self,
        product_id: ObjectId,
        price: Option<f64>,
        price_text: Option<String>,
    ) -> DbResult<()> {
        let now = DateTime::now();

        self.products()
            .update_one(
                doc! { "_id": product_id },
                doc! {
                    "$set": {
                        "last_price": price,
                        "last_price_text": price_text.clone(),
                        "updated_at": now,
                    }
                },
                None,
            )
            .await?;

        let entry = PriceEntry {
            id: None,
            product_id,
            price,
            price_text,
            timestamp: now,
        };
        self.price_history().insert_one(entry, None).await?;

        debug!("Recorded price {:?} for product {}", price, product_id);
        Ok(())
    }

    pub async fn price_history_for(&self, product_id: ObjectId) -> DbResult<Vec<PriceEntry>> {
        let options = FindOptions::builder().sort(doc! { "timestamp": 1 }).build();
        self.price_history()
            .find(doc! { "product_id": product_id }, options)
            .await?
            .try_collect()
            .await
    }

    pub async fn products_by_ids(&self, ids: &[ObjectId]) -> DbResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.products()
            .find(doc! { "_id": { "$in": ids.to_vec() } }, None)
            .await?
            .try_collect()
            .await
    }

    /// Products that at least one watcher is waiting on.
    pub async fn watched_products(&self) -> DbResult<Vec<Product>> {
        let ids: Vec<ObjectId> = self
            .watchers()
            .distinct("product_id", None, None)
            .await?
            .into_iter()
            .filter_map(|value| match value {
                Bson::ObjectId(id) => Some(id),
                _ => None,
            })
            .collect();

        self.products_by_ids(&ids).await
    }

    // Watchers

    pub async fn insert_watcher(&self, watcher: &Watcher) -> DbResult<Option<ObjectId>> {
        let result = self.watchers().insert_one(watcher, None).await?;
        Ok(result.inserted_id.as_object_id())
    }

    pub async fn delete_watcher(&self, asin: &str, watcher_id: ObjectId) -> DbResult<bool> {
        let result = self
            .watchers()
            .delete_one(doc! { "_id": watcher_id, "asin": asin }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    pub async fn watchers_for_product(&self, product_id: ObjectId) -> DbResult<Vec<Watcher>> {
        self.watchers()
            .find(doc! { "product_id": product_id }, None)
            .await?
            .try_collect()
            .await
    }

    pub async fn all_watchers(&self) -> DbResult<Vec<Watcher>> {
        let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
        self.watchers().find(None, options).await?.try_collect().await
    }

    pub async fn mark_watcher_notified(&self, watcher_id: ObjectId, price: f64) -> DbResult<()> {
        self.watchers()
            .update_one(
                doc! { "_id": watcher_id },
                doc! { "$set": { "notified": true, "last_notified_price": price } },
                None,
            )
            .await?;
        Ok(())
    }

    // Tracks

    pub async fn insert_track(&self, track: &Track) -> DbResult<Option<ObjectId>> {
        let result = self.tracks().insert_one(track, None).await?;
        Ok(result.inserted_id.as_object_id())
    }

    pub async fn active_tracks(&self) -> DbResult<Vec<Track>> {
        self.tracks()
            .find(doc! { "is_active": true }, None)
            .await?
            .try_collect()
            .await
    }

    pub async fn update_track(
        &self,
        track_id: ObjectId,
        last_checked_price: f64,
        is_active: bool,
    ) -> DbResult<()> {
        self.tracks()
            .update_one(
                doc! { "_id": track_id },
                doc! {
                    "$set": {
                        "last_checked_price": last_checked_price,
                        "is_active": is_active,
                    }
                },
                None,
            )
            .await?;
        Ok(())
    }
}
