//! Periodic price check over watched products and legacy track requests.

use rand::Rng;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{Product, Track, Watcher};
use crate::notifier::{Notifier, PriceAlert};
use crate::pricing::should_notify;
use crate::retailer::amazon_product_url;
use crate::scrape::{PageFetcher, ScrapeError};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("document has no id")]
    MissingId,
}

/// What a track check decided to do with the freshly scraped price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackDecision {
    pub notify: bool,
    pub keep_active: bool,
}

pub fn decide_track(track: &Track, price: f64) -> TrackDecision {
    let notify = should_notify(price, track.target_price, None);
    TrackDecision {
        notify,
        keep_active: !notify,
    }
}

/// Watchers of one product that should hear about `price`.
pub fn watchers_to_notify(watchers: &[Watcher], price: f64) -> Vec<&Watcher> {
    watchers
        .iter()
        .filter(|w| should_notify(price, w.target_price, w.last_notified_price))
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub checked: usize,
    pub failed: usize,
    pub notified: usize,
}

/// Clears the running flag when a run ends, including on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PriceTracker {
    store: Store,
    fetcher: PageFetcher,
    notifier: Notifier,
    item_delay: Duration,
    running: AtomicBool,
}

impl PriceTracker {
    pub fn new(store: Store, fetcher: PageFetcher, notifier: Notifier, item_delay: Duration) -> Self {
        PriceTracker {
            store,
            fetcher,
            notifier,
            item_delay,
            running: AtomicBool::new(false),
        }
    }

    pub async fn run(self: Arc<Self>, every: Duration) {
        info!("Price checks scheduled every {:?}", every);
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Some(summary) = self.check_all().await {
                info!(
                    "Price check finished: {} checked, {} failed, {} notified",
                    summary.checked, summary.failed, summary.notified
                );
            }
        }
    }

    /// One full pass. Returns `None` when another pass is still running,
    /// which covers a slow tick as well as any caller that triggers a pass
    /// outside the schedule.
    pub async fn check_all(&self) -> Option<RunSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous price check still running, skipping this one");
            return None;
        }
        let _guard = RunGuard(&self.running);

        info!("--- Running price check ---");
        let mut summary = RunSummary::default();

        match self.store.watched_products().await {
            Ok(products) => {
                for product in &products {
                    let outcome = self.check_product(product).await;
                    record_outcome(&mut summary, outcome, &product.title);
                    self.pause().await;
                }
            }
            Err(e) => error!("Could not load watched products: {}", e),
        }

        match self.store.active_tracks().await {
            Ok(tracks) if tracks.is_empty() => debug!("No active track requests"),
            Ok(tracks) => {
                for track in &tracks {
                    let outcome = self.check_track(track).await;
                    record_outcome(&mut summary, outcome, &track.url);
                    self.pause().await;
                }
            }
            Err(e) => error!("Could not load track requests: {}", e),
        }

        Some(summary)
    }

    async fn pause(&self) {
        let delay = jittered(self.item_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn check_product(&self, product: &Product) -> Result<usize, TrackerError> {
        let product_id = product.id.ok_or(TrackerError::MissingId)?;
        let url = match (&product.asin, &product.url) {
            (Some(asin), _) => amazon_product_url(asin),
            (None, Some(url)) => url.clone(),
            (None, None) => {
                debug!("Product {} has no URL to check", product_id);
                return Ok(0);
            }
        };

        let (price, listing) = self.fetcher.price(&url).await?;
        info!("Current price for {} is {}", product.title, price);

        self.store
            .record_price(product_id, Some(price), listing.price_text.clone())
            .await?;

        let watchers = self.store.watchers_for_product(product_id).await?;
        let mut sent = 0;
        for watcher in watchers_to_notify(&watchers, price) {
            let Some(watcher_id) = watcher.id else { continue };
            let alert = PriceAlert {
                title: &product.title,
                url: &url,
                target_price: watcher.target_price,
                current_price: price,
            };

            info!("PRICE DROP for watcher {} on {}", watcher_id, watcher.asin);
            if self
                .notifier
                .deliver(watcher.email.as_deref(), watcher.fcm_token.as_deref(), &alert)
                .await
            {
                self.store.mark_watcher_notified(watcher_id, price).await?;
                sent += 1;
            }
        }

        Ok(sent)
    }

    async fn check_track(&self, track: &Track) -> Result<usize, TrackerError> {
        let track_id = track.id.ok_or(TrackerError::MissingId)?;
        let (price, listing) = self.fetcher.price(&track.url).await?;
        debug!("Current price for {} is {}", track.url, price);

        let decision = decide_track(track, price);
        let mut sent = 0;
        if decision.notify {
            info!("PRICE DROP for {}", track.email);
            let alert = PriceAlert {
                title: listing.title.as_deref().unwrap_or("The product you are tracking"),
                url: &track.url,
                target_price: track.target_price,
                current_price: price,
            };
            if self.notifier.deliver(Some(&track.email), None, &alert).await {
                sent = 1;
            }
        }

        // An undelivered alert keeps the track alive for the next run.
        let keep_active = decision.keep_active || sent == 0;
        self.store.update_track(track_id, price, keep_active).await?;
        Ok(sent)
    }
}

fn record_outcome(summary: &mut RunSummary, outcome: Result<usize, TrackerError>, label: &str) {
    summary.checked += 1;
    match outcome {
        Ok(sent) => summary.notified += sent,
        Err(e) => {
            summary.failed += 1;
            error!("Failed to check price for {}: {}", label, e);
        }
    }
}

fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let extra = rand::thread_rng().gen_range(0..=millis / 2);
    Duration::from_millis(millis.saturating_add(extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{EmailSender, PushSender};
    use mongodb::bson::{oid::ObjectId, DateTime};

    fn track(target: f64) -> Track {
        Track {
            id: Some(ObjectId::new()),
            url: "https://www.flipkart.com/item/p/itm1".into(),
            target_price: target,
            email: "buyer@example.com".into(),
            is_active: true,
            last_checked_price: None,
            created_at: DateTime::now(),
        }
    }

    fn watcher(target: f64, last_notified: Option<f64>) -> Watcher {
        Watcher {
            id: Some(ObjectId::new()),
            product_id: ObjectId::new(),
            asin: "B0CHX1W1XY".into(),
            email: Some("buyer@example.com".into()),
            fcm_token: None,
            target_price: target,
            notified: last_notified.is_some(),
            last_notified_price: last_notified,
            created_at: DateTime::now(),
        }
    }

    #[test]
    fn track_deactivates_once_target_is_reached() {
        assert_eq!(
            decide_track(&track(500.0), 499.0),
            TrackDecision { notify: true, keep_active: false }
        );
        assert_eq!(
            decide_track(&track(500.0), 500.0),
            TrackDecision { notify: true, keep_active: false }
        );
        assert_eq!(
            decide_track(&track(500.0), 501.0),
            TrackDecision { notify: false, keep_active: true }
        );
    }

    #[test]
    fn selects_watchers_below_target_and_last_notified_price() {
        let watchers = vec![
            watcher(1000.0, None),
            watcher(1000.0, Some(900.0)),
            watcher(1000.0, Some(950.0)),
            watcher(800.0, None),
        ];

        let chosen = watchers_to_notify(&watchers, 920.0);
        assert_eq!(chosen.len(), 2);
        assert_eq!(chosen[0].last_notified_price, None);
        assert_eq!(chosen[1].last_notified_price, Some(950.0));
    }

    #[test]
    fn jitter_stays_within_half_the_base_delay() {
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
        for _ in 0..50 {
            let delay = jittered(Duration::from_millis(1000));
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn failures_are_counted_and_do_not_stop_the_tally() {
        let mut summary = RunSummary::default();
        record_outcome(&mut summary, Ok(2), "a");
        record_outcome(&mut summary, Err(TrackerError::MissingId), "b");
        record_outcome(&mut summary, Ok(0), "c");
        assert_eq!(summary, RunSummary { checked: 3, failed: 1, notified: 2 });
    }

    #[test]
    fn jitter_saturates_on_huge_delays() {
        let huge = Duration::from_millis(u64::MAX);
        assert_eq!(jittered(huge), huge);
        assert_eq!(jittered(Duration::MAX), huge);
    }

    async fn idle_tracker() -> PriceTracker {
        // Connects lazily; a skipped pass never touches it.
        let client = mongodb::Client::with_uri_str("mongodb://127.0.0.1:1").await.unwrap();
        let http = reqwest::Client::new();
        PriceTracker::new(
            Store::new(client.database("price_tracker_test")),
            PageFetcher::new(http.clone(), None),
            Notifier {
                email: EmailSender::new(http.clone(), None, "alerts@example.com".into()),
                push: PushSender::new(http, None),
            },
            Duration::ZERO,
        )
    }

    #[actix_web::test]
    async fn skips_a_pass_while_another_is_running() {
        let tracker = idle_tracker().await;
        tracker.running.store(true, Ordering::Release);

        assert!(tracker.check_all().await.is_none());
        assert!(tracker.running.load(Ordering::Acquire));
    }

    #[test]
    fn run_guard_releases_flag() {
        let flag = AtomicBool::new(true);
        {
            let _guard = RunGuard(&flag);
        }
        assert!(!flag.load(Ordering::Acquire));
    }
}
