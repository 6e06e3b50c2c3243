//! Read-through cache, write-behind review submission and the connectivity
//! state machine.
//!
//! The coordinator is the only component that mutates the durable store and
//! the pending-write queue. Reads go store first and fall back to the
//! network on an empty snapshot; reviews are queued, stored optimistically
//! and replayed when the backend is reachable.
//!
//! A snapshot holding only optimistic reviews is partial. While online it
//! is completed from the network on the next read; while offline it is
//! served as is.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::app_error::{CoreError, CoreResult};
use crate::config::CoreConfig;
use crate::durable_store::DurableStore;
use crate::local_db_model::{normalize_id, Collection, Record, Restaurant, Review};
use crate::notifier::{LogNotifier, Notice, Notifier};
use crate::pending_queue::{DrainOutcome, PendingWriteQueue};
use crate::response_cache::{CachingFetcher, ResponseCache};
use crate::transport::{Backend, CacheMode, ReqwestFetcher, RestBackend};

/// Sentinel meaning "no filter on this dimension".
pub const ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }
}

/// One filter dimension of the restaurant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Only(String),
}

impl Selection {
    pub fn parse(value: &str) -> Self {
        if value == ALL {
            Selection::All
        } else {
            Selection::Only(value.to_string())
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(wanted) => wanted == value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectReport {
    pub drain: DrainOutcome,
    /// Number of reviews after the refetch, when it succeeded.
    pub refetched: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refetch_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Unchanged,
    WentOffline,
    Reconnected(ReconnectReport),
}

pub struct SyncCoordinator {
    store: DurableStore,
    queue: PendingWriteQueue,
    backend: Arc<dyn Backend>,
    notifier: Arc<dyn Notifier>,
    online: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        store: DurableStore,
        queue: PendingWriteQueue,
        backend: Arc<dyn Backend>,
        notifier: Arc<dyn Notifier>,
        initial: Connectivity,
    ) -> Self {
        Self {
            store,
            queue,
            backend,
            notifier,
            online: AtomicBool::new(initial == Connectivity::Online),
        }
    }

    /// Wires the LMDB stores, the response cache and the reqwest backend
    /// described by `config`. Storage problems degrade to network-only
    /// rather than failing.
    pub async fn from_config(config: &CoreConfig) -> Self {
        let dir = config.data_dir.as_deref();
        let store = DurableStore::open(dir, config.map_size_bytes);
        let queue = PendingWriteQueue::open(dir, config.map_size_bytes);
        let backend = build_backend(config, dir).await;
        info!(
            "Offline core ready (persistent: {}, online: {})",
            store.is_persistent(),
            config.start_online
        );
        let coordinator = Self::new(
            store,
            queue,
            backend,
            Arc::new(LogNotifier),
            Connectivity::from_online(config.start_online),
        );
        if let Some(report) = coordinator.resume().await {
            debug!("Startup reconciliation: {report:?}");
        }
        coordinator
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn queue(&self) -> &PendingWriteQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> Connectivity {
        Connectivity::from_online(self.online.load(Ordering::Acquire))
    }

    /// Read-through: the stored snapshot when there is one, otherwise the
    /// network copy, which is stored before being returned. Network failures
    /// on the miss path are returned to the caller.
    ///
    /// A partial snapshot is merged with the network copy when online and
    /// served unchanged when offline or when that fetch fails.
    pub async fn fetch_collection<R: Record>(&self) -> CoreResult<Vec<R>> {
        let collection = R::COLLECTION;
        let stored = self.store.get_all::<R>();
        if stored.is_empty() {
            return self.fetch_from_network(CacheMode::Default).await;
        }
        if self.store.is_complete(collection) {
            debug!("Serving {} {collection} from durable store", stored.len());
            return Ok(stored);
        }
        if self.connectivity() == Connectivity::Offline {
            debug!("Serving partial {collection} snapshot while offline");
            return Ok(stored);
        }
        match self.fetch_from_network::<R>(CacheMode::Default).await {
            Ok(network) => Ok(merge_snapshot(stored, network)),
            Err(e) => {
                warn!(
                    "Could not complete {collection} snapshot, serving {} local records: {e}",
                    stored.len()
                );
                Ok(stored)
            }
        }
    }

    /// Clears the snapshot, then refills it with the server's current copy,
    /// bypassing any response cache.
    pub async fn refetch<R: Record>(&self) -> CoreResult<Vec<R>> {
        let collection = R::COLLECTION;
        match self.store.clear(collection) {
            Ok(removed) => info!("Cleared {removed} stored {collection} for refetch"),
            Err(e) => warn!("Could not clear {collection} before refetch: {e}"),
        }
        self.fetch_from_network(CacheMode::Reload).await
    }

    /// [`refetch`](Self::refetch) by collection name; returns the new size.
    pub async fn refetch_collection(&self, collection: Collection) -> CoreResult<usize> {
        match collection {
            Collection::Restaurants => Ok(self.refetch::<Restaurant>().await?.len()),
            Collection::Reviews => Ok(self.refetch::<Review>().await?.len()),
        }
    }

    async fn fetch_from_network<R: Record>(&self, mode: CacheMode) -> CoreResult<Vec<R>> {
        let collection = R::COLLECTION;
        let body = self.backend.list(collection, mode).await?;
        let records: Vec<R> = serde_json::from_slice(&body)?;
        info!("Fetched {} {collection} from network", records.len());
        if self.persist(&records) {
            if let Err(e) = self.store.mark_complete(collection) {
                warn!("Could not mark {collection} snapshot complete: {e}");
            }
        }
        Ok(records)
    }

    /// Returns whether the records reached the store.
    fn persist<R: Record>(&self, records: &[R]) -> bool {
        match self.store.put_all(records) {
            Ok(()) => true,
            Err(CoreError::StorageUnavailable) => {
                debug!("No persistent storage, {} not cached", R::COLLECTION);
                false
            }
            Err(e) => {
                warn!("Could not store {}: {e}", R::COLLECTION);
                false
            }
        }
    }

    /// `id` may be a number or text; text is normalized the way the
    /// browser client parses ids out of URLs.
    pub async fn lookup_by_id<R: Record>(&self, id: impl ToString) -> CoreResult<R> {
        let raw = id.to_string();
        let not_found = || CoreError::NotFound {
            collection: R::COLLECTION,
            id: raw.clone(),
        };
        let wanted = normalize_id(&raw).ok_or_else(not_found)?;

        self.fetch_collection::<R>()
            .await?
            .into_iter()
            .find(|record| record.id() == Some(wanted))
            .ok_or_else(not_found)
    }

    pub async fn filter_by<R, P>(&self, predicate: P) -> CoreResult<Vec<R>>
    where
        R: Record,
        P: Fn(&R) -> bool,
    {
        let records = self.fetch_collection::<R>().await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Projects one field and drops repeats, keeping first-seen order.
    pub async fn distinct_values<R, V, F>(&self, select: F) -> CoreResult<Vec<V>>
    where
        R: Record,
        V: PartialEq,
        F: Fn(&R) -> V,
    {
        let records = self.fetch_collection::<R>().await?;
        let mut values: Vec<V> = Vec::new();
        for record in &records {
            let value = select(record);
            if !values.contains(&value) {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Stamps, queues and optimistically stores a review, then drains right
    /// away when online. The returned record is the optimistic one; its
    /// backend id arrives with the next refetch.
    ///
    /// Without a usable queue the review is posted directly and the
    /// backend's copy is returned.
    pub async fn submit_review(&self, mut review: Review) -> CoreResult<Review> {
        validate_review(&review)?;

        let now = chrono::Utc::now().timestamp_millis();
        let created_at = *review.created_at.get_or_insert(now);
        review.updated_at.get_or_insert(created_at);
        if review.id.is_none() && review.local_key.is_none() {
            review.local_key = Some(Uuid::new_v4().to_string());
        }

        match self.queue.enqueue(&review) {
            Ok(_) => {}
            Err(CoreError::StorageUnavailable) => {
                debug!("No pending-write queue, posting review directly");
                return self.backend.create_review(&review).await;
            }
            Err(e) => {
                warn!("Could not queue review, posting directly: {e}");
                return self.backend.create_review(&review).await;
            }
        }

        // The optimistic copy must not become the whole reviews snapshot.
        if self.connectivity() == Connectivity::Online && self.store.is_persistent() {
            if let Err(e) = self.fetch_collection::<Review>().await {
                warn!("Could not load reviews before storing the new one: {e}");
            }
        }
        self.persist(std::slice::from_ref(&review));

        if self.connectivity() == Connectivity::Online {
            let outcome = self.drain().await;
            debug!("Drain after submit: {outcome:?}");
        } else {
            self.notifier.notify(Notice::ReviewQueued {
                restaurant_id: review.restaurant_id,
            });
        }
        Ok(review)
    }

    /// Replays the pending-write queue. Does nothing while offline.
    pub async fn drain(&self) -> DrainOutcome {
        if self.connectivity() == Connectivity::Offline {
            return DrainOutcome::Offline;
        }
        self.queue.drain(self.backend.as_ref()).await
    }

    /// Replays writes left queued by an earlier run. Online with a
    /// non-empty queue it runs the reconnect sequence once; otherwise it
    /// does nothing and returns `None`.
    pub async fn resume(&self) -> Option<ReconnectReport> {
        if self.connectivity() == Connectivity::Offline {
            return None;
        }
        match self.queue.len() {
            Ok(0) => None,
            Ok(queued) => {
                info!("Resuming {queued} reviews queued by a previous session");
                Some(self.reconcile().await)
            }
            Err(e) => {
                warn!("Could not inspect pending-write queue: {e}");
                None
            }
        }
    }

    /// Drain, then refetch reviews, whatever the drain's outcome.
    async fn reconcile(&self) -> ReconnectReport {
        let drain = self.drain().await;
        let (refetched, refetch_error) = match self.refetch::<Review>().await {
            Ok(reviews) => (Some(reviews.len()), None),
            Err(e) => {
                warn!("Refetch of reviews failed: {e}");
                (None, Some(e.to_string()))
            }
        };
        ReconnectReport {
            drain,
            refetched,
            refetch_error,
        }
    }

    /// Feeds a platform connectivity signal into the state machine.
    /// Offline to online drains the queue and then refetches reviews;
    /// online to offline only notifies.
    pub async fn set_connectivity(&self, now: Connectivity) -> Transition {
        let was_online = self.online.swap(now == Connectivity::Online, Ordering::AcqRel);
        match (was_online, now) {
            (false, Connectivity::Online) => {
                info!("Connectivity restored");
                self.notifier.notify(Notice::BackOnline);
                Transition::Reconnected(self.reconcile().await)
            }
            (true, Connectivity::Offline) => {
                info!("Connectivity lost");
                self.notifier.notify(Notice::WentOffline);
                Transition::WentOffline
            }
            _ => Transition::Unchanged,
        }
    }

    pub async fn restaurants(&self) -> CoreResult<Vec<Restaurant>> {
        self.fetch_collection().await
    }

    pub async fn reviews(&self) -> CoreResult<Vec<Review>> {
        self.fetch_collection().await
    }

    pub async fn restaurant_by_id(&self, id: impl ToString) -> CoreResult<Restaurant> {
        self.lookup_by_id(id).await
    }

    pub async fn review_by_id(&self, id: impl ToString) -> CoreResult<Review> {
        self.lookup_by_id(id).await
    }

    /// Reviews of one restaurant, optimistic ones included.
    pub async fn reviews_by_restaurant(&self, restaurant_id: impl ToString) -> CoreResult<Vec<Review>> {
        let raw = restaurant_id.to_string();
        let Some(restaurant_id) = normalize_id(&raw) else {
            return Ok(Vec::new());
        };
        self.filter_by(|r: &Review| r.restaurant_id == restaurant_id).await
    }

    pub async fn restaurants_by_cuisine(&self, cuisine: &str) -> CoreResult<Vec<Restaurant>> {
        self.filter_by(|r: &Restaurant| r.cuisine_type == cuisine).await
    }

    pub async fn restaurants_by_neighborhood(&self, neighborhood: &str) -> CoreResult<Vec<Restaurant>> {
        self.filter_by(|r: &Restaurant| r.neighborhood == neighborhood).await
    }

    /// Either dimension may be [`ALL`].
    pub async fn restaurants_by_cuisine_and_neighborhood(
        &self,
        cuisine: &str,
        neighborhood: &str,
    ) -> CoreResult<Vec<Restaurant>> {
        let cuisine = Selection::parse(cuisine);
        let neighborhood = Selection::parse(neighborhood);
        self.filter_by(|r: &Restaurant| {
            cuisine.matches(&r.cuisine_type) && neighborhood.matches(&r.neighborhood)
        })
        .await
    }

    pub async fn neighborhoods(&self) -> CoreResult<Vec<String>> {
        self.distinct_values(|r: &Restaurant| r.neighborhood.clone()).await
    }

    pub async fn cuisines(&self) -> CoreResult<Vec<String>> {
        self.distinct_values(|r: &Restaurant| r.cuisine_type.clone()).await
    }
}

/// Union keyed by store key; network records win, local-only ones stay.
fn merge_snapshot<R: Record>(stored: Vec<R>, network: Vec<R>) -> Vec<R> {
    let mut merged = BTreeMap::new();
    let mut unkeyed = Vec::new();
    for record in stored.into_iter().chain(network) {
        match record.store_key() {
            Some(key) => {
                merged.insert(key, record);
            }
            None => unkeyed.push(record),
        }
    }
    merged.into_values().chain(unkeyed).collect()
}

fn validate_review(review: &Review) -> CoreResult<()> {
    if !(1..=5).contains(&review.rating) {
        return Err(CoreError::InvalidReview(format!(
            "rating must be between 1 and 5, got {}",
            review.rating
        )));
    }
    if review.name.trim().is_empty() {
        return Err(CoreError::InvalidReview("reviewer name is empty".to_string()));
    }
    if review.comments.trim().is_empty() {
        return Err(CoreError::InvalidReview("comments are empty".to_string()));
    }
    Ok(())
}

async fn build_backend(config: &CoreConfig, dir: Option<&Path>) -> Arc<dyn Backend> {
    let fetcher = ReqwestFetcher::new();
    let settings = &config.response_cache;

    let cache = match dir {
        Some(dir) if settings.enabled => {
            match ResponseCache::open(dir, &settings.name, config.map_size_bytes) {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    warn!("Response cache unavailable: {e}");
                    None
                }
            }
        }
        _ => None,
    };

    let Some(cache) = cache else {
        return Arc::new(RestBackend::new(&config.base_url, fetcher));
    };

    if config.start_online && !settings.precache.is_empty() {
        if let Err(e) = cache.precache(&fetcher, &settings.precache).await {
            warn!("Precache of '{}' failed: {e}", cache.name());
        }
    }
    let fetcher = CachingFetcher::new(fetcher, cache, settings.strategy);
    Arc::new(RestBackend::new(&config.base_url, fetcher))
}
