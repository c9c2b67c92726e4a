//! Cache Client
//!
//! [`DmCache`] is the read-through facade: it keys each request, answers it
//! from the store tier when possible, and otherwise fetches from the backend,
//! stores the result, records which identities it depends on and makes sure a
//! change to any of them will reach the cache.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, ContentBackend, EntryOptions};
use crate::bus::{ChangeEvent, Delivery, InvalidationListener, MessageChannel, TransportError};
use crate::cache::{Lookup, Region, SharedTier, StatsReport, StoreTier};
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};
use crate::index::{EntryIdentity, IdentityIndex};
use crate::keys::{validate_model, EntryRef, KeyBuilder, ListOptions};
use crate::subscription::{SubscriptionManager, SubscriptionState};
use crate::tasks::{purge, spawn_cleanup_task, spawn_invalidation_task};

/// Field added to object results when source tagging is on.
pub const SOURCE_FIELD: &str = "dmCacheHitFrom";

const FROM_CACHE: &str = "cache";
const FROM_SOURCE: &str = "source";

/// Capacity of the internal change-event channel.
const EVENT_BUFFER: usize = 1024;

/// Post-processing applied to every returned value.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

// == Entry Request ==
/// Projection, depth and post-processing of a single-entry read.
#[derive(Clone, Default)]
pub struct EntryRequest {
    pub fields: Option<Vec<String>>,
    /// Link depth, absent = 1
    pub levels: Option<u32>,
    pub transform: Option<Transform>,
}

impl EntryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn levels(mut self, levels: u32) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for EntryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRequest")
            .field("fields", &self.fields)
            .field("levels", &self.levels)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

// == Dm Cache ==
/// Read-through cache over a [`ContentBackend`]. Cloning shares the instance.
#[derive(Clone)]
pub struct DmCache {
    inner: Arc<Inner>,
}

struct Inner {
    keys: KeyBuilder,
    store: Arc<StoreTier>,
    index: Arc<IdentityIndex>,
    backend: Arc<dyn ContentBackend>,
    subscriptions: SubscriptionManager,
    channel: Option<Arc<dyn MessageChannel>>,
    listener: Mutex<Option<InvalidationListener>>,
    invalidation: Mutex<Option<JoinHandle<()>>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    append_source: AtomicBool,
    destroyed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for handle in [self.invalidation.get_mut().take(), self.cleanup.get_mut().take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

impl DmCache {
    /// Builds a cache.
    ///
    /// Without a channel, or when the channel cannot provide a queue, the
    /// cache runs without live invalidation and relies on TTL expiry alone.
    /// Invalid options fail here, never at call time.
    pub async fn new(
        options: CacheOptions,
        backend: Arc<dyn ContentBackend>,
        channel: Option<Arc<dyn MessageChannel>>,
    ) -> Result<Self> {
        let store = StoreTier::new(
            options.cache_size,
            options.effective_ttl(),
            options.external_store.as_ref(),
        )
        .await?;
        Self::build(options, store, backend, channel).await
    }

    /// Builds a cache over a shared tier the caller already holds.
    /// `options.external_store` is ignored.
    pub async fn with_shared_tier(
        options: CacheOptions,
        shared: Arc<dyn SharedTier>,
        backend: Arc<dyn ContentBackend>,
        channel: Option<Arc<dyn MessageChannel>>,
    ) -> Result<Self> {
        let store = StoreTier::with_shared(options.cache_size, options.effective_ttl(), shared)?;
        Self::build(options, store, backend, channel).await
    }

    async fn build(
        options: CacheOptions,
        store: StoreTier,
        backend: Arc<dyn ContentBackend>,
        channel: Option<Arc<dyn MessageChannel>>,
    ) -> Result<Self> {
        let keys = KeyBuilder::new(options.namespace.clone())?;
        let ttl = options.effective_ttl();
        let store = Arc::new(store);
        info!(
            capacity = options.cache_size,
            ttl = ?ttl,
            shared_tier = store.has_shared(),
            "store tier ready"
        );
        let index = Arc::new(IdentityIndex::new());
        let short_id = backend.short_id().to_string();

        let mut listener = None;
        let mut invalidation = None;
        let subscriptions = match &channel {
            Some(channel) => match open_queue(channel.as_ref()).await {
                Ok((queue, deliveries)) => {
                    let (events, receiver) = broadcast::channel::<ChangeEvent>(EVENT_BUFFER);
                    invalidation = Some(spawn_invalidation_task(
                        index.clone(),
                        store.clone(),
                        receiver,
                    ));
                    listener = Some(InvalidationListener::spawn(
                        channel.clone(),
                        deliveries,
                        events,
                    ));
                    info!(queue = %queue, "live invalidation enabled");
                    SubscriptionManager::live(channel.clone(), queue, short_id)
                }
                Err(err) => {
                    warn!(error = %err, "falling back to TTL-only invalidation");
                    SubscriptionManager::disabled(short_id)
                }
            },
            None => {
                info!("no message channel configured, TTL-only invalidation");
                SubscriptionManager::disabled(short_id)
            }
        };

        let cleanup = ttl.map(|_| {
            spawn_cleanup_task(store.clone(), index.clone(), options.cleanup_interval)
        });

        Ok(Self {
            inner: Arc::new(Inner {
                keys,
                store,
                index,
                backend,
                subscriptions,
                channel,
                listener: Mutex::new(listener),
                invalidation: Mutex::new(invalidation),
                cleanup: Mutex::new(cleanup),
                append_source: AtomicBool::new(options.append_source),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    // == Get Entry ==
    /// Reads one entry through the cache.
    pub async fn get_entry(
        &self,
        model: &str,
        entry: impl Into<EntryRef>,
        request: EntryRequest,
    ) -> Result<Value> {
        const OPERATION: &str = "DmCache::get_entry";
        validate_model(model, OPERATION)?;
        let entry_id = entry.into().resolve(OPERATION)?;

        let fields = request.fields.filter(|fields| !fields.is_empty());
        let levels = request.levels.unwrap_or(1).max(1);
        let key = self.inner.keys.entry_key(
            model,
            &EntryRef::Id(entry_id.clone()),
            fields.as_deref(),
            Some(levels),
        )?;
        let primary = EntryIdentity::new(model, entry_id.as_str());
        let transform = request.transform.as_ref();

        match self.inner.store.get(Region::Entries, &key).await {
            Lookup::Local(value) => {
                debug!(key = %key, "entry served from cache");
                return Ok(self.finish(value, FROM_CACHE, transform));
            }
            Lookup::Shared { value, evicted } => {
                debug!(key = %key, "entry served from shared tier");
                self.forget_absent(Region::Entries, &evicted).await;
                let linked = self.linked_entries(&value, levels);
                self.track_entry(&key, &primary, &linked).await;
                return Ok(self.finish(value, FROM_CACHE, transform));
            }
            Lookup::Miss => debug!(key = %key, "entry cache miss"),
        }

        let options = EntryOptions { fields, levels };
        let value = match self
            .inner
            .backend
            .get_entry(model, &entry_id, &options)
            .await
        {
            Ok(value) => value,
            Err(err) => {
                // A lazily expired value may still be indexed.
                self.forget_absent(Region::Entries, &[key]).await;
                return Err(CacheError::backend("get_entry", err));
            }
        };

        let linked = self.linked_entries(&value, levels);
        let evicted = self
            .inner
            .store
            .put(Region::Entries, &key, value.clone())
            .await;
        self.forget_absent(Region::Entries, &evicted).await;
        self.track_entry(&key, &primary, &linked).await;

        Ok(self.finish(value, FROM_SOURCE, transform))
    }

    // == Get Entries ==
    /// Reads a filtered list of a model through the cache.
    pub async fn get_entries(
        &self,
        model: &str,
        filter: Option<ListOptions>,
        transform: Option<Transform>,
    ) -> Result<Value> {
        const OPERATION: &str = "DmCache::get_entries";
        validate_model(model, OPERATION)?;
        let key = self.inner.keys.list_key(model, filter.as_ref())?;

        match self.inner.store.get(Region::Lists, &key).await {
            Lookup::Local(value) => {
                debug!(key = %key, "list served from cache");
                return Ok(self.finish(value, FROM_CACHE, transform.as_ref()));
            }
            Lookup::Shared { value, evicted } => {
                debug!(key = %key, "list served from shared tier");
                self.forget_absent(Region::Lists, &evicted).await;
                self.track_list(&key, model).await;
                return Ok(self.finish(value, FROM_CACHE, transform.as_ref()));
            }
            Lookup::Miss => debug!(key = %key, "list cache miss"),
        }

        let filter = filter.unwrap_or_default();
        let value = match self.inner.backend.get_entries(model, &filter).await {
            Ok(value) => value,
            Err(err) => {
                self.forget_absent(Region::Lists, &[key]).await;
                return Err(CacheError::backend("get_entries", err));
            }
        };

        let evicted = self
            .inner
            .store
            .put(Region::Lists, &key, value.clone())
            .await;
        self.forget_absent(Region::Lists, &evicted).await;
        self.track_list(&key, model).await;

        Ok(self.finish(value, FROM_SOURCE, transform.as_ref()))
    }

    // == Get Config ==
    /// Reads the data manager configuration. Bounded by TTL only: no change
    /// events are published for it.
    pub async fn get_config(&self) -> Result<Value> {
        let key = self.inner.keys.config_key();
        if let Some(value) = self.inner.store.get(Region::Configs, &key).await.into_value() {
            return Ok(self.finish(value, FROM_CACHE, None));
        }

        let value = self.inner.backend.get_config().await.map_err(|err| match err {
            BackendError::Unsupported(capability) => {
                CacheError::NotImplemented(capability.to_string())
            }
            other => CacheError::backend("get_config", other),
        })?;
        self.inner
            .store
            .put(Region::Configs, &key, value.clone())
            .await;

        Ok(self.finish(value, FROM_SOURCE, None))
    }

    // == Stats ==
    pub async fn get_stats(&self) -> StatsReport {
        let stats = self.inner.store.stats().await;
        let totals = stats.totals();
        StatsReport {
            max_cache_size: stats.capacity,
            time_to_live: stats.ttl.unwrap_or(0),
            items_in_entry_cache: stats.entries.total_entries,
            items_in_model_cache: stats.lists.total_entries,
            items_in_config_cache: stats.configs.total_entries,
            hits: totals.hits,
            misses: totals.misses,
            evictions: totals.evictions,
            hit_rate: totals.hit_rate(),
            live_invalidation: self.has_live_invalidation(),
        }
    }

    // == Watch ==
    /// Subscribes to changes of one entry without reading it.
    pub async fn watch_entry(&self, model: &str, entry: impl Into<EntryRef>) -> Result<()> {
        const OPERATION: &str = "DmCache::watch_entry";
        validate_model(model, OPERATION)?;
        let entry_id = entry.into().resolve(OPERATION)?;
        self.inner
            .subscriptions
            .ensure_entry_subscribed(model, &entry_id)
            .await;
        Ok(())
    }

    /// Subscribes to changes of every entry of a model.
    pub async fn watch_model(&self, model: &str) -> Result<()> {
        validate_model(model, "DmCache::watch_model")?;
        self.inner.subscriptions.ensure_model_subscribed(model).await;
        Ok(())
    }

    /// Current subscription scope covering `model` (and `entry_id`, if given).
    pub async fn subscription_state(&self, model: &str, entry_id: Option<&str>) -> SubscriptionState {
        self.inner.subscriptions.state(model, entry_id).await
    }

    // == Clear Model ==
    /// Drops every cached entry and list of `model`. Returns how many values
    /// were removed from the local store.
    pub async fn clear_model(&self, model: &str) -> Result<usize> {
        validate_model(model, "DmCache::clear_model")?;
        if self.inner.index.list_keys_for_model_prefix(model).is_empty() {
            return Ok(0);
        }

        let evicted = self.inner.index.evict_by_identity(model, None);
        let removed = purge(&self.inner.store, &evicted).await;
        info!(model, removed, "model cleared");
        Ok(removed)
    }

    /// Asset URL helper. Not provided by this cache.
    pub fn asset_helper(&self) -> Result<()> {
        Err(CacheError::NotImplemented("asset_helper".to_string()))
    }

    // == Source Tagging ==
    pub fn append_source(&self) -> bool {
        self.inner.append_source.load(Ordering::Relaxed)
    }

    pub fn set_append_source(&self, enabled: bool) {
        self.inner.append_source.store(enabled, Ordering::Relaxed);
    }

    /// Whether change events currently reach this cache. False means cached
    /// values only go stale-free through TTL expiry.
    pub fn has_live_invalidation(&self) -> bool {
        self.inner.subscriptions.is_live()
            && self
                .inner
                .listener
                .lock()
                .as_ref()
                .is_some_and(|listener| !listener.is_finished())
    }

    // == Destroy ==
    /// Stops background work and releases the channel and shared store.
    /// Local reads keep working afterwards; calling it twice is a no-op.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let listener = self.inner.listener.lock().take();
        if let Some(listener) = listener {
            listener.shutdown().await;
        }
        if let Some(handle) = self.inner.invalidation.lock().take() {
            handle.abort();
        }
        if let Some(channel) = &self.inner.channel {
            if let Err(err) = channel.close().await {
                warn!(error = %err, "message channel did not close cleanly");
            }
        }
        if let Some(handle) = self.inner.cleanup.lock().take() {
            handle.abort();
        }
        self.inner.store.close();

        info!("cache destroyed");
    }

    fn linked_entries(&self, value: &Value, levels: u32) -> Vec<EntryIdentity> {
        if levels > 1 {
            self.inner.backend.find_linked_entries(value, levels)
        } else {
            Vec::new()
        }
    }

    async fn forget_absent(&self, region: Region, keys: &[String]) {
        self.inner
            .store
            .forget_absent(region, keys, &self.inner.index)
            .await;
    }

    async fn track_entry(&self, key: &str, primary: &EntryIdentity, linked: &[EntryIdentity]) {
        self.inner.index.register_entry(key, primary, linked);
        for identity in std::iter::once(primary).chain(linked) {
            self.inner
                .subscriptions
                .ensure_entry_subscribed(&identity.model, &identity.entry_id)
                .await;
        }
    }

    async fn track_list(&self, key: &str, model: &str) {
        self.inner.index.register_list(key, model);
        self.inner.subscriptions.ensure_model_subscribed(model).await;
    }

    fn finish(&self, mut value: Value, source: &'static str, transform: Option<&Transform>) -> Value {
        if self.append_source() {
            if let Value::Object(map) = &mut value {
                map.insert(SOURCE_FIELD.to_string(), Value::String(source.to_string()));
            }
        }
        match transform {
            Some(transform) => transform(value),
            None => value,
        }
    }
}

async fn open_queue(channel: &dyn MessageChannel) -> Result<(String, UnboundedReceiver<Delivery>)> {
    let transport =
        |err: TransportError| CacheError::TransportDegraded(format!("could not open queue: {err}"));
    let queue = channel
        .assert_queue(&format!("cache-{}", Uuid::new_v4()))
        .await
        .map_err(transport)?;
    let deliveries = channel.consume(&queue).await.map_err(transport)?;
    Ok((queue, deliveries))
}
