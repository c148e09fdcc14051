use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use crate::{
    config::{CacheConfig, Eviction, ObserveConfig},
    error::ObservableError,
    source::IntoSource,
    status::{self, Observation},
    subscription::{SharedSubscription, SubscriptionId},
};

/// Deduplicates subscriptions by key: every consumer asking for the same key shares one
/// [`SharedSubscription`], and the source factory only runs when a key is first requested.
///
/// Construct one per application and hand clones to whatever needs it; clones share entries.
#[derive(Clone, Default)]
pub struct SubscriptionCache(Arc<Inner>);

#[derive(Default)]
struct Inner {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
}

struct CacheEntry {
    id: SubscriptionId,
    /// A `SharedSubscription<T>` for whichever `T` the key was first requested with
    subscription: Box<dyn Any + Send + Sync>,
}

impl CacheEntry {
    fn downcast<T: 'static>(&self, key: &str) -> Result<SharedSubscription<T>, ObservableError> {
        self.subscription
            .downcast_ref::<SharedSubscription<T>>()
            .cloned()
            .ok_or_else(|| ObservableError::TypeMismatch { key: key.to_owned(), expected: std::any::type_name::<T>() })
    }
}

impl SubscriptionCache {
    pub fn new(config: CacheConfig) -> Self { Self(Arc::new(Inner { entries: DashMap::new(), config })) }

    pub fn config(&self) -> &CacheConfig { &self.0.config }

    /// Return the subscription for `key`, creating it from `source_factory` if there is none.
    ///
    /// For a key that is already present the factory is not called, even if it would produce
    /// a different source: the key alone identifies the stream. A stored subscription that
    /// was closed counts as absent.
    pub fn get_or_create<T, F, S>(&self, key: &str, source_factory: F) -> Result<SharedSubscription<T>, ObservableError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> S,
        S: IntoSource<T>,
    {
        self.get_or_create_with_timeout(key, self.0.config.timeout, source_factory)
    }

    /// Like [`SubscriptionCache::get_or_create`], with a first-emission timeout that only applies
    /// if this call creates the subscription
    pub fn get_or_create_with_timeout<T, F, S>(
        &self,
        key: &str,
        timeout: Duration,
        source_factory: F,
    ) -> Result<SharedSubscription<T>, ObservableError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> S,
        S: IntoSource<T>,
    {
        if let Some(existing) = self.get::<T>(key)? {
            if !existing.is_closed() {
                debug!("SubscriptionCache hit for {key:?}");
                return Ok(existing);
            }
            debug!("SubscriptionCache replacing closed {} for {key:?}", existing.id());
        }

        // The factory runs outside any map lock, so it may use the cache itself
        let created = SharedSubscription::new(source_factory(), timeout);
        if self.0.config.eviction == Eviction::WhenUnobserved {
            self.evict_when_unobserved(key, &created);
        }

        match self.0.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get().downcast::<T>(key)?;
                if existing.is_closed() {
                    occupied.insert(CacheEntry { id: created.id(), subscription: Box::new(created.clone()) });
                    debug!("SubscriptionCache created {} for {key:?}", created.id());
                    return Ok(created);
                }
                // Somebody else created it first. Ours is dropped, which cancels its source.
                debug!("SubscriptionCache lost the race to create {key:?}");
                Ok(existing)
            }
            Entry::Vacant(vacant) => {
                debug!("SubscriptionCache created {} for {key:?}", created.id());
                vacant.insert(CacheEntry { id: created.id(), subscription: Box::new(created.clone()) });
                Ok(created)
            }
        }
    }

    /// Look up a subscription without creating one
    pub fn get<T>(&self, key: &str) -> Result<Option<SharedSubscription<T>>, ObservableError>
    where T: 'static {
        if key.is_empty() {
            return Err(ObservableError::MissingKey);
        }
        self.0.entries.get(key).map(|entry| entry.downcast(key)).transpose()
    }

    /// Get or create the subscription for `key` and derive what a consumer should render
    pub fn observe<T, F, S>(&self, key: &str, source_factory: F, config: &ObserveConfig<T>) -> Result<Observation<T>, ObservableError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> S,
        S: IntoSource<T>,
    {
        let timeout = config.timeout.unwrap_or(self.0.config.timeout);
        let subscription = self.get_or_create_with_timeout(key, timeout, source_factory)?;
        Ok(status::derive(&subscription, config))
    }

    pub fn contains_key(&self, key: &str) -> bool { self.0.entries.contains_key(key) }

    pub fn len(&self) -> usize { self.0.entries.len() }

    pub fn is_empty(&self) -> bool { self.0.entries.is_empty() }

    fn evict_when_unobserved<T>(&self, key: &str, subscription: &SharedSubscription<T>)
    where T: Send + Sync + 'static {
        let cache: Weak<Inner> = Arc::downgrade(&self.0);
        let weak = subscription.weak();
        let id = subscription.id();
        let key = key.to_owned();
        subscription.on_idle(move || {
            if let Some(subscription) = weak.upgrade() {
                subscription.close();
            }
            if let Some(cache) = cache.upgrade() {
                // only if the entry is still this subscription
                if cache.entries.remove_if(&key, |_, entry| entry.id == id).is_some() {
                    debug!("SubscriptionCache evicted unobserved {key:?}");
                }
            }
        });
    }
}

impl std::fmt::Debug for SubscriptionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionCache").field("entries", &self.0.entries.len()).field("config", &self.0.config).finish()
    }
}
