//! A stateful consumer of a cached subscription, for wiring into a rendering layer.
//!
//! A `Binding` plays the part of one mounted component: it holds local state initialized
//! from the subscription, updates it from an attached observer, and tells the host to
//! re-render through a trigger callback and a version counter (the shape React's
//! `useSyncExternalStore` expects). Mounting again with the same key reuses the cached
//! subscription instead of subscribing to the source again.
//!
//! The binding keeps its source factory. If the cache closed its subscription while it was
//! detached (see [`Eviction::WhenUnobserved`](crate::Eviction)), attaching again goes back
//! through the cache and subscribes to a fresh source.

use std::sync::{
    Arc, Mutex, RwLock, Weak,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::time::Duration;

use tracing::debug;

use crate::{
    broadcast::ListenerGuard,
    cache::SubscriptionCache,
    config::ObserveConfig,
    error::ObservableError,
    source::{IntoSource, Source},
    status::{self, Observation},
    subscription::SharedSubscription,
};

type Trigger = Arc<dyn Fn() + Send + Sync + 'static>;
type SourceFactory<T> = Arc<dyn Fn() -> Source<T> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct Binding<T>(Arc<Inner<T>>);

struct Inner<T> {
    key: String,
    cache: SubscriptionCache,
    factory: SourceFactory<T>,
    timeout: Duration,
    subscription: RwLock<SharedSubscription<T>>,
    config: ObserveConfig<T>,
    /// Local state, as the host would keep it between renders
    data: RwLock<Option<T>>,
    /// Emissions of the current subscription already reflected in `data`
    seen_emissions: AtomicU64,
    version: AtomicUsize,
    trigger_render: Mutex<Option<Trigger>>,
    guard: Mutex<Option<ListenerGuard<T>>>,
}

struct WeakBinding<T>(Weak<Inner<T>>);

impl<T> WeakBinding<T> {
    fn upgrade(&self) -> Option<Binding<T>> { self.0.upgrade().map(Binding) }
}

impl<T> Clone for WeakBinding<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Binding<T>
where T: Clone + Send + Sync + 'static
{
    /// Mount a consumer on `key`. The source factory only runs if the key is not cached yet,
    /// or when re-attaching after the cached subscription was closed.
    pub fn new<F, S>(cache: &SubscriptionCache, key: &str, source_factory: F, config: ObserveConfig<T>) -> Result<Self, ObservableError>
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: IntoSource<T>,
    {
        let factory: SourceFactory<T> = Arc::new(move || source_factory().into_source());
        let timeout = config.timeout.unwrap_or(cache.config().timeout);
        let subscription = {
            let factory = factory.clone();
            cache.get_or_create_with_timeout(key, timeout, move || factory())?
        };

        let (latest, emissions) = (subscription.latest(), subscription.emission_count());
        let data = latest.or_else(|| config.initial_data.clone());

        Ok(Self(Arc::new(Inner {
            key: key.to_owned(),
            cache: cache.clone(),
            factory,
            timeout,
            subscription: RwLock::new(subscription),
            config,
            data: RwLock::new(data),
            seen_emissions: AtomicU64::new(emissions),
            version: AtomicUsize::new(0),
            trigger_render: Mutex::new(None),
            guard: Mutex::new(None),
        })))
    }

    /// Start receiving updates. Attaching an attached binding does nothing.
    ///
    /// Fails only if the subscription has to be created again and the cache refuses, for
    /// instance because the key was meanwhile bound to another value type.
    pub fn attach(&self) -> Result<(), ObservableError> {
        let mut guard = self.0.guard.lock().expect("guard lock is poisoned");
        if guard.is_some() {
            return Ok(());
        }

        let subscription = self.live_subscription()?;
        let weak = self.weak();
        let on_next = {
            let weak = weak.clone();
            move |value: T| {
                if let Some(binding) = weak.upgrade() {
                    binding.0.seen_emissions.fetch_add(1, Ordering::Relaxed);
                    *binding.0.data.write().expect("data lock is poisoned") = Some(value);
                    binding.changed();
                }
            }
        };
        let on_error = move |_| {
            if let Some(binding) = weak.upgrade() {
                binding.changed();
            }
        };
        *guard = Some(subscription.subscribe(on_next, on_error));
        drop(guard);
        debug!("Binding for {:?} attached to {}", self.0.key, subscription.id());

        // A value may have arrived between mounting and attaching
        let emissions = subscription.emission_count();
        if self.0.seen_emissions.swap(emissions, Ordering::Relaxed) < emissions {
            *self.0.data.write().expect("data lock is poisoned") = subscription.latest();
            self.changed();
        }
        Ok(())
    }

    /// Derive what to render from the subscription flags and the local state
    pub fn render(&self) -> Observation<T> {
        let subscription = self.subscription();
        let snapshot = subscription.snapshot();
        let data = self.data();
        status::project(
            snapshot.has_emitted,
            snapshot.has_error,
            snapshot.is_complete,
            data,
            snapshot.error,
            subscription.first_emission(),
            &self.0.config,
        )
    }

    pub fn data(&self) -> Option<T> { self.0.data.read().expect("data lock is poisoned").clone() }

    /// The current subscription, or a fresh one from the cache if the current one was closed
    fn live_subscription(&self) -> Result<SharedSubscription<T>, ObservableError> {
        let current = self.subscription();
        if !current.is_closed() {
            return Ok(current);
        }

        let factory = self.0.factory.clone();
        let fresh = self.0.cache.get_or_create_with_timeout(&self.0.key, self.0.timeout, move || factory())?;
        debug!("Binding for {:?} resubscribed: {} was closed, now on {}", self.0.key, current.id(), fresh.id());

        // local data is kept until the fresh subscription has something newer
        self.0.seen_emissions.store(0, Ordering::Relaxed);
        *self.0.subscription.write().expect("subscription lock is poisoned") = fresh.clone();
        Ok(fresh)
    }
}

impl<T> Binding<T> {
    /// Stop receiving updates. Calling this again is a no-op; dropping the binding also detaches.
    pub fn detach(&self) {
        let guard = self.0.guard.lock().expect("guard lock is poisoned").take();
        if guard.is_some() {
            debug!("Binding for {:?} detached", self.0.key);
        }
        // dropped outside the lock
        drop(guard);
    }

    pub fn is_attached(&self) -> bool { self.0.guard.lock().expect("guard lock is poisoned").is_some() }

    /// Set the callback the host uses to schedule a re-render
    pub fn on_change<F>(&self, trigger: F)
    where F: Fn() + Send + Sync + 'static {
        *self.0.trigger_render.lock().expect("trigger lock is poisoned") = Some(Arc::new(trigger));
    }

    pub fn clear_trigger(&self) { *self.0.trigger_render.lock().expect("trigger lock is poisoned") = None; }

    /// Increases every time the binding sees a change. Compare it between renders to tell
    /// whether anything happened.
    pub fn version(&self) -> usize { self.0.version.load(Ordering::Relaxed) }

    pub fn key(&self) -> &str { &self.0.key }

    /// The subscription this binding currently reads from
    pub fn subscription(&self) -> SharedSubscription<T> { self.0.subscription.read().expect("subscription lock is poisoned").clone() }

    fn changed(&self) {
        self.0.version.fetch_add(1, Ordering::Relaxed);
        let trigger = self.0.trigger_render.lock().expect("trigger lock is poisoned").clone();
        if let Some(trigger) = trigger {
            trigger();
        }
    }

    fn weak(&self) -> WeakBinding<T> { WeakBinding(Arc::downgrade(&self.0)) }
}

impl<T> std::fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding").field("key", &self.0.key).field("version", &self.version()).field("attached", &self.is_attached()).finish()
    }
}
