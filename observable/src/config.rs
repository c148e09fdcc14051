use std::time::Duration;

/// How long a subscription waits for its first emission before releasing suspended consumers
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// What happens to a cached subscription once nobody is observing it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Eviction {
    /// Entries live as long as the cache, whether or not anyone observes them
    #[default]
    Never,
    /// When the last attached observer detaches, the source subscription is closed and the
    /// key evicted, so the next request for the key subscribes to a fresh source.
    /// Entries that never had an observer (preloads) are kept.
    WhenUnobserved,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// First-emission timeout applied to every subscription created by the cache
    pub timeout: Duration,
    pub eviction: Eviction,
}

impl Default for CacheConfig {
    fn default() -> Self { Self { timeout: DEFAULT_TIMEOUT, eviction: Eviction::Never } }
}

impl CacheConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_eviction(mut self, eviction: Eviction) -> Self {
        self.eviction = eviction;
        self
    }
}

/// Per-consumer options
#[derive(Debug, Clone)]
pub struct ObserveConfig<T> {
    /// Data to present until the source emits. `Some` means supplied, whatever the value is.
    pub initial_data: Option<T>,
    /// Suspend instead of reporting `loading` while there is nothing to show
    pub suspense: bool,
    /// Overrides the cache timeout if this call creates the subscription
    pub timeout: Option<Duration>,
}

impl<T> Default for ObserveConfig<T> {
    fn default() -> Self { Self { initial_data: None, suspense: false, timeout: None } }
}

impl<T> ObserveConfig<T> {
    pub fn new() -> Self { Self::default() }
    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }
    pub fn suspense(mut self, suspense: bool) -> Self {
        self.suspense = suspense;
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn has_initial_data(&self) -> bool { self.initial_data.is_some() }
}
