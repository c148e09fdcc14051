use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{StreamExt, future::AbortHandle, task::noop_waker_ref};
use tracing::{debug, trace, warn};

use crate::{
    broadcast::{Broadcast, IntoListener, Listener, ListenerGuard, Notification},
    error::SourceError,
    first_emission::{FirstEmission, FirstEmissionOutcome},
    source::{IntoSource, Source},
    task::spawn_abortable,
};

/// Items consumed synchronously while constructing, and by the driver between yields
const SYNC_DRAIN_BUDGET: usize = 64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a shared subscription, used to tell instances apart.
/// Never reused within a process.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self { Self(NEXT_ID.fetch_add(1, Ordering::Relaxed)) }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{:#x}", self.0) }
}

/// One subscription to a stream source, shared by any number of observers.
///
/// The source is subscribed to when the subscription is constructed. Values, the terminal
/// error and completion are recorded so that a consumer can read them synchronously at any
/// time, and values and the error are multicast to every attached observer.
/// Once errored or complete the subscription never changes again.
pub struct SharedSubscription<T>(Arc<Inner<T>>);

struct Inner<T> {
    id: SubscriptionId,
    state: RwLock<State<T>>,
    broadcast: Broadcast<T>,
    first_emission: FirstEmission,
    timeout: Duration,
    tasks: Mutex<Tasks>,
    closed: AtomicBool,
}

#[derive(Default)]
struct Tasks {
    driver: Option<AbortHandle>,
    timer: Option<AbortHandle>,
}

impl Tasks {
    fn abort_all(&mut self) -> bool {
        let mut aborted = false;
        for task in [self.driver.take(), self.timer.take()].into_iter().flatten() {
            task.abort();
            aborted = true;
        }
        aborted
    }
}

struct State<T> {
    latest: Option<T>,
    /// Number of values received so far
    emissions: u64,
    error: Option<SourceError>,
    has_emitted: bool,
    has_error: bool,
    is_complete: bool,
}

impl<T> State<T> {
    fn is_terminal(&self) -> bool { self.has_error || self.is_complete }
}

/// A consistent view of a subscription's status
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub latest: Option<T>,
    pub error: Option<SourceError>,
    pub has_emitted: bool,
    pub has_error: bool,
    pub is_complete: bool,
}

/// What the source told us
enum Event<T> {
    Item(Result<T, SourceError>),
    End,
}

/// A weak handle used by background tasks so they never keep a subscription alive
pub(crate) struct WeakSharedSubscription<T>(Weak<Inner<T>>);

impl<T> WeakSharedSubscription<T> {
    pub fn upgrade(&self) -> Option<SharedSubscription<T>> { self.0.upgrade().map(SharedSubscription) }
}

impl<T> Clone for WeakSharedSubscription<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Clone for SharedSubscription<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> SharedSubscription<T>
where T: Clone + Send + Sync + 'static
{
    /// Subscribe to `source`. Must be called from within a tokio runtime.
    ///
    /// Whatever the source has ready right away is recorded before this returns, so a
    /// synchronously-emitting source is observed as having emitted immediately.
    pub fn new(source: impl IntoSource<T>, timeout: Duration) -> Self {
        let me = Self(Arc::new(Inner {
            id: SubscriptionId::next(),
            state: RwLock::new(State { latest: None, emissions: 0, error: None, has_emitted: false, has_error: false, is_complete: false }),
            broadcast: Broadcast::new(),
            first_emission: FirstEmission::new(),
            timeout,
            tasks: Mutex::new(Tasks::default()),
            closed: AtomicBool::new(false),
        }));

        let mut source = source.into_source();
        if me.drain_ready(&mut source) {
            me.spawn_driver(source);
        }
        if !me.0.first_emission.is_settled() {
            me.spawn_timer();
        }

        me
    }

    /// Consume what the source has ready without waiting, up to [`SYNC_DRAIN_BUDGET`] items.
    /// Returns true if the source may still produce more.
    fn drain_ready(&self, source: &mut Source<T>) -> bool {
        let mut cx = Context::from_waker(noop_waker_ref());
        for _ in 0..SYNC_DRAIN_BUDGET {
            match source.poll_next_unpin(&mut cx) {
                Poll::Ready(Some(item)) => {
                    if !self.handle(Event::Item(item)) {
                        return false;
                    }
                }
                Poll::Ready(None) => {
                    self.handle(Event::End);
                    return false;
                }
                Poll::Pending => return true,
            }
        }
        true
    }

    fn spawn_driver(&self, mut source: Source<T>) {
        let weak = self.weak();
        let handle = spawn_abortable(async move {
            let mut handled = 0usize;
            while let Some(item) = source.next().await {
                {
                    let Some(me) = weak.upgrade() else { return };
                    if !me.handle(Event::Item(item)) {
                        return;
                    }
                }
                // a source that is always ready must still hand the thread back
                handled += 1;
                if handled % SYNC_DRAIN_BUDGET == 0 {
                    tokio::task::yield_now().await;
                }
            }
            if let Some(me) = weak.upgrade() {
                me.handle(Event::End);
            }
        });
        self.0.tasks.lock().expect("tasks lock is poisoned").driver = Some(handle);
    }

    fn spawn_timer(&self) {
        let weak = self.weak();
        let timeout = self.0.timeout;
        let handle = spawn_abortable(async move {
            tokio::time::sleep(timeout).await;
            if let Some(me) = weak.upgrade() {
                if me.0.first_emission.settle(FirstEmissionOutcome::TimedOut) {
                    debug!("SharedSubscription {} timed out after {:?} without emitting", me.id(), timeout);
                }
            }
        });
        self.0.tasks.lock().expect("tasks lock is poisoned").timer = Some(handle);
    }

    fn settle(&self, outcome: FirstEmissionOutcome) {
        if self.0.first_emission.settle(outcome) {
            if let Some(timer) = self.0.tasks.lock().expect("tasks lock is poisoned").timer.take() {
                timer.abort();
            }
        }
    }

    /// Record an event and notify observers. Returns false once the subscription is terminal.
    fn handle(&self, event: Event<T>) -> bool {
        match event {
            Event::Item(Ok(value)) => {
                {
                    let mut state = self.0.state.write().expect("state lock is poisoned");
                    if state.is_terminal() {
                        warn!("SharedSubscription {} ignoring a value received after it stopped", self.id());
                        return false;
                    }
                    state.latest = Some(value.clone());
                    state.emissions += 1;
                    state.has_emitted = true;
                }
                trace!("SharedSubscription {} emitted", self.id());
                self.settle(FirstEmissionOutcome::Value);
                self.0.broadcast.send(Notification::Next(value));
                true
            }
            Event::Item(Err(error)) => {
                {
                    let mut state = self.0.state.write().expect("state lock is poisoned");
                    if state.is_terminal() {
                        warn!("SharedSubscription {} ignoring an error received after it stopped: {}", self.id(), error);
                        return false;
                    }
                    state.error = Some(error.clone());
                    state.has_error = true;
                }
                debug!("SharedSubscription {} errored: {}", self.id(), error);
                // an error releases suspended consumers too
                self.settle(FirstEmissionOutcome::Error);
                self.0.broadcast.send(Notification::Error(error));
                false
            }
            Event::End => {
                let mut state = self.0.state.write().expect("state lock is poisoned");
                if !state.is_terminal() {
                    state.is_complete = true;
                    debug!("SharedSubscription {} completed", self.id());
                }
                false
            }
        }
    }

    /// Attach an observer. It is called for values and the error that arrive from now on;
    /// read [`SharedSubscription::latest`] for what arrived before.
    pub fn subscribe<N, E>(&self, on_next: N, on_error: E) -> ListenerGuard<T>
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(SourceError) + Send + Sync + 'static,
    {
        self.listen(Listener::observer(on_next, on_error))
    }

    pub fn listen<L>(&self, listener: L) -> ListenerGuard<T>
    where L: IntoListener<T> {
        self.0.broadcast.listen(listener)
    }

    /// Calls a closure with a borrow of the latest value
    pub fn with_latest<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let state = self.0.state.read().expect("state lock is poisoned");
        f(state.latest.as_ref())
    }

    pub fn latest(&self) -> Option<T> { self.with_latest(|latest| latest.cloned()) }

    pub fn snapshot(&self) -> Snapshot<T> {
        let state = self.0.state.read().expect("state lock is poisoned");
        Snapshot {
            latest: state.latest.clone(),
            error: state.error.clone(),
            has_emitted: state.has_emitted,
            has_error: state.has_error,
            is_complete: state.is_complete,
        }
    }
}

impl<T> SharedSubscription<T> {
    pub fn id(&self) -> SubscriptionId { self.0.id }

    pub fn has_emitted(&self) -> bool { self.0.state.read().expect("state lock is poisoned").has_emitted }

    pub fn has_error(&self) -> bool { self.0.state.read().expect("state lock is poisoned").has_error }

    pub fn is_complete(&self) -> bool { self.0.state.read().expect("state lock is poisoned").is_complete }

    /// How many values the source has emitted so far
    pub fn emission_count(&self) -> u64 { self.0.state.read().expect("state lock is poisoned").emissions }

    pub fn error(&self) -> Option<SourceError> { self.0.state.read().expect("state lock is poisoned").error.clone() }

    /// The suspension token for this subscription
    pub fn first_emission(&self) -> FirstEmission { self.0.first_emission.clone() }

    pub fn timeout(&self) -> Duration { self.0.timeout }

    pub fn observer_count(&self) -> usize { self.0.broadcast.len() }

    /// Stop listening to the source. Recorded status is kept, and observers simply stop hearing anything.
    pub fn close(&self) {
        self.0.closed.store(true, Ordering::Release);
        if self.0.tasks.lock().expect("tasks lock is poisoned").abort_all() {
            debug!("SharedSubscription {} closed", self.id());
        }
    }

    /// Whether [`SharedSubscription::close`] was called, either directly or by cache eviction.
    /// A closed subscription never hears from its source again.
    pub fn is_closed(&self) -> bool { self.0.closed.load(Ordering::Acquire) }

    pub(crate) fn weak(&self) -> WeakSharedSubscription<T> { WeakSharedSubscription(Arc::downgrade(&self.0)) }

    /// Register a hook that runs whenever the last attached observer detaches
    pub(crate) fn on_idle<F>(&self, hook: F)
    where F: Fn() + Send + Sync + 'static {
        self.0.broadcast.on_idle(hook)
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            tasks.abort_all();
        }
    }
}

impl<T> std::fmt::Debug for SharedSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.read().expect("state lock is poisoned");
        f.debug_struct("SharedSubscription")
            .field("id", &self.id())
            .field("has_emitted", &state.has_emitted)
            .field("has_error", &state.has_error)
            .field("is_complete", &state.is_complete)
            .field("is_closed", &self.is_closed())
            .finish()
    }
}
