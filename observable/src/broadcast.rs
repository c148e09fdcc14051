use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use crate::error::SourceError;

/// Something a subscription tells its observers
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<T> {
    Next(T),
    Error(SourceError),
}

/// An attached observer.
#[derive(Clone)]
pub enum Listener<T> {
    /// Receives values and the terminal error
    Observer { on_next: Arc<dyn Fn(T) + Send + Sync + 'static>, on_error: Arc<dyn Fn(SourceError) + Send + Sync + 'static> },
    /// Only told that something happened
    NotifyOnly(Arc<dyn Fn() + Send + Sync + 'static>),
}

impl<T> Listener<T> {
    pub fn observer<N, E>(on_next: N, on_error: E) -> Self
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(SourceError) + Send + Sync + 'static,
    {
        Listener::Observer { on_next: Arc::new(on_next), on_error: Arc::new(on_error) }
    }

    fn deliver(&self, notification: Notification<T>) {
        match (self, notification) {
            (Listener::Observer { on_next, .. }, Notification::Next(value)) => on_next(value),
            (Listener::Observer { on_error, .. }, Notification::Error(error)) => on_error(error),
            (Listener::NotifyOnly(callback), _) => callback(),
        }
    }
}

/// Trait for types that can be converted into listeners.
pub trait IntoListener<T> {
    fn into_listener(self) -> Listener<T>;
}

/// An ordered set of listeners. Delivery happens in attachment order, without holding any
/// lock, over a snapshot taken when the delivery starts.
pub(crate) struct Broadcast<T>(Arc<Inner<T>>);

struct Inner<T> {
    listeners: RwLock<BTreeMap<usize, Listener<T>>>,
    next_id: AtomicUsize,
    /// Called whenever a detach leaves the set empty
    on_idle: OnceLock<Box<dyn Fn() + Send + Sync + 'static>>,
}

/// Keeps an observer attached. Detaches on [`ListenerGuard::detach`] or on drop.
pub struct ListenerGuard<T> {
    inner: Weak<Inner<T>>,
    id: usize,
}

impl<T> Broadcast<T> {
    pub fn new() -> Self {
        Self(Arc::new(Inner { listeners: RwLock::new(BTreeMap::new()), next_id: AtomicUsize::new(0), on_idle: OnceLock::new() }))
    }

    pub fn listen<L>(&self, listener: L) -> ListenerGuard<T>
    where L: IntoListener<T> {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0.listeners.write().expect("listeners lock is poisoned").insert(id, listener.into_listener());
        ListenerGuard { inner: Arc::downgrade(&self.0), id }
    }

    pub fn len(&self) -> usize { self.0.listeners.read().expect("listeners lock is poisoned").len() }

    /// Install the idle hook. Only the first call has any effect.
    pub fn on_idle<F>(&self, hook: F)
    where F: Fn() + Send + Sync + 'static {
        let _ = self.0.on_idle.set(Box::new(hook));
    }
}

impl<T> Broadcast<T>
where T: Clone
{
    /// Sends a notification to all listeners attached at the time of the call
    pub fn send(&self, notification: Notification<T>) {
        let listeners = {
            let listeners = self.0.listeners.read().expect("listeners lock is poisoned");
            listeners.values().cloned().collect::<Vec<_>>()
        };

        // clone the notification for each listener except the last one
        if let Some((last, rest)) = listeners.split_last() {
            for listener in rest {
                listener.deliver(notification.clone());
            }
            last.deliver(notification);
        }
    }
}

impl<T> ListenerGuard<T> {
    /// Stop delivering to this observer. Calling this again is a no-op.
    pub fn detach(&self) {
        let Some(inner) = self.inner.upgrade() else { return };
        let now_idle = {
            let mut listeners = inner.listeners.write().expect("listeners lock is poisoned");
            listeners.remove(&self.id).is_some() && listeners.is_empty()
        };
        if now_idle {
            if let Some(hook) = inner.on_idle.get() {
                hook();
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.listeners.read().expect("listeners lock is poisoned").contains_key(&self.id))
    }
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) { self.detach(); }
}

impl<T> std::fmt::Debug for ListenerGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "ListenerGuard({})", self.id) }
}

impl<T> IntoListener<T> for Listener<T> {
    fn into_listener(self) -> Listener<T> { self }
}

impl<T, N, E> IntoListener<T> for (N, E)
where
    N: Fn(T) + Send + Sync + 'static,
    E: Fn(SourceError) + Send + Sync + 'static,
{
    fn into_listener(self) -> Listener<T> { Listener::observer(self.0, self.1) }
}

// Unit listeners work with any value type
impl<T> IntoListener<T> for Arc<dyn Fn() + Send + Sync + 'static> {
    fn into_listener(self) -> Listener<T> { Listener::NotifyOnly(self) }
}

impl<T> IntoListener<T> for tokio::sync::mpsc::UnboundedSender<Notification<T>>
where T: Send + 'static
{
    fn into_listener(self) -> Listener<T> {
        let on_error = self.clone();
        Listener::observer(
            move |value| {
                let _ = self.send(Notification::Next(value)); // Ignore send errors
            },
            move |error| {
                let _ = on_error.send(Notification::Error(error));
            },
        )
    }
}
