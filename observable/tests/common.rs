use std::sync::{Arc, Mutex};
use std::time::Duration;

use ankurah_observable::{Notification, SourceError};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { tracing_subscriber::fmt().with_max_level(Level::DEBUG).with_test_writer().init(); }

type OnNext<T> = Box<dyn Fn(T) + Send + Sync>;
type OnError = Box<dyn Fn(SourceError) + Send + Sync>;
type Check<T> = Box<dyn Fn() -> Vec<Notification<T>> + Send + Sync>;

/// An observer pair that records what it receives, and a closure that drains the record
#[allow(unused)]
pub fn watcher<T: Send + Sync + 'static>() -> (OnNext<T>, OnError, Check<T>) {
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let on_next = {
        let notifications = notifications.clone();
        Box::new(move |value: T| {
            notifications.lock().unwrap().push(Notification::Next(value));
        })
    };
    let on_error = {
        let notifications = notifications.clone();
        Box::new(move |error: SourceError| {
            notifications.lock().unwrap().push(Notification::Error(error));
        })
    };

    let check = Box::new(move || {
        let notifications: Vec<Notification<T>> = notifications.lock().unwrap().drain(..).collect();
        notifications
    });

    (on_next, on_error, check)
}

/// Let spawned drivers catch up. With paused time this only returns once every task is idle.
#[allow(unused)]
pub async fn settle() { tokio::time::sleep(Duration::from_millis(1)).await; }
