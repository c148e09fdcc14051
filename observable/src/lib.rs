/*!
Keyed, shared stream subscriptions for rendering layers.

A [`SubscriptionCache`] hands out one [`SharedSubscription`] per key. The subscription listens
to its source eagerly, remembers the latest value and whether the source errored or completed,
and multicasts to any number of attached observers. Consumers that want to suspend until
something arrives can await [`FirstEmission`], which settles on the first value, the first
error, or the timeout, whichever comes first.

# Basic usage

```rust
use ankurah_observable::*;

# #[tokio::main(flavor = "current_thread")]
# async fn main() -> Result<(), ObservableError> {
let cache = SubscriptionCache::default();
let (emitter, source) = source::channel::<u32>();

let subscription = cache.get_or_create("answer", move || source)?;
// same key, same subscription. This factory never runs.
let again = cache.get_or_create("answer", || futures::stream::empty::<Result<u32, SourceError>>())?;
assert_eq!(subscription.id(), again.id());

let _guard = subscription.subscribe(|value| println!("got {value}"), |error| println!("failed: {error}"));
emitter.next(42);

assert_eq!(subscription.first_emission().await, FirstEmissionOutcome::Value);
assert_eq!(subscription.latest(), Some(42));
# Ok(())
# }
```

# Suspense

```rust
use ankurah_observable::*;

# #[tokio::main(flavor = "current_thread")]
# async fn main() -> Result<(), ObservableError> {
let cache = SubscriptionCache::default();
let (emitter, source) = source::channel::<&'static str>();
let config = ObserveConfig::new().suspense(true);

let observation = cache.observe("greeting", move || source, &config)?;
let Observation::Suspended(token) = observation else { unreachable!() };

emitter.next("hello");
token.await;

let status = cache.observe("greeting", || futures::stream::pending::<Result<&str, SourceError>>(), &config)?.ready().unwrap();
assert_eq!(status.status, Status::Success);
assert_eq!(status.data, Some("hello"));
# Ok(())
# }
```
*/

mod broadcast;
mod cache;
mod config;
mod error;
mod first_emission;
mod subscription;
mod task;

pub mod binding;
pub mod source;
pub mod status;

pub use binding::Binding;
pub use broadcast::*;
pub use cache::*;
pub use config::*;
pub use error::*;
pub use first_emission::*;
pub use source::{Emitter, IntoSource, Source};
pub use status::{Observation, ObservableStatus, Status};
pub use subscription::*;
