use std::sync::{Arc, Mutex};
use std::time::Duration;

use ankurah_observable::*;
use futures::StreamExt;
use tokio::time::Instant;

mod common;
use common::{settle, watcher};

const TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(start_paused = true)]
async fn test_values_then_completion() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, TIMEOUT);
    assert!(!subscription.has_emitted());
    assert_eq!(subscription.latest(), None);

    let (on_next, on_error, check) = watcher();
    let _guard = subscription.subscribe(on_next, on_error);

    emitter.next(1);
    emitter.next(2);
    emitter.complete();
    settle().await;

    assert_eq!(check(), [Notification::Next(1), Notification::Next(2)]);
    assert!(subscription.has_emitted());
    assert!(subscription.is_complete());
    assert!(!subscription.has_error());
    assert_eq!(subscription.latest(), Some(2));
    assert_eq!(subscription.emission_count(), 2);

    // the source has ended, nothing more gets through
    assert!(!emitter.next(3));
    assert!(!emitter.error(SourceError::msg("too late")));
    settle().await;
    assert!(check().is_empty());
    assert_eq!(subscription.latest(), Some(2));
    assert!(!subscription.has_error());
}

#[tokio::test(start_paused = true)]
async fn test_nothing_after_end_of_stream() {
    // a source that keeps producing after signalling its end
    let mut items = vec![Some(Ok(1u32)), None, Some(Ok(2)), Some(Err(SourceError::msg("late")))].into_iter();
    let source = futures::stream::poll_fn(move |_| std::task::Poll::Ready(items.next().flatten()));

    let subscription = SharedSubscription::new(source, TIMEOUT);
    settle().await;

    assert!(subscription.is_complete());
    assert!(!subscription.has_error());
    assert_eq!(subscription.latest(), Some(1));
    assert_eq!(subscription.emission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_synchronous_source_is_recorded_during_construction() {
    let source = futures::stream::iter([Ok::<_, SourceError>("a"), Ok("b")]);
    let subscription = SharedSubscription::new(source, TIMEOUT);

    // no await between construction and these reads
    assert!(subscription.has_emitted());
    assert!(subscription.is_complete());
    assert_eq!(subscription.latest(), Some("b"));
    assert_eq!(subscription.first_emission().outcome(), Some(FirstEmissionOutcome::Value));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_emission() {
    let start = Instant::now();
    let subscription = SharedSubscription::new(futures::stream::pending::<Result<u32, SourceError>>(), TIMEOUT);

    assert_eq!(subscription.first_emission().await, FirstEmissionOutcome::TimedOut);
    let elapsed = start.elapsed();
    assert!(elapsed >= TIMEOUT, "settled early after {elapsed:?}");
    assert!(elapsed < TIMEOUT + Duration::from_millis(10), "settled late after {elapsed:?}");

    // released, but with nothing to show
    assert!(!subscription.has_emitted());
    assert!(!subscription.has_error());
    assert_eq!(subscription.latest(), None);
}

#[tokio::test(start_paused = true)]
async fn test_value_after_timeout_does_not_resettle() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(subscription.first_emission().outcome(), Some(FirstEmissionOutcome::TimedOut));

    emitter.next(5);
    settle().await;
    assert!(subscription.has_emitted());
    assert_eq!(subscription.latest(), Some(5));
    assert_eq!(subscription.first_emission().outcome(), Some(FirstEmissionOutcome::TimedOut));
}

#[tokio::test(start_paused = true)]
async fn test_first_value_wins_the_race() {
    let source = futures::stream::once(async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, SourceError>(7u32)
    })
    .chain(futures::stream::pending());
    let subscription = SharedSubscription::new(source, TIMEOUT);

    let start = Instant::now();
    assert_eq!(subscription.first_emission().await, FirstEmissionOutcome::Value);
    assert!(start.elapsed() < TIMEOUT);

    // the timeout elapsing later changes nothing
    tokio::time::sleep(TIMEOUT * 2).await;
    assert_eq!(subscription.first_emission().outcome(), Some(FirstEmissionOutcome::Value));
    assert!(!subscription.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_error_reaches_each_observer_once() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, TIMEOUT);

    let (on_next_a, on_error_a, check_a) = watcher();
    let (on_next_b, on_error_b, check_b) = watcher();
    let _a = subscription.subscribe(on_next_a, on_error_a);
    let _b = subscription.subscribe(on_next_b, on_error_b);

    let error = SourceError::msg("connection reset");
    emitter.error(error.clone());

    assert_eq!(subscription.first_emission().await, FirstEmissionOutcome::Error);
    settle().await;

    assert!(subscription.has_error());
    assert!(!subscription.has_emitted());
    assert!(!subscription.is_complete());
    assert_eq!(subscription.error(), Some(error.clone()));
    assert_eq!(check_a(), [Notification::Error(error.clone())]);
    assert_eq!(check_b(), [Notification::Error(error)]);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_error_is_sticky() {
    #[derive(Debug, thiserror::Error)]
    #[error("no such user")]
    struct NotFound;

    let source = futures::stream::iter([Err::<u32, _>(NotFound), Err(NotFound)]);
    let subscription = SharedSubscription::new(source, TIMEOUT);

    assert_eq!(subscription.first_emission().outcome(), Some(FirstEmissionOutcome::Error));
    assert!(subscription.has_error());
    let error = subscription.error().expect("error was captured");
    assert!(error.downcast_ref::<NotFound>().is_some());
    assert_eq!(error.to_string(), "no such user");

    // later observers see the flag, and are never called
    let (on_next, on_error, check) = watcher();
    let _guard = subscription.subscribe(on_next, on_error);
    tokio::time::sleep(TIMEOUT * 2).await;
    assert!(check().is_empty());
    assert!(subscription.has_error());
    assert!(!subscription.is_complete());
    assert_eq!(subscription.error(), Some(error));
}

#[tokio::test(start_paused = true)]
async fn test_detach_only_affects_that_observer() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, TIMEOUT);

    let (on_next_a, on_error_a, check_a) = watcher();
    let (on_next_b, on_error_b, check_b) = watcher();
    let a = subscription.subscribe(on_next_a, on_error_a);
    let _b = subscription.subscribe(on_next_b, on_error_b);
    assert_eq!(subscription.observer_count(), 2);

    emitter.next(1);
    settle().await;

    a.detach();
    a.detach();
    assert!(!a.is_attached());
    assert_eq!(subscription.observer_count(), 1);

    emitter.next(2);
    settle().await;

    assert_eq!(check_a(), [Notification::Next(1)]);
    assert_eq!(check_b(), [Notification::Next(1), Notification::Next(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_late_attach_reads_latest() {
    let (emitter, source) = source::channel::<String>();
    let subscription = SharedSubscription::new(source, TIMEOUT);

    emitter.next("first".to_string());
    emitter.next("second".to_string());
    settle().await;

    // the new observer reads what it missed, and hears only what comes next
    assert_eq!(subscription.latest().as_deref(), Some("second"));
    let (on_next, on_error, check) = watcher();
    let _guard = subscription.subscribe(on_next, on_error);
    assert!(check().is_empty());

    emitter.next("third".to_string());
    settle().await;
    assert_eq!(check(), [Notification::Next("third".to_string())]);
    assert_eq!(subscription.with_latest(|latest| latest.map(String::len)), Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_detach_during_delivery() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, TIMEOUT);

    let (on_next_b, on_error_b, check_b) = watcher();
    let b_guard: Arc<Mutex<Option<ListenerGuard<u32>>>> = Arc::new(Mutex::new(None));

    // the first observer detaches the second one while values are being delivered
    let _a = {
        let b_guard = b_guard.clone();
        subscription.subscribe(move |_| drop(b_guard.lock().unwrap().take()), |_| {})
    };
    *b_guard.lock().unwrap() = Some(subscription.subscribe(on_next_b, on_error_b));

    emitter.next(1);
    settle().await;
    // the pass that was already under way still reaches it
    assert_eq!(check_b(), [Notification::Next(1)]);
    assert_eq!(subscription.observer_count(), 1);

    emitter.next(2);
    settle().await;
    assert!(check_b().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_channel_listener_and_snapshot() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, TIMEOUT);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Notification<u32>>();
    let _guard = subscription.listen(tx);

    emitter.next(10);
    assert_eq!(rx.recv().await, Some(Notification::Next(10)));

    let error = SourceError::msg("gone");
    emitter.error(error.clone());
    assert_eq!(rx.recv().await, Some(Notification::Error(error.clone())));

    let snapshot = subscription.snapshot();
    assert_eq!(snapshot, Snapshot { latest: Some(10), error: Some(error), has_emitted: true, has_error: true, is_complete: false });
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_listening() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, TIMEOUT);
    emitter.next(1);
    settle().await;

    subscription.close();
    assert!(subscription.is_closed());
    settle().await;

    emitter.next(2);
    settle().await;
    assert_eq!(subscription.latest(), Some(1));
    assert!(!subscription.is_complete());
    // the driver dropped its end of the channel
    assert!(emitter.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_last_handle_releases_the_source() {
    let (emitter, source) = source::channel::<u32>();
    let subscription = SharedSubscription::new(source, TIMEOUT);
    let first_emission = subscription.first_emission();
    drop(subscription);
    settle().await;

    assert!(emitter.is_closed());
    assert!(!emitter.next(1));
    // the timer went with it
    tokio::time::sleep(TIMEOUT * 2).await;
    assert!(!first_emission.is_settled());
}

#[tokio::test]
async fn test_endless_source_does_not_block() {
    let subscription = SharedSubscription::new(futures::stream::repeat(Ok::<_, SourceError>(1u32)), TIMEOUT);

    // construction returns after recording what it could right away
    assert_eq!(subscription.first_emission().outcome(), Some(FirstEmissionOutcome::Value));
    let recorded = subscription.emission_count();
    assert!(recorded > 0);

    // the driver keeps consuming, and still hands the thread back
    tokio::task::yield_now().await;
    assert!(subscription.emission_count() > recorded);
    subscription.close();
}

#[tokio::test(start_paused = true)]
async fn test_ids_are_never_reused() {
    let first = SharedSubscription::new(futures::stream::pending::<Result<u32, SourceError>>(), TIMEOUT);
    let first_id = first.id();
    drop(first);

    for _ in 0..8 {
        let next = SharedSubscription::new(futures::stream::pending::<Result<u32, SourceError>>(), TIMEOUT);
        assert!(next.id() > first_id);
    }
}
