use std::future::Future;

use futures::future::{AbortHandle, abortable};

/// Spawn a task that stops at its next await point once the returned handle is aborted
pub(crate) fn spawn_abortable<F>(future: F) -> AbortHandle
where F: Future<Output = ()> + Send + 'static {
    let (future, handle) = abortable(future);
    tokio::spawn(future);
    handle
}
