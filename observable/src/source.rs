//! The stream source contract.
//!
//! A source is any [`Stream`] of `Result<T, E>`: `Ok` items are values, the first `Err` is a
//! terminal error, and the end of the stream is completion.

use futures::{
    Stream, StreamExt,
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    stream::BoxStream,
};

use crate::error::SourceError;

/// A type-erased source as consumed by [`SharedSubscription`](crate::SharedSubscription)
pub type Source<T> = BoxStream<'static, Result<T, SourceError>>;

/// Trait for types that can be turned into a [`Source`]
pub trait IntoSource<T> {
    fn into_source(self) -> Source<T>;
}

impl<S, T, E> IntoSource<T> for S
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: 'static,
    E: Into<SourceError> + 'static,
{
    fn into_source(self) -> Source<T> { self.map(|item| item.map_err(Into::into)).boxed() }
}

/// A source whose values are pushed by hand.
pub fn channel<T>() -> (Emitter<T>, EmitterStream<T>) {
    let (tx, rx) = mpsc::unbounded();
    (Emitter(tx), EmitterStream(rx))
}

/// The sending half of [`channel`]. Clones push into the same source.
#[derive(Clone)]
pub struct Emitter<T>(UnboundedSender<Result<T, SourceError>>);

/// The receiving half of [`channel`]; hand it to a subscription as its source.
pub struct EmitterStream<T>(UnboundedReceiver<Result<T, SourceError>>);

impl<T> Emitter<T> {
    /// Push a value. Returns false if the source has already ended or nobody is listening.
    pub fn next(&self, value: T) -> bool { self.0.unbounded_send(Ok(value)).is_ok() }

    /// Push a terminal error and end the source
    pub fn error(&self, error: impl Into<SourceError>) -> bool {
        let sent = self.0.unbounded_send(Err(error.into())).is_ok();
        self.0.close_channel();
        sent
    }

    /// End the source. Items pushed before completing are still delivered.
    pub fn complete(&self) { self.0.close_channel(); }

    pub fn is_closed(&self) -> bool { self.0.is_closed() }
}

impl<T> Stream for EmitterStream<T> {
    type Item = Result<T, SourceError>;

    fn poll_next(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) { self.0.size_hint() }
}
