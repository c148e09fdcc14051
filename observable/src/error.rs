use std::sync::Arc;

use thiserror::Error;

/// Usage errors, reported synchronously before any subscription work happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservableError {
    #[error("cannot observe without a key")]
    MissingKey,
    /// The key is already bound to a subscription of a different value type
    #[error("key {key:?} is already bound to a different value type than {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

/// A failure captured from a stream source.
///
/// Cheap to clone; every clone refers to the same captured error, and equality means
/// "the same captured instance". Deliberately does not implement `std::error::Error`
/// so that anything convertible into `anyhow::Error` converts into a `SourceError`.
#[derive(Clone)]
pub struct SourceError(Arc<anyhow::Error>);

impl SourceError {
    pub fn msg<M>(message: M) -> Self
    where M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static {
        self.0.downcast_ref::<E>()
    }

    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) { self.0.root_cause() }

    /// Borrow the captured error as a standard error trait object
    pub fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) { &**self.0 }
}

impl<E> From<E> for SourceError
where E: Into<anyhow::Error>
{
    fn from(error: E) -> Self { Self(Arc::new(error.into())) }
}

impl PartialEq for SourceError {
    fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl Eq for SourceError {}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Display::fmt(&*self.0, f) }
}

impl std::fmt::Debug for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "SourceError({:?})", self.0) }
}
