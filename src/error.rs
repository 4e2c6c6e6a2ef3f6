//! Control-flow error kinds raised by the resolution engine itself, as
//! opposed to user payload errors carried as `E` in `Deferred<V, E>`.

use std::fmt;

/// Errors the core itself can raise, independent of any user error type.
///
/// A `Deferred<V, E>` that wants to receive one of these (via [`cancel`],
/// [`timeout`], `retrying`, or an aggregator's empty-input case) needs
/// `E: From<DeferredError>`.
///
/// [`cancel`]: crate::Deferred::cancel
/// [`timeout`]: crate::Deferred::timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredError {
    /// Explicit cancellation, or cancellation propagated from a destroyed
    /// downstream Deferred.
    Canceled(String),
    /// A [`timeout`](crate::Deferred::timeout) deadline elapsed before the
    /// source resolved.
    TimedOut(String),
    /// A second attempt to resolve an already-resolved Deferred, surfaced by
    /// the Resolver APIs that report it instead of silently returning
    /// `false`.
    AlreadyResolved,
    /// A contract violation: empty aggregator input, a failed `validate`
    /// predicate, or bad combinator arguments (e.g. `retrying(0, ..)`).
    Invalid(String),
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredError::Canceled(reason) => write!(f, "canceled: {reason}"),
            DeferredError::TimedOut(reason) => write!(f, "timed out: {reason}"),
            DeferredError::AlreadyResolved => write!(f, "already resolved"),
            DeferredError::Invalid(message) => write!(f, "invalid: {message}"),
        }
    }
}

impl std::error::Error for DeferredError {}

/// The widened failure channel used by throwing combinators (`try_map`,
/// `try_flat_map`, `validate`): any error, boxed.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_into_widened_error() {
        let e: Error = Box::new(DeferredError::Invalid("bad arg".into()));
        assert_eq!(e.to_string(), "invalid: bad arg");
    }

    #[test]
    fn display_matches_kind() {
        assert_eq!(
            DeferredError::Canceled("x".into()).to_string(),
            "canceled: x"
        );
        assert_eq!(DeferredError::AlreadyResolved.to_string(), "already resolved");
    }
}
