//! The result of a [`Deferred`](crate::Deferred): a tagged sum of a success
//! value or a failure value, never both, never neither.

use std::fmt;

/// An uninhabited type, used to mark a [`Deferred`](crate::Deferred) (or an
/// [`Outcome`]) that can never fail.
///
/// `Outcome<V, Never>` is isomorphic to `V`: see [`Outcome::into_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Never {}

impl fmt::Display for Never {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl std::error::Error for Never {}

/// The settled outcome of a [`Deferred`](crate::Deferred): either a success
/// value `V` or a failure value `E`. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<V, E> {
    Success(V),
    Failure(E),
}

impl<V, E> Outcome<V, E> {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    #[inline]
    pub fn success(self) -> Option<V> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    #[inline]
    pub fn failure(self) -> Option<E> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }

    /// Transforms the success branch, leaving a failure untouched.
    #[inline]
    pub fn map<V2>(self, f: impl FnOnce(V) -> V2) -> Outcome<V2, E> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Failure(e) => Outcome::Failure(e),
        }
    }

    /// Transforms the failure branch, leaving a success untouched.
    #[inline]
    pub fn map_err<E2>(self, f: impl FnOnce(E) -> E2) -> Outcome<V, E2> {
        match self {
            Outcome::Success(v) => Outcome::Success(v),
            Outcome::Failure(e) => Outcome::Failure(f(e)),
        }
    }

    /// Chains a success branch into another `Outcome`, short-circuiting on
    /// failure. The error channel is unchanged.
    #[inline]
    pub fn flat_map<V2>(self, f: impl FnOnce(V) -> Outcome<V2, E>) -> Outcome<V2, E> {
        match self {
            Outcome::Success(v) => f(v),
            Outcome::Failure(e) => Outcome::Failure(e),
        }
    }

    /// Converts to `std::result::Result`, the interop boundary with the rest
    /// of the ecosystem (`?`, combinators from `itertools`, etc.).
    #[inline]
    pub fn try_get(self) -> Result<V, E> {
        self.into()
    }
}

impl<V> Outcome<V, Never> {
    /// Unwraps an infallible outcome. No panic path exists: `Never` has no
    /// inhabitants, so the `Failure` arm is unreachable by construction.
    #[inline]
    pub fn into_value(self) -> V {
        match self {
            Outcome::Success(v) => v,
            Outcome::Failure(never) => match never {},
        }
    }
}

impl<V, E> From<Result<V, E>> for Outcome<V, E> {
    #[inline]
    fn from(r: Result<V, E>) -> Self {
        match r {
            Ok(v) => Outcome::Success(v),
            Err(e) => Outcome::Failure(e),
        }
    }
}

impl<V, E> From<Outcome<V, E>> for Result<V, E> {
    #[inline]
    fn from(o: Outcome<V, E>) -> Self {
        match o {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_transforms_success_only() {
        let s: Outcome<i32, &str> = Outcome::Success(1);
        assert_eq!(s.map(|v| v + 1), Outcome::Success(2));

        let f: Outcome<i32, &str> = Outcome::Failure("boom");
        assert_eq!(f.map(|v| v + 1), Outcome::Failure("boom"));
    }

    #[test]
    fn map_err_transforms_failure_only() {
        let f: Outcome<i32, &str> = Outcome::Failure("boom");
        assert_eq!(f.map_err(|e| e.len()), Outcome::Failure(4));

        let s: Outcome<i32, &str> = Outcome::Success(1);
        assert_eq!(s.map_err(|e| e.len()), Outcome::Success(1));
    }

    #[test]
    fn flat_map_short_circuits_on_failure() {
        let f: Outcome<i32, &str> = Outcome::Failure("boom");
        let out = f.flat_map(|v| Outcome::Success(v + 1));
        assert_eq!(out, Outcome::Failure("boom"));
    }

    #[test]
    fn never_into_value_unwraps_without_branching_on_failure() {
        let o: Outcome<i32, Never> = Outcome::Success(42);
        assert_eq!(o.into_value(), 42);
    }

    #[test]
    fn result_round_trip() {
        let o: Outcome<i32, &str> = Ok::<_, &str>(1).into();
        assert_eq!(o.try_get(), Ok(1));
        let o: Outcome<i32, &str> = Err::<i32, _>("x").into();
        assert_eq!(o.try_get(), Err("x"));
    }
}
