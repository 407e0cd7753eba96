//! A semantically neutral sum type for representing one of two outcomes.
//!
//! `Either<L, R>` shows up at two seams of the runtime:
//!
//! - [`Effect::attempt`] materialises a failure into a value, yielding
//!   `Left(error)` or `Right(value)` without aborting the run.
//! - [`race`] yields `Left(a)` when the left contender wins and `Right(b)`
//!   when the right one does; neither side is an error.
//!
//! Unlike `Result`, neither variant implies failure; by convention the type
//! is "right-biased", so [`map`](Either::map) and friends operate on the
//! `Right` variant.
//!
//! [`Effect::attempt`]: crate::Effect::attempt
//! [`race`]: crate::race

/// A value that is either `Left(L)` or `Right(R)`.
///
/// # Example
///
/// ```
/// use millrace::Either;
///
/// let winner: Either<i32, &str> = Either::left(1);
/// let label = winner.fold(
///     |n| format!("left finished with {}", n),
///     |s| format!("right finished with {}", s),
/// );
/// assert_eq!(label, "left finished with 1");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Either<L, R> {
    /// The left variant.
    Left(L),
    /// The right variant.
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Create a `Left` value.
    #[inline]
    pub fn left(value: L) -> Self {
        Either::Left(value)
    }

    /// Create a `Right` value.
    #[inline]
    pub fn right(value: R) -> Self {
        Either::Right(value)
    }

    /// True if this is a `Left`.
    #[inline]
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    /// True if this is a `Right`.
    #[inline]
    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    /// The `Left` value, if any.
    pub fn into_left(self) -> Option<L> {
        match self {
            Either::Left(l) => Some(l),
            Either::Right(_) => None,
        }
    }

    /// The `Right` value, if any.
    pub fn into_right(self) -> Option<R> {
        match self {
            Either::Left(_) => None,
            Either::Right(r) => Some(r),
        }
    }

    /// Collapse both variants into a single value.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Either;
    ///
    /// let e: Either<i32, i32> = Either::right(2);
    /// assert_eq!(e.fold(|l| l * 10, |r| r * 100), 200);
    /// ```
    pub fn fold<T>(self, on_left: impl FnOnce(L) -> T, on_right: impl FnOnce(R) -> T) -> T {
        match self {
            Either::Left(l) => on_left(l),
            Either::Right(r) => on_right(r),
        }
    }

    /// Transform the `Right` value (right-biased map).
    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> Either<L, T> {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(f(r)),
        }
    }

    /// Transform the `Left` value.
    pub fn map_left<T>(self, f: impl FnOnce(L) -> T) -> Either<T, R> {
        match self {
            Either::Left(l) => Either::Left(f(l)),
            Either::Right(r) => Either::Right(r),
        }
    }

    /// Exchange the two sides.
    pub fn swap(self) -> Either<R, L> {
        match self {
            Either::Left(l) => Either::Right(l),
            Either::Right(r) => Either::Left(r),
        }
    }

    /// Borrow both sides.
    pub fn as_ref(&self) -> Either<&L, &R> {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(r),
        }
    }
}

impl<L, R> From<Result<R, L>> for Either<L, R> {
    fn from(result: Result<R, L>) -> Self {
        match result {
            Ok(r) => Either::Right(r),
            Err(l) => Either::Left(l),
        }
    }
}

impl<L, R> From<Either<L, R>> for Result<R, L> {
    fn from(either: Either<L, R>) -> Self {
        match either {
            Either::Left(l) => Err(l),
            Either::Right(r) => Ok(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_is_right_biased() {
        let l: Either<&str, i32> = Either::left("e");
        let r: Either<&str, i32> = Either::right(2);
        assert_eq!(l.map(|x| x + 1), Either::left("e"));
        assert_eq!(r.map(|x| x + 1), Either::right(3));
    }

    #[test]
    fn fold_selects_the_matching_branch() {
        let l: Either<i32, i32> = Either::left(1);
        assert_eq!(l.fold(|x| x, |x| x + 100), 1);
    }

    #[test]
    fn swap_exchanges_sides() {
        let l: Either<i32, &str> = Either::left(1);
        assert_eq!(l.swap(), Either::right(1));
    }

    #[test]
    fn result_round_trip() {
        let e: Either<&str, i32> = Either::from(Ok::<_, &str>(5));
        assert_eq!(e, Either::right(5));
        let back: Result<i32, &str> = e.into();
        assert_eq!(back, Ok(5));
    }
}
