use thiserror::Error;

/// Recoverable primitive-level failures.
///
/// Every operation that returns one of these leaves the heap and all call
/// stacks exactly as they were.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("index {index} out of bounds for size {size}")]
    OutOfBounds { index: usize, size: usize },

    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    #[error("bad receiver: {0}")]
    BadReceiver(&'static str),

    #[error("unsupported value: {0}")]
    UnsupportedValue(&'static str),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Check `index` against `size`.
#[inline]
pub fn check_index(index: usize, size: usize) -> Result<()> {
    if index < size {
        Ok(())
    } else {
        Err(Error::OutOfBounds { index, size })
    }
}

/// Abort on a broken core invariant.
///
/// These are not Smalltalk-level conditions and must never be turned into a
/// primitive failure.
#[cold]
#[track_caller]
pub fn inconsistency(what: core::fmt::Arguments<'_>) -> ! {
    log::error!("internal consistency failure: {what}");
    panic!("internal consistency failure: {what}")
}
