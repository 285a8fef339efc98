//! Fatal invariant assertions.
//!
//! A failed invariant produces [`EmberError::InvariantViolation`], carrying
//! the description, the failed condition text and the source location.
//! Callers propagate it with `?` up to the process boundary.

use std::panic::Location;

use super::{EmberError, EmberResult};

/// Checks a fatal invariant.
///
/// Returns `Ok(())` when `condition` holds. Otherwise returns an
/// `InvariantViolation` whose file and line are those of the caller.
///
/// # Example
///
/// ```rust
/// use ember_common::error::assert_invariant;
///
/// assert!(assert_invariant(1 + 1 == 2, "arithmetic works").is_ok());
/// let err = assert_invariant(false, "never allowed").unwrap_err();
/// assert!(err.is_fatal());
/// assert!(err.to_string().contains("never allowed"));
/// ```
#[track_caller]
pub fn assert_invariant(condition: bool, description: &str) -> EmberResult<()> {
    if condition {
        return Ok(());
    }
    let location = Location::caller();
    let err = EmberError::invariant_violation(
        description,
        "assert_invariant",
        location.file(),
        location.line(),
        "<caller>",
    );
    tracing::error!(%err, "fatal invariant violation");
    Err(err)
}

/// Returns early with a fatal `InvariantViolation` if the condition is false.
///
/// The error records the stringified condition, `file!()`, `line!()` and
/// `module_path!()` of the call site. The enclosing function must return a
/// `Result` whose error type implements `From<EmberError>`.
///
/// ```rust
/// use ember_common::invariant;
/// use ember_common::error::EmberResult;
///
/// fn release(locator: u64, high_water: u64) -> EmberResult<()> {
///     invariant!(locator <= high_water, "locator {} above high-water mark", locator);
///     Ok(())
/// }
///
/// assert!(release(3, 5).is_ok());
/// assert!(release(9, 5).unwrap_err().is_fatal());
/// ```
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            let err = $crate::error::EmberError::invariant_violation(
                format!($($arg)+),
                stringify!($cond),
                file!(),
                line!(),
                module_path!(),
            );
            $crate::__tracing::error!(%err, "fatal invariant violation");
            return Err(err.into());
        }
    };
}
