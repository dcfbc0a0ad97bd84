//! Raw result codes and the per-thread last error.
//!
//! Every fallible engine entry point returns a [`NativeResult`]. Creating a
//! [`NativeError`] also records it as the calling thread's last error, which
//! is what the binding layer consults when it composes messages.

use std::cell::RefCell;

use thiserror::Error;

/// Raw result code type.
pub type ErrorCode = i32;

/// Success; never carried by a [`NativeError`].
pub const SUCCESS: ErrorCode = 0;
/// Routine absence (e.g. no object with the given id). Not a failure.
pub const NOT_FOUND: ErrorCode = 404;
/// The operation completed but did not succeed (e.g. nothing was changed).
pub const NO_SUCCESS: ErrorCode = 1001;
/// A blocking operation ran into its time limit.
pub const TIMEOUT: ErrorCode = 1002;

/// The object is in a state that does not allow the operation.
pub const ILLEGAL_STATE: ErrorCode = 10001;
/// An argument is invalid.
pub const ILLEGAL_ARGUMENT: ErrorCode = 10002;
/// An allocation failed.
pub const ALLOCATION: ErrorCode = 10003;
/// The feature is not available in this build of the engine.
pub const FEATURE_NOT_AVAILABLE: ErrorCode = 10005;
/// The store is shutting down.
pub const SHUTTING_DOWN: ErrorCode = 10006;
/// Unspecified failure.
pub const GENERAL: ErrorCode = 10098;
/// Too many concurrent read transactions.
pub const MAX_READERS_EXCEEDED: ErrorCode = 10102;
/// The store would exceed its configured maximum data size.
pub const MAX_DATA_SIZE_EXCEEDED: ErrorCode = 10104;
/// A unique constraint was violated.
pub const UNIQUE_VIOLATED: ErrorCode = 10201;
/// A query expected at most one result but found more.
pub const NON_UNIQUE_RESULT: ErrorCode = 10202;
/// A property was used with a value of the wrong type.
pub const PROPERTY_TYPE_MISMATCH: ErrorCode = 10203;
/// An insert used an id that is already taken.
pub const ID_ALREADY_EXISTS: ErrorCode = 10210;
/// An update referenced an id that does not exist.
pub const ID_NOT_FOUND: ErrorCode = 10211;

/// Result type for engine entry points.
pub type NativeResult<T> = Result<T, NativeError>;

/// An engine failure: a raw code plus a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct NativeError {
    /// Raw result code.
    pub code: ErrorCode,
    /// Human readable message.
    pub message: String,
}

impl NativeError {
    /// Creates an error and records it as this thread's last error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        set_last_error(code, message.clone());
        Self { code, message }
    }

    /// Creates a [`NOT_FOUND`] result.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NOT_FOUND, message)
    }

    /// Creates an [`ILLEGAL_STATE`] error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ILLEGAL_STATE, message)
    }

    /// Creates an [`ILLEGAL_ARGUMENT`] error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ILLEGAL_ARGUMENT, message)
    }

    /// Creates a [`SHUTTING_DOWN`] error.
    pub fn shutting_down(message: impl Into<String>) -> Self {
        Self::new(SHUTTING_DOWN, message)
    }

    /// Creates a [`PROPERTY_TYPE_MISMATCH`] error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(PROPERTY_TYPE_MISMATCH, message)
    }

    /// Returns true if this is the routine-absence code.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND
    }
}

thread_local! {
    static LAST_ERROR: RefCell<(ErrorCode, String)> = const { RefCell::new((SUCCESS, String::new())) };
}

/// Records the last error of the calling thread.
pub fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|e| *e.borrow_mut() = (code, message));
}

/// Clears the last error of the calling thread.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = (SUCCESS, String::new()));
}

/// Returns the code of the calling thread's last error ([`SUCCESS`] if none).
pub fn last_error_code() -> ErrorCode {
    LAST_ERROR.with(|e| e.borrow().0)
}

/// Returns the message of the calling thread's last error.
pub fn last_error_message() -> String {
    LAST_ERROR.with(|e| e.borrow().1.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_records_last_error() {
        clear_last_error();
        assert_eq!(last_error_code(), SUCCESS);

        let err = NativeError::illegal_argument("bad value");
        assert_eq!(err.code, ILLEGAL_ARGUMENT);
        assert_eq!(last_error_code(), ILLEGAL_ARGUMENT);
        assert_eq!(last_error_message(), "bad value");

        clear_last_error();
        assert!(last_error_message().is_empty());
    }

    #[test]
    fn last_error_is_per_thread() {
        clear_last_error();
        std::thread::spawn(|| {
            let _ = NativeError::illegal_state("other thread");
        })
        .join()
        .unwrap();
        assert_eq!(last_error_code(), SUCCESS);
    }

    #[test]
    fn not_found_is_distinct() {
        assert!(NativeError::not_found("no object").is_not_found());
        assert!(!NativeError::illegal_state("closed").is_not_found());
    }
}
