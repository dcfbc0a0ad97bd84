//! Error types for cellbox and the mapping from raw engine result codes.
//!
//! Engine entry points report failures as a [`NativeError`] carrying an
//! integer code. The helpers here translate those codes into [`Error`] and
//! compose the message the same way for every call site: an optional
//! context prefix, followed by the thread's last engine error message if it
//! belongs to the same code.

use cellbox_engine::error::{self as codes, last_error_code, last_error_message};
use cellbox_engine::{ErrorCode, NativeError, NativeResult, ObjectId};
use thiserror::Error;

/// Result type for cellbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cellbox operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A precondition was violated by the caller.
    #[error("illegal argument: {message}")]
    IllegalArgument {
        /// Description of the violated precondition.
        message: String,
    },

    /// The operation is not valid in the current lifecycle state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of the state problem.
        message: String,
    },

    /// The store is closing or closed.
    #[error("shutting down: {message}")]
    ShuttingDown {
        /// Description of the rejected operation.
        message: String,
    },

    /// Something that had to exist did not.
    ///
    /// Routine absence (a missing object id, an empty query) is reported
    /// through `Option` or `bool` instead.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// The store would exceed its maximum data size.
    #[error("data size exceeded: {message}")]
    DataSizeExceeded {
        /// Engine message.
        message: String,
    },

    /// The engine lacks the requested capability.
    #[error("feature not available: {message}")]
    FeatureNotAvailable {
        /// Engine message.
        message: String,
    },

    /// Any other engine-reported failure.
    #[error("{message} (code {code})")]
    Db {
        /// Raw engine result code.
        code: ErrorCode,
        /// Engine message.
        message: String,
    },

    /// An async write could not be enqueued before the enqueue timeout.
    #[error("rejected: {message}")]
    Rejected {
        /// Engine message.
        message: String,
    },

    /// An entity could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },
}

impl Error {
    /// Creates an illegal argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a shutting down error.
    pub fn shutting_down(message: impl Into<String>) -> Self {
        Self::ShuttingDown {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns the raw engine code this error corresponds to.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::IllegalArgument { .. } => codes::ILLEGAL_ARGUMENT,
            Self::IllegalState { .. } => codes::ILLEGAL_STATE,
            Self::ShuttingDown { .. } => codes::SHUTTING_DOWN,
            Self::NotFound { .. } => codes::NOT_FOUND,
            Self::DataSizeExceeded { .. } => codes::MAX_DATA_SIZE_EXCEEDED,
            Self::FeatureNotAvailable { .. } => codes::FEATURE_NOT_AVAILABLE,
            Self::Db { code, .. } => *code,
            Self::Rejected { .. } => codes::TIMEOUT,
            Self::Codec { .. } => codes::GENERAL,
        }
    }

    /// Maps a raw code to an error, composing the message from `context`
    /// and the thread's last engine error.
    #[must_use]
    pub fn from_code(code: ErrorCode, context: Option<&str>) -> Self {
        let mut message = String::new();
        if let Some(context) = context {
            message.push_str(context);
            message.push_str(": ");
        }
        if code == codes::SUCCESS {
            message.push_str("no error occurred (operation was successful)");
            return Self::illegal_state(message);
        }
        append_last_error_text(code, &mut message);
        Self::with_message(code, message)
    }

    /// Maps an engine error, prefixing its message with `context`.
    #[must_use]
    pub fn from_native(err: NativeError, context: Option<&str>) -> Self {
        if err.message.is_empty() {
            return Self::from_code(err.code, context);
        }
        let message = match context {
            Some(context) => format!("{context}: {}", err.message),
            None => err.message,
        };
        Self::with_message(err.code, message)
    }

    fn with_message(code: ErrorCode, message: String) -> Self {
        match code {
            codes::ILLEGAL_ARGUMENT => Self::IllegalArgument { message },
            codes::ILLEGAL_STATE => Self::IllegalState { message },
            codes::SHUTTING_DOWN => Self::ShuttingDown { message },
            codes::NOT_FOUND => Self::NotFound { message },
            codes::MAX_DATA_SIZE_EXCEEDED => Self::DataSizeExceeded { message },
            codes::FEATURE_NOT_AVAILABLE => Self::FeatureNotAvailable { message },
            code => Self::Db { code, message },
        }
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        Self::from_native(err, None)
    }
}

fn append_last_error_text(code: ErrorCode, out: &mut String) {
    let last = last_error_code();
    if last == code {
        out.push_str(&last_error_message());
    } else {
        out.push_str(&format!("Error code {code}"));
        if last != codes::SUCCESS {
            out.push_str(&format!(
                " (last: {last}, last msg: {})",
                last_error_message()
            ));
        }
    }
}

/// Maps any engine failure to an [`Error`].
pub fn check_err<T>(result: NativeResult<T>) -> Result<T> {
    result.map_err(Error::from)
}

/// Returns `false` for `NO_SUCCESS`, `true` on success, an error otherwise.
pub fn check_success(result: NativeResult<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.code == codes::NO_SUCCESS => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Turns `NOT_FOUND` into `None`.
pub fn check_found<T>(result: NativeResult<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Treats a zero id as a failure described by the thread's last error.
pub fn check_id(id: ObjectId, context: Option<&str>) -> Result<ObjectId> {
    if id == 0 {
        Err(Error::from_code(last_error_code(), context))
    } else {
        Ok(id)
    }
}
