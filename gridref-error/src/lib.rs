#![deny(missing_docs)]
#![feature(error_generic_member_access)]

//! This crate defines error & result types for gridref.
//! It also contains a variety of useful macros for error handling.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{env, fmt, io};

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

#[allow(clippy::fallible_impl_from)]
impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    #[allow(clippy::panic)]
    fn from(msg: T) -> Self {
        if env::var("GRIDREF_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}\nBacktrace:\n{}", msg.into(), Backtrace::capture());
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Match and mismatch counts reported when computed chunk locations disagree with an
/// authoritative side-channel index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchCounts {
    /// The field that was compared, e.g. `offset` or `length`.
    pub field: &'static str,
    /// The resource the side-channel index describes.
    pub resource: String,
    /// Number of rows that satisfied the check.
    pub matched: usize,
    /// Number of rows that failed the check.
    pub mismatched: usize,
}

impl Display for MismatchCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to match message {} mapping for {}: {} matched, {} didn't",
            self.field, self.resource, self.matched, self.mismatched
        )
    }
}

/// The top-level error type for gridref.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum GridRefError {
    /// A reference fragment does not have the expected structure, e.g. no primary variable.
    #[error("Structure error: {0}\nBacktrace:\n{1}")]
    Structure(ErrString, Backtrace),
    /// The aggregation engine rejected the members of a hierarchy node.
    #[error("Aggregation error: {0}\nBacktrace:\n{1}")]
    Aggregation(ErrString, Backtrace),
    /// A variable is chunked in a way that cannot be represented as a flat coordinate index.
    #[error("Chunk index error: {0}\nBacktrace:\n{1}")]
    ChunkIndex(ErrString, Backtrace),
    /// A manifest entry or metadata document is malformed.
    #[error("Manifest error: {0}\nBacktrace:\n{1}")]
    Manifest(ErrString, Backtrace),
    /// A side-channel index failed validation.
    #[error("Validation error: {0}\nBacktrace:\n{1}")]
    Validation(ErrString, Backtrace),
    /// Computed chunk locations disagree with the authoritative side-channel index.
    #[error("{0}\nBacktrace:\n{1}")]
    Mismatch(MismatchCounts, Backtrace),
    /// An invalid argument was provided.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Backtrace),
    /// An error occurred while (de)serializing JSON.
    #[error("{0}\nBacktrace:\n{1}")]
    JsonError(serde_json::Error, Backtrace),
    /// An error occurred while decoding a base64-armored inline value.
    #[error("{0}\nBacktrace:\n{1}")]
    Base64Error(base64::DecodeError, Backtrace),
    /// An IO error occurred.
    #[error("{0}\nBacktrace:\n{1}")]
    IOError(io::Error, Backtrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, #[source] Box<GridRefError>),
}

impl GridRefError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        GridRefError::Context(msg.into(), Box::new(self))
    }

    /// Returns the innermost error, skipping any context wrappers.
    pub fn root_cause(&self) -> &GridRefError {
        match self {
            GridRefError::Context(_, inner) => inner.root_cause(),
            other => other,
        }
    }
}

impl Debug for GridRefError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A convenient macro for creating a GridRefError.
#[macro_export]
macro_rules! gridref_err {
    (Mismatch: $counts:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::GridRefError::Mismatch($counts, Backtrace::capture())
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::GridRefError::$variant(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use(
            $crate::GridRefError::$variant($err)
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::gridref_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenience macro for creating a GridRefError and returning it from the enclosing function.
#[macro_export]
macro_rules! gridref_bail {
    ($($tt:tt)+) => {
        return Err($crate::gridref_err!($($tt)+))
    };
}

/// A type alias for Results that return GridRefErrors as their error type.
pub type GridRefResult<T> = Result<T, GridRefError>;

impl From<serde_json::Error> for GridRefError {
    fn from(value: serde_json::Error) -> Self {
        GridRefError::JsonError(value, Backtrace::capture())
    }
}

impl From<base64::DecodeError> for GridRefError {
    fn from(value: base64::DecodeError) -> Self {
        GridRefError::Base64Error(value, Backtrace::capture())
    }
}

impl From<io::Error> for GridRefError {
    fn from(value: io::Error) -> Self {
        GridRefError::IOError(value, Backtrace::capture())
    }
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[must_use]
    pub const fn must_use(error: crate::GridRefError) -> crate::GridRefError {
        error
    }
}
