//! Errors for fitzcore.

use std::fmt;
use std::io::Error as IoError;

/// error_chain and failure are certainly nice, but completely overengineered
/// for this use-case. For example, neither of them allow error localization.
/// Additionally, debugging macros can get hairy really quick and matching with
/// `*e.kind()` or doing From conversions for other errors is really hard to do.
///
/// So in this case, the best form of error handling is to use the simple Rust-native
/// way: Just enums, `From` + pattern matching. No macros, except for this one.
///
/// What this macro does is (simplified): `impl From<$a> for $b { $b::$variant(error) }`
macro_rules! impl_from {
    ($from:ident, $to:ident::$variant:ident) => {
        impl From<$from> for $to {
            fn from(err: $from) -> Self {
                $to::$variant(err)
            }
        }
    };
}

/// The kind of an error, used by callers that need to branch on category
/// rather than match the full variant (e.g. the `try_later`/`incomplete_ok`
/// swallowing policy).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfMemory,
    Syntax,
    Range,
    Io,
    Unsupported,
    TryLater,
    Abort,
    Generic,
}

#[derive(Debug)]
pub enum Error {
    /// Allocator or store could not satisfy a request after scavenging.
    OutOfMemory,
    /// Malformed input (bad path/text/image data, not an I/O failure).
    Syntax(String),
    /// Index or size out of the valid range.
    Range(String),
    /// External: std::io::Error
    Io(IoError),
    /// A feature or configuration combination the implementation declines to handle.
    Unsupported(String),
    /// Progressive-loading: not enough data yet, retry later.
    TryLater,
    /// `cookie.abort` was honoured.
    Abort,
    /// Everything else.
    Generic(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::Syntax(_) => ErrorKind::Syntax,
            Error::Range(_) => ErrorKind::Range,
            Error::Io(_) => ErrorKind::Io,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::TryLater => ErrorKind::TryLater,
            Error::Abort => ErrorKind::Abort,
            Error::Generic(_) => ErrorKind::Generic,
        }
    }
}

impl_from!(IoError, Error::Io);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Error::*;
        match self {
            OutOfMemory => write!(f, "out of memory"),
            Syntax(s) => write!(f, "syntax error: {s}"),
            Range(s) => write!(f, "out of range: {s}"),
            Io(e) => write!(f, "{e}"),
            Unsupported(s) => write!(f, "unsupported: {s}"),
            TryLater => write!(f, "try again later, not enough data"),
            Abort => write!(f, "aborted"),
            Generic(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for Error {}

pub type FitzResult<T> = Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::OutOfMemory.kind(), ErrorKind::OutOfMemory);
        assert_eq!(Error::TryLater.kind(), ErrorKind::TryLater);
        assert_eq!(Error::Abort.kind(), ErrorKind::Abort);
    }

    #[test]
    fn io_error_converts() {
        let io = IoError::new(std::io::ErrorKind::NotFound, "nope");
        let e: Error = io.into();
        assert_eq!(e.kind(), ErrorKind::Io);
    }
}
