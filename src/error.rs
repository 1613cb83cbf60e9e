//! Error taxonomy shared by every component of the crate.

use std::fmt;
use std::io;

use crate::engine::Backend;

/// Result alias used throughout packoxide.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller broke an API contract (wrong key length, zero workers...).
    ContractViolation,
    /// The container buffer is not something we can search against.
    MalformedInput,
    /// The host refused a resource (thread pool creation).
    Environment,
}

/// All errors the library can produce.
///
/// Terminal search outcomes such as an exhausted counter range or a user
/// stop are not errors; see [`crate::search::Outcome`].
#[derive(Debug)]
pub enum Error {
    /// A key slice was not exactly 32 bytes long.
    KeyLength(usize),
    /// A block slice was not exactly 16 bytes long.
    BlockLength(usize),
    /// The requested cipher backend cannot run on this host.
    BackendUnavailable(Backend),
    /// A search was configured with zero worker units.
    NoWorkers,
    /// A sequential enumeration range contains no counters.
    EmptyRange,
    /// A validation policy that checks zero bytes would confirm every key.
    EmptyPolicy,
    /// A textual key could not be turned into a [`crate::key::Key`].
    InvalidKey(String),
    /// The buffer is shorter than the header plus the minimum ciphertext.
    TooShort { len: usize, min: usize },
    /// Bytes 4..8 of the header are not the encrypted-metadata magic.
    BadMagic([u8; 4]),
    /// A content id does not fit the one-byte length field.
    ContentIdTooLong(usize),
    /// The worker pool could not be created.
    ThreadPool(rayon::ThreadPoolBuildError),
    /// The coordinator thread could not be spawned.
    Spawn(io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyLength(_)
            | Error::BlockLength(_)
            | Error::BackendUnavailable(_)
            | Error::NoWorkers
            | Error::EmptyRange
            | Error::EmptyPolicy
            | Error::InvalidKey(_) => ErrorKind::ContractViolation,
            Error::TooShort { .. } | Error::BadMagic(_) | Error::ContentIdTooLong(_) => {
                ErrorKind::MalformedInput
            }
            Error::ThreadPool(_) | Error::Spawn(_) => ErrorKind::Environment,
        }
    }

    pub fn is_malformed_input(&self) -> bool {
        self.kind() == ErrorKind::MalformedInput
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyLength(n) => write!(f, "key must be 32 bytes, got {n}"),
            Error::BlockLength(n) => write!(f, "block must be 16 bytes, got {n}"),
            Error::BackendUnavailable(b) => write!(f, "{b} backend is not available on this host"),
            Error::NoWorkers => write!(f, "search needs at least one worker"),
            Error::EmptyRange => write!(f, "counter range is empty"),
            Error::EmptyPolicy => write!(f, "validation policy checks no bytes"),
            Error::InvalidKey(s) => write!(f, "invalid key: {s}"),
            Error::TooShort { len, min } => {
                write!(f, "container too short: {len} bytes, need at least {min}")
            }
            Error::BadMagic(m) => write!(f, "bad magic value: {}", hex::encode(m)),
            Error::ContentIdTooLong(n) => write!(
                f,
                "content id too long: {n} bytes (max {})",
                crate::container::MAX_CONTENT_ID
            ),
            Error::ThreadPool(e) => write!(f, "failed to build worker pool: {e}"),
            Error::Spawn(e) => write!(f, "failed to spawn search thread: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ThreadPool(e) => Some(e),
            Error::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Error::ThreadPool(e)
    }
}
