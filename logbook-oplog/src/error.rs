//! Error taxonomy for the oplog core.

use ed25519_dalek::SignatureError;

/// Errors produced by oplog operations.
///
/// No operation retries internally; every error is surfaced to the caller of
/// the verb that triggered it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Lookup by id or name path yielded no match.
    #[error("oplog: not found")]
    NotFound,
    /// A merge or construct was presented with fewer ops than held locally.
    /// Logs are append-only, so a shorter log is grounds for rejection.
    #[error("oplog: log is too short")]
    LogTooShort,
    /// Two logs with the same identity disagree on their common prefix.
    #[error("oplog: logs disagree on common history")]
    DivergentHistory,
    /// A signature was missing or did not verify.
    #[error("oplog: invalid signature: {0}")]
    SignatureInvalid(#[from] SignatureError),
    /// The encrypted book blob failed authentication. Wrong key, or the blob
    /// was tampered with.
    #[error("oplog: could not decrypt book")]
    DecryptFailed,
    /// Binary layout violation while decoding.
    #[error("oplog: invalid binary data: {0}")]
    DecodeFailed(&'static str),
    /// Append with a timestamp earlier than the log tail.
    #[error("oplog: timestamp is earlier than the log tail")]
    InvalidTimestamp,
    /// Replay encountered an impossible transition.
    #[error("oplog: corrupt log: {0}")]
    CorruptLog(&'static str),
    /// The caller does not own the log it tried to remove.
    #[error("oplog: authors can only remove logs they own")]
    Unauthorized,
    /// A top-level log with this id already exists.
    #[error("oplog: log already exists")]
    DuplicateLog,
}

impl Error {
    /// A [`Error::SignatureInvalid`] for a log that carries no signature at
    /// all.
    pub(crate) fn missing_signature() -> Self {
        Error::SignatureInvalid(SignatureError::new())
    }
}

/// Result alias with the crate error.
pub type Result<T, E = Error> = std::result::Result<T, E>;
