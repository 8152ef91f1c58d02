//! Error types for the logbook.

/// Errors produced by logbook operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error from the oplog core.
    #[error(transparent)]
    Oplog(#[from] logbook_oplog::Error),
    /// The operation was cancelled before its mutation was persisted. Any
    /// in-memory changes have been rolled back.
    #[error("logbook: operation cancelled")]
    Cancelled,
    /// A required input was empty.
    #[error("logbook: {0} is required")]
    Required(&'static str),
    /// A log handed to an alias lookup was not rooted as an author.
    #[error("logbook: log isn't rooted as an author")]
    NotUserRooted,
    /// An alias lookup needs exactly one dataset under the author log.
    #[error("logbook: ambiguous dataset reference")]
    AmbiguousReference,
    /// The operation is not finished.
    #[error("logbook: not finished")]
    Unfinished,
    /// An error from the filesystem capability, passed through unchanged.
    #[error(transparent)]
    Fs(#[from] anyhow::Error),
}

/// Result alias with the crate error.
pub type Result<T, E = Error> = std::result::Result<T, E>;
