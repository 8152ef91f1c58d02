//! Append-only, signed operation logs.
//!
//! The crate operates on [`Log`]s: ordered sequences of immutable [`Op`]s
//! plus nested child logs, immutably identified by the hash of their first
//! op. A [`Book`] collects the top-level logs of every known author, one
//! tree per author.
//!
//! Logs are single-writer: only their author appends, in non-decreasing
//! timestamp order, and signs the canonical encoding of the op list with an
//! ed25519 key. Because of that, two copies of the same log can always be
//! reconciled deterministically — a valid remote copy is a prefix-compatible
//! extension of the local one, and anything else is rejected as divergence
//! (see [`Log::merge`]).
//!
//! Books are serialized with a deterministic binary codec and encrypted at
//! rest with a key derived from the author's signing key; see
//! [`Book::encrypted_bytes`].
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

mod book;
mod cipher;
mod codec;
mod error;
mod log;
mod op;

pub use self::book::{Author, AuthorInfo, Book};
pub use self::error::{Error, Result};
pub use self::log::Log;
pub use self::op::{Model, Op, OpKind};
