//! Base datatypes for logbook.
//!
//! Everything in here is shared by the oplog core and the dataset-level
//! logbook crate: the [`Hash`](hash::Hash) used for content addressing and
//! log identity, and the ed25519 [`SecretKey`](key::SecretKey) /
//! [`PublicKey`](key::PublicKey) pair used to sign logs.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod hash;
pub mod key;

pub use self::hash::Hash;
pub use self::key::{KeyParsingError, PublicKey, SecretKey, Signature};
