//! Records and syncs dataset histories.
//!
//! As users work on datasets they build up a log of operations: creating a
//! dataset, committing a version, publishing, renaming, removing, running a
//! scheduled update. Each operation is written to a log attributed to the
//! user that performed the action and stored in the [`Book`] under the
//! namespace of that dataset; the current state of a dataset is derived by
//! replaying its operations in order (see [`Book::versions`]).
//!
//! Logs nest hierarchically (user → dataset → branch), are signed by their
//! author, and are exchanged between peers with [`Book::merge_log`], which
//! tolerates concurrent edits by different authors while rejecting divergent
//! histories from the same author. The book itself is persisted as a single
//! encrypted blob through a [`Filesystem`] capability.
//!
//! The log structures themselves live in [`logbook_oplog`] and are
//! re-exported here.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

mod book;
mod dataset;
mod error;
mod fs;
mod raw;

pub use self::book::{Book, Clock, DEFAULT_BRANCH_NAME};
pub use self::dataset::{
    dsref_alias_for_log, Commit, Dataset, DatasetInfo, LogEntry, Ref, Structure,
};
pub use self::error::{Error, Result};
pub use self::fs::{Filesystem, MemFs};
pub use self::raw::{RawLog, RawOp};

pub use logbook_oplog::{Author, AuthorInfo, Log, Model, Op, OpKind};
