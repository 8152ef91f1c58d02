//! Operations: immutable records of single events.

use std::fmt;

use crate::error::Error;

/// The kind of change an [`Op`] records.
///
/// Identifiers are stable small integers. Extend by appending, never
/// renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum OpKind {
    /// Creation of the subject.
    #[default]
    Init = 1,
    /// Replacement of the most recent record for the subject.
    Amend = 2,
    /// A tombstone marking removal. History is never physically discarded.
    Remove = 3,
}

impl OpKind {
    /// The string form used in human-readable projections.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Init => "init",
            OpKind::Amend => "amend",
            OpKind::Remove => "remove",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for OpKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpKind::Init),
            2 => Ok(OpKind::Amend),
            3 => Ok(OpKind::Remove),
            _ => Err(Error::DecodeFailed("unknown op kind")),
        }
    }
}

/// The kind of entity an [`Op`] concerns.
///
/// Logs nest by model depth: a user log holds name logs, a name log holds
/// branch logs, and branch logs hold the version, publication, acl and
/// cron-job records for one line of history.
///
/// Identifiers are stable small integers. Extend by appending, never
/// renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Model {
    /// An author profile.
    #[default]
    User = 0,
    /// A dataset name within an author's namespace.
    Name = 1,
    /// A line of commits for a dataset.
    Branch = 2,
    /// A dataset version.
    Version = 3,
    /// Publication of one or more versions to a destination.
    Publication = 4,
    /// Access control changes.
    Acl = 5,
    /// A scheduled-job execution.
    CronJob = 6,
}

impl Model {
    /// The string form used in human-readable projections.
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::User => "user",
            Model::Name => "name",
            Model::Branch => "branch",
            Model::Version => "version",
            Model::Publication => "publication",
            Model::Acl => "acl",
            Model::CronJob => "cronJob",
        }
    }

    /// Whether a log of this model may nest directly under a log of model
    /// `parent`.
    pub fn nests_under(&self, parent: Model) -> bool {
        matches!(
            (parent, self),
            (Model::User, Model::Name)
                | (Model::Name, Model::Branch)
                | (
                    Model::Branch,
                    Model::Version | Model::Publication | Model::Acl | Model::CronJob
                )
        )
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u32> for Model {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Model::User),
            1 => Ok(Model::Name),
            2 => Ok(Model::Branch),
            3 => Ok(Model::Version),
            4 => Ok(Model::Publication),
            5 => Ok(Model::Acl),
            6 => Ok(Model::CronJob),
            _ => Err(Error::DecodeFailed("unknown model")),
        }
    }
}

/// An immutable record of a single event.
///
/// Ops are written once and never changed; the current state of a log is
/// derived by replaying its ops in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Op {
    /// Kind of operation.
    pub kind: OpKind,
    /// The entity this operation concerns.
    pub model: Model,
    /// Operation timestamp in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Identifier of the subject of this op, e.g. the content hash of a
    /// dataset version.
    pub reference: String,
    /// Identifier of the predecessor in a causal chain. May be empty.
    pub prev: String,
    /// References this operation relates to. Usage is model-dependent, e.g.
    /// publish destinations.
    pub relations: Vec<String>,
    /// Human-readable name for the subject, e.g. a dataset or branch name.
    pub name: String,
    /// Identifier of the author at the time of the op. Stable across renames.
    pub author_id: String,
    /// Size field. Interpretation depends on `(model, kind)`: byte length for
    /// version inits, a count of trailing versions for version removes and
    /// publication ops.
    pub size: i64,
    /// Free-form annotation for users, e.g. a commit title.
    pub note: String,
}
