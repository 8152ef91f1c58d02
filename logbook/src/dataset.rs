//! Dataset references and the summary types the logbook records.

use std::fmt;

use logbook_oplog::{Log, Model, Op};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A dataset address.
///
/// `path` is the content hash of a specific version; an empty path addresses
/// the dataset as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Name of the user the dataset belongs to.
    pub username: String,
    /// Identifier of the user's profile. Stable across renames.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    /// Name of the dataset.
    pub name: String,
    /// Content hash of a specific version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Ref {
    /// A ref addressing a dataset by username and name alone.
    pub fn new(username: impl Into<String>, name: impl Into<String>) -> Self {
        Ref {
            username: username.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.username, self.name)?;
        if !self.path.is_empty() {
            write!(f, "@{}", self.path)?;
        }
        Ok(())
    }
}

/// Commit details of a dataset version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Creation timestamp in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Commit title.
    pub title: String,
}

/// Structure details of a dataset version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    /// Byte length of the dataset body.
    pub length: i64,
}

/// The summary of a dataset version a producer hands to the logbook. The
/// dataset model itself lives elsewhere; this is only what history records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Name of the user the dataset belongs to.
    pub username: String,
    /// Identifier of the user's profile.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    /// Name of the dataset.
    pub name: String,
    /// Content hash of this version.
    pub path: String,
    /// Content hash of the preceding version. Empty for the first.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub previous_path: String,
    /// Commit details.
    pub commit: Commit,
    /// Structure details, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
}

impl Dataset {
    /// The [`Ref`] addressing this dataset version.
    pub fn dataset_ref(&self) -> Ref {
        Ref {
            username: self.username.clone(),
            profile_id: self.profile_id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

/// Info about one dataset version in a repository, derived by replaying a
/// branch log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetInfo {
    /// Version reference.
    #[serde(rename = "ref")]
    pub reference: Ref,
    /// Whether this version is listed as available.
    pub published: bool,
    /// Creation timestamp in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Title from the commit.
    pub commit_title: String,
    /// Size of the dataset in bytes.
    pub size: i64,
}

pub(crate) fn info_from_op(r: &Ref, op: &Op) -> DatasetInfo {
    DatasetInfo {
        reference: Ref {
            username: r.username.clone(),
            profile_id: r.profile_id.clone(),
            name: r.name.clone(),
            path: op.reference.clone(),
        },
        published: false,
        timestamp: op.timestamp,
        commit_title: op.note.clone(),
        size: op.size,
    }
}

/// A simplified, line-by-line representation of a log operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Operation timestamp in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Name of the author of the operation.
    pub author: String,
    /// What the operation did, e.g. "save commit".
    pub action: String,
    /// Annotation, e.g. a commit title.
    pub note: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.timestamp, self.author, self.action, self.note
        )
    }
}

/// Parse log data into a dataset alias reference, populating only the
/// username and name components.
///
/// The log must refer unambiguously to a single dataset: an author-rooted
/// log with exactly one dataset child, the shape
/// [`Book::user_dataset_ref`](crate::Book::user_dataset_ref) returns.
pub fn dsref_alias_for_log(log: &Log) -> Result<Ref> {
    if log.model() != Model::User {
        return Err(Error::NotUserRooted);
    }
    if log.logs().len() != 1 {
        return Err(Error::AmbiguousReference);
    }
    Ok(Ref::new(log.name(), log.logs()[0].name()))
}

#[cfg(test)]
mod tests {
    use logbook_oplog::OpKind;

    use super::*;

    fn user_log(name: &str) -> Log {
        Log::init(Op {
            kind: OpKind::Init,
            model: Model::User,
            name: name.to_string(),
            timestamp: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_alias_for_log() -> anyhow::Result<()> {
        let mut log = user_log("alice");
        log.add_child(Log::init(Op {
            kind: OpKind::Init,
            model: Model::Name,
            name: "weather".to_string(),
            timestamp: 2,
            ..Default::default()
        }))?;

        let alias = dsref_alias_for_log(&log)?;
        assert_eq!(alias, Ref::new("alice", "weather"));
        Ok(())
    }

    #[test]
    fn test_alias_rejects_bad_shapes() -> anyhow::Result<()> {
        // no dataset child
        assert!(matches!(
            dsref_alias_for_log(&user_log("alice")),
            Err(Error::AmbiguousReference)
        ));

        // not rooted as an author
        let branch = Log::init(Op {
            kind: OpKind::Init,
            model: Model::Branch,
            name: "main".to_string(),
            timestamp: 1,
            ..Default::default()
        });
        assert!(matches!(
            dsref_alias_for_log(&branch),
            Err(Error::NotUserRooted)
        ));
        Ok(())
    }

    #[test]
    fn test_ref_display() {
        let mut r = Ref::new("alice", "weather");
        assert_eq!(r.to_string(), "alice/weather");
        r.path = "QmHash".to_string();
        assert_eq!(r.to_string(), "alice/weather@QmHash");
    }
}
