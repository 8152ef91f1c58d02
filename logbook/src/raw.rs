//! Human-oriented projections of logs, intended for diagnostic export.

use logbook_oplog::{Log, Op};
use serde::{Deserialize, Serialize};

/// A human-oriented representation of a log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLog {
    /// The ops of the log.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<RawOp>,
    /// Nested child logs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<RawLog>,
}

/// A human-oriented representation of an op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOp {
    /// Kind of operation.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Data model the operation concerns.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    /// Identifier of the data this operation is documenting.
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    /// Previous reference in a causal history.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev: String,
    /// References this operation relates to. Usage is operation-dependent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<String>,
    /// Human-readable name for the reference.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Identifier for the author.
    #[serde(rename = "authorID", default, skip_serializing_if = "String::is_empty")]
    pub author_id: String,
    /// Operation timestamp in nanoseconds, for annotation purposes only.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timestamp: i64,
    /// Size of the referenced value in bytes.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: i64,
    /// Operation annotation for users, e.g. a commit title.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl From<&Op> for RawOp {
    fn from(op: &Op) -> Self {
        RawOp {
            kind: op.kind.as_str().to_string(),
            model: op.model.as_str().to_string(),
            reference: op.reference.clone(),
            prev: op.prev.clone(),
            relations: op.relations.clone(),
            name: op.name.clone(),
            author_id: op.author_id.clone(),
            timestamp: op.timestamp,
            size: op.size,
            note: op.note.clone(),
        }
    }
}

impl From<&Log> for RawLog {
    fn from(log: &Log) -> Self {
        RawLog {
            ops: log.ops().iter().map(RawOp::from).collect(),
            logs: log.logs().iter().map(RawLog::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use logbook_oplog::{Model, OpKind};

    use super::*;

    #[test]
    fn test_empty_fields_are_omitted() -> anyhow::Result<()> {
        let log = Log::init(Op {
            kind: OpKind::Init,
            model: Model::User,
            name: "alice".to_string(),
            timestamp: 100,
            ..Default::default()
        });
        let raw = RawLog::from(&log);
        let json = serde_json::to_value(&raw)?;
        assert_eq!(
            json,
            serde_json::json!({
                "ops": [{
                    "type": "init",
                    "model": "user",
                    "name": "alice",
                    "timestamp": 100,
                }],
            })
        );
        Ok(())
    }
}
