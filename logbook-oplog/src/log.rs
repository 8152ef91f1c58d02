//! Logs: ordered, append-only op sequences with nested child logs.

use bytes::BufMut;
use logbook_base::{Hash, PublicKey, SecretKey, Signature};
use tracing::trace;

use crate::codec;
use crate::error::{Error, Result};
use crate::op::{Model, Op, OpKind};

/// An ordered, append-only list of [`Op`]s plus nested child logs.
///
/// A log is immutably identified by the hash of the canonical encoding of its
/// first op; appending ops never changes identity. Properties like the
/// current name and author are derived by scanning the ops, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    ops: Vec<Op>,
    logs: Vec<Log>,
    signature: Option<Signature>,
}

impl Log {
    /// Create a log from a single op.
    pub fn init(op: Op) -> Self {
        Log {
            ops: vec![op],
            logs: Vec::new(),
            signature: None,
        }
    }

    /// Create a log from already-validated parts. Used by the codec and for
    /// assembling sparse projections of an existing tree.
    pub(crate) fn assemble(ops: Vec<Op>, logs: Vec<Log>, signature: Option<Signature>) -> Self {
        Log {
            ops,
            logs,
            signature,
        }
    }

    /// Create a log from an op list and children, validating that the log
    /// begins with an init op. Useful for assembling sparse projections of an
    /// existing tree.
    pub fn from_parts(ops: Vec<Op>, logs: Vec<Log>) -> Result<Self> {
        match ops.first() {
            None => Err(Error::CorruptLog("log without ops")),
            Some(op) if op.kind != OpKind::Init => {
                Err(Error::CorruptLog("log must begin with an init op"))
            }
            Some(_) => Ok(Log::assemble(ops, logs, None)),
        }
    }

    /// The identity of this log: the hash of the canonical encoding of its
    /// first op. Stable for the lifetime of the log.
    pub fn id(&self) -> Hash {
        Hash::new(codec::op_bytes(&self.ops[0]))
    }

    /// The model of this log, taken from its first op.
    pub fn model(&self) -> Model {
        self.ops[0].model
    }

    /// The current name of this log: the most recent non-empty name among ops
    /// of the log's own model. Renames are amend ops, so the latest one wins.
    pub fn name(&self) -> &str {
        self.ops
            .iter()
            .rev()
            .find(|op| op.model == self.model() && !op.name.is_empty())
            .map(|op| op.name.as_str())
            .unwrap_or_default()
    }

    /// The most recent author identifier recorded in this log's ops.
    pub fn author(&self) -> &str {
        self.ops
            .iter()
            .rev()
            .find(|op| !op.author_id.is_empty())
            .map(|op| op.author_id.as_str())
            .unwrap_or_default()
    }

    /// The ops of this log, oldest first.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// The direct children of this log.
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// The signature over this log's ops, if it has been signed.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Append an op to the tail of this log.
    ///
    /// Ops must arrive in non-decreasing timestamp order; ties are fine and
    /// are broken by insertion order. Appending invalidates any cached
    /// signature.
    pub fn append(&mut self, op: Op) -> Result<()> {
        if let Some(last) = self.ops.last() {
            if op.timestamp < last.timestamp {
                return Err(Error::InvalidTimestamp);
            }
        }
        self.ops.push(op);
        self.signature = None;
        Ok(())
    }

    /// Add a direct child log.
    ///
    /// The child's model must nest under this log's model, and no two direct
    /// children may share a `(model, name)` pair.
    pub fn add_child(&mut self, child: Log) -> Result<()> {
        if !child.model().nests_under(self.model()) {
            return Err(Error::CorruptLog("child model does not nest under parent"));
        }
        if self
            .logs
            .iter()
            .any(|l| l.model() == child.model() && l.name() == child.name())
        {
            return Err(Error::DuplicateLog);
        }
        self.logs.push(child);
        Ok(())
    }

    /// Remove a direct child by its current name.
    pub(crate) fn remove_child(&mut self, name: &str) -> Result<()> {
        let idx = self
            .logs
            .iter()
            .position(|l| l.name() == name)
            .ok_or(Error::NotFound)?;
        self.logs.remove(idx);
        Ok(())
    }

    /// Find a direct child by its current name.
    pub fn child_by_name(&self, name: &str) -> Option<&Log> {
        self.logs.iter().find(|l| l.name() == name)
    }

    /// Find a direct child by its current name, mutably.
    pub fn child_by_name_mut(&mut self, name: &str) -> Option<&mut Log> {
        self.logs.iter_mut().find(|l| l.name() == name)
    }

    /// Descend child logs following `names`, matching each element against
    /// the current name of a direct child.
    pub fn head_ref(&self, names: &[&str]) -> Result<&Log> {
        match names.split_first() {
            None => Ok(self),
            Some((name, rest)) => self
                .child_by_name(name)
                .ok_or(Error::NotFound)?
                .head_ref(rest),
        }
    }

    /// Descend child logs following `names`, mutably.
    pub fn head_ref_mut(&mut self, names: &[&str]) -> Result<&mut Log> {
        match names.split_first() {
            None => Ok(self),
            Some((name, rest)) => self
                .child_by_name_mut(name)
                .ok_or(Error::NotFound)?
                .head_ref_mut(rest),
        }
    }

    /// Sign the canonical encoding of this log's ops, and of every nested
    /// log's ops, storing the signatures. A signed tree verifies at every
    /// level, which merging requires.
    pub fn sign(&mut self, key: &SecretKey) {
        let bytes = codec::ops_bytes(&self.ops);
        self.signature = Some(key.sign(&bytes));
        for child in &mut self.logs {
            child.sign(key);
        }
    }

    /// Verify this log's signature against `key`.
    ///
    /// An unsigned log never verifies.
    pub fn verify(&self, key: &PublicKey) -> Result<()> {
        let Some(signature) = &self.signature else {
            return Err(Error::missing_signature());
        };
        let bytes = codec::ops_bytes(&self.ops);
        key.verify(&bytes, signature)?;
        Ok(())
    }

    /// Verify this log and every nested log.
    pub fn verify_tree(&self, key: &PublicKey) -> Result<()> {
        self.verify(key)?;
        for child in &self.logs {
            child.verify_tree(key)?;
        }
        Ok(())
    }

    /// Merge a remote copy of this log.
    ///
    /// Per-author logs are single-writer and append-only, so a valid remote
    /// is always a prefix-compatible extension: the remote must verify
    /// against `key`, must be at least as long as the local log, and must
    /// agree byte-for-byte on the common prefix under canonical encoding.
    /// Remote children are merged recursively by id; unknown children are
    /// spliced in after their subtree verifies.
    ///
    /// On error the local log is left unchanged.
    pub fn merge(&mut self, remote: &Log, key: &PublicKey) -> Result<()> {
        let mut merged = self.clone();
        merged.merge_in_place(remote, key)?;
        *self = merged;
        Ok(())
    }

    fn merge_in_place(&mut self, remote: &Log, key: &PublicKey) -> Result<()> {
        remote.verify(key)?;
        if remote.ops.len() < self.ops.len() {
            return Err(Error::LogTooShort);
        }
        for (local, incoming) in self.ops.iter().zip(remote.ops.iter()) {
            if codec::op_bytes(local) != codec::op_bytes(incoming) {
                return Err(Error::DivergentHistory);
            }
        }
        if remote.ops.len() > self.ops.len() {
            trace!(
                id = %self.id(),
                appended = remote.ops.len() - self.ops.len(),
                "merging log tail"
            );
            self.ops.extend(remote.ops[self.ops.len()..].iter().cloned());
            // the remote signature covers exactly the extended op list
            self.signature = remote.signature;
        }
        for incoming in &remote.logs {
            match self.logs.iter_mut().find(|l| l.id() == incoming.id()) {
                Some(local) => local.merge_in_place(incoming, key)?,
                None => {
                    incoming.verify_tree(key)?;
                    self.logs.push(incoming.clone());
                }
            }
        }
        Ok(())
    }

    /// Serialize this log for the wire: a length prefix followed by the
    /// signed encoding.
    pub fn to_signed_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        codec::encode_signed_log(self, &mut body);
        let mut out = Vec::with_capacity(4 + body.len());
        out.put_u32_le(body.len() as u32);
        out.extend_from_slice(&body);
        out
    }

    /// Deserialize a log from its wire form.
    pub fn from_signed_bytes(bytes: &[u8]) -> Result<Log> {
        let buf = &mut &bytes[..];
        if buf.len() < 4 {
            return Err(Error::DecodeFailed("unexpected end of input"));
        }
        let len = u32::from_le_bytes(buf[..4].try_into().expect("length checked")) as usize;
        *buf = &buf[4..];
        if buf.len() != len {
            return Err(Error::DecodeFailed("length prefix mismatch"));
        }
        let log = codec::decode_signed_log(buf)?;
        if !buf.is_empty() {
            return Err(Error::DecodeFailed("trailing bytes after log"));
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::op::OpKind;

    fn init_op(model: Model, name: &str, timestamp: i64) -> Op {
        Op {
            kind: OpKind::Init,
            model,
            name: name.to_string(),
            timestamp,
            ..Default::default()
        }
    }

    fn version_op(reference: &str, timestamp: i64) -> Op {
        Op {
            kind: OpKind::Init,
            model: Model::Version,
            reference: reference.to_string(),
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_stable_across_appends() -> Result<()> {
        let mut log = Log::init(init_op(Model::Branch, "main", 1));
        let id = log.id();
        log.append(version_op("Qa", 2))?;
        log.append(version_op("Qb", 3))?;
        assert_eq!(log.id(), id);
        Ok(())
    }

    #[test]
    fn test_append_timestamp_order() -> Result<()> {
        let mut log = Log::init(init_op(Model::Branch, "main", 10));
        // equal timestamps are accepted, ties break by insertion order
        log.append(version_op("Qa", 10))?;
        assert!(matches!(
            log.append(version_op("Qb", 9)),
            Err(Error::InvalidTimestamp)
        ));
        assert_eq!(log.ops().len(), 2);
        Ok(())
    }

    #[test]
    fn test_name_follows_amend() -> Result<()> {
        let mut log = Log::init(init_op(Model::Name, "weather", 1));
        assert_eq!(log.name(), "weather");
        log.append(Op {
            kind: OpKind::Amend,
            model: Model::Name,
            name: "climate".to_string(),
            timestamp: 2,
            ..Default::default()
        })?;
        assert_eq!(log.name(), "climate");
        // ops of other models don't rename the log
        log.append(Op {
            kind: OpKind::Init,
            model: Model::Acl,
            name: "other".to_string(),
            timestamp: 3,
            ..Default::default()
        })?;
        assert_eq!(log.name(), "climate");
        Ok(())
    }

    #[test]
    fn test_sign_verify() -> Result<()> {
        let key = SecretKey::generate();
        let mut log = Log::init(init_op(Model::User, "alice", 1));
        assert!(log.verify(&key.public()).is_err());

        log.sign(&key);
        log.verify(&key.public())?;

        // appending invalidates the signature
        log.append(init_op(Model::User, "alice", 2))?;
        assert!(log.verify(&key.public()).is_err());

        // a different key never verifies
        log.sign(&key);
        assert!(log.verify(&SecretKey::generate().public()).is_err());
        Ok(())
    }

    #[test]
    fn test_head_ref() -> Result<()> {
        let mut user = Log::init(init_op(Model::User, "alice", 1));
        let mut name = Log::init(init_op(Model::Name, "weather", 2));
        name.add_child(Log::init(init_op(Model::Branch, "main", 3)))?;
        user.add_child(name)?;

        assert_eq!(user.head_ref(&["weather", "main"])?.model(), Model::Branch);
        assert!(matches!(
            user.head_ref(&["weather", "dev"]),
            Err(Error::NotFound)
        ));
        Ok(())
    }

    #[test]
    fn test_add_child_rules() -> Result<()> {
        let mut user = Log::init(init_op(Model::User, "alice", 1));
        user.add_child(Log::init(init_op(Model::Name, "weather", 2)))?;
        // duplicate (model, name) pair
        assert!(matches!(
            user.add_child(Log::init(init_op(Model::Name, "weather", 3))),
            Err(Error::DuplicateLog)
        ));
        // versions don't nest under users
        assert!(user
            .add_child(Log::init(version_op("Qa", 4)))
            .is_err());
        Ok(())
    }

    #[test]
    fn test_merge_extends() -> Result<()> {
        let key = SecretKey::generate();
        let o1 = init_op(Model::Branch, "main", 1);
        let o2 = version_op("Qa", 2);
        let o3 = version_op("Qb", 3);

        let mut local = Log::init(o1.clone());
        local.append(o2.clone())?;

        let mut remote = Log::init(o1);
        remote.append(o2)?;
        remote.append(o3)?;
        remote.sign(&key);

        local.merge(&remote, &key.public())?;
        assert_eq!(local.ops().len(), 3);
        // the merged log carries the remote signature and verifies
        local.verify(&key.public())?;

        // merging the same remote again is a no-op
        let before = local.clone();
        local.merge(&remote, &key.public())?;
        assert_eq!(local, before);
        Ok(())
    }

    #[test]
    fn test_merge_rejects_short_remote() -> Result<()> {
        let key = SecretKey::generate();
        let o1 = init_op(Model::Branch, "main", 1);

        let mut local = Log::init(o1.clone());
        local.append(version_op("Qa", 2))?;

        let mut remote = Log::init(o1);
        remote.sign(&key);

        assert!(matches!(
            local.merge(&remote, &key.public()),
            Err(Error::LogTooShort)
        ));
        assert_eq!(local.ops().len(), 2);
        Ok(())
    }

    #[test]
    fn test_merge_rejects_divergence() -> Result<()> {
        let key = SecretKey::generate();
        let o1 = init_op(Model::Branch, "main", 1);

        let mut local = Log::init(o1.clone());
        local.append(version_op("Qa", 2))?;

        let mut remote = Log::init(o1);
        remote.append(version_op("Qx", 2))?;
        remote.sign(&key);

        assert!(matches!(
            local.merge(&remote, &key.public()),
            Err(Error::DivergentHistory)
        ));
        // rejected merges leave the local log untouched
        assert_eq!(local.ops()[1].reference, "Qa");
        Ok(())
    }

    #[test]
    fn test_merge_rejects_unsigned_remote() -> Result<()> {
        let key = SecretKey::generate();
        let o1 = init_op(Model::Branch, "main", 1);
        let mut local = Log::init(o1.clone());
        let remote = Log::init(o1);
        assert!(matches!(
            local.merge(&remote, &key.public()),
            Err(Error::SignatureInvalid(_))
        ));
        Ok(())
    }

    #[test]
    fn test_merge_splices_new_children() -> Result<()> {
        let key = SecretKey::generate();
        let mut local = Log::init(init_op(Model::Name, "weather", 1));

        let mut remote = local.clone();
        let mut branch = Log::init(init_op(Model::Branch, "main", 2));
        branch.append(version_op("Qa", 3))?;
        remote.add_child(branch)?;
        remote.sign(&key);

        local.merge(&remote, &key.public())?;
        assert_eq!(local.logs().len(), 1);
        assert_eq!(local.head_ref(&["main"])?.ops().len(), 2);
        Ok(())
    }

    #[test]
    fn test_signed_bytes_roundtrip() -> Result<()> {
        let key = SecretKey::generate();
        let mut user = Log::init(init_op(Model::User, "alice", 1));
        let mut name = Log::init(init_op(Model::Name, "weather", 2));
        name.add_child(Log::init(init_op(Model::Branch, "main", 3)))?;
        user.add_child(name)?;
        user.sign(&key);

        let bytes = user.to_signed_bytes();
        let decoded = Log::from_signed_bytes(&bytes)?;
        assert_eq!(decoded, user);
        assert_eq!(decoded.to_signed_bytes(), bytes);
        decoded.verify_tree(&key.public())?;
        Ok(())
    }
}
