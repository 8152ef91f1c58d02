//! Books: one author's collection of all known logs.

use std::collections::HashMap;

use logbook_base::{PublicKey, SecretKey};
use tracing::trace;

use crate::cipher;
use crate::codec;
use crate::error::{Error, Result};
use crate::log::Log;

/// An identity that can author and exchange logs.
///
/// This is the seam between books: merge and remove verbs are handed the
/// sender as an `Author` so they can check ownership and verify signatures
/// without needing the sender's whole book.
pub trait Author {
    /// The author's current human-readable name.
    fn author_name(&self) -> String;
    /// The author's stable identifier.
    fn author_id(&self) -> String;
    /// The public half of the author's signing key.
    fn author_pubkey(&self) -> PublicKey;
}

/// A plain `Author` value, detached from any book.
#[derive(Debug, Clone)]
pub struct AuthorInfo {
    /// Human-readable name.
    pub name: String,
    /// Stable identifier.
    pub id: String,
    /// Public signing key.
    pub pub_key: PublicKey,
}

impl Author for AuthorInfo {
    fn author_name(&self) -> String {
        self.name.clone()
    }

    fn author_id(&self) -> String {
        self.id.clone()
    }

    fn author_pubkey(&self) -> PublicKey {
        self.pub_key
    }
}

/// A collection of top-level logs, one per known author, plus the identity
/// of the book's own author.
///
/// A book is a single-writer resource; it holds the author's private key in
/// memory only, and is serialized and encrypted as one blob for persistence.
#[derive(Debug, Clone)]
pub struct Book {
    author_name: String,
    author_id: String,
    key: SecretKey,
    logs: Vec<Log>,
}

impl Book {
    /// Create an empty book for the given author.
    pub fn new(key: SecretKey, author_name: impl Into<String>, author_id: impl Into<String>) -> Self {
        Book {
            author_name: author_name.into(),
            author_id: author_id.into(),
            key,
            logs: Vec::new(),
        }
    }

    /// The book author's current human-readable name.
    pub fn author_name(&self) -> &str {
        &self.author_name
    }

    /// The book author's stable identifier.
    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    /// Replace the author identifier. Called once after the author's root
    /// log exists, so the identifier can be that log's id.
    pub fn set_author_id(&mut self, id: impl Into<String>) {
        self.author_id = id.into();
    }

    /// The public half of the author's signing key.
    pub fn pubkey(&self) -> PublicKey {
        self.key.public()
    }

    /// The author's private signing key.
    pub fn secret_key(&self) -> &SecretKey {
        &self.key
    }

    /// All top-level logs.
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Add a top-level log.
    pub fn append_log(&mut self, log: Log) -> Result<()> {
        let id = log.id();
        if self.logs.iter().any(|l| l.id() == id) {
            return Err(Error::DuplicateLog);
        }
        self.logs.push(log);
        Ok(())
    }

    /// Get a top-level log by its string id.
    pub fn log_by_id(&self, id: &str) -> Result<&Log> {
        self.logs
            .iter()
            .find(|l| l.id().to_string() == id)
            .ok_or(Error::NotFound)
    }

    /// Get a top-level log by its string id, mutably.
    pub fn log_by_id_mut(&mut self, id: &str) -> Result<&mut Log> {
        self.logs
            .iter_mut()
            .find(|l| l.id().to_string() == id)
            .ok_or(Error::NotFound)
    }

    /// Resolve a hierarchical name path: the first element selects a
    /// top-level log by current name, the rest descend its children.
    pub fn head_ref(&self, path: &[&str]) -> Result<&Log> {
        let (first, rest) = path.split_first().ok_or(Error::NotFound)?;
        self.logs
            .iter()
            .find(|l| l.name() == *first)
            .ok_or(Error::NotFound)?
            .head_ref(rest)
    }

    /// Resolve a hierarchical name path, mutably.
    pub fn head_ref_mut(&mut self, path: &[&str]) -> Result<&mut Log> {
        let (first, rest) = path.split_first().ok_or(Error::NotFound)?;
        self.logs
            .iter_mut()
            .find(|l| l.name() == *first)
            .ok_or(Error::NotFound)?
            .head_ref_mut(rest)
    }

    /// Remove the log at a hierarchical name path. Ownership checks belong
    /// to the caller.
    pub fn remove_log(&mut self, path: &[&str]) -> Result<()> {
        let (last, prefix) = path.split_last().ok_or(Error::NotFound)?;
        if prefix.is_empty() {
            let idx = self
                .logs
                .iter()
                .position(|l| l.name() == *last)
                .ok_or(Error::NotFound)?;
            self.logs.remove(idx);
            return Ok(());
        }
        let parent = self.head_ref_mut(prefix)?;
        parent.remove_child(last)
    }

    /// Clone the top-level log with the given id, if present. Paired with
    /// [`Book::restore`] it gives callers copy-on-write journaling around a
    /// mutation they may need to roll back.
    pub fn snapshot(&self, id: &str) -> Option<Log> {
        self.logs.iter().find(|l| l.id().to_string() == id).cloned()
    }

    /// Restore a top-level log to a previous snapshot. `Some` replaces the
    /// log (or re-adds it if it was removed), `None` removes a log that did
    /// not exist at snapshot time.
    pub fn restore(&mut self, id: &str, snapshot: Option<Log>) {
        let idx = self.logs.iter().position(|l| l.id().to_string() == id);
        match (idx, snapshot) {
            (Some(idx), Some(snap)) => self.logs[idx] = snap,
            (Some(idx), None) => {
                self.logs.remove(idx);
            }
            (None, Some(snap)) => self.logs.push(snap),
            (None, None) => {}
        }
    }

    /// Map from log id to parent id for every nested log in the book.
    ///
    /// The ownership tree stays a pure tree; upward traversal goes through
    /// this index instead of back-pointers.
    pub fn parent_index(&self) -> HashMap<String, String> {
        fn walk(log: &Log, index: &mut HashMap<String, String>) {
            let id = log.id().to_string();
            for child in log.logs() {
                index.insert(child.id().to_string(), id.clone());
                walk(child, index);
            }
        }
        let mut index = HashMap::new();
        for log in &self.logs {
            walk(log, &mut index);
        }
        index
    }

    /// The top-level ancestor of the log with the given id.
    pub fn root_of(&self, id: &str) -> Result<&Log> {
        let parents = self.parent_index();
        let mut current = id.to_string();
        while let Some(parent) = parents.get(&current) {
            current = parent.clone();
        }
        self.log_by_id(&current)
    }

    /// Serialize and encrypt this book for persistence.
    pub fn encrypted_bytes(&self) -> Vec<u8> {
        let mut plaintext = Vec::new();
        codec::encode_book(&self.author_name, &self.author_id, &self.logs, &mut plaintext);
        trace!(logs = self.logs.len(), bytes = plaintext.len(), "sealing book");
        cipher::seal(&self.key, &plaintext)
    }

    /// Decrypt and deserialize a persisted book blob into this book,
    /// replacing its author name, id and logs.
    pub fn decode_encrypted(&mut self, blob: &[u8]) -> Result<()> {
        let plaintext = cipher::open(&self.key, blob)?;
        let (author_name, author_id, logs) = codec::decode_book(&plaintext)?;
        self.author_name = author_name;
        self.author_id = author_id;
        self.logs = logs;
        Ok(())
    }
}

impl Author for Book {
    fn author_name(&self) -> String {
        self.author_name.clone()
    }

    fn author_id(&self) -> String {
        self.author_id.clone()
    }

    fn author_pubkey(&self) -> PublicKey {
        self.key.public()
    }
}
