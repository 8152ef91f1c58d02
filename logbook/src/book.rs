//! The logbook: dataset-aware verbs over an encrypted oplog book.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use logbook_base::SecretKey;
use logbook_oplog::{self as oplog, Author, AuthorInfo, Log, Model, Op, OpKind};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dataset::{info_from_op, Dataset, DatasetInfo, LogEntry, Ref};
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::raw::RawLog;

/// The default name all branch-level data is read from and written to.
/// Branches aren't surfaced as a user-facing feature yet, but the log
/// structure supports them.
pub const DEFAULT_BRANCH_NAME: &str = "main";

/// The timestamp source for new ops, pluggable so tests can be
/// deterministic. Returns nanoseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn wall_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("time drift")
            .as_nanos() as i64
    })
}

struct Inner {
    book: oplog::Book,
    location: String,
}

/// A book of append-only logs recording dataset histories.
///
/// As users work on datasets they build up a log of operations: each is
/// written to a log attributed to the user that performed the action, stored
/// under the namespace of that dataset. Current state is derived by
/// iterating over all operations.
///
/// The book is a single-writer resource: every mutating verb takes the
/// exclusive lock for the duration of the operation, including the
/// persistence write. Every verb accepts a cancellation token; cancellation
/// observed before the encrypted blob is handed to the filesystem rolls the
/// in-memory mutation back, after that the write runs to completion.
pub struct Book {
    inner: RwLock<Inner>,
    fs: Arc<dyn Filesystem>,
    key: SecretKey,
    clock: Clock,
}

impl std::fmt::Debug for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Book").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Book {
    /// Open the logbook at `location`, reading any existing data.
    ///
    /// Logbooks are encrypted at rest; the same key must be given to decrypt
    /// an existing one, and a wrong key fails with
    /// [`DecryptFailed`](oplog::Error::DecryptFailed) rather than
    /// initializing fresh state. If nothing is stored at `location` a new
    /// book with a single author log is created and persisted immediately.
    pub async fn new(
        key: SecretKey,
        username: &str,
        fs: Arc<dyn Filesystem>,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<Book> {
        Self::new_with_clock(key, username, fs, location, wall_clock(), cancel).await
    }

    /// Like [`Book::new`], with a custom timestamp source.
    pub async fn new_with_clock(
        key: SecretKey,
        username: &str,
        fs: Arc<dyn Filesystem>,
        location: &str,
        clock: Clock,
        cancel: &CancellationToken,
    ) -> Result<Book> {
        if username.is_empty() {
            return Err(Error::Required("username"));
        }
        if location.is_empty() {
            return Err(Error::Required("location"));
        }

        let key_id = key.public().key_id().to_string();
        let book = Book {
            inner: RwLock::new(Inner {
                book: oplog::Book::new(key.clone(), username, key_id),
                location: location.to_string(),
            }),
            fs,
            key,
            clock,
        };
        book.load_or_init(cancel).await?;
        Ok(book)
    }

    async fn load_or_init(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut inner = self.inner.write().await;
        match self.fs.get(&inner.location).await? {
            Some(blob) => {
                debug!(location = %inner.location, bytes = blob.len(), "loading logbook");
                inner.book.decode_encrypted(&blob)?;
                Ok(())
            }
            None => self.initialize(&mut inner, cancel).await,
        }
    }

    /// Create the author's log of user actions. The book's author id becomes
    /// the id of that log.
    async fn initialize(&self, inner: &mut Inner, cancel: &CancellationToken) -> Result<()> {
        debug!("initializing new logbook");
        let user_log = Log::init(Op {
            kind: OpKind::Init,
            model: Model::User,
            name: inner.book.author_name().to_string(),
            author_id: inner.book.author_id().to_string(),
            timestamp: (self.clock)(),
            ..Default::default()
        });
        let id = user_log.id().to_string();
        inner.book.append_log(user_log)?;
        inner.book.set_author_id(id);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.save(inner).await
    }

    async fn save(&self, inner: &mut Inner) -> Result<()> {
        let blob = inner.book.encrypted_bytes();
        debug!(location = %inner.location, bytes = blob.len(), "saving logbook");
        // content-addressed stores relocate on write
        let location = self.fs.put(&inner.location, Bytes::from(blob)).await?;
        inner.location = location;
        Ok(())
    }

    /// Run a mutation under the write lock, journaling the logs it may touch
    /// so the mutation can be rolled back if it fails or is cancelled before
    /// the save is submitted.
    async fn mutate<F>(&self, cancel: &CancellationToken, target: Option<&str>, f: F) -> Result<()>
    where
        F: FnOnce(&Book, &mut Inner) -> Result<()>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut inner = self.inner.write().await;

        let author_id = inner.book.author_id().to_string();
        let author_snapshot = inner.book.snapshot(&author_id);
        let target_id = target
            .and_then(|name| inner.book.head_ref(&[name]).ok())
            .map(|log| log.id().to_string())
            .filter(|id| *id != author_id);
        let target_snapshot = target_id
            .as_ref()
            .and_then(|id| inner.book.snapshot(id));

        let result = f(self, &mut inner);
        if result.is_err() || cancel.is_cancelled() {
            inner.book.restore(&author_id, author_snapshot);
            if let Some(id) = target_id {
                inner.book.restore(&id, target_snapshot);
            }
            return result.and(Err(Error::Cancelled));
        }
        self.save(&mut inner).await
    }

    /// A timestamp for a clock-stamped op on `log`. Producer timestamps may
    /// run ahead of the wall clock; appends never go backwards.
    fn stamp(&self, log: &Log) -> i64 {
        let now = (self.clock)();
        log.ops().last().map_or(now, |op| now.max(op.timestamp))
    }

    /// Create a dataset log with a single branch under the author's log,
    /// returning the branch.
    fn init_name<'a>(&self, inner: &'a mut Inner, name: &str) -> Result<&'a mut Log> {
        let author_id = inner.book.author_id().to_string();
        let mut ds_log = Log::init(Op {
            kind: OpKind::Init,
            model: Model::Name,
            author_id: author_id.clone(),
            name: name.to_string(),
            timestamp: (self.clock)(),
            ..Default::default()
        });
        ds_log.add_child(Log::init(Op {
            kind: OpKind::Init,
            model: Model::Branch,
            author_id: author_id.clone(),
            name: DEFAULT_BRANCH_NAME.to_string(),
            timestamp: (self.clock)(),
            ..Default::default()
        }))?;

        let author = inner.book.log_by_id_mut(&author_id)?;
        author.add_child(ds_log)?;
        Ok(author.head_ref_mut(&[name, DEFAULT_BRANCH_NAME])?)
    }

    /// Initialize a new name within the author's namespace. Dataset
    /// histories start with a name init.
    pub async fn write_name_init(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Required("name"));
        }
        self.mutate(cancel, None, |book, inner| {
            book.init_name(inner, name)?;
            Ok(())
        })
        .await
    }

    /// Mark a rename event for a dataset.
    pub async fn write_name_amend(
        &self,
        cancel: &CancellationToken,
        r: &Ref,
        new_name: &str,
    ) -> Result<()> {
        require_ref(r)?;
        if new_name.is_empty() {
            return Err(Error::Required("name"));
        }
        self.mutate(cancel, Some(&r.username), |book, inner| {
            let ds_log = inner
                .book
                .head_ref_mut(&[r.username.as_str(), r.name.as_str()])?;
            let op = Op {
                kind: OpKind::Amend,
                model: Model::Name,
                name: new_name.to_string(),
                timestamp: book.stamp(ds_log),
                ..Default::default()
            };
            ds_log.append(op)?;
            Ok(())
        })
        .await
    }

    /// Add an operation marking the creation of a dataset version, copying
    /// details from the given dataset summary. The dataset's branch log is
    /// created on first write.
    pub async fn write_version_save(
        &self,
        cancel: &CancellationToken,
        ds: &Dataset,
    ) -> Result<()> {
        let r = ds.dataset_ref();
        require_ref(&r)?;
        self.mutate(cancel, Some(&r.username), |book, inner| {
            let path = [r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME];
            let exists = match inner.book.head_ref(&path) {
                Ok(_) => true,
                Err(oplog::Error::NotFound) => false,
                Err(err) => return Err(err.into()),
            };
            let branch = if exists {
                inner.book.head_ref_mut(&path)?
            } else {
                book.init_name(inner, &r.name)?
            };
            append_version_save(branch, ds, OpKind::Init)
        })
        .await
    }

    /// Add an operation amending the head dataset version.
    pub async fn write_version_amend(
        &self,
        cancel: &CancellationToken,
        ds: &Dataset,
    ) -> Result<()> {
        let r = ds.dataset_ref();
        require_ref(&r)?;
        self.mutate(cancel, Some(&r.username), |_, inner| {
            let branch = inner
                .book
                .head_ref_mut(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?;
            append_version_save(branch, ds, OpKind::Amend)
        })
        .await
    }

    /// Add an operation marking a number of sequential versions from HEAD as
    /// deleted. Logs are append-only, so deletes are recorded as tombstones.
    pub async fn write_version_delete(
        &self,
        cancel: &CancellationToken,
        r: &Ref,
        revisions: i64,
    ) -> Result<()> {
        require_ref(r)?;
        self.mutate(cancel, Some(&r.username), |book, inner| {
            let branch = inner
                .book
                .head_ref_mut(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?;
            let op = Op {
                kind: OpKind::Remove,
                model: Model::Version,
                size: revisions,
                timestamp: book.stamp(branch),
                ..Default::default()
            };
            branch.append(op)?;
            Ok(())
        })
        .await
    }

    /// Add an operation marking the publication of a number of versions from
    /// HEAD to one or more destinations.
    pub async fn write_publish(
        &self,
        cancel: &CancellationToken,
        r: &Ref,
        revisions: i64,
        destinations: Vec<String>,
    ) -> Result<()> {
        require_ref(r)?;
        self.append_publication(cancel, r, OpKind::Init, revisions, destinations)
            .await
    }

    /// Add an operation marking an unpublish request for a number of
    /// versions from HEAD.
    pub async fn write_unpublish(
        &self,
        cancel: &CancellationToken,
        r: &Ref,
        revisions: i64,
        destinations: Vec<String>,
    ) -> Result<()> {
        require_ref(r)?;
        self.append_publication(cancel, r, OpKind::Remove, revisions, destinations)
            .await
    }

    async fn append_publication(
        &self,
        cancel: &CancellationToken,
        r: &Ref,
        kind: OpKind,
        revisions: i64,
        destinations: Vec<String>,
    ) -> Result<()> {
        self.mutate(cancel, Some(&r.username), |book, inner| {
            let branch = inner
                .book
                .head_ref_mut(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?;
            let op = Op {
                kind,
                model: Model::Publication,
                size: revisions,
                relations: destinations,
                timestamp: book.stamp(branch),
                ..Default::default()
            };
            branch.append(op)?;
            Ok(())
        })
        .await
    }

    /// Add an operation marking the execution of a scheduled update job.
    pub async fn write_cron_job_ran(
        &self,
        cancel: &CancellationToken,
        number: i64,
        r: &Ref,
    ) -> Result<()> {
        require_ref(r)?;
        self.mutate(cancel, Some(&r.username), |book, inner| {
            let branch = inner
                .book
                .head_ref_mut(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?;
            let op = Op {
                kind: OpKind::Init,
                model: Model::CronJob,
                size: number,
                timestamp: book.stamp(branch),
                ..Default::default()
            };
            branch.append(op)?;
            Ok(())
        })
        .await
    }

    /// Create a dataset log from a connected dataset history where no log
    /// exists yet. `history` must be ordered oldest to newest.
    ///
    /// If a log already exists it is as-or-more rich than the given history;
    /// the existing log is never overwritten and the call fails with
    /// [`LogTooShort`](oplog::Error::LogTooShort).
    pub async fn construct_dataset_log(
        &self,
        cancel: &CancellationToken,
        r: &Ref,
        history: &[Dataset],
    ) -> Result<()> {
        require_ref(r)?;
        self.mutate(cancel, Some(&r.username), |book, inner| {
            let path = [r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME];
            if inner.book.head_ref(&path).is_ok() {
                return Err(oplog::Error::LogTooShort.into());
            }
            let branch = book.init_name(inner, &r.name)?;
            for ds in history {
                append_version_save(branch, ds, OpKind::Init)?;
            }
            Ok(())
        })
        .await
    }

    /// Add a log to the book, merging with any existing log of the same
    /// identity.
    ///
    /// The log must verify against the sender's public key; beyond that the
    /// signature is trusted as authorization.
    pub async fn merge_log(
        &self,
        cancel: &CancellationToken,
        sender: &dyn Author,
        log: &Log,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let key = sender.author_pubkey();
        log.verify(&key)?;

        let mut inner = self.inner.write().await;
        let id = log.id().to_string();
        let snapshot = inner.book.snapshot(&id);
        let result = if snapshot.is_some() {
            inner
                .book
                .log_by_id_mut(&id)?
                .merge(log, &key)
                .map_err(Error::from)
        } else {
            log.verify_tree(&key)
                .and_then(|()| inner.book.append_log(log.clone()))
                .map_err(Error::from)
        };
        if result.is_err() || cancel.is_cancelled() {
            inner.book.restore(&id, snapshot);
            return result.and(Err(Error::Cancelled));
        }
        self.save(&mut inner).await
    }

    /// Remove an entire dataset log from the book. Only the author owning
    /// the log's root may remove it.
    pub async fn remove_log(
        &self,
        cancel: &CancellationToken,
        sender: &dyn Author,
        r: &Ref,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        require_ref(r)?;

        let mut inner = self.inner.write().await;
        let branch_id = inner
            .book
            .head_ref(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?
            .id()
            .to_string();
        // upward traversal goes through the parent index, the tree holds no
        // back-pointers
        let root_id = inner.book.root_of(&branch_id)?.id().to_string();
        if root_id != sender.author_id() {
            return Err(oplog::Error::Unauthorized.into());
        }

        let snapshot = inner.book.snapshot(&root_id);
        let result = inner
            .book
            .remove_log(&[r.username.as_str(), r.name.as_str()])
            .map_err(Error::from);
        if result.is_err() || cancel.is_cancelled() {
            inner.book.restore(&root_id, snapshot);
            return result.and(Err(Error::Cancelled));
        }
        self.save(&mut inner).await
    }

    /// Get a user's log for a dataset reference: a sparse tree of the user
    /// log with the single dataset log and all its branches.
    pub async fn user_dataset_ref(&self, r: &Ref) -> Result<Log> {
        require_ref(r)?;
        let inner = self.inner.read().await;
        let author = inner.book.head_ref(&[r.username.as_str()])?;
        let ds = inner
            .book
            .head_ref(&[r.username.as_str(), r.name.as_str()])?;
        Ok(Log::from_parts(author.ops().to_vec(), vec![ds.clone()])?)
    }

    /// Get a dataset log and all its branches. Dataset logs describe
    /// activity affecting the dataset as a whole, like renames.
    pub async fn dataset_ref(&self, r: &Ref) -> Result<Log> {
        require_ref(r)?;
        let inner = self.inner.read().await;
        Ok(inner
            .book
            .head_ref(&[r.username.as_str(), r.name.as_str()])?
            .clone())
    }

    /// Get the branch log for a dataset reference: one line of commits.
    pub async fn branch_ref(&self, r: &Ref) -> Result<Log> {
        require_ref(r)?;
        let inner = self.inner.read().await;
        Ok(inner
            .book
            .head_ref(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?
            .clone())
    }

    /// Get a copy of a top-level log by id.
    pub async fn log(&self, id: &str) -> Result<Log> {
        let inner = self.inner.read().await;
        Ok(inner.book.log_by_id(id)?.clone())
    }

    /// Replay a dataset's branch ops into the current list of versions,
    /// newest first.
    ///
    /// `offset` and `limit` are clamped to the length of the list.
    pub async fn versions(&self, r: &Ref, offset: usize, limit: usize) -> Result<Vec<DatasetInfo>> {
        require_ref(r)?;
        let inner = self.inner.read().await;
        let branch = inner
            .book
            .head_ref(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?;

        let mut infos: Vec<DatasetInfo> = Vec::new();
        for op in branch.ops() {
            match (op.model, op.kind) {
                (Model::Version, OpKind::Init) => infos.push(info_from_op(r, op)),
                (Model::Version, OpKind::Amend) => {
                    let last = infos
                        .last_mut()
                        .ok_or(oplog::Error::CorruptLog("amend before any version"))?;
                    *last = info_from_op(r, op);
                }
                (Model::Version, OpKind::Remove) => {
                    let n = tail_count(op.size, infos.len(), "removes more versions than exist")?;
                    infos.truncate(infos.len() - n);
                }
                (Model::Publication, OpKind::Init) => set_published(&mut infos, op.size, true)?,
                (Model::Publication, OpKind::Remove) => set_published(&mut infos, op.size, false)?,
                _ => {}
            }
        }

        // newest first
        infos.reverse();
        let offset = offset.min(infos.len());
        infos.drain(..offset);
        infos.truncate(limit);
        Ok(infos)
    }

    /// A summarized, line-by-line representation of the log for a dataset
    /// reference.
    pub async fn log_entries(&self, r: &Ref, offset: usize, limit: usize) -> Result<Vec<LogEntry>> {
        require_ref(r)?;
        let inner = self.inner.read().await;
        let branch = inner
            .book
            .head_ref(&[r.username.as_str(), r.name.as_str(), DEFAULT_BRANCH_NAME])?;
        Ok(branch
            .ops()
            .iter()
            .skip(offset)
            .take(limit)
            .map(|op| log_entry_from_op(&r.username, op))
            .collect())
    }

    /// Sign a log with this book's private key and serialize it for the
    /// wire.
    pub fn log_bytes(&self, log: &Log) -> Vec<u8> {
        let mut signed = log.clone();
        signed.sign(&self.key);
        signed.to_signed_bytes()
    }

    /// This book's author.
    pub async fn author(&self) -> AuthorInfo {
        let inner = self.inner.read().await;
        AuthorInfo {
            name: inner.book.author_name().to_string(),
            id: inner.book.author_id().to_string(),
            pub_key: inner.book.pubkey(),
        }
    }

    /// The human-readable name of this book's author.
    pub async fn author_name(&self) -> String {
        self.inner.read().await.book.author_name().to_string()
    }

    /// The in-use peer id of the book author: the key identifier recorded in
    /// the author's log of user actions.
    pub async fn active_peer_id(&self) -> Result<String> {
        let inner = self.inner.read().await;
        let id = inner.book.author_id().to_string();
        Ok(inner.book.log_by_id(&id)?.author().to_string())
    }

    /// Mark a change in author name.
    pub fn rename_author(&self) -> Result<()> {
        Err(Error::Unfinished)
    }

    /// Remove an author. Used on teardown.
    pub fn delete_author(&self) -> Result<()> {
        Err(Error::Unfinished)
    }

    /// A complete, human-readable projection of every log in the book.
    pub async fn raw_logs(&self) -> Vec<RawLog> {
        let inner = self.inner.read().await;
        inner.book.logs().iter().map(RawLog::from).collect()
    }
}

fn require_ref(r: &Ref) -> Result<()> {
    if r.username.is_empty() {
        return Err(Error::Required("reference username"));
    }
    if r.name.is_empty() {
        return Err(Error::Required("reference name"));
    }
    Ok(())
}

fn append_version_save(branch: &mut Log, ds: &Dataset, kind: OpKind) -> Result<()> {
    let mut op = Op {
        kind,
        model: Model::Version,
        reference: ds.path.clone(),
        prev: ds.previous_path.clone(),
        timestamp: ds.commit.timestamp,
        note: ds.commit.title.clone(),
        ..Default::default()
    };
    if let Some(structure) = &ds.structure {
        op.size = structure.length;
    }
    branch.append(op)?;
    Ok(())
}

fn tail_count(size: i64, len: usize, msg: &'static str) -> Result<usize> {
    let n = usize::try_from(size).map_err(|_| oplog::Error::CorruptLog(msg))?;
    if n > len {
        return Err(oplog::Error::CorruptLog(msg).into());
    }
    Ok(n)
}

fn set_published(infos: &mut [DatasetInfo], size: i64, published: bool) -> Result<()> {
    let n = tail_count(
        size,
        infos.len(),
        "publication affects more versions than exist",
    )?;
    let len = infos.len();
    for info in &mut infos[len - n..] {
        info.published = published;
    }
    Ok(())
}

fn log_entry_from_op(author: &str, op: &Op) -> LogEntry {
    let note = if op.note.is_empty() && !op.name.is_empty() {
        op.name.clone()
    } else {
        op.note.clone()
    };
    LogEntry {
        timestamp: op.timestamp,
        author: author.to_string(),
        action: action_string(op.model, op.kind).to_string(),
        note,
    }
}

fn action_string(model: Model, kind: OpKind) -> &'static str {
    match (model, kind) {
        (Model::User, OpKind::Init) => "create profile",
        (Model::User, OpKind::Amend) => "update profile",
        (Model::User, OpKind::Remove) => "delete profile",
        (Model::Name, OpKind::Init) => "init dataset",
        (Model::Name, OpKind::Amend) => "rename dataset",
        (Model::Name, OpKind::Remove) => "delete dataset",
        (Model::Branch, OpKind::Init) => "init branch",
        (Model::Branch, OpKind::Amend) => "rename branch",
        (Model::Branch, OpKind::Remove) => "delete branch",
        (Model::Version, OpKind::Init) => "save commit",
        (Model::Version, OpKind::Amend) => "amend commit",
        (Model::Version, OpKind::Remove) => "remove commit",
        (Model::Publication, OpKind::Init) => "publish",
        (Model::Publication, OpKind::Remove) => "unpublish",
        (Model::Acl, OpKind::Init) => "update access",
        (Model::Acl, OpKind::Amend) => "update access",
        (Model::Acl, OpKind::Remove) => "remove all access",
        (Model::CronJob, OpKind::Init) => "ran update",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_strings() {
        assert_eq!(action_string(Model::Version, OpKind::Init), "save commit");
        assert_eq!(action_string(Model::Publication, OpKind::Remove), "unpublish");
        assert_eq!(action_string(Model::Name, OpKind::Amend), "rename dataset");
        // gaps in the table are empty, not panics
        assert_eq!(action_string(Model::CronJob, OpKind::Remove), "");
    }

    #[test]
    fn test_tail_count_bounds() {
        assert_eq!(tail_count(2, 3, "msg").unwrap(), 2);
        assert!(tail_count(4, 3, "msg").is_err());
        assert!(tail_count(-1, 3, "msg").is_err());
    }
}
