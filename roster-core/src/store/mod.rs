//! Document store abstraction.
//!
//! The pipeline only ever talks to [`DocumentStore`]: point reads, collection
//! listings, and one atomic [`WriteBatch`] per operation. Two backends exist:
//! [`MemoryStore`] for tests and [`SqliteStore`] for the command-line tool.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::Document;
use std::fmt;

/// Slash-separated path of a document collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document address: collection plus document id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath {
    collection: CollectionPath,
    id: String,
}

impl DocPath {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sub-collection nested under this document.
    pub fn child(&self, name: &str) -> CollectionPath {
        CollectionPath::new(format!("{}/{}", self, name))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Where one app/user pair keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    app_id: String,
    user_id: String,
}

impl Scope {
    pub fn new(app_id: &str, user_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn players(&self) -> CollectionPath {
        CollectionPath::new(format!(
            "artifacts/{}/users/{}/players",
            self.app_id, self.user_id
        ))
    }

    pub fn player(&self, player_id: &str) -> DocPath {
        self.players().doc(player_id)
    }

    pub fn history(&self, player_id: &str) -> CollectionPath {
        self.player(player_id).child("history")
    }

    /// Screenshot-tracked players are shared across users of the app.
    pub fn screenshot_players(&self) -> CollectionPath {
        CollectionPath::new(format!("artifacts/{}/public/data/players", self.app_id))
    }

    pub fn screenshot_player(&self, key: &str) -> DocPath {
        self.screenshot_players().doc(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge-write: patch keys overwrite, nested objects merge, other keys stay.
    Merge { path: DocPath, patch: Document },
    /// Create or replace a whole document.
    Set { path: DocPath, doc: Document },
    Delete { path: DocPath },
}

/// Writes queued by one operation, applied all-or-nothing by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_merge(&mut self, path: DocPath, patch: Document) {
        self.ops.push(WriteOp::Merge { path, patch });
    }

    /// Queue a new document under a generated id; returns its path.
    pub fn queue_insert(&mut self, collection: &CollectionPath, doc: Document) -> DocPath {
        let path = collection.doc(uuid::Uuid::new_v4().to_string());
        self.ops.push(WriteOp::Set {
            path: path.clone(),
            doc,
        });
        path
    }

    pub fn queue_set(&mut self, path: DocPath, doc: Document) {
        self.ops.push(WriteOp::Set { path, doc });
    }

    pub fn queue_delete(&mut self, path: DocPath) {
        self.ops.push(WriteOp::Delete { path });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

pub trait DocumentStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Every document in `collection` as `(id, document)`, ordered by id.
    fn list(&self, collection: &CollectionPath) -> Result<Vec<(String, Document)>>;

    /// Apply every queued write, or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<()>;
}
