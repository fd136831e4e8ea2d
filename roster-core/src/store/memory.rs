use super::{CollectionPath, DocPath, DocumentStore, WriteBatch, WriteOp};
use crate::error::{Result, RosterError};
use crate::merge::merge_into;
use crate::models::Document;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

type Collections = BTreeMap<CollectionPath, BTreeMap<String, Document>>;

/// In-process store used as the test fake.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
    fail_next_commit: AtomicBool,
    reads: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`DocumentStore::commit`] fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of `get`/`list` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Seed a document directly, bypassing batches.
    pub fn put(&self, path: &DocPath, doc: Document) -> Result<()> {
        self.lock()?
            .entry(path.collection().clone())
            .or_default()
            .insert(path.id().to_string(), doc);
        Ok(())
    }

    pub fn document_count(&self, collection: &CollectionPath) -> Result<usize> {
        Ok(self.lock()?.get(collection).map_or(0, BTreeMap::len))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.collections
            .lock()
            .map_err(|_| RosterError::Store("memory store lock poisoned".to_string()))
    }
}

fn apply(collections: &mut Collections, op: WriteOp) {
    match op {
        WriteOp::Merge { path, patch } => {
            let docs = collections.entry(path.collection().clone()).or_default();
            let doc = docs.entry(path.id().to_string()).or_default();
            merge_into(doc, &patch);
        }
        WriteOp::Set { path, doc } => {
            collections
                .entry(path.collection().clone())
                .or_default()
                .insert(path.id().to_string(), doc);
        }
        WriteOp::Delete { path } => {
            if let Some(docs) = collections.get_mut(path.collection()) {
                docs.remove(path.id());
            }
        }
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()?
            .get(path.collection())
            .and_then(|docs| docs.get(path.id()))
            .cloned())
    }

    fn list(&self, collection: &CollectionPath) -> Result<Vec<(String, Document)>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()?
            .get(collection)
            .map(|docs| docs.iter().map(|(id, doc)| (id.clone(), doc.clone())).collect())
            .unwrap_or_default())
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(RosterError::Store("commit rejected".to_string()));
        }

        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        for op in batch.into_ops() {
            apply(&mut staged, op);
        }
        *guard = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
