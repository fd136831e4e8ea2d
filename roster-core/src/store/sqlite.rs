use super::{CollectionPath, DocPath, DocumentStore, WriteBatch, WriteOp};
use crate::error::Result;
use crate::merge::merge_into;
use crate::models::Document;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use std::path::Path;
use std::time::Duration;

const MIGRATIONS_SLICE: &[M<'_>] = &[M::up(
    r#"
    CREATE TABLE documents (
        collection TEXT NOT NULL,
        doc_id TEXT NOT NULL,
        data TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (collection, doc_id)
    );
    "#,
)];
const MIGRATIONS: Migrations<'_> = Migrations::from_slice(MIGRATIONS_SLICE);

/// Documents stored as JSON text in a single SQLite table.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(())
        });
        let pool = Pool::builder().max_size(4).build(manager)?;

        let store = Self { pool };
        store.run_migrations()?;
        tracing::debug!("Opened document store at {}", path.display());
        Ok(store)
    }

    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.connection()?;
        MIGRATIONS.to_latest(&mut conn)?;
        Ok(())
    }
}

fn load(conn: &Connection, path: &DocPath) -> Result<Option<Document>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![path.collection().as_str(), path.id()],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn save(conn: &Connection, path: &DocPath, doc: &Document) -> Result<()> {
    conn.execute(
        "INSERT INTO documents (collection, doc_id, data) VALUES (?1, ?2, ?3)
         ON CONFLICT(collection, doc_id)
         DO UPDATE SET data = excluded.data, updated_at = CURRENT_TIMESTAMP",
        params![
            path.collection().as_str(),
            path.id(),
            serde_json::to_string(doc)?
        ],
    )?;
    Ok(())
}

impl DocumentStore for SqliteStore {
    fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        let conn = self.connection()?;
        load(&conn, path)
    }

    fn list(&self, collection: &CollectionPath) -> Result<Vec<(String, Document)>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT doc_id, data FROM documents WHERE collection = ?1 ORDER BY doc_id",
        )?;
        let rows = stmt.query_map(params![collection.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, data) = row?;
            docs.push((id, serde_json::from_str(&data)?));
        }
        Ok(docs)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let op_count = batch.len();
        let mut conn = self.connection()?;
        // Dropping the transaction on an early return rolls everything back.
        let tx = conn.transaction()?;

        for op in batch.into_ops() {
            match op {
                WriteOp::Merge { path, patch } => {
                    let mut doc = load(&tx, &path)?.unwrap_or_default();
                    merge_into(&mut doc, &patch);
                    save(&tx, &path, &doc)?;
                }
                WriteOp::Set { path, doc } => save(&tx, &path, &doc)?,
                WriteOp::Delete { path } => {
                    tx.execute(
                        "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
                        params![path.collection().as_str(), path.id()],
                    )?;
                }
            }
        }

        tx.commit()?;
        tracing::debug!("Committed batch of {} writes", op_count);
        Ok(())
    }
}
