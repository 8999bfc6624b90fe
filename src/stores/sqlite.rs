//! SQLite chunk store with vector search via `sqlite-vec`.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::rusqlite::{self, params_from_iter};
use tokio_rusqlite::{Connection, ffi};
use tracing::debug;

use super::{ChunkRecord, SearchFilter, VectorIndex};
use crate::types::{DocType, DocsmithError};

/// Chunk rows plus a `vec0` virtual table keyed by the chunk rowid.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    conn: Connection,
}

impl SqliteVectorIndex {
    /// Opens (or creates) the database at `path` with `dims`-wide embeddings.
    pub async fn open(path: impl AsRef<Path>, dims: usize) -> Result<Self, DocsmithError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| DocsmithError::Storage(err.to_string()))?;

        conn.call(move |conn| -> Result<(), tokio_rusqlite::Error> {
            // Confirm the extension actually loaded before creating tables.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Error)?;

            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS chunks (
                     chunk_id     TEXT PRIMARY KEY,
                     library      TEXT NOT NULL,
                     document_url TEXT NOT NULL,
                     heading      TEXT NOT NULL,
                     doc_type     TEXT NOT NULL,
                     ordinal      INTEGER NOT NULL,
                     content      TEXT NOT NULL,
                     code_blocks  TEXT NOT NULL,
                     languages    TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_chunks_library ON chunks(library);
                 CREATE INDEX IF NOT EXISTS idx_chunks_document_url ON chunks(document_url);
                 CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings USING vec0(
                     embedding float[{dims}]
                 );"
            ))
            .map_err(tokio_rusqlite::Error::Error)?;
            Ok(())
        })
        .await
        .map_err(|err| DocsmithError::Storage(err.to_string()))?;

        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), DocsmithError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(DocsmithError::Storage)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ChunkRecord, rusqlite::Error> {
    let doc_type_raw: String = row.get(4)?;
    let code_blocks_raw: String = row.get(7)?;
    let languages_raw: String = row.get(8)?;
    Ok(ChunkRecord {
        chunk_id: row.get(0)?,
        library: row.get(1)?,
        document_url: row.get(2)?,
        heading: row.get(3)?,
        doc_type: DocType::parse(&doc_type_raw).unwrap_or(DocType::Docs),
        ordinal: row.get::<_, i64>(5)? as usize,
        text: row.get(6)?,
        code_blocks: serde_json::from_str(&code_blocks_raw).unwrap_or_default(),
        languages: serde_json::from_str(&languages_raw).unwrap_or_default(),
        embedding: None,
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<(), DocsmithError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let prepared: Result<Vec<_>, DocsmithError> = chunks
            .into_iter()
            .map(|record| {
                let embedding = record.embedding.clone().ok_or_else(|| {
                    DocsmithError::Storage(format!(
                        "chunk {} has no embedding",
                        record.chunk_id
                    ))
                })?;
                let embedding_json = serde_json::to_string(&embedding)?;
                let code_blocks = serde_json::to_string(&record.code_blocks)?;
                let languages = serde_json::to_string(&record.languages)?;
                Ok((record, embedding_json, code_blocks, languages))
            })
            .collect();
        let prepared = prepared?;
        let count = prepared.len();

        self.conn
            .call(move |conn| -> Result<(), tokio_rusqlite::Error> {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Error)?;
                for (record, embedding_json, code_blocks, languages) in &prepared {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks \
                         (chunk_id, library, document_url, heading, doc_type, ordinal, content, code_blocks, languages) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        rusqlite::params![
                            record.chunk_id,
                            record.library,
                            record.document_url,
                            record.heading,
                            record.doc_type.as_str(),
                            record.ordinal as i64,
                            record.text,
                            code_blocks,
                            languages,
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;

                    let rowid: i64 = tx
                        .query_row(
                            "SELECT rowid FROM chunks WHERE chunk_id = ?",
                            [&record.chunk_id],
                            |row| row.get(0),
                        )
                        .map_err(tokio_rusqlite::Error::Error)?;

                    tx.execute(
                        "DELETE FROM chunk_embeddings WHERE rowid = ?",
                        [rowid],
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                    tx.execute(
                        "INSERT INTO chunk_embeddings (rowid, embedding) VALUES (?, vec_f32(?))",
                        rusqlite::params![rowid, embedding_json],
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| DocsmithError::Storage(err.to_string()))?;

        debug!(chunks = count, "chunk batch stored");
        Ok(())
    }

    async fn delete_library(&self, library: &str) -> Result<usize, DocsmithError> {
        let library = library.to_string();
        self.conn
            .call(move |conn| -> Result<usize, tokio_rusqlite::Error> {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE rowid IN \
                     (SELECT rowid FROM chunks WHERE library = ?)",
                    [&library],
                )
                .map_err(tokio_rusqlite::Error::Error)?;
                let deleted = tx
                    .execute("DELETE FROM chunks WHERE library = ?", [&library])
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok(deleted)
            })
            .await
            .map_err(|err| DocsmithError::Storage(err.to_string()))
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(ChunkRecord, f32)>, DocsmithError> {
        let embedding_json = serde_json::to_string(query_embedding)?;

        let mut clauses: Vec<&'static str> = Vec::new();
        let mut params: Vec<String> = vec![embedding_json];
        if let Some(library) = &filter.library {
            clauses.push("c.library = ?");
            params.push(library.clone());
        }
        if let Some(doc_type) = filter.doc_type {
            clauses.push("c.doc_type = ?");
            params.push(doc_type.as_str().to_string());
        }
        if filter.require_code {
            clauses.push("c.languages <> '[]' OR c.code_blocks <> '[]'");
        }
        if let Some(language) = &filter.language {
            clauses.push("c.languages LIKE ?");
            params.push(format!("%\"{}\"%", language.to_lowercase()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            let wrapped: Vec<String> = clauses.iter().map(|c| format!("({c})")).collect();
            format!("WHERE {}", wrapped.join(" AND "))
        };
        let sql = format!(
            "SELECT c.chunk_id, c.library, c.document_url, c.heading, c.doc_type, \
             c.ordinal, c.content, c.code_blocks, c.languages, \
             vec_distance_cosine(e.embedding, vec_f32(?)) as distance \
             FROM chunks c \
             JOIN chunk_embeddings e ON c.rowid = e.rowid \
             {where_sql} \
             ORDER BY distance ASC \
             LIMIT {top_k}"
        );

        self.conn
            .call(move |conn| -> Result<Vec<(ChunkRecord, f32)>, tokio_rusqlite::Error> {
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), |row| {
                        let record = row_to_record(row)?;
                        let distance: f32 = row.get(9)?;
                        Ok((record, 1.0 - distance))
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row.map_err(tokio_rusqlite::Error::Error)?);
                }
                Ok(results)
            })
            .await
            .map_err(|err| DocsmithError::Storage(err.to_string()))
    }

    async fn count_library(&self, library: &str) -> Result<usize, DocsmithError> {
        let library = library.to_string();
        self.conn
            .call(move |conn| -> Result<usize, tokio_rusqlite::Error> {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM chunks WHERE library = ?",
                        [&library],
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| DocsmithError::Storage(err.to_string()))
    }
}
