//! Chunk store: SQLite rows + tantivy BM25 index behind `StorageBackend`

use crate::embedding::{cosine_similarity, KeywordIndex};
use crate::retrieval::SearchResult;
use crate::storage::{Database, Metadata, StorageBackend, StorageError, StorageResult};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite caps bound parameters per statement; stay well below it
const DELETE_BATCH: usize = 500;

/// Chunk storage backed by SQLite for rows/embeddings and tantivy for BM25
///
/// Vector search is an exact cosine scan over stored embeddings, which keeps
/// deletes trivially consistent at the cost of O(n) queries.
pub struct ChunkStore {
    database: Database,
    keyword_index: Arc<Mutex<KeywordIndex>>,
}

impl ChunkStore {
    /// Open (or create) a store rooted at `store_dir`
    pub fn open(store_dir: &Path) -> StorageResult<Self> {
        let database = Database::new(&store_dir.join("chunks.sqlite"))?;
        let keyword_index = KeywordIndex::new(store_dir.join("keywords"))?;

        tracing::debug!("Opened chunk store at {}", store_dir.display());

        Ok(Self {
            database,
            keyword_index: Arc::new(Mutex::new(keyword_index)),
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    async fn delete_ids(&self, ids: Vec<String>) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let db = self.database.clone();
        let row_ids = ids.clone();
        let deleted = tokio::task::spawn_blocking(move || -> StorageResult<usize> {
            let mut conn = db.get_conn()?;
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for batch in row_ids.chunks(DELETE_BATCH) {
                let sql = format!(
                    "DELETE FROM chunks WHERE id IN ({})",
                    placeholders(batch.len())
                );
                deleted += tx.execute(&sql, params_from_iter(batch.iter()))?;
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await??;

        let guard = self.keyword_index.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut index = guard;
            for id in &ids {
                index.delete(id);
            }
            index.commit()?;
            Ok(())
        })
        .await??;

        Ok(deleted)
    }
}

#[async_trait]
impl StorageBackend for ChunkStore {
    async fn vector_search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        similarity_threshold: f32,
    ) -> StorageResult<Vec<SearchResult>> {
        if query_embedding.is_empty() {
            return Err(StorageError::InvalidInput(
                "Query embedding is empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let db = self.database.clone();
        let query = query_embedding.to_vec();

        let hits = tokio::task::spawn_blocking(move || -> StorageResult<Vec<_>> {
            let conn = db.get_conn()?;
            let mut stmt =
                conn.prepare("SELECT id, text, metadata, embedding FROM chunks ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, text, metadata, embedding) = row?;
                let similarity = cosine_similarity(&query, &decode_embedding(&embedding));
                if similarity >= similarity_threshold {
                    hits.push((similarity, id, text, metadata));
                }
            }

            hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(top_k);
            Ok(hits)
        })
        .await??;

        Ok(hits
            .into_iter()
            .map(|(similarity, id, text, metadata)| {
                let metadata = parse_metadata(&id, &metadata);
                let mut result = SearchResult::new(id, text, f64::from(similarity).clamp(0.0, 1.0))
                    .with_metadata(metadata);
                result.vector_score = Some(f64::from(similarity));
                result
            })
            .collect())
    }

    async fn keyword_search(&self, query: &str, top_k: usize) -> StorageResult<Vec<SearchResult>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let hits = {
            let index = self.keyword_index.lock().await;
            index.search(query, top_k)?
        };
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let db = self.database.clone();
        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let rows = tokio::task::spawn_blocking(move || -> StorageResult<HashMap<String, _>> {
            let conn = db.get_conn()?;
            let sql = format!(
                "SELECT id, text, metadata FROM chunks WHERE id IN ({})",
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    (row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                ))
            })?;
            Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
        })
        .await??;

        let max_score = hits
            .iter()
            .map(|h| f64::from(h.score))
            .fold(0.0_f64, f64::max);

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some((text, metadata)) = rows.get(&hit.chunk_id) else {
                tracing::warn!(
                    "Keyword index returned chunk {} missing from database",
                    hit.chunk_id
                );
                continue;
            };

            let raw = f64::from(hit.score);
            let score = if max_score > 0.0 { raw / max_score } else { 0.0 };
            let mut result = SearchResult::new(hit.chunk_id.clone(), text.clone(), score)
                .with_metadata(parse_metadata(&hit.chunk_id, metadata));
            result.bm25_score = Some(raw);
            results.push(result);
        }

        Ok(results)
    }

    async fn upsert_documents(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> StorageResult<()> {
        if ids.len() != embeddings.len()
            || ids.len() != documents.len()
            || ids.len() != metadatas.len()
        {
            return Err(StorageError::InvalidInput(format!(
                "Length mismatch: {} ids, {} embeddings, {} documents, {} metadatas",
                ids.len(),
                embeddings.len(),
                documents.len(),
                metadatas.len()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }
        if embeddings.iter().any(|e| e.is_empty()) {
            return Err(StorageError::InvalidInput("Empty embedding".to_string()));
        }

        let mut rows = Vec::with_capacity(ids.len());
        for (((id, embedding), text), metadata) in ids
            .iter()
            .zip(embeddings)
            .zip(documents)
            .zip(metadatas)
        {
            rows.push((
                id.clone(),
                text.clone(),
                serde_json::to_string(metadata)?,
                encode_embedding(embedding),
                embedding.len() as i64,
            ));
        }

        let db = self.database.clone();
        let now = chrono::Utc::now().timestamp();
        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut conn = db.get_conn()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO chunks (id, text, metadata, embedding, dimension, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (id, text, metadata, embedding, dimension) in &rows {
                    stmt.execute(params![id, text, metadata, embedding, dimension, now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await??;

        let entries: Vec<(String, String)> = ids.iter().cloned().zip(documents.iter().cloned()).collect();
        let guard = self.keyword_index.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut index = guard;
            for (id, text) in &entries {
                index.upsert(id, text)?;
            }
            index.commit()?;
            Ok(())
        })
        .await??;

        tracing::debug!("Upserted {} chunks", ids.len());
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> StorageResult<usize> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        self.delete_ids(unique).await
    }

    async fn delete_by_metadata(&self, filter: &Metadata) -> StorageResult<usize> {
        if filter.is_empty() {
            return Err(StorageError::InvalidInput(
                "Metadata filter must not be empty".to_string(),
            ));
        }

        let mut clauses = Vec::with_capacity(filter.len());
        let mut bindings = Vec::with_capacity(filter.len() * 2);
        for (key, value) in filter {
            if key.contains('"') {
                return Err(StorageError::InvalidInput(format!(
                    "Invalid metadata key: {}",
                    key
                )));
            }
            let path = SqlValue::Text(format!("$.\"{}\"", key));

            match value {
                serde_json::Value::Null => {
                    clauses.push("json_type(metadata, ?) = 'null'");
                    bindings.push(path);
                }
                scalar => {
                    clauses.push("json_extract(metadata, ?) = ?");
                    bindings.push(path);
                    bindings.push(to_sql_value(key, scalar)?);
                }
            }
        }

        let db = self.database.clone();
        let sql = format!("SELECT id FROM chunks WHERE {}", clauses.join(" AND "));
        let ids = tokio::task::spawn_blocking(move || -> StorageResult<Vec<String>> {
            let conn = db.get_conn()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bindings.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await??;

        tracing::debug!("Metadata filter matched {} chunks", ids.len());
        self.delete_ids(ids).await
    }

    async fn get_count(&self) -> StorageResult<usize> {
        let db = self.database.clone();
        let count = tokio::task::spawn_blocking(move || -> StorageResult<i64> {
            let conn = db.get_conn()?;
            Ok(conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?)
        })
        .await??;

        Ok(count as usize)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn to_sql_value(key: &str, value: &serde_json::Value) -> StorageResult<SqlValue> {
    match value {
        serde_json::Value::String(s) => Ok(SqlValue::Text(s.clone())),
        serde_json::Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real).ok_or_else(|| {
                StorageError::InvalidInput(format!("Unrepresentable number for key {}", key))
            }),
        },
        _ => Err(StorageError::InvalidInput(format!(
            "Metadata filter value for {} must be a scalar",
            key
        ))),
    }
}

fn parse_metadata(chunk_id: &str, raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Unreadable metadata for chunk {}: {}", chunk_id, e);
        Metadata::new()
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
