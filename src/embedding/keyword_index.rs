/// Tantivy keyword index for BM25 full-text search over chunks
use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// Search hit with chunk ID and raw BM25 score
#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    pub chunk_id: String,
    pub score: f32,
}

/// Tantivy keyword index wrapper keyed by chunk ID
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    id_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Open the index stored in `index_path`, creating it if absent
    pub fn new(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        if index_path.join("meta.json").exists() {
            Self::load(index_path)
        } else {
            Self::create(index_path)
        }
    }

    fn create(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let mut schema_builder = Schema::builder();
        // Raw (untokenized) so delete_term matches the exact chunk id
        let id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_dir(&index_path, schema)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::open(index, id_field, text_field)
    }

    fn load(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let schema = index.schema();
        let id_field = schema.get_field("chunk_id").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'chunk_id' field in schema".to_string())
        })?;
        let text_field = schema.get_field("text").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'text' field in schema".to_string())
        })?;

        Self::open(index, id_field, text_field)
    }

    fn open(index: Index, id_field: Field, text_field: Field) -> Result<Self, KeywordIndexError> {
        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            id_field,
            text_field,
        })
    }

    /// Insert or replace a chunk's text (takes effect on `commit`)
    pub fn upsert(&mut self, chunk_id: &str, text: &str) -> Result<(), KeywordIndexError> {
        self.delete(chunk_id);

        let doc = doc!(
            self.id_field => chunk_id,
            self.text_field => text,
        );

        self.writer
            .add_document(doc)
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        Ok(())
    }

    /// Remove a chunk (takes effect on `commit`)
    pub fn delete(&mut self, chunk_id: &str) {
        let term = Term::from_field_text(self.id_field, chunk_id);
        self.writer.delete_term(term);
    }

    /// Commit all pending changes and refresh the reader
    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// Search the index, best match first
    ///
    /// Query syntax errors are tolerated: whatever parses is searched.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} query parse errors", errors.len());
        }

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let chunk_id = retrieved_doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid chunk_id field".to_string())
                })?
                .to_string();

            results.push(KeywordSearchResult { chunk_id, score });
        }

        Ok(results)
    }

    /// Number of live documents
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
