//! Chunk storage for the document index.
//!
//! [`LanceStore`] keeps every chunk in one LanceDB table under the index
//! directory. The table is created by the first write, because the vector
//! width is only known once the embedder has answered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tokio::fs;
use tracing::{debug, info};

use crate::types::{AppError, AppResult};

const TABLE_NAME: &str = "chunks";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub source: String,
    pub page: u32,
    pub text: String,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// False until the first chunk has been written
    fn has_data(&self) -> bool;

    /// Number of chunks, optionally only those of the given source files
    async fn count(&self, sources: Option<&[String]>) -> AppResult<usize>;

    /// Store `chunks` as the only chunks of `source`; returns how many were replaced
    async fn replace_source(&mut self, source: &str, chunks: Vec<StoredChunk>) -> AppResult<usize>;

    /// Up to `limit` chunks nearest to `vector` by cosine distance, nearest first
    async fn search(&self, vector: &[f32], sources: Option<&[String]>, limit: usize) -> AppResult<Vec<StoredChunk>>;

    /// Remove every chunk of `source`; returns how many were removed
    async fn delete_source(&mut self, source: &str) -> AppResult<usize>;

    /// Drop everything, leaving an empty store
    async fn reset(&mut self) -> AppResult<()>;
}

pub struct LanceStore {
    dir: PathBuf,
    connection: Connection,
    table: Option<Table>,
}

impl LanceStore {
    pub async fn open(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        let connection = connect(&dir).await?;
        let names = connection.table_names().execute().await?;
        let table = if names.iter().any(|n| n == TABLE_NAME) {
            let table = connection.open_table(TABLE_NAME).execute().await?;
            let rows = table.count_rows(None).await?;
            info!(dir = %dir.display(), rows, "Opened chunk table");
            Some(table)
        } else {
            None
        };
        Ok(Self {
            dir,
            connection,
            table,
        })
    }
}

async fn connect(dir: &Path) -> AppResult<Connection> {
    fs::create_dir_all(dir).await?;
    Ok(lancedb::connect(&dir.to_string_lossy()).execute().await?)
}

#[async_trait]
impl VectorStore for LanceStore {
    fn has_data(&self) -> bool {
        self.table.is_some()
    }

    async fn count(&self, sources: Option<&[String]>) -> AppResult<usize> {
        match &self.table {
            Some(table) => Ok(table.count_rows(non_empty(sources).map(source_filter)).await?),
            None => Ok(0),
        }
    }

    async fn replace_source(&mut self, source: &str, chunks: Vec<StoredChunk>) -> AppResult<usize> {
        let (batch, schema) = chunk_batch(&chunks)?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema));

        match &self.table {
            Some(table) => {
                let filter = source_filter(&[source.to_string()]);
                let replaced = table.count_rows(Some(filter.clone())).await?;
                if replaced > 0 {
                    table.delete(&filter).await?;
                }
                table.add(reader).execute().await?;
                Ok(replaced)
            }
            None => {
                let table = self.connection.create_table(TABLE_NAME, reader).execute().await?;
                debug!(dir = %self.dir.display(), "Created chunk table");
                self.table = Some(table);
                Ok(0)
            }
        }
    }

    async fn search(&self, vector: &[f32], sources: Option<&[String]>, limit: usize) -> AppResult<Vec<StoredChunk>> {
        let Some(table) = &self.table else {
            return Ok(Vec::new());
        };

        let mut query = table
            .query()
            .nearest_to(vector.to_vec())?
            .distance_type(DistanceType::Cosine)
            .limit(limit);
        if let Some(sources) = non_empty(sources) {
            query = query.only_if(source_filter(sources));
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await?
            .try_collect()
            .await
            .map_err(|e| AppError::VectorStore(e.to_string()))?;

        let mut chunks = Vec::new();
        for batch in &batches {
            chunks.extend(read_chunks(batch)?);
        }
        Ok(chunks)
    }

    async fn delete_source(&mut self, source: &str) -> AppResult<usize> {
        let Some(table) = &self.table else {
            return Ok(0);
        };
        let filter = source_filter(&[source.to_string()]);
        let matching = table.count_rows(Some(filter.clone())).await?;
        if matching > 0 {
            table.delete(&filter).await?;
        }
        Ok(matching)
    }

    async fn reset(&mut self) -> AppResult<()> {
        self.table = None;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.connection = connect(&self.dir).await?;
        info!(dir = %self.dir.display(), "Chunk store reset");
        Ok(())
    }
}

// An empty selection means every source
fn non_empty(sources: Option<&[String]>) -> Option<&[String]> {
    sources.filter(|s| !s.is_empty())
}

/// `source IN ('a.pdf', ...)` with quotes escaped
fn source_filter(sources: &[String]) -> String {
    let quoted: Vec<String> = sources
        .iter()
        .map(|s| format!("'{}'", s.replace('\'', "''")))
        .collect();
    format!("source IN ({})", quoted.join(", "))
}

fn chunk_schema(dim: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("page", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
            true,
        ),
    ]))
}

fn chunk_batch(chunks: &[StoredChunk]) -> AppResult<(RecordBatch, SchemaRef)> {
    let dim = chunks
        .first()
        .map(|c| c.vector.len())
        .ok_or_else(|| AppError::Internal("no chunks to store".into()))?;
    if chunks.iter().any(|c| c.vector.len() != dim) {
        return Err(AppError::Internal("embeddings of different widths in one batch".into()));
    }
    let dim = i32::try_from(dim).map_err(|_| AppError::Internal(format!("embedding width {} is too large", dim)))?;
    let schema = chunk_schema(dim);

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.source.as_str()))),
        Arc::new(UInt32Array::from_iter_values(chunks.iter().map(|c| c.page))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str()))),
        Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            chunks
                .iter()
                .map(|c| Some(c.vector.iter().copied().map(Some).collect::<Vec<_>>())),
            dim,
        )),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    Ok((batch, schema))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> AppResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| AppError::VectorStore(format!("unexpected type for column {}", name)))
}

fn read_chunks(batch: &RecordBatch) -> AppResult<Vec<StoredChunk>> {
    let ids: &StringArray = column(batch, "id")?;
    let sources: &StringArray = column(batch, "source")?;
    let pages: &UInt32Array = column(batch, "page")?;
    let texts: &StringArray = column(batch, "text")?;
    let vectors: &FixedSizeListArray = column(batch, "vector")?;

    (0..batch.num_rows())
        .map(|i| {
            let vector = vectors.value(i);
            let vector = vector
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| AppError::VectorStore("vector items are not f32".into()))?;
            Ok(StoredChunk {
                id: ids.value(i).to_string(),
                source: sources.value(i).to_string(),
                page: pages.value(i),
                text: texts.value(i).to_string(),
                vector: vector.values().to_vec(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(source: &str, page: u32, vector: [f32; 3]) -> StoredChunk {
        StoredChunk {
            id: format!("{}-{}", source, page),
            source: source.to_string(),
            page,
            text: format!("{} page {}", source, page),
            vector: vector.to_vec(),
        }
    }

    #[test]
    fn test_source_filter_escapes_quotes() {
        let filter = source_filter(&["a.pdf".to_string(), "o'neil.pdf".to_string()]);
        assert_eq!(filter, "source IN ('a.pdf', 'o''neil.pdf')");
    }

    #[tokio::test]
    async fn test_empty_store_has_no_table() {
        let dir = TempDir::new().unwrap();
        let store = LanceStore::open(dir.path()).await.unwrap();
        assert!(!store.has_data());
        assert_eq!(store.count(None).await.unwrap(), 0);
        assert!(store.search(&[1.0, 0.0, 0.0], None, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_filters_by_source_and_orders_by_distance() {
        let dir = TempDir::new().unwrap();
        let mut store = LanceStore::open(dir.path()).await.unwrap();
        store
            .replace_source("a.pdf", vec![chunk("a.pdf", 1, [1.0, 0.0, 0.0]), chunk("a.pdf", 2, [0.0, 1.0, 0.0])])
            .await
            .unwrap();
        store
            .replace_source("b.pdf", vec![chunk("b.pdf", 1, [0.9, 0.1, 0.0])])
            .await
            .unwrap();

        let all = store.search(&[1.0, 0.0, 0.0], None, 2).await.unwrap();
        assert_eq!(all[0].id, "a.pdf-1");
        assert_eq!(all[1].id, "b.pdf-1");
        assert_eq!(all[0].vector, vec![1.0, 0.0, 0.0]);

        let only_b = store
            .search(&[1.0, 0.0, 0.0], Some(&["b.pdf".to_string()]), 5)
            .await
            .unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].page, 1);
        assert_eq!(only_b[0].text, "b.pdf page 1");
    }

    #[tokio::test]
    async fn test_replace_and_delete_count_rows() {
        let dir = TempDir::new().unwrap();
        let mut store = LanceStore::open(dir.path()).await.unwrap();
        store
            .replace_source("a.pdf", vec![chunk("a.pdf", 1, [1.0, 0.0, 0.0]), chunk("a.pdf", 2, [0.0, 1.0, 0.0])])
            .await
            .unwrap();
        let replaced = store
            .replace_source("a.pdf", vec![chunk("a.pdf", 1, [0.0, 0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(replaced, 2);
        assert_eq!(store.count(Some(&["a.pdf".to_string()])).await.unwrap(), 1);

        assert_eq!(store.delete_source("a.pdf").await.unwrap(), 1);
        assert_eq!(store.delete_source("a.pdf").await.unwrap(), 0);
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_and_reset() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = LanceStore::open(dir.path()).await.unwrap();
            store
                .replace_source("a.pdf", vec![chunk("a.pdf", 1, [1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        let mut reopened = LanceStore::open(dir.path()).await.unwrap();
        assert!(reopened.has_data());
        assert_eq!(reopened.count(None).await.unwrap(), 1);

        reopened.reset().await.unwrap();
        assert!(!reopened.has_data());
        assert!(dir.path().exists());
        assert!(!LanceStore::open(dir.path()).await.unwrap().has_data());
    }
}
