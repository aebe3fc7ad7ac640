//! Persistent document index.
//!
//! Chunks of every ingested PDF live in a [`VectorStore`], by default the
//! LanceDB table under `<index_dir>`. Queries embed the question, let the
//! store return the `fetch_k` nearest chunks (optionally limited to some
//! source files), re-rank them with maximal marginal relevance down to `k`,
//! and stuff the survivors into one prompt.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embeddings::document_processor::{DocumentProcessor, PageText};
use crate::embeddings::embedder::Embedder;
use crate::embeddings::store::{LanceStore, StoredChunk, VectorStore};
use crate::embeddings::text_chunker::TextChunker;
use crate::embeddings::vector_search::maximal_marginal_relevance;
use crate::llm::LLM;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    pub file_name: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub content: String,
    pub page: u32,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

/// Model settings used when answering from retrieved chunks
#[derive(Debug, Clone)]
pub struct AnswerModel {
    pub model: String,
    pub temperature: f32,
}

pub struct DocumentIndex {
    store: Box<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<LLM>,
    answer_model: AnswerModel,
    config: RetrievalConfig,
}

impl DocumentIndex {
    /// Open the LanceDB store in `dir`, creating an empty one if nothing was persisted yet
    pub async fn open(
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<LLM>,
        answer_model: AnswerModel,
        config: RetrievalConfig,
    ) -> AppResult<Self> {
        let store = LanceStore::open(dir).await?;
        Ok(Self::with_store(Box::new(store), embedder, llm, answer_model, config))
    }

    pub fn with_store(
        store: Box<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<LLM>,
        answer_model: AnswerModel,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            answer_model,
            config,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.store.has_data()
    }

    pub async fn chunk_count(&self) -> AppResult<usize> {
        self.store.count(None).await
    }

    /// Chunks currently stored for one source file
    pub async fn chunks_for(&self, file_name: &str) -> AppResult<usize> {
        self.store.count(Some(&[file_name.to_string()])).await
    }

    /// Extract, chunk and embed an uploaded PDF held in memory
    pub async fn ingest_pdf(&mut self, file_name: &str, bytes: Vec<u8>) -> AppResult<IngestSummary> {
        let pages = DocumentProcessor::extract_pdf_pages(file_name, bytes).await?;
        self.ingest_pages(file_name, pages).await
    }

    /// Chunk, embed and store pages under `file_name`, replacing any chunks
    /// a previous ingestion of the same name left behind.
    pub async fn ingest_pages(&mut self, file_name: &str, pages: Vec<PageText>) -> AppResult<IngestSummary> {
        let chunker = TextChunker::new(self.config.chunk_size, self.config.chunk_overlap);
        let mut pieces: Vec<(u32, String)> = Vec::new();
        for page in pages {
            for text in chunker.split(&page.text) {
                pieces.push((page.page, text));
            }
        }
        if pieces.is_empty() {
            return Err(AppError::parse(file_name, "no extractable text found"));
        }

        let texts: Vec<String> = pieces.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(AppError::ExternalService(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let chunk_count = pieces.len();
        let chunks: Vec<StoredChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .map(|((page, text), vector)| StoredChunk {
                id: Uuid::new_v4().to_string(),
                source: file_name.to_string(),
                page,
                text,
                vector,
            })
            .collect();
        let replaced = self.store.replace_source(file_name, chunks).await?;

        info!(file = %file_name, chunks = chunk_count, replaced, "Indexed document");
        Ok(IngestSummary {
            file_name: file_name.to_string(),
            chunk_count,
        })
    }

    pub async fn query(&self, question: &str, filter_files: Option<&[String]>) -> AppResult<RagAnswer> {
        if !self.store.has_data() {
            return Err(AppError::NotReady);
        }

        if self.store.count(filter_files).await? == 0 {
            debug!("No indexed chunks match the requested files");
            return Ok(RagAnswer {
                answer: "None of the selected documents contain indexed text.".to_string(),
                sources: Vec::new(),
            });
        }

        let query_vector = self.embedder.embed_one(question).await?;
        let candidates = self
            .store
            .search(&query_vector, filter_files, self.config.fetch_k)
            .await?;
        let vectors: Vec<&[f32]> = candidates.iter().map(|c| c.vector.as_slice()).collect();
        let selected: Vec<&StoredChunk> =
            maximal_marginal_relevance(&query_vector, &vectors, self.config.k, self.config.mmr_lambda)
                .into_iter()
                .map(|idx| &candidates[idx])
                .collect();

        let context = selected
            .iter()
            .map(|c| format!("[{} - page {}]\n{}", c.source, c.page, c.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Use the following pieces of context to answer the question at the end. \
             If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
             {}\n\nQuestion: {}\nHelpful Answer:",
            context, question
        );

        let mut request = LLMRequest::new(&self.answer_model.model, vec![LLMMessage::user(prompt)]);
        request.temperature = Some(self.answer_model.temperature);
        let response = self.llm.create_chat_completion(&request).await?;

        Ok(RagAnswer {
            answer: response.content,
            sources: selected
                .iter()
                .map(|c| SourceRef {
                    content: c.text.clone(),
                    page: c.page,
                    source: c.source.clone(),
                })
                .collect(),
        })
    }

    /// Remove every chunk whose source is `file_name`; `Ok(false)` when there were none
    pub async fn delete_document(&mut self, file_name: &str) -> AppResult<bool> {
        let removed = self.store.delete_source(file_name).await?;
        if removed > 0 {
            info!(file = %file_name, removed, "Removed document from index");
        }
        Ok(removed > 0)
    }

    /// Drop every stored chunk; the index is empty and not ready afterwards
    pub async fn reset(&mut self) -> AppResult<()> {
        self.store.reset().await?;
        info!("Document index reset");
        Ok(())
    }
}

/// Shared handle to the active index. Ingestion, deletion and reset take the
/// write half, so a reset never overlaps a running query.
#[derive(Clone)]
pub struct IndexHandle {
    inner: Arc<RwLock<DocumentIndex>>,
}

impl IndexHandle {
    pub fn new(index: DocumentIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, DocumentIndex> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, DocumentIndex> {
        self.inner.write().await
    }

    pub async fn reset(&self) -> AppResult<()> {
        self.inner.write().await.reset().await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_query_before_ingestion_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let (llm, _) = scripted_llm("unused");
        let index = open_index(dir.path(), Arc::new(LetterEmbedder), llm).await;
        assert!(matches!(index.query("anything?", None).await, Err(AppError::NotReady)));
    }

    #[tokio::test]
    async fn test_reingesting_replaces_previous_chunks() {
        let dir = TempDir::new().unwrap();
        let (llm, _) = scripted_llm("ok");
        let mut index = open_index(dir.path(), Arc::new(LetterEmbedder), llm).await;

        let long = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu ".repeat(4);
        let first = index.ingest_pages("report.pdf", pages(&[long.as_str(), long.as_str()])).await.unwrap();
        assert!(first.chunk_count > 2);

        let second = index.ingest_pages("report.pdf", pages(&["short page"])).await.unwrap();
        assert_eq!(second.chunk_count, 1);
        assert_eq!(index.chunks_for("report.pdf").await.unwrap(), 1);
        assert_eq!(index.chunk_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_respects_file_filter_and_reports_sources() {
        let dir = TempDir::new().unwrap();
        let (llm, prompts) = scripted_llm("Revenue grew.");
        let mut index = open_index(dir.path(), Arc::new(LetterEmbedder), llm).await;
        index.ingest_pages("a.pdf", pages(&["revenue grew in spring"])).await.unwrap();
        index.ingest_pages("b.pdf", pages(&["zebra quiz jukebox"])).await.unwrap();

        let filter = vec!["b.pdf".to_string()];
        let answer = index.query("how did revenue change?", Some(&filter)).await.unwrap();

        assert_eq!(answer.answer, "Revenue grew.");
        assert!(!answer.sources.is_empty());
        assert!(answer.sources.iter().all(|s| s.source == "b.pdf"));
        let prompt = prompts.lock().unwrap().last().cloned().unwrap();
        assert!(prompt.contains("zebra quiz jukebox"));
        assert!(!prompt.contains("revenue grew in spring"));
        assert!(prompt.contains("Question: how did revenue change?"));
    }

    #[tokio::test]
    async fn test_filter_without_matching_chunks_skips_the_model() {
        let dir = TempDir::new().unwrap();
        let (llm, prompts) = scripted_llm("unused");
        let mut index = open_index(dir.path(), Arc::new(LetterEmbedder), llm).await;
        index.ingest_pages("a.pdf", pages(&["some text"])).await.unwrap();

        let filter = vec!["other.pdf".to_string()];
        let answer = index.query("anything?", Some(&filter)).await.unwrap();
        assert!(answer.sources.is_empty());
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (llm, _) = scripted_llm("ok");
        {
            let mut index = open_index(dir.path(), Arc::new(LetterEmbedder), llm.clone()).await;
            index.ingest_pages("a.pdf", pages(&["persisted text"])).await.unwrap();
        }
        let reopened = open_index(dir.path(), Arc::new(LetterEmbedder), llm).await;
        assert!(reopened.is_ready());
        assert_eq!(reopened.chunks_for("a.pdf").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_document_reports_whether_anything_was_removed() {
        let dir = TempDir::new().unwrap();
        let (llm, _) = scripted_llm("ok");
        let mut index = open_index(dir.path(), Arc::new(LetterEmbedder), llm).await;
        index.ingest_pages("a.pdf", pages(&["some text"])).await.unwrap();

        assert!(index.delete_document("a.pdf").await.unwrap());
        assert!(!index.delete_document("a.pdf").await.unwrap());
        assert_eq!(index.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_index_unchanged() {
        let dir = TempDir::new().unwrap();
        let (llm, _) = scripted_llm("ok");
        let mut index = open_index(dir.path(), Arc::new(FailingEmbedder), llm).await;
        let result = index.ingest_pages("a.pdf", pages(&["text"])).await;
        assert!(matches!(result, Err(AppError::ExternalService(_))));
        assert!(!index.is_ready());
        assert_eq!(index.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_from_delete() {
        let dir = TempDir::new().unwrap();
        let (llm, _) = scripted_llm("ok");
        let mut index = open_undeletable_index(dir.path(), Arc::new(LetterEmbedder), llm).await;
        index.ingest_pages("a.pdf", pages(&["some text"])).await.unwrap();

        assert!(matches!(index.delete_document("a.pdf").await, Err(AppError::VectorStore(_))));
        assert_eq!(index.chunks_for("a.pdf").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_handle_reset_empties_index() {
        let dir = TempDir::new().unwrap();
        let (llm, _) = scripted_llm("ok");
        let mut index = open_index(dir.path(), Arc::new(LetterEmbedder), llm.clone()).await;
        index.ingest_pages("a.pdf", pages(&["some text"])).await.unwrap();

        let handle = IndexHandle::new(index);
        handle.reset().await.unwrap();

        {
            let index = handle.read().await;
            assert_eq!(index.chunk_count().await.unwrap(), 0);
            assert!(!index.is_ready());
        }
        let reopened = open_index(dir.path(), Arc::new(LetterEmbedder), llm).await;
        assert!(!reopened.is_ready());
    }
}
