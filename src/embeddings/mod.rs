// Document ingestion, embeddings and the LanceDB-backed chunk store

pub mod document_processor;
pub mod embedder;
pub mod index;
pub mod store;
pub mod text_chunker;
pub mod vector_search;

pub use document_processor::*;
pub use embedder::*;
pub use index::{AnswerModel, DocumentIndex, IndexHandle, IngestSummary, RagAnswer, SourceRef};
pub use store::{LanceStore, StoredChunk, VectorStore};
pub use text_chunker::*;
pub use vector_search::*;
