// Tabrick - ask natural-language questions about uploaded tables and PDFs

pub mod agents;
pub mod config;
pub mod conversation;
pub mod data_registry;
pub mod dispatcher;
pub mod embeddings;
pub mod formatter;
pub mod llm;
pub mod models;
pub mod routes;
pub mod session;
pub mod storage;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
