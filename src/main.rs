use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use tabrick::agents::TableAgent;
use tabrick::config::Config;
use tabrick::dispatcher::Services;
use tabrick::embeddings::{AnswerModel, DocumentIndex, IndexHandle, OpenAIEmbedder};
use tabrick::llm::{LLMProviderConfig, LLM};
use tabrick::session::SessionStore;
use tabrick::storage::UploadStore;
use tabrick::utils::init_logger;
use tabrick::{create_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "tabrick", about = "Ask questions about uploaded CSV, Excel and PDF files")]
struct Args {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Where uploaded originals are stored (overrides UPLOADS_DIR)
    #[arg(long)]
    uploads_dir: Option<PathBuf>,

    /// Document index directory (overrides INDEX_DIR)
    #[arg(long)]
    index_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::from_env()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.uploads_dir {
        config.storage.uploads_dir = dir;
    }
    if let Some(dir) = args.index_dir {
        config.storage.index_dir = dir;
    }

    let _log_guard = init_logger(&config.logging);
    info!("Configuration loaded: {:?}", config.server);
    if config.llm.openai_api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY is not set; questions and PDF uploads will fail");
    }

    let llm = Arc::new(LLM::new(LLMProviderConfig {
        name: config.llm.provider.clone(),
        api_key: config.llm.openai_api_key.clone(),
        base_url: config.llm.openai_base_url.clone(),
    })?);
    let embedder = Arc::new(OpenAIEmbedder::with_base_url(
        &config.llm.openai_api_key,
        &config.llm.openai_base_url,
        &config.llm.embedding_model,
    ));

    let index = DocumentIndex::open(
        &config.storage.index_dir,
        embedder,
        llm.clone(),
        AnswerModel {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
        },
        config.retrieval.clone(),
    )
    .await?;
    let chunks = index.chunk_count().await?;
    info!(dir = %config.storage.index_dir.display(), chunks, "Document index ready");

    let agent = TableAgent::new(
        llm,
        config.llm.model.clone(),
        config.llm.temperature,
        config.query.agent_max_steps,
    );

    let state = AppState {
        config: config.clone(),
        sessions: SessionStore::new(chrono::Duration::seconds(config.server.session_idle_secs as i64)),
        services: Arc::new(Services {
            index: IndexHandle::new(index),
            agent: Arc::new(agent),
            uploads: UploadStore::new(&config.storage.uploads_dir),
            query: config.query.clone(),
        }),
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
