use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_bytes: usize,
    /// Sessions not seen for this long are dropped
    pub session_idle_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub uploads_dir: PathBuf,
    pub index_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Chunks handed to the model after re-ranking
    pub k: usize,
    /// Candidates fetched by similarity before re-ranking
    pub fetch_k: usize,
    pub mmr_lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            k: 10,
            fetch_k: 20,
            mmr_lambda: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub sample_rows: usize,
    pub history_turns: usize,
    pub agent_max_steps: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            sample_rows: 5,
            history_turns: 5,
            agent_max_steps: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let retrieval_defaults = RetrievalConfig::default();
        let query_defaults = QueryConfig::default();

        let config = Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                    .unwrap_or_else(|_| (50 * 1024 * 1024).to_string())
                    .parse()?,
                session_idle_secs: parse_or("SESSION_IDLE_SECS", 4 * 60 * 60)?,
            },
            llm: LLMConfig {
                provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                openai_base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                temperature: env::var("LLM_TEMPERATURE")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()?,
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-ada-002".to_string()),
            },
            storage: StorageConfig {
                uploads_dir: env::var("UPLOADS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("uploads")),
                index_dir: env::var("INDEX_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("vector_index")),
            },
            retrieval: RetrievalConfig {
                chunk_size: parse_or("CHUNK_SIZE", retrieval_defaults.chunk_size)?,
                chunk_overlap: parse_or("CHUNK_OVERLAP", retrieval_defaults.chunk_overlap)?,
                k: parse_or("RETRIEVAL_K", retrieval_defaults.k)?,
                fetch_k: parse_or("RETRIEVAL_FETCH_K", retrieval_defaults.fetch_k)?,
                mmr_lambda: parse_or("MMR_LAMBDA", retrieval_defaults.mmr_lambda)?,
            },
            query: QueryConfig {
                sample_rows: parse_or("SAMPLE_ROWS", query_defaults.sample_rows)?,
                history_turns: parse_or("HISTORY_TURNS", query_defaults.history_turns)?,
                agent_max_steps: parse_or("AGENT_MAX_STEPS", query_defaults.agent_max_steps)?,
            },
            logging: LoggingConfig {
                log_dir: env::var("LOG_DIR").ok().map(PathBuf::from),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        anyhow::ensure!(r.chunk_size > 0, "CHUNK_SIZE must be positive");
        anyhow::ensure!(
            r.chunk_overlap < r.chunk_size,
            "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
            r.chunk_overlap,
            r.chunk_size
        );
        anyhow::ensure!(r.k > 0, "RETRIEVAL_K must be positive");
        anyhow::ensure!(
            r.fetch_k >= r.k,
            "RETRIEVAL_FETCH_K ({}) must be at least RETRIEVAL_K ({})",
            r.fetch_k,
            r.k
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&r.mmr_lambda),
            "MMR_LAMBDA must be within [0, 1]"
        );
        anyhow::ensure!(self.query.sample_rows > 0, "SAMPLE_ROWS must be positive");
        anyhow::ensure!(self.query.agent_max_steps > 0, "AGENT_MAX_STEPS must be positive");
        anyhow::ensure!(self.server.session_idle_secs > 0, "SESSION_IDLE_SECS must be positive");
        Ok(())
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => Ok(raw.trim().parse()?),
        Err(_) => Ok(default),
    }
}
