// Type definitions shared across the LLM layer and the request handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMRequest {
    pub model: String,
    pub messages: Vec<LLMMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Functions the model may call instead of answering directly
    pub tools: Vec<ToolSpec>,
}

impl LLMRequest {
    pub fn new(model: impl Into<String>, messages: Vec<LLMMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMMessage {
    pub role: String, // "user", "assistant", "system", "tool"
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl LLMMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Assistant turn that requested tool calls; must precede the tool replies
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Could not parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No documents have been indexed yet")]
    NotReady,

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn parse(file: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Parse {
            file: file.into(),
            reason: reason.to_string(),
        }
    }

    /// Status text shown on the page when an action fails
    pub fn user_message(&self) -> String {
        match self {
            AppError::Parse { file, reason } => {
                format!("The file {} could not be read: {}", file, reason)
            }
            AppError::NotFound(what) => format!("{} was not found.", what),
            AppError::NotReady => {
                "No PDF has been indexed yet. Upload a document first.".to_string()
            }
            AppError::ExternalService(msg) => {
                format!("The language model service failed: {}", msg)
            }
            AppError::FileSystem(e) => format!("Could not access stored files: {}", e),
            AppError::VectorStore(msg) => format!("The document index failed: {}", msg),
            AppError::InvalidRequest(msg) => msg.clone(),
            AppError::Internal(msg) => format!("Unexpected error: {}", msg),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Parse { .. } | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotReady => StatusCode::CONFLICT,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::FileSystem(_) | AppError::VectorStore(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::ExternalService(e.to_string())
    }
}

impl From<lancedb::Error> for AppError {
    fn from(e: lancedb::Error) -> Self {
        AppError::VectorStore(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for AppError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        AppError::VectorStore(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "message": self.user_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
