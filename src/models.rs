use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::conversation::ConversationTurn;
use crate::dispatcher::Services;
use crate::embeddings::SourceRef;
use crate::formatter::FormattedAnswer;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub services: Arc<Services>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Delimited text or a spreadsheet, held in the table store
    Csv,
    /// Indexed in the document index
    Pdf,
}

impl FileKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, extension) = name.rsplit_once('.')?;
        match extension.to_lowercase().as_str() {
            "csv" | "tsv" | "txt" | "xls" | "xlsx" | "xlsm" | "ods" => Some(FileKind::Csv),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileMetadata {
    Table { rows: usize, columns: Vec<String> },
    Document { chunks: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub storage_path: PathBuf,
    pub metadata: FileMetadata,
}

/// A file received in the multipart form
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Raw form submission, before the action tag is interpreted
#[derive(Debug, Clone, Default)]
pub struct FormPayload {
    pub action: Option<String>,
    pub question: String,
    pub context: String,
    pub pdf_query: String,
    pub selected_files: Vec<String>,
    /// Target of `delete_file`
    pub file_name: String,
    pub upload: Option<Upload>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub question: String,
    pub context: String,
    /// Empty means every loaded file
    pub selected_files: Vec<String>,
    pub pdf_query: String,
}

#[derive(Debug, Clone)]
pub enum Action {
    UploadFile(Option<Upload>),
    AskQuestion(QueryRequest),
    DeleteFile(String),
    ClearConversation,
    ResetIndex,
    /// Missing or unknown tag: render the current state only
    Show,
}

impl Action {
    pub fn from_form(form: FormPayload) -> Self {
        match form.action.as_deref().map(str::trim) {
            Some("upload_file") => Action::UploadFile(form.upload),
            Some("ask_question") => Action::AskQuestion(QueryRequest {
                question: form.question,
                context: form.context,
                selected_files: form.selected_files,
                pdf_query: form.pdf_query,
            }),
            Some("delete_file") => Action::DeleteFile(form.file_name),
            Some("clear_conversation") => Action::ClearConversation,
            Some("reset_chroma") | Some("reset_index") => Action::ResetIndex,
            _ => Action::Show,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::UploadFile(_) => "upload_file",
            Action::AskQuestion(_) => "ask_question",
            Action::DeleteFile(_) => "delete_file",
            Action::ClearConversation => "clear_conversation",
            Action::ResetIndex => "reset_chroma",
            Action::Show => "show",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Success => "success",
            StatusLevel::Info => "info",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusMessage {
    pub fn success(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Success, text: text.into() }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Info, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Error, text: text.into() }
    }
}

/// What happened to a deleted file's index entries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum IndexCleanup {
    /// Tables have no index entries
    NotApplicable,
    Removed,
    NothingIndexed,
    /// The file left the registry but its chunks may remain until a reset
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub file_name: String,
    pub index_cleanup: IndexCleanup,
    pub original_removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerView {
    pub question: String,
    pub files_used: Vec<String>,
    pub prose_html: String,
    pub table_html: Option<String>,
    pub sources: Vec<SourceRef>,
}

impl AnswerView {
    pub fn new(question: &str, files_used: Vec<String>, formatted: FormattedAnswer, sources: Vec<SourceRef>) -> Self {
        Self {
            question: question.to_string(),
            files_used,
            prose_html: formatted.prose_html,
            table_html: formatted.table_html,
            sources,
        }
    }
}

/// Everything the page needs after an action
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext {
    pub action: &'static str,
    pub status: Vec<StatusMessage>,
    pub files: Vec<UploadedFile>,
    pub history: Vec<ConversationTurn>,
    pub answer: Option<AnswerView>,
    pub last_delete: Option<DeleteOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub indexed_chunks: Option<usize>,
}
