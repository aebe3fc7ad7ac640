//! Request dispatcher.
//!
//! Runs exactly one action against a session and returns what the page
//! should show. Errors never escape: each one becomes a status message.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::agents::{compose_combined_prompt, compose_table_prompt, AnswerAgent, PromptInput};
use crate::config::QueryConfig;
use crate::conversation::ConversationTurn;
use crate::data_registry::parse_table;
use crate::embeddings::{IndexHandle, SourceRef};
use crate::formatter::format_answer;
use crate::models::{
    Action, AnswerView, DeleteOutcome, FileKind, FileMetadata, FormPayload, IndexCleanup, QueryRequest,
    RenderContext, StatusMessage, Upload, UploadedFile,
};
use crate::session::SessionState;
use crate::storage::{sanitize_file_name, UploadStore};
use crate::types::{AppError, AppResult};

/// Collaborators shared by every session
pub struct Services {
    pub index: IndexHandle,
    pub agent: Arc<dyn AnswerAgent>,
    pub uploads: UploadStore,
    pub query: QueryConfig,
}

#[derive(Default)]
struct Outcome {
    status: Vec<StatusMessage>,
    last_delete: Option<DeleteOutcome>,
}

impl Outcome {
    fn message(status: StatusMessage) -> Self {
        Self {
            status: vec![status],
            last_delete: None,
        }
    }
}

pub async fn dispatch(session: &mut SessionState, services: &Services, form: FormPayload) -> RenderContext {
    let action = Action::from_form(form);
    let name = action.name();
    info!(action = name, "Dispatching action");

    let result = match action {
        Action::UploadFile(upload) => upload_file(session, services, upload).await,
        Action::AskQuestion(query) => ask_question(session, services, query).await,
        Action::DeleteFile(file_name) => delete_file(session, services, &file_name).await,
        Action::ClearConversation => Ok(clear_conversation(session)),
        Action::ResetIndex => reset_index(session, services).await,
        Action::Show => Ok(Outcome::default()),
    };

    let outcome = result.unwrap_or_else(|e| {
        warn!(action = name, error = %e, "Action failed");
        Outcome::message(StatusMessage::error(e.user_message()))
    });
    render(session, name, outcome)
}

fn render(session: &SessionState, action: &'static str, outcome: Outcome) -> RenderContext {
    RenderContext {
        action,
        status: outcome.status,
        files: session.loaded_files.values().cloned().collect(),
        history: session.conversation_history.turns().to_vec(),
        answer: session.last_answer.clone(),
        last_delete: outcome.last_delete,
    }
}

/// Render without running an action
pub fn show(session: &SessionState) -> RenderContext {
    render(session, Action::Show.name(), Outcome::default())
}

async fn upload_file(session: &mut SessionState, services: &Services, upload: Option<Upload>) -> AppResult<Outcome> {
    let upload = upload
        .filter(|u| !u.file_name.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("Choose a file to upload.".into()))?;
    let name = sanitize_file_name(&upload.file_name)
        .ok_or_else(|| AppError::InvalidRequest(format!("Invalid file name: {}", upload.file_name)))?;
    let kind = FileKind::from_file_name(&name).ok_or_else(|| {
        AppError::InvalidRequest(format!(
            "Unsupported file type: {}. Upload a CSV, Excel or PDF file.",
            name
        ))
    })?;

    // Parse or index from memory first; only a good upload replaces the
    // stored original.
    let (metadata, storage_path) = match kind {
        FileKind::Csv => {
            let record = parse_table(&upload.bytes, &name)?;
            let metadata = FileMetadata::Table {
                rows: record.row_count(),
                columns: record.columns(),
            };
            let stored = services.uploads.save(&name, &upload.bytes).await?;
            session.csv_files.insert(record);
            (metadata, stored)
        }
        FileKind::Pdf => {
            let summary = services
                .index
                .write()
                .await
                .ingest_pdf(&name, upload.bytes.clone())
                .await?;
            let stored = services.uploads.save(&name, &upload.bytes).await?;
            let metadata = FileMetadata::Document {
                chunks: summary.chunk_count,
            };
            (metadata, stored)
        }
    };

    let text = match &metadata {
        FileMetadata::Table { rows, columns } => {
            format!("Loaded {} ({} rows, {} columns).", name, rows, columns.len())
        }
        FileMetadata::Document { chunks } => format!("Indexed {} ({} chunks).", name, chunks),
    };
    session.loaded_files.insert(
        name.clone(),
        UploadedFile {
            name,
            kind,
            storage_path,
            metadata,
        },
    );
    Ok(Outcome::message(StatusMessage::success(text)))
}

async fn ask_question(session: &mut SessionState, services: &Services, query: QueryRequest) -> AppResult<Outcome> {
    let question = query.question.trim();
    if question.is_empty() {
        return Err(AppError::InvalidRequest("Enter a question first.".into()));
    }
    if session.loaded_files.is_empty() {
        return Err(AppError::InvalidRequest("Upload a file before asking questions.".into()));
    }

    let selected: Vec<String> = if query.selected_files.is_empty() {
        session.loaded_files.keys().cloned().collect()
    } else {
        dedup_in_order(&query.selected_files)
    };

    let mut pdfs = Vec::new();
    let mut tables = Vec::new();
    for name in &selected {
        let file = session
            .loaded_files
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("File {}", name)))?;
        match file.kind {
            FileKind::Pdf => pdfs.push(name.clone()),
            FileKind::Csv => tables.push(name.clone()),
        }
    }
    info!(pdfs = pdfs.len(), tables = tables.len(), "Answering question");

    let pdf_answer = if pdfs.is_empty() {
        None
    } else {
        let pdf_question = match query.pdf_query.trim() {
            "" => question,
            sub_query => sub_query,
        };
        Some(services.index.read().await.query(pdf_question, Some(pdfs.as_slice())).await?)
    };

    let history = session.conversation_history.recent(services.query.history_turns);
    let input = PromptInput {
        question,
        context: &query.context,
        history,
    };

    let (raw, sources): (String, Vec<SourceRef>) = match (pdf_answer, tables.is_empty()) {
        (pdf, false) => {
            let table = session.csv_files.get(&tables)?;
            let prompt = match &pdf {
                Some(found) => compose_combined_prompt(&input, &found.answer, &table, services.query.sample_rows),
                None => compose_table_prompt(&input, &table, services.query.sample_rows),
            };
            let answer = services.agent.answer(&prompt, &table).await?;
            (answer, pdf.map(|p| p.sources).unwrap_or_default())
        }
        (Some(pdf), true) => (pdf.answer, pdf.sources),
        (None, true) => return Err(AppError::Internal("no files to answer from".into())),
    };

    let files_used: BTreeSet<String> = selected.iter().cloned().collect();
    session.last_answer = Some(AnswerView::new(
        question,
        selected,
        format_answer(&raw),
        sources,
    ));
    session
        .conversation_history
        .append(ConversationTurn::new(question, raw, files_used));

    Ok(Outcome::default())
}

/// Drop repeated names, keeping the first occurrence of each
fn dedup_in_order(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names.iter().filter(|n| seen.insert(n.as_str())).cloned().collect()
}

async fn delete_file(session: &mut SessionState, services: &Services, file_name: &str) -> AppResult<Outcome> {
    let file_name = file_name.trim();
    let file = session
        .loaded_files
        .get(file_name)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("File {}", file_name)))?;

    // Phase one: index entries. Failure here does not stop the removal.
    let index_cleanup = match file.kind {
        FileKind::Csv => IndexCleanup::NotApplicable,
        FileKind::Pdf => match services.index.write().await.delete_document(&file.name).await {
            Ok(true) => IndexCleanup::Removed,
            Ok(false) => IndexCleanup::NothingIndexed,
            Err(e) => {
                error!(file = %file.name, error = %e, "Index cleanup failed");
                IndexCleanup::Failed(e.user_message())
            }
        },
    };

    // Phase two: registry, table store and stored original
    session.loaded_files.remove(&file.name);
    session.csv_files.delete(&file.name);
    let mut status = vec![StatusMessage::success(format!("Deleted {}.", file.name))];

    let original_removed = match services.uploads.delete(&file.storage_path).await {
        Ok(removed) => removed,
        Err(e) => {
            warn!(file = %file.name, error = %e, "Could not remove stored original");
            status.push(StatusMessage::warning(e.user_message()));
            false
        }
    };
    if let IndexCleanup::Failed(reason) = &index_cleanup {
        status.push(StatusMessage::warning(format!(
            "{} was removed, but its document index entries could not be deleted ({}). Reset the index to clear them.",
            file.name, reason
        )));
    }

    Ok(Outcome {
        status,
        last_delete: Some(DeleteOutcome {
            file_name: file.name,
            index_cleanup,
            original_removed,
        }),
    })
}

fn clear_conversation(session: &mut SessionState) -> Outcome {
    session.conversation_history.clear();
    session.last_answer = None;
    Outcome::message(StatusMessage::success("Conversation cleared."))
}

async fn reset_index(session: &mut SessionState, services: &Services) -> AppResult<Outcome> {
    services.index.reset().await?;

    let dropped = session.files_of_kind(FileKind::Pdf);
    for name in &dropped {
        if let Some(file) = session.loaded_files.remove(name) {
            if let Err(e) = services.uploads.delete(&file.storage_path).await {
                warn!(file = %name, error = %e, "Could not remove stored original");
            }
        }
    }

    let mut status = vec![StatusMessage::success("Document index reset.")];
    if !dropped.is_empty() {
        status.push(StatusMessage::info(format!(
            "Removed {} from the loaded files. Upload them again to query them.",
            dropped.join(", ")
        )));
    }
    Ok(Outcome {
        status,
        last_delete: None,
    })
}
