use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::debug;

use crate::dispatcher;
use crate::formatter::escape_html;
use crate::models::{AppState, FileKind, FileMetadata, FormPayload, RenderContext, StatusMessage, Upload};
use crate::routes::{load_session, with_session_cookie};
use crate::types::{AppError, AppResult};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(index).post(submit))
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    // A fresh session is only stored, and its cookie only set, on its first POST
    let (_, session, _) = load_session(&state, &headers).await;
    let context = dispatcher::show(&session);
    Html(render_page(&context)).into_response()
}

async fn submit(State(state): State<AppState>, headers: HeaderMap, multipart: Multipart) -> Response {
    let (id, mut session, fresh) = load_session(&state, &headers).await;

    let context = match read_form(multipart).await {
        Ok(form) => dispatcher::dispatch(&mut session, &state.services, form).await,
        Err(e) => {
            let mut context = dispatcher::show(&session);
            context.status.push(StatusMessage::error(e.user_message()));
            context
        }
    };

    state.sessions.save(id, session).await;
    with_session_cookie(Html(render_page(&context)), id, fresh)
}

async fn read_form(mut multipart: Multipart) -> AppResult<FormPayload> {
    let mut form = FormPayload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("Could not read the form: {}", e.body_text())))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidRequest(format!("Could not read the upload: {}", e.body_text())))?;
            if !file_name.is_empty() {
                form.upload = Some(Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::InvalidRequest(format!("Could not read field {}: {}", name, e.body_text())))?;
        match name.as_str() {
            "action" => form.action = Some(value),
            "question" => form.question = value,
            "context" => form.context = value,
            "pdf_query" => form.pdf_query = value,
            "file_name" => form.file_name = value,
            "selected_files" if !value.trim().is_empty() => form.selected_files.push(value),
            other => debug!(field = %other, "Ignoring form field"),
        }
    }

    Ok(form)
}

fn render_page(context: &RenderContext) -> String {
    let status: String = context
        .status
        .iter()
        .map(|s| {
            format!(
                "<div class=\"status {}\">{}</div>\n",
                s.level.as_str(),
                escape_html(&s.text)
            )
        })
        .collect();

    let files: String = if context.files.is_empty() {
        "<p>No files loaded yet.</p>".to_string()
    } else {
        context
            .files
            .iter()
            .map(|f| {
                let detail = match &f.metadata {
                    FileMetadata::Table { rows, columns } => format!("{} rows, {} columns", rows, columns.len()),
                    FileMetadata::Document { chunks } => format!("{} chunks", chunks),
                };
                let kind = match f.kind {
                    FileKind::Csv => "table",
                    FileKind::Pdf => "pdf",
                };
                format!(
                    r#"<li>
  <label><input type="checkbox" name="selected_files" value="{name}" form="ask" /> {name}</label>
  <span class="meta">{kind}, {detail}</span>
  <form method="post" enctype="multipart/form-data" class="inline">
    <input type="hidden" name="action" value="delete_file" />
    <input type="hidden" name="file_name" value="{name}" />
    <button>Delete</button>
  </form>
</li>
"#,
                    name = escape_html(&f.name),
                    kind = kind,
                    detail = detail,
                )
            })
            .collect::<String>()
    };

    let answer = match &context.answer {
        Some(answer) => {
            let sources: String = answer
                .sources
                .iter()
                .map(|s| {
                    format!(
                        "<li><strong>{}</strong>, page {}: {}</li>\n",
                        escape_html(&s.source),
                        s.page,
                        escape_html(&s.content)
                    )
                })
                .collect();
            format!(
                r#"<div class="card">
  <h2>Answer</h2>
  <p class="meta">{question} ({files})</p>
  {prose}
  {table}
  {sources}
</div>"#,
                question = escape_html(&answer.question),
                files = escape_html(&answer.files_used.join(", ")),
                prose = answer.prose_html,
                table = answer.table_html.as_deref().unwrap_or(""),
                sources = if sources.is_empty() {
                    String::new()
                } else {
                    format!("<h3>Sources</h3>\n<ul class=\"sources\">\n{}</ul>", sources)
                },
            )
        }
        None => String::new(),
    };

    let history: String = context
        .history
        .iter()
        .rev()
        .map(|turn| {
            format!(
                "<li><strong>{}</strong><pre>{}</pre></li>\n",
                escape_html(&turn.question),
                escape_html(&turn.response)
            )
        })
        .collect();

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Tabrick - Ask your files</title>
  <style>
    body {{ font-family: Arial, sans-serif; margin: 2rem; color: #1d1d1f; }}
    .card {{ border: 1px solid #ddd; padding: 1rem; border-radius: 8px; margin-bottom: 1rem; }}
    label {{ display: block; margin-top: 0.5rem; }}
    input[type=text], textarea {{ width: 100%; padding: 0.5rem; }}
    button {{ margin-top: 0.5rem; padding: 0.4rem 0.8rem; }}
    form.inline {{ display: inline; }}
    .meta {{ color: #666; font-size: 0.9rem; }}
    .status {{ padding: 0.5rem; border-radius: 4px; margin-bottom: 0.5rem; }}
    .status.success {{ background: #e6f4ea; }}
    .status.info {{ background: #e8f0fe; }}
    .status.warning {{ background: #fef7e0; }}
    .status.error {{ background: #fce8e6; }}
    table.answer-table {{ border-collapse: collapse; margin-top: 1rem; }}
    table.answer-table th, table.answer-table td {{ border: 1px solid #ccc; padding: 0.3rem 0.6rem; }}
    pre {{ background: #f6f8fa; padding: 0.5rem; white-space: pre-wrap; }}
  </style>
</head>
<body>
  <h1>Tabrick</h1>
  <p>Upload CSV, Excel or PDF files, then ask questions about them.</p>
  {status}
  <div class="card">
    <h2>Upload</h2>
    <form method="post" enctype="multipart/form-data">
      <input type="hidden" name="action" value="upload_file" />
      <input type="file" name="file" accept=".csv,.tsv,.txt,.xls,.xlsx,.xlsm,.ods,.pdf" />
      <button>Upload</button>
    </form>
  </div>

  <div class="card">
    <h2>Loaded files</h2>
    <ul>
{files}    </ul>
    <form method="post" enctype="multipart/form-data" class="inline">
      <input type="hidden" name="action" value="reset_chroma" />
      <button>Reset document index</button>
    </form>
  </div>

  <div class="card">
    <h2>Ask</h2>
    <form id="ask" method="post" enctype="multipart/form-data">
      <input type="hidden" name="action" value="ask_question" />
      <label>Question</label>
      <input type="text" name="question" />
      <label>Context (optional)</label>
      <textarea name="context" rows="2"></textarea>
      <label>Question for the PDF documents (optional)</label>
      <input type="text" name="pdf_query" />
      <p class="meta">Tick files above to restrict the question; none ticked means all files.</p>
      <button>Ask</button>
    </form>
  </div>

  {answer}

  <div class="card">
    <h2>Conversation</h2>
    <ul>
{history}    </ul>
    <form method="post" enctype="multipart/form-data">
      <input type="hidden" name="action" value="clear_conversation" />
      <button>Clear conversation</button>
    </form>
  </div>
</body>
</html>
"#,
        status = status,
        files = files,
        answer = answer,
        history = history,
    )
}
