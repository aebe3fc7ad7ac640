//! Table Agent
//!
//! Answers a composed prompt by letting the model call the table tools
//! against one combined table until it produces a final text answer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agents::table_tools;
use crate::data_registry::CombinedTable;
use crate::llm::LLM;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

const SYSTEM_PROMPT: &str = "You are a careful data analyst working with a single dataframe. \
Use the provided tools to inspect and compute over the full table before answering. \
Never guess values you have not computed. Answer in markdown.";

/// Something that can answer a prompt about one table
#[async_trait]
pub trait AnswerAgent: Send + Sync {
    async fn answer(&self, prompt: &str, table: &CombinedTable) -> AppResult<String>;
}

pub struct TableAgent {
    llm: Arc<LLM>,
    model: String,
    temperature: f32,
    max_steps: usize,
}

impl TableAgent {
    pub fn new(llm: Arc<LLM>, model: impl Into<String>, temperature: f32, max_steps: usize) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
            max_steps: max_steps.max(1),
        }
    }
}

#[async_trait]
impl AnswerAgent for TableAgent {
    async fn answer(&self, prompt: &str, table: &CombinedTable) -> AppResult<String> {
        info!(
            prompt_len = prompt.len(),
            columns = table.frame().width(),
            rows = table.row_count(),
            "Running table agent"
        );

        let tools = table_tools::tool_specs();
        let mut messages = vec![LLMMessage::system(SYSTEM_PROMPT), LLMMessage::user(prompt)];

        for step in 0..self.max_steps {
            let mut request = LLMRequest::new(&self.model, messages.clone());
            request.temperature = Some(self.temperature);
            request.tools = tools.clone();

            let response = self.llm.create_chat_completion(&request).await?;
            if response.tool_calls.is_empty() {
                info!(step, response_len = response.content.len(), "Table agent finished");
                return Ok(response.content);
            }

            messages.push(LLMMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let output = table_tools::execute(table, &call.name, &call.arguments);
                debug!(step, tool = %call.name, arguments = %call.arguments, "Tool call executed");
                messages.push(LLMMessage::tool(&call.id, output));
            }
        }

        warn!(max_steps = self.max_steps, "Table agent ran out of steps");
        Err(AppError::ExternalService(format!(
            "the agent did not reach an answer within {} steps",
            self.max_steps
        )))
    }
}
