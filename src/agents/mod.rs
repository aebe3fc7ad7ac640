//! Answer agents
//!
//! - **Prompts**: builds the instruction text for table-only and PDF+table questions
//! - **Table tools**: in-process operations the model may call over the combined table
//! - **Table agent**: the function-calling loop tying the two together
//!
//! ```text
//! Question + selected tables
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Prompts   │  → summary + sample + history
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │ Table Agent │  ⇄ table tools (full rows)
//! └─────────────┘
//!      │
//!      ▼
//!  Markdown answer
//! ```

pub mod prompts;
pub mod table_agent;
pub mod table_tools;

pub use prompts::{compose_combined_prompt, compose_table_prompt, table_summary, PromptInput};
pub use table_agent::{AnswerAgent, TableAgent};
