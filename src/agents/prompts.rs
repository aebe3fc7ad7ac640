//! Prompt composition for table and document questions.

use crate::conversation::ConversationTurn;
use crate::data_registry::CombinedTable;

/// Inputs shared by every prompt variant
pub struct PromptInput<'a> {
    pub question: &'a str,
    pub context: &'a str,
    pub history: &'a [ConversationTurn],
}

/// Row count, column list and the first `sample_rows` rows as a markdown table.
/// The sample never exceeds `sample_rows`, whatever the table size.
pub fn table_summary(table: &CombinedTable, sample_rows: usize) -> String {
    let columns = table.columns();
    let sample = table.text_rows(0, sample_rows);
    let mut out = format!(
        "Rows: {}\nColumns ({}): {}\n\nSample (first {} rows):\n",
        table.row_count(),
        columns.len(),
        columns.join(", "),
        sample.len(),
    );

    out.push_str(&markdown_row(&columns));
    out.push_str(&markdown_row(&vec!["---".to_string(); columns.len()]));
    for row in &sample {
        out.push_str(&markdown_row(row));
    }
    out
}

fn markdown_row(cells: &[String]) -> String {
    let escaped: Vec<String> = cells.iter().map(|c| c.replace('|', "\\|")).collect();
    format!("| {} |\n", escaped.join(" | "))
}

fn history_section(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return "No previous questions in this conversation.".to_string();
    }
    history
        .iter()
        .map(|turn| format!("User: {}\nAssistant: {}", turn.question, turn.response))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn context_section(context: &str) -> String {
    let context = context.trim();
    if context.is_empty() {
        "No additional context provided.".to_string()
    } else {
        context.to_string()
    }
}

/// Prompt for a question about tables only
pub fn compose_table_prompt(input: &PromptInput<'_>, table: &CombinedTable, sample_rows: usize) -> String {
    format!(
        r#"You are a data analyst answering questions about a dataframe you can query with your tools.

USER CONTEXT:
{context}

PREVIOUS CONVERSATION:
{history}

TABLE SUMMARY:
{summary}

IMPORTANT:
- The sample above shows only the first rows. You have access to all {rows} rows through your tools.
- Compute every statistic (counts, sums, averages, medians, distributions) over the whole dataset, never over the sample alone.
- Column names are prefixed with the file they came from.
- When a tabular answer helps, include one markdown table.

QUESTION: {question}"#,
        context = context_section(input.context),
        history = history_section(input.history),
        summary = table_summary(table, sample_rows),
        rows = table.row_count(),
        question = input.question,
    )
}

/// Prompt combining findings from PDF documents with the loaded tables
pub fn compose_combined_prompt(
    input: &PromptInput<'_>,
    pdf_findings: &str,
    table: &CombinedTable,
    sample_rows: usize,
) -> String {
    format!(
        r#"You are a data analyst combining information from documents with tabular data you can query with your tools.

USER CONTEXT:
{context}

PREVIOUS CONVERSATION:
{history}

FINDINGS FROM THE PDF DOCUMENTS:
{findings}

TABLE SUMMARY:
{summary}

IMPORTANT:
- The sample above shows only the first rows. You have access to all {rows} rows through your tools.
- Apply statistical methods to the whole dataset, never to the sample alone.
- Relate the document findings to what the data shows, and say so when they disagree.
- Column names are prefixed with the file they came from.
- When a tabular answer helps, include one markdown table.

QUESTION: {question}"#,
        context = context_section(input.context),
        history = history_section(input.history),
        findings = pdf_findings.trim(),
        summary = table_summary(table, sample_rows),
        rows = table.row_count(),
        question = input.question,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_registry::test_support::combined;
    use crate::data_registry::TableStore;
    use std::collections::BTreeSet;

    fn big_table(rows: usize) -> CombinedTable {
        let mut csv = String::from("n,sq\n");
        for i in 0..rows {
            csv.push_str(&format!("{},{}\n", i, i * i));
        }
        combined("big.csv", &csv)
    }

    fn input<'a>(question: &'a str, history: &'a [ConversationTurn]) -> PromptInput<'a> {
        PromptInput {
            question,
            context: "",
            history,
        }
    }

    #[test]
    fn test_sample_is_capped_for_large_tables() {
        let summary = table_summary(&big_table(10_000), 5);
        // header + separator + 5 sample rows
        assert_eq!(summary.lines().filter(|l| l.starts_with('|')).count(), 7);
        assert!(summary.contains("Rows: 10000"));
        assert!(summary.contains("| 4 | 16 |"));
        assert!(!summary.contains("| 5 | 25 |"));
    }

    #[test]
    fn test_small_table_shows_every_row() {
        let summary = table_summary(&big_table(2), 5);
        assert!(summary.contains("Sample (first 2 rows)"));
        assert_eq!(summary.lines().filter(|l| l.starts_with('|')).count(), 4);
    }

    #[test]
    fn test_prefixed_columns_and_rows_appear_in_prompt() {
        let mut store = TableStore::new();
        store.ingest(b"id;name\n1;Ana\n2;Bruno\n", "a.csv").unwrap();
        let table = store.get(&store.names()).unwrap();

        let prompt = compose_table_prompt(&input("Who is listed?", &[]), &table, 5);
        assert!(prompt.contains("a.csv_id"));
        assert!(prompt.contains("a.csv_name"));
        assert!(prompt.contains("| 1 | Ana |"));
        assert!(prompt.contains("| 2 | Bruno |"));
        assert!(prompt.contains("QUESTION: Who is listed?"));
    }

    #[test]
    fn test_combined_prompt_mentions_findings_and_full_access() {
        let prompt = compose_combined_prompt(
            &input("Does the data match the report?", &[]),
            "The report claims rents rose 10%.",
            &big_table(50),
            5,
        );
        assert!(prompt.contains("The report claims rents rose 10%."));
        assert!(prompt.contains("access to all 50 rows"));
        assert!(prompt.contains("whole dataset"));
        assert!(prompt.contains("QUESTION: Does the data match the report?"));
    }

    #[test]
    fn test_history_and_context_are_included() {
        let history = vec![ConversationTurn::new("How many rows?", "There are 50.", BTreeSet::new())];
        let prompt = compose_table_prompt(
            &PromptInput {
                question: "And columns?",
                context: "Rental listings from 2023",
                history: &history,
            },
            &big_table(50),
            5,
        );
        assert!(prompt.contains("User: How many rows?"));
        assert!(prompt.contains("Assistant: There are 50."));
        assert!(prompt.contains("Rental listings from 2023"));
    }

    #[test]
    fn test_pipes_in_cells_are_escaped() {
        let table = combined("t.csv", "v;w\na|b;1\n");
        assert!(table_summary(&table, 5).contains("| a\\|b |"));
    }
}
