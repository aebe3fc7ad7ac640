//! Response formatting.
//!
//! Model answers are markdown that may carry a pipe table. The first
//! complete table is lifted out and rendered as an HTML table of its own;
//! the rest of the text is rendered as HTML prose.

use std::sync::LazyLock;

use pulldown_cmark::{html, Event, Options, Parser};
use regex::Regex;
use serde::Serialize;

/// Header row, dash separator row, then one or more data rows
static PIPE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*\|.*\|[ \t]*\r?\n[ \t]*\|(?:[ \t]*:?-+:?[ \t]*\|)+[ \t]*\r?\n(?:[ \t]*\|.*\|[ \t]*(?:\r?\n|\z))+",
    )
    .expect("pipe table pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormattedAnswer {
    pub prose_html: String,
    pub table_html: Option<String>,
}

/// Split the first markdown pipe table out of `text`.
///
/// Returns the remaining prose (trimmed, still markdown) and the table as
/// HTML. Text without a table comes back unchanged with `None`.
pub fn split_table(text: &str) -> (String, Option<String>) {
    let Some(found) = PIPE_TABLE.find(text) else {
        return (text.to_string(), None);
    };

    let mut lines = found.as_str().lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().map(split_cells).unwrap_or_default();
    let body: Vec<Vec<String>> = lines.skip(1).map(split_cells).collect();

    let prose = format!("{}\n{}", &text[..found.start()], &text[found.end()..]);
    (prose.trim().to_string(), Some(table_to_html(&header, &body)))
}

/// Render markdown prose to HTML. Raw HTML in the input is shown as text.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Split then render
pub fn format_answer(text: &str) -> FormattedAnswer {
    let (prose, table_html) = split_table(text);
    FormattedAnswer {
        prose_html: render_markdown(&prose),
        table_html,
    }
}

fn split_cells(line: &str) -> Vec<String> {
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn table_to_html(header: &[String], body: &[Vec<String>]) -> String {
    let mut out = String::from("<table class=\"answer-table\">\n<thead>\n<tr>");
    for cell in header {
        out.push_str(&format!("<th>{}</th>", escape_html(cell)));
    }
    out.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in body {
        out.push_str("<tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>");
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "Average rent by city:\n\n| City | Rent |\n|------|------|\n| Lisbon | 1200 |\n| Porto |  900 |\n\nLisbon is the most expensive.";

    #[test]
    fn test_single_table_is_extracted() {
        let (prose, table) = split_table(ANSWER);
        let table = table.expect("table should be found");

        assert!(table.contains("<th>City</th><th>Rent</th>"));
        assert!(table.contains("<td>Lisbon</td><td>1200</td>"));
        assert!(table.contains("<td>Porto</td><td>900</td>"));
        assert!(!prose.contains('|'));
        assert!(prose.starts_with("Average rent by city:"));
        assert!(prose.ends_with("Lisbon is the most expensive."));
    }

    #[test]
    fn test_text_without_table_is_unchanged() {
        let text = "There are 42 rows.\nNo table here | just a pipe.";
        let (prose, table) = split_table(text);
        assert_eq!(prose, text);
        assert!(table.is_none());
    }

    #[test]
    fn test_only_first_table_is_extracted() {
        let text = "| a |\n|---|\n| 1 |\n\nthen\n\n| b |\n|---|\n| 2 |\n";
        let (prose, table) = split_table(text);
        assert!(table.unwrap().contains("<th>a</th>"));
        assert!(prose.contains("| b |"));
    }

    #[test]
    fn test_table_at_end_of_text_without_newline() {
        let (prose, table) = split_table("Result:\n| x | y |\n| :---: | ---: |\n| 1 | 2 |");
        assert_eq!(prose, "Result:");
        assert!(table.unwrap().contains("<td>1</td><td>2</td>"));
    }

    #[test]
    fn test_short_separator_dashes() {
        let (prose, table) = split_table("Counts:\n|a|b|\n|--|--|\n|1|2|\n");
        let table = table.unwrap();
        assert!(table.contains("<th>a</th><th>b</th>"));
        assert!(table.contains("<td>1</td><td>2</td>"));
        assert_eq!(prose.trim(), "Counts:");

        let (_, single) = split_table("| a |\n|-|\n| 1 |\n");
        assert!(single.unwrap().contains("<td>1</td>"));
    }

    #[test]
    fn test_cells_are_escaped() {
        let (_, table) = split_table("| name |\n|---|\n| <b>x</b> & y |\n");
        let table = table.unwrap();
        assert!(table.contains("<td>&lt;b&gt;x&lt;/b&gt; &amp; y</td>"));
    }

    #[test]
    fn test_escaped_pipe_stays_in_cell() {
        assert_eq!(split_cells("| a\\|b | c |"), vec!["a|b", "c"]);
    }

    #[test]
    fn test_header_without_separator_is_not_a_table() {
        let (_, table) = split_table("| a | b |\n| 1 | 2 |\n");
        assert!(table.is_none());
    }

    #[test]
    fn test_format_answer_renders_prose() {
        let formatted = format_answer(ANSWER);
        assert!(formatted.prose_html.contains("<p>Average rent by city:</p>"));
        assert!(formatted.table_html.is_some());
    }

    #[test]
    fn test_raw_html_is_not_passed_through() {
        let html = render_markdown("hello <script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_render_markdown_emphasis() {
        assert_eq!(render_markdown("**bold**").trim(), "<p><strong>bold</strong></p>");
    }
}
