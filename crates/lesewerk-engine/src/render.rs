// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output formats for an extraction outcome: JSON, Markdown and HTML.

use lesewerk_core::error::Result;
use lesewerk_core::types::{ExtractionOutcome, RunStatus, Table};
use lesewerk_document::table;

/// Pretty-printed JSON of the whole outcome.
pub fn to_json(outcome: &ExtractionOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(outcome)?)
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Done => "done",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled (partial result)",
    }
}

fn span(table: &Table) -> String {
    match (table.pages.first(), table.pages.last()) {
        (Some(first), Some(last)) if first != last => format!("pages {first}-{last}"),
        _ => format!("page {}", table.page),
    }
}

/// Text, then tables, then warnings.
pub fn to_markdown(outcome: &ExtractionOutcome) -> String {
    let mut md = String::from("# Extracted Document\n\n");
    md.push_str(&format!("**Pages:** {}\n\n", outcome.quality.total_pages));
    md.push_str(&format!(
        "**Status:** {} | **Quality:** {:.2}\n\n",
        status_label(outcome.status),
        outcome.quality.overall
    ));

    if !outcome.text.is_empty() {
        md.push_str("## Text Content\n\n");
        md.push_str(&outcome.text);
        md.push_str("\n\n");
    }

    if !outcome.tables.is_empty() {
        md.push_str(&format!("## Tables ({})\n\n", outcome.tables.len()));
        for (i, t) in outcome.tables.iter().enumerate() {
            md.push_str(&format!("### Table {} ({})\n\n", i + 1, span(t)));
            md.push_str(&table::to_markdown(t));
            md.push_str("\n\n");
        }
    }

    let warnings = &outcome.quality.warnings;
    if !warnings.is_empty() {
        md.push_str(&format!("## Warnings ({})\n\n", warnings.len()));
        for w in warnings {
            md.push_str(&format!("- {} {}\n", w.message, w.suggestion));
        }
        md.push('\n');
    }
    md
}

/// Every table as an HTML `<table>`, each under a heading.
pub fn tables_to_html(tables: &[Table]) -> String {
    let mut html = String::new();
    for (i, t) in tables.iter().enumerate() {
        html.push_str(&format!("<h3>Table {} ({})</h3>\n", i + 1, span(t)));
        html.push_str(&table::to_html(t));
        html.push('\n');
    }
    html
}

/// A standalone HTML page with the text and tables.
pub fn to_html(outcome: &ExtractionOutcome) -> String {
    let mut html = String::from("<html><body>\n<h1>Extracted Document</h1>\n");
    html.push_str(&format!("<p>Pages: {}</p>\n", outcome.quality.total_pages));

    if !outcome.text.is_empty() {
        html.push_str("<h2>Text Content</h2>\n");
        for paragraph in outcome.text.split("\n\n") {
            html.push_str(&format!(
                "<p>{}</p>\n",
                table::escape_html(paragraph).replace('\n', "<br>")
            ));
        }
    }

    if !outcome.tables.is_empty() {
        html.push_str(&format!("<h2>Tables ({})</h2>\n", outcome.tables.len()));
        html.push_str(&tables_to_html(&outcome.tables));
    }
    html.push_str("</body></html>\n");
    html
}
