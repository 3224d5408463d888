//! Terminal output for the command-line interface.
//!
//! Tables are rendered with comfy-table and status lines are colored with
//! owo-colors when stdout is a terminal.

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Table};
use owo_colors::OwoColorize;
use std::io::IsTerminal;

use crate::aggregator::{AggregatedResults, BibtexSlot};
use crate::models::{CitationGraph, PaperRecord};
use crate::utils::CacheStats;

/// Check if stdout is a terminal.
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Status types for colored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
    Info,
}

/// Status icons for different outcomes.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Error => "✗",
        Status::Warning => "⚠",
        Status::Info => "ℹ",
    }
}

/// Print a status line to stderr so stdout stays machine-readable
pub fn print_status(status: Status, message: &str) {
    let icon = status_icon(status);
    match status {
        Status::Success => eprintln!("{} {}", icon.green(), message),
        Status::Error => eprintln!("{} {}", icon.red(), message.red()),
        Status::Warning => eprintln!("{} {}", icon.yellow(), message),
        Status::Info => eprintln!("{} {}", icon.cyan(), message),
    }
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", format!("━━━ {} ━━━", title).bold().cyan());
}

/// Truncate `text` to at most `max_width` characters, ending with an ellipsis
pub fn truncate_with_ellipsis(text: &str, max_width: usize) -> String {
    if text.chars().count() <= max_width {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_width.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header);
    table
}

fn authors_cell(paper: &PaperRecord) -> String {
    let names = paper.author_names();
    match names.len() {
        0 => String::new(),
        1..=2 => names.join(", "),
        _ => format!("{} et al.", names[0]),
    }
}

/// Table of papers with their identifiers and catalogs
pub fn papers_table(papers: &[PaperRecord]) -> Table {
    let mut table = new_table(vec!["#", "Title", "Authors", "Year", "Venue", "Cited", "DOI", "Sources"]);
    for (i, paper) in papers.iter().enumerate() {
        let sources = paper
            .source_ids
            .keys()
            .map(|k| k.id())
            .collect::<Vec<_>>()
            .join(",");
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(truncate_with_ellipsis(&paper.title, 60)).add_attribute(Attribute::Bold),
            Cell::new(truncate_with_ellipsis(&authors_cell(paper), 30)),
            Cell::new(paper.year.map(|y| y.to_string()).unwrap_or_default()),
            Cell::new(truncate_with_ellipsis(paper.venue.as_deref().unwrap_or(""), 25)),
            Cell::new(paper.citation_count.map(|c| c.to_string()).unwrap_or_default()),
            Cell::new(paper.doi.as_deref().unwrap_or("")),
            Cell::new(sources),
        ]);
    }
    table
}

/// Print merged search results, then any per-source failures
pub fn print_results(results: &AggregatedResults) {
    println!("{}", papers_table(&results.papers));
    let answered = results
        .succeeded
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(", ");
    print_status(
        Status::Info,
        &format!("{} papers from {}", results.papers.len(), answered),
    );
    for failure in &results.failures {
        print_status(Status::Warning, &failure.to_string());
    }
}

/// Print a single record as labelled lines
pub fn print_paper(paper: &PaperRecord) {
    println!("{}", paper.title.bold());
    let authors = paper.author_names().join(", ");
    if !authors.is_empty() {
        println!("  {} {}", "Authors:".dimmed(), authors);
    }
    let fields = [
        ("Year:", paper.year.map(|y| y.to_string())),
        ("Venue:", paper.venue.clone()),
        ("Volume:", paper.volume.clone()),
        ("Pages:", paper.pages.clone()),
        ("DOI:", paper.doi.clone()),
        ("arXiv:", paper.arxiv_id.clone()),
        ("Cited by:", paper.citation_count.map(|c| c.to_string())),
        ("URL:", paper.url.clone()),
        ("PDF:", paper.pdf_url.clone()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("  {} {}", label.dimmed(), value);
        }
    }
    for (kind, id) in &paper.source_ids {
        println!("  {} {}", format!("{}:", kind.name()).dimmed(), id);
    }
    if let Some(text) = &paper.r#abstract {
        println!();
        println!("{}", text);
    }
}

/// Print rendered BibTeX entries, reporting failed slots on stderr
pub fn print_bibtex_slots(slots: &[BibtexSlot]) {
    for slot in slots {
        match &slot.result {
            Ok(entry) => {
                println!("{}", entry.render());
                println!();
            }
            Err(e) => print_status(Status::Error, &format!("{}: {}", slot.input, e)),
        }
    }
}

/// Nodes of a citation graph plus a summary line
pub fn print_graph(graph: &CitationGraph) {
    let mut table = new_table(vec!["Id", "Title", "Year", "Cited", "Out", "In"]);
    for node in graph.nodes.values() {
        let out = graph.edges.iter().filter(|e| e.source == node.id).count();
        let incoming = graph.edges.iter().filter(|e| e.target == node.id).count();
        let mut id = Cell::new(&node.id);
        if node.id == graph.seed {
            id = id.add_attribute(Attribute::Bold);
        }
        table.add_row(vec![
            id,
            Cell::new(truncate_with_ellipsis(&node.title, 60)),
            Cell::new(node.year.map(|y| y.to_string()).unwrap_or_default()),
            Cell::new(node.citation_count.map(|c| c.to_string()).unwrap_or_default()),
            Cell::new(out),
            Cell::new(incoming),
        ]);
    }
    println!("{table}");
    print_status(
        Status::Info,
        &format!(
            "{} nodes, {} edges around {} (depth {})",
            graph.node_count(),
            graph.edge_count(),
            graph.seed,
            graph.depth
        ),
    );
}

/// Per source and operation cache counters
pub fn cache_stats_table(stats: &CacheStats) -> Table {
    let mut table = new_table(vec!["Source", "Operation", "Hits", "Misses", "Evictions", "Hit rate"]);
    for op in &stats.operations {
        table.add_row(vec![
            Cell::new(op.source.name()),
            Cell::new(op.operation.as_str()),
            Cell::new(op.hits),
            Cell::new(op.misses),
            Cell::new(op.evictions),
            Cell::new(format!("{:.1}%", op.hit_rate * 100.0)),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaperBuilder, SourceKind};

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("a rather long title", 10), "a rathe...");
        assert_eq!(truncate_with_ellipsis("Übersicht über alles", 8), "Übers...");
    }

    #[test]
    fn test_papers_table_lists_sources() {
        let paper = PaperBuilder::new("Deep Learning", SourceKind::OpenAlex, "W1")
            .author_names(["Yann LeCun", "Yoshua Bengio", "Geoffrey Hinton"])
            .year(Some(2015))
            .source_id(SourceKind::Dblp, "journals/nature/LeCunBH15")
            .build();

        let rendered = papers_table(&[paper]).to_string();
        assert!(rendered.contains("Deep Learning"));
        assert!(rendered.contains("Yann LeCun et al."));
        assert!(rendered.contains("openalex,dblp"));
    }
}
