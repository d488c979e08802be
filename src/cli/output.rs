//! CLI output formatting utilities.

use crate::vector_store::{IndexedDocument, ScoredChunk};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print one indexed document.
    pub fn document_info(doc: &IndexedDocument) {
        println!(
            "  {} {} ({}, {} chunks, {} chars, {})",
            style("*").cyan(),
            style(&doc.source_name).bold(),
            style(&doc.document_id).dim(),
            doc.chunk_count,
            doc.char_count,
            doc.indexed_at.format("%Y-%m-%d %H:%M")
        );
    }

    /// Print a search hit.
    pub fn search_result(hit: &ScoredChunk) {
        println!(
            "\n{} {} @ chars {}-{} (score: {:.3})",
            style(">>").green(),
            style(&hit.chunk.source_name).bold(),
            style(hit.chunk.start).cyan(),
            style(hit.chunk.end).cyan(),
            hit.score
        );
        println!("   {}", content_preview(&hit.chunk.text, 200));
    }

    /// Print the numbered sources block under an answer.
    pub fn sources(block: &str) {
        if block.is_empty() {
            return;
        }
        println!("\n{}", style(block).dim());
    }

    /// Create a progress bar.
    pub fn progress_bar(len: u64, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        if let Ok(template) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(template.progress_chars("#>-"));
        }
        pb.set_message(msg.to_string());
        pb
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(template);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Collapse newlines and cut to `max_chars` characters.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    match content.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &content[..byte]),
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_preview() {
        assert_eq!(content_preview("short\ntext", 20), "short text");
        assert_eq!(content_preview("abcdef", 3), "abc...");
        assert_eq!(content_preview("æøåæøå", 4), "æøåæ...");
    }
}
