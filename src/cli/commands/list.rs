//! List command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the list command.
///
/// Reads the index directly, so it works without any API key.
pub async fn run_list(settings: Settings) -> Result<()> {
    let index = Orchestrator::open_index(&settings)?;

    match index.documents() {
        Ok(documents) => {
            if documents.is_empty() {
                Output::info("No documents indexed yet. Use 'kihub ingest <file>' to add content.");
            } else {
                Output::header(&format!("Indexed Documents ({})", documents.len()));
                println!();

                for doc in &documents {
                    Output::document_info(doc);
                }

                let total_chunks: usize = documents.iter().map(|d| d.chunk_count).sum();
                println!();
                Output::kv("Total documents", &documents.len().to_string());
                Output::kv("Total chunks", &total_chunks.to_string());
            }
        }
        Err(e) => {
            Output::error(&format!("Failed to list documents: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
