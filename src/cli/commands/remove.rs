//! Remove command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::error::KihubError;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the remove command.
pub async fn run_remove(document_id: &str, settings: Settings) -> Result<()> {
    match Orchestrator::remove_stored_document(&settings, document_id) {
        Ok(removed) => {
            Output::success(&format!("Removed {} ({} chunks)", document_id, removed));
            Ok(())
        }
        Err(KihubError::DocumentNotFound(_)) => {
            Output::warning(&format!("No document with id {}. Run 'kihub list' to see ids.", document_id));
            anyhow::bail!("Document not found: {}", document_id)
        }
        Err(e) => {
            Output::error(&format!("Failed to remove {}: {}", document_id, e));
            Err(e.into())
        }
    }
}
