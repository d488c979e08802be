//! Pre-flight checks before expensive operations.
//!
//! Validates that required API keys are configured before starting
//! operations that would otherwise fail midway.

use crate::config::{EmbeddingProviderKind, Settings};
use crate::error::Result;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Ingestion needs the embedding provider.
    Ingest,
    /// Asking questions needs embeddings and the language model.
    Ask { web: bool },
    /// Search needs embeddings only.
    Search,
}

/// Non-fatal findings from a pre-flight check.
#[derive(Debug, Default)]
pub struct Preflight {
    pub warnings: Vec<String>,
}

/// Run pre-flight checks for the given operation.
///
/// Returns an error for anything that would make the operation fail, and
/// collects warnings for features that will be silently skipped.
pub fn check(operation: Operation, settings: &Settings) -> Result<Preflight> {
    let mut report = Preflight::default();
    match operation {
        Operation::Ingest | Operation::Search => {
            check_embedding(settings)?;
        }
        Operation::Ask { web } => {
            check_embedding(settings)?;
            Settings::api_key(&settings.generation.api_key_env)?;
            if web {
                if !settings.web_search.enabled {
                    report
                        .warnings
                        .push("Web search is disabled in the configuration".to_string());
                } else if let Err(e) = Settings::api_key(&settings.web_search.api_key_env) {
                    report.warnings.push(format!("Web search unavailable: {}", e));
                }
            }
        }
    }
    Ok(report)
}

fn check_embedding(settings: &Settings) -> Result<()> {
    if settings.embedding.provider == EmbeddingProviderKind::OpenAI {
        Settings::api_key(&settings.embedding.api_key_env)?;
    }
    Ok(())
}
