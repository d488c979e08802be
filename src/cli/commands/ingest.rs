//! Ingest command implementation.

use crate::chunking::ChunkingConfig;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::document::DocumentPayload;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use std::path::Path;

/// Run the ingest command.
pub async fn run_ingest(
    files: &[String],
    chunk_size: Option<usize>,
    overlap: Option<usize>,
    id: Option<String>,
    settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Ingest, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    if id.is_some() && files.len() != 1 {
        anyhow::bail!("--id re-ingests exactly one file");
    }

    let mut config = ChunkingConfig::from(&settings.chunking);
    if let Some(size) = chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = overlap {
        config.overlap = overlap;
    }
    config.validate()?;

    let orchestrator = Orchestrator::new(settings)?;

    let pb = Output::progress_bar(files.len() as u64, "Reading");
    let mut payloads = Vec::with_capacity(files.len());
    let mut failed = 0usize;

    for file in files {
        let path = Settings::expand_path(file);
        pb.set_message(display_name(&path));
        match DocumentPayload::from_path(&path) {
            Ok(payload) => payloads.push(match &id {
                Some(id) => payload.with_id(id.clone()),
                None => payload,
            }),
            Err(e) => {
                pb.suspend(|| Output::error(&format!("{}: {}", file, e)));
                failed += 1;
                pb.inc(1);
            }
        }
    }

    pb.set_message("Indexing");
    let reports = orchestrator
        .ingest_with(payloads, config, |report| {
            pb.set_message(report.source_name.clone());
            pb.inc(1);
        })
        .await?;
    pb.finish_and_clear();

    let mut indexed = 0usize;
    for report in &reports {
        if report.is_ok() {
            indexed += 1;
            Output::success(&format!(
                "{} ({} chunks, {} chars) id={}",
                report.source_name,
                report.chunks,
                report.chars,
                report.document_id.as_deref().unwrap_or("-")
            ));
        } else {
            failed += 1;
            Output::error(&format!(
                "{}: {}",
                report.source_name,
                report.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    Output::kv("Indexed", &indexed.to_string());
    if failed > 0 {
        Output::kv("Failed", &failed.to_string());
        anyhow::bail!("{} of {} documents failed to ingest", failed, files.len());
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
