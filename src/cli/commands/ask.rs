//! Ask command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::KihubError;
use crate::orchestrator::{Orchestrator, QueryRequest};
use crate::rag::{Answer, AnswerStream};
use anyhow::Result;
use futures::StreamExt;
use std::io::{self, Write};

/// Run the ask command.
pub async fn run_ask(
    question: &str,
    web: bool,
    k: Option<usize>,
    max_web_results: Option<usize>,
    settings: Settings,
) -> Result<()> {
    match preflight::check(Operation::Ask { web }, &settings) {
        Ok(report) => report.warnings.iter().for_each(|w| Output::warning(w)),
        Err(e) => {
            Output::error(&format!("{}", e));
            return Err(e.into());
        }
    }

    let request = QueryRequest::new(question)
        .with_web(web)
        .with_k(k.unwrap_or(settings.retrieval.top_k))
        .with_max_web_results(max_web_results.unwrap_or(settings.retrieval.max_web_results));

    let orchestrator = Orchestrator::new(settings)?;

    let spinner = Output::spinner("Searching knowledge base...");
    let response = orchestrator.query(request, &[]).await;
    spinner.finish_and_clear();

    let response = match response {
        Ok(response) => response,
        Err(KihubError::InvalidArgument(msg)) => {
            Output::warning(&msg);
            return Ok(());
        }
        Err(e) => {
            Output::error(&format!("Failed to answer: {}", e));
            return Err(e.into());
        }
    };

    println!();
    let answer = print_answer(response.answer).await?;
    if !answer.complete {
        anyhow::bail!("Answer generation was interrupted");
    }
    Ok(())
}

/// Print tokens as they arrive, then the sources.
///
/// A generation failure keeps the partial answer on screen and reports the
/// error below it.
pub(super) async fn print_answer(mut stream: AnswerStream) -> Result<Answer> {
    let mut stdout = io::stdout();
    while let Some(token) = stream.next().await {
        match token {
            Ok(token) => {
                print!("{}", token);
                stdout.flush()?;
            }
            Err(e) => {
                println!();
                let partial = e.partial_answer().unwrap_or_default();
                Output::warning(&format!(
                    "{} (answer above is partial, {} chars)",
                    e,
                    partial.chars().count()
                ));
            }
        }
    }
    println!();

    let answer = stream.finish().await;
    Output::sources(answer.format_sources().trim_start());
    Ok(answer)
}
