//! Interactive chat command.

use super::ask::print_answer;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::KihubError;
use crate::orchestrator::{Orchestrator, QueryRequest};
use crate::rag::Conversation;
use anyhow::Result;
use console::style;
use std::io::{self, BufRead, Write};

/// Run the interactive chat command.
pub async fn run_chat(web: bool, k: Option<usize>, settings: Settings) -> Result<()> {
    match preflight::check(Operation::Ask { web }, &settings) {
        Ok(report) => report.warnings.iter().for_each(|w| Output::warning(w)),
        Err(e) => {
            Output::error(&format!("{}", e));
            return Err(e.into());
        }
    }

    let k = k.unwrap_or(settings.retrieval.top_k);
    let max_web_results = settings.retrieval.max_web_results;
    let mut conversation = Conversation::new(settings.generation.max_history_messages);
    let orchestrator = Orchestrator::new(settings)?;

    println!("\n{}", style("kihub chat").bold().cyan());
    println!(
        "{}\n",
        style("Type your questions, or 'exit' to quit. Use 'clear' to reset conversation.").dim()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Output::info("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("clear") {
            conversation.clear();
            Output::info("Conversation history cleared.");
            continue;
        }

        let request = QueryRequest::new(input)
            .with_web(web)
            .with_k(k)
            .with_max_web_results(max_web_results);

        match orchestrator.query(request, conversation.messages()).await {
            Ok(response) => {
                print!("\n{} ", style("kihub:").cyan().bold());
                let answer = print_answer(response.answer).await?;
                println!();
                if answer.complete {
                    conversation.record(input, &answer.text);
                }
            }
            Err(KihubError::InvalidArgument(msg)) => Output::warning(&msg),
            Err(e) => Output::error(&format!("Error: {}", e)),
        }
    }

    Ok(())
}
