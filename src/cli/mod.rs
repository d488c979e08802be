//! CLI module for kihub.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// kihub - a local knowledge hub
///
/// Ingest text and PDF documents, then ask questions answered from them
/// (and optionally the web) with numbered citations.
#[derive(Parser, Debug)]
#[command(name = "kihub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "KIHUB_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and index documents
    Ingest {
        /// Text or PDF files to ingest
        #[arg(required = true)]
        files: Vec<String>,

        /// Characters per chunk (defaults to the configured value)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared between consecutive chunks
        #[arg(long)]
        overlap: Option<usize>,

        /// Re-ingest a single file under an existing document id, replacing its chunks
        #[arg(long)]
        id: Option<String>,
    },

    /// Ask a question and stream a cited answer
    Ask {
        /// The question to answer
        question: String,

        /// Also search the web
        #[arg(short, long)]
        web: bool,

        /// Number of document chunks to retrieve
        #[arg(short)]
        k: Option<usize>,

        /// Maximum number of web results
        #[arg(long)]
        max_web_results: Option<usize>,
    },

    /// Interactive question answering with conversation history
    Chat {
        /// Also search the web
        #[arg(short, long)]
        web: bool,

        /// Number of document chunks to retrieve per question
        #[arg(short)]
        k: Option<usize>,
    },

    /// Search indexed chunks without generating an answer
    Search {
        /// Search query
        query: String,

        /// Number of results
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// List indexed documents
    List,

    /// Remove a document and its chunks from the index
    Remove {
        /// Document id as shown by `kihub list`
        document_id: String,
    },

    /// Show or locate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the current configuration to the config file
    Init,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["kihub", "-vv", "ask", "why?", "--web", "-k", "7"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Ask { question, web, k, max_web_results } => {
                assert_eq!(question, "why?");
                assert!(web);
                assert_eq!(k, Some(7));
                assert_eq!(max_web_results, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ingest_options() {
        let cli = Cli::try_parse_from([
            "kihub", "ingest", "a.txt", "b.pdf", "--chunk-size", "500", "--overlap", "50",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest { files, chunk_size, overlap, id } => {
                assert_eq!(files, vec!["a.txt", "b.pdf"]);
                assert_eq!(chunk_size, Some(500));
                assert_eq!(overlap, Some(50));
                assert!(id.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ingest_requires_files() {
        assert!(Cli::try_parse_from(["kihub", "ingest"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
