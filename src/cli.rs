use clap::{Parser, Subcommand};

use orakel::semantic::Passage;

/// Shown instead of results when the query is blank
pub const EMPTY_QUERY_HINT: &str = "Stelle eine Frage, um passende Textstellen zu finden.";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Find the passages closest in meaning to one or more queries
    Search {
        /// Queries, each searched separately
        query: Vec<String>,

        /// Number of passages per query
        #[clap(short = 'n', long, allow_hyphen_values = true)]
        results: Option<i64>,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Show the loaded model, index and corpus
    Info {},

    /// Serve the search over http
    Daemon {
        /// Address to listen on
        #[clap(short, long, default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

/// Strip the file extension the corpus keeps on source titles.
pub fn display_title(title: &str) -> String {
    title.replace(".pdf", "")
}

/// Render ranked passages as `**text** (aus: title)` lines, closest first.
pub fn render_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|passage| {
            format!(
                "**{}** (aus: {})",
                passage.text,
                display_title(&passage.title)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
