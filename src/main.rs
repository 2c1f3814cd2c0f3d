use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use orakel::config::{self, Config};
use orakel::semantic::{is_blank, SemanticSearchService};
use orakel::web;

fn main() -> anyhow::Result<()> {
    // ORAKEL_LOG=debug orakel search "..."
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ORAKEL_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = config::base_path()?;
    let config = Config::load_with(&base_path)?;
    let service = Arc::new(SemanticSearchService::new(
        config.search.clone(),
        config.base_path().to_path_buf(),
    ));

    match args.command {
        cli::Command::Search {
            query,
            results,
            json,
        } => {
            if query.is_empty() || query.iter().all(|q| is_blank(q)) {
                println!("{}", cli::EMPTY_QUERY_HINT);
                return Ok(());
            }

            let k = service.resolve_limit(results)?;
            let passages = service.search(query.as_slice(), k)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&passages)?);
                return Ok(());
            }

            let batch = query.len() > 1;
            for (query, passages) in query.iter().zip(&passages) {
                if batch {
                    println!("# {}\n", query.trim());
                }
                println!("{}\n", cli::render_passages(passages));
            }

            Ok(())
        }

        cli::Command::Info {} => {
            let info = service.info()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }

        cli::Command::Daemon { addr } => web::start_daemon(service, &addr),
    }
}
