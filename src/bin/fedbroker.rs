//! CLI binary for the federated search broker.
//!
//! Tracing goes to stderr; stdout carries only the command's output so it
//! can be piped into JSON tooling.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fedbroker::HostConfig;
use fedbroker_core::query::keyword;
use fedbroker_core::{Query, SortOrder, SortSpec};
use tracing_subscriber::EnvFilter;

/// fedbroker: fan a keyword query out to many catalogs and merge the answers.
#[derive(Parser)]
#[command(name = "fedbroker", version, about)]
struct Cli {
    /// Path to TOML configuration file. Without one the built-in demo
    /// federation is used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Parse keyword text and print its syntax tree and compiled filter.
    Parse {
        /// Keyword query text.
        text: String,

        /// Reject anything the lenient parser would recover from.
        #[arg(long)]
        strict: bool,
    },

    /// Run a federated query and print the response as JSON.
    Search {
        /// Keyword query text.
        text: String,

        /// Restrict the query to these source ids (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Property to sort by (`relevance`, `distance`, or any attribute).
        #[arg(long)]
        sort: Option<String>,

        /// Sort ascending instead of descending.
        #[arg(long)]
        asc: bool,

        /// Maximum results returned; 0 for no limit.
        #[arg(long, default_value_t = 10)]
        page_size: usize,

        /// 1-based index of the first result returned.
        #[arg(long, default_value_t = 1)]
        start: usize,

        /// Overall deadline in milliseconds; 0 or less waits indefinitely.
        #[arg(long, default_value_t = 2_000)]
        timeout_ms: i64,

        /// Reject keyword text the lenient parser would recover from.
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fedbroker=info,fedbroker_core=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        HostConfig::from_file(path)?
    } else {
        HostConfig::sample()
    };

    match cli.command {
        Command::Parse { text, strict } => {
            let ast = keyword::parse(&text, strict)?;
            let filter = fedbroker_core::parse_keyword_query(&text, strict)?;
            println!("ast:    {ast}");
            println!("filter: {filter}");
            Ok(())
        }
        Command::Search {
            text,
            sources,
            sort,
            asc,
            page_size,
            start,
            timeout_ms,
            strict,
        } => {
            let mut builder = Query::builder()
                .text(text)
                .page_size(page_size)
                .start_index(start)
                .timeout_ms(timeout_ms)
                .strict(strict);
            if let Some(property) = sort {
                let order = if asc {
                    SortOrder::Ascending
                } else {
                    SortOrder::Descending
                };
                builder = builder.sort(SortSpec::new(property, order));
            }
            let query = builder.build()?;
            let response = fedbroker::search(&config, &query, &sources)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "federated query failed");
                    anyhow::anyhow!("search failed: {e}")
                })?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}
