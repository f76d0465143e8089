//! CLI argument definitions for ferrofeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `resolve` | Resolve one or more keys of a category through the fallback chain |
//! | `sources` | Show per-source status (circuit, rate-limit budget, health) |
//! | `validate` | Load and validate the catalog and configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--catalog` | required | Source catalog JSON file |
//! | `--config` | none | Orchestrator configuration JSON file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `warn` | Log filter when `RUST_LOG` is unset |
//! | `--log-format` | `text` | Log line format on stderr |
//!
//! # Examples
//!
//! ```bash
//! # Latest BTC price, first live source wins
//! ferrofeed --catalog sources.json resolve market_price btc
//!
//! # Consensus across three sources
//! ferrofeed --catalog sources.json resolve price btc eth --mode parallel --pretty
//!
//! # Check the catalog before deploying it
//! ferrofeed --catalog sources.json validate
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ferrofeed_core::{Category, ResolveMode};

/// Resilient multi-source data fetching.
///
/// Resolves crypto and market data through a prioritized chain of sources
/// with circuit breakers, rate-limit tracking and a stale-value cache.
#[derive(Debug, Parser)]
#[command(
    name = "ferrofeed",
    author,
    version,
    about = "Resilient multi-source data fetching"
)]
pub struct Cli {
    /// Source catalog JSON file (`{"sources": [...]}`).
    #[arg(long)]
    pub catalog: PathBuf,

    /// Orchestrator configuration JSON file. Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter used when `RUST_LOG` is not set (e.g. `info`, `ferrofeed_core=debug`).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve keys of one category.
    ///
    /// # Examples
    ///
    ///   ferrofeed --catalog sources.json resolve market_price btc
    ///   ferrofeed --catalog sources.json resolve ohlc eth --mode parallel
    Resolve(ResolveArgs),

    /// Show source status.
    Sources(SourcesArgs),

    /// Validate the catalog and configuration, print a summary.
    Validate,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Data category (market_price, ohlc, news, sentiment, on_chain, whale_tracking).
    pub category: Category,

    /// One or more request keys (e.g. btc, eth).
    #[arg(required = true, num_args = 1..)]
    pub keys: Vec<String>,

    /// Sequential walks sources one at a time; parallel combines several.
    #[arg(long, default_value = "sequential")]
    pub mode: ResolveMode,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Only show sources of this category.
    #[arg(long)]
    pub category: Option<Category>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolve_with_mode() {
        let cli = Cli::try_parse_from([
            "ferrofeed",
            "--catalog",
            "sources.json",
            "resolve",
            "price",
            "btc",
            "eth",
            "--mode",
            "parallel",
            "--pretty",
        ])
        .expect("valid arguments");

        assert!(cli.pretty);
        match cli.command {
            Command::Resolve(args) => {
                assert_eq!(args.category, Category::MarketPrice);
                assert_eq!(args.keys, vec!["btc", "eth"]);
                assert_eq!(args.mode, ResolveMode::Parallel);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_category() {
        let result = Cli::try_parse_from([
            "ferrofeed",
            "--catalog",
            "sources.json",
            "resolve",
            "weather",
            "btc",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn catalog_is_required() {
        assert!(Cli::try_parse_from(["ferrofeed", "validate"]).is_err());
    }
}
