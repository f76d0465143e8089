mod resolve;
mod sources;
mod validate;

use ferrofeed_core::{OrchestratorConfig, SourceCatalog, SourceId};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::Metadata;
use crate::output::{Envelope, EnvelopeError};

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub source_chain: Vec<SourceId>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            latency_ms: 0,
            cache_hit: false,
            source_chain: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_source_chain(mut self, source_chain: Vec<SourceId>) -> Self {
        self.source_chain = source_chain;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let catalog = SourceCatalog::load(&cli.catalog)?;
    let config = match &cli.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::default(),
    }
    .with_env_overrides()?;
    tracing::debug!(
        catalog = %cli.catalog.display(),
        sources = catalog.len(),
        "catalog loaded"
    );

    let command_result = match &cli.command {
        Command::Resolve(args) => resolve::run(args, catalog, config).await?,
        Command::Sources(args) => sources::run(args, catalog, config)?,
        Command::Validate => validate::run(&catalog, &config)?,
    };

    let CommandResult {
        data,
        warnings,
        errors,
        latency_ms,
        cache_hit,
        source_chain,
    } = command_result;

    let mut meta = Metadata::new(source_chain, latency_ms, cache_hit);
    for warning in warnings {
        meta.push_warning(warning);
    }

    Ok(Envelope { meta, data, errors })
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tempfile::tempdir;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("valid arguments")
    }

    #[tokio::test]
    async fn validate_summarizes_catalog_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sources.json");
        std::fs::write(
            &path,
            r#"{"sources": [
                {"id": "gecko", "category": "market_price", "tier": "critical", "requires_auth": false, "weight": 1.0},
                {"id": "kraken", "category": "market_price", "tier": "high", "requires_auth": false, "weight": 1.0}
            ]}"#,
        )
        .expect("write catalog");
        let catalog = path.to_string_lossy().into_owned();

        let envelope = run(&cli(&["ferrofeed", "--catalog", &catalog, "validate"]))
            .await
            .expect("valid catalog");

        assert!(envelope.errors.is_empty());
        assert_eq!(envelope.data["sources"], 2);
        assert_eq!(envelope.data["categories"]["market_price"]["sources"], 2);
        assert!(envelope
            .meta
            .warnings
            .iter()
            .any(|warning| warning.contains("has no sources")));
    }

    #[tokio::test]
    async fn missing_catalog_file_is_an_io_error() {
        let dir = tempdir().expect("tempdir");
        let catalog = dir.path().join("absent.json").to_string_lossy().into_owned();

        let result = run(&cli(&["ferrofeed", "--catalog", &catalog, "validate"])).await;

        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
