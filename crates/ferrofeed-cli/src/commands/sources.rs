use ferrofeed_core::{FallbackOrchestrator, OrchestratorConfig, SourceCatalog, SourceStatus};
use serde::Serialize;

use crate::cli::SourcesArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceStatus>,
}

pub fn run(
    args: &SourcesArgs,
    catalog: SourceCatalog,
    config: OrchestratorConfig,
) -> Result<CommandResult, CliError> {
    let orchestrator = FallbackOrchestrator::builder(catalog)
        .with_config(config)
        .build()?;

    let sources = orchestrator
        .source_status()
        .into_iter()
        .filter(|status| args.category.map_or(true, |category| status.category == category))
        .collect::<Vec<_>>();
    let source_chain = sources.iter().map(|status| status.id.clone()).collect();

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    Ok(CommandResult::ok(data).with_source_chain(source_chain))
}
