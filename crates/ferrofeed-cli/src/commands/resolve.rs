use ferrofeed_core::{
    FallbackOrchestrator, Freshness, OrchestratorConfig, Resolved, SourceCatalog, SourceId,
};
use serde::Serialize;

use crate::cli::ResolveArgs;
use crate::error::CliError;
use crate::output::EnvelopeError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ResolveResponseData {
    results: Vec<Resolved>,
}

pub async fn run(
    args: &ResolveArgs,
    catalog: SourceCatalog,
    config: OrchestratorConfig,
) -> Result<CommandResult, CliError> {
    let orchestrator = FallbackOrchestrator::builder(catalog)
        .with_config(config)
        .build()?;

    let mut results = Vec::with_capacity(args.keys.len());
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut source_chain: Vec<SourceId> = Vec::new();
    let mut latency_ms = 0;

    for key in &args.keys {
        match orchestrator.resolve(args.category, key, args.mode).await {
            Ok(resolved) => {
                latency_ms += resolved.latency_ms;
                extend_chain(&mut source_chain, resolved.source_chain());
                if resolved.freshness != Freshness::Live && !source_chain.contains(&resolved.source) {
                    source_chain.push(resolved.source.clone());
                }
                warnings.extend(
                    resolved
                        .warnings
                        .iter()
                        .map(|warning| format!("{key}: {warning}")),
                );
                results.push(resolved);
            }
            Err(error) => {
                extend_chain(
                    &mut source_chain,
                    error.attempted.iter().map(|attempt| attempt.source.clone()).collect(),
                );
                errors.push(EnvelopeError::no_source_available(&error));
            }
        }
    }

    let cache_hit =
        !results.is_empty() && results.iter().all(|r| r.freshness == Freshness::Cached);
    let data = serde_json::to_value(ResolveResponseData { results })?;

    Ok(CommandResult::ok(data)
        .with_source_chain(source_chain)
        .with_warnings(warnings)
        .with_errors(errors)
        .with_latency(latency_ms)
        .with_cache_hit(cache_hit))
}

fn extend_chain(chain: &mut Vec<SourceId>, sources: Vec<SourceId>) {
    for source in sources {
        if !chain.contains(&source) {
            chain.push(source);
        }
    }
}
