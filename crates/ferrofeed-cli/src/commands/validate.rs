use std::collections::BTreeMap;

use ferrofeed_core::{
    credential_env_var, Category, OrchestratorConfig, ReqwestTransport, SourceCatalog, Tier,
};
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct CategorySummary {
    sources: usize,
    by_tier: BTreeMap<Tier, usize>,
    ttl_secs: u64,
    max_age_secs: u64,
    attempt_timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct ValidateResponseData {
    valid: bool,
    sources: usize,
    categories: BTreeMap<Category, CategorySummary>,
    missing_credentials: Vec<String>,
    resolve_deadline_ms: u64,
}

/// Both inputs were validated on load; this reports what they amount to.
pub fn run(catalog: &SourceCatalog, config: &OrchestratorConfig) -> Result<CommandResult, CliError> {
    let mut warnings = Vec::new();
    let mut categories = BTreeMap::new();

    for category in Category::ALL {
        let sources = catalog.for_category(category);
        if sources.is_empty() {
            warnings.push(format!("category '{category}' has no sources"));
            continue;
        }

        let mut by_tier = BTreeMap::new();
        for descriptor in &sources {
            *by_tier.entry(descriptor.tier).or_insert(0) += 1;
        }
        let policy = config.cache.for_category(category);
        categories.insert(
            category,
            CategorySummary {
                sources: sources.len(),
                by_tier,
                ttl_secs: policy.ttl.as_secs(),
                max_age_secs: policy.max_age.as_secs(),
                attempt_timeout_ms: duration_ms(config.attempt_timeout_for(category)),
            },
        );
    }

    let transport = ReqwestTransport::new().with_env_credentials(catalog);
    let missing_credentials: Vec<String> = catalog
        .iter()
        .filter(|descriptor| descriptor.requires_auth && !transport.has_credential(&descriptor.id))
        .map(|descriptor| {
            let variable = credential_env_var(&descriptor.id);
            warnings.push(format!(
                "source '{}' requires auth but {variable} is not set",
                descriptor.id
            ));
            variable
        })
        .collect();

    let data = serde_json::to_value(ValidateResponseData {
        valid: true,
        sources: catalog.len(),
        categories,
        missing_credentials,
        resolve_deadline_ms: duration_ms(config.resolve_deadline),
    })?;

    Ok(CommandResult::ok(data).with_warnings(warnings))
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
