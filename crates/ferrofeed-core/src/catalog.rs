//! Static source catalog.
//!
//! Catalog files are JSON documents of the form:
//!
//! ```json
//! {
//!   "sources": [
//!     {
//!       "id": "coingecko",
//!       "category": "market_price",
//!       "tier": "critical",
//!       "requires_auth": false,
//!       "weight": 1.0,
//!       "rate_limit": { "limit": 30, "period_secs": 60 },
//!       "endpoint": "https://api.coingecko.com/api/v3/simple/price?ids={key}&vs_currencies=usd",
//!       "value_pointer": "/{key}/usd"
//!     }
//!   ]
//! }
//! ```
//!
//! Every entry is validated when the catalog is built; a single malformed
//! entry rejects the whole catalog.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::source::{Category, SourceId, Tier};
use crate::{CoreError, ValidationError};

const KEY_PLACEHOLDER: &str = "{key}";

/// Fixed-window call allowance of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitQuota {
    pub limit: u32,
    pub period_secs: u64,
}

impl RateLimitQuota {
    pub const fn new(limit: u32, period_secs: u64) -> Self {
        Self { limit, period_secs }
    }
}

/// Immutable metadata of one data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub category: Category,
    pub tier: Tier,
    pub requires_auth: bool,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitQuota>,
    /// URL template; `{key}` is replaced by the url-encoded request key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// JSON pointer into the response body; may contain `{key}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_pointer: Option<String>,
}

impl SourceDescriptor {
    /// Descriptor with weight 1.0, no auth, no quota and no endpoint.
    pub fn new(id: SourceId, category: Category, tier: Tier) -> Self {
        Self {
            id,
            category,
            tier,
            requires_auth: false,
            weight: 1.0,
            rate_limit: None,
            endpoint: None,
            value_pointer: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_rate_limit(mut self, limit: u32, period_secs: u64) -> Self {
        self.rate_limit = Some(RateLimitQuota::new(limit, period_secs));
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_value_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.value_pointer = Some(pointer.into());
        self
    }

    pub fn with_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let id = || self.id.to_string();

        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(ValidationError::InvalidWeight { id: id() });
        }

        if let Some(quota) = self.rate_limit {
            if quota.limit == 0 || quota.period_secs == 0 {
                return Err(ValidationError::InvalidRateLimit { id: id() });
            }
        }

        if let Some(endpoint) = &self.endpoint {
            let scheme_ok = endpoint.starts_with("https://") || endpoint.starts_with("http://");
            if !scheme_ok || endpoint.chars().any(char::is_whitespace) {
                return Err(ValidationError::InvalidEndpoint { id: id() });
            }
        }

        if let Some(pointer) = &self.value_pointer {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return Err(ValidationError::InvalidValuePointer { id: id() });
            }
        }

        Ok(())
    }

    /// Endpoint with `{key}` substituted, if the source has one.
    pub fn render_endpoint(&self, key: &str) -> Option<String> {
        self.endpoint
            .as_ref()
            .map(|template| template.replace(KEY_PLACEHOLDER, &urlencoding::encode(key)))
    }

    /// Value pointer with `{key}` substituted as an escaped pointer token.
    pub fn render_value_pointer(&self, key: &str) -> Option<String> {
        let token = key.replace('~', "~0").replace('/', "~1");
        self.value_pointer
            .as_ref()
            .map(|pointer| pointer.replace(KEY_PLACEHOLDER, &token))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    sources: Vec<serde_json::Value>,
}

/// Validated, ordered set of source descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCatalog {
    sources: Vec<SourceDescriptor>,
    positions: HashMap<SourceId, usize>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<SourceDescriptor>) -> Result<Self, ValidationError> {
        let mut positions = HashMap::with_capacity(sources.len());
        for (index, descriptor) in sources.iter().enumerate() {
            descriptor.validate()?;
            if positions.insert(descriptor.id.clone(), index).is_some() {
                return Err(ValidationError::DuplicateSource {
                    id: descriptor.id.to_string(),
                });
            }
        }
        Ok(Self { sources, positions })
    }

    pub fn from_json_str(input: &str) -> Result<Self, CoreError> {
        let file: CatalogFile = serde_json::from_str(input)?;
        let mut sources = Vec::with_capacity(file.sources.len());
        for (index, entry) in file.sources.into_iter().enumerate() {
            let descriptor: SourceDescriptor =
                serde_json::from_value(entry).map_err(|err| ValidationError::MalformedEntry {
                    index,
                    message: err.to_string(),
                })?;
            sources.push(descriptor);
        }
        Ok(Self::new(sources)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, id: &SourceId) -> Option<&SourceDescriptor> {
        self.positions.get(id).map(|index| &self.sources[*index])
    }

    /// Declaration index, used as the final ordering tie-break.
    pub fn position(&self, id: &SourceId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Sources serving `category`, in declaration order.
    pub fn for_category(&self, category: Category) -> Vec<&SourceDescriptor> {
        self.sources
            .iter()
            .filter(|descriptor| descriptor.category == category)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> SourceId {
        SourceId::parse(value).expect("valid id")
    }

    #[test]
    fn parses_catalog_and_keeps_declaration_order() {
        let catalog = SourceCatalog::from_json_str(
            r#"{"sources": [
                {"id": "low", "category": "market_price", "tier": "low", "requires_auth": false, "weight": 1.0},
                {"id": "news", "category": "news", "tier": "high", "requires_auth": true, "weight": 0.5},
                {"id": "crit", "category": "market_price", "tier": "critical", "requires_auth": false, "weight": 2.0,
                 "rate_limit": {"limit": 10, "period_secs": 60}}
            ]}"#,
        )
        .expect("valid catalog");

        assert_eq!(catalog.len(), 3);
        let ids: Vec<_> = catalog
            .for_category(Category::MarketPrice)
            .into_iter()
            .map(|descriptor| descriptor.id.as_str().to_owned())
            .collect();
        assert_eq!(ids, vec!["low", "crit"]);
        assert_eq!(
            catalog.get(&id("crit")).and_then(|d| d.rate_limit),
            Some(RateLimitQuota::new(10, 60))
        );
        assert_eq!(catalog.position(&id("news")), Some(1));
    }

    #[test]
    fn reports_index_of_malformed_entry() {
        let err = SourceCatalog::from_json_str(
            r#"{"sources": [
                {"id": "ok", "category": "news", "tier": "high", "requires_auth": false, "weight": 1.0},
                {"id": "broken", "category": "news", "tier": "urgent", "requires_auth": false, "weight": 1.0}
            ]}"#,
        )
        .expect_err("unknown tier must fail");

        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::MalformedEntry { index: 1, .. })
        ));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = SourceCatalog::from_json_str(
            r#"{"sources": [{"id": "x", "category": "news", "tier": "high", "weight": 1.0}]}"#,
        )
        .expect_err("requires_auth is required");
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::MalformedEntry { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_duplicates_and_bad_weights() {
        let a = SourceDescriptor::new(id("a"), Category::News, Tier::High);
        let err = SourceCatalog::new(vec![a.clone(), a.clone()]).expect_err("duplicate");
        assert_eq!(err, ValidationError::DuplicateSource { id: "a".to_owned() });

        let err = SourceCatalog::new(vec![a.with_weight(0.0)]).expect_err("zero weight");
        assert_eq!(err, ValidationError::InvalidWeight { id: "a".to_owned() });
    }

    #[test]
    fn rejects_zero_quota_and_non_http_endpoint() {
        let base = SourceDescriptor::new(id("a"), Category::News, Tier::High);
        assert!(matches!(
            base.clone().with_rate_limit(0, 60).validate(),
            Err(ValidationError::InvalidRateLimit { .. })
        ));
        assert!(matches!(
            base.clone().with_endpoint("ftp://example.com").validate(),
            Err(ValidationError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            base.with_value_pointer("price").validate(),
            Err(ValidationError::InvalidValuePointer { .. })
        ));
    }

    #[test]
    fn renders_key_into_endpoint_and_pointer() {
        let descriptor = SourceDescriptor::new(id("a"), Category::MarketPrice, Tier::High)
            .with_endpoint("https://example.com/price?ids={key}")
            .with_value_pointer("/{key}/usd");

        assert_eq!(
            descriptor.render_endpoint("btc usd").as_deref(),
            Some("https://example.com/price?ids=btc%20usd")
        );
        assert_eq!(
            descriptor.render_value_pointer("btc/usd").as_deref(),
            Some("/btc~1usd/usd")
        );
    }

    #[test]
    fn loads_catalog_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"sources": [{"id": "a", "category": "ohlc", "tier": "medium", "requires_auth": false, "weight": 1.0}]}"#,
        )
        .expect("write catalog");

        let catalog = SourceCatalog::load(&path).expect("loads");
        assert_eq!(catalog.len(), 1);

        let missing = SourceCatalog::load(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(CoreError::Io(_))));
    }
}
