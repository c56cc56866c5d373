//! Resource assembly.
//!
//! Builds the immutable attribute set describing the emitting process by
//! merging, in order: process identity, environment-declared attributes,
//! static runtime facts, the caller-supplied override, and a final
//! schema-normalizing set. Later sources win on key collision.
//!
//! Malformed entries in the free-form attribute list degrade to warnings;
//! only a schema-URL conflict aborts assembly.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource as semconv;
use opentelemetry_semantic_conventions::SCHEMA_URL;
use std::borrow::Cow;

/// A typed resource attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// UTF-8 string value.
    Str(String),
    /// 64-bit integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Ordered attribute mapping with a carried schema URL.
///
/// Keys are unique; inserting an existing key overwrites its value in place
/// (last writer wins). The schema URL travels alongside the entries but is
/// not itself a key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceAttributeSet {
    entries: Vec<(String, AttributeValue)>,
    schema_url: String,
}

impl ResourceAttributeSet {
    /// Creates an empty set tagged with a schema URL.
    pub fn with_schema(schema_url: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            schema_url: schema_url.into(),
        }
    }

    /// Creates an empty schemaless set.
    pub fn schemaless() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Looks up a key.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// The carried schema URL, empty when schemaless.
    pub fn schema_url(&self) -> &str {
        &self.schema_url
    }

    /// Number of attributes in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merges `other` into `self`; `other` wins on key collision.
    ///
    /// Re-merging an identical set is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ResourceMergeConflict`] when `other` carries
    /// a non-empty schema URL that differs from one already established.
    pub fn merge(&mut self, other: &ResourceAttributeSet) -> Result<()> {
        if !other.schema_url.is_empty() {
            if self.schema_url.is_empty() {
                self.schema_url = other.schema_url.clone();
            } else if self.schema_url != other.schema_url {
                return Err(PipelineError::ResourceMergeConflict {
                    existing: self.schema_url.clone(),
                    incoming: other.schema_url.clone(),
                });
            }
        }
        for (key, value) in &other.entries {
            self.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Converts the set into the SDK resource handed to providers.
    pub fn to_sdk_resource(&self) -> Resource {
        let attributes: Vec<KeyValue> = self
            .entries
            .iter()
            .map(|(key, value)| match value {
                AttributeValue::Str(s) => KeyValue::new(key.clone(), s.clone()),
                AttributeValue::Int(i) => KeyValue::new(key.clone(), *i),
                AttributeValue::Bool(b) => KeyValue::new(key.clone(), *b),
            })
            .collect();

        if self.schema_url.is_empty() {
            Resource::builder_empty().with_attributes(attributes).build()
        } else {
            Resource::builder_empty()
                .with_schema_url(attributes, Cow::Owned(self.schema_url.clone()))
                .build()
        }
    }
}

/// Result of resource assembly: the merged set plus non-fatal warnings.
#[derive(Debug, Clone)]
pub struct AssembledResource {
    /// The merged, schema-normalized attribute set.
    pub attributes: ResourceAttributeSet,
    /// Free-form attribute pairs that were skipped for lacking an `=`.
    pub invalid_pairs: Vec<String>,
}

/// Assembles the pipeline resource from config and a caller override.
///
/// # Errors
///
/// Fails only on a schema-URL conflict between merge steps. Missing
/// individual values (no hostname, empty attribute list) never abort
/// assembly.
pub fn assemble(
    config: &PipelineConfig,
    caller_override: &ResourceAttributeSet,
) -> Result<AssembledResource> {
    let mut merged = process_identity(config);

    let (declared, invalid_pairs) = declared_attributes(config);
    merged.merge(&declared)?;
    merged.merge(&runtime_facts())?;
    merged.merge(caller_override)?;
    // A final empty, schema-tagged set normalizes the schema URL even when
    // every earlier source was schemaless.
    merged.merge(&ResourceAttributeSet::with_schema(SCHEMA_URL))?;

    Ok(AssembledResource {
        attributes: merged,
        invalid_pairs,
    })
}

/// Process identity: service name placeholder, hostname, pid, command line.
fn process_identity(config: &PipelineConfig) -> ResourceAttributeSet {
    let mut set = ResourceAttributeSet::with_schema(SCHEMA_URL);
    set.insert(semconv::SERVICE_NAME, config.service_name.clone());
    if let Ok(name) = hostname::get() {
        set.insert(semconv::HOST_NAME, name.to_string_lossy().into_owned());
    }
    set.insert(semconv::PROCESS_PID, i64::from(std::process::id()));
    if let Some(command) = std::env::args().next() {
        set.insert(semconv::PROCESS_COMMAND, command);
    }
    set
}

/// Environment-declared attributes: the free-form `key=value,...` list plus
/// the explicit service name and collector identity.
///
/// Pairs without an `=` are collected as warnings, not errors.
fn declared_attributes(config: &PipelineConfig) -> (ResourceAttributeSet, Vec<String>) {
    let mut set = ResourceAttributeSet::schemaless();
    let mut invalid = Vec::new();

    let attrs = config.resource_attributes.trim();
    if !attrs.is_empty() {
        for pair in attrs.split(',') {
            match pair.split_once('=') {
                Some((key, value)) => set.insert(key.trim(), value.trim()),
                None => invalid.push(pair.to_string()),
            }
        }
    }

    if !config.service_name.is_empty() {
        set.insert(semconv::SERVICE_NAME, config.service_name.clone());
    }
    if !config.collector_name.is_empty() {
        set.insert("collector.name", config.collector_name.clone());
    }

    (set, invalid)
}

/// Static runtime facts: SDK identity and operating system.
fn runtime_facts() -> ResourceAttributeSet {
    let mut set = ResourceAttributeSet::with_schema(SCHEMA_URL);
    set.insert(semconv::TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME"));
    set.insert(
        semconv::TELEMETRY_SDK_VERSION,
        normalize_sdk_version(env!("CARGO_PKG_VERSION")).to_string(),
    );
    set.insert(semconv::TELEMETRY_SDK_LANGUAGE, "rust");
    set.insert(semconv::OS_TYPE, std::env::consts::OS);
    set.insert(
        semconv::OS_DESCRIPTION,
        format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
    );
    set
}

/// Strips a leading language tag from a version string, so `rust1.75.0`
/// reports as `1.75.0`.
fn normalize_sdk_version(version: &str) -> &str {
    version
        .strip_prefix("rust")
        .or_else(|| version.strip_prefix("go"))
        .unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_value(set: &ResourceAttributeSet, key: &str) -> Option<String> {
        set.get(key).and_then(|v| match v {
            AttributeValue::Str(s) => Some(s.clone()),
            _ => None,
        })
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            exporter_otlp_endpoint: "stdout".to_string(),
            service_name: "orders".to_string(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_insert_last_writer_wins() {
        let mut set = ResourceAttributeSet::schemaless();
        set.insert("k", "first");
        set.insert("k", "second");
        assert_eq!(set.len(), 1);
        assert_eq!(str_value(&set, "k"), Some("second".to_string()));
    }

    #[test]
    fn test_merge_overrides_and_is_idempotent() {
        let mut base = ResourceAttributeSet::schemaless();
        base.insert("service.name", "old");
        base.insert("region", "eu-west-1");

        let mut update = ResourceAttributeSet::schemaless();
        update.insert("service.name", "new");

        base.merge(&update).unwrap();
        let after_once = base.clone();
        base.merge(&update).unwrap();

        assert_eq!(base, after_once);
        assert_eq!(str_value(&base, "service.name"), Some("new".to_string()));
        assert_eq!(str_value(&base, "region"), Some("eu-west-1".to_string()));
    }

    #[test]
    fn test_merge_schema_conflict() {
        let mut base = ResourceAttributeSet::with_schema("https://example.com/schemas/1.0");
        let mut other = ResourceAttributeSet::with_schema("https://example.com/schemas/2.0");
        other.insert("k", "v");

        let err = base.merge(&other).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceMergeConflict { .. }));
    }

    #[test]
    fn test_merge_adopts_schema_when_unset() {
        let mut base = ResourceAttributeSet::schemaless();
        base.merge(&ResourceAttributeSet::with_schema(SCHEMA_URL)).unwrap();
        assert_eq!(base.schema_url(), SCHEMA_URL);
    }

    #[test]
    fn test_assemble_core_attributes() {
        let assembled = assemble(&test_config(), &ResourceAttributeSet::schemaless()).unwrap();
        let set = &assembled.attributes;

        assert_eq!(str_value(set, "service.name"), Some("orders".to_string()));
        assert_eq!(str_value(set, "telemetry.sdk.language"), Some("rust".to_string()));
        assert!(set.get("process.pid").is_some());
        assert!(set.get("os.type").is_some());
        assert_eq!(set.schema_url(), SCHEMA_URL);
        assert!(assembled.invalid_pairs.is_empty());
    }

    #[test]
    fn test_assemble_collects_malformed_pairs() {
        let config = PipelineConfig {
            resource_attributes: "env=prod,oops,team=payments".to_string(),
            ..test_config()
        };
        let assembled = assemble(&config, &ResourceAttributeSet::schemaless()).unwrap();

        assert_eq!(assembled.invalid_pairs, vec!["oops".to_string()]);
        assert_eq!(
            str_value(&assembled.attributes, "env"),
            Some("prod".to_string())
        );
        assert_eq!(
            str_value(&assembled.attributes, "team"),
            Some("payments".to_string())
        );
    }

    #[test]
    fn test_assemble_caller_override_wins() {
        let mut caller = ResourceAttributeSet::schemaless();
        caller.insert("service.name", "renamed");
        caller.insert("deployment.environment", "staging");

        let assembled = assemble(&test_config(), &caller).unwrap();
        assert_eq!(
            str_value(&assembled.attributes, "service.name"),
            Some("renamed".to_string())
        );
        assert_eq!(
            str_value(&assembled.attributes, "deployment.environment"),
            Some("staging".to_string())
        );
    }

    #[test]
    fn test_assemble_collector_identity() {
        let config = PipelineConfig {
            collector_name: "edge-gateway".to_string(),
            ..test_config()
        };
        let assembled = assemble(&config, &ResourceAttributeSet::schemaless()).unwrap();
        assert_eq!(
            str_value(&assembled.attributes, "collector.name"),
            Some("edge-gateway".to_string())
        );
    }

    #[test]
    fn test_normalize_sdk_version() {
        assert_eq!(normalize_sdk_version("rust1.75.0"), "1.75.0");
        assert_eq!(normalize_sdk_version("go1.21"), "1.21");
        assert_eq!(normalize_sdk_version("0.1.0"), "0.1.0");
    }

    #[test]
    fn test_to_sdk_resource_round_trip() {
        let mut set = ResourceAttributeSet::with_schema(SCHEMA_URL);
        set.insert("service.name", "orders");
        set.insert("process.pid", 42_i64);
        set.insert("flag", true);

        let resource = set.to_sdk_resource();
        assert_eq!(
            resource.get(&opentelemetry::Key::from_static_str("service.name")),
            Some(opentelemetry::Value::from("orders"))
        );
        assert_eq!(resource.schema_url(), Some(SCHEMA_URL));
    }
}
