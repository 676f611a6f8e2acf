use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::normalize::{RowKind, SchemaHints};
use crate::period::THIS_YEAR;
use crate::sync::TrackedField;
use crate::view::{PERIOD_PARAM, ViewDefinition};

pub const CONFIG_FILE: &str = "perfboard.json";
pub const API_KEY_ENV: &str = "PERFBOARD_API_KEY";
pub const ENDPOINT_ENV: &str = "PERFBOARD_ENDPOINT";

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_FALLBACK_SCHEMA: &str = "api";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_MS: u64 = 250;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    /// `""` disables the fallback.
    #[serde(default)]
    pub fallback_schema: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub filters: Vec<FilterEntry>,
    #[serde(default)]
    pub views: Vec<ViewEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FilterEntry {
    Shorthand(String),
    Detailed(TrackedField),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ViewEntry {
    Shorthand(String),
    Detailed(ViewEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ViewEntryObject {
    pub name: String,
    #[serde(default)]
    pub procedure: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub label_fields: Option<Vec<String>>,
    #[serde(default)]
    pub value_fields: Option<Vec<String>>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub schema: String,
    pub fallback_schema: Option<String>,
    pub timeout: Duration,
    pub debounce: Duration,
    pub filters: Vec<TrackedField>,
    pub views: Vec<ViewDefinition>,
}

impl ResolvedConfig {
    pub fn view(&self, name: &str) -> Result<&ViewDefinition, SyncError> {
        self.views
            .iter()
            .find(|view| view.name == name)
            .ok_or_else(|| SyncError::UnknownView(name.to_string()))
    }

    pub fn endpoint(&self) -> Result<&str, SyncError> {
        self.endpoint.as_deref().ok_or(SyncError::MissingEndpoint)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(SyncError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SyncError::ConfigParse(err.to_string()))?;

        let mut resolved = Self::resolve_config(config)?;
        if resolved.api_key.is_none() {
            resolved.api_key = std::env::var(API_KEY_ENV).ok();
        }
        if resolved.endpoint.is_none() {
            resolved.endpoint = std::env::var(ENDPOINT_ENV).ok();
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let fallback_schema = match config.fallback_schema {
            Some(schema) if schema.trim().is_empty() => None,
            Some(schema) => Some(schema),
            None => Some(DEFAULT_FALLBACK_SCHEMA.to_string()),
        };

        let mut filters = config
            .filters
            .into_iter()
            .map(|entry| match entry {
                FilterEntry::Shorthand(field) => TrackedField::new(field),
                FilterEntry::Detailed(field) => field,
            })
            .collect::<Vec<_>>();
        if filters.is_empty() {
            filters = default_filters();
        }

        let views = config
            .views
            .into_iter()
            .map(|entry| match entry {
                ViewEntry::Shorthand(name) => Ok(ViewDefinition::new(
                    name.clone(),
                    name,
                    RowKind::Generic,
                )),
                ViewEntry::Detailed(obj) => {
                    let kind = match obj.kind.as_deref() {
                        Some(kind) => kind.parse()?,
                        None => RowKind::Generic,
                    };
                    let hints = SchemaHints {
                        kind,
                        label_fields: obj.label_fields,
                        value_fields: obj.value_fields,
                        default_unit: obj.unit,
                        default_currency: obj.currency,
                    };
                    let procedure = obj.procedure.unwrap_or_else(|| obj.name.clone());
                    Ok(ViewDefinition::new(obj.name, procedure, kind).with_hints(hints))
                }
            })
            .collect::<Result<Vec<_>, SyncError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            endpoint: config.endpoint,
            api_key: config.api_key,
            schema: config
                .schema
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            fallback_schema,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            debounce: Duration::from_millis(config.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
            filters,
            views,
        })
    }
}

pub fn default_filters() -> Vec<TrackedField> {
    vec![TrackedField::new(PERIOD_PARAM).with_default(THIS_YEAR)]
}
