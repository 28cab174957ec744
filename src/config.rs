//! Import/export configuration system.
//!
//! Entity configs are loaded from the `configs/` directory at startup. The
//! in-memory store is backed by `RwLock` so configs can be added at runtime.
//! Process settings come from the environment (with `.env` support).

use crate::exporter::ExportRow;
use crate::field::{normalize_header, FieldDescriptor, ReferenceDataSet};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

const DEFAULT_SHEET_NAME: &str = "Data";

type RowValidatorFn = dyn Fn(&Map<String, Value>, usize) -> Option<String> + Send + Sync;
type ExportMapperFn = dyn Fn(&Value) -> ExportRow + Send + Sync;

/// Everything the engine needs to template, import and export one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportExportConfig {
    pub entity_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name_plural: Option<String>,
    /// Overrides the plural entity name in generated file names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_sheet_name: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_data: Vec<ReferenceDataSet>,
    /// Rows carrying a value in this field are updated instead of created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_field: Option<String>,
    /// Backend table name for the Supabase sink (defaults to `entity_name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_columns: Vec<ExportColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<CurrencyOptions>,
    #[serde(skip)]
    pub hooks: ConfigHooks,
}

/// Declarative export mapping: one output column per entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportColumn {
    pub header: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyOptions {
    pub code: String,
    #[serde(default = "default_num_format")]
    pub num_format: String,
}

fn default_num_format() -> String {
    "#,##0.00".to_string()
}

/// Caller-supplied closures that cannot be expressed in JSON.
#[derive(Clone, Default)]
pub struct ConfigHooks {
    pub validate_row: Option<Arc<RowValidatorFn>>,
    pub export_mapper: Option<Arc<ExportMapperFn>>,
}

impl fmt::Debug for ConfigHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigHooks")
            .field("validate_row", &self.validate_row.is_some())
            .field("export_mapper", &self.export_mapper.is_some())
            .finish()
    }
}

/// Programmatic construction. The server itself builds configs from JSON,
/// so closures are only attached by code embedding the engine.
#[allow(dead_code)]
impl ImportExportConfig {
    pub fn new(entity_name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_name_plural: None,
            file_prefix: None,
            template_sheet_name: None,
            fields,
            reference_data: Vec::new(),
            id_field: None,
            table: None,
            export_columns: Vec::new(),
            currency: None,
            hooks: ConfigHooks::default(),
        }
    }

    /// Run after field coercion; `Some(message)` fails the row.
    pub fn with_row_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Map<String, Value>, usize) -> Option<String> + Send + Sync + 'static,
    {
        self.hooks.validate_row = Some(Arc::new(validator));
        self
    }

    pub fn with_export_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Value) -> ExportRow + Send + Sync + 'static,
    {
        self.hooks.export_mapper = Some(Arc::new(mapper));
        self
    }
}

impl ImportExportConfig {

    pub fn plural_name(&self) -> String {
        self.entity_name_plural
            .clone()
            .unwrap_or_else(|| format!("{}s", self.entity_name))
    }

    /// Prefix for generated file names, whitespace replaced by `_`.
    pub fn file_prefix(&self) -> String {
        let base = self.file_prefix.clone().unwrap_or_else(|| self.plural_name());
        base.split_whitespace().collect::<Vec<_>>().join("_")
    }

    pub fn sheet_name(&self) -> &str {
        self.template_sheet_name.as_deref().unwrap_or(DEFAULT_SHEET_NAME)
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.entity_name)
    }

    /// Check descriptor invariants: at least one field, unique headers,
    /// non-empty enum value lists.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.entity_name.trim().is_empty() {
            return Err("entity_name must not be empty".to_string());
        }
        if self.fields.is_empty() {
            return Err(format!("\"{}\" has no fields", self.entity_name));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(normalize_header(&field.header_name)) {
                return Err(format!("Duplicate header \"{}\"", field.header_name));
            }
            if matches!(field.field_type.enum_values(), Some(values) if values.is_empty()) {
                return Err(format!(
                    "Field \"{}\" is an enum but has no enum values",
                    field.header_name
                ));
            }
        }
        Ok(())
    }
}

/// In-memory store for all loaded configs, backed by `RwLock` for runtime mutations.
#[derive(Debug, Default)]
pub struct ConfigStore {
    configs: RwLock<HashMap<String, Arc<ImportExportConfig>>>,
}

impl ConfigStore {
    /// Load all configs from the specified directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            anyhow::bail!("Config directory does not exist: {:?}", dir);
        }

        let mut configs = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {:?}", path))?;

                let config: ImportExportConfig = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {:?}", path))?;
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Invalid config {:?}: {}", path, e))?;

                info!("Loaded config: {} from {:?}", config.entity_name, path);
                configs.insert(config.entity_name.clone(), Arc::new(config));
            }
        }

        if configs.is_empty() {
            anyhow::bail!("No configs found in {:?}", dir);
        }

        Ok(Self {
            configs: RwLock::new(configs),
        })
    }

    /// Get a config by entity name.
    pub fn get(&self, name: &str) -> Option<Arc<ImportExportConfig>> {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// List all available entity names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Insert or replace a config after validating it.
    pub fn insert(&self, config: ImportExportConfig) -> std::result::Result<(), String> {
        config.validate()?;
        self.configs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(config.entity_name.clone(), Arc::new(config));
        Ok(())
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub config_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub supabase: Option<SupabaseSettings>,
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_role_key: String,
    pub schema: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let max_upload_mb = match std::env::var("SHEET_PORTER_MAX_UPLOAD_MB") {
            Ok(v) => v
                .parse::<usize>()
                .with_context(|| format!("SHEET_PORTER_MAX_UPLOAD_MB is not a number: {}", v))?,
            Err(_) => 25,
        };

        let supabase = match std::env::var("SUPABASE_URL") {
            Ok(url) => Some(SupabaseSettings {
                url,
                service_role_key: std::env::var("SUPABASE_SERVICE_ROLE_KEY")
                    .context("SUPABASE_URL is set but SUPABASE_SERVICE_ROLE_KEY is not")?,
                schema: std::env::var("SUPABASE_SCHEMA").ok(),
            }),
            Err(_) => None,
        };

        Ok(Self {
            bind_addr: std::env::var("SHEET_PORTER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            config_dir: std::env::var("SHEET_PORTER_CONFIG_DIR")
                .unwrap_or_else(|_| "configs".into())
                .into(),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            supabase,
        })
    }
}
