use cardtrack_core::domain::Stage;
use cardtrack_core::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// The three independent upstream systems.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Bank,
    CardManufacturer,
    Logistics,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Bank => "bank",
            ProviderType::CardManufacturer => "card_manufacturer",
            ProviderType::Logistics => "logistics",
        }
    }

    pub fn is_bank(&self) -> bool {
        matches!(self, ProviderType::Bank)
    }
}

/// How one raw provider status translates to canonical terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMapping {
    pub status: String,
    pub stage: Stage,
    pub description: String,
}

/// Declarative, per-provider description of how to extract and
/// classify fields. Plain data loaded from config so a provider can be
/// added without recompiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub provider_type: ProviderType,
    pub provider_name: String,
    /// Canonical field -> path expression into the raw record.
    pub field_mappings: HashMap<String, String>,
    /// If set and present in the raw record, each element of this list
    /// becomes one canonical record.
    #[serde(default)]
    pub history_field: Option<String>,
    /// Canonical field -> plain key within one history item.
    #[serde(default)]
    pub history_mappings: HashMap<String, String>,
    /// Raw provider status -> canonical `(status, stage, description)`.
    pub status_mappings: HashMap<String, StatusMapping>,
    /// Canonical field used to find an existing card for non-bank
    /// providers (a tracking-id field name).
    #[serde(default)]
    pub lookup_key: Option<String>,
    /// Ordered date fields used when a record carries no explicit event
    /// timestamp. Empty means the built-in default order.
    #[serde(default)]
    pub timestamp_fields: Vec<String>,
}

/// Default timestamp fallback order for templates that do not declare
/// their own.
pub const DEFAULT_TIMESTAMP_FIELDS: [&str; 7] = [
    "timestamp",
    "approval_date",
    "dispatch_date",
    "received_date",
    "production_end_date",
    "last_updated",
    "application_date",
];

impl Template {
    /// The ordered list of fields to consult for an event timestamp.
    pub fn timestamp_fields(&self) -> Vec<&str> {
        if self.timestamp_fields.is_empty() {
            DEFAULT_TIMESTAMP_FIELDS.to_vec()
        } else {
            self.timestamp_fields.iter().map(|s| s.as_str()).collect()
        }
    }
}

/// Read-only registry of provider templates, loaded once per run from
/// the master config file (`provider_type -> name -> template`).
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<ProviderType, HashMap<String, Template>>,
}

impl TemplateRegistry {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TrackerError::Template {
                message: format!("Master config does not exist: {}", path.display()),
            });
        }

        let content = fs::read_to_string(path)?;
        let raw: HashMap<String, HashMap<String, Template>> = serde_json::from_str(&content)
            .map_err(|e| TrackerError::Template {
                message: format!("Failed to parse master config {}: {e}", path.display()),
            })?;

        let mut templates: HashMap<ProviderType, HashMap<String, Template>> = HashMap::new();
        for (provider_key, entries) in raw {
            for (name, template) in entries {
                if template.provider_type.as_str() != provider_key {
                    return Err(TrackerError::Template {
                        message: format!(
                            "Template '{name}' declares provider_type '{}' under section '{provider_key}'",
                            template.provider_type.as_str()
                        ),
                    });
                }
                templates
                    .entry(template.provider_type)
                    .or_default()
                    .insert(name, template);
            }
        }

        Ok(Self { templates })
    }

    /// The default template for a provider type.
    pub fn get(&self, provider_type: ProviderType) -> Result<&Template> {
        let entries = self
            .templates
            .get(&provider_type)
            .ok_or_else(|| TrackerError::Template {
                message: format!("No templates for provider type '{}'", provider_type.as_str()),
            })?;
        entries
            .get("default")
            .or_else(|| entries.values().next())
            .ok_or_else(|| TrackerError::Template {
                message: format!(
                    "No template definitions under provider type '{}'",
                    provider_type.as_str()
                ),
            })
    }

    pub fn provider_types(&self) -> Vec<ProviderType> {
        self.templates.keys().copied().collect()
    }
}
