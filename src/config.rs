use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::schema::registry::default_resource_types;
use crate::schema::{ResourceType, SchemaRegistry};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Additional schema descriptor files (JSON), registered after the built-in schemas
    #[serde(default)]
    pub schemas: Vec<String>,
    /// Resource types; the built-in User and Group types are used when empty
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    #[serde(default)]
    pub compatibility: CompatibilityConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Switches for the rewrites applied to PATCH operations of non-conformant clients
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CompatibilityConfig {
    /// `{"name.givenName": "x"}` in a path-less add/replace becomes `{"name": {"givenName": "x"}}`
    pub dotted_attribute_names: bool,
    /// Scalars sent for a complex attribute become `{"value": scalar}`
    pub complex_simple_value: bool,
    /// `remove` with `value` objects becomes a remove with a filter path
    pub remove_with_values: bool,
    /// `{"value": "{...}"}` carrying a JSON document as text is unpacked
    pub value_sub_attribute: bool,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        CompatibilityConfig {
            dotted_attribute_names: true,
            complex_simple_value: true,
            remove_with_values: true,
            value_sub_attribute: true,
        }
    }
}

impl CompatibilityConfig {
    /// Strict RFC 7644 handling without any rewrites
    pub fn disabled() -> Self {
        CompatibilityConfig {
            dotted_attribute_names: false,
            complex_simple_value: false,
            remove_with_values: false,
            value_sub_attribute: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, String> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(format!("Configuration file not found: {}", path.display()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        // Expand environment variables in YAML content
        let expanded_content = Self::expand_env_vars(&content)?;

        let app_config: AppConfig = serde_yaml::from_str(&expanded_content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        for resource_type in &app_config.resource_types {
            if resource_type.name.trim().is_empty() || resource_type.schema.trim().is_empty() {
                return Err(format!(
                    "Resource type entries need a name and a schema: {:?}",
                    resource_type
                ));
            }
        }

        Ok(app_config)
    }

    /// Built-in schemas and resource types with all compatibility rewrites enabled
    pub fn default_config() -> Self {
        AppConfig {
            logging: LoggingConfig::default(),
            schemas: Vec::new(),
            resource_types: default_resource_types(),
            compatibility: CompatibilityConfig::default(),
        }
    }

    /// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
    fn expand_env_vars(content: &str) -> Result<String, String> {
        let chars: Vec<char> = content.chars().collect();
        let mut expanded = String::new();
        let mut i = 0;

        while i < chars.len() {
            if i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '{' {
                // Find the closing brace
                let mut j = i + 2;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }

                if j < chars.len() {
                    let var_expr: String = chars[i + 2..j].iter().collect();

                    let (var_name, default_value) = match var_expr.find(":-") {
                        Some(pos) => (
                            var_expr[..pos].to_string(),
                            Some(var_expr[pos + 2..].to_string()),
                        ),
                        None => (var_expr, None),
                    };

                    let value = match std::env::var(&var_name) {
                        Ok(val) => val,
                        Err(_) => default_value.ok_or_else(|| {
                            format!(
                                "Environment variable {} not found and no default provided",
                                var_name
                            )
                        })?,
                    };

                    expanded.push_str(&value);
                    i = j + 1;
                } else {
                    expanded.push(chars[i]);
                    i += 1;
                }
            } else {
                expanded.push(chars[i]);
                i += 1;
            }
        }

        Ok(expanded)
    }

    /// Registers the built-in schemas, the configured schema files and the resource types
    pub fn build_registry(&self) -> AppResult<SchemaRegistry> {
        let mut registry = SchemaRegistry::with_core_schemas()?;

        for schema_file in &self.schemas {
            let content = fs::read_to_string(schema_file).map_err(|e| {
                AppError::Configuration(format!("Failed to read schema file {}: {}", schema_file, e))
            })?;
            let document: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                AppError::Configuration(format!("Failed to parse schema file {}: {}", schema_file, e))
            })?;
            registry.register_schema(&document)?;
        }

        let resource_types = if self.resource_types.is_empty() {
            default_resource_types()
        } else {
            self.resource_types.clone()
        };
        for resource_type in resource_types {
            registry.register_resource_type(resource_type)?;
        }

        info!(
            "Schema registry ready with {} resource types",
            registry.resource_types().len()
        );
        Ok(registry)
    }
}
