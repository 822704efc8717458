use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::schema::definitions::{
    builtin_schemas, ATTR_META, ATTR_SCHEMAS, META_SCHEMA, SCIM_SCHEMA_CORE_GROUP,
    SCIM_SCHEMA_CORE_USER, SCIM_SCHEMA_ENTERPRISE_USER,
};
use crate::schema::tree::SchemaTree;

/// Extension schema attached to a resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaExtension {
    pub schema: String,
    #[serde(default)]
    pub required: bool,
}

/// Binding of a resource type to its main schema and optional extensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    pub endpoint: String,
    pub schema: String,
    #[serde(default)]
    pub extensions: Vec<SchemaExtension>,
}

impl ResourceType {
    pub fn new(name: &str, endpoint: &str, schema: &str) -> Self {
        ResourceType {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            schema: schema.to_string(),
            extensions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, schema: &str, required: bool) -> Self {
        self.extensions.push(SchemaExtension {
            schema: schema.to_string(),
            required,
        });
        self
    }
}

/// Main schema and extension schemas of one resource type, resolved against a registry
#[derive(Debug)]
pub struct ResourceSchema<'r> {
    pub resource_type: &'r ResourceType,
    pub main: &'r SchemaTree,
    pub extensions: Vec<(&'r SchemaExtension, &'r SchemaTree)>,
}

impl<'r> ResourceSchema<'r> {
    pub fn extension(&self, schema_id: &str) -> Option<&'r SchemaTree> {
        self.extensions
            .iter()
            .find(|(ext, _)| ext.schema.eq_ignore_ascii_case(schema_id))
            .map(|(_, tree)| *tree)
    }

    /// Main schema followed by the extension schemas
    pub fn all_schemas(&self) -> impl Iterator<Item = &'r SchemaTree> + '_ {
        std::iter::once(self.main).chain(self.extensions.iter().map(|(_, tree)| *tree))
    }
}

/// Registered schemas and resource types.
///
/// Built once at startup with `&mut self` registration calls and read through `&self`
/// afterwards. Callers that register at runtime share it as `Arc<RwLock<SchemaRegistry>>`.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaTree>,
    resource_types: Vec<ResourceType>,
    meta_schema: Option<SchemaTree>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the RFC 7643 schemas and the `meta` descriptor
    pub fn with_core_schemas() -> AppResult<Self> {
        let mut registry = Self::new();
        for schema in builtin_schemas() {
            registry.register_schema(schema)?;
        }
        registry.register_meta_schema(&META_SCHEMA)?;
        Ok(registry)
    }

    /// Core schemas plus the `User` (with enterprise extension) and `Group` resource types
    pub fn with_core_resource_types() -> AppResult<Self> {
        let mut registry = Self::with_core_schemas()?;
        for resource_type in default_resource_types() {
            registry.register_resource_type(resource_type)?;
        }
        Ok(registry)
    }

    pub fn register_schema(&mut self, document: &Value) -> AppResult<&SchemaTree> {
        let tree = SchemaTree::from_json(document)?;
        let key = tree.id.to_lowercase();
        if self.schemas.contains_key(&key) {
            info!("Replacing schema '{}'", tree.id);
        } else {
            info!("Registered schema '{}'", tree.id);
        }
        self.schemas.insert(key.clone(), tree);
        self.schemas
            .get(&key)
            .ok_or_else(|| AppError::invalid_schema("schema vanished during registration"))
    }

    /// Registers the descriptor used to validate `meta` on responses
    pub fn register_meta_schema(&mut self, document: &Value) -> AppResult<()> {
        let tree = SchemaTree::from_json_with_prefix(document, Some(ATTR_META))?;
        info!("Registered meta schema '{}'", tree.id);
        self.meta_schema = Some(tree);
        Ok(())
    }

    pub fn register_resource_type(&mut self, mut resource_type: ResourceType) -> AppResult<()> {
        if resource_type.name.is_empty() {
            return Err(AppError::Configuration(
                "resource type without a name".to_string(),
            ));
        }
        if self.schema(&resource_type.schema).is_none() {
            return Err(AppError::Configuration(format!(
                "resource type '{}' references unknown schema '{}'",
                resource_type.name, resource_type.schema
            )));
        }
        for extension in &resource_type.extensions {
            if self.schema(&extension.schema).is_none() {
                return Err(AppError::Configuration(format!(
                    "resource type '{}' references unknown extension schema '{}'",
                    resource_type.name, extension.schema
                )));
            }
        }
        if !resource_type.endpoint.starts_with('/') {
            resource_type.endpoint = format!("/{}", resource_type.endpoint);
        }

        info!(
            "Registered resource type '{}' at '{}' ({} extensions)",
            resource_type.name,
            resource_type.endpoint,
            resource_type.extensions.len()
        );
        self.resource_types
            .retain(|existing| !existing.name.eq_ignore_ascii_case(&resource_type.name));
        self.resource_types.push(resource_type);
        Ok(())
    }

    pub fn schema(&self, schema_id: &str) -> Option<&SchemaTree> {
        self.schemas.get(&schema_id.to_lowercase())
    }

    pub fn meta_schema(&self) -> Option<&SchemaTree> {
        self.meta_schema.as_ref()
    }

    pub fn resource_type(&self, name: &str) -> Option<&ResourceType> {
        self.resource_types
            .iter()
            .find(|rt| rt.name.eq_ignore_ascii_case(name))
    }

    pub fn resource_types(&self) -> &[ResourceType] {
        &self.resource_types
    }

    /// True if `name` is a registered resource type name or endpoint
    pub fn is_resource_type_registered(&self, name: &str) -> bool {
        let endpoint = name.trim_start_matches('/');
        self.resource_types.iter().any(|rt| {
            rt.name.eq_ignore_ascii_case(name)
                || rt.endpoint.trim_start_matches('/').eq_ignore_ascii_case(endpoint)
        })
    }

    /// Resolves main and extension schemas of a registered resource type
    pub fn resource_schema(&self, resource_type_name: &str) -> AppResult<ResourceSchema<'_>> {
        let resource_type = self.resource_type(resource_type_name).ok_or_else(|| {
            AppError::InternalServer {
                message: format!("resource type '{}' is not registered", resource_type_name),
                scim_type: None,
            }
        })?;
        let main = self.schema(&resource_type.schema).ok_or_else(|| {
            AppError::InternalServer {
                message: format!("schema '{}' is not registered", resource_type.schema),
                scim_type: None,
            }
        })?;
        let mut extensions = Vec::with_capacity(resource_type.extensions.len());
        for extension in &resource_type.extensions {
            let tree = self.schema(&extension.schema).ok_or_else(|| {
                AppError::InternalServer {
                    message: format!("extension schema '{}' is not registered", extension.schema),
                    scim_type: None,
                }
            })?;
            extensions.push((extension, tree));
        }
        Ok(ResourceSchema {
            resource_type,
            main,
            extensions,
        })
    }

    /// Finds the main schema and the extension schemas a document declares in `schemas`.
    ///
    /// A schema that is the main schema of a registered resource type wins over an
    /// extension schema listed before it. Extensions are the declared schemas that the
    /// resource type of the main schema lists, in document order.
    pub fn resolve_schema_for_document(
        &self,
        document: &Value,
    ) -> AppResult<(&SchemaTree, Vec<&SchemaTree>)> {
        let declared: Vec<&str> = document
            .get(ATTR_SCHEMAS)
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let main = declared.iter().find(|id| {
            self.resource_types
                .iter()
                .any(|rt| rt.schema.eq_ignore_ascii_case(id))
        });
        let main = main
            .or_else(|| declared.first())
            .and_then(|id| self.schema(id))
            .ok_or_else(|| AppError::DocumentValidation {
                message: format!(
                    "document does not declare a registered schema in '{}': {:?}",
                    ATTR_SCHEMAS, declared
                ),
                status: 400,
            })?;

        let extensions = match self.resource_type_for_schema(&main.id) {
            Some(resource_type) => declared
                .iter()
                .filter(|id| {
                    resource_type
                        .extensions
                        .iter()
                        .any(|ext| ext.schema.eq_ignore_ascii_case(id))
                })
                .filter_map(|id| self.schema(id))
                .collect(),
            None => Vec::new(),
        };
        Ok((main, extensions))
    }

    /// Resource type whose main schema is `schema_id`
    pub fn resource_type_for_schema(&self, schema_id: &str) -> Option<&ResourceType> {
        self.resource_types
            .iter()
            .find(|rt| rt.schema.eq_ignore_ascii_case(schema_id))
    }
}

pub fn default_resource_types() -> Vec<ResourceType> {
    vec![
        ResourceType::new("User", "/Users", SCIM_SCHEMA_CORE_USER)
            .with_extension(SCIM_SCHEMA_ENTERPRISE_USER, false),
        ResourceType::new("Group", "/Groups", SCIM_SCHEMA_CORE_GROUP),
    ]
}
