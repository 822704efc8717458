use base64::{engine::general_purpose::STANDARD, Engine as _};
use fluent_uri::Uri;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::error::{AppError, AppResult, ScimType};
use crate::schema::attribute::AttributeDescriptor;
use crate::schema::definitions::{
    AttributeType, ReferenceType, Returned, Uniqueness, ATTR_META, ATTR_PRIMARY, ATTR_SCHEMAS,
};
use crate::schema::registry::SchemaRegistry;
use crate::schema::tree::SchemaTree;
use crate::utils::parse_scim_datetime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
}

/// Direction a document travels in, which decides required-ness and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Request(HttpMethod),
    Response,
    /// Structural check only: no required or direction rules
    SchemaValidation,
}

impl ValidationMode {
    /// Status of validation failures: the client is at fault only for requests
    pub fn error_status(&self) -> u16 {
        match self {
            ValidationMode::Request(_) => 400,
            ValidationMode::Response | ValidationMode::SchemaValidation => 500,
        }
    }
}

/// Validates a resource document against its schemas and returns the filtered copy
/// that may travel further in the given direction.
pub struct DocumentValidator<'r> {
    registry: &'r SchemaRegistry,
    mode: ValidationMode,
    attributes: Vec<String>,
    excluded_attributes: Vec<String>,
}

impl<'r> DocumentValidator<'r> {
    pub fn for_request(registry: &'r SchemaRegistry, method: HttpMethod) -> Self {
        Self::new(registry, ValidationMode::Request(method))
    }

    pub fn for_response(registry: &'r SchemaRegistry) -> Self {
        Self::new(registry, ValidationMode::Response)
    }

    pub fn for_schema_document(registry: &'r SchemaRegistry) -> Self {
        Self::new(registry, ValidationMode::SchemaValidation)
    }

    pub fn new(registry: &'r SchemaRegistry, mode: ValidationMode) -> Self {
        DocumentValidator {
            registry,
            mode,
            attributes: Vec::new(),
            excluded_attributes: Vec::new(),
        }
    }

    /// Applies the `attributes` / `excludedAttributes` query parameters to responses
    pub fn with_attribute_params(
        mut self,
        attributes: &[String],
        excluded_attributes: &[String],
    ) -> Self {
        self.attributes = attributes.iter().map(|a| a.trim().to_lowercase()).collect();
        self.excluded_attributes = excluded_attributes
            .iter()
            .map(|a| a.trim().to_lowercase())
            .collect();
        self
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validates a document whose `schemas` attribute must contain `schema.id`
    pub fn validate(&self, schema: &SchemaTree, document: &Value) -> AppResult<Value> {
        let obj = self.as_object(document, "document")?;
        let schemas = self.verify_schemas_attribute(schema, obj)?;
        let mut validated = self.validate_attributes(schema, None, obj)?;
        validated.insert(ATTR_SCHEMAS.to_string(), Value::Array(schemas));
        Ok(Value::Object(validated))
    }

    /// Validates the content of an extension block, which carries no `schemas` attribute
    pub fn validate_extension(&self, schema: &SchemaTree, block: &Value) -> AppResult<Value> {
        let obj = self.as_object(block, &schema.id)?;
        Ok(Value::Object(self.validate_attributes(schema, None, obj)?))
    }

    /// Validates a complete resource: main schema, extensions and (on responses) `meta`
    pub fn validate_resource(&self, resource_type: &str, document: &Value) -> AppResult<Value> {
        let resource_schema = self.registry.resource_schema(resource_type)?;
        let obj = self.as_object(document, "document")?;
        let mut schemas = self.verify_schemas_attribute(resource_schema.main, obj)?;

        for declared in schemas.iter().filter_map(Value::as_str) {
            if !declared.eq_ignore_ascii_case(&resource_schema.main.id)
                && resource_schema.extension(declared).is_none()
            {
                return Err(self.error(format!(
                    "schema '{}' is not an extension of resource type '{}'",
                    declared, resource_schema.resource_type.name
                )));
            }
        }

        let mut validated = self.validate_attributes(resource_schema.main, None, obj)?;

        for (extension, tree) in &resource_schema.extensions {
            let declared = schemas
                .iter()
                .any(|s| s.as_str().is_some_and(|s| s.eq_ignore_ascii_case(&extension.schema)));
            match find_value(obj, &extension.schema).filter(|v| !v.is_null()) {
                Some(block) => {
                    let content = self.validate_extension(tree, block)?;
                    if content.as_object().is_some_and(|o| o.is_empty()) {
                        debug!("Extension '{}' is empty after validation", extension.schema);
                        schemas.retain(|s| {
                            !s.as_str().is_some_and(|s| s.eq_ignore_ascii_case(&extension.schema))
                        });
                        if extension.required && self.checks_required() {
                            return Err(self.missing_required_extension(&extension.schema));
                        }
                    } else {
                        if !declared {
                            debug!("Adding undeclared extension '{}' to schemas", extension.schema);
                            schemas.push(Value::String(extension.schema.clone()));
                        }
                        validated.insert(extension.schema.clone(), content);
                    }
                }
                None if declared => {
                    let message = format!(
                        "extension '{}' is declared in '{}' but missing in the document",
                        extension.schema, ATTR_SCHEMAS
                    );
                    return Err(match self.mode {
                        ValidationMode::Request(_) => {
                            AppError::bad_request(ScimType::MissingExtension, message)
                        }
                        _ => AppError::InternalServer {
                            message,
                            scim_type: Some(ScimType::MissingExtension),
                        },
                    });
                }
                None => {
                    if extension.required && self.checks_required() {
                        return Err(self.missing_required_extension(&extension.schema));
                    }
                }
            }
        }

        if self.mode == ValidationMode::Response {
            if let (Some(meta_tree), Some(meta)) = (self.registry.meta_schema(), find_value(obj, ATTR_META)) {
                let meta_obj = self.as_object(meta, ATTR_META)?;
                let meta_validated = self.validate_attributes(meta_tree, None, meta_obj)?;
                if !meta_validated.is_empty() {
                    validated.insert(ATTR_META.to_string(), Value::Object(meta_validated));
                }
            }
        }

        validated.insert(ATTR_SCHEMAS.to_string(), Value::Array(schemas));
        Ok(Value::Object(validated))
    }

    fn checks_required(&self) -> bool {
        match self.mode {
            ValidationMode::Request(method) => method != HttpMethod::Patch,
            ValidationMode::Response => true,
            ValidationMode::SchemaValidation => false,
        }
    }

    fn missing_required_extension(&self, schema: &str) -> AppError {
        self.error(format!("required extension '{}' is missing", schema))
    }

    fn verify_schemas_attribute(&self, schema: &SchemaTree, obj: &Map<String, Value>) -> AppResult<Vec<Value>> {
        let declared = match find_value(obj, ATTR_SCHEMAS) {
            Some(Value::Array(ids)) => ids.clone(),
            Some(Value::String(id)) => vec![Value::String(id.clone())],
            _ => {
                return Err(self.error(format!(
                    "document does not have a '{}' attribute",
                    ATTR_SCHEMAS
                )))
            }
        };
        if declared.iter().any(|id| !id.is_string()) {
            return Err(self.error(format!("'{}' must only contain strings", ATTR_SCHEMAS)));
        }
        let contains_main = declared
            .iter()
            .filter_map(Value::as_str)
            .any(|id| id.eq_ignore_ascii_case(&schema.id));
        if !contains_main {
            return Err(self.error(format!(
                "'{}' does not contain the schema '{}': {:?}",
                ATTR_SCHEMAS, schema.id, declared
            )));
        }
        Ok(declared)
    }

    /// Validates the attributes of `parent` (top level when `None`) found in `obj`
    fn validate_attributes(
        &self,
        tree: &SchemaTree,
        parent: Option<&AttributeDescriptor>,
        obj: &Map<String, Value>,
    ) -> AppResult<Map<String, Value>> {
        let descriptors: Vec<&AttributeDescriptor> = match parent {
            Some(p) => tree.sub_attributes(p).collect(),
            None => tree.attributes().collect(),
        };

        for key in obj.keys() {
            if !descriptors.iter().any(|d| d.name.eq_ignore_ascii_case(key)) {
                trace!("Ignoring attribute '{}' unknown to schema '{}'", key, tree.id);
            }
        }

        let mut validated = Map::new();
        for attr in descriptors {
            if let Some(value) = self.validate_attribute(tree, attr, find_value(obj, &attr.name))? {
                validated.insert(attr.name.clone(), value);
            }
        }
        Ok(validated)
    }

    fn validate_attribute(
        &self,
        tree: &SchemaTree,
        attr: &AttributeDescriptor,
        value: Option<&Value>,
    ) -> AppResult<Option<Value>> {
        let mut value = value.filter(|v| !is_absent(v)).cloned();

        if !self.passes_direction_filter(attr, value.is_some()) {
            return Ok(None);
        }

        if value.is_none() {
            if let ValidationMode::Request(HttpMethod::Post | HttpMethod::Put) = self.mode {
                if let Some(default) = &attr.default_value {
                    debug!("Using default value for '{}'", attr.full_resource_name());
                    value = Some(default.clone());
                }
            }
        }

        let Some(value) = value else {
            self.check_required(attr)?;
            return Ok(None);
        };

        if attr.multi_valued {
            self.validate_multi_valued(tree, attr, value)
        } else if attr.is_complex() {
            let obj = self.as_object(&value, &attr.full_resource_name())?;
            let validated = self.validate_attributes(tree, Some(attr), obj)?;
            if validated.is_empty() {
                self.check_required(attr)?;
                Ok(None)
            } else {
                Ok(Some(Value::Object(validated)))
            }
        } else {
            if value.is_array() {
                return Err(self.error(format!(
                    "attribute '{}' is not multivalued but an array was found",
                    attr.full_resource_name()
                )));
            }
            verify_simple_value(self.registry, attr, &value).map_err(|m| self.error(m))?;
            Ok(Some(value))
        }
    }

    fn validate_multi_valued(
        &self,
        tree: &SchemaTree,
        attr: &AttributeDescriptor,
        value: Value,
    ) -> AppResult<Option<Value>> {
        let elements = match value {
            Value::Array(elements) => elements,
            single => vec![single],
        };

        let mut validated: Vec<Value> = Vec::with_capacity(elements.len());
        for element in elements.iter().filter(|e| !e.is_null()) {
            if attr.is_complex() {
                let obj = self.as_object(element, &attr.full_resource_name())?;
                let content = self.validate_attributes(tree, Some(attr), obj)?;
                if !content.is_empty() {
                    validated.push(Value::Object(content));
                }
            } else {
                verify_simple_value(self.registry, attr, element).map_err(|m| self.error(m))?;
                validated.push(element.clone());
            }
        }

        verify_items(attr, &validated).map_err(|m| self.error(m))?;
        verify_primary(attr, &validated).map_err(|m| self.error(m))?;
        if attr.uniqueness != Uniqueness::None {
            verify_unique_elements(attr, &validated).map_err(|m| self.error(m))?;
        }

        if validated.is_empty() {
            self.check_required(attr)?;
            Ok(None)
        } else {
            Ok(Some(Value::Array(validated)))
        }
    }

    /// Decides whether an attribute may travel in the current direction at all.
    ///
    /// Dropped attributes are neither required-checked nor value-validated.
    fn passes_direction_filter(&self, attr: &AttributeDescriptor, present: bool) -> bool {
        match self.mode {
            ValidationMode::Request(_) => {
                if attr.is_read_only() {
                    if present {
                        trace!("Dropping readOnly attribute '{}' from request", attr.full_resource_name());
                    }
                    return false;
                }
                true
            }
            ValidationMode::Response => {
                if attr.is_write_only() || attr.returned == Returned::Never {
                    if present {
                        warn!(
                            "Attribute '{}' must never be returned and was removed from the response",
                            attr.full_resource_name()
                        );
                    }
                    return false;
                }
                self.passes_attribute_params(attr)
            }
            ValidationMode::SchemaValidation => true,
        }
    }

    fn passes_attribute_params(&self, attr: &AttributeDescriptor) -> bool {
        match attr.returned {
            Returned::Always => true,
            Returned::Never => false,
            Returned::Request => is_named(&self.attributes, attr),
            Returned::Default => {
                if is_excluded(&self.excluded_attributes, attr) {
                    return false;
                }
                self.attributes.is_empty() || is_named(&self.attributes, attr)
            }
        }
    }

    fn check_required(&self, attr: &AttributeDescriptor) -> AppResult<()> {
        if !attr.required {
            return Ok(());
        }
        let missing_is_error = match self.mode {
            ValidationMode::Request(method) => {
                attr.is_read_write()
                    || attr.is_write_only()
                    || (attr.is_immutable() && method == HttpMethod::Post)
            }
            ValidationMode::Response => !attr.is_write_only(),
            ValidationMode::SchemaValidation => false,
        };
        if missing_is_error {
            Err(self.error(format!(
                "required attribute '{}' is missing",
                attr.full_resource_name()
            )))
        } else {
            Ok(())
        }
    }

    fn as_object<'v>(&self, value: &'v Value, what: &str) -> AppResult<&'v Map<String, Value>> {
        value.as_object().ok_or_else(|| {
            self.error(format!(
                "'{}' must be a JSON object but was of type '{}'",
                what,
                value_kind(value)
            ))
        })
    }

    fn error(&self, message: String) -> AppError {
        AppError::DocumentValidation {
            message,
            status: self.mode.error_status(),
        }
    }
}

/// Null and empty arrays are treated like a missing attribute
fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Looks up a key case-insensitively, preferring an exact match
pub fn find_value<'v>(obj: &'v Map<String, Value>, name: &str) -> Option<&'v Value> {
    obj.get(name).or_else(|| {
        obj.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn param_names<'a>(params: &'a [String], attr: &'a AttributeDescriptor) -> impl Iterator<Item = String> + 'a {
    let schema_prefix = format!("{}:", attr.resource_uri.to_lowercase());
    params.iter().map(move |param| {
        param
            .strip_prefix(&schema_prefix)
            .unwrap_or(param)
            .to_string()
    })
}

/// True if a parameter names the attribute, one of its ancestors or one of its descendants
fn is_named(params: &[String], attr: &AttributeDescriptor) -> bool {
    let node = attr.scim_node_name.to_lowercase();
    param_names(params, attr).any(|p| {
        p == node || node.starts_with(&format!("{}.", p)) || p.starts_with(&format!("{}.", node))
    })
}

/// True if a parameter names the attribute or one of its ancestors
fn is_excluded(params: &[String], attr: &AttributeDescriptor) -> bool {
    let node = attr.scim_node_name.to_lowercase();
    param_names(params, attr).any(|p| p == node || node.starts_with(&format!("{}.", p)))
}

pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "decimal",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Checks a single non-complex value against type, canonical values, reference types and
/// constraints of its descriptor. The message describes the first violation found.
pub fn verify_simple_value(
    registry: &SchemaRegistry,
    attr: &AttributeDescriptor,
    value: &Value,
) -> Result<(), String> {
    let mismatch = || {
        format!(
            "value of attribute '{}' must be of type '{}' but was '{}': {}",
            attr.full_resource_name(),
            attr.attr_type.as_str(),
            value_kind(value),
            value
        )
    };
    let constraints = &attr.constraints;

    match attr.attr_type {
        AttributeType::Any => Ok(()),
        AttributeType::Complex => Err(mismatch()),
        AttributeType::Boolean => value.as_bool().map(|_| ()).ok_or_else(mismatch),
        AttributeType::Integer | AttributeType::Decimal => {
            let number = match value {
                Value::Number(n) if attr.attr_type == AttributeType::Decimal || n.is_i64() || n.is_u64() => {
                    n.as_f64().ok_or_else(mismatch)?
                }
                _ => return Err(mismatch()),
            };
            verify_number(attr, number)
        }
        AttributeType::DateTime => {
            let text = value.as_str().ok_or_else(mismatch)?;
            let instant = parse_scim_datetime(text).ok_or_else(|| {
                format!(
                    "value '{}' of attribute '{}' is not a valid xsd:dateTime",
                    text,
                    attr.full_resource_name()
                )
            })?;
            if constraints.not_before.is_some_and(|limit| instant < limit) {
                return Err(format!(
                    "value '{}' of attribute '{}' lies before the allowed date",
                    text,
                    attr.full_resource_name()
                ));
            }
            if constraints.not_after.is_some_and(|limit| instant > limit) {
                return Err(format!(
                    "value '{}' of attribute '{}' lies after the allowed date",
                    text,
                    attr.full_resource_name()
                ));
            }
            Ok(())
        }
        AttributeType::Binary => {
            let text = value.as_str().ok_or_else(mismatch)?;
            STANDARD.decode(text).map(|_| ()).map_err(|_| {
                format!(
                    "value of attribute '{}' is not valid base64",
                    attr.full_resource_name()
                )
            })
        }
        AttributeType::String | AttributeType::Reference => {
            let text = value.as_str().ok_or_else(mismatch)?;
            verify_text(attr, text)?;
            if attr.attr_type == AttributeType::Reference {
                verify_reference(registry, attr, text)?;
            }
            Ok(())
        }
    }
}

fn verify_number(attr: &AttributeDescriptor, number: f64) -> Result<(), String> {
    let constraints = &attr.constraints;
    if constraints.minimum.is_some_and(|min| number < min) {
        return Err(format!(
            "value {} of attribute '{}' is lower than the minimum {}",
            number,
            attr.full_resource_name(),
            constraints.minimum.unwrap_or_default()
        ));
    }
    if constraints.maximum.is_some_and(|max| number > max) {
        return Err(format!(
            "value {} of attribute '{}' is greater than the maximum {}",
            number,
            attr.full_resource_name(),
            constraints.maximum.unwrap_or_default()
        ));
    }
    if let Some(multiple_of) = constraints.multiple_of {
        let quotient = number / multiple_of;
        if (quotient - quotient.round()).abs() > 1e-9 {
            return Err(format!(
                "value {} of attribute '{}' is not a multiple of {}",
                number,
                attr.full_resource_name(),
                multiple_of
            ));
        }
    }
    Ok(())
}

fn verify_text(attr: &AttributeDescriptor, text: &str) -> Result<(), String> {
    let constraints = &attr.constraints;
    let length = text.chars().count() as u64;
    if constraints.min_length.is_some_and(|min| length < min) {
        return Err(format!(
            "value '{}' of attribute '{}' is shorter than {} characters",
            text,
            attr.full_resource_name(),
            constraints.min_length.unwrap_or_default()
        ));
    }
    if constraints.max_length.is_some_and(|max| length > max) {
        return Err(format!(
            "value '{}' of attribute '{}' is longer than {} characters",
            text,
            attr.full_resource_name(),
            constraints.max_length.unwrap_or_default()
        ));
    }
    if let Some(pattern) = &constraints.pattern {
        if !pattern.is_match(text) {
            return Err(format!(
                "value '{}' of attribute '{}' does not match the pattern '{}'",
                text,
                attr.full_resource_name(),
                pattern.as_str()
            ));
        }
    }
    if !attr.canonical_values.is_empty() {
        let known = attr.canonical_values.iter().any(|canonical| {
            if attr.case_exact {
                canonical == text
            } else {
                canonical.eq_ignore_ascii_case(text)
            }
        });
        if !known {
            return Err(format!(
                "value '{}' of attribute '{}' is not one of the canonical values {:?}",
                text,
                attr.full_resource_name(),
                attr.canonical_values
            ));
        }
    }
    Ok(())
}

fn verify_reference(registry: &SchemaRegistry, attr: &AttributeDescriptor, text: &str) -> Result<(), String> {
    let accepted = attr.reference_types.iter().any(|reference_type| match reference_type {
        ReferenceType::External => true,
        ReferenceType::Uri => Uri::parse(text).is_ok(),
        ReferenceType::Resource => references_registered_resource(registry, text),
    });
    if accepted {
        Ok(())
    } else {
        Err(format!(
            "value '{}' of attribute '{}' does not match any of the reference types {:?}",
            text,
            attr.full_resource_name(),
            attr.reference_types
        ))
    }
}

/// A resource reference is a resource type name or a URI with a resource type endpoint in its path
fn references_registered_resource(registry: &SchemaRegistry, text: &str) -> bool {
    if registry.is_resource_type_registered(text) {
        return true;
    }
    let without_suffix = text.split(['?', '#']).next().unwrap_or_default();
    without_suffix
        .split('/')
        .filter(|segment| !segment.is_empty())
        .any(|segment| registry.is_resource_type_registered(segment))
}

fn verify_items(attr: &AttributeDescriptor, elements: &[Value]) -> Result<(), String> {
    let constraints = &attr.constraints;
    if constraints.min_items.is_some_and(|min| elements.len() < min) {
        return Err(format!(
            "attribute '{}' must have at least {} elements but has {}",
            attr.full_resource_name(),
            constraints.min_items.unwrap_or_default(),
            elements.len()
        ));
    }
    if constraints.max_items.is_some_and(|max| elements.len() > max) {
        return Err(format!(
            "attribute '{}' must have at most {} elements but has {}",
            attr.full_resource_name(),
            constraints.max_items.unwrap_or_default(),
            elements.len()
        ));
    }
    Ok(())
}

/// At most one element of a multi-valued complex attribute may be primary
pub fn verify_primary(attr: &AttributeDescriptor, elements: &[Value]) -> Result<(), String> {
    let primary_count = elements
        .iter()
        .filter(|e| e.get(ATTR_PRIMARY) == Some(&Value::Bool(true)))
        .count();
    if primary_count > 1 {
        return Err(format!(
            "attribute '{}' has {} elements with 'primary' set to true but at most one is allowed",
            attr.full_resource_name(),
            primary_count
        ));
    }
    Ok(())
}

fn verify_unique_elements(attr: &AttributeDescriptor, elements: &[Value]) -> Result<(), String> {
    for (index, element) in elements.iter().enumerate() {
        if elements[..index].contains(element) {
            return Err(format!(
                "attribute '{}' must have unique values but '{}' was found twice",
                attr.full_resource_name(),
                element
            ));
        }
    }
    Ok(())
}
