use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::schema::definitions::{
    AttributeType, Mutability, ReferenceType, Returned, Uniqueness,
};
use crate::schema::tree::SchemaTree;
use crate::utils::parse_scim_datetime;

/// Index of a descriptor inside the arena of its owning `SchemaTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId(pub(crate) usize);

/// Optional value constraints declared on an attribute
#[derive(Debug, Clone, Default)]
pub struct ValidationConstraints {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub multiple_of: Option<f64>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub pattern: Option<Regex>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

/// Schema metadata of a single attribute or sub-attribute
#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub id: AttributeId,
    pub parent: Option<AttributeId>,
    /// Id of the schema declaring this attribute
    pub resource_uri: String,
    pub name_prefix: Option<String>,
    /// Dotted path from the root, e.g. `name.givenName`
    pub scim_node_name: String,
    pub name: String,
    pub attr_type: AttributeType,
    pub description: String,
    pub mutability: Mutability,
    pub returned: Returned,
    pub uniqueness: Uniqueness,
    pub multi_valued: bool,
    pub required: bool,
    pub case_exact: bool,
    pub canonical_values: Vec<String>,
    pub reference_types: Vec<ReferenceType>,
    /// Target resource type name of a `resource` reference
    pub resource_type_reference: Option<String>,
    pub constraints: ValidationConstraints,
    pub default_value: Option<Value>,
    pub sub_attributes: Vec<AttributeId>,
}

impl AttributeDescriptor {
    /// Parses the descriptor fields of one attribute node.
    ///
    /// Sub-attributes are not visited here; the owning tree walks `subAttributes`
    /// and links the children once they have been allocated.
    pub fn from_json(
        node: &Value,
        id: AttributeId,
        parent: Option<&AttributeDescriptor>,
        resource_uri: &str,
        name_prefix: Option<&str>,
    ) -> AppResult<Self> {
        let obj = node.as_object().ok_or_else(|| {
            AppError::invalid_schema(format!(
                "attribute definition in schema '{}' must be a JSON object",
                resource_uri
            ))
        })?;

        let name = required_string(obj, "name", resource_uri, "<unnamed>")?;
        let attr_type: AttributeType = required_enum(obj, "type", resource_uri, &name)?;
        let description = required_string(obj, "description", resource_uri, &name)?;

        let scim_node_name = match parent {
            Some(p) => format!("{}.{}", p.scim_node_name, name),
            None => match name_prefix {
                Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, name),
                _ => name.clone(),
            },
        };

        let mut reference_types: Vec<ReferenceType> =
            optional_enum(obj, "referenceTypes", resource_uri, &name)?.unwrap_or_default();
        if attr_type == AttributeType::Reference && reference_types.is_empty() {
            reference_types.push(ReferenceType::External);
        }

        let mutability: Mutability =
            optional_enum(obj, "mutability", resource_uri, &name)?.unwrap_or_default();
        let returned: Returned =
            optional_enum(obj, "returned", resource_uri, &name)?.unwrap_or_default();
        let uniqueness: Uniqueness =
            optional_enum(obj, "uniqueness", resource_uri, &name)?.unwrap_or_default();

        let mut descriptor = AttributeDescriptor {
            id,
            parent: parent.map(|p| p.id),
            resource_uri: resource_uri.to_string(),
            name_prefix: name_prefix.map(|p| p.to_string()),
            scim_node_name,
            name,
            attr_type,
            description,
            mutability,
            returned,
            uniqueness,
            multi_valued: obj.get("multiValued").and_then(Value::as_bool).unwrap_or(false),
            required: obj.get("required").and_then(Value::as_bool).unwrap_or(false),
            case_exact: obj.get("caseExact").and_then(Value::as_bool).unwrap_or(false),
            canonical_values: obj
                .get("canonicalValues")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            reference_types,
            resource_type_reference: obj
                .get("resourceType")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            constraints: ValidationConstraints::default(),
            default_value: None,
            sub_attributes: Vec::new(),
        };

        descriptor.validate_declaration()?;
        descriptor.read_constraints(obj)?;
        if let Some(raw) = obj.get("defaultValue") {
            descriptor.set_default_value(raw);
        }
        Ok(descriptor)
    }

    /// `<schemaId>:<scimNodeName>`
    pub fn full_resource_name(&self) -> String {
        format!("{}:{}", self.resource_uri, self.scim_node_name)
    }

    pub fn is_complex(&self) -> bool {
        self.attr_type == AttributeType::Complex
    }

    pub fn is_multi_valued_complex(&self) -> bool {
        self.is_complex() && self.multi_valued
    }

    pub fn is_child_of_complex(&self) -> bool {
        self.parent.is_some()
    }

    /// The parent is resolved through the tree owning this descriptor
    pub fn is_child_of_multi_valued_complex(&self, tree: &SchemaTree) -> bool {
        tree.parent_of(self)
            .is_some_and(AttributeDescriptor::is_multi_valued_complex)
    }

    pub fn is_read_only(&self) -> bool {
        self.mutability == Mutability::ReadOnly
    }

    pub fn is_immutable(&self) -> bool {
        self.mutability == Mutability::Immutable
    }

    pub fn is_read_write(&self) -> bool {
        self.mutability == Mutability::ReadWrite
    }

    pub fn is_write_only(&self) -> bool {
        self.mutability == Mutability::WriteOnly
    }

    /// Direct resource reference usable with bulkId references
    pub(crate) fn is_simple_bulk_candidate(&self) -> bool {
        self.attr_type == AttributeType::Reference
            && self.reference_types == [ReferenceType::Resource]
            && !self.is_read_only()
            && self.resource_type_reference.is_some()
    }

    fn validate_declaration(&self) -> AppResult<()> {
        if self.mutability == Mutability::ReadOnly && self.returned == Returned::Never {
            return Err(AppError::invalid_schema(format!(
                "The attribute with the name '{}' has an invalid declaration. mutability 'readOnly' \
                 and returned 'never' are an illegal combination",
                self.full_resource_name()
            )));
        }
        if self.mutability == Mutability::WriteOnly && self.returned != Returned::Never {
            return Err(AppError::invalid_schema(format!(
                "The attribute with the name '{}' has an invalid declaration. mutability 'writeOnly' \
                 must have a returned value of 'never'",
                self.full_resource_name()
            )));
        }
        if self.attr_type == AttributeType::Binary && !self.case_exact {
            return Err(AppError::invalid_schema(format!(
                "The attribute with the name '{}' has an invalid declaration. Binaries have to be case-exact",
                self.full_resource_name()
            )));
        }
        Ok(())
    }

    fn read_constraints(&mut self, obj: &Map<String, Value>) -> AppResult<()> {
        let numeric = matches!(self.attr_type, AttributeType::Integer | AttributeType::Decimal);
        let textual = matches!(self.attr_type, AttributeType::String | AttributeType::Reference);
        let temporal = self.attr_type == AttributeType::DateTime;

        for key in ["minimum", "maximum", "multipleOf"] {
            if let Some(raw) = obj.get(key) {
                self.ensure_applicable(key, numeric, "'integer' and 'decimal'")?;
                let number = raw.as_f64().ok_or_else(|| self.bad_constraint(key, raw))?;
                match key {
                    "minimum" => self.constraints.minimum = Some(number),
                    "maximum" => self.constraints.maximum = Some(number),
                    _ => {
                        if number <= 0.0 {
                            return Err(self.bad_constraint(key, raw));
                        }
                        self.constraints.multiple_of = Some(number)
                    }
                }
            }
        }

        for key in ["minLength", "maxLength"] {
            if let Some(raw) = obj.get(key) {
                self.ensure_applicable(key, textual, "'string' and 'reference'")?;
                let length = raw.as_u64().ok_or_else(|| self.bad_constraint(key, raw))?;
                if key == "minLength" {
                    self.constraints.min_length = Some(length);
                } else {
                    self.constraints.max_length = Some(length);
                }
            }
        }

        if let Some(raw) = obj.get("pattern") {
            self.ensure_applicable("pattern", textual, "'string' and 'reference'")?;
            let pattern = raw.as_str().ok_or_else(|| self.bad_constraint("pattern", raw))?;
            let regex = Regex::new(pattern).map_err(|e| {
                AppError::invalid_schema(format!(
                    "the given pattern is not a valid regular expression '{}': {}",
                    pattern, e
                ))
            })?;
            self.constraints.pattern = Some(regex);
        }

        for key in ["minItems", "maxItems"] {
            if let Some(raw) = obj.get(key) {
                self.ensure_applicable(key, self.multi_valued, "multivalued")?;
                let items = raw
                    .as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| self.bad_constraint(key, raw))?;
                if key == "minItems" {
                    self.constraints.min_items = Some(items);
                } else {
                    self.constraints.max_items = Some(items);
                }
            }
        }

        for key in ["notBefore", "notAfter"] {
            if let Some(raw) = obj.get(key) {
                self.ensure_applicable(key, temporal, "'dateTime'")?;
                let instant = raw
                    .as_str()
                    .and_then(parse_scim_datetime)
                    .ok_or_else(|| self.bad_constraint(key, raw))?;
                if key == "notBefore" {
                    self.constraints.not_before = Some(instant);
                } else {
                    self.constraints.not_after = Some(instant);
                }
            }
        }
        Ok(())
    }

    fn ensure_applicable(&self, key: &str, applicable: bool, types: &str) -> AppResult<()> {
        if applicable {
            Ok(())
        } else {
            Err(AppError::invalid_schema(format!(
                "The attribute '{}' is only applicable to {} types but was found on '{}'",
                key,
                types,
                self.full_resource_name()
            )))
        }
    }

    fn bad_constraint(&self, key: &str, raw: &Value) -> AppError {
        AppError::invalid_schema(format!(
            "illegal value '{}' for '{}' on attribute '{}'",
            raw,
            key,
            self.full_resource_name()
        ))
    }

    /// Assigns a default value if it applies to the attribute type; otherwise it is discarded.
    ///
    /// String literals are interpreted according to the type ("true", "42", a JSON object for
    /// complex attributes). Multi-valued attributes accept a JSON array and keep the elements
    /// that apply.
    pub fn set_default_value(&mut self, raw: &Value) {
        self.default_value = None;
        if matches!(self.attr_type, AttributeType::Binary | AttributeType::Any) {
            warn!(
                "Ignoring default value for attribute '{}': default values are not supported for type '{}'",
                self.name,
                self.attr_type.as_str()
            );
            return;
        }
        if let Value::String(s) = raw {
            if s.trim().is_empty() {
                return;
            }
        }

        if self.multi_valued {
            let as_array = match raw {
                Value::Array(items) => Some(items.clone()),
                Value::String(s) if s.trim_start().starts_with('[') => {
                    serde_json::from_str::<Vec<Value>>(s).ok()
                }
                _ => None,
            };
            if let Some(items) = as_array {
                let valid: Vec<Value> = items
                    .iter()
                    .filter_map(|item| self.interpret_default(item))
                    .collect();
                if valid.is_empty() {
                    warn!(
                        "Ignoring default value for attribute '{}' because no element of '{}' applies to type '{}'",
                        self.name,
                        raw,
                        self.attr_type.as_str()
                    );
                } else {
                    self.default_value = Some(Value::Array(valid));
                }
                return;
            }
        }

        match self.interpret_default(raw) {
            Some(value) => self.default_value = Some(value),
            None => warn!(
                "Ignoring default value for attribute '{}' because the value '{}' does not apply to type '{}'",
                self.name,
                raw,
                self.attr_type.as_str()
            ),
        }
    }

    fn interpret_default(&self, raw: &Value) -> Option<Value> {
        match (self.attr_type, raw) {
            (AttributeType::Boolean, Value::Bool(_)) => Some(raw.clone()),
            (AttributeType::Boolean, Value::String(s)) => {
                match s.trim().to_lowercase().as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    _ => None,
                }
            }
            (AttributeType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(raw.clone())
            }
            (AttributeType::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }
            (AttributeType::Decimal, Value::Number(_)) => Some(raw.clone()),
            (AttributeType::Decimal, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (AttributeType::Complex, Value::Object(_)) => Some(raw.clone()),
            (AttributeType::Complex, Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Object(_)) => Some(parsed),
                Ok(parsed @ Value::Array(_)) if !self.multi_valued => Some(parsed),
                _ => None,
            },
            (AttributeType::DateTime, Value::String(s)) => {
                parse_scim_datetime(s).map(|_| raw.clone())
            }
            (AttributeType::String | AttributeType::Reference, Value::String(_)) => {
                Some(raw.clone())
            }
            _ => None,
        }
    }
}

fn required_string(
    obj: &Map<String, Value>,
    key: &str,
    resource_uri: &str,
    attribute: &str,
) -> AppResult<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            AppError::invalid_schema(format!(
                "missing attribute '{}' on attribute definition '{}' in schema '{}'",
                key, attribute, resource_uri
            ))
        })
}

fn required_enum<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    key: &str,
    resource_uri: &str,
    attribute: &str,
) -> AppResult<T> {
    optional_enum(obj, key, resource_uri, attribute)?.ok_or_else(|| {
        AppError::invalid_schema(format!(
            "missing attribute '{}' on attribute definition '{}' in schema '{}'",
            key, attribute, resource_uri
        ))
    })
}

fn optional_enum<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    key: &str,
    resource_uri: &str,
    attribute: &str,
) -> AppResult<Option<T>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw.clone()).map(Some).map_err(|_| {
            AppError::invalid_schema(format!(
                "unknown value {} for '{}' on attribute '{}' in schema '{}'",
                raw, key, attribute, resource_uri
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URI: &str = "urn:test:schema";

    fn parse(node: Value) -> AppResult<AttributeDescriptor> {
        AttributeDescriptor::from_json(&node, AttributeId(0), None, URI, None)
    }

    #[test]
    fn test_child_of_multi_valued_complex() {
        let tree = SchemaTree::from_json(&json!({
            "id": URI,
            "attributes": [
                {"name": "emails", "type": "complex", "multiValued": true, "description": "Emails",
                 "subAttributes": [{"name": "value", "type": "string", "description": "Address"}]},
                {"name": "name", "type": "complex", "description": "Name",
                 "subAttributes": [{"name": "givenName", "type": "string", "description": "Given name"}]},
                {"name": "nickName", "type": "string", "description": "Nick name"}
            ]
        }))
        .unwrap();

        let email_value = tree.lookup("emails.value").unwrap();
        assert!(email_value.is_child_of_complex());
        assert!(email_value.is_child_of_multi_valued_complex(&tree));

        let given_name = tree.lookup("name.givenName").unwrap();
        assert!(given_name.is_child_of_complex());
        assert!(!given_name.is_child_of_multi_valued_complex(&tree));

        let emails = tree.lookup("emails").unwrap();
        assert!(!emails.is_child_of_multi_valued_complex(&tree));
        assert!(!tree.lookup("nickName").unwrap().is_child_of_multi_valued_complex(&tree));
    }

    #[test]
    fn test_defaults_applied() {
        let attr = parse(json!({"name": "nickName", "type": "string", "description": "d"})).unwrap();
        assert_eq!(attr.mutability, Mutability::ReadWrite);
        assert_eq!(attr.returned, Returned::Default);
        assert_eq!(attr.uniqueness, Uniqueness::None);
        assert!(!attr.multi_valued && !attr.required && !attr.case_exact);
        assert_eq!(attr.full_resource_name(), "urn:test:schema:nickName");
    }

    #[test]
    fn test_missing_mandatory_fields() {
        assert!(matches!(
            parse(json!({"type": "string", "description": "d"})),
            Err(AppError::InvalidSchema(_))
        ));
        assert!(matches!(
            parse(json!({"name": "a", "description": "d"})),
            Err(AppError::InvalidSchema(_))
        ));
        assert!(matches!(
            parse(json!({"name": "a", "type": "string"})),
            Err(AppError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_unknown_type_literal_rejected() {
        let result = parse(json!({"name": "a", "type": "text", "description": "d"}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_read_only_never_rejected() {
        let result = parse(json!({
            "name": "secret", "type": "string", "description": "d",
            "mutability": "readOnly", "returned": "never"
        }));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_write_only_must_never_be_returned() {
        let result = parse(json!({
            "name": "secret", "type": "string", "description": "d",
            "mutability": "writeOnly", "returned": "always"
        }));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_binary_requires_case_exact() {
        let result = parse(json!({"name": "cert", "type": "binary", "description": "d"}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));

        let ok = parse(json!({"name": "cert", "type": "binary", "description": "d", "caseExact": true}));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_reference_types_default_to_external() {
        let attr = parse(json!({"name": "profileUrl", "type": "reference", "description": "d"})).unwrap();
        assert_eq!(attr.reference_types, vec![ReferenceType::External]);
    }

    #[test]
    fn test_constraint_on_wrong_type_rejected() {
        let result = parse(json!({"name": "a", "type": "string", "description": "d", "minimum": 1}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
        let result = parse(json!({"name": "a", "type": "integer", "description": "d", "pattern": "x"}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
        let result = parse(json!({"name": "a", "type": "string", "description": "d", "minItems": 1}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
        let result = parse(json!({"name": "a", "type": "string", "description": "d", "notBefore": "2019-01-01T00:00:00Z"}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_constraints_parsed() {
        let attr = parse(json!({
            "name": "code", "type": "string", "description": "d",
            "minLength": 2, "maxLength": 5, "pattern": "^[a-z]+$"
        }))
        .unwrap();
        assert_eq!(attr.constraints.min_length, Some(2));
        assert_eq!(attr.constraints.max_length, Some(5));
        assert!(attr.constraints.pattern.as_ref().unwrap().is_match("abc"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = parse(json!({"name": "a", "type": "string", "description": "d", "pattern": "(["}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_default_values_by_type() {
        let attr = parse(json!({"name": "active", "type": "boolean", "description": "d", "defaultValue": "true"})).unwrap();
        assert_eq!(attr.default_value, Some(json!(true)));

        let attr = parse(json!({"name": "n", "type": "integer", "description": "d", "defaultValue": "abc"})).unwrap();
        assert_eq!(attr.default_value, None);

        let attr = parse(json!({"name": "n", "type": "decimal", "description": "d", "defaultValue": "1.5"})).unwrap();
        assert_eq!(attr.default_value, Some(json!(1.5)));

        let attr = parse(json!({
            "name": "c", "type": "complex", "description": "d",
            "defaultValue": "{\"value\": \"x\"}"
        }))
        .unwrap();
        assert_eq!(attr.default_value, Some(json!({"value": "x"})));

        let attr = parse(json!({"name": "b", "type": "binary", "caseExact": true, "description": "d", "defaultValue": "AAAA"})).unwrap();
        assert_eq!(attr.default_value, None);
    }

    #[test]
    fn test_multi_valued_default_keeps_valid_elements() {
        let attr = parse(json!({
            "name": "numbers", "type": "integer", "multiValued": true, "description": "d",
            "defaultValue": "[1, \"x\", 3]"
        }))
        .unwrap();
        assert_eq!(attr.default_value, Some(json!([1, 3])));
    }
}
