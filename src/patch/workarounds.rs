//! Rewrites for PATCH operations sent by clients that do not follow RFC 7644,
//! most prominently the MS Azure AD provisioning service.
//!
//! Every rule is a plain value holding a predicate and a rewrite function. Rules
//! never fail: when the operation does not have exactly the shape a rule targets,
//! the rule leaves it untouched and the engine reports the problem in its own terms.

use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::CompatibilityConfig;
use crate::patch::resolver::PatchPathResolver;
use crate::patch::{PatchOp, PatchOperation};
use crate::schema::definitions::{ATTR_SCHEMAS, ATTR_VALUE};
use crate::schema::{AttributeDescriptor, ResourceSchema, SchemaRegistry};

/// What a rule may look at besides the operation itself
#[derive(Debug, Clone, Copy)]
pub struct PatchContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub resource: &'a ResourceSchema<'a>,
}

impl<'a> PatchContext<'a> {
    pub fn new(registry: &'a SchemaRegistry, resource: &'a ResourceSchema<'a>) -> Self {
        PatchContext { registry, resource }
    }

    fn governing_attribute(&self, path: &str) -> Option<&'a AttributeDescriptor> {
        PatchPathResolver::new(self.resource).governing_attribute(path)
    }

    fn is_extension(&self, key: &str) -> bool {
        self.resource.extension(key).is_some()
    }
}

#[derive(Clone, Copy)]
pub struct PatchWorkaround {
    pub name: &'static str,
    pub applies: fn(&CompatibilityConfig, &PatchContext<'_>, &PatchOperation) -> bool,
    /// `None` leaves the operation unchanged
    pub rewrite: fn(&PatchContext<'_>, &PatchOperation) -> Option<PatchOperation>,
    /// False stops the chain after this rule applied
    pub continue_chain: bool,
}

impl fmt::Debug for PatchWorkaround {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchWorkaround")
            .field("name", &self.name)
            .field("continue_chain", &self.continue_chain)
            .finish()
    }
}

/// Ordered list of workarounds, switched by a [`CompatibilityConfig`]
#[derive(Debug, Clone)]
pub struct WorkaroundChain {
    config: CompatibilityConfig,
    rules: Vec<PatchWorkaround>,
}

impl WorkaroundChain {
    pub fn new(config: CompatibilityConfig) -> Self {
        WorkaroundChain {
            config,
            rules: default_workarounds(),
        }
    }

    pub fn with_rules(config: CompatibilityConfig, rules: Vec<PatchWorkaround>) -> Self {
        WorkaroundChain { config, rules }
    }

    pub fn rules(&self) -> &[PatchWorkaround] {
        &self.rules
    }

    pub fn normalize(&self, ctx: &PatchContext<'_>, operation: &PatchOperation) -> PatchOperation {
        let mut current = operation.clone();
        for rule in &self.rules {
            if !(rule.applies)(&self.config, ctx, &current) {
                continue;
            }
            match (rule.rewrite)(ctx, &current) {
                Some(rewritten) => {
                    trace!(
                        "Workaround '{}' rewrote {} into {}",
                        rule.name,
                        current.to_json(),
                        rewritten.to_json()
                    );
                    current = rewritten;
                }
                None => trace!("Workaround '{}' left the operation unchanged", rule.name),
            }
            if !rule.continue_chain {
                break;
            }
        }
        current
    }
}

pub fn default_workarounds() -> Vec<PatchWorkaround> {
    vec![
        PatchWorkaround {
            name: "dotted-attribute-names",
            applies: |config, _, op| {
                config.dotted_attribute_names
                    && op.op != PatchOp::Remove
                    && op.path.is_none()
                    && op.values.len() == 1
                    && op.values[0].is_object()
            },
            rewrite: rewrite_dotted_attribute_names,
            continue_chain: true,
        },
        PatchWorkaround {
            name: "value-sub-attribute",
            applies: |config, _, op| {
                config.value_sub_attribute && op.op != PatchOp::Remove && !op.values.is_empty()
            },
            rewrite: rewrite_value_sub_attribute,
            continue_chain: true,
        },
        PatchWorkaround {
            name: "complex-simple-value",
            applies: |config, _, op| {
                config.complex_simple_value
                    && op.op != PatchOp::Remove
                    && op.path.is_some()
                    && op.values.iter().any(is_scalar)
            },
            rewrite: rewrite_complex_simple_value,
            continue_chain: true,
        },
        PatchWorkaround {
            name: "remove-with-values",
            applies: |config, _, op| {
                config.remove_with_values
                    && op.op == PatchOp::Remove
                    && !op.values.is_empty()
                    && op.path.as_deref().is_some_and(|p| !p.contains('['))
            },
            rewrite: rewrite_remove_with_values,
            continue_chain: false,
        },
    ]
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_) | Value::Null)
}

/// `{"name.givenName": "x"}` becomes `{"name": {"givenName": "x"}}`
fn rewrite_dotted_attribute_names(
    ctx: &PatchContext<'_>,
    op: &PatchOperation,
) -> Option<PatchOperation> {
    let object = op.values.first()?.as_object()?;
    let declared_schemas: Vec<&str> = object
        .get(ATTR_SCHEMAS)
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut changed = false;
    let mut result = Map::new();
    for (key, value) in object {
        let is_extension_block = value.is_object()
            && (ctx.is_extension(key) || declared_schemas.iter().any(|s| s.eq_ignore_ascii_case(key)));
        if is_extension_block {
            if let Some(flattened) = value.as_object().and_then(nest_dotted_keys) {
                changed = true;
                merge_into(&mut result, key, Value::Object(flattened));
                continue;
            }
        }
        merge_into(&mut result, key, value.clone());
    }

    if let Some(nested) = nest_dotted_keys(&result) {
        changed = true;
        result = nested;
    }

    changed.then(|| PatchOperation {
        values: vec![Value::Object(result)],
        ..op.clone()
    })
}

/// Nests keys with exactly one dot; `None` if nothing changed
fn nest_dotted_keys(object: &Map<String, Value>) -> Option<Map<String, Value>> {
    let mut changed = false;
    let mut result = Map::new();
    for (key, value) in object {
        let split = key
            .split_once('.')
            .filter(|(parent, child)| {
                !key.contains(':') && !parent.is_empty() && !child.is_empty() && !child.contains('.')
            });
        match split {
            Some((parent, child)) => {
                changed = true;
                let mut nested = Map::new();
                nested.insert(child.to_string(), value.clone());
                merge_into(&mut result, parent, Value::Object(nested));
            }
            None => merge_into(&mut result, key, value.clone()),
        }
    }
    changed.then_some(result)
}

/// Merges objects key by key; on a conflicting key the value visited last wins
fn merge_into(target: &mut Map<String, Value>, key: &str, value: Value) {
    match (target.get_mut(key), value) {
        (Some(Value::Object(existing)), Value::Object(additional)) => {
            for (sub_key, sub_value) in additional {
                if existing.contains_key(&sub_key) {
                    debug!("Dotted name rewrite overwrites '{}.{}'", key, sub_key);
                }
                existing.insert(sub_key, sub_value);
            }
        }
        (Some(slot), value) => {
            debug!("Dotted name rewrite overwrites '{}'", key);
            *slot = value;
        }
        (None, value) => {
            target.insert(key.to_string(), value);
        }
    }
}

/// `"value": "{\"value\": \"123\"}"` carries the real object as JSON text
fn rewrite_value_sub_attribute(
    _ctx: &PatchContext<'_>,
    op: &PatchOperation,
) -> Option<PatchOperation> {
    let mut changed = false;
    let mut values = Vec::with_capacity(op.values.len());
    for value in &op.values {
        let embedded = value
            .as_object()
            .filter(|obj| obj.len() == 1)
            .and_then(|obj| obj.iter().next())
            .filter(|(key, _)| key.eq_ignore_ascii_case(ATTR_VALUE))
            .and_then(|(_, inner)| inner.as_str())
            .filter(|text| text.trim_start().starts_with('{'));
        match embedded {
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed @ Value::Object(_)) => {
                    changed = true;
                    values.push(parsed);
                }
                _ => return None,
            },
            None => values.push(value.clone()),
        }
    }
    changed.then(|| PatchOperation {
        values,
        ..op.clone()
    })
}

/// `{"path": "emails", "value": "a@example.com"}` becomes `{"value": "a@example.com"}` elements
fn rewrite_complex_simple_value(
    ctx: &PatchContext<'_>,
    op: &PatchOperation,
) -> Option<PatchOperation> {
    let attribute = ctx.governing_attribute(op.path.as_deref()?)?;
    if !attribute.is_complex() {
        return None;
    }
    let has_value_sub_attribute = ctx
        .resource
        .all_schemas()
        .find(|tree| tree.id == attribute.resource_uri)
        .and_then(|tree| tree.sub_attribute(attribute, ATTR_VALUE))
        .is_some();
    if !has_value_sub_attribute {
        return None;
    }

    let values = op
        .values
        .iter()
        .map(|value| {
            if is_scalar(value) {
                let mut wrapped = Map::new();
                wrapped.insert(ATTR_VALUE.to_string(), value.clone());
                Value::Object(wrapped)
            } else {
                value.clone()
            }
        })
        .collect();
    Some(PatchOperation {
        values,
        ..op.clone()
    })
}

/// `remove members` with `[{"value": "123"}]` becomes `remove members[value eq "123"]`
fn rewrite_remove_with_values(
    ctx: &PatchContext<'_>,
    op: &PatchOperation,
) -> Option<PatchOperation> {
    let path = op.path.as_deref()?;
    let attribute = ctx.governing_attribute(path)?;
    if !attribute.is_multi_valued_complex() {
        return None;
    }

    let mut clauses = Vec::with_capacity(op.values.len());
    for value in &op.values {
        let object = value.as_object().filter(|obj| obj.len() == 1)?;
        let (key, literal) = object.iter().next()?;
        let literal = match literal {
            Value::String(text) => format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\"")),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => return None,
        };
        clauses.push(format!("{} eq {}", key, literal));
    }

    Some(PatchOperation {
        op: PatchOp::Remove,
        path: Some(format!("{}[{}]", path.trim(), clauses.join(" or "))),
        values: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(registry: &SchemaRegistry, resource_type: &str, op: Value) -> Value {
        let resource = registry.resource_schema(resource_type).unwrap();
        let ctx = PatchContext::new(registry, &resource);
        let chain = WorkaroundChain::new(CompatibilityConfig::default());
        chain
            .normalize(&ctx, &PatchOperation::from_json(&op).unwrap())
            .to_json()
    }

    #[test]
    fn test_dotted_names_single_dot() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let rewritten = normalize(
            &registry,
            "User",
            json!({"op": "replace", "value": {"name.givenName": "Barbara", "name.familyName": "Jensen", "title": "Boss"}}),
        );
        assert_eq!(
            rewritten["value"],
            json!({"name": {"givenName": "Barbara", "familyName": "Jensen"}, "title": "Boss"})
        );
    }

    #[test]
    fn test_dotted_name_conflict_overwrites_key() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let rewritten = normalize(
            &registry,
            "User",
            json!({"op": "replace", "value": {
                "name": {"givenName": "Barbara", "familyName": "Jensen"},
                "name.givenName": "Babs",
                "name.middleName": "Jane"
            }}),
        );
        assert_eq!(
            rewritten["value"],
            json!({"name": {"givenName": "Babs", "familyName": "Jensen", "middleName": "Jane"}})
        );
    }

    #[test]
    fn test_dotted_names_deeper_path_unchanged() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let op = json!({"op": "add", "value": {"first.second.third": "x"}});
        assert_eq!(normalize(&registry, "User", op.clone()), op);
    }

    #[test]
    fn test_dotted_names_inside_extension() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let rewritten = normalize(
            &registry,
            "User",
            json!({"op": "add", "value": {
                "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User": {"manager.value": "26118915-6090-4610-87e4-49d8ca9f808d"}
            }}),
        );
        assert_eq!(
            rewritten["value"]["urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"],
            json!({"manager": {"value": "26118915-6090-4610-87e4-49d8ca9f808d"}})
        );
    }

    #[test]
    fn test_remove_with_values_becomes_filter() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let rewritten = normalize(
            &registry,
            "Group",
            json!({"op": "Remove", "path": "members", "value": [{"value": "123456"}, {"value": "654321"}]}),
        );
        assert_eq!(
            rewritten,
            json!({"op": "remove", "path": "members[value eq \"123456\" or value eq \"654321\"]"})
        );
    }

    #[test]
    fn test_remove_with_multi_key_values_unchanged() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let op = json!({"op": "remove", "path": "members", "value": {"value": "1", "display": "x"}});
        assert_eq!(normalize(&registry, "Group", op.clone()), op);
    }

    #[test]
    fn test_scalar_for_complex_attribute_is_wrapped() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let rewritten = normalize(
            &registry,
            "User",
            json!({"op": "add", "path": "emails", "value": ["a@example.com", {"value": "b@example.com"}]}),
        );
        assert_eq!(
            rewritten["value"],
            json!([{"value": "a@example.com"}, {"value": "b@example.com"}])
        );

        let rewritten = normalize(
            &registry,
            "User",
            json!({"op": "replace", "path": "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:manager", "value": "boss-id"}),
        );
        assert_eq!(rewritten["value"], json!({"value": "boss-id"}));
    }

    #[test]
    fn test_embedded_json_value_unpacked() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let rewritten = normalize(
            &registry,
            "Group",
            json!({"op": "add", "path": "members", "value": [{"value": "{\"value\":\"123\",\"display\":\"Bob\"}"}]}),
        );
        assert_eq!(rewritten["value"], json!({"value": "123", "display": "Bob"}));

        let op = json!({"op": "remove", "path": "members", "value": [{"value": "{\"value\":\"123\"}"}]});
        let rewritten = normalize(&registry, "Group", op);
        assert_eq!(rewritten["path"], json!("members[value eq \"{\\\"value\\\":\\\"123\\\"}\"]"));
    }

    #[test]
    fn test_disabled_rules_leave_operation_unchanged() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let resource = registry.resource_schema("Group").unwrap();
        let ctx = PatchContext::new(&registry, &resource);
        let chain = WorkaroundChain::new(CompatibilityConfig::disabled());
        let op = PatchOperation::from_json(
            &json!({"op": "remove", "path": "members", "value": [{"value": "123456"}]}),
        )
        .unwrap();
        assert_eq!(chain.normalize(&ctx, &op), op);
    }
}
