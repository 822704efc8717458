use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::config::CompatibilityConfig;
use crate::error::{AppError, AppResult, ScimType};
use crate::patch::resolver::{PatchPathResolver, ResolvedPath};
use crate::patch::workarounds::{PatchContext, WorkaroundChain};
use crate::patch::{PatchOp, PatchOperation, PatchRequest};
use crate::schema::definitions::{ATTR_ID, ATTR_LAST_MODIFIED, ATTR_META, ATTR_PRIMARY, ATTR_SCHEMAS};
use crate::schema::validation::{value_kind, verify_primary, verify_simple_value};
use crate::schema::{AttributeDescriptor, ResourceSchema, SchemaRegistry, SchemaTree};
use crate::utils::current_scim_datetime;

/// Result of applying a PATCH request
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    pub resource: Value,
    /// False if no operation had an observable effect; `meta.lastModified` is untouched then
    pub changed: bool,
}

/// Applies PATCH operations to resources of one resource type
pub struct PatchEngine<'r> {
    registry: &'r SchemaRegistry,
    resource: ResourceSchema<'r>,
    workarounds: WorkaroundChain,
}

impl<'r> PatchEngine<'r> {
    pub fn new(
        registry: &'r SchemaRegistry,
        resource_type: &str,
        compatibility: CompatibilityConfig,
    ) -> AppResult<Self> {
        Ok(PatchEngine {
            registry,
            resource: registry.resource_schema(resource_type)?,
            workarounds: WorkaroundChain::new(compatibility),
        })
    }

    pub fn with_workarounds(mut self, workarounds: WorkaroundChain) -> Self {
        self.workarounds = workarounds;
        self
    }

    pub fn resource_schema(&self) -> &ResourceSchema<'r> {
        &self.resource
    }

    pub fn apply(&self, resource: &Value, request: &PatchRequest) -> AppResult<PatchOutcome> {
        self.apply_operations(resource, &request.operations)
    }

    /// Applies the operations in order to a copy of `resource`.
    ///
    /// The first failing operation aborts the whole request.
    pub fn apply_operations(
        &self,
        resource: &Value,
        operations: &[PatchOperation],
    ) -> AppResult<PatchOutcome> {
        let mut document = resource.as_object().cloned().ok_or_else(|| AppError::InternalServer {
            message: format!("resource to patch must be a JSON object but was '{}'", value_kind(resource)),
            scim_type: None,
        })?;
        let ctx = PatchContext::new(self.registry, &self.resource);
        let resolver = PatchPathResolver::new(&self.resource);

        let mut changed = false;
        for operation in operations {
            let operation = self.workarounds.normalize(&ctx, operation);
            let before = document.clone();
            self.apply_operation(&resolver, &mut document, &operation)?;
            if document != before {
                debug!(
                    "Operation '{}' on '{}' changed the resource",
                    operation.op.as_str(),
                    operation.path.as_deref().unwrap_or("<resource>")
                );
                changed = true;
            } else {
                trace!("Operation {} had no effect", operation.to_json());
            }
        }

        if changed {
            touch_last_modified(&mut document);
        }
        Ok(PatchOutcome {
            resource: Value::Object(document),
            changed,
        })
    }

    fn apply_operation(
        &self,
        resolver: &PatchPathResolver<'_, 'r>,
        doc: &mut Map<String, Value>,
        operation: &PatchOperation,
    ) -> AppResult<()> {
        if let Some(path) = operation.path.as_deref() {
            let target = resolver.resolve(operation.op, path)?;
            return self.apply_to_path(resolver, doc, operation.op, &target, &operation.values);
        }

        match operation.op {
            PatchOp::Remove => {
                if !operation.values.is_empty() {
                    return Err(AppError::invalid_value(
                        "remove operation without path must not carry a value",
                    ));
                }
                self.clear_resource(doc);
                Ok(())
            }
            PatchOp::Add | PatchOp::Replace => {
                let object = match operation.values.as_slice() {
                    [Value::Object(object)] => object,
                    _ => {
                        return Err(AppError::invalid_value(format!(
                            "operation '{}' without path requires exactly one JSON object as value",
                            operation.op.as_str()
                        )))
                    }
                };
                for (key, value) in object {
                    if key.eq_ignore_ascii_case(ATTR_SCHEMAS) {
                        continue;
                    }
                    let target = resolver.resolve(operation.op, key)?;
                    self.apply_member(resolver, doc, operation.op, &target, value)?;
                }
                Ok(())
            }
        }
    }

    /// One member of a path-less value object; `null` unassigns the attribute
    fn apply_member(
        &self,
        resolver: &PatchPathResolver<'_, 'r>,
        doc: &mut Map<String, Value>,
        op: PatchOp,
        target: &ResolvedPath<'r>,
        value: &Value,
    ) -> AppResult<()> {
        let values = match value {
            Value::Null => return self.apply_to_path(resolver, doc, PatchOp::Remove, target, &[]),
            Value::Array(items) if target.attribute.is_some() => items.clone(),
            other => vec![other.clone()],
        };
        self.apply_to_path(resolver, doc, op, target, &values)
    }

    fn apply_to_path(
        &self,
        resolver: &PatchPathResolver<'_, 'r>,
        doc: &mut Map<String, Value>,
        op: PatchOp,
        target: &ResolvedPath<'r>,
        values: &[Value],
    ) -> AppResult<()> {
        match op {
            PatchOp::Remove if !values.is_empty() => {
                return Err(AppError::invalid_value(format!(
                    "remove operation on path '{}' must not carry a value",
                    target.raw
                )))
            }
            PatchOp::Add | PatchOp::Replace if values.is_empty() => {
                return Err(AppError::invalid_value(format!(
                    "operation '{}' on path '{}' requires a value",
                    op.as_str(),
                    target.raw
                )))
            }
            _ => {}
        }

        let Some(attribute) = target.attribute else {
            return self.apply_to_extension(resolver, doc, op, target, values);
        };

        let governing = target.sub_attribute.unwrap_or(attribute);
        if attribute.is_read_only() || governing.is_read_only() {
            return Err(AppError::bad_request(
                ScimType::Mutability,
                format!(
                    "attribute '{}' is readOnly and cannot be modified",
                    governing.full_resource_name()
                ),
            ));
        }

        let values = match op {
            PatchOp::Remove => Vec::new(),
            PatchOp::Add | PatchOp::Replace => self.prepare_values(target.schema, governing, values)?,
        };

        let Some(container) = container_mut(doc, target.extension_uri, op != PatchOp::Remove) else {
            return Ok(());
        };
        let result = match (&target.filter, target.sub_attribute) {
            (None, None) => write_attribute(container, op, attribute, &values),
            (None, Some(sub)) => write_sub_attribute(container, op, target, attribute, sub, &values),
            (Some(_), _) => write_filtered(container, op, target, attribute, &values),
        };
        if let Some(uri) = target.extension_uri {
            sync_extension(doc, &self.resource.main.id, uri);
        }
        result
    }

    /// The path names an extension schema; the value is the whole extension block
    fn apply_to_extension(
        &self,
        resolver: &PatchPathResolver<'_, 'r>,
        doc: &mut Map<String, Value>,
        op: PatchOp,
        target: &ResolvedPath<'r>,
        values: &[Value],
    ) -> AppResult<()> {
        let Some(uri) = target.extension_uri else {
            return Err(AppError::invalid_path(format!(
                "path '{}' does not name an attribute",
                target.raw
            )));
        };

        let block = match op {
            PatchOp::Remove => {
                if let Some(key) = find_key(doc, uri) {
                    doc.remove(&key);
                }
                sync_extension(doc, &self.resource.main.id, uri);
                return Ok(());
            }
            PatchOp::Add | PatchOp::Replace => match values {
                [Value::Object(block)] => block,
                _ => {
                    return Err(AppError::invalid_value(format!(
                        "extension '{}' must be patched with exactly one JSON object",
                        uri
                    )))
                }
            },
        };

        // immutable values stay so the member writes below compare against them
        if op == PatchOp::Replace {
            let schema = target.schema;
            if let Some(key) = find_key(doc, uri) {
                if let Some(existing) = doc.get_mut(&key).and_then(Value::as_object_mut) {
                    existing.retain(|k, _| {
                        schema
                            .lookup(k)
                            .is_some_and(|attr| attr.is_read_only() || attr.is_immutable())
                    });
                }
            }
        }

        for (key, value) in block {
            if key.eq_ignore_ascii_case(ATTR_SCHEMAS) {
                continue;
            }
            let member = resolver.resolve(op, &format!("{}:{}", uri, key))?;
            self.apply_member(resolver, doc, op, &member, value)?;
        }
        sync_extension(doc, &self.resource.main.id, uri);
        Ok(())
    }

    /// `remove` without path: everything the client may not write stays
    fn clear_resource(&self, doc: &mut Map<String, Value>) {
        let main = self.resource.main;
        let resource = &self.resource;
        doc.retain(|key, value| {
            if [ATTR_SCHEMAS, ATTR_ID, ATTR_META]
                .iter()
                .any(|protected| key.eq_ignore_ascii_case(protected))
            {
                return true;
            }
            if let Some(attr) = main.lookup(key) {
                return attr.is_read_only() || attr.is_immutable();
            }
            match (resource.extension(key), value.as_object_mut()) {
                (Some(tree), Some(block)) => {
                    block.retain(|k, _| {
                        tree.lookup(k)
                            .is_some_and(|attr| attr.is_read_only() || attr.is_immutable())
                    });
                    !block.is_empty()
                }
                _ => false,
            }
        });
        for (extension, _) in &self.resource.extensions {
            sync_extension(doc, &main.id, &extension.schema);
        }
    }

    fn prepare_values(
        &self,
        schema: &SchemaTree,
        attr: &AttributeDescriptor,
        values: &[Value],
    ) -> AppResult<Vec<Value>> {
        if !attr.multi_valued && values.len() > 1 {
            return Err(AppError::invalid_value(format!(
                "several values found for non multivalued node '{}'",
                attr.full_resource_name()
            )));
        }
        values
            .iter()
            .map(|value| self.prepare_value(schema, attr, value))
            .collect()
    }

    /// Type checks a value; readOnly sub-attributes in complex values are dropped
    fn prepare_value(
        &self,
        schema: &SchemaTree,
        attr: &AttributeDescriptor,
        value: &Value,
    ) -> AppResult<Value> {
        if !attr.is_complex() {
            verify_simple_value(self.registry, attr, value).map_err(AppError::invalid_value)?;
            return Ok(value.clone());
        }

        let object = value.as_object().ok_or_else(|| {
            AppError::invalid_value(format!(
                "value of complex attribute '{}' must be a JSON object but was '{}'",
                attr.full_resource_name(),
                value_kind(value)
            ))
        })?;
        let mut prepared = Map::new();
        for (key, sub_value) in object {
            let sub = schema.sub_attribute(attr, key).ok_or_else(|| {
                AppError::invalid_path(format!(
                    "attribute '{}' has no sub-attribute '{}'",
                    attr.full_resource_name(),
                    key
                ))
            })?;
            if sub.is_read_only() {
                trace!("Ignoring readOnly sub-attribute '{}'", sub.full_resource_name());
                continue;
            }
            let checked = match sub_value {
                Value::Null => continue,
                Value::Array(items) if sub.multi_valued => Value::Array(
                    items
                        .iter()
                        .map(|item| self.prepare_value(schema, sub, item))
                        .collect::<AppResult<_>>()?,
                ),
                single if sub.multi_valued => {
                    Value::Array(vec![self.prepare_value(schema, sub, single)?])
                }
                single => self.prepare_value(schema, sub, single)?,
            };
            prepared.insert(sub.name.clone(), checked);
        }
        Ok(Value::Object(prepared))
    }
}

fn mutability_error(attr: &AttributeDescriptor) -> AppError {
    AppError::bad_request(
        ScimType::Mutability,
        format!(
            "attribute '{}' is immutable and already has a value",
            attr.full_resource_name()
        ),
    )
}

fn no_target(target: &ResolvedPath<'_>, container: &AttributeDescriptor) -> AppError {
    AppError::bad_request(
        ScimType::NoTarget,
        format!(
            "no target found for path '{}', attribute '{}' has no matching value",
            target.raw,
            container.full_resource_name()
        ),
    )
}

/// Whole attribute, no filter and no sub-attribute
fn write_attribute(
    container: &mut Map<String, Value>,
    op: PatchOp,
    attr: &AttributeDescriptor,
    values: &[Value],
) -> AppResult<()> {
    let key = find_key(container, &attr.name);
    let existing = key.as_ref().and_then(|k| container.get(k)).cloned();

    let new_value = match op {
        PatchOp::Remove => {
            if let Some(key) = key {
                if attr.is_immutable() && existing.as_ref().is_some_and(|v| !is_unassigned(v)) {
                    return Err(mutability_error(attr));
                }
                container.remove(&key);
            }
            return Ok(());
        }
        _ if attr.multi_valued => {
            let mut items = match (op, &existing) {
                (PatchOp::Add, Some(Value::Array(items))) => items.clone(),
                (PatchOp::Add, Some(single)) if !single.is_null() => vec![single.clone()],
                _ => Vec::new(),
            };
            let first_new = items.len();
            items.extend(values.iter().cloned());
            if attr.is_complex() {
                let winner = (first_new..items.len()).rev().find(|&i| is_primary(&items[i]));
                if let Some(winner) = winner {
                    clear_primary(&mut items, winner);
                }
                verify_primary(attr, &items).map_err(AppError::invalid_value)?;
            }
            Value::Array(items)
        }
        PatchOp::Add if attr.is_complex() => match (&existing, values.first()) {
            (Some(Value::Object(current)), Some(Value::Object(additional))) => {
                Value::Object(merge_complex(current, additional))
            }
            (_, Some(value)) => value.clone(),
            (_, None) => return Ok(()),
        },
        _ => match values.first() {
            Some(value) => value.clone(),
            None => return Ok(()),
        },
    };

    if attr.is_immutable() {
        if let Some(old) = existing.as_ref().filter(|v| !is_unassigned(v)) {
            if *old != new_value {
                return Err(mutability_error(attr));
            }
        }
    }
    if let Some(key) = key.filter(|k| *k != attr.name) {
        container.remove(&key);
    }
    container.insert(attr.name.clone(), new_value);
    Ok(())
}

/// `attr.sub` without filter; on a multi-valued attribute every element is targeted
fn write_sub_attribute(
    container: &mut Map<String, Value>,
    op: PatchOp,
    target: &ResolvedPath<'_>,
    attr: &AttributeDescriptor,
    sub: &AttributeDescriptor,
    values: &[Value],
) -> AppResult<()> {
    let key = find_key(container, &attr.name);

    if !attr.multi_valued {
        if op == PatchOp::Remove {
            if let Some(key) = key {
                let emptied = match container.get_mut(&key).and_then(Value::as_object_mut) {
                    Some(object) => {
                        remove_sub(object, sub)?;
                        object.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    container.remove(&key);
                }
            }
            return Ok(());
        }
        let entry = container
            .entry(key.unwrap_or_else(|| attr.name.clone()))
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Some(object) = entry.as_object_mut() {
            set_sub(object, op, sub, values)?;
        }
        return Ok(());
    }

    let Some(key) = key else {
        return if op == PatchOp::Remove {
            Ok(())
        } else {
            Err(no_target(target, attr))
        };
    };
    let Some(items) = container.get_mut(&key).and_then(Value::as_array_mut) else {
        return Ok(());
    };
    if op == PatchOp::Remove {
        for item in items.iter_mut() {
            if let Some(object) = item.as_object_mut() {
                remove_sub(object, sub)?;
            }
        }
        items.retain(|item| !item.as_object().is_some_and(Map::is_empty));
        if items.is_empty() {
            container.remove(&key);
        }
        return Ok(());
    }

    if items.is_empty() {
        return Err(no_target(target, attr));
    }
    for item in items.iter_mut() {
        if let Some(object) = item.as_object_mut() {
            set_sub(object, op, sub, values)?;
        }
    }
    verify_primary(attr, items).map_err(AppError::invalid_value)
}

/// `attr[filter]` or `attr[filter].sub`
fn write_filtered(
    container: &mut Map<String, Value>,
    op: PatchOp,
    target: &ResolvedPath<'_>,
    attr: &AttributeDescriptor,
    values: &[Value],
) -> AppResult<()> {
    let key = find_key(container, &attr.name);
    let items = match &key {
        Some(k) => container.get_mut(k).and_then(Value::as_array_mut),
        None => None,
    };
    let indices = items
        .as_deref()
        .map(|elements| target.matching_indices(elements))
        .unwrap_or_default();

    if op == PatchOp::Remove {
        let (Some(items), Some(key)) = (items, key) else {
            return Ok(());
        };
        match target.sub_attribute {
            None => {
                if attr.is_immutable() && !indices.is_empty() {
                    return Err(mutability_error(attr));
                }
                for index in indices.iter().rev() {
                    items.remove(*index);
                }
            }
            Some(sub) => {
                for index in &indices {
                    if let Some(object) = items[*index].as_object_mut() {
                        remove_sub(object, sub)?;
                    }
                }
                items.retain(|item| !item.as_object().is_some_and(Map::is_empty));
            }
        }
        if items.is_empty() {
            container.remove(&key);
        }
        return Ok(());
    }

    let Some(sub) = target.sub_attribute else {
        return Err(AppError::invalid_path(format!(
            "path '{}' must name a sub-attribute of the selected elements",
            target.raw
        )));
    };
    let Some(items) = items.filter(|_| !indices.is_empty()) else {
        return Err(no_target(target, attr));
    };
    for index in &indices {
        if let Some(object) = items[*index].as_object_mut() {
            set_sub(object, op, sub, values)?;
        }
    }
    if sub.name.eq_ignore_ascii_case(ATTR_PRIMARY) && values.first() == Some(&Value::Bool(true)) {
        for (position, item) in items.iter_mut().enumerate() {
            if !indices.contains(&position) && is_primary(item) {
                if let Some(object) = item.as_object_mut() {
                    object.insert(ATTR_PRIMARY.to_string(), Value::Bool(false));
                }
            }
        }
    }
    verify_primary(attr, items).map_err(AppError::invalid_value)
}

fn set_sub(
    element: &mut Map<String, Value>,
    op: PatchOp,
    sub: &AttributeDescriptor,
    values: &[Value],
) -> AppResult<()> {
    let existing = find_key(element, &sub.name).and_then(|k| element.remove(&k));
    let new_value = if sub.multi_valued {
        let mut items = match (op, &existing) {
            (PatchOp::Add, Some(Value::Array(items))) => items.clone(),
            _ => Vec::new(),
        };
        items.extend(values.iter().cloned());
        Value::Array(items)
    } else {
        match values.first() {
            Some(value) => value.clone(),
            None => return Ok(()),
        }
    };
    if sub.is_immutable() {
        if let Some(old) = existing.as_ref().filter(|v| !is_unassigned(v)) {
            if *old != new_value {
                return Err(mutability_error(sub));
            }
        }
    }
    element.insert(sub.name.clone(), new_value);
    Ok(())
}

fn remove_sub(element: &mut Map<String, Value>, sub: &AttributeDescriptor) -> AppResult<()> {
    if let Some(key) = find_key(element, &sub.name) {
        if sub.is_immutable() && element.get(&key).is_some_and(|v| !is_unassigned(v)) {
            return Err(mutability_error(sub));
        }
        element.remove(&key);
    }
    Ok(())
}

/// Existing keys of an added complex value are overwritten, multi-valued sub-attributes appended
fn merge_complex(current: &Map<String, Value>, additional: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = current.clone();
    for (key, value) in additional {
        let existing_key = find_key(&merged, key).unwrap_or_else(|| key.clone());
        if let (Some(Value::Array(items)), Value::Array(more)) = (merged.get_mut(&existing_key), value) {
            items.extend(more.iter().cloned());
            continue;
        }
        merged.remove(&existing_key);
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn is_primary(value: &Value) -> bool {
    value.get(ATTR_PRIMARY) == Some(&Value::Bool(true))
}

/// Every element but the one at `winner` loses its primary flag
fn clear_primary(items: &mut [Value], winner: usize) {
    for (position, item) in items.iter_mut().enumerate() {
        if position != winner && is_primary(item) {
            if let Some(object) = item.as_object_mut() {
                object.insert(ATTR_PRIMARY.to_string(), Value::Bool(false));
            }
        }
    }
}

fn is_unassigned(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Key as present in the object, matched case-insensitively
fn find_key(object: &Map<String, Value>, name: &str) -> Option<String> {
    if object.contains_key(name) {
        return Some(name.to_string());
    }
    object
        .keys()
        .find(|key| key.eq_ignore_ascii_case(name))
        .cloned()
}

fn container_mut<'d>(
    doc: &'d mut Map<String, Value>,
    extension_uri: Option<&str>,
    create: bool,
) -> Option<&'d mut Map<String, Value>> {
    let Some(uri) = extension_uri else {
        return Some(doc);
    };
    let key = match find_key(doc, uri) {
        Some(key) => key,
        None if create => uri.to_string(),
        None => return None,
    };
    let block = doc.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !block.is_object() {
        if !create {
            return None;
        }
        *block = Value::Object(Map::new());
    }
    block.as_object_mut()
}

/// Drops an empty extension block and keeps `schemas` in line with the blocks present
fn sync_extension(doc: &mut Map<String, Value>, main_schema: &str, uri: &str) {
    let key = find_key(doc, uri);
    let present = key
        .as_ref()
        .and_then(|k| doc.get(k))
        .and_then(Value::as_object)
        .is_some_and(|block| !block.is_empty());
    if !present {
        if let Some(key) = key {
            doc.remove(&key);
        }
    }

    let names_uri = |schema: &Value| schema.as_str().is_some_and(|s| s.eq_ignore_ascii_case(uri));
    match doc.get_mut(ATTR_SCHEMAS).and_then(Value::as_array_mut) {
        Some(schemas) => {
            let listed = schemas.iter().any(names_uri);
            if present && !listed {
                schemas.push(json!(uri));
            } else if !present && listed {
                schemas.retain(|schema| !names_uri(schema));
            }
        }
        None if present => {
            doc.insert(ATTR_SCHEMAS.to_string(), json!([main_schema, uri]));
        }
        None => {}
    }
}

fn touch_last_modified(doc: &mut Map<String, Value>) {
    let meta = doc
        .entry(ATTR_META)
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Some(meta) = meta.as_object_mut() {
        meta.insert(ATTR_LAST_MODIFIED.to_string(), json!(current_scim_datetime()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definitions::{SCIM_SCHEMA_CORE_USER, SCIM_SCHEMA_ENTERPRISE_USER};
    use crate::schema::ResourceType;

    fn apply(registry: &SchemaRegistry, resource: &Value, operations: Value) -> AppResult<PatchOutcome> {
        let engine = PatchEngine::new(registry, "User", CompatibilityConfig::default())?;
        let operations: Vec<PatchOperation> = serde_json::from_value(operations)?;
        engine.apply_operations(resource, &operations)
    }

    fn user() -> Value {
        json!({
            "schemas": [SCIM_SCHEMA_CORE_USER],
            "id": "2819c223-7f76-453a-919d-413861904646",
            "userName": "bjensen",
            "emails": [
                {"value": "bjensen@example.com", "type": "work", "primary": true},
                {"value": "babs@jensen.org", "type": "home"}
            ],
            "meta": {"resourceType": "User", "lastModified": "2011-05-13T04:42:34.000Z"}
        })
    }

    #[test]
    fn test_replace_simple_attribute() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let outcome = apply(
            &registry,
            &user(),
            json!([{"op": "replace", "path": "displayName", "value": "Babs Jensen"}]),
        )
        .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.resource["displayName"], json!("Babs Jensen"));
        assert_ne!(outcome.resource["meta"]["lastModified"], json!("2011-05-13T04:42:34.000Z"));
    }

    #[test]
    fn test_several_values_for_single_valued_attribute() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let err = apply(
            &registry,
            &user(),
            json!([{"op": "add", "path": "displayName", "value": ["a", "b"]}]),
        )
        .unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::InvalidValue));
        assert!(err.to_string().contains("several values found for non multivalued node"));
    }

    #[test]
    fn test_filtered_sub_attribute_replace() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let outcome = apply(
            &registry,
            &user(),
            json!([{"op": "replace", "path": "emails[type eq \"home\"].value", "value": "babs@example.org"}]),
        )
        .unwrap();
        assert_eq!(outcome.resource["emails"][1]["value"], json!("babs@example.org"));
        assert_eq!(outcome.resource["emails"][0]["value"], json!("bjensen@example.com"));
    }

    #[test]
    fn test_filter_without_match_is_no_target() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let err = apply(
            &registry,
            &user(),
            json!([{"op": "replace", "path": "emails[type eq \"other\"].value", "value": "x@example.org"}]),
        )
        .unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::NoTarget));

        let outcome = apply(
            &registry,
            &user(),
            json!([{"op": "remove", "path": "emails[type eq \"other\"]"}]),
        )
        .unwrap();
        assert!(!outcome.changed);
    }

    #[test]
    fn test_primary_moves_to_added_element() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let outcome = apply(
            &registry,
            &user(),
            json!([{"op": "add", "path": "emails", "value": [{"value": "new@example.com", "type": "other", "primary": true}]}]),
        )
        .unwrap();
        let emails = outcome.resource["emails"].as_array().unwrap();
        assert_eq!(emails.len(), 3);
        assert_eq!(emails[0]["primary"], json!(false));
        assert_eq!(emails[2]["primary"], json!(true));

        let outcome = apply(
            &registry,
            &user(),
            json!([{"op": "replace", "path": "emails[type eq \"home\"].primary", "value": true}]),
        )
        .unwrap();
        assert_eq!(outcome.resource["emails"][0]["primary"], json!(false));
        assert_eq!(outcome.resource["emails"][1]["primary"], json!(true));
    }

    #[test]
    fn test_read_only_attribute_rejected() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let err = apply(
            &registry,
            &user(),
            json!([{"op": "replace", "path": "id", "value": "other"}]),
        )
        .unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::Mutability));
    }

    #[test]
    fn test_extension_block_lifecycle() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let added = apply(
            &registry,
            &user(),
            json!([{"op": "add", "path": "employeeNumber", "value": "701984"}]),
        )
        .unwrap();
        assert_eq!(
            added.resource[SCIM_SCHEMA_ENTERPRISE_USER]["employeeNumber"],
            json!("701984")
        );
        assert_eq!(
            added.resource["schemas"],
            json!([SCIM_SCHEMA_CORE_USER, SCIM_SCHEMA_ENTERPRISE_USER])
        );

        let removed = apply(
            &registry,
            &added.resource,
            json!([{"op": "remove", "path": format!("{}:employeeNumber", SCIM_SCHEMA_ENTERPRISE_USER)}]),
        )
        .unwrap();
        assert!(removed.resource.get(SCIM_SCHEMA_ENTERPRISE_USER).is_none());
        assert_eq!(removed.resource["schemas"], json!([SCIM_SCHEMA_CORE_USER]));
    }

    #[test]
    fn test_extension_replace_keeps_immutable_check() {
        let badge_schema = "urn:example:params:scim:schemas:extension:Badge";
        let mut registry = SchemaRegistry::with_core_schemas().unwrap();
        registry
            .register_schema(&json!({
                "id": badge_schema,
                "name": "Badge",
                "attributes": [
                    {"name": "badgeId", "type": "string", "mutability": "immutable", "description": "Badge number"},
                    {"name": "site", "type": "string", "description": "Issuing site"}
                ]
            }))
            .unwrap();
        registry
            .register_resource_type(
                ResourceType::new("User", "/Users", SCIM_SCHEMA_CORE_USER).with_extension(badge_schema, false),
            )
            .unwrap();

        let mut resource = user();
        resource[badge_schema] = json!({"badgeId": "B-1", "site": "Berlin"});
        resource["schemas"] = json!([SCIM_SCHEMA_CORE_USER, badge_schema]);

        let err = apply(
            &registry,
            &resource,
            json!([{"op": "replace", "path": badge_schema, "value": {"badgeId": "B-2", "site": "Paris"}}]),
        )
        .unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::Mutability));

        let outcome = apply(
            &registry,
            &resource,
            json!([{"op": "replace", "path": badge_schema, "value": {"badgeId": "B-1", "site": "Paris"}}]),
        )
        .unwrap();
        assert_eq!(outcome.resource[badge_schema], json!({"badgeId": "B-1", "site": "Paris"}));
    }

    #[test]
    fn test_remove_without_path_keeps_protected_attributes() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let outcome = apply(&registry, &user(), json!([{"op": "remove"}])).unwrap();
        let resource = outcome.resource.as_object().unwrap();
        assert!(resource.contains_key("id"));
        assert!(resource.contains_key("schemas"));
        assert!(resource.contains_key("meta"));
        assert!(!resource.contains_key("userName"));
        assert!(!resource.contains_key("emails"));
    }

    #[test]
    fn test_value_checks() {
        let registry = SchemaRegistry::with_core_resource_types().unwrap();
        let err = apply(
            &registry,
            &user(),
            json!([{"op": "replace", "path": "active", "value": "yes"}]),
        )
        .unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::InvalidValue));

        let err = apply(
            &registry,
            &user(),
            json!([{"op": "add", "path": "emails", "value": [{"value": "a@example.com", "unknown": 1}]}]),
        )
        .unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::InvalidPath));

        let err = apply(&registry, &user(), json!([{"op": "add", "path": "title"}])).unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::InvalidValue));
    }
}
