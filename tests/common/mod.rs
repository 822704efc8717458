use scim_engine::config::CompatibilityConfig;
use scim_engine::patch::{PatchEngine, PatchOutcome, PatchRequest};
use scim_engine::schema::{ResourceType, SchemaRegistry};
use scim_engine::AppResult;
use serde_json::{json, Value};

pub const ALL_TYPES_SCHEMA: &str = "urn:gold:params:scim:schemas:custom:2.0:AllTypes";
pub const CORE_USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const CORE_GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const ENTERPRISE_USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";
pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

/// Schema covering every attribute type, used to exercise the patch engine
pub fn all_types_schema() -> Value {
    json!({
        "id": ALL_TYPES_SCHEMA,
        "name": "AllTypes",
        "description": "Test resource with one attribute of each type",
        "attributes": [
            { "name": "id", "type": "string", "mutability": "readOnly", "returned": "always",
              "caseExact": true, "description": "Identifier" },
            { "name": "string", "type": "string", "description": "A string" },
            { "name": "number", "type": "integer", "description": "An integer" },
            { "name": "decimal", "type": "decimal", "description": "A decimal" },
            { "name": "bool", "type": "boolean", "description": "A boolean" },
            { "name": "date", "type": "dateTime", "description": "A timestamp" },
            { "name": "binary", "type": "binary", "caseExact": true, "description": "Base64 content" },
            { "name": "stringArray", "type": "string", "multiValued": true, "description": "Several strings" },
            { "name": "numberArray", "type": "integer", "multiValued": true, "description": "Several integers" },
            { "name": "immutableString", "type": "string", "mutability": "immutable", "description": "Write once" },
            {
                "name": "complex", "type": "complex", "description": "A complex attribute",
                "subAttributes": [
                    { "name": "string", "type": "string", "description": "A string" },
                    { "name": "number", "type": "integer", "description": "An integer" },
                    { "name": "stringArray", "type": "string", "multiValued": true, "description": "Several strings" }
                ]
            },
            {
                "name": "multiComplex", "type": "complex", "multiValued": true,
                "description": "A multivalued complex attribute",
                "subAttributes": [
                    { "name": "value", "type": "string", "description": "A value" },
                    { "name": "string", "type": "string", "description": "A string" },
                    { "name": "number", "type": "integer", "description": "An integer" },
                    { "name": "primary", "type": "boolean", "description": "Primary marker" }
                ]
            }
        ]
    })
}

/// Built-in User and Group resource types plus the AllTypes resource type
pub fn create_test_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::with_core_resource_types().unwrap();
    registry.register_schema(&all_types_schema()).unwrap();
    registry
        .register_resource_type(ResourceType::new("AllTypes", "/AllTypes", ALL_TYPES_SCHEMA))
        .unwrap();
    registry
}

#[allow(dead_code)]
pub fn patch_request(operations: Value) -> PatchRequest {
    PatchRequest::from_json(&json!({
        "schemas": [PATCH_OP_SCHEMA],
        "Operations": operations
    }))
    .unwrap()
}

#[allow(dead_code)]
pub fn apply_patch(
    registry: &SchemaRegistry,
    resource_type: &str,
    resource: &Value,
    operations: Value,
) -> AppResult<PatchOutcome> {
    apply_patch_with_config(registry, resource_type, resource, operations, CompatibilityConfig::default())
}

#[allow(dead_code)]
pub fn apply_patch_with_config(
    registry: &SchemaRegistry,
    resource_type: &str,
    resource: &Value,
    operations: Value,
    compatibility: CompatibilityConfig,
) -> AppResult<PatchOutcome> {
    let engine = PatchEngine::new(registry, resource_type, compatibility)?;
    engine.apply(resource, &patch_request(operations))
}

#[allow(dead_code)]
pub fn create_all_types(content: Value) -> Value {
    let mut resource = json!({
        "schemas": [ALL_TYPES_SCHEMA],
        "id": "2819c223-7f76-453a-919d-413861904646",
        "meta": {
            "resourceType": "AllTypes",
            "created": "2024-01-01T10:00:00Z",
            "lastModified": "2024-01-01T10:00:00Z"
        }
    });
    if let (Some(target), Some(content)) = (resource.as_object_mut(), content.as_object()) {
        for (key, value) in content {
            target.insert(key.clone(), value.clone());
        }
    }
    resource
}

#[allow(dead_code)]
pub fn create_test_user_json(user_name: &str, given_name: &str, family_name: &str) -> Value {
    json!({
        "schemas": [CORE_USER_SCHEMA],
        "id": "2819c223-7f76-453a-919d-413861904646",
        "userName": user_name,
        "name": {
            "givenName": given_name,
            "familyName": family_name
        },
        "emails": [
            {
                "value": format!("{}@example.com", user_name),
                "type": "work",
                "primary": true
            }
        ],
        "meta": {
            "resourceType": "User",
            "created": "2024-01-01T10:00:00Z",
            "lastModified": "2024-01-01T10:00:00Z"
        }
    })
}

#[allow(dead_code)]
pub fn create_test_group_json(display_name: &str, member_ids: &[&str]) -> Value {
    json!({
        "schemas": [CORE_GROUP_SCHEMA],
        "id": "e9e30dba-f08f-4109-8486-d5c6a331660a",
        "displayName": display_name,
        "members": member_ids
            .iter()
            .map(|id| json!({ "value": id, "display": format!("User {}", id) }))
            .collect::<Vec<_>>(),
        "meta": {
            "resourceType": "Group",
            "created": "2024-01-01T10:00:00Z",
            "lastModified": "2024-01-01T10:00:00Z"
        }
    })
}
