//! SCIM 2.0 Schema Knowledge
//!
//! Vocabulary of schema descriptors (types, mutability, returned, uniqueness) and the
//! RFC 7643 schema documents that every registry starts out with.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// SCIM 2.0 Core Schema identifiers
pub const SCIM_SCHEMA_CORE_USER: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const SCIM_SCHEMA_CORE_GROUP: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const SCIM_SCHEMA_ENTERPRISE_USER: &str =
    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";
pub const SCIM_SCHEMA_META: &str = "urn:ietf:params:scim:schemas:core:2.0:Meta";

/// SCIM 2.0 API Schema identifiers
pub const SCIM_API_MESSAGES_PATCH_OP: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

/// Attribute names with a fixed meaning in every resource
pub const ATTR_SCHEMAS: &str = "schemas";
pub const ATTR_ID: &str = "id";
pub const ATTR_META: &str = "meta";
pub const ATTR_LAST_MODIFIED: &str = "lastModified";
pub const ATTR_VALUE: &str = "value";
pub const ATTR_REF: &str = "$ref";
pub const ATTR_PRIMARY: &str = "primary";

/// Attribute type in SCIM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    String,
    Boolean,
    Integer,
    Decimal,
    DateTime,
    Reference,
    Complex,
    Binary,
    Any,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Boolean => "boolean",
            AttributeType::Integer => "integer",
            AttributeType::Decimal => "decimal",
            AttributeType::DateTime => "dateTime",
            AttributeType::Reference => "reference",
            AttributeType::Complex => "complex",
            AttributeType::Binary => "binary",
            AttributeType::Any => "any",
        }
    }
}

/// Mutability of attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutability {
    ReadOnly,
    #[default]
    ReadWrite,
    Immutable,
    WriteOnly,
}

/// When an attribute is returned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Returned {
    Always,
    Never,
    #[default]
    Default,
    Request,
}

/// Uniqueness constraint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Uniqueness {
    #[default]
    None,
    Server,
    Global,
}

/// Kind of target a reference attribute may point to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceType {
    Resource,
    External,
    Uri,
}

lazy_static! {
    /// User schema descriptor (RFC 7643 section 4.1)
    pub static ref USER_SCHEMA: Value = json!({
        "id": SCIM_SCHEMA_CORE_USER,
        "name": "User",
        "description": "User Account",
        "attributes": [
            {
                "name": "id", "type": "string", "description": "Unique identifier for the SCIM resource",
                "mutability": "readOnly", "returned": "always", "uniqueness": "server", "caseExact": true
            },
            {
                "name": "externalId", "type": "string", "caseExact": true,
                "description": "Identifier of the resource as defined by the provisioning client"
            },
            {
                "name": "userName", "type": "string", "required": true, "uniqueness": "server",
                "description": "Unique identifier for the User, typically used to directly authenticate"
            },
            {
                "name": "name", "type": "complex", "description": "The components of the user's real name",
                "subAttributes": [
                    { "name": "formatted", "type": "string", "description": "The full name" },
                    { "name": "familyName", "type": "string", "description": "The family name of the User" },
                    { "name": "givenName", "type": "string", "description": "The given name of the User" },
                    { "name": "middleName", "type": "string", "description": "The middle name(s) of the User" },
                    { "name": "honorificPrefix", "type": "string", "description": "The honorific prefix(es) of the User" },
                    { "name": "honorificSuffix", "type": "string", "description": "The honorific suffix(es) of the User" }
                ]
            },
            { "name": "displayName", "type": "string", "description": "The name of the User, suitable for display" },
            { "name": "nickName", "type": "string", "description": "The casual way to address the user" },
            {
                "name": "profileUrl", "type": "reference", "referenceTypes": ["external"],
                "description": "A fully qualified URL pointing to a page representing the User"
            },
            { "name": "title", "type": "string", "description": "The user's title" },
            { "name": "userType", "type": "string", "description": "Relationship between the organization and the user" },
            { "name": "preferredLanguage", "type": "string", "description": "Preferred written or spoken language" },
            { "name": "locale", "type": "string", "description": "Default location of the User" },
            { "name": "timezone", "type": "string", "description": "The User's time zone" },
            { "name": "active", "type": "boolean", "description": "The User's administrative status" },
            {
                "name": "password", "type": "string", "mutability": "writeOnly", "returned": "never",
                "description": "The User's cleartext password"
            },
            {
                "name": "emails", "type": "complex", "multiValued": true,
                "description": "Email addresses for the user",
                "subAttributes": [
                    { "name": "value", "type": "string", "description": "Email address for the user" },
                    { "name": "display", "type": "string", "description": "A human-readable name" },
                    {
                        "name": "type", "type": "string", "canonicalValues": ["work", "home", "other"],
                        "description": "A label indicating the attribute's function"
                    },
                    { "name": "primary", "type": "boolean", "description": "Indicates the primary email address" }
                ]
            },
            {
                "name": "phoneNumbers", "type": "complex", "multiValued": true,
                "description": "Phone numbers for the User",
                "subAttributes": [
                    { "name": "value", "type": "string", "description": "Phone number of the User" },
                    { "name": "display", "type": "string", "description": "A human-readable name" },
                    {
                        "name": "type", "type": "string",
                        "canonicalValues": ["work", "home", "mobile", "fax", "pager", "other"],
                        "description": "A label indicating the attribute's function"
                    },
                    { "name": "primary", "type": "boolean", "description": "Indicates the primary phone number" }
                ]
            },
            {
                "name": "addresses", "type": "complex", "multiValued": true,
                "description": "A physical mailing address for this User",
                "subAttributes": [
                    { "name": "formatted", "type": "string", "description": "The full mailing address" },
                    { "name": "streetAddress", "type": "string", "description": "The full street address" },
                    { "name": "locality", "type": "string", "description": "The city or locality" },
                    { "name": "region", "type": "string", "description": "The state or region" },
                    { "name": "postalCode", "type": "string", "description": "The zip code or postal code" },
                    { "name": "country", "type": "string", "description": "The country name component" },
                    {
                        "name": "type", "type": "string", "canonicalValues": ["work", "home", "other"],
                        "description": "A label indicating the attribute's function"
                    },
                    { "name": "primary", "type": "boolean", "description": "Indicates the primary address" }
                ]
            },
            {
                "name": "groups", "type": "complex", "multiValued": true, "mutability": "readOnly",
                "description": "A list of groups to which the user belongs",
                "subAttributes": [
                    { "name": "value", "type": "string", "mutability": "readOnly", "description": "The identifier of the User's group" },
                    {
                        "name": "$ref", "type": "reference", "referenceTypes": ["resource"], "resourceType": "Group",
                        "mutability": "readOnly", "description": "The URI of the corresponding Group resource"
                    },
                    { "name": "display", "type": "string", "mutability": "readOnly", "description": "A human-readable name" },
                    {
                        "name": "type", "type": "string", "canonicalValues": ["direct", "indirect"],
                        "mutability": "readOnly", "description": "A label indicating the attribute's function"
                    }
                ]
            },
            {
                "name": "roles", "type": "complex", "multiValued": true,
                "description": "A list of roles for the User",
                "subAttributes": [
                    { "name": "value", "type": "string", "description": "The value of a role" },
                    { "name": "display", "type": "string", "description": "A human-readable name" },
                    { "name": "type", "type": "string", "description": "A label indicating the attribute's function" },
                    { "name": "primary", "type": "boolean", "description": "Indicates the primary role" }
                ]
            },
            {
                "name": "x509Certificates", "type": "complex", "multiValued": true,
                "description": "A list of certificates issued to the User",
                "subAttributes": [
                    { "name": "value", "type": "binary", "caseExact": true, "description": "The value of an X.509 certificate" },
                    { "name": "display", "type": "string", "description": "A human-readable name" },
                    { "name": "type", "type": "string", "description": "A label indicating the attribute's function" },
                    { "name": "primary", "type": "boolean", "description": "Indicates the primary certificate" }
                ]
            }
        ]
    });

    /// Group schema descriptor (RFC 7643 section 4.2)
    pub static ref GROUP_SCHEMA: Value = json!({
        "id": SCIM_SCHEMA_CORE_GROUP,
        "name": "Group",
        "description": "Group",
        "attributes": [
            {
                "name": "id", "type": "string", "description": "Unique identifier for the SCIM resource",
                "mutability": "readOnly", "returned": "always", "uniqueness": "server", "caseExact": true
            },
            {
                "name": "externalId", "type": "string", "caseExact": true,
                "description": "Identifier of the resource as defined by the provisioning client"
            },
            {
                "name": "displayName", "type": "string", "required": true,
                "description": "A human-readable name for the Group"
            },
            {
                "name": "members", "type": "complex", "multiValued": true,
                "description": "A list of members of the Group",
                "subAttributes": [
                    { "name": "value", "type": "string", "mutability": "immutable", "description": "Identifier of the member" },
                    {
                        "name": "$ref", "type": "reference", "referenceTypes": ["resource"], "mutability": "immutable",
                        "description": "The URI corresponding to a SCIM resource that is a member"
                    },
                    { "name": "display", "type": "string", "description": "A human-readable name" },
                    {
                        "name": "type", "type": "string", "canonicalValues": ["User", "Group"], "mutability": "immutable",
                        "description": "A label indicating the type of resource"
                    }
                ]
            }
        ]
    });

    /// Enterprise User extension descriptor (RFC 7643 section 4.3)
    pub static ref ENTERPRISE_USER_SCHEMA: Value = json!({
        "id": SCIM_SCHEMA_ENTERPRISE_USER,
        "name": "EnterpriseUser",
        "description": "Enterprise User",
        "attributes": [
            { "name": "employeeNumber", "type": "string", "description": "Numeric or alphanumeric identifier" },
            { "name": "costCenter", "type": "string", "description": "Identifies the name of a cost center" },
            { "name": "organization", "type": "string", "description": "Identifies the name of an organization" },
            { "name": "division", "type": "string", "description": "Identifies the name of a division" },
            { "name": "department", "type": "string", "description": "Identifies the name of a department" },
            {
                "name": "manager", "type": "complex", "description": "The User's manager",
                "subAttributes": [
                    { "name": "value", "type": "string", "description": "The id of the SCIM resource representing the manager" },
                    {
                        "name": "$ref", "type": "reference", "referenceTypes": ["resource"], "resourceType": "User",
                        "description": "The URI of the SCIM resource representing the manager"
                    },
                    {
                        "name": "displayName", "type": "string", "mutability": "readOnly",
                        "description": "The displayName of the User's manager"
                    }
                ]
            }
        ]
    });

    /// Descriptor of the common `meta` attribute, registered with the name prefix `meta`
    pub static ref META_SCHEMA: Value = json!({
        "id": SCIM_SCHEMA_META,
        "name": "Meta",
        "description": "Resource metadata",
        "attributes": [
            {
                "name": "resourceType", "type": "string", "mutability": "readOnly", "caseExact": true,
                "description": "The name of the resource type of the resource"
            },
            {
                "name": "created", "type": "dateTime", "mutability": "readOnly",
                "description": "The date and time the resource was added to the service provider"
            },
            {
                "name": "lastModified", "type": "dateTime", "mutability": "readOnly",
                "description": "The most recent date and time that the details of this resource were updated"
            },
            {
                "name": "location", "type": "reference", "referenceTypes": ["uri"], "mutability": "readOnly",
                "description": "The URI of the resource being returned"
            },
            {
                "name": "version", "type": "string", "mutability": "readOnly", "caseExact": true,
                "description": "The version of the resource being returned"
            }
        ]
    });
}

/// Built-in resource schema descriptors in registration order
pub fn builtin_schemas() -> Vec<&'static Value> {
    vec![&*USER_SCHEMA, &*GROUP_SCHEMA, &*ENTERPRISE_USER_SCHEMA]
}
