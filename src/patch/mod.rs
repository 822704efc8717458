//! SCIM PATCH (RFC 7644 section 3.5.2): operation model, path resolution,
//! vendor dialect workarounds and the engine applying operations to a resource.

pub mod engine;
pub mod resolver;
pub mod workarounds;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult, ScimType};
use crate::schema::definitions::SCIM_API_MESSAGES_PATCH_OP;

pub use engine::{PatchEngine, PatchOutcome};
pub use resolver::{PatchPathResolver, ResolvedPath};
pub use workarounds::{PatchContext, PatchWorkaround, WorkaroundChain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl PatchOp {
    /// Parses the `op` member; clients are not consistent about its case
    pub fn parse(op: &str) -> AppResult<Self> {
        match op.to_lowercase().as_str() {
            "add" => Ok(PatchOp::Add),
            "replace" => Ok(PatchOp::Replace),
            "remove" => Ok(PatchOp::Remove),
            _ => Err(AppError::bad_request(
                ScimType::InvalidSyntax,
                format!("unknown patch operation '{}'", op),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Replace => "replace",
            PatchOp::Remove => "remove",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPatchOperation {
    op: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    values: Option<Vec<Value>>,
}

/// One entry of the `Operations` array
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawPatchOperation")]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: Option<String>,
    /// Every element of an array `value` is one value; any other `value` is a single value
    pub values: Vec<Value>,
}

impl TryFrom<RawPatchOperation> for PatchOperation {
    type Error = String;

    fn try_from(raw: RawPatchOperation) -> Result<Self, Self::Error> {
        let op = PatchOp::parse(&raw.op).map_err(|e| e.detail())?;
        let mut values = raw.values.unwrap_or_default();
        match raw.value {
            Some(Value::Array(items)) => values.extend(items),
            Some(Value::Null) | None => {}
            Some(single) => values.push(single),
        }
        Ok(PatchOperation {
            op,
            path: raw.path.filter(|p| !p.trim().is_empty()),
            values,
        })
    }
}

impl PatchOperation {
    pub fn new(op: PatchOp, path: Option<&str>, values: Vec<Value>) -> Self {
        PatchOperation {
            op,
            path: path.map(|p| p.to_string()),
            values,
        }
    }

    pub fn from_json(operation: &Value) -> AppResult<Self> {
        serde_json::from_value(operation.clone())
            .map_err(|e| AppError::bad_request(ScimType::InvalidSyntax, e.to_string()))
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("op".to_string(), json!(self.op.as_str()));
        if let Some(path) = &self.path {
            obj.insert("path".to_string(), json!(path));
        }
        match self.values.as_slice() {
            [] => {}
            [single] => {
                obj.insert("value".to_string(), single.clone());
            }
            many => {
                obj.insert("value".to_string(), Value::Array(many.to_vec()));
            }
        }
        Value::Object(obj)
    }
}

/// Body of a PATCH request
#[derive(Debug, Clone, Deserialize)]
pub struct PatchRequest {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(rename = "Operations", alias = "operations")]
    pub operations: Vec<PatchOperation>,
}

impl PatchRequest {
    pub fn new(operations: Vec<PatchOperation>) -> Self {
        PatchRequest {
            schemas: vec![SCIM_API_MESSAGES_PATCH_OP.to_string()],
            operations,
        }
    }

    pub fn from_json(body: &Value) -> AppResult<Self> {
        let request: PatchRequest = serde_json::from_value(body.clone())
            .map_err(|e| AppError::bad_request(ScimType::InvalidSyntax, e.to_string()))?;
        if !request
            .schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(SCIM_API_MESSAGES_PATCH_OP))
        {
            return Err(AppError::bad_request(
                ScimType::InvalidSyntax,
                format!("patch request must declare the schema '{}'", SCIM_API_MESSAGES_PATCH_OP),
            ));
        }
        if request.operations.is_empty() {
            return Err(AppError::bad_request(
                ScimType::InvalidSyntax,
                "patch request does not contain any operations",
            ));
        }
        Ok(request)
    }
}
