use serde_json::{json, Value};
use std::fmt;

pub const SCIM_ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

/// `scimType` detail keywords from RFC 7644 section 3.12
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScimType {
    InvalidFilter,
    InvalidSyntax,
    InvalidPath,
    NoTarget,
    InvalidValue,
    Mutability,
    Uniqueness,
    MissingExtension,
}

impl ScimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScimType::InvalidFilter => "invalidFilter",
            ScimType::InvalidSyntax => "invalidSyntax",
            ScimType::InvalidPath => "invalidPath",
            ScimType::NoTarget => "noTarget",
            ScimType::InvalidValue => "invalidValue",
            ScimType::Mutability => "mutability",
            ScimType::Uniqueness => "uniqueness",
            ScimType::MissingExtension => "missingExtension",
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    /// Schema descriptor could not be turned into a schema tree
    InvalidSchema(String),
    /// Document does not satisfy its schema; status depends on direction
    DocumentValidation { message: String, status: u16 },
    BadRequest { message: String, scim_type: ScimType },
    InternalServer { message: String, scim_type: Option<ScimType> },
    Configuration(String),
    Serialization(serde_json::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidSchema(e) => write!(f, "Invalid schema: {}", e),
            AppError::DocumentValidation { message, .. } => {
                write!(f, "Document validation failed: {}", message)
            }
            AppError::BadRequest { message, .. } => write!(f, "Bad request: {}", message),
            AppError::InternalServer { message, .. } => write!(f, "Internal error: {}", message),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err)
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn bad_request(scim_type: ScimType, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            scim_type,
        }
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::bad_request(ScimType::InvalidPath, message)
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::bad_request(ScimType::InvalidValue, message)
    }

    pub fn invalid_schema(message: impl Into<String>) -> Self {
        AppError::InvalidSchema(message.into())
    }

    /// HTTP status the error maps to
    pub fn status(&self) -> u16 {
        match self {
            AppError::DocumentValidation { status, .. } => *status,
            AppError::BadRequest { .. } => 400,
            AppError::InvalidSchema(_)
            | AppError::InternalServer { .. }
            | AppError::Configuration(_)
            | AppError::Serialization(_) => 500,
        }
    }

    pub fn scim_type(&self) -> Option<ScimType> {
        match self {
            AppError::BadRequest { scim_type, .. } => Some(*scim_type),
            AppError::InternalServer { scim_type, .. } => *scim_type,
            _ => None,
        }
    }

    /// Message without the variant prefix, as placed in the `detail` field
    pub fn detail(&self) -> String {
        match self {
            AppError::InvalidSchema(e) | AppError::Configuration(e) => e.clone(),
            AppError::DocumentValidation { message, .. }
            | AppError::BadRequest { message, .. }
            | AppError::InternalServer { message, .. } => message.clone(),
            AppError::Serialization(e) => e.to_string(),
        }
    }

    pub fn to_error_document(&self) -> Value {
        scim_error_response(self.status(), self.scim_type(), &self.detail())
    }
}

// SCIM 2.0 standard error response helper
pub fn scim_error_response(status: u16, scim_type: Option<ScimType>, detail: &str) -> Value {
    let mut body = json!({
        "schemas": [SCIM_ERROR_SCHEMA],
        "detail": detail,
        "status": status.to_string(),
    });
    if let (Some(scim_type), Value::Object(obj)) = (scim_type, &mut body) {
        obj.insert("scimType".to_string(), json!(scim_type.as_str()));
    }
    body
}
