pub mod config;
pub mod error;
pub mod logging;
pub mod parser;
pub mod patch;
pub mod schema;
pub mod utils;

// Re-export commonly used types for easier access
pub use config::{AppConfig, CompatibilityConfig};
pub use error::{AppError, AppResult};
pub use patch::{PatchEngine, PatchOperation, PatchOutcome, PatchRequest};
pub use schema::{DocumentValidator, HttpMethod, ResourceType, SchemaRegistry, ValidationMode};
