pub mod attribute;
pub mod definitions;
pub mod registry;
pub mod tree;
pub mod validation;

// Re-export commonly used items from definitions
pub use definitions::*;
pub use attribute::{AttributeDescriptor, AttributeId};
pub use registry::{ResourceSchema, ResourceType, SchemaExtension, SchemaRegistry};
pub use tree::SchemaTree;
pub use validation::{DocumentValidator, HttpMethod, ValidationMode};
