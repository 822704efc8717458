pub mod filter_operator;
pub mod filter_parser;
pub mod patch_parser;

pub use filter_operator::FilterOperator;
pub use filter_parser::parse_filter;
pub use patch_parser::PatchPath;
