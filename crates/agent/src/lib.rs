pub mod prompt;
pub mod runtime;
pub mod tools;

pub use runtime::{browse_web, BrowseOptions, StepCallback};
pub use tools::tool_schemas;
