//! Tool definitions, typed built-in calls, and local execution.

pub mod arguments;
pub mod builtin;
pub mod definition;
pub mod executor;
pub mod registry;

pub use arguments::{resolve_path, BuiltinCall};
pub use builtin::LocalToolExecutor;
pub use definition::{BuiltinTool, ToolDefinition, ToolOrigin, BUILTIN_SERVER};
pub use executor::{ToolExecutor, ToolOutput};
pub use registry::ToolSet;
