//! Tool registry and built-in tools.
//!
//! Tools are declared once (name, JSON schema, executor) and handed to the
//! agent driver as capabilities. Executor failures come back as error
//! results for the model to read, never as a failed request.

pub mod current_time;
pub mod knowledge_search;
pub mod registry;

pub use current_time::GetCurrentTimeTool;
pub use knowledge_search::KnowledgeSearchTool;
pub use registry::{Tool, ToolOutput, ToolRegistry};
