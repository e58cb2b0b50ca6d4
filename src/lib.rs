// src/lib.rs

// ============================================================================
// 模块定义 (Modules)
// ============================================================================

pub mod core;
pub mod error;
pub mod services;

// ============================================================================
// 公共导出 (Public Exports)
// ============================================================================

pub use core::assistant::{AssistantDefinition, AssistantTool, AssistantToolInvoker};
pub use core::connections::{
    resolve_connection, Connection, ConnectionRecord, ConnectionRegistry, ConnectionSpec,
};
pub use core::flow::{
    FlowValue, Image, InputAssignment, InputValueType, Node, ToolSource, ToolSourceType, ToolType,
};
pub use core::resolver::ToolResolver;
pub use core::template::{extract_template_inputs, render_template, validate_template};
pub use core::tool::{
    BoundTool, InputDefinition, ResolvedTool, Tool, ToolArgs, ToolFn, ValueType,
};
pub use error::{ResolveError, ResolveResult, ResolveToolError};
pub use services::config::CaryaConfig;
pub use services::source_loader::SourceLoader;
pub use services::tool_loader::{LoadedTool, RegistryToolLoader, ToolLoader};
