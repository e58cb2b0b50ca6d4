// src/services/tool_loader.rs
use indexmap::IndexMap;
use std::fmt;
use tracing::{debug, warn};

use crate::core::flow::Node;
use crate::core::tool::{BoundTool, Tool};
use crate::error::{ResolveError, ResolveResult};

/// What a loader hands back for a package or script tool: the declared
/// schema, the backing callable, the input names its constructor consumes,
/// and a mapping of parameter name → expected connection type used to
/// disambiguate connection inputs.
#[derive(Debug, Clone)]
pub struct LoadedTool {
    pub definition: Tool,
    pub callable: BoundTool,
    pub init_inputs: Vec<String>,
    pub connection_hints: IndexMap<String, String>,
}

impl LoadedTool {
    pub fn new(definition: Tool, callable: BoundTool) -> Self {
        Self {
            definition,
            callable,
            init_inputs: Vec::new(),
            connection_hints: IndexMap::new(),
        }
    }

    pub fn with_init_inputs<I: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = I>,
    ) -> Self {
        self.init_inputs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_connection_hint(
        mut self,
        parameter: impl Into<String>,
        connection_type: impl Into<String>,
    ) -> Self {
        self.connection_hints
            .insert(parameter.into(), connection_type.into());
        self
    }
}

/// Abstract loader seam: given a node's source reference, produce the tool
/// schema and its backing callable.
pub trait ToolLoader: Send + Sync {
    /// Look up the package tool named by `node.source.tool`.
    fn load_tool_for_package_node(&self, node: &Node) -> ResolveResult<LoadedTool>;
    /// Look up the script tool registered under `node.source.path`.
    fn load_tool_for_script_node(&self, node: &Node) -> ResolveResult<LoadedTool>;
    /// Look up the provider-specific package tool for an llm node.
    fn load_tool_for_llm_node(&self, node: &Node) -> ResolveResult<LoadedTool>;
}

/// Registry-backed loader. Package tools are keyed by tool name, script
/// tools by source path, and llm providers alias a package tool. All
/// entries are registered at startup.
#[derive(Default)]
pub struct RegistryToolLoader {
    package_tools: IndexMap<String, LoadedTool>,
    script_tools: IndexMap<String, LoadedTool>,
    llm_providers: IndexMap<String, String>,
}

impl RegistryToolLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_package_tool(&mut self, entry: LoadedTool) {
        let name = entry.definition.name.clone();
        if self.package_tools.contains_key(&name) {
            warn!("Package tool '{}' already registered, overwriting", name);
        }
        debug!("Registered package tool: {}", name);
        self.package_tools.insert(name, entry);
    }

    pub fn register_script_tool(&mut self, path: impl Into<String>, entry: LoadedTool) {
        let path = path.into();
        debug!("Registered script tool: {}", path);
        self.script_tools.insert(path, entry);
    }

    pub fn register_llm_provider(
        &mut self,
        provider: impl Into<String>,
        package_tool: impl Into<String>,
    ) {
        self.llm_providers.insert(provider.into(), package_tool.into());
    }

    pub fn package_tool_count(&self) -> usize {
        self.package_tools.len()
    }
}

impl ToolLoader for RegistryToolLoader {
    fn load_tool_for_package_node(&self, node: &Node) -> ResolveResult<LoadedTool> {
        let name = node
            .source
            .as_ref()
            .and_then(|source| source.tool.as_deref())
            .ok_or_else(|| ResolveError::InvalidSource {
                node: node.name.clone(),
                reason: format!("Node '{}' does not name a package tool", node.name),
            })?;
        self.package_tools
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::PackageToolNotFound(format!("'{}' is not registered", name)))
    }

    fn load_tool_for_script_node(&self, node: &Node) -> ResolveResult<LoadedTool> {
        let path = node
            .source
            .as_ref()
            .and_then(|source| source.path.as_deref())
            .filter(|path| !path.is_empty())
            .ok_or_else(|| ResolveError::InvalidSource {
                node: node.name.clone(),
                reason: format!("Node source path is missing on node '{}'.", node.name),
            })?;
        self.script_tools
            .get(path)
            .cloned()
            .ok_or_else(|| ResolveError::InvalidSource {
                node: node.name.clone(),
                reason: format!(
                    "Node source path '{}' is not a loadable script on node '{}'.",
                    path, node.name
                ),
            })
    }

    fn load_tool_for_llm_node(&self, node: &Node) -> ResolveResult<LoadedTool> {
        let provider = node.provider.as_deref().ok_or_else(|| {
            ResolveError::PackageToolNotFound(format!(
                "no provider specified on llm node '{}'",
                node.name
            ))
        })?;
        let tool_name = self.llm_providers.get(provider).ok_or_else(|| {
            ResolveError::PackageToolNotFound(format!("provider '{}' is not registered", provider))
        })?;
        self.package_tools.get(tool_name).cloned().ok_or_else(|| {
            ResolveError::PackageToolNotFound(format!("'{}' is not registered", tool_name))
        })
    }
}

impl fmt::Debug for RegistryToolLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryToolLoader")
            .field("package_tools", &self.package_tools.keys().collect::<Vec<_>>())
            .field("script_tools", &self.script_tools.keys().collect::<Vec<_>>())
            .field("llm_providers", &self.llm_providers)
            .finish()
    }
}
