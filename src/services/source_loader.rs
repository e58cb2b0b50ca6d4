// src/services/source_loader.rs
use glob::glob;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::core::flow::Node;
use crate::error::{ResolveError, ResolveResult};

/// Loads the raw content named by a node's source path, relative to the
/// flow's working directory.
///
/// Prompt-style nodes may omit the path entirely; in that case the working
/// directory is scanned for exactly one `*.prompt` file.
#[derive(Debug, Clone)]
pub struct SourceLoader {
    working_dir: PathBuf,
}

impl SourceLoader {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    pub fn load(&self, node: &Node) -> ResolveResult<String> {
        let path = node
            .source
            .as_ref()
            .and_then(|source| source.path.as_deref())
            .filter(|path| !path.is_empty());

        match path {
            Some(path) => {
                let full_path = self.working_dir.join(path);
                if !full_path.is_file() {
                    return Err(ResolveError::InvalidSource {
                        node: node.name.clone(),
                        reason: format!(
                            "Node source path '{}' is invalid on node '{}'.",
                            path, node.name
                        ),
                    });
                }
                debug!("Loading source '{}' for node '{}'", path, node.name);
                fs::read_to_string(&full_path).map_err(|e| ResolveError::InvalidSource {
                    node: node.name.clone(),
                    reason: format!(
                        "Node source path '{}' could not be read on node '{}': {}",
                        path, node.name, e
                    ),
                })
            }
            None => self.scan_single_prompt(node),
        }
    }

    /// Directory-scan fallback: exactly one `*.prompt` file must match.
    fn scan_single_prompt(&self, node: &Node) -> ResolveResult<String> {
        let pattern = self.working_dir.join("*.prompt");
        let pattern = pattern.to_string_lossy();
        let candidates: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| ResolveError::InvalidSource {
                node: node.name.clone(),
                reason: format!("Node source path scan failed on node '{}': {}", node.name, e),
            })?
            .filter_map(Result::ok)
            .filter(|path| path.is_file())
            .collect();

        match candidates.as_slice() {
            [single] => {
                debug!(
                    "📝 Node '{}' has no source path, falling back to '{}'",
                    node.name,
                    single.display()
                );
                fs::read_to_string(single).map_err(ResolveError::Io)
            }
            [] => Err(ResolveError::InvalidSource {
                node: node.name.clone(),
                reason: format!(
                    "Node source path is missing on node '{}' and no .prompt file was found in '{}'.",
                    node.name,
                    self.working_dir.display()
                ),
            }),
            many => Err(ResolveError::InvalidSource {
                node: node.name.clone(),
                reason: format!(
                    "Node source path is missing on node '{}' and {} .prompt files match in '{}'.",
                    node.name,
                    many.len(),
                    self.working_dir.display()
                ),
            }),
        }
    }
}
