//! Pipeline definition consumed by the coordinator.
//!
//! The surrounding runner owns graph construction and topological sorting;
//! this module only describes the result. A [`PipelineSpec`] is built once
//! from an ordered node list, validated, and passed by reference into the
//! coordinator — there is no process-wide node registry.

use std::collections::HashMap;

use crate::error::CacheError;

/// Declaration of a single pipeline node, as supplied by the runner.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Unique node name; doubles as the cache key for unmapped nodes.
    pub name: String,
    /// Parent node names in declared dependency order. This order drives
    /// `deps_hash`, so it must be a stable property of the node.
    pub parents: Vec<String>,
    /// Exact source text of the node function. Any edit, including
    /// whitespace, changes the code hash.
    pub source: String,
    /// Parameter name of the map axis, for nodes that process a batch of
    /// items with per-item cache entries.
    pub map_axis: Option<String>,
    /// Field name that identifies one item of a mapped node. When absent,
    /// a fixed probe list and then a fingerprint fallback apply.
    pub item_key_attr: Option<String>,
}

impl NodeSpec {
    /// Creates a node with no parents and no map axis.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            source: source.into(),
            map_axis: None,
            item_key_attr: None,
        }
    }

    /// Sets the parent list in declared dependency order.
    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Declares this node as mapped over the given axis parameter.
    pub fn mapped(mut self, axis: impl Into<String>) -> Self {
        self.map_axis = Some(axis.into());
        self
    }

    /// Declares the item field used as the per-item cache key.
    pub fn with_item_key_attr(mut self, attr: impl Into<String>) -> Self {
        self.item_key_attr = Some(attr.into());
        self
    }

    /// Returns `true` if this node has a map axis.
    pub fn is_mapped(&self) -> bool {
        self.map_axis.is_some()
    }
}

/// Ordered, validated pipeline definition.
///
/// Node order must be topological (every parent precedes its children);
/// construction verifies this along with name uniqueness and parent
/// resolution, so the coordinator can rely on it.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    nodes: Vec<NodeSpec>,
    index: HashMap<String, usize>,
}

impl PipelineSpec {
    /// Builds a pipeline definition from an ordered node list.
    pub fn new(nodes: Vec<NodeSpec>) -> Result<Self, CacheError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (pos, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), pos).is_some() {
                return Err(CacheError::DuplicateNode {
                    name: node.name.clone(),
                });
            }
        }
        for (pos, node) in nodes.iter().enumerate() {
            for parent in &node.parents {
                match index.get(parent) {
                    None => {
                        return Err(CacheError::UnknownParent {
                            node: node.name.clone(),
                            parent: parent.clone(),
                        })
                    }
                    Some(&parent_pos) if parent_pos >= pos => {
                        return Err(CacheError::NotTopological {
                            node: node.name.clone(),
                            parent: parent.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(Self { nodes, index })
    }

    /// Looks up a node by name.
    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.index.get(name).map(|&pos| &self.nodes[pos])
    }

    /// Returns the nodes in pipeline (topological) order.
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }
}
