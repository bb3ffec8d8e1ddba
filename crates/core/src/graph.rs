//! ComfyUI API-format workflow graph.
//!
//! An API-format workflow is a JSON object keyed by node id, where each
//! value looks like `{"class_type": ..., "inputs": {...}, "_meta": {...}}`.
//! The graph is treated as opaque apart from the fields the
//! [`GraphMutator`](crate::mutator::GraphMutator) writes, so any extra
//! keys on a node survive a load/serialize cycle untouched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// A single node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// ComfyUI node class, e.g. `KSampler` or `LoraLoader`.
    #[serde(default)]
    pub class_type: String,
    /// Input fields, keyed by input name.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Editor metadata (`title`, `allow_custom_paths`, ...).
    #[serde(rename = "_meta", default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    /// Any other keys present in the template.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The full workflow graph, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGraph {
    nodes: BTreeMap<String, Node>,
}

impl JobGraph {
    /// Parse an API-format workflow from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read and parse a workflow template from disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::TemplateRead {
            path: path.to_path_buf(),
            source,
        })?;
        let graph = Self::from_json(&raw).map_err(|source| CoreError::TemplateParse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), nodes = graph.len(), "Loaded workflow template");
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Read a single input value, if both the node and the input exist.
    pub fn input(&self, node_id: &str, field: &str) -> Option<&Value> {
        self.node(node_id).and_then(|node| node.inputs.get(field))
    }
}
