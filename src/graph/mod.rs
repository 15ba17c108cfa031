//! Compiled graph built from a [`WorkflowDefinition`].
//!
//! Outgoing edges are pre-sorted so edge selection is a single forward scan:
//! conditioned edges by descending priority, then unconditioned defaults.

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use std::collections::HashMap;

use crate::error::{WorkflowError, WorkflowResult};
use crate::model::{NodeType, WorkflowDefinition, WorkflowEdge, WorkflowNode};

pub struct CompiledGraph {
    graph: StableDiGraph<WorkflowNode, WorkflowEdge>,
    node_index: HashMap<String, NodeIndex>,
    start_node_id: String,
    /// Outgoing edges per node in evaluation order.
    outgoing: HashMap<String, Vec<WorkflowEdge>>,
}

impl CompiledGraph {
    pub fn build(definition: &WorkflowDefinition) -> WorkflowResult<Self> {
        let mut graph = StableDiGraph::new();
        let mut node_index = HashMap::new();

        let mut start_node_id = None;
        for node in &definition.nodes {
            if node.node_type == NodeType::Unknown {
                return Err(WorkflowError::NoExecutor(node.id.clone()));
            }
            if node.node_type == NodeType::Start {
                if start_node_id.replace(node.id.clone()).is_some() {
                    return Err(WorkflowError::InternalError(format!(
                        "multiple start nodes in workflow {}",
                        definition.id
                    )));
                }
            }
            let idx = graph.add_node(node.clone());
            if node_index.insert(node.id.clone(), idx).is_some() {
                return Err(WorkflowError::InternalError(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }
        let start_node_id = start_node_id.ok_or(WorkflowError::NoStartNode)?;

        let mut outgoing: HashMap<String, Vec<WorkflowEdge>> = HashMap::new();
        for edge in &definition.edges {
            let source = *node_index
                .get(&edge.source)
                .ok_or_else(|| WorkflowError::NodeNotFound(edge.source.clone()))?;
            let target = *node_index
                .get(&edge.target)
                .ok_or_else(|| WorkflowError::NodeNotFound(edge.target.clone()))?;
            graph.add_edge(source, target, edge.clone());
            outgoing.entry(edge.source.clone()).or_default().push(edge.clone());
        }
        for edges in outgoing.values_mut() {
            // Unconditioned defaults sort last regardless of priority.
            edges.sort_by_key(|e| (e.conditions.is_empty(), std::cmp::Reverse(e.priority)));
        }

        Ok(CompiledGraph {
            graph,
            node_index,
            start_node_id,
            outgoing,
        })
    }

    pub fn start_node(&self) -> &WorkflowNode {
        // The start id is validated at build time.
        &self.graph[self.node_index[&self.start_node_id]]
    }

    pub fn node(&self, node_id: &str) -> WorkflowResult<&WorkflowNode> {
        let idx = self
            .node_index
            .get(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
        Ok(&self.graph[*idx])
    }

    /// Outgoing edges of `node_id` in evaluation order.
    pub fn outgoing_edges(&self, node_id: &str) -> &[WorkflowEdge] {
        self.outgoing.get(node_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}
