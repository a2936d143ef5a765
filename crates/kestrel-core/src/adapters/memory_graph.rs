//! Read-side memory graph traversal (spec.md §4.13).
//!
//! The graph itself (nodes, edges, decay, extraction from conversation
//! turns) lives in an external graph-store collaborator (spec.md §1); this
//! core only issues seed lookups and neighbor expansion through
//! [`MemoryGraphCollaborator`] and formats the result for a prompt.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const MAX_DEPTH: u32 = 2;
const MAX_NODES: usize = 30;
const NEIGHBORS_PER_NODE: usize = 10;
const SEEDS_PER_NAME: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Project,
    File,
    Function,
    Concept,
    Decision,
    Tool,
    Error,
    Preference,
    Goal,
    Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    MentionedIn,
    DecidedBy,
    DependsOn,
    RelatedTo,
    CausedBy,
    ResolvedBy,
    CreatedBy,
    ModifiedBy,
    Prefers,
    ConflictsWith,
    SucceededBy,
    PartOf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    pub id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub description: String,
    pub weight: f64,
    pub mention_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    pub strength: f64,
    pub context: String,
}

/// One node surfaced by a traversal, annotated with how far it is from
/// the nearest seed.
#[derive(Debug, Clone)]
pub struct TraversedNode {
    pub node: EntityNode,
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub struct GraphContext {
    pub nodes: Vec<TraversedNode>,
    pub edges: Vec<RelationEdge>,
}

/// Seam to the external graph store. Write-side (entity/relation
/// extraction, decay) is the collaborator's own responsibility; this
/// core only reads.
#[async_trait::async_trait]
pub trait MemoryGraphCollaborator: Send + Sync {
    /// Nodes whose name or description matches `name`, ordered by weight
    /// descending, capped at `limit`.
    async fn find_nodes(&self, workspace_id: &str, name: &str, limit: usize) -> anyhow::Result<Vec<EntityNode>>;

    /// Edges touching `node_id` plus the node at their other end, ordered
    /// by `edge_strength * node_weight` descending, capped at `limit`.
    async fn neighbors(&self, workspace_id: &str, node_id: &str, limit: usize) -> anyhow::Result<Vec<(RelationEdge, EntityNode)>>;
}

pub struct MemoryGraph {
    store: std::sync::Arc<dyn MemoryGraphCollaborator>,
}

impl MemoryGraph {
    pub fn new(store: std::sync::Arc<dyn MemoryGraphCollaborator>) -> Self {
        Self { store }
    }

    /// BFS from the nodes matching `query_entities`, to depth
    /// [`MAX_DEPTH`], capped at [`MAX_NODES`] total nodes.
    pub async fn query_context(&self, workspace_id: &str, query_entities: &[String]) -> GraphContext {
        let mut visited: HashSet<String> = HashSet::new();
        let mut nodes: Vec<TraversedNode> = Vec::new();
        let mut edges: Vec<RelationEdge> = Vec::new();

        let mut frontier = Vec::new();
        for name in query_entities {
            let seeds = match self.store.find_nodes(workspace_id, name, SEEDS_PER_NAME).await {
                Ok(seeds) => seeds,
                Err(e) => {
                    tracing::warn!(workspace_id = %workspace_id, error = %e, "memory_graph: seed lookup failed");
                    continue;
                }
            };
            for node in seeds {
                if visited.insert(node.id.clone()) {
                    frontier.push(node.id.clone());
                    nodes.push(TraversedNode { node, depth: 0 });
                }
            }
        }

        for depth in 1..=MAX_DEPTH {
            if frontier.is_empty() || nodes.len() >= MAX_NODES {
                break;
            }
            let mut next_frontier = Vec::new();

            for node_id in &frontier {
                let neighbors = match self.store.neighbors(workspace_id, node_id, NEIGHBORS_PER_NODE).await {
                    Ok(neighbors) => neighbors,
                    Err(e) => {
                        tracing::warn!(workspace_id = %workspace_id, error = %e, "memory_graph: neighbor lookup failed");
                        continue;
                    }
                };

                for (edge, neighbor) in neighbors {
                    if visited.contains(&neighbor.id) {
                        continue;
                    }
                    visited.insert(neighbor.id.clone());
                    next_frontier.push(neighbor.id.clone());
                    nodes.push(TraversedNode { node: neighbor, depth });
                    edges.push(edge);

                    if nodes.len() >= MAX_NODES {
                        break;
                    }
                }
                if nodes.len() >= MAX_NODES {
                    break;
                }
            }

            frontier = next_frontier;
        }

        nodes.sort_by(|a, b| {
            let score_a = a.node.weight / (1.0 + a.depth as f64);
            let score_b = b.node.weight / (1.0 + b.depth as f64);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });
        nodes.truncate(MAX_NODES);

        GraphContext { nodes, edges }
    }

    /// Queries the graph and formats the result as a prompt context
    /// section, or an empty string if no seed entity matched.
    pub async fn format_for_prompt(&self, workspace_id: &str, query_entities: &[String]) -> String {
        let ctx = self.query_context(workspace_id, query_entities).await;
        if ctx.nodes.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Memory Graph Context".to_string(), String::new()];
        for entry in ctx.nodes.iter().take(15) {
            let marker = if entry.depth == 0 { "*" } else { "-" };
            let desc = if entry.node.description.is_empty() {
                String::new()
            } else {
                format!(" -- {}", entry.node.description)
            };
            lines.push(format!("{marker} {} ({:?}){desc}", entry.node.name, entry.node.entity_type));
        }

        if !ctx.edges.is_empty() {
            lines.push(String::new());
            lines.push("Relationships:".to_string());
            for edge in ctx.edges.iter().take(10) {
                let source_name = ctx.nodes.iter().find(|n| n.node.id == edge.source_id).map(|n| n.node.name.as_str()).unwrap_or("?");
                let target_name = ctx.nodes.iter().find(|n| n.node.id == edge.target_id).map(|n| n.node.name.as_str()).unwrap_or("?");
                lines.push(format!("  {source_name} -[{:?}]-> {target_name}", edge.relation_type));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn node(id: &str, name: &str, weight: f64) -> EntityNode {
        EntityNode {
            id: id.to_string(),
            entity_type: EntityType::Concept,
            name: name.to_string(),
            description: String::new(),
            weight,
            mention_count: 1,
        }
    }

    struct FixedGraph;

    #[async_trait::async_trait]
    impl MemoryGraphCollaborator for FixedGraph {
        async fn find_nodes(&self, _workspace_id: &str, name: &str, _limit: usize) -> anyhow::Result<Vec<EntityNode>> {
            if name == "auth" {
                Ok(vec![node("n1", "auth", 2.0)])
            } else {
                Ok(Vec::new())
            }
        }

        async fn neighbors(&self, _workspace_id: &str, node_id: &str, _limit: usize) -> anyhow::Result<Vec<(RelationEdge, EntityNode)>> {
            if node_id == "n1" {
                Ok(vec![(
                    RelationEdge {
                        id: "e1".to_string(),
                        source_id: "n1".to_string(),
                        target_id: "n2".to_string(),
                        relation_type: RelationType::DependsOn,
                        strength: 1.0,
                        context: String::new(),
                    },
                    node("n2", "session_store", 1.0),
                )])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test]
    async fn traversal_expands_one_hop_from_seed() {
        let graph = MemoryGraph::new(Arc::new(FixedGraph));
        let ctx = graph.query_context("w1", &["auth".to_string()]).await;
        assert_eq!(ctx.nodes.len(), 2);
        assert!(ctx.nodes.iter().any(|n| n.node.name == "session_store" && n.depth == 1));
        assert_eq!(ctx.edges.len(), 1);
    }

    #[tokio::test]
    async fn no_matching_seed_yields_empty_prompt_section() {
        let graph = MemoryGraph::new(Arc::new(FixedGraph));
        let formatted = graph.format_for_prompt("w1", &["nothing".to_string()]).await;
        assert_eq!(formatted, "");
    }

    #[tokio::test]
    async fn format_for_prompt_includes_seed_and_neighbor() {
        let graph = MemoryGraph::new(Arc::new(FixedGraph));
        let formatted = graph.format_for_prompt("w1", &["auth".to_string()]).await;
        assert!(formatted.contains("auth"));
        assert!(formatted.contains("session_store"));
    }
}
