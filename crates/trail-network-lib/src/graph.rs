//! Routing graph derived from a resolved trail set
//!
//! Nodes are trail endpoints merged on a precision grid, edges are live trail rows. This is the
//! view handed to downstream routing once the splitting engine has converged.

use crate::geometry::Point3;
use crate::trail::{LineageId, SegmentId, Trail};
use crate::utils;
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Node classification by degree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    /// Degree 1
    DeadEnd,
    /// Degree 2; the two edges could be merged
    Connector,
    /// Degree 3 or more
    Intersection,
}

impl NodeKind {
    fn from_degree(degree: usize) -> Self {
        match degree {
            0 | 1 => NodeKind::DeadEnd,
            2 => NodeKind::Connector,
            _ => NodeKind::Intersection,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GraphNode {
    pub id: usize,
    pub location: Point3,
    pub degree: usize,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GraphEdge {
    pub trail: SegmentId,
    pub lineage: LineageId,
    pub from: usize,
    pub to: usize,
    /// Horizontal length in meters
    pub length: f64,
    /// Elevation-aware length in meters
    pub length_3d: f64,
    pub name: Option<String>,
}

/// Counts describing a routing graph
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GraphSummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub dead_ends: usize,
    pub connectors: usize,
    pub intersections: usize,
    /// Connected components
    pub components: usize,
    pub total_length: f64,
    pub total_length_3d: f64,
}

/// Node/edge view of the trail network
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoutingGraph {
    graph: UnGraph<GraphNode, GraphEdge>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl RoutingGraph {
    /// Build the graph from live trails
    ///
    /// # Arguments
    /// * `trails` - Live trail set
    /// * `precision` - Grid size in meters on which endpoints are merged into nodes
    pub fn build(trails: &[Arc<Trail>], precision: f64) -> Self {
        let mut graph: UnGraph<GraphNode, GraphEdge> =
            UnGraph::with_capacity(trails.len() * 2, trails.len());
        let mut cells: HashMap<(i64, i64), NodeIndex> = HashMap::new();

        let mut node_for = |point: Point3, graph: &mut UnGraph<GraphNode, GraphEdge>| {
            let cell = (
                utils::grid_cell(point.x, precision),
                utils::grid_cell(point.y, precision),
            );
            let index = *cells.entry(cell).or_insert_with(|| {
                let id = graph.node_count();
                graph.add_node(GraphNode {
                    id,
                    location: point,
                    degree: 0,
                    kind: NodeKind::DeadEnd,
                })
            });
            // A loop trail counts twice on its node
            graph[index].degree += 1;
            index
        };

        for trail in trails {
            let from = node_for(trail.geometry().start(), &mut graph);
            let to = node_for(trail.geometry().end(), &mut graph);
            graph.add_edge(
                from,
                to,
                GraphEdge {
                    trail: trail.id(),
                    lineage: trail.lineage(),
                    from: from.index(),
                    to: to.index(),
                    length: trail.length(),
                    length_3d: trail.length_3d(),
                    name: trail.name().map(str::to_string),
                },
            );
        }

        for node in graph.node_weights_mut() {
            node.kind = NodeKind::from_degree(node.degree);
        }

        Self { graph }
    }

    /// Underlying `petgraph` graph, for routing algorithms
    #[inline]
    pub fn graph(&self) -> &UnGraph<GraphNode, GraphEdge> {
        &self.graph
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.graph.edge_weights()
    }

    /// Edges incident to a node
    pub fn edges_at(&self, node: usize) -> impl Iterator<Item = &GraphEdge> {
        self.graph
            .edges(NodeIndex::new(node))
            .map(|edge| edge.weight())
    }

    /// Number of connected components
    #[inline]
    pub fn component_count(&self) -> usize {
        connected_components(&self.graph)
    }

    pub fn summary(&self) -> GraphSummary {
        let count = |kind: NodeKind| self.nodes().filter(|n| n.kind == kind).count();
        GraphSummary {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            dead_ends: count(NodeKind::DeadEnd),
            connectors: count(NodeKind::Connector),
            intersections: count(NodeKind::Intersection),
            components: self.component_count(),
            total_length: self.edges().map(|e| e.length).sum(),
            total_length_3d: self.edges().map(|e| e.length_3d).sum(),
        }
    }
}
