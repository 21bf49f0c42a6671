//! Trail Network Library - Intersection Resolution and Trail Splitting
//!
//! This library turns a set of raw trail line geometries into a topologically valid routing
//! network: no trail crosses another without a shared vertex, no dangling endpoint sits near
//! another trail without being connected, and every segment has a usable length.
//!
//! # Architecture
//!
//! - **[`GeometryKernel`]**: Geometry provider contract, implemented by [`PlanarKernel`]
//! - **[`Trail`]**: Live trail row with stable lineage across splits
//! - **[`TrailStore`]**: Transactional storage contract, implemented by [`MemoryTrailStore`]
//! - **[`IntersectionDetector`]**: Finds crossings, T/Y-junctions and multi-point conflicts
//! - **[`EndpointSnapper`]**: Connects free endpoints to the nearest trail
//! - **[`TrailSplitter`]**: One shared cut/validate/replace path for every conflict kind
//! - **[`IterationController`]**: Repeats detect, prioritize and split until convergence
//! - **[`RoutingGraph`]**: Node/edge view handed to downstream routing
//!
//! # Usage
//!
//! ```rust
//! use trail_network_lib::{
//!     MemoryTrailStore, NewTrail, PipelineConfig, Point3, TrailAttributes, TrailGeometry,
//!     resolve,
//! };
//!
//! # fn main() -> trail_network_lib::Result<()> {
//! let horizontal = TrailGeometry::new(vec![
//!     Point3::new(0.0, 50.0, 0.0),
//!     Point3::new(100.0, 50.0, 0.0),
//! ])?;
//! let vertical = TrailGeometry::new(vec![
//!     Point3::new(50.0, 0.0, 0.0),
//!     Point3::new(50.0, 100.0, 0.0),
//! ])?;
//!
//! let mut store = MemoryTrailStore::from_trails([
//!     NewTrail::new(TrailAttributes::named("Ridge"), horizontal),
//!     NewTrail::new(TrailAttributes::named("Creek"), vertical),
//! ]);
//!
//! let report = resolve(&mut store, &PipelineConfig::default())?;
//! assert_eq!(report.segments_created, 4);
//! assert_eq!(report.residual_conflict_count(), 0);
//! # Ok(())
//! # }
//! ```

mod conflict;
mod config;
mod controller;
mod detector;
mod geometry;
mod graph;
pub mod ingest;
mod observer;
mod snapper;
mod spatial_index;
mod splitter;
mod store;
mod trail;
pub mod utils;
pub mod validation;

// Public API exports
pub use config::{PhaseConfig, PipelineConfig};
pub use conflict::{
    Conflict, ConflictKey, ConflictKind, ConflictKindTag, ConflictPoint, EndpointRef,
    MultiPointKind,
};
pub use controller::{
    FailedConflict, IterationController, PhaseReport, PhaseTermination, ResolveReport, resolve,
};
pub use detector::IntersectionDetector;
pub use geometry::{
    ClosestOnLine, GeometryKernel, IntersectionPoint, PlanarKernel, Point3, TrailEnd,
    TrailGeometry,
};
pub use graph::{GraphEdge, GraphNode, GraphSummary, NodeKind, RoutingGraph};
pub use observer::{NoopObserver, RecordingObserver, ResolveObserver, TracingObserver};
pub use snapper::{EndpointSnapper, SnapScan, UnresolvedEndpoint, UnresolvedReason};
pub use spatial_index::SpatialIndex;
pub use splitter::{AppliedSplit, Connection, PlannedCut, ReplacedTrail, SplitPlan, TrailSplitter};
pub use store::{MemoryTrailStore, NetworkInfo, StoreError, TrailMutation, TrailStore};
pub use trail::{LineageId, NewTrail, SegmentId, Trail, TrailAttributes};
pub use validation::{RemovalReason, RemovedTrail};

/// How the iteration controller reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The split attempt is dropped and the conflict is marked as failed
    Rejected,
    /// A correctness invariant broke; the mutation is rolled back and surfaced
    Invariant,
    /// The whole run aborts
    Fatal,
}

/// Error types for the trail network
#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Degenerate split of trail {trail}: {reason}")]
    DegenerateSplit { trail: SegmentId, reason: String },

    #[error(
        "Length conservation violated for trail {trail}: parent {parent_length:.3} m, children {children_length:.3} m"
    )]
    LengthConservation {
        trail: SegmentId,
        parent_length: f64,
        children_length: f64,
    },

    #[error("Split of trail {trail} duplicates the geometry of trail {existing}")]
    DuplicateGeometry {
        trail: SegmentId,
        existing: SegmentId,
    },

    #[error("Trail {0} not found")]
    TrailNotFound(SegmentId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty trail")]
    EmptyTrail,
}

impl TrailError {
    /// Classify the error for the iteration controller
    pub fn class(&self) -> ErrorClass {
        match self {
            TrailError::InvalidGeometry(_)
            | TrailError::DegenerateSplit { .. }
            | TrailError::TrailNotFound(_)
            | TrailError::EmptyTrail => ErrorClass::Rejected,
            TrailError::LengthConservation { .. } | TrailError::DuplicateGeometry { .. } => {
                ErrorClass::Invariant
            }
            TrailError::GpxParse(_)
            | TrailError::InvalidConfig(_)
            | TrailError::Store(_)
            | TrailError::Io(_) => ErrorClass::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrailError>;
