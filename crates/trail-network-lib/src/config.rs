//! Pipeline configuration
//!
//! One immutable value passed into the iteration controller. It lists the tolerances every stage
//! works with and the phases to run, each naming which conflict kinds it resolves and in which
//! priority order.

use crate::conflict::ConflictKindTag;
use crate::{Result, TrailError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One resolution phase
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseConfig {
    /// Name used in logs and reports
    pub name: String,
    /// Conflict kinds resolved in this phase, highest priority first
    pub kinds: Vec<ConflictKindTag>,
    /// Safety cap on the number of scans that attempt mutations
    pub max_iterations: usize,
}

impl PhaseConfig {
    pub fn new(name: impl Into<String>, kinds: Vec<ConflictKindTag>, max_iterations: usize) -> Self {
        Self {
            name: name.into(),
            kinds,
            max_iterations,
        }
    }

    /// Position of a kind in this phase's priority order, `None` if the phase ignores it
    #[inline]
    pub fn rank(&self, kind: ConflictKindTag) -> Option<usize> {
        self.kinds.iter().position(|k| *k == kind)
    }

    /// Whether this phase runs the endpoint snapper
    #[inline]
    pub fn snaps_endpoints(&self) -> bool {
        self.kinds.contains(&ConflictKindTag::NearMissEndpoint)
    }
}

/// Configuration for a resolve run
///
/// All distances are meters on the local plane.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Trails closer than this interact; endpoints this close to another trail are T/Y near-misses
    /// Default: 2.0
    pub intersection_tolerance: f64,
    /// Search radius for connecting free endpoints
    /// Default: 5.0
    pub snap_tolerance: f64,
    /// Points closer than this are the same vertex
    /// Default: 0.01
    pub vertex_epsilon: f64,
    /// Minimum distance of a split point from its trail's endpoints
    /// Default: 1.0
    pub endpoint_exclusion_margin: f64,
    /// Margin as a fraction of trail length; the larger of the two applies
    /// Default: 0.001
    pub endpoint_exclusion_fraction: f64,
    /// Trails shorter than this are not considered by the detector and are removed as artifacts
    /// Default: 1.0
    pub min_trail_length: f64,
    /// No split may produce a segment shorter than this
    /// Default: 1.0
    pub min_segment_length: f64,
    /// T-junctions meeting at a smaller angle are classified as Y-junctions
    /// Default: 30.0
    pub y_junction_max_angle_degrees: f64,
    /// Precision grid for duplicate geometry detection and graph node merging
    /// Default: 0.01
    pub dedup_precision: f64,
    /// Relative tolerance of the length conservation check
    /// Default: 0.001
    pub length_conservation_epsilon: f64,
    /// Trails shorter than this may legitimately end without a connection
    /// Default: 20.0
    pub short_spur_length: f64,
    /// Name or type keywords marking legitimately free endpoints
    pub legitimate_endpoint_keywords: Vec<String>,
    /// Phases, run in order
    pub phases: Vec<PhaseConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intersection_tolerance: 2.0,
            snap_tolerance: 5.0,
            vertex_epsilon: 0.01,
            endpoint_exclusion_margin: 1.0,
            endpoint_exclusion_fraction: 0.001,
            min_trail_length: 1.0,
            min_segment_length: 1.0,
            y_junction_max_angle_degrees: 30.0,
            dedup_precision: 0.01,
            length_conservation_epsilon: 0.001,
            short_spur_length: 20.0,
            legitimate_endpoint_keywords: ["trailhead", "parking", "road", "dead end", "overlook", "viewpoint"]
                .into_iter()
                .map(String::from)
                .collect(),
            phases: vec![
                PhaseConfig::new(
                    "intersections",
                    vec![
                        ConflictKindTag::MultiPoint,
                        ConflictKindTag::Crossing,
                        ConflictKindTag::YJunction,
                        ConflictKindTag::TJunction,
                    ],
                    20,
                ),
                PhaseConfig::new(
                    "endpoints",
                    vec![
                        ConflictKindTag::NearMissEndpoint,
                        ConflictKindTag::MultiPoint,
                        ConflictKindTag::Crossing,
                        ConflictKindTag::YJunction,
                        ConflictKindTag::TJunction,
                    ],
                    5,
                ),
            ],
        }
    }
}

impl PipelineConfig {
    /// Effective endpoint exclusion margin for a trail of the given length
    #[inline]
    pub fn exclusion_margin(&self, trail_length: f64) -> f64 {
        self.endpoint_exclusion_margin
            .max(self.endpoint_exclusion_fraction * trail_length)
    }

    /// Every kind resolved by at least one phase
    pub fn all_kinds(&self) -> Vec<ConflictKindTag> {
        let mut kinds: Vec<ConflictKindTag> = Vec::new();
        for kind in self.phases.iter().flat_map(|p| p.kinds.iter()) {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }

    /// A single-phase copy resolving only the given kinds
    pub fn with_single_phase(mut self, kinds: Vec<ConflictKindTag>, max_iterations: usize) -> Self {
        self.phases = vec![PhaseConfig::new("custom", kinds, max_iterations)];
        self
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("intersection_tolerance", self.intersection_tolerance),
            ("snap_tolerance", self.snap_tolerance),
            ("vertex_epsilon", self.vertex_epsilon),
            ("min_trail_length", self.min_trail_length),
            ("min_segment_length", self.min_segment_length),
            ("dedup_precision", self.dedup_precision),
            ("length_conservation_epsilon", self.length_conservation_epsilon),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrailError::InvalidConfig(format!(
                    "{name} must be a positive finite number, got {value}"
                )));
            }
        }

        let non_negative = [
            ("endpoint_exclusion_margin", self.endpoint_exclusion_margin),
            ("short_spur_length", self.short_spur_length),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(TrailError::InvalidConfig(format!(
                    "{name} must be a non-negative finite number, got {value}"
                )));
            }
        }

        if !(0.0..0.5).contains(&self.endpoint_exclusion_fraction) {
            return Err(TrailError::InvalidConfig(format!(
                "endpoint_exclusion_fraction must be in [0, 0.5), got {}",
                self.endpoint_exclusion_fraction
            )));
        }

        if !(self.y_junction_max_angle_degrees >= 0.0 && self.y_junction_max_angle_degrees <= 90.0)
        {
            return Err(TrailError::InvalidConfig(format!(
                "y_junction_max_angle_degrees must be in [0, 90], got {}",
                self.y_junction_max_angle_degrees
            )));
        }

        if self.snap_tolerance < self.intersection_tolerance {
            return Err(TrailError::InvalidConfig(format!(
                "snap_tolerance ({}) must not be smaller than intersection_tolerance ({})",
                self.snap_tolerance, self.intersection_tolerance
            )));
        }

        if self.phases.is_empty() {
            return Err(TrailError::InvalidConfig("no phases configured".to_string()));
        }
        for phase in &self.phases {
            if phase.kinds.is_empty() {
                return Err(TrailError::InvalidConfig(format!(
                    "phase '{}' resolves no conflict kinds",
                    phase.name
                )));
            }
            if phase.max_iterations == 0 {
                return Err(TrailError::InvalidConfig(format!(
                    "phase '{}' has max_iterations = 0",
                    phase.name
                )));
            }
        }

        Ok(())
    }
}
