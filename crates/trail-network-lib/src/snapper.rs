//! Endpoint snapping
//!
//! Finds trail endpoints that touch nothing, skips the ones that are legitimately free
//! (trailheads, dead ends, short spurs) and turns every other one into a
//! [`ConflictKind::NearMissEndpoint`] against the nearest trail within the snap tolerance. The
//! splitter then cuts that trail at the closest point and connects the endpoint to it.

use crate::config::PipelineConfig;
use crate::conflict::{Conflict, ConflictKind, ConflictPoint, EndpointRef};
use crate::detector::is_interior;
use crate::geometry::{GeometryKernel, Point3, TrailEnd};
use crate::spatial_index::SpatialIndex;
use crate::trail::{LineageId, SegmentId, Trail};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Why a free endpoint could not be connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnresolvedReason {
    /// No other trail within the snap tolerance
    NoTrailWithinTolerance,
    /// The closest point on the nearest trail is inside its endpoint exclusion margin
    TooCloseToTargetEndpoint,
}

/// A free endpoint left as is
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnresolvedEndpoint {
    pub trail: SegmentId,
    pub end: TrailEnd,
    pub location: Point3,
    pub reason: UnresolvedReason,
}

/// Result of one snapper scan
#[derive(Debug, Clone, Default)]
pub struct SnapScan {
    /// Near-miss conflicts to resolve
    pub conflicts: Vec<Conflict>,
    /// Free endpoints that cannot be connected
    pub unresolved: Vec<UnresolvedEndpoint>,
    /// Number of free endpoints skipped as legitimately free
    pub legitimate: usize,
}

/// Connects free endpoints to nearby trails
pub struct EndpointSnapper<'a, K: GeometryKernel> {
    kernel: &'a K,
    config: &'a PipelineConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'a, K: GeometryKernel> EndpointSnapper<'a, K> {
    pub fn new(kernel: &'a K, config: &'a PipelineConfig) -> Self {
        Self { kernel, config }
    }

    /// Endpoints with no other trail within the vertex epsilon
    pub fn free_endpoints(&self, trails: &[Arc<Trail>], index: &SpatialIndex) -> Vec<EndpointRef> {
        let epsilon = self.config.vertex_epsilon;
        trails
            .iter()
            .filter(|trail| !trail.geometry().is_closed(epsilon))
            .flat_map(|trail| {
                TrailEnd::BOTH.into_iter().filter_map(move |end| {
                    let point = trail.geometry().endpoint(end);
                    (!index.has_neighbor_within(point, epsilon, Some(trail.id()))).then_some(
                        EndpointRef {
                            trail: trail.id(),
                            end,
                        },
                    )
                })
            })
            .collect()
    }

    /// Whether a trail may end without a connection
    ///
    /// `spur_length` is the live length of the trail's whole lineage, so pieces cut from a long
    /// trail are not mistaken for short spurs.
    pub fn is_legitimately_free(&self, trail: &Trail, spur_length: f64) -> bool {
        spur_length < self.config.short_spur_length
            || trail
                .attributes()
                .mentions_any(&self.config.legitimate_endpoint_keywords)
    }

    /// Classify every free endpoint of the trail set
    pub fn scan(&self, trails: &[Arc<Trail>], index: &SpatialIndex) -> SnapScan {
        let by_id: HashMap<SegmentId, &Arc<Trail>> = trails.iter().map(|t| (t.id(), t)).collect();
        let mut lineage_lengths: HashMap<LineageId, f64> = HashMap::new();
        for trail in trails {
            *lineage_lengths.entry(trail.lineage()).or_default() += trail.length();
        }
        let mut result = SnapScan::default();

        for endpoint in self.free_endpoints(trails, index) {
            let Some(trail) = by_id.get(&endpoint.trail) else {
                continue;
            };
            let spur_length = lineage_lengths
                .get(&trail.lineage())
                .copied()
                .unwrap_or_else(|| trail.length());
            if self.is_legitimately_free(trail, spur_length) {
                result.legitimate += 1;
                continue;
            }

            let location = trail.geometry().endpoint(endpoint.end);
            let nearest = index
                .nearest_trails(location, self.config.snap_tolerance, Some(trail.id()))
                .into_iter()
                .find_map(|(id, _)| by_id.get(&id));

            let Some(target) = nearest else {
                result.unresolved.push(UnresolvedEndpoint {
                    trail: trail.id(),
                    end: endpoint.end,
                    location,
                    reason: UnresolvedReason::NoTrailWithinTolerance,
                });
                continue;
            };

            let closest = self.kernel.closest_point(target.geometry(), location);
            let margin = self.config.exclusion_margin(target.length());
            if !is_interior(closest.fraction, target.length(), margin) {
                result.unresolved.push(UnresolvedEndpoint {
                    trail: trail.id(),
                    end: endpoint.end,
                    location,
                    reason: UnresolvedReason::TooCloseToTargetEndpoint,
                });
                continue;
            }

            result.conflicts.push(self.near_miss_conflict(
                trail,
                endpoint.end,
                target,
                closest.fraction,
                closest.point,
                closest.distance,
            ));
        }

        result.conflicts.sort_by_key(Conflict::key);
        result
    }

    fn near_miss_conflict(
        &self,
        visitor: &Trail,
        end: TrailEnd,
        target: &Trail,
        target_fraction: f64,
        location: Point3,
        distance: f64,
    ) -> Conflict {
        let visitor_fraction = match end {
            TrailEnd::Start => 0.0,
            TrailEnd::End => 1.0,
        };
        let visitor_is_a = visitor.id() < target.id();
        let (a, b) = if visitor_is_a {
            (visitor.id(), target.id())
        } else {
            (target.id(), visitor.id())
        };
        let point = ConflictPoint {
            location,
            fraction_a: if visitor_is_a { visitor_fraction } else { target_fraction },
            fraction_b: if visitor_is_a { target_fraction } else { visitor_fraction },
            interior_a: !visitor_is_a,
            interior_b: visitor_is_a,
        };
        Conflict {
            a,
            b,
            kind: ConflictKind::NearMissEndpoint,
            visitor: Some(EndpointRef {
                trail: visitor.id(),
                end,
            }),
            points: SmallVec::from_elem(point, 1),
            distance,
        }
    }
}
