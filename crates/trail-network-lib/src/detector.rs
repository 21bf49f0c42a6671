//! Intersection detection and conflict classification
//!
//! Candidate pairs come from the R-tree pre-filter; each pair is classified independently (in
//! parallel) into at most one [`Conflict`]. Points inside a trail's endpoint exclusion margin are
//! never cut on that trail, and a pair whose every point is at an endpoint of both trails is
//! already connected and produces nothing.

use crate::config::PipelineConfig;
use crate::conflict::{Conflict, ConflictKind, ConflictPoint, EndpointRef, MultiPointKind};
use crate::geometry::{GeometryKernel, TrailEnd};
use crate::spatial_index::SpatialIndex;
use crate::trail::{SegmentId, Trail};
use crate::utils;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether a fractional position lies beyond `margin` meters from both ends of a line
#[inline]
pub(crate) fn is_interior(fraction: f64, length: f64, margin: f64) -> bool {
    let along = fraction * length;
    along > margin && length - along > margin
}

/// Finds and classifies conflicts between live trails
pub struct IntersectionDetector<'a, K: GeometryKernel> {
    kernel: &'a K,
    config: &'a PipelineConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'a, K: GeometryKernel> IntersectionDetector<'a, K> {
    pub fn new(kernel: &'a K, config: &'a PipelineConfig) -> Self {
        Self { kernel, config }
    }

    /// Every actionable conflict in the trail set, ordered by key
    ///
    /// # Arguments
    /// * `trails` - Live trail set
    /// * `index` - Spatial index built from the same set
    pub fn detect(&self, trails: &[Arc<Trail>], index: &SpatialIndex) -> Vec<Conflict> {
        let by_id: HashMap<SegmentId, &Arc<Trail>> = trails.iter().map(|t| (t.id(), t)).collect();
        let pairs = index.candidate_pairs(self.config.intersection_tolerance);

        let mut conflicts: Vec<Conflict> = pairs
            .par_iter()
            .filter_map(|(a, b)| {
                let (a, b) = (by_id.get(a)?, by_id.get(b)?);
                self.classify_pair(a, b)
            })
            .collect();

        conflicts.sort_by_key(Conflict::key);
        conflicts
    }

    /// Classify the interference between two trails, if any
    pub fn classify_pair(&self, first: &Trail, second: &Trail) -> Option<Conflict> {
        let (a, b) = if first.id() <= second.id() {
            (first, second)
        } else {
            (second, first)
        };
        if a.id() == b.id() {
            return None;
        }

        let min_length = self.config.min_trail_length;
        if a.length() < min_length || b.length() < min_length {
            return None;
        }

        let hits = self.kernel.intersection(a.geometry(), b.geometry());
        if hits.is_empty() {
            return self.near_miss(a, b);
        }

        let margin_a = self.config.exclusion_margin(a.length());
        let margin_b = self.config.exclusion_margin(b.length());
        let points: SmallVec<[ConflictPoint; 2]> = hits
            .iter()
            .map(|hit| ConflictPoint {
                location: hit.location,
                fraction_a: hit.fraction_a,
                fraction_b: hit.fraction_b,
                interior_a: is_interior(hit.fraction_a, a.length(), margin_a),
                interior_b: is_interior(hit.fraction_b, b.length(), margin_b),
            })
            .filter(ConflictPoint::is_actionable)
            .collect();

        match points.len() {
            // Only already-shared endpoints; the far ends may still miss each other
            0 => self.near_miss(a, b),
            1 => {
                let point = points[0];
                let (kind, visitor) = if point.interior_a && point.interior_b {
                    (ConflictKind::Crossing, None)
                } else if point.interior_a {
                    let end = TrailEnd::nearest_to_fraction(point.fraction_b);
                    (self.t_or_y(b, end, a, point.fraction_a), Some(EndpointRef { trail: b.id(), end }))
                } else {
                    let end = TrailEnd::nearest_to_fraction(point.fraction_a);
                    (self.t_or_y(a, end, b, point.fraction_b), Some(EndpointRef { trail: a.id(), end }))
                };
                Some(Conflict {
                    a: a.id(),
                    b: b.id(),
                    kind,
                    visitor,
                    points,
                    distance: 0.0,
                })
            }
            _ => {
                let interior_both = points.iter().filter(|p| p.interior_a && p.interior_b).count();
                let sub_kind = if interior_both == points.len() {
                    MultiPointKind::Interior
                } else if interior_both == 0 {
                    MultiPointKind::EndpointOnly
                } else {
                    MultiPointKind::Dual
                };
                Some(Conflict {
                    a: a.id(),
                    b: b.id(),
                    kind: ConflictKind::MultiPoint(sub_kind),
                    visitor: None,
                    points,
                    distance: 0.0,
                })
            }
        }
    }

    /// Endpoint of one trail within tolerance of the other's interior, without touching it
    fn near_miss(&self, a: &Trail, b: &Trail) -> Option<Conflict> {
        let tolerance = self.config.intersection_tolerance;
        let mut best: Option<(f64, Conflict)> = None;

        for (visitor, visited) in [(a, b), (b, a)] {
            let margin = self.config.exclusion_margin(visited.length());
            for end in TrailEnd::BOTH {
                let endpoint = visitor.geometry().endpoint(end);
                let closest = self.kernel.closest_point(visited.geometry(), endpoint);
                if closest.distance <= self.config.vertex_epsilon
                    || closest.distance > tolerance
                    || !is_interior(closest.fraction, visited.length(), margin)
                {
                    continue;
                }
                if best.as_ref().is_some_and(|(d, _)| *d <= closest.distance) {
                    continue;
                }

                let visitor_fraction = match end {
                    TrailEnd::Start => 0.0,
                    TrailEnd::End => 1.0,
                };
                let visitor_is_a = visitor.id() == a.id();
                let point = ConflictPoint {
                    location: closest.point,
                    fraction_a: if visitor_is_a { visitor_fraction } else { closest.fraction },
                    fraction_b: if visitor_is_a { closest.fraction } else { visitor_fraction },
                    interior_a: !visitor_is_a,
                    interior_b: visitor_is_a,
                };
                let kind = self.t_or_y(visitor, end, visited, closest.fraction);
                best = Some((
                    closest.distance,
                    Conflict {
                        a: a.id(),
                        b: b.id(),
                        kind,
                        visitor: Some(EndpointRef {
                            trail: visitor.id(),
                            end,
                        }),
                        points: SmallVec::from_elem(point, 1),
                        distance: closest.distance,
                    },
                ));
            }
        }

        best.map(|(_, conflict)| conflict)
    }

    /// T-junction, or Y-junction when the visitor meets the visited trail at an acute angle
    fn t_or_y(&self, visitor: &Trail, end: TrailEnd, visited: &Trail, fraction: f64) -> ConflictKind {
        let angle = utils::acute_angle_degrees(
            visitor.geometry().end_direction(end),
            visited.geometry().direction_at_fraction(fraction),
        );
        if angle < self.config.y_junction_max_angle_degrees {
            ConflictKind::YJunction
        } else {
            ConflictKind::TJunction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PlanarKernel, Point3, TrailGeometry};
    use crate::trail::{LineageId, TrailAttributes};

    fn trail(id: u64, coords: &[(f64, f64)]) -> Arc<Trail> {
        let geometry = TrailGeometry::new(
            coords
                .iter()
                .map(|&(x, y)| Point3::new(x, y, 0.0))
                .collect(),
        )
        .unwrap();
        Arc::new(Trail::new(
            SegmentId(id),
            LineageId(id),
            None,
            TrailAttributes::default(),
            geometry,
        ))
    }

    fn classify(a: &Arc<Trail>, b: &Arc<Trail>) -> Option<Conflict> {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        IntersectionDetector::new(&kernel, &config).classify_pair(a, b)
    }

    #[test]
    fn test_crossing() {
        let a = trail(1, &[(0.0, 50.0), (100.0, 50.0)]);
        let b = trail(2, &[(50.0, 0.0), (50.0, 100.0)]);
        let conflict = classify(&a, &b).unwrap();
        assert_eq!(conflict.kind, ConflictKind::Crossing);
        assert_eq!(conflict.points.len(), 1);
        assert!(conflict.visitor.is_none());
    }

    #[test]
    fn test_t_junction_touching() {
        let visited = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        let visitor = trail(2, &[(40.0, 0.0), (40.0, 60.0)]);
        let conflict = classify(&visited, &visitor).unwrap();
        assert_eq!(conflict.kind, ConflictKind::TJunction);
        assert_eq!(
            conflict.visitor,
            Some(EndpointRef {
                trail: SegmentId(2),
                end: TrailEnd::Start
            })
        );
        assert!(conflict.points[0].interior_a);
        assert!(!conflict.points[0].interior_b);
    }

    #[test]
    fn test_t_junction_near_miss() {
        let visited = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        let visitor = trail(2, &[(50.0, 60.0), (50.0, 1.5)]);
        let conflict = classify(&visited, &visitor).unwrap();
        assert_eq!(conflict.kind, ConflictKind::TJunction);
        assert!((conflict.distance - 1.5).abs() < 1e-9);
        assert_eq!(conflict.visitor.unwrap().end, TrailEnd::End);
        assert!((conflict.points[0].fraction_a - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_near_miss_beyond_tolerance_ignored() {
        let visited = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        let visitor = trail(2, &[(50.0, 60.0), (50.0, 3.0)]);
        assert!(classify(&visited, &visitor).is_none());
    }

    #[test]
    fn test_y_junction_by_angle() {
        let visited = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        // Leaves the visited trail at about 11 degrees
        let visitor = trail(2, &[(40.0, 0.0), (90.0, 10.0)]);
        let conflict = classify(&visited, &visitor).unwrap();
        assert_eq!(conflict.kind, ConflictKind::YJunction);
    }

    #[test]
    fn test_already_connected_endpoints_ignored() {
        let a = trail(1, &[(0.0, 0.0), (50.0, 0.0)]);
        let b = trail(2, &[(50.0, 0.0), (50.0, 50.0)]);
        assert!(classify(&a, &b).is_none());
    }

    #[test]
    fn test_near_miss_found_past_shared_endpoint() {
        let main = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        // Shares its start with main and comes back down 1.5 m short of it
        let horseshoe = trail(2, &[(0.0, 0.0), (0.0, 30.0), (50.0, 30.0), (50.0, 1.5)]);
        let conflict = classify(&main, &horseshoe).unwrap();
        assert_eq!(conflict.kind, ConflictKind::TJunction);
        assert_eq!(
            conflict.visitor,
            Some(EndpointRef {
                trail: SegmentId(2),
                end: TrailEnd::End
            })
        );
        assert!((conflict.distance - 1.5).abs() < 1e-9);
        assert!((conflict.points[0].fraction_a - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_point_inside_exclusion_margin_ignored() {
        // Crosses 0.5 m from the end of both trails
        let a = trail(1, &[(0.0, 0.0), (50.5, 0.0)]);
        let b = trail(2, &[(50.0, -0.5), (50.0, 50.0)]);
        assert!(classify(&a, &b).is_none());
    }

    #[test]
    fn test_short_trail_skipped() {
        let a = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        let b = trail(2, &[(50.0, -0.4), (50.0, 0.4)]);
        assert!(classify(&a, &b).is_none());
    }

    #[test]
    fn test_multi_point_interior() {
        let a = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        let b = trail(2, &[(20.0, -10.0), (20.0, 10.0), (70.0, 10.0), (70.0, -10.0)]);
        let conflict = classify(&a, &b).unwrap();
        assert_eq!(conflict.kind, ConflictKind::MultiPoint(MultiPointKind::Interior));
        assert_eq!(conflict.points.len(), 2);
    }

    #[test]
    fn test_multi_point_dual() {
        let a = trail(1, &[(0.0, 0.0), (100.0, 0.0)]);
        // Starts on trail a, loops up and crosses it again
        let b = trail(2, &[(20.0, 0.0), (20.0, 10.0), (70.0, 10.0), (70.0, -10.0)]);
        let conflict = classify(&a, &b).unwrap();
        assert_eq!(conflict.kind, ConflictKind::MultiPoint(MultiPointKind::Dual));
        assert!(conflict.points[0].interior_a);
        assert!(!conflict.points[0].interior_b);
        assert!(conflict.points[1].interior_a && conflict.points[1].interior_b);
    }

    #[test]
    fn test_detect_uses_prefilter_and_orders_by_key() {
        let trails = vec![
            trail(1, &[(0.0, 50.0), (100.0, 50.0)]),
            trail(2, &[(50.0, 0.0), (50.0, 100.0)]),
            trail(3, &[(0.0, 20.0), (100.0, 20.0)]),
            trail(4, &[(500.0, 500.0), (600.0, 500.0)]),
        ];
        let index = SpatialIndex::build(&trails);
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let conflicts = IntersectionDetector::new(&kernel, &config).detect(&trails, &index);
        let keys: Vec<_> = conflicts.iter().map(|c| (c.a, c.b)).collect();
        assert_eq!(
            keys,
            vec![(SegmentId(1), SegmentId(2)), (SegmentId(2), SegmentId(3))]
        );
    }
}
