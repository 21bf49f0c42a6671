//! R-tree indexes over the live trail set
//!
//! Two trees are kept: one of whole-trail bounding boxes for the pair pre-filter, and one of
//! individual line segments for nearest-trail queries around endpoints. Both are bulk loaded
//! from the live set at every scan.

use crate::geometry::Point3;
use crate::trail::{SegmentId, Trail};
use rstar::primitives::{GeomWithData, Line};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Bounding box of one trail
#[derive(Debug, Clone)]
struct TrailEnvelope {
    trail: SegmentId,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for TrailEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// One straight piece of a trail, tagged with its row
type IndexedSegment = GeomWithData<Line<[f64; 2]>, SegmentId>;

/// Spatial index of the live trails
pub struct SpatialIndex {
    envelopes: RTree<TrailEnvelope>,
    segments: RTree<IndexedSegment>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpatialIndex {
    /// Bulk load both trees from a trail set
    pub fn build(trails: &[Arc<Trail>]) -> Self {
        let envelopes = trails
            .iter()
            .map(|trail| {
                let rect = trail.geometry().bounding_rect();
                TrailEnvelope {
                    trail: trail.id(),
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                }
            })
            .collect();

        let segments = trails
            .iter()
            .flat_map(|trail| {
                let id = trail.id();
                trail
                    .geometry()
                    .points()
                    .windows(2)
                    .map(move |w| {
                        GeomWithData::new(Line::new([w[0].x, w[0].y], [w[1].x, w[1].y]), id)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Self {
            envelopes: RTree::bulk_load(envelopes),
            segments: RTree::bulk_load(segments),
        }
    }

    /// Number of indexed trails
    #[inline]
    pub fn len(&self) -> usize {
        self.envelopes.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.envelopes.size() == 0
    }

    /// Every unordered pair of trails whose bounding boxes lie within `tolerance`
    ///
    /// Each pair is returned once as `(lower id, higher id)`, sorted.
    pub fn candidate_pairs(&self, tolerance: f64) -> Vec<(SegmentId, SegmentId)> {
        let mut pairs: Vec<(SegmentId, SegmentId)> = Vec::new();
        for item in self.envelopes.iter() {
            let lower = item.envelope.lower();
            let upper = item.envelope.upper();
            let expanded = AABB::from_corners(
                [lower[0] - tolerance, lower[1] - tolerance],
                [upper[0] + tolerance, upper[1] + tolerance],
            );
            for other in self.envelopes.locate_in_envelope_intersecting(&expanded) {
                if other.trail > item.trail {
                    pairs.push((item.trail, other.trail));
                }
            }
        }
        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    /// Trails with any part within `radius` of `point`, with their distance, nearest first
    pub fn nearest_trails(
        &self,
        point: Point3,
        radius: f64,
        exclude: Option<SegmentId>,
    ) -> Vec<(SegmentId, f64)> {
        let query = [point.x, point.y];
        let mut best: BTreeMap<SegmentId, f64> = BTreeMap::new();
        for segment in self.segments.locate_within_distance(query, radius * radius) {
            if Some(segment.data) == exclude {
                continue;
            }
            let distance = segment.distance_2(&query).sqrt();
            best.entry(segment.data)
                .and_modify(|d| *d = d.min(distance))
                .or_insert(distance);
        }

        let mut found: Vec<(SegmentId, f64)> = best.into_iter().collect();
        found.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
        found
    }

    /// Whether any trail other than `exclude` passes within `radius` of `point`
    pub fn has_neighbor_within(
        &self,
        point: Point3,
        radius: f64,
        exclude: Option<SegmentId>,
    ) -> bool {
        self.segments
            .locate_within_distance([point.x, point.y], radius * radius)
            .any(|segment| Some(segment.data) != exclude)
    }
}
