//! Trail splitting
//!
//! Every conflict kind goes through the same path: [`TrailSplitter::plan`] turns the conflict
//! into per-trail cut points and endpoint connections, and [`TrailSplitter::apply`] re-reads the
//! rows, connects, cuts, validates and commits one atomic mutation. Nothing reaches the store
//! unless every invariant check passes.

use crate::config::PipelineConfig;
use crate::conflict::{Conflict, ConflictKey, ConflictKind};
use crate::geometry::{GeometryKernel, Point3, TrailEnd, TrailGeometry};
use crate::store::{TrailMutation, TrailStore};
use crate::trail::{LineageId, NewTrail, SegmentId, Trail};
use crate::validation::{self, DuplicateIndex, GeometryKey};
use crate::{ErrorClass, Result, TrailError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Cut points requested on one trail
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCut {
    pub trail: SegmentId,
    /// (fractional position, location) pairs, in conflict order
    pub points: SmallVec<[(f64, Point3); 2]>,
}

/// Move a trail endpoint onto a cut point of another trail
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// Trail owning the endpoint
    pub trail: SegmentId,
    pub end: TrailEnd,
    /// Trail being cut at `target`
    pub onto: SegmentId,
    pub target: Point3,
    /// Fractional position along `trail` where it meets `target`
    pub fraction: f64,
}

/// Kind-independent description of how to resolve one conflict
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    pub key: ConflictKey,
    pub kind: ConflictKind,
    pub cuts: Vec<PlannedCut>,
    pub connections: Vec<Connection>,
}

impl SplitPlan {
    /// Every trail read or written by the plan, sorted
    pub fn trail_ids(&self) -> Vec<SegmentId> {
        let mut ids: Vec<SegmentId> = self
            .cuts
            .iter()
            .map(|c| c.trail)
            .chain(self.connections.iter().map(|c| c.trail))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// One parent row replaced by its children
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReplacedTrail {
    pub parent: SegmentId,
    pub lineage: LineageId,
    pub children: Vec<SegmentId>,
}

/// Outcome of a committed split
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AppliedSplit {
    pub key: ConflictKey,
    pub kind: ConflictKind,
    pub replaced: Vec<ReplacedTrail>,
    /// Trails whose endpoint was moved (replaced or updated in place)
    pub connected: Vec<SegmentId>,
    /// Per-trail attempts that were rejected while the rest applied
    pub rejected_cuts: usize,
}

impl AppliedSplit {
    /// Number of child rows inserted
    pub fn segments_created(&self) -> usize {
        self.replaced.iter().map(|r| r.children.len()).sum()
    }

    /// Rows that no longer exist or changed geometry
    pub fn touched(&self) -> Vec<SegmentId> {
        let mut ids: Vec<SegmentId> = self
            .replaced
            .iter()
            .map(|r| r.parent)
            .chain(self.connected.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Geometry of one trail while a plan is being applied
struct Working {
    geometry: TrailGeometry,
    /// Change of distance-along-line caused by moving the start point
    shift: f64,
    connected: bool,
}

/// Result of one pass over a plan (before validation)
struct Attempt {
    working: BTreeMap<SegmentId, Working>,
    /// Pieces and the cut locations kept, per cut trail
    pieces: BTreeMap<SegmentId, (Vec<TrailGeometry>, Vec<Point3>)>,
    rejections: Vec<TrailError>,
}

impl Attempt {
    fn has_vertex_at(&self, trail: SegmentId, location: &Point3, epsilon: f64) -> bool {
        self.pieces.get(&trail).is_some_and(|(_, kept)| {
            kept.iter()
                .any(|point| point.distance_2d(location) <= epsilon)
        })
    }
}

/// Cuts trails at conflict points and replaces them atomically
pub struct TrailSplitter<'a, K: GeometryKernel> {
    kernel: &'a K,
    config: &'a PipelineConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'a, K: GeometryKernel> TrailSplitter<'a, K> {
    pub fn new(kernel: &'a K, config: &'a PipelineConfig) -> Self {
        Self { kernel, config }
    }

    /// Turn a conflict into cut points and connections
    ///
    /// Each trail is cut at every point interior on it. A point interior on only one trail lies
    /// at (or near) an endpoint of the other, which is connected onto the cut point.
    pub fn plan(&self, conflict: &Conflict) -> SplitPlan {
        let mut cuts: Vec<PlannedCut> = Vec::with_capacity(2);
        for trail in [conflict.a, conflict.b] {
            let points: SmallVec<[(f64, Point3); 2]> = conflict
                .points
                .iter()
                .enumerate()
                .filter(|(i, _)| conflict.is_interior_on(*i, trail))
                .map(|(_, p)| {
                    let fraction = if trail == conflict.a { p.fraction_a } else { p.fraction_b };
                    (fraction, p.location)
                })
                .collect();
            if !points.is_empty() {
                cuts.push(PlannedCut { trail, points });
            }
        }

        let mut connections: Vec<Connection> = Vec::new();
        for (i, point) in conflict.points.iter().enumerate() {
            let (owner, onto, fraction) = match (point.interior_a, point.interior_b) {
                (true, false) => (conflict.b, conflict.a, point.fraction_b),
                (false, true) => (conflict.a, conflict.b, point.fraction_a),
                _ => continue,
            };
            let end = match conflict.visitor {
                Some(visitor) if visitor.trail == owner && conflict.points.len() == 1 => visitor.end,
                _ => TrailEnd::nearest_to_fraction(fraction),
            };
            if connections.iter().any(|c| c.trail == owner && c.end == end) {
                tracing::debug!("Point {} of {} reuses endpoint {:?} of {}", i, conflict, end, owner);
                continue;
            }
            connections.push(Connection {
                trail: owner,
                end,
                onto,
                target: point.location,
                fraction,
            });
        }

        SplitPlan {
            key: conflict.key(),
            kind: conflict.kind,
            cuts,
            connections,
        }
    }

    /// Cut a geometry at distances along it
    ///
    /// Cuts are sorted; a cut that would leave a piece shorter than the minimum segment length is
    /// dropped on its own while the remaining cuts still apply. Each cut vertex is placed exactly
    /// at its location so that partner trails cut at the same point share the vertex.
    ///
    /// # Returns
    /// The pieces in order and the locations of the cuts that were kept
    pub fn cut(
        &self,
        trail: SegmentId,
        geometry: &TrailGeometry,
        cuts: &[(f64, Point3)],
    ) -> Result<(Vec<TrailGeometry>, Vec<Point3>)> {
        let length = geometry.length_2d();
        let min_segment = self.config.min_segment_length;
        let epsilon = self.config.vertex_epsilon;

        let mut sorted: Vec<(f64, Point3)> = cuts.to_vec();
        sorted.sort_by(|x, y| x.0.total_cmp(&y.0));

        let mut kept: Vec<(f64, Point3)> = Vec::with_capacity(sorted.len());
        let mut previous = 0.0;
        for (measure, location) in sorted {
            if kept.last().is_some_and(|(m, _)| measure - m <= epsilon) {
                continue;
            }
            if measure - previous < min_segment || length - measure < min_segment {
                tracing::debug!(
                    "Dropping cut of {} at {:.3} m of {:.3} m: piece below {:.3} m",
                    trail,
                    measure,
                    length,
                    min_segment
                );
                continue;
            }
            kept.push((measure, location));
            previous = measure;
        }

        if kept.is_empty() {
            return Err(TrailError::DegenerateSplit {
                trail,
                reason: format!("no cut leaves pieces of at least {min_segment:.3} m"),
            });
        }

        let mut pieces: Vec<TrailGeometry> = Vec::with_capacity(kept.len() + 1);
        let mut rest = geometry.clone();
        let mut consumed = 0.0;
        for (measure, location) in &kept {
            let fraction = (measure - consumed) / rest.length_2d();
            let (head, tail) = self
                .kernel
                .split_at_fraction(&rest, fraction)
                .ok_or_else(|| TrailError::DegenerateSplit {
                    trail,
                    reason: format!("kernel could not cut at {measure:.3} m"),
                })?;
            let head = head.with_endpoint(TrailEnd::End, head.end().with_xy(location.xy()))?;
            let tail = tail.with_endpoint(TrailEnd::Start, tail.start().with_xy(location.xy()))?;
            pieces.push(head);
            rest = tail;
            consumed = *measure;
        }
        pieces.push(rest);

        for piece in &pieces {
            validation::check_geometry(trail, piece, self.kernel, min_segment)?;
        }

        Ok((pieces, kept.into_iter().map(|(_, location)| location).collect()))
    }

    /// Move one endpoint of `geometry` onto `target`
    ///
    /// An endpoint overshooting the target is trimmed back to it, one falling short is extended
    /// with a new vertex, and one already touching is moved exactly onto it.
    ///
    /// # Returns
    /// The new geometry and the change in distance-along-line of every interior point
    pub fn connect(
        &self,
        trail: SegmentId,
        geometry: &TrailGeometry,
        end: TrailEnd,
        target: Point3,
        fraction: f64,
    ) -> Result<(TrailGeometry, f64)> {
        let length = geometry.length_2d();
        let epsilon = self.config.vertex_epsilon;
        let beyond_target = match end {
            TrailEnd::Start => fraction * length,
            TrailEnd::End => (1.0 - fraction) * length,
        };

        let connected = if beyond_target > epsilon {
            let (head, tail) = self
                .kernel
                .split_at_fraction(geometry, fraction)
                .ok_or_else(|| TrailError::DegenerateSplit {
                    trail,
                    reason: "cannot trim overshooting endpoint".to_string(),
                })?;
            let kept = match end {
                TrailEnd::Start => tail,
                TrailEnd::End => head,
            };
            let endpoint = kept.endpoint(end);
            kept.with_endpoint(end, endpoint.with_xy(target.xy()))?
        } else {
            let endpoint = geometry.endpoint(end);
            if endpoint.distance_2d(&target) <= epsilon {
                geometry.with_endpoint(end, endpoint.with_xy(target.xy()))?
            } else {
                geometry.extended(end, endpoint.with_xy(target.xy()))?
            }
        };

        validation::check_geometry(trail, &connected, self.kernel, self.config.min_segment_length)?;

        let shift = match end {
            TrailEnd::Start => connected.length_2d() - length,
            TrailEnd::End => 0.0,
        };
        Ok((connected, shift))
    }

    /// Apply a plan to the store in one atomic mutation
    ///
    /// Rejected per-trail attempts are skipped as long as something else applies. Invariant
    /// violations and store errors abort before anything is committed.
    pub fn apply<S: TrailStore>(
        &self,
        plan: &SplitPlan,
        store: &mut S,
        duplicates: &mut DuplicateIndex,
    ) -> Result<AppliedSplit> {
        #[cfg(feature = "profiling")]
        profiling::scope!("splitter::apply");

        let mut rows: BTreeMap<SegmentId, Arc<Trail>> = BTreeMap::new();
        for id in plan.trail_ids() {
            let row = store.get(id)?.ok_or(TrailError::TrailNotFound(id))?;
            rows.insert(id, row);
        }

        // A connection only stands if its target trail really gets a vertex there
        let epsilon = self.config.vertex_epsilon;
        let mut active: Vec<&Connection> = plan.connections.iter().collect();
        let attempt = loop {
            let attempt = self.attempt(plan, &rows, &active)?;
            let before = active.len();
            active.retain(|c| attempt.has_vertex_at(c.onto, &c.target, epsilon));
            if active.len() == before {
                break attempt;
            }
        };
        let Attempt {
            working,
            pieces,
            mut rejections,
        } = attempt;

        let updated: Vec<(SegmentId, &TrailGeometry)> = working
            .iter()
            .filter(|(id, w)| w.connected && !pieces.contains_key(id))
            .map(|(id, w)| (*id, &w.geometry))
            .collect();

        if pieces.is_empty() && updated.is_empty() {
            return Err(if rejections.is_empty() {
                TrailError::DegenerateSplit {
                    trail: plan.key.first(),
                    reason: format!("{} produced no valid cut", plan.kind),
                }
            } else {
                rejections.remove(0)
            });
        }

        for (id, (children, _)) in &pieces {
            let parent_length = working
                .get(id)
                .map(|w| w.geometry.length_2d())
                .unwrap_or_default();
            validation::check_length_conservation(
                *id,
                parent_length,
                children,
                self.config.length_conservation_epsilon,
            )?;
        }

        let involved: Vec<SegmentId> = rows.keys().copied().collect();
        let mut fresh: HashMap<GeometryKey, SegmentId> = HashMap::new();
        let candidates = pieces
            .iter()
            .flat_map(|(id, (children, _))| children.iter().map(move |g| (*id, g)))
            .chain(updated.iter().map(|(id, g)| (*id, *g)));
        for (id, geometry) in candidates {
            if let Some(existing) = duplicates.find(geometry, &involved) {
                return Err(TrailError::DuplicateGeometry { trail: id, existing });
            }
            if let Some(existing) = fresh.insert(duplicates.key(geometry), id) {
                return Err(TrailError::DuplicateGeometry { trail: id, existing });
            }
        }

        let mut mutation = TrailMutation::new();
        for id in pieces.keys() {
            mutation = mutation.delete(*id);
        }
        for (id, geometry) in &updated {
            mutation = mutation.update(*id, (*geometry).clone());
        }
        for (id, (children, _)) in &pieces {
            if let Some(parent) = rows.get(id) {
                for child in children {
                    mutation = mutation.insert(NewTrail::child_of(parent, child.clone()));
                }
            }
        }

        let inserted = store.commit(mutation)?;

        let mut next = inserted.into_iter();
        let mut replaced = Vec::with_capacity(pieces.len());
        for (id, (children, _)) in &pieces {
            duplicates.remove(*id);
            let ids: Vec<SegmentId> = next.by_ref().take(children.len()).collect();
            for (child_id, child) in ids.iter().zip(children) {
                duplicates.insert(*child_id, child);
            }
            replaced.push(ReplacedTrail {
                parent: *id,
                lineage: rows.get(id).map(|r| r.lineage()).unwrap_or(LineageId(id.0)),
                children: ids,
            });
        }
        for (id, geometry) in &updated {
            duplicates.remove(*id);
            duplicates.insert(*id, geometry);
        }

        let connected = working
            .iter()
            .filter(|(_, w)| w.connected)
            .map(|(id, _)| *id)
            .collect();

        for rejection in &rejections {
            tracing::debug!("Partial split of {}: {}", plan.key, rejection);
        }

        Ok(AppliedSplit {
            key: plan.key,
            kind: plan.kind,
            replaced,
            connected,
            rejected_cuts: rejections.len(),
        })
    }

    /// Connect and cut with the given connections, without touching the store
    fn attempt(
        &self,
        plan: &SplitPlan,
        rows: &BTreeMap<SegmentId, Arc<Trail>>,
        connections: &[&Connection],
    ) -> Result<Attempt> {
        let epsilon = self.config.vertex_epsilon;
        let mut rejections: Vec<TrailError> = Vec::new();
        let mut working: BTreeMap<SegmentId, Working> = rows
            .iter()
            .map(|(id, row)| {
                (
                    *id,
                    Working {
                        geometry: row.geometry().clone(),
                        shift: 0.0,
                        connected: false,
                    },
                )
            })
            .collect();

        // Endpoints already touching their target keep their position; the cut moves instead
        let mut pinned: Vec<(Point3, Point3)> = Vec::new();

        for connection in connections {
            let (Some(work), Some(row)) = (working.get_mut(&connection.trail), rows.get(&connection.trail))
            else {
                continue;
            };
            let fraction = ((connection.fraction * row.length() + work.shift)
                / work.geometry.length_2d())
            .clamp(0.0, 1.0);
            let endpoint = work.geometry.endpoint(connection.end);
            let at_end = match connection.end {
                TrailEnd::Start => fraction,
                TrailEnd::End => 1.0 - fraction,
            } * work.geometry.length_2d();
            if at_end <= epsilon && endpoint.distance_2d(&connection.target) <= epsilon {
                pinned.push((connection.target, endpoint));
                continue;
            }

            match self.connect(
                connection.trail,
                &work.geometry,
                connection.end,
                connection.target,
                fraction,
            ) {
                Ok((geometry, shift)) => {
                    work.geometry = geometry;
                    work.shift += shift;
                    work.connected = true;
                }
                Err(err) if err.class() == ErrorClass::Rejected => rejections.push(err),
                Err(err) => return Err(err),
            }
        }

        let mut pieces = BTreeMap::new();
        for cut in &plan.cuts {
            let (Some(work), Some(row)) = (working.get(&cut.trail), rows.get(&cut.trail)) else {
                continue;
            };
            let points: Vec<(f64, Point3)> = cut
                .points
                .iter()
                .map(|(fraction, location)| {
                    let location = pinned
                        .iter()
                        .find(|(target, _)| target == location)
                        .map(|(_, endpoint)| location.with_xy(endpoint.xy()))
                        .unwrap_or(*location);
                    (fraction * row.length() + work.shift, location)
                })
                .collect();

            match self.cut(cut.trail, &work.geometry, &points) {
                Ok(result) => {
                    pieces.insert(cut.trail, result);
                }
                Err(err) if err.class() == ErrorClass::Rejected => rejections.push(err),
                Err(err) => return Err(err),
            }
        }

        Ok(Attempt {
            working,
            pieces,
            rejections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictPoint, EndpointRef};
    use crate::geometry::PlanarKernel;
    use crate::store::MemoryTrailStore;
    use crate::trail::TrailAttributes;
    use smallvec::smallvec;

    fn line(coords: &[(f64, f64)]) -> TrailGeometry {
        TrailGeometry::new(
            coords
                .iter()
                .map(|&(x, y)| Point3::new(x, y, 0.0))
                .collect(),
        )
        .unwrap()
    }

    fn store(lines: &[&[(f64, f64)]]) -> MemoryTrailStore {
        MemoryTrailStore::from_trails(
            lines
                .iter()
                .enumerate()
                .map(|(i, coords)| NewTrail::new(TrailAttributes::named(format!("T{i}")), line(coords))),
        )
    }

    fn crossing_conflict() -> Conflict {
        Conflict {
            a: SegmentId(1),
            b: SegmentId(2),
            kind: ConflictKind::Crossing,
            visitor: None,
            points: smallvec![ConflictPoint {
                location: Point3::new(50.0, 50.0, 0.0),
                fraction_a: 0.5,
                fraction_b: 0.5,
                interior_a: true,
                interior_b: true,
            }],
            distance: 0.0,
        }
    }

    #[test]
    fn test_plan_crossing_cuts_both() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let plan = TrailSplitter::new(&kernel, &config).plan(&crossing_conflict());
        assert_eq!(plan.cuts.len(), 2);
        assert!(plan.connections.is_empty());
        assert_eq!(plan.trail_ids(), vec![SegmentId(1), SegmentId(2)]);
    }

    #[test]
    fn test_cut_drops_only_short_pieces() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let splitter = TrailSplitter::new(&kernel, &config);
        let geometry = line(&[(0.0, 0.0), (100.0, 0.0)]);
        let cuts = [
            (30.0, Point3::new(30.0, 0.0, 0.0)),
            (30.5, Point3::new(30.5, 0.0, 0.0)),
            (70.0, Point3::new(70.0, 0.0, 0.0)),
        ];
        let (pieces, kept) = splitter.cut(SegmentId(1), &geometry, &cuts).unwrap();
        assert_eq!(pieces.len(), 3);
        assert_eq!(kept.len(), 2);
        assert!((pieces[0].length_2d() - 30.0).abs() < 1e-9);
        assert!((pieces[1].length_2d() - 40.0).abs() < 1e-9);
        assert!((pieces[2].length_2d() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_cut_fails_when_every_cut_is_too_close() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let splitter = TrailSplitter::new(&kernel, &config);
        let geometry = line(&[(0.0, 0.0), (1.5, 0.0)]);
        let err = splitter
            .cut(SegmentId(4), &geometry, &[(0.8, Point3::new(0.8, 0.0, 0.0))])
            .unwrap_err();
        assert!(matches!(err, TrailError::DegenerateSplit { trail: SegmentId(4), .. }));
    }

    #[test]
    fn test_connect_extend_trim_and_snap() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let splitter = TrailSplitter::new(&kernel, &config);
        let geometry = line(&[(0.0, 10.0), (0.0, 2.0)]);

        let (extended, shift) = splitter
            .connect(SegmentId(1), &geometry, TrailEnd::End, Point3::new(0.0, 0.0, 0.0), 1.0)
            .unwrap();
        assert_eq!(extended.end(), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(extended.num_points(), 3);
        assert_eq!(shift, 0.0);

        let overshoot = line(&[(0.0, 10.0), (0.0, -0.5)]);
        let fraction = 10.0 / 10.5;
        let (trimmed, _) = splitter
            .connect(SegmentId(1), &overshoot, TrailEnd::End, Point3::new(0.0, 0.0, 0.0), fraction)
            .unwrap();
        assert!((trimmed.length_2d() - 10.0).abs() < 1e-9);
        assert_eq!(trimmed.end(), Point3::new(0.0, 0.0, 0.0));

        let start_short = line(&[(0.0, 3.0), (0.0, 10.0)]);
        let (moved, shift) = splitter
            .connect(SegmentId(1), &start_short, TrailEnd::Start, Point3::new(0.0, 0.0, 0.0), 0.0)
            .unwrap();
        assert!((shift - 3.0).abs() < 1e-9);
        assert_eq!(moved.start(), Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_apply_crossing_replaces_both_parents() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let splitter = TrailSplitter::new(&kernel, &config);
        let mut store = store(&[&[(0.0, 50.0), (100.0, 50.0)], &[(50.0, 0.0), (50.0, 100.0)]]);
        let mut duplicates = DuplicateIndex::build(&store.live_trails().unwrap(), config.dedup_precision);

        let plan = splitter.plan(&crossing_conflict());
        let applied = splitter.apply(&plan, &mut store, &mut duplicates).unwrap();

        assert_eq!(applied.segments_created(), 4);
        assert_eq!(applied.touched(), vec![SegmentId(1), SegmentId(2)]);
        assert_eq!(store.len(), 4);
        for trail in store.live_trails().unwrap() {
            assert!((trail.length() - 50.0).abs() < 1e-9);
            assert!(trail.parent().is_some());
        }
        assert_eq!(store.trails_in_lineage(LineageId(1)).len(), 2);
    }

    #[test]
    fn test_apply_t_junction_near_miss_connects_visitor() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let splitter = TrailSplitter::new(&kernel, &config);
        let mut store = store(&[&[(0.0, 0.0), (100.0, 0.0)], &[(50.0, 60.0), (50.0, 2.0)]]);
        let mut duplicates = DuplicateIndex::build(&store.live_trails().unwrap(), config.dedup_precision);

        let conflict = Conflict {
            a: SegmentId(1),
            b: SegmentId(2),
            kind: ConflictKind::TJunction,
            visitor: Some(EndpointRef {
                trail: SegmentId(2),
                end: TrailEnd::End,
            }),
            points: smallvec![ConflictPoint {
                location: Point3::new(50.0, 0.0, 0.0),
                fraction_a: 0.5,
                fraction_b: 1.0,
                interior_a: true,
                interior_b: false,
            }],
            distance: 2.0,
        };
        let plan = splitter.plan(&conflict);
        assert_eq!(plan.cuts.len(), 1);
        assert_eq!(plan.connections.len(), 1);

        let applied = splitter.apply(&plan, &mut store, &mut duplicates).unwrap();
        assert_eq!(applied.segments_created(), 2);
        assert_eq!(applied.connected, vec![SegmentId(2)]);

        let visitor = store.get(SegmentId(2)).unwrap().unwrap();
        assert_eq!(visitor.geometry().end(), Point3::new(50.0, 0.0, 0.0));
        let children = store.trails_in_lineage(LineageId(1));
        assert!(children.iter().any(|c| c.geometry().end() == visitor.geometry().end()));
    }

    #[test]
    fn test_apply_partial_split_keeps_rejected_trail() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let splitter = TrailSplitter::new(&kernel, &config);
        let mut store = store(&[&[(0.0, 0.0), (1.5, 0.0)], &[(0.8, -5.0), (0.8, 5.0)]]);
        let mut duplicates = DuplicateIndex::build(&store.live_trails().unwrap(), config.dedup_precision);

        let conflict = Conflict {
            a: SegmentId(1),
            b: SegmentId(2),
            kind: ConflictKind::Crossing,
            visitor: None,
            points: smallvec![ConflictPoint {
                location: Point3::new(0.8, 0.0, 0.0),
                fraction_a: 0.8 / 1.5,
                fraction_b: 0.5,
                interior_a: true,
                interior_b: true,
            }],
            distance: 0.0,
        };
        // Trail 2 can still be cut, trail 1 cannot
        let applied = splitter
            .apply(&splitter.plan(&conflict), &mut store, &mut duplicates)
            .unwrap();
        assert_eq!(applied.replaced.len(), 1);
        assert_eq!(applied.replaced[0].parent, SegmentId(2));
        assert_eq!(applied.rejected_cuts, 1);
        assert!(store.get(SegmentId(1)).unwrap().is_some());
    }

    #[test]
    fn test_apply_duplicate_is_an_invariant_error() {
        let kernel = PlanarKernel::default();
        let config = PipelineConfig::default();
        let splitter = TrailSplitter::new(&kernel, &config);
        let mut store = store(&[
            &[(0.0, 50.0), (100.0, 50.0)],
            &[(50.0, 0.0), (50.0, 100.0)],
            &[(0.0, 50.0), (50.0, 50.0)],
        ]);
        let mut duplicates = DuplicateIndex::build(&store.live_trails().unwrap(), config.dedup_precision);

        let err = splitter
            .apply(&splitter.plan(&crossing_conflict()), &mut store, &mut duplicates)
            .unwrap_err();
        assert!(matches!(err, TrailError::DuplicateGeometry { existing: SegmentId(3), .. }));
        assert_eq!(err.class(), ErrorClass::Invariant);
        assert_eq!(store.len(), 3);
        assert_eq!(store.commit_count(), 0);
    }
}
