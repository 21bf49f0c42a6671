//! Post-split invariant checks and duplicate elimination
//!
//! These checks gate what enters the trail set. Length conservation and duplicate detection are
//! correctness invariants of the splitter; geometry checks reject individual bad pieces.

use crate::geometry::{GeometryKernel, TrailGeometry};
use crate::store::{TrailMutation, TrailStore};
use crate::trail::{SegmentId, Trail};
use crate::{Result, TrailError, utils};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Check that the children of a split add up to the length of the geometry that was cut
///
/// # Arguments
/// * `trail` - Row being split (for the error report)
/// * `parent_length` - Horizontal length of the geometry that was cut
/// * `children` - Resulting pieces
/// * `epsilon` - Allowed relative error
pub fn check_length_conservation(
    trail: SegmentId,
    parent_length: f64,
    children: &[TrailGeometry],
    epsilon: f64,
) -> Result<()> {
    let children_length: f64 = children.iter().map(TrailGeometry::length_2d).sum();
    let allowed = epsilon * parent_length.max(f64::EPSILON);
    if (children_length - parent_length).abs() > allowed {
        return Err(TrailError::LengthConservation {
            trail,
            parent_length,
            children_length,
        });
    }
    Ok(())
}

/// Check that one piece is a simple line of usable length
pub fn check_geometry<K: GeometryKernel>(
    trail: SegmentId,
    geometry: &TrailGeometry,
    kernel: &K,
    min_length: f64,
) -> Result<()> {
    if !kernel.is_valid(geometry) {
        return Err(TrailError::InvalidGeometry(format!(
            "piece of {trail} is not a simple line"
        )));
    }
    let length = kernel.length(geometry);
    if length < min_length {
        return Err(TrailError::DegenerateSplit {
            trail,
            reason: format!("piece of {length:.3} m is shorter than {min_length:.3} m"),
        });
    }
    Ok(())
}

/// Geometry rounded to a precision grid, independent of direction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryKey(Vec<(i64, i64)>);

impl GeometryKey {
    pub fn new(geometry: &TrailGeometry, precision: f64) -> Self {
        let mut forward: Vec<(i64, i64)> = Vec::with_capacity(geometry.num_points());
        for point in geometry.points() {
            let cell = (
                utils::grid_cell(point.x, precision),
                utils::grid_cell(point.y, precision),
            );
            if forward.last() != Some(&cell) {
                forward.push(cell);
            }
        }
        let mut backward = forward.clone();
        backward.reverse();
        Self(forward.min(backward))
    }
}

/// Lookup of live geometries by [`GeometryKey`]
#[derive(Debug, Clone, Default)]
pub struct DuplicateIndex {
    precision: f64,
    by_key: HashMap<GeometryKey, SegmentId>,
    by_trail: HashMap<SegmentId, GeometryKey>,
}

impl DuplicateIndex {
    pub fn build(trails: &[Arc<Trail>], precision: f64) -> Self {
        let mut index = Self {
            precision,
            by_key: HashMap::with_capacity(trails.len()),
            by_trail: HashMap::with_capacity(trails.len()),
        };
        for trail in trails {
            index.insert(trail.id(), trail.geometry());
        }
        index
    }

    #[inline]
    pub fn key(&self, geometry: &TrailGeometry) -> GeometryKey {
        GeometryKey::new(geometry, self.precision)
    }

    /// Live trail with the same rounded geometry, ignoring the trails in `ignore`
    pub fn find(&self, geometry: &TrailGeometry, ignore: &[SegmentId]) -> Option<SegmentId> {
        self.by_key
            .get(&self.key(geometry))
            .copied()
            .filter(|id| !ignore.contains(id))
    }

    pub fn insert(&mut self, id: SegmentId, geometry: &TrailGeometry) {
        let key = self.key(geometry);
        self.by_key.entry(key.clone()).or_insert(id);
        self.by_trail.insert(id, key);
    }

    pub fn remove(&mut self, id: SegmentId) {
        if let Some(key) = self.by_trail.remove(&id)
            && self.by_key.get(&key) == Some(&id)
        {
            self.by_key.remove(&key);
        }
    }
}

/// Trails duplicating an earlier one (by lowest lineage, then lowest segment id)
pub fn find_duplicates(trails: &[Arc<Trail>], precision: f64) -> Vec<SegmentId> {
    let mut ordered: Vec<&Arc<Trail>> = trails.iter().collect();
    ordered.sort_by_key(|t| (t.lineage(), t.id()));

    let mut seen: HashMap<GeometryKey, SegmentId> = HashMap::with_capacity(trails.len());
    let mut duplicates = Vec::new();
    for trail in ordered {
        let key = GeometryKey::new(trail.geometry(), precision);
        if let Some(kept) = seen.get(&key) {
            tracing::debug!("Trail {} duplicates {}", trail.id(), kept);
            duplicates.push(trail.id());
        } else {
            seen.insert(key, trail.id());
        }
    }
    duplicates.sort_unstable();
    duplicates
}

/// Delete duplicate geometries in one mutation, returning how many were removed
pub fn dedup<S: TrailStore>(store: &mut S, precision: f64) -> Result<usize> {
    #[cfg(feature = "profiling")]
    profiling::scope!("validation::dedup");

    let trails = store.live_trails()?;
    let duplicates = find_duplicates(&trails, precision);
    if duplicates.is_empty() {
        return Ok(0);
    }
    let count = duplicates.len();
    store.commit(TrailMutation {
        deletes: duplicates,
        ..Default::default()
    })?;
    Ok(count)
}

/// Why a trail was dropped before resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RemovalReason {
    TooShort,
    /// Self-intersecting, e.g. a lollipop whose end touches its own middle
    NotSimple,
}

/// A trail deleted by [`remove_degenerate`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemovedTrail {
    pub trail: SegmentId,
    pub name: Option<String>,
    pub length: f64,
    pub reason: RemovalReason,
}

/// Delete trails shorter than `min_length` or with invalid geometry
///
/// # Returns
/// Every removed row with the reason it was dropped
pub fn remove_degenerate<S: TrailStore, K: GeometryKernel>(
    store: &mut S,
    kernel: &K,
    min_length: f64,
) -> Result<Vec<RemovedTrail>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("validation::remove_degenerate");

    let trails = store.live_trails()?;
    let removed: Vec<RemovedTrail> = trails
        .iter()
        .filter_map(|trail| {
            let reason = if trail.length() < min_length {
                RemovalReason::TooShort
            } else if !kernel.is_valid(trail.geometry()) {
                RemovalReason::NotSimple
            } else {
                return None;
            };
            tracing::warn!(
                "Removing degenerate trail {} ({:?}, {:.3} m): {:?}",
                trail.id(),
                trail.name(),
                trail.length(),
                reason
            );
            Some(RemovedTrail {
                trail: trail.id(),
                name: trail.name().map(str::to_string),
                length: trail.length(),
                reason,
            })
        })
        .collect();

    if removed.is_empty() {
        return Ok(removed);
    }
    store.commit(TrailMutation {
        deletes: removed.iter().map(|r| r.trail).collect(),
        ..Default::default()
    })?;
    Ok(removed)
}
