//! Storage engine contract and the in-memory implementation
//!
//! The core never edits rows in place. Every change is expressed as a typed [`TrailMutation`]
//! that the store applies atomically: it checks every referenced row before touching anything,
//! so a failing commit leaves the trail set exactly as it was.

use crate::geometry::TrailGeometry;
use crate::trail::{LineageId, NewTrail, SegmentId, Trail};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Storage engine failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("storage engine unavailable: {0}")]
    Unavailable(String),

    #[error("row {0} does not exist")]
    MissingRow(SegmentId),

    #[error("empty mutation")]
    EmptyMutation,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A change-set applied in one transaction
#[derive(Debug, Clone, Default)]
pub struct TrailMutation {
    /// Rows to delete
    pub deletes: Vec<SegmentId>,
    /// Rows to insert, in order
    pub inserts: Vec<NewTrail>,
    /// Rows whose geometry is replaced (identity kept)
    pub updates: Vec<(SegmentId, TrailGeometry)>,
}

impl TrailMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(mut self, id: SegmentId) -> Self {
        self.deletes.push(id);
        self
    }

    pub fn insert(mut self, trail: NewTrail) -> Self {
        self.inserts.push(trail);
        self
    }

    pub fn update(mut self, id: SegmentId, geometry: TrailGeometry) -> Self {
        self.updates.push((id, geometry));
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Summary statistics of a trail set
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkInfo {
    /// Number of live rows
    pub trail_count: usize,
    /// Total horizontal length in meters
    pub total_length: f64,
    /// Total elevation-aware length in meters
    pub total_length_3d: f64,
    /// Number of distinct lineages among live rows
    pub lineage_count: usize,
}

impl NetworkInfo {
    /// Compute statistics over a set of rows
    pub fn from_trails(trails: &[Arc<Trail>]) -> Self {
        let lineages: BTreeSet<LineageId> = trails.iter().map(|t| t.lineage()).collect();
        Self {
            trail_count: trails.len(),
            total_length: trails.iter().map(|t| t.length()).sum(),
            total_length_3d: trails.iter().map(|t| t.length_3d()).sum(),
            lineage_count: lineages.len(),
        }
    }
}

/// Transactional trail table
pub trait TrailStore {
    /// Every live row, ordered by segment id
    fn live_trails(&self) -> StoreResult<Vec<Arc<Trail>>>;

    /// One live row
    fn get(&self, id: SegmentId) -> StoreResult<Option<Arc<Trail>>>;

    /// Apply a mutation atomically, returning the ids assigned to inserted rows in order
    fn commit(&mut self, mutation: TrailMutation) -> StoreResult<Vec<SegmentId>>;

    /// Number of live rows
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statistics over the live rows
    fn info(&self) -> StoreResult<NetworkInfo> {
        Ok(NetworkInfo::from_trails(&self.live_trails()?))
    }
}

/// Ordered in-memory trail table
#[derive(Debug, Clone)]
pub struct MemoryTrailStore {
    rows: BTreeMap<SegmentId, Arc<Trail>>,
    next_segment: u64,
    next_lineage: u64,
    /// When set, every operation fails with [`StoreError::Unavailable`]
    unavailable: Option<String>,
    /// Number of successful commits
    commits: usize,
}

impl Default for MemoryTrailStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MemoryTrailStore {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_segment: 1,
            next_lineage: 1,
            unavailable: None,
            commits: 0,
        }
    }

    /// Create a store seeded with ingested trails
    pub fn from_trails(trails: impl IntoIterator<Item = NewTrail>) -> Self {
        let mut store = Self::new();
        for trail in trails {
            store.insert(trail);
        }
        store
    }

    /// Insert one row outside of any mutation (used for seeding)
    pub fn insert(&mut self, trail: NewTrail) -> SegmentId {
        let id = SegmentId(self.next_segment);
        self.next_segment += 1;

        let lineage = match trail.lineage {
            Some(lineage) => {
                self.next_lineage = self.next_lineage.max(lineage.0 + 1);
                lineage
            }
            None => {
                let lineage = LineageId(self.next_lineage);
                self.next_lineage += 1;
                lineage
            }
        };

        let row = Trail::new(id, lineage, trail.parent, trail.attributes, trail.geometry);
        self.rows.insert(id, Arc::new(row));
        id
    }

    /// Simulate the storage engine going away (or coming back with `None`)
    pub fn set_unavailable(&mut self, reason: Option<String>) {
        self.unavailable = reason;
    }

    /// Number of successful commits so far
    #[inline]
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Live rows descending from one lineage
    pub fn trails_in_lineage(&self, lineage: LineageId) -> Vec<Arc<Trail>> {
        self.rows
            .values()
            .filter(|t| t.lineage() == lineage)
            .cloned()
            .collect()
    }

    fn check_available(&self) -> StoreResult<()> {
        match &self.unavailable {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

impl TrailStore for MemoryTrailStore {
    fn live_trails(&self) -> StoreResult<Vec<Arc<Trail>>> {
        self.check_available()?;
        Ok(self.rows.values().cloned().collect())
    }

    fn get(&self, id: SegmentId) -> StoreResult<Option<Arc<Trail>>> {
        self.check_available()?;
        Ok(self.rows.get(&id).cloned())
    }

    fn commit(&mut self, mutation: TrailMutation) -> StoreResult<Vec<SegmentId>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("store::commit");

        self.check_available()?;
        if mutation.is_empty() {
            return Err(StoreError::EmptyMutation);
        }

        // Validate everything before the first change
        let deleted: BTreeSet<SegmentId> = mutation.deletes.iter().copied().collect();
        for id in &mutation.deletes {
            if !self.rows.contains_key(id) {
                return Err(StoreError::MissingRow(*id));
            }
        }
        for (id, _) in &mutation.updates {
            if !self.rows.contains_key(id) || deleted.contains(id) {
                return Err(StoreError::MissingRow(*id));
            }
        }

        for id in &mutation.deletes {
            self.rows.remove(id);
        }
        for (id, geometry) in mutation.updates {
            if let Some(row) = self.rows.get_mut(&id) {
                *row = Arc::new(row.with_geometry(geometry));
            }
        }
        let inserted = mutation
            .inserts
            .into_iter()
            .map(|trail| self.insert(trail))
            .collect();

        self.commits += 1;
        Ok(inserted)
    }

    #[inline]
    fn len(&self) -> usize {
        self.rows.len()
    }
}
