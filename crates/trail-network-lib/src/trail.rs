//! Trail data model
//!
//! A [`Trail`] is one live row of the network. Splitting replaces a row with children that keep
//! the same [`LineageId`], so a logical trail can be followed across any number of rewrites.

use crate::geometry::TrailGeometry;
use std::fmt;

/// Identity of one live trail row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg#{}", self.0)
    }
}

/// Identity of the original, pre-split trail shared by all its descendants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineageId(pub u64);

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trail#{}", self.0)
    }
}

/// Descriptive attributes carried unchanged from parent to children
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrailAttributes {
    pub name: Option<String>,
    pub surface: Option<String>,
    pub trail_type: Option<String>,
    pub difficulty: Option<String>,
}

impl TrailAttributes {
    /// Attributes with only a name set
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Whether the name or type contains any of the keywords (case-insensitive)
    pub fn mentions_any(&self, keywords: &[String]) -> bool {
        let haystacks = [self.name.as_deref(), self.trail_type.as_deref()];
        haystacks.into_iter().flatten().any(|text| {
            let text = text.to_lowercase();
            keywords
                .iter()
                .any(|keyword| text.contains(&keyword.to_lowercase()))
        })
    }
}

/// A live trail row
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trail {
    id: SegmentId,
    lineage: LineageId,
    /// Row this one was cut from, if any
    parent: Option<SegmentId>,
    attributes: TrailAttributes,
    geometry: TrailGeometry,
    /// Cached horizontal length in meters
    cached_length: f64,
    /// Cached elevation-aware length in meters
    cached_length_3d: f64,
}

impl Trail {
    pub(crate) fn new(
        id: SegmentId,
        lineage: LineageId,
        parent: Option<SegmentId>,
        attributes: TrailAttributes,
        geometry: TrailGeometry,
    ) -> Self {
        let cached_length = geometry.length_2d();
        let cached_length_3d = geometry.length_3d();
        Self {
            id,
            lineage,
            parent,
            attributes,
            geometry,
            cached_length,
            cached_length_3d,
        }
    }

    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[inline]
    pub fn lineage(&self) -> LineageId {
        self.lineage
    }

    #[inline]
    pub fn parent(&self) -> Option<SegmentId> {
        self.parent
    }

    #[inline]
    pub fn attributes(&self) -> &TrailAttributes {
        &self.attributes
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.attributes.name.as_deref()
    }

    #[inline]
    pub fn geometry(&self) -> &TrailGeometry {
        &self.geometry
    }

    /// Horizontal length in meters
    #[inline]
    pub fn length(&self) -> f64 {
        self.cached_length
    }

    /// Length including elevation change in meters
    #[inline]
    pub fn length_3d(&self) -> f64 {
        self.cached_length_3d
    }

    /// Copy of this row with new geometry (same identity)
    pub(crate) fn with_geometry(&self, geometry: TrailGeometry) -> Self {
        Self::new(
            self.id,
            self.lineage,
            self.parent,
            self.attributes.clone(),
            geometry,
        )
    }
}

/// Request to insert a trail row; the store assigns the segment id
#[derive(Clone, Debug)]
pub struct NewTrail {
    /// Lineage to join, or `None` to start a new one
    pub lineage: Option<LineageId>,
    pub parent: Option<SegmentId>,
    pub attributes: TrailAttributes,
    pub geometry: TrailGeometry,
}

impl NewTrail {
    /// An ingested trail starting its own lineage
    pub fn new(attributes: TrailAttributes, geometry: TrailGeometry) -> Self {
        Self {
            lineage: None,
            parent: None,
            attributes,
            geometry,
        }
    }

    /// A child segment of `parent`, inheriting its lineage and attributes
    pub fn child_of(parent: &Trail, geometry: TrailGeometry) -> Self {
        Self {
            lineage: Some(parent.lineage()),
            parent: Some(parent.id()),
            attributes: parent.attributes().clone(),
            geometry,
        }
    }
}
