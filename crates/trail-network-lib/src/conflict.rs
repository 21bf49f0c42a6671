//! Conflict records
//!
//! A [`Conflict`] describes where and how two trails interfere. Conflicts are recomputed from the
//! live trail set at every scan; only their [`ConflictKey`] outlives a scan, as an entry of the
//! failed-conflict set.

use crate::config::PhaseConfig;
use crate::geometry::{Point3, TrailEnd};
use crate::trail::SegmentId;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

/// How the points of a multi-point conflict relate to the trails' endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MultiPointKind {
    /// Every point sits at an endpoint of one of the trails
    EndpointOnly,
    /// Every point is interior on both trails
    Interior,
    /// Some points are endpoint-coincident, others interior
    Dual,
}

/// Kind of geometric interference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConflictKind {
    /// Single point interior on both trails
    Crossing,
    /// An endpoint of the visitor lands on the interior of the visited trail
    TJunction,
    /// A T-junction meeting at an acute angle
    YJunction,
    /// Two or more distinct points between the same pair
    MultiPoint(MultiPointKind),
    /// A free endpoint found by the snapper near another trail
    NearMissEndpoint,
}

impl ConflictKind {
    /// Family tag used by phase configuration
    #[inline]
    pub fn tag(&self) -> ConflictKindTag {
        match self {
            ConflictKind::Crossing => ConflictKindTag::Crossing,
            ConflictKind::TJunction => ConflictKindTag::TJunction,
            ConflictKind::YJunction => ConflictKindTag::YJunction,
            ConflictKind::MultiPoint(_) => ConflictKindTag::MultiPoint,
            ConflictKind::NearMissEndpoint => ConflictKindTag::NearMissEndpoint,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Crossing => write!(f, "crossing"),
            ConflictKind::TJunction => write!(f, "t-junction"),
            ConflictKind::YJunction => write!(f, "y-junction"),
            ConflictKind::MultiPoint(MultiPointKind::EndpointOnly) => {
                write!(f, "multi-point (endpoint-only)")
            }
            ConflictKind::MultiPoint(MultiPointKind::Interior) => write!(f, "multi-point"),
            ConflictKind::MultiPoint(MultiPointKind::Dual) => write!(f, "multi-point (dual)"),
            ConflictKind::NearMissEndpoint => write!(f, "near-miss endpoint"),
        }
    }
}

/// Conflict kind family, without sub-kind payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConflictKindTag {
    Crossing,
    TJunction,
    YJunction,
    MultiPoint,
    NearMissEndpoint,
}

/// One point of a conflict
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConflictPoint {
    pub location: Point3,
    /// Fractional position along trail `a`
    pub fraction_a: f64,
    /// Fractional position along trail `b`
    pub fraction_b: f64,
    /// Beyond trail `a`'s exclusion margin from both its ends
    pub interior_a: bool,
    /// Beyond trail `b`'s exclusion margin from both its ends
    pub interior_b: bool,
}

impl ConflictPoint {
    #[inline]
    pub fn is_actionable(&self) -> bool {
        self.interior_a || self.interior_b
    }
}

/// A trail endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EndpointRef {
    pub trail: SegmentId,
    pub end: TrailEnd,
}

/// Unordered trail-id pair identifying a conflict across scans
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConflictKey(SegmentId, SegmentId);

impl ConflictKey {
    pub fn new(a: SegmentId, b: SegmentId) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }

    #[inline]
    pub fn first(&self) -> SegmentId {
        self.0
    }

    #[inline]
    pub fn second(&self) -> SegmentId {
        self.1
    }

    #[inline]
    pub fn contains(&self, id: SegmentId) -> bool {
        self.0 == id || self.1 == id
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// A detected geometric interference between two trails
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Conflict {
    /// Lower segment id of the pair
    pub a: SegmentId,
    /// Higher segment id of the pair
    pub b: SegmentId,
    pub kind: ConflictKind,
    /// Endpoint that must be connected onto the partner (T/Y/near-miss)
    pub visitor: Option<EndpointRef>,
    /// Conflict points ordered along `a`
    pub points: SmallVec<[ConflictPoint; 2]>,
    /// Gap between the trails at the conflict (0 when they touch)
    pub distance: f64,
}

impl Conflict {
    #[inline]
    pub fn key(&self) -> ConflictKey {
        ConflictKey::new(self.a, self.b)
    }

    /// The partner of `id` in this conflict
    #[inline]
    pub fn other(&self, id: SegmentId) -> SegmentId {
        if id == self.a { self.b } else { self.a }
    }

    /// Fractional positions of every point along trail `id`
    pub fn fractions_on(&self, id: SegmentId) -> SmallVec<[f64; 2]> {
        self.points
            .iter()
            .map(|p| if id == self.a { p.fraction_a } else { p.fraction_b })
            .collect()
    }

    /// Whether point `index` is interior on trail `id`
    pub fn is_interior_on(&self, index: usize, id: SegmentId) -> bool {
        self.points
            .get(index)
            .is_some_and(|p| if id == self.a { p.interior_a } else { p.interior_b })
    }

    /// Representative location (first point)
    #[inline]
    pub fn location(&self) -> Option<Point3> {
        self.points.first().map(|p| p.location)
    }

    /// Priority ordering under a phase: kind rank, then more points, then smaller gap, then key
    pub fn priority_cmp(&self, other: &Conflict, phase: &PhaseConfig) -> Ordering {
        let rank = |c: &Conflict| phase.rank(c.kind.tag()).unwrap_or(usize::MAX);
        rank(self)
            .cmp(&rank(other))
            .then_with(|| other.points.len().cmp(&self.points.len()))
            .then_with(|| self.distance.total_cmp(&other.distance))
            .then_with(|| self.key().cmp(&other.key()))
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key())?;
        if let Some(location) = self.location() {
            write!(f, " at ({:.2}, {:.2})", location.x, location.y)?;
        }
        Ok(())
    }
}
