//! Geometry primitives and the kernel contract consumed by the splitting engine
//!
//! Trails live on a local metric plane (x, y in meters) and carry elevation as a third
//! coordinate. The [`GeometryKernel`] trait is the boundary to the geometry provider; the
//! [`PlanarKernel`] implementation is backed by the `geo` crate for 2D predicates and
//! interpolates elevation at every vertex it creates.

use crate::{Result, TrailError, utils};
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::line_measures::Distance;
use geo::{
    BoundingRect, Closest, ClosestPoint, Coord, Euclidean, Intersects, Line, LineString, Point,
    Rect,
};

/// Points closer than this (meters) are treated as the same vertex inside a single line
const COINCIDENT_EPSILON: f64 = 1e-9;

/// A point on the local plane with elevation
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    /// Elevation in meters
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Planar coordinate (elevation dropped)
    #[inline(always)]
    pub fn xy(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }

    /// Horizontal distance in meters
    #[inline]
    pub fn distance_2d(&self, other: &Point3) -> f64 {
        Euclidean.distance(Point::from(self.xy()), Point::from(other.xy()))
    }

    /// Linear interpolation of all three coordinates
    #[inline]
    pub fn lerp(&self, other: &Point3, t: f64) -> Point3 {
        Point3 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    /// Same elevation, new planar position
    #[inline]
    pub fn with_xy(&self, xy: Coord<f64>) -> Point3 {
        Point3::new(xy.x, xy.y, self.z)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One of the two ends of a trail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrailEnd {
    Start,
    End,
}

impl TrailEnd {
    pub const BOTH: [TrailEnd; 2] = [TrailEnd::Start, TrailEnd::End];

    /// The end nearest to a fractional position along the line
    #[inline]
    pub fn nearest_to_fraction(fraction: f64) -> TrailEnd {
        if fraction < 0.5 {
            TrailEnd::Start
        } else {
            TrailEnd::End
        }
    }
}

/// An ordered 3D polyline with at least two distinct points
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrailGeometry {
    points: Vec<Point3>,
}

impl TrailGeometry {
    /// Create a geometry, dropping consecutive duplicate vertices
    ///
    /// Fails if fewer than two distinct points remain or any coordinate is not finite.
    pub fn new(points: Vec<Point3>) -> Result<Self> {
        let mut cleaned: Vec<Point3> = Vec::with_capacity(points.len());
        for point in points {
            if !point.is_finite() {
                return Err(TrailError::InvalidGeometry(format!(
                    "non-finite coordinate ({}, {}, {})",
                    point.x, point.y, point.z
                )));
            }
            if let Some(last) = cleaned.last()
                && last.distance_2d(&point) <= COINCIDENT_EPSILON
            {
                continue;
            }
            cleaned.push(point);
        }

        if cleaned.len() < 2 {
            return Err(TrailError::InvalidGeometry(
                "fewer than two distinct points".to_string(),
            ));
        }

        Ok(Self { points: cleaned })
    }

    /// All vertices in order
    #[inline]
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// Number of vertices
    #[inline]
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn start(&self) -> Point3 {
        self.points[0]
    }

    #[inline]
    pub fn end(&self) -> Point3 {
        self.points[self.points.len() - 1]
    }

    #[inline]
    pub fn endpoint(&self, end: TrailEnd) -> Point3 {
        match end {
            TrailEnd::Start => self.start(),
            TrailEnd::End => self.end(),
        }
    }

    /// Horizontal length in meters
    pub fn length_2d(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].distance_2d(&w[1]))
            .sum()
    }

    /// Length including elevation change in meters
    pub fn length_3d(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| utils::distance_3d(w[0].distance_2d(&w[1]), w[1].z - w[0].z))
            .sum()
    }

    /// Whether the line ends where it starts (a loop trail)
    #[inline]
    pub fn is_closed(&self, epsilon: f64) -> bool {
        self.start().distance_2d(&self.end()) <= epsilon
    }

    /// Planar bounding box
    pub fn bounding_rect(&self) -> Rect<f64> {
        let start = self.points[0].xy();
        self.to_line_string()
            .bounding_rect()
            .unwrap_or_else(|| Rect::new(start, start))
    }

    /// Same vertices in opposite order
    pub fn reversed(&self) -> Self {
        let mut points = self.points.clone();
        points.reverse();
        Self { points }
    }

    /// Planar `geo::LineString` (elevation dropped)
    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::from(self.points.iter().map(Point3::xy).collect::<Vec<_>>())
    }

    /// Planar segments in order
    pub fn lines(&self) -> impl Iterator<Item = Line<f64>> + '_ {
        self.points
            .windows(2)
            .map(|w| Line::new(w[0].xy(), w[1].xy()))
    }

    /// Distance along the line at every vertex (first entry is 0)
    pub(crate) fn cumulative_lengths(&self) -> Vec<f64> {
        let mut acc = 0.0;
        let mut out = Vec::with_capacity(self.points.len());
        out.push(0.0);
        for w in self.points.windows(2) {
            acc += w[0].distance_2d(&w[1]);
            out.push(acc);
        }
        out
    }

    /// Direction of the end segment, pointing from the endpoint into the line
    pub fn end_direction(&self, end: TrailEnd) -> (f64, f64) {
        let n = self.points.len();
        let (from, to) = match end {
            TrailEnd::Start => (self.points[0], self.points[1]),
            TrailEnd::End => (self.points[n - 1], self.points[n - 2]),
        };
        (to.x - from.x, to.y - from.y)
    }

    /// Direction of the segment containing the given fractional position
    pub fn direction_at_fraction(&self, fraction: f64) -> (f64, f64) {
        let cumulative = self.cumulative_lengths();
        let total = cumulative[cumulative.len() - 1];
        let measure = fraction.clamp(0.0, 1.0) * total;
        let k = cumulative
            .partition_point(|&c| c < measure)
            .clamp(1, self.points.len() - 1);
        let (a, b) = (self.points[k - 1], self.points[k]);
        (b.x - a.x, b.y - a.y)
    }

    /// Copy with one endpoint replaced
    pub(crate) fn with_endpoint(&self, end: TrailEnd, point: Point3) -> Result<Self> {
        let mut points = self.points.clone();
        match end {
            TrailEnd::Start => points[0] = point,
            TrailEnd::End => {
                let last = points.len() - 1;
                points[last] = point;
            }
        }
        Self::new(points)
    }

    /// Copy with a new vertex added beyond one endpoint
    pub(crate) fn extended(&self, end: TrailEnd, point: Point3) -> Result<Self> {
        let mut points = Vec::with_capacity(self.points.len() + 1);
        match end {
            TrailEnd::Start => {
                points.push(point);
                points.extend_from_slice(&self.points);
            }
            TrailEnd::End => {
                points.extend_from_slice(&self.points);
                points.push(point);
            }
        }
        Self::new(points)
    }
}

/// Result of a closest-point query
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosestOnLine {
    /// Closest point on the line (elevation interpolated from the line)
    pub point: Point3,
    /// Horizontal distance from the query point
    pub distance: f64,
    /// Fractional position of `point` along the line, in [0, 1]
    pub fraction: f64,
}

/// One point where two lines meet
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntersectionPoint {
    /// Location, with elevation interpolated from the first line
    pub location: Point3,
    /// Fractional position along the first line
    pub fraction_a: f64,
    /// Fractional position along the second line
    pub fraction_b: f64,
}

/// Geometry provider contract
///
/// Every operation preserves the elevation coordinate. Implementations must be shareable
/// across threads because pair classification runs in parallel.
pub trait GeometryKernel: Send + Sync {
    /// Whether the two lines share at least one point
    fn intersects(&self, a: &TrailGeometry, b: &TrailGeometry) -> bool {
        !self.intersection(a, b).is_empty()
    }

    /// Every distinct point shared by the two lines, ordered along `a`
    fn intersection(&self, a: &TrailGeometry, b: &TrailGeometry) -> Vec<IntersectionPoint>;

    /// Horizontal length
    fn length(&self, line: &TrailGeometry) -> f64;

    /// Closest point on `line` to `point`
    fn closest_point(&self, line: &TrailGeometry, point: Point3) -> ClosestOnLine;

    /// Fractional position of the point on `line` closest to `point`
    fn locate_along_line(&self, line: &TrailGeometry, point: Point3) -> f64 {
        self.closest_point(line, point).fraction
    }

    /// Cut the line in two at a fractional position strictly between 0 and 1
    ///
    /// Returns `None` if either side would be degenerate.
    fn split_at_fraction(
        &self,
        line: &TrailGeometry,
        fraction: f64,
    ) -> Option<(TrailGeometry, TrailGeometry)>;

    /// Simple, non-zero-length line (closed rings are allowed)
    fn is_valid(&self, line: &TrailGeometry) -> bool;
}

/// `geo`-backed kernel on the local metric plane
#[derive(Debug, Clone, Copy)]
pub struct PlanarKernel {
    /// Intersection points closer than this are merged into one
    merge_epsilon: f64,
}

impl Default for PlanarKernel {
    fn default() -> Self {
        Self {
            merge_epsilon: 0.01,
        }
    }
}

impl PlanarKernel {
    pub fn new(merge_epsilon: f64) -> Self {
        Self {
            merge_epsilon: merge_epsilon.max(COINCIDENT_EPSILON),
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl GeometryKernel for PlanarKernel {
    fn intersection(&self, a: &TrailGeometry, b: &TrailGeometry) -> Vec<IntersectionPoint> {
        let cumulative_a = a.cumulative_lengths();
        let cumulative_b = b.cumulative_lengths();
        let total_a = cumulative_a[cumulative_a.len() - 1];
        let total_b = cumulative_b[cumulative_b.len() - 1];
        if total_a <= 0.0 || total_b <= 0.0 {
            return Vec::new();
        }

        let bounds_b = b.bounding_rect();
        let mut hits: Vec<IntersectionPoint> = Vec::new();

        for (i, seg_a) in a.points().windows(2).enumerate() {
            let line_a = Line::new(seg_a[0].xy(), seg_a[1].xy());
            if !line_a.bounding_rect().intersects(&bounds_b) {
                continue;
            }

            for (j, seg_b) in b.points().windows(2).enumerate() {
                let line_b = Line::new(seg_b[0].xy(), seg_b[1].xy());
                if !line_a.bounding_rect().intersects(&line_b.bounding_rect()) {
                    continue;
                }

                let coords: Vec<Coord<f64>> = match line_intersection(line_a, line_b) {
                    Some(LineIntersection::SinglePoint { intersection, .. }) => vec![intersection],
                    Some(LineIntersection::Collinear { intersection }) => {
                        vec![intersection.start, intersection.end]
                    }
                    None => continue,
                };

                for coord in coords {
                    let (along_a, location) = position_on_segment(&seg_a[0], &seg_a[1], coord);
                    let (along_b, _) = position_on_segment(&seg_b[0], &seg_b[1], coord);
                    hits.push(IntersectionPoint {
                        location,
                        fraction_a: ((cumulative_a[i] + along_a) / total_a).clamp(0.0, 1.0),
                        fraction_b: ((cumulative_b[j] + along_b) / total_b).clamp(0.0, 1.0),
                    });
                }
            }
        }

        hits.sort_by(|p, q| p.fraction_a.total_cmp(&q.fraction_a));

        // Hits on a shared vertex are reported once per adjacent segment
        let mut merged: Vec<IntersectionPoint> = Vec::with_capacity(hits.len());
        for hit in hits {
            let duplicate = merged
                .iter()
                .any(|m| m.location.distance_2d(&hit.location) <= self.merge_epsilon);
            if !duplicate {
                merged.push(hit);
            }
        }
        merged
    }

    #[inline]
    fn length(&self, line: &TrailGeometry) -> f64 {
        line.length_2d()
    }

    fn closest_point(&self, line: &TrailGeometry, point: Point3) -> ClosestOnLine {
        let cumulative = line.cumulative_lengths();
        let total = cumulative[cumulative.len() - 1];
        let query = Point::from(point.xy());

        let mut best: Option<ClosestOnLine> = None;
        for (i, seg) in line.points().windows(2).enumerate() {
            let segment = Line::new(seg[0].xy(), seg[1].xy());
            let candidate = match segment.closest_point(&query) {
                Closest::Intersection(p) | Closest::SinglePoint(p) => p,
                Closest::Indeterminate => Point::from(segment.start),
            };
            let distance = Euclidean.distance(candidate, query);
            if best.is_some_and(|b| b.distance <= distance) {
                continue;
            }
            let (along, on_line) = position_on_segment(&seg[0], &seg[1], candidate.into());
            let fraction = if total > 0.0 {
                ((cumulative[i] + along) / total).clamp(0.0, 1.0)
            } else {
                0.0
            };
            best = Some(ClosestOnLine {
                point: on_line,
                distance,
                fraction,
            });
        }

        best.unwrap_or_else(|| ClosestOnLine {
            point: line.start(),
            distance: line.start().distance_2d(&point),
            fraction: 0.0,
        })
    }

    fn split_at_fraction(
        &self,
        line: &TrailGeometry,
        fraction: f64,
    ) -> Option<(TrailGeometry, TrailGeometry)> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return None;
        }

        let points = line.points();
        let cumulative = line.cumulative_lengths();
        let total = cumulative[cumulative.len() - 1];
        let measure = fraction * total;

        // First vertex at or beyond the cut; the cut lies on segment (k - 1, k)
        let k = cumulative
            .partition_point(|&c| c < measure)
            .clamp(1, points.len() - 1);
        let (start, end) = (points[k - 1], points[k]);
        let segment_length = cumulative[k] - cumulative[k - 1];
        let t = if segment_length > 0.0 {
            (measure - cumulative[k - 1]) / segment_length
        } else {
            0.0
        };
        let cut = start.lerp(&end, t.clamp(0.0, 1.0));

        let mut head: Vec<Point3> = points[..k].to_vec();
        let mut tail: Vec<Point3> = Vec::with_capacity(points.len() - k + 1);

        if cut.distance_2d(&end) <= COINCIDENT_EPSILON {
            head.push(end);
        } else if cut.distance_2d(&start) <= COINCIDENT_EPSILON {
            tail.push(start);
        } else {
            head.push(cut);
            tail.push(cut);
        }
        tail.extend_from_slice(&points[k..]);

        let head = TrailGeometry::new(head).ok()?;
        let tail = TrailGeometry::new(tail).ok()?;
        Some((head, tail))
    }

    fn is_valid(&self, line: &TrailGeometry) -> bool {
        if line.num_points() < 2 || line.length_2d() <= COINCIDENT_EPSILON {
            return false;
        }

        let lines: Vec<Line<f64>> = line.lines().collect();
        let n = lines.len();
        let closed = line.is_closed(COINCIDENT_EPSILON);

        for i in 0..n {
            for j in (i + 1)..n {
                if !lines[i].bounding_rect().intersects(&lines[j].bounding_rect()) {
                    continue;
                }
                let adjacent = j == i + 1 || (closed && i == 0 && j == n - 1);
                match line_intersection(lines[i], lines[j]) {
                    None => {}
                    Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                    Some(LineIntersection::Collinear { intersection })
                        if adjacent
                            && Point::from(intersection.start)
                                .eq(&Point::from(intersection.end)) => {}
                    Some(_) => return false,
                }
            }
        }

        true
    }
}

/// Distance from `start` to `coord` and the interpolated 3D point at `coord`
fn position_on_segment(start: &Point3, end: &Point3, coord: Coord<f64>) -> (f64, Point3) {
    let segment_length = start.distance_2d(end);
    let along = Euclidean.distance(Point::from(start.xy()), Point::from(coord));
    let t = if segment_length > 0.0 {
        (along / segment_length).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let z = start.z + (end.z - start.z) * t;
    (along, Point3::new(coord.x, coord.y, z))
}
