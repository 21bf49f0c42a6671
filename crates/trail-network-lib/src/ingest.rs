//! GPX ingestion
//!
//! Loads GPX files in parallel and turns every track segment into a trail on a local metric
//! plane centred on the dataset, so that every tolerance of the pipeline is in meters. Resolved
//! trails are written back as GPX through the same projection.

use crate::geometry::{Point3, TrailGeometry};
use crate::trail::{NewTrail, Trail, TrailAttributes};
use crate::utils::LocalProjection;
use crate::{Result, TrailError};
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// Read and parse GPX files in parallel
pub fn load_gpx_files<P: AsRef<Path> + Send + Sync>(paths: &[P]) -> Result<Vec<gpx::Gpx>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("ingest::load_gpx_files");

    paths
        .par_iter()
        .map(|path| -> Result<gpx::Gpx> {
            let file = std::fs::File::open(path.as_ref())?;
            let reader = std::io::BufReader::new(file);
            Ok(gpx::read(reader)?)
        })
        .collect()
}

/// Projection centred on the bounding box of every track point, `None` if there are no points
pub fn projection_for(documents: &[gpx::Gpx]) -> Option<LocalProjection> {
    let mut min_lat = f64::INFINITY;
    let mut min_lon = f64::INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    let mut max_lon = f64::NEG_INFINITY;

    let waypoints = documents
        .iter()
        .flat_map(|gpx| gpx.tracks.iter())
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| segment.points.iter());
    for waypoint in waypoints {
        let point = waypoint.point();
        min_lon = min_lon.min(point.x());
        max_lon = max_lon.max(point.x());
        min_lat = min_lat.min(point.y());
        max_lat = max_lat.max(point.y());
    }

    if !min_lat.is_finite() || !min_lon.is_finite() {
        return None;
    }
    Some(LocalProjection::new(
        (min_lat + max_lat) / 2.0,
        (min_lon + max_lon) / 2.0,
    ))
}

/// One trail per track segment of a GPX document
///
/// Segments with fewer than two distinct points are skipped with a warning. Missing elevation
/// defaults to 0.
pub fn trails_from_gpx(gpx: &gpx::Gpx, projection: &LocalProjection) -> Vec<NewTrail> {
    let mut trails = Vec::new();
    for track in &gpx.tracks {
        let attributes = TrailAttributes {
            name: track.name.clone(),
            trail_type: track.type_.clone(),
            ..Default::default()
        };

        for (i, segment) in track.segments.iter().enumerate() {
            let points: Vec<Point3> = segment
                .points
                .iter()
                .map(|waypoint| {
                    let point = waypoint.point();
                    let (x, y) = projection.project(point.y(), point.x());
                    Point3::new(x, y, waypoint.elevation.unwrap_or(0.0))
                })
                .collect();

            match TrailGeometry::new(points) {
                Ok(geometry) => trails.push(NewTrail::new(attributes.clone(), geometry)),
                Err(err) => tracing::warn!(
                    "Skipping segment {} of track {:?}: {}",
                    i,
                    track.name.as_deref().unwrap_or("<unnamed>"),
                    err
                ),
            }
        }
    }
    trails
}

/// Load GPX files into trails on a shared local projection
pub fn load_trails<P: AsRef<Path> + Send + Sync>(
    paths: &[P],
) -> Result<(Vec<NewTrail>, LocalProjection)> {
    let documents = load_gpx_files(paths)?;
    let projection = projection_for(&documents).ok_or(TrailError::EmptyTrail)?;

    let trails: Vec<NewTrail> = documents
        .par_iter()
        .flat_map_iter(|gpx| trails_from_gpx(gpx, &projection))
        .collect();

    tracing::info!(
        "Loaded {} trails from {} GPX files (origin {:?})",
        trails.len(),
        paths.len(),
        projection.origin()
    );
    Ok((trails, projection))
}

/// GPX document with one track per trail, elevations kept
pub fn trails_to_gpx(trails: &[Arc<Trail>], projection: &LocalProjection) -> gpx::Gpx {
    let tracks = trails
        .iter()
        .map(|trail| {
            let mut segment = gpx::TrackSegment::new();
            segment.points = trail
                .geometry()
                .points()
                .iter()
                .map(|p| {
                    let (lat, lon) = projection.unproject(p.x, p.y);
                    let mut waypoint = gpx::Waypoint::new(geo::Point::new(lon, lat));
                    waypoint.elevation = Some(p.z);
                    waypoint
                })
                .collect();

            let mut track = gpx::Track::new();
            track.name = trail.attributes().name.clone();
            track.type_ = trail.attributes().trail_type.clone();
            track.segments.push(segment);
            track
        })
        .collect();

    gpx::Gpx {
        version: gpx::GpxVersion::Gpx11,
        creator: Some(concat!("trail-network ", env!("CARGO_PKG_VERSION")).to_string()),
        tracks,
        ..Default::default()
    }
}

/// Write trails as a GPX 1.1 file
pub fn write_trails<P: AsRef<Path>>(
    path: P,
    trails: &[Arc<Trail>],
    projection: &LocalProjection,
) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())?;
    let writer = std::io::BufWriter::new(file);
    gpx::write(&trails_to_gpx(trails, projection), writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Mesa Trail</name>
    <type>hiking</type>
    <trkseg>
      <trkpt lat="39.9900" lon="-105.2900"><ele>1700</ele></trkpt>
      <trkpt lat="39.9910" lon="-105.2900"><ele>1710</ele></trkpt>
      <trkpt lat="39.9920" lon="-105.2890"></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="39.9950" lon="-105.2950"></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    fn sample() -> gpx::Gpx {
        gpx::read(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_projection_centred_on_bounds() {
        let projection = projection_for(&[sample()]).unwrap();
        let (lat, lon) = projection.origin();
        assert!((lat - 39.9925).abs() < 1e-9);
        assert!((lon + 105.2920).abs() < 1e-9);
    }

    #[test]
    fn test_trails_from_gpx() {
        let gpx = sample();
        let projection = projection_for(std::slice::from_ref(&gpx)).unwrap();
        let trails = trails_from_gpx(&gpx, &projection);

        // The single-point segment is skipped
        assert_eq!(trails.len(), 1);
        let trail = &trails[0];
        assert_eq!(trail.attributes.name.as_deref(), Some("Mesa Trail"));
        assert_eq!(trail.attributes.trail_type.as_deref(), Some("hiking"));
        assert_eq!(trail.geometry.num_points(), 3);
        assert_eq!(trail.geometry.start().z, 1700.0);
        assert_eq!(trail.geometry.end().z, 0.0);
        // 0.001 degrees of latitude is about 111 m
        let first_leg = trail.geometry.points()[0].distance_2d(&trail.geometry.points()[1]);
        assert!((first_leg - 111.19).abs() < 0.1, "{first_leg}");
    }

    #[test]
    fn test_trails_to_gpx_keeps_names_and_positions() {
        let gpx = sample();
        let projection = projection_for(std::slice::from_ref(&gpx)).unwrap();
        let trails: Vec<Arc<Trail>> = trails_from_gpx(&gpx, &projection)
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                Arc::new(Trail::new(
                    crate::SegmentId(i as u64 + 1),
                    crate::LineageId(i as u64 + 1),
                    None,
                    t.attributes,
                    t.geometry,
                ))
            })
            .collect();

        let mut buffer = Vec::new();
        gpx::write(&trails_to_gpx(&trails, &projection), &mut buffer).unwrap();
        let reread = gpx::read(buffer.as_slice()).unwrap();

        assert_eq!(reread.tracks.len(), 1);
        assert_eq!(reread.tracks[0].name.as_deref(), Some("Mesa Trail"));
        let first = reread.tracks[0].segments[0].points[0].point();
        assert!((first.y() - 39.99).abs() < 1e-7);
        assert!((first.x() + 105.29).abs() < 1e-7);
        assert_eq!(reread.tracks[0].segments[0].points[0].elevation, Some(1700.0));
    }

    #[test]
    fn test_empty_input_has_no_projection() {
        assert!(projection_for(&[]).is_none());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_gpx_files(&["/nonexistent/trails.gpx"]).unwrap_err();
        assert!(matches!(err, TrailError::Io(_)));
    }
}
