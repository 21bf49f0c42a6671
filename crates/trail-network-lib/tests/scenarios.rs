//! End-to-end resolution scenarios and network-wide properties

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use trail_network_lib::{
    ConflictKey, ConflictKindTag, IntersectionDetector, IterationController, MemoryTrailStore,
    NewTrail, PhaseConfig, PhaseTermination, PipelineConfig, PlanarKernel, Point3,
    RecordingObserver, ResolveReport, SegmentId, SpatialIndex, Trail, TrailAttributes,
    TrailError, TrailGeometry, TrailSplitter, TrailStore, resolve, validation,
};

fn geometry(coords: &[(f64, f64)]) -> TrailGeometry {
    TrailGeometry::new(
        coords
            .iter()
            .map(|&(x, y)| Point3::new(x, y, 0.0))
            .collect(),
    )
    .unwrap()
}

fn named(name: &str, coords: &[(f64, f64)]) -> NewTrail {
    NewTrail::new(TrailAttributes::named(name), geometry(coords))
}

fn run(
    store: &mut MemoryTrailStore,
    config: PipelineConfig,
) -> (ResolveReport, RecordingObserver) {
    let mut controller = IterationController::new(config, PlanarKernel::default())
        .with_observer(RecordingObserver::default());
    let report = controller.run(store).unwrap();
    (report, controller.into_observer())
}

fn live(store: &MemoryTrailStore) -> Vec<Arc<Trail>> {
    store.live_trails().unwrap()
}

fn by_name(store: &MemoryTrailStore, name: &str) -> Vec<Arc<Trail>> {
    live(store)
        .into_iter()
        .filter(|t| t.name() == Some(name))
        .collect()
}

fn near(p: Point3, x: f64, y: f64) -> bool {
    (p.x - x).abs() < 1e-6 && (p.y - y).abs() < 1e-6
}

#[test]
fn test_x_crossing_gives_four_trails() {
    let mut store = MemoryTrailStore::from_trails([
        named("Ridge", &[(0.0, 50.0), (100.0, 50.0)]),
        named("Creek", &[(50.0, 0.0), (50.0, 100.0)]),
    ]);
    let (report, observer) = run(&mut store, PipelineConfig::default());

    assert_eq!(observer.detected_by_kind.get(&ConflictKindTag::Crossing), Some(&1));
    assert_eq!(report.segments_created, 4);
    assert_eq!(store.len(), 4);
    assert_eq!(report.residual_conflict_count(), 0);
    assert!(report.errors.is_empty());

    for name in ["Ridge", "Creek"] {
        let pieces = by_name(&store, name);
        assert_eq!(pieces.len(), 2);
        assert!(pieces.iter().all(|t| (t.length() - 50.0).abs() < 1e-9));
        assert_eq!(pieces[0].lineage(), pieces[1].lineage());
    }
}

#[test]
fn test_t_near_miss_connects_visitor() {
    let mut store = MemoryTrailStore::from_trails([
        named("Main", &[(0.0, 0.0), (100.0, 0.0)]),
        named("Spur", &[(50.0, 2.0), (50.0, 60.0)]),
    ]);
    let config = PipelineConfig {
        intersection_tolerance: 5.0,
        endpoint_exclusion_margin: 1.0,
        ..Default::default()
    };
    let (report, observer) = run(&mut store, config);

    assert_eq!(observer.detected_by_kind.get(&ConflictKindTag::TJunction), Some(&1));
    assert_eq!(report.segments_created, 2);
    assert_eq!(store.len(), 3);
    assert_eq!(report.residual_conflict_count(), 0);

    let main = by_name(&store, "Main");
    assert_eq!(main.len(), 2);
    assert!(main.iter().any(|t| near(t.geometry().end(), 50.0, 0.0)));
    assert!(main.iter().any(|t| near(t.geometry().start(), 50.0, 0.0)));

    let spur = by_name(&store, "Spur");
    assert_eq!(spur.len(), 1);
    assert!(near(spur[0].geometry().start(), 50.0, 0.0));
    assert!((spur[0].length() - 60.0).abs() < 1e-9);
}

#[test]
fn test_three_trails_through_one_point() {
    let mut store = MemoryTrailStore::from_trails([
        named("East", &[(0.0, 50.0), (100.0, 50.0)]),
        named("North", &[(50.0, 0.0), (50.0, 100.0)]),
        named("Diagonal", &[(0.0, 0.0), (100.0, 100.0)]),
    ]);
    let (report, _) = run(&mut store, PipelineConfig::default());

    assert!(report.phases[0].iterations <= 2, "{:?}", report.phases[0]);
    assert_eq!(report.phases[0].termination, PhaseTermination::Converged);
    assert_eq!(store.len(), 6);
    assert_eq!(report.residual_conflict_count(), 0);

    // Every piece starts or ends at the shared point
    for trail in live(&store) {
        let g = trail.geometry();
        assert!(near(g.start(), 50.0, 50.0) || near(g.end(), 50.0, 50.0));
    }
}

#[test]
fn test_short_piece_is_dropped_alone() {
    let kernel = PlanarKernel::default();
    let config = PipelineConfig::default();
    let splitter = TrailSplitter::new(&kernel, &config);
    let line = geometry(&[(0.0, 0.0), (100.0, 0.0)]);

    // The 0.8 m piece between the two cuts is discarded, the other cut stays
    let (pieces, kept) = splitter
        .cut(
            SegmentId(1),
            &line,
            &[
                (50.0, Point3::new(50.0, 0.0, 0.0)),
                (50.8, Point3::new(50.8, 0.0, 0.0)),
            ],
        )
        .unwrap();
    assert_eq!(pieces.len(), 2);
    assert_eq!(kept.len(), 1);
    assert!(pieces.iter().all(|p| p.length_2d() >= config.min_segment_length));

    // Nothing valid remains: the whole split is rejected
    let err = splitter
        .cut(SegmentId(1), &line, &[(0.8, Point3::new(0.8, 0.0, 0.0))])
        .unwrap_err();
    assert!(matches!(err, TrailError::DegenerateSplit { .. }));
}

#[test]
fn test_hairpin_leaves_no_short_segments() {
    // The hairpin crosses the main trail twice, 0.8 m apart
    let mut store = MemoryTrailStore::from_trails([
        named("Main", &[(0.0, 0.0), (100.0, 0.0)]),
        named(
            "Hairpin",
            &[(50.0, -10.0), (50.0, 10.0), (50.8, 10.0), (50.8, -10.0)],
        ),
    ]);
    let config = PipelineConfig::default();
    let (report, _) = run(&mut store, config.clone());

    assert_eq!(by_name(&store, "Main").len(), 2);
    assert_eq!(by_name(&store, "Hairpin").len(), 3);
    assert!(
        live(&store)
            .iter()
            .all(|t| t.length() >= config.min_segment_length)
    );
    assert_eq!(report.residual_conflict_count(), 0);
}

#[test]
fn test_failed_conflict_is_residual_and_not_retried() {
    // The crossing sits 0.6 m into the spur: the spur can never be cut there
    let mut store = MemoryTrailStore::from_trails([
        named("Main", &[(0.0, 0.0), (100.0, 0.0)]),
        named("Spur", &[(50.0, -0.6), (50.0, 30.0)]),
    ]);
    let config = PipelineConfig {
        endpoint_exclusion_margin: 0.1,
        ..Default::default()
    };
    let (report, observer) = run(&mut store, config);

    assert!(!report.failed_conflicts.is_empty());
    assert_eq!(observer.conflicts_failed, report.failed_conflicts.len());

    let failed: HashSet<ConflictKey> = report.failed_conflicts.iter().map(|f| f.key).collect();
    assert_eq!(failed.len(), report.failed_conflicts.len());

    let residual: HashSet<ConflictKey> =
        report.residual_conflicts.iter().map(|c| c.key()).collect();
    assert!(failed.iter().all(|key| residual.contains(key)));
    assert!(!report.is_converged());
}

#[test]
fn test_endpoint_snapped_in_endpoint_phase() {
    // 4 m gap: beyond the intersection tolerance, within the snap tolerance
    let mut store = MemoryTrailStore::from_trails([
        named("Main", &[(0.0, 0.0), (100.0, 0.0)]),
        named("Connector", &[(50.0, 4.0), (50.0, 60.0)]),
    ]);
    let (report, observer) = run(&mut store, PipelineConfig::default());

    assert_eq!(report.phases[0].iterations, 0);
    assert_eq!(report.phases[1].splits_applied, 1);
    assert_eq!(
        observer.detected_by_kind.get(&ConflictKindTag::NearMissEndpoint),
        Some(&1)
    );
    assert_eq!(store.len(), 3);
    let connector = by_name(&store, "Connector");
    assert!(near(connector[0].geometry().start(), 50.0, 0.0));
    assert_eq!(report.residual_conflict_count(), 0);
}

#[test]
fn test_end_piece_of_split_trail_still_snapped() {
    // Cross cuts Connector first, leaving an 11 m piece whose free end is 4 m from Main
    let mut store = MemoryTrailStore::from_trails([
        named("Main", &[(0.0, 0.0), (100.0, 0.0)]),
        named("Connector", &[(50.0, 4.0), (50.0, 204.0)]),
        named("Cross", &[(0.0, 15.0), (100.0, 15.0)]),
    ]);
    let (report, observer) = run(&mut store, PipelineConfig::default());

    assert_eq!(report.phases[0].splits_applied, 1);
    assert_eq!(
        observer.detected_by_kind.get(&ConflictKindTag::NearMissEndpoint),
        Some(&1)
    );
    let connector = by_name(&store, "Connector");
    assert_eq!(connector.len(), 2);
    assert!(connector.iter().any(|t| near(t.geometry().start(), 50.0, 0.0)));
    assert_eq!(by_name(&store, "Main").len(), 2);
    assert_eq!(report.residual_conflict_count(), 0);
}

#[test]
fn test_y_junction_detected_at_acute_angle() {
    let angle = 20f64.to_radians();
    let mut store = MemoryTrailStore::from_trails([
        named("Valley", &[(0.0, 0.0), (100.0, 0.0)]),
        named(
            "Fork",
            &[(50.0, 1.0), (50.0 + 60.0 * angle.cos(), 1.0 + 60.0 * angle.sin())],
        ),
    ]);
    let (report, observer) = run(&mut store, PipelineConfig::default());

    assert_eq!(observer.detected_by_kind.get(&ConflictKindTag::YJunction), Some(&1));
    assert_eq!(report.segments_created, 2);
    let fork = by_name(&store, "Fork");
    assert!(near(fork[0].geometry().start(), 50.0, 0.0));
}

#[test]
fn test_legitimate_dead_end_left_alone() {
    let mut store = MemoryTrailStore::from_trails([
        named("Main", &[(0.0, 0.0), (100.0, 0.0)]),
        named("Overlook spur", &[(50.0, 4.0), (50.0, 60.0)]),
    ]);
    let (report, _) = run(&mut store, PipelineConfig::default());

    assert_eq!(report.segments_created, 0);
    assert_eq!(store.len(), 2);
    assert!(report.unresolved_endpoints.iter().all(|u| {
        by_name(&store, "Main")
            .iter()
            .any(|t| t.id() == u.trail)
    }));
}

// ============================================================================
// Network-wide properties
// ============================================================================

/// Five kinked east-west trails crossing five north-south trails
fn grid() -> MemoryTrailStore {
    let mut trails = Vec::new();
    for i in 0..5 {
        let y = 10.0 + 30.0 * i as f64;
        trails.push(named(
            &format!("EW{i}"),
            &[(0.0, y), (100.0, y + 3.0), (200.0, y)],
        ));
    }
    for j in 0..5 {
        let x = 20.0 + 35.0 * j as f64;
        trails.push(named(&format!("NS{j}"), &[(x, 0.0), (x, 160.0)]));
    }
    MemoryTrailStore::from_trails(trails)
}

fn grid_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.phases = vec![
        PhaseConfig::new(
            "intersections",
            vec![
                ConflictKindTag::MultiPoint,
                ConflictKindTag::Crossing,
                ConflictKindTag::YJunction,
                ConflictKindTag::TJunction,
            ],
            50,
        ),
        PhaseConfig::new("endpoints", vec![ConflictKindTag::NearMissEndpoint], 5),
    ];
    config
}

#[test]
fn test_grid_properties() {
    let mut store = grid();
    let config = grid_config();
    let originals: HashMap<_, (f64, Point3, Point3)> = live(&store)
        .iter()
        .map(|t| {
            let g = t.geometry();
            (t.lineage(), (t.length(), g.start(), g.end()))
        })
        .collect();

    let (report, _) = run(&mut store, config.clone());
    let trails = live(&store);

    // Termination within the cap, with everything resolved
    assert!(report.phases.iter().zip(&config.phases).all(|(r, p)| r.iterations <= p.max_iterations));
    assert!(report.is_converged(), "{:?}", report.residual_conflicts);
    assert!(report.errors.is_empty());
    // Every crossing is resolved by its own split of two pieces into four
    assert_eq!(report.segments_created, 25 * 4);
    assert_eq!(trails.len(), 5 * 6 * 2);

    // Length conservation per lineage
    let mut lengths: HashMap<_, f64> = HashMap::new();
    for trail in &trails {
        *lengths.entry(trail.lineage()).or_default() += trail.length();
    }
    for (lineage, (original, _, _)) in &originals {
        let total = lengths.get(lineage).copied().unwrap_or_default();
        assert!(
            (total - original).abs() <= original * config.length_conservation_epsilon,
            "{lineage}: {total} vs {original}"
        );
    }

    // No short segments
    assert!(trails.iter().all(|t| t.length() >= config.min_segment_length));

    // No duplicate geometries
    assert!(validation::find_duplicates(&trails, config.dedup_precision).is_empty());

    // Every cut point is outside the exclusion margin of its original endpoints
    for trail in &trails {
        let (length, start, end) = originals[&trail.lineage()];
        let margin = config.exclusion_margin(length);
        for point in [trail.geometry().start(), trail.geometry().end()] {
            let at_original_end = point.distance_2d(&start) < 1e-9 || point.distance_2d(&end) < 1e-9;
            if !at_original_end {
                assert!(point.distance_2d(&start) > margin);
                assert!(point.distance_2d(&end) > margin);
            }
        }
    }

    // Idempotence: a fresh scan finds nothing, a second run changes nothing
    let kernel = PlanarKernel::default();
    let index = SpatialIndex::build(&trails);
    assert!(IntersectionDetector::new(&kernel, &config).detect(&trails, &index).is_empty());

    let again = resolve(&mut store, &config).unwrap();
    assert_eq!(again.segments_created, 0);
    assert_eq!(store.len(), trails.len());
}

#[test]
fn test_iteration_cap_always_terminates() {
    let mut store = grid();
    let config = PipelineConfig::default().with_single_phase(vec![ConflictKindTag::Crossing], 2);
    let (report, _) = run(&mut store, config);

    assert_eq!(report.phases.len(), 1);
    assert_eq!(report.phases[0].iterations, 2);
    assert_eq!(report.phases[0].termination, PhaseTermination::MaxIterationsReached);
    assert!(report.residual_conflict_count() > 0);
    assert!(report.errors.is_empty());
}

#[test]
fn test_duplicate_input_collapsed_before_resolution() {
    let mut store = MemoryTrailStore::from_trails([
        named("Ridge", &[(0.0, 50.0), (100.0, 50.0)]),
        named("Ridge copy", &[(100.0, 50.0), (0.0, 50.0)]),
        named("Creek", &[(50.0, 0.0), (50.0, 100.0)]),
    ]);
    let (report, _) = run(&mut store, PipelineConfig::default());

    assert_eq!(report.duplicates_removed, 1);
    assert!(by_name(&store, "Ridge copy").is_empty());
    assert_eq!(store.len(), 4);
}
