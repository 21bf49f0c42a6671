//! Iteration controller
//!
//! Runs the configured phases in order. Each phase repeats scan, prioritize and split until a
//! scan finds nothing to do, a whole scan applies nothing, or the phase's iteration cap is hit.
//! Conflicts are never carried between scans; only the keys of failed conflicts are, so that an
//! unsplittable conflict is attempted once per run.

use crate::config::{PhaseConfig, PipelineConfig};
use crate::conflict::{Conflict, ConflictKey, ConflictKind};
use crate::detector::IntersectionDetector;
use crate::geometry::{GeometryKernel, PlanarKernel};
use crate::observer::{NoopObserver, ResolveObserver, TracingObserver};
use crate::snapper::{EndpointSnapper, UnresolvedEndpoint};
use crate::spatial_index::SpatialIndex;
use crate::splitter::TrailSplitter;
use crate::store::{NetworkInfo, TrailStore};
use crate::trail::{SegmentId, Trail};
use crate::validation::{self, DuplicateIndex, RemovedTrail};
use crate::{ErrorClass, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Why a phase stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PhaseTermination {
    /// A scan found no actionable conflict
    Converged,
    /// Conflicts remained but a whole scan applied nothing
    Stalled,
    /// The iteration cap was reached
    MaxIterationsReached,
}

/// Summary of one phase
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseReport {
    pub name: String,
    /// Scans that attempted at least one mutation
    pub iterations: usize,
    pub splits_applied: usize,
    pub segments_created: usize,
    pub conflicts_failed: usize,
    pub termination: PhaseTermination,
    /// Actionable conflicts left when the phase stopped
    pub residual_conflicts: usize,
}

/// A conflict that could not be resolved and will not be retried this run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FailedConflict {
    pub key: ConflictKey,
    pub kind: ConflictKind,
    pub reason: String,
}

/// Result of a resolve run
///
/// Always returned unless a fatal error aborts the run.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResolveReport {
    /// Child rows inserted by splits
    pub segments_created: usize,
    /// Split attempts (successful or not)
    pub conflicts_processed: usize,
    /// Conflicts still present after the final scan
    pub residual_conflicts: Vec<Conflict>,
    pub failed_conflicts: Vec<FailedConflict>,
    /// Free endpoints that could not be connected
    pub unresolved_endpoints: Vec<UnresolvedEndpoint>,
    /// Invariant violations, one line each
    pub errors: Vec<String>,
    pub phases: Vec<PhaseReport>,
    pub duplicates_removed: usize,
    /// Trails dropped as too short or not simple, before or after the phases
    pub degenerate_removed: Vec<RemovedTrail>,
    /// Statistics of the final trail set
    pub network: NetworkInfo,
}

impl ResolveReport {
    #[inline]
    pub fn residual_conflict_count(&self) -> usize {
        self.residual_conflicts.len()
    }

    /// No conflict is left
    #[inline]
    pub fn is_converged(&self) -> bool {
        self.residual_conflicts.is_empty()
    }
}

/// Drives detection and splitting to convergence
pub struct IterationController<K: GeometryKernel, O: ResolveObserver = NoopObserver> {
    config: PipelineConfig,
    kernel: K,
    observer: O,
}

impl<K: GeometryKernel> IterationController<K, NoopObserver> {
    pub fn new(config: PipelineConfig, kernel: K) -> Self {
        Self {
            config,
            kernel,
            observer: NoopObserver,
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<K: GeometryKernel, O: ResolveObserver> IterationController<K, O> {
    /// Replace the observer
    pub fn with_observer<P: ResolveObserver>(self, observer: P) -> IterationController<K, P> {
        IterationController {
            config: self.config,
            kernel: self.kernel,
            observer,
        }
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// Resolve every configured phase against the store
    ///
    /// # Returns
    /// The run report, or an error if the configuration is invalid or the store fails
    pub fn run<S: TrailStore>(&mut self, store: &mut S) -> Result<ResolveReport> {
        #[cfg(feature = "profiling")]
        profiling::scope!("controller::run");

        self.config.validate()?;
        let mut report = ResolveReport {
            degenerate_removed: validation::remove_degenerate(
                store,
                &self.kernel,
                self.config.min_trail_length,
            )?,
            duplicates_removed: validation::dedup(store, self.config.dedup_precision)?,
            ..Default::default()
        };

        let mut failed: HashSet<ConflictKey> = HashSet::new();
        let phases = self.config.phases.clone();
        for phase in &phases {
            let phase_report = self.run_phase(phase, store, &mut failed, &mut report)?;
            self.observer.on_phase_finished(&phase_report);
            report.phases.push(phase_report);
        }

        report.degenerate_removed.extend(validation::remove_degenerate(
            store,
            &self.kernel,
            self.config.min_trail_length,
        )?);
        report.duplicates_removed += validation::dedup(store, self.config.dedup_precision)?;

        self.final_scan(store, &mut report)?;
        report.network = store.info()?;

        tracing::info!(
            "Resolve finished: {} segments created, {} conflicts processed, {} residual, {} failed, {} errors",
            report.segments_created,
            report.conflicts_processed,
            report.residual_conflict_count(),
            report.failed_conflicts.len(),
            report.errors.len()
        );
        Ok(report)
    }

    fn run_phase<S: TrailStore>(
        &mut self,
        phase: &PhaseConfig,
        store: &mut S,
        failed: &mut HashSet<ConflictKey>,
        report: &mut ResolveReport,
    ) -> Result<PhaseReport> {
        self.observer.on_phase_started(phase);

        let mut phase_report = PhaseReport {
            name: phase.name.clone(),
            iterations: 0,
            splits_applied: 0,
            segments_created: 0,
            conflicts_failed: 0,
            termination: PhaseTermination::Converged,
            residual_conflicts: 0,
        };

        loop {
            let trails = store.live_trails()?;
            let index = SpatialIndex::build(&trails);
            let candidates = self.candidates(phase, &trails, &index, failed);
            for conflict in &candidates {
                self.observer.on_conflict_detected(conflict);
            }

            if candidates.is_empty() {
                phase_report.termination = PhaseTermination::Converged;
                break;
            }
            if phase_report.iterations >= phase.max_iterations {
                phase_report.termination = PhaseTermination::MaxIterationsReached;
                phase_report.residual_conflicts = candidates.len();
                break;
            }
            phase_report.iterations += 1;

            let splitter = TrailSplitter::new(&self.kernel, &self.config);
            let mut duplicates = DuplicateIndex::build(&trails, self.config.dedup_precision);
            let mut touched: HashSet<SegmentId> = HashSet::new();
            let mut applied_this_scan = 0;

            for conflict in &candidates {
                // Geometry of a trail rewritten earlier in this scan is stale
                if touched.contains(&conflict.a) || touched.contains(&conflict.b) {
                    continue;
                }
                report.conflicts_processed += 1;

                let plan = splitter.plan(conflict);
                match splitter.apply(&plan, store, &mut duplicates) {
                    Ok(applied) => {
                        touched.extend(applied.touched());
                        applied_this_scan += 1;
                        phase_report.splits_applied += 1;
                        phase_report.segments_created += applied.segments_created();
                        report.segments_created += applied.segments_created();
                        self.observer.on_split_applied(&applied);
                    }
                    Err(err) => {
                        let class = err.class();
                        if class == ErrorClass::Fatal {
                            return Err(err);
                        }
                        if class == ErrorClass::Invariant {
                            report.errors.push(format!("{conflict}: {err}"));
                        }
                        let failure = FailedConflict {
                            key: conflict.key(),
                            kind: conflict.kind,
                            reason: err.to_string(),
                        };
                        failed.insert(failure.key);
                        phase_report.conflicts_failed += 1;
                        self.observer.on_conflict_failed(&failure);
                        report.failed_conflicts.push(failure);
                    }
                }
            }

            if applied_this_scan == 0 {
                phase_report.termination = PhaseTermination::Stalled;
                phase_report.residual_conflicts = candidates.len();
                break;
            }
        }

        Ok(phase_report)
    }

    /// Actionable conflicts of a phase, highest priority first, one per trail pair
    fn candidates(
        &self,
        phase: &PhaseConfig,
        trails: &[Arc<Trail>],
        index: &SpatialIndex,
        failed: &HashSet<ConflictKey>,
    ) -> Vec<Conflict> {
        let mut conflicts = IntersectionDetector::new(&self.kernel, &self.config).detect(trails, index);
        if phase.snaps_endpoints() {
            let snap = EndpointSnapper::new(&self.kernel, &self.config).scan(trails, index);
            conflicts.extend(snap.conflicts);
        }

        conflicts.retain(|c| phase.rank(c.kind.tag()).is_some() && !failed.contains(&c.key()));
        conflicts.sort_by(|x, y| x.priority_cmp(y, phase));

        let mut seen: HashSet<ConflictKey> = HashSet::with_capacity(conflicts.len());
        conflicts.retain(|c| seen.insert(c.key()));
        conflicts
    }

    /// Record what is left after every phase ran
    fn final_scan<S: TrailStore>(&self, store: &S, report: &mut ResolveReport) -> Result<()> {
        let trails = store.live_trails()?;
        let index = SpatialIndex::build(&trails);
        let kinds = self.config.all_kinds();

        let mut residual = IntersectionDetector::new(&self.kernel, &self.config).detect(&trails, &index);
        if self.config.phases.iter().any(PhaseConfig::snaps_endpoints) {
            let snap = EndpointSnapper::new(&self.kernel, &self.config).scan(&trails, &index);
            residual.extend(snap.conflicts);
            report.unresolved_endpoints = snap.unresolved;
        }
        residual.retain(|c| kinds.contains(&c.kind.tag()));

        let mut seen: HashSet<ConflictKey> = HashSet::with_capacity(residual.len());
        residual.retain(|c| seen.insert(c.key()));
        residual.sort_by_key(Conflict::key);

        report.residual_conflicts = residual;
        Ok(())
    }
}

/// Resolve a trail set with the planar kernel, logging progress through `tracing`
pub fn resolve<S: TrailStore>(store: &mut S, config: &PipelineConfig) -> Result<ResolveReport> {
    IterationController::new(config.clone(), PlanarKernel::new(config.vertex_epsilon))
        .with_observer(TracingObserver)
        .run(store)
}
