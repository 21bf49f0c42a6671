//! Progress events of a resolve run
//!
//! The controller reports phases, detections, splits and failures through [`ResolveObserver`];
//! logging and counting live in the implementations below rather than in the algorithms.

use crate::config::PhaseConfig;
use crate::conflict::{Conflict, ConflictKindTag};
use crate::controller::{FailedConflict, PhaseReport};
use crate::splitter::AppliedSplit;
use std::collections::BTreeMap;

/// Receives structured events from the iteration controller.
///
/// Every method has an empty default, so implementations only override what they need.
/// Events are emitted sequentially from the thread running the controller.
pub trait ResolveObserver {
    /// A phase is about to run its first scan
    fn on_phase_started(&mut self, _phase: &PhaseConfig) {}
    /// A scan found an actionable conflict
    fn on_conflict_detected(&mut self, _conflict: &Conflict) {}
    /// A split was committed
    fn on_split_applied(&mut self, _applied: &AppliedSplit) {}
    /// A conflict entered the failed set
    fn on_conflict_failed(&mut self, _failed: &FailedConflict) {}
    /// A phase terminated
    fn on_phase_finished(&mut self, _report: &PhaseReport) {}
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResolveObserver for NoopObserver {}

/// Emits events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ResolveObserver for TracingObserver {
    fn on_phase_started(&mut self, phase: &PhaseConfig) {
        tracing::info!(
            "Phase '{}' started (kinds: {:?}, max {} iterations)",
            phase.name,
            phase.kinds,
            phase.max_iterations
        );
    }

    fn on_conflict_detected(&mut self, conflict: &Conflict) {
        tracing::trace!("Detected {}", conflict);
    }

    fn on_split_applied(&mut self, applied: &AppliedSplit) {
        tracing::debug!(
            "Resolved {} {}: {} parents replaced by {} segments",
            applied.kind,
            applied.key,
            applied.replaced.len(),
            applied.segments_created()
        );
    }

    fn on_conflict_failed(&mut self, failed: &FailedConflict) {
        tracing::warn!("Failed to resolve {} {}: {}", failed.kind, failed.key, failed.reason);
    }

    fn on_phase_finished(&mut self, report: &PhaseReport) {
        tracing::info!(
            "Phase '{}' finished: {:?} after {} iterations, {} splits, {} failed, {} residual",
            report.name,
            report.termination,
            report.iterations,
            report.splits_applied,
            report.conflicts_failed,
            report.residual_conflicts
        );
    }
}

/// Counts events, for callers that want numbers instead of logs.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    /// Names of the phases started, in order
    pub phases_started: Vec<String>,
    pub phases_finished: Vec<PhaseReport>,
    pub conflicts_detected: usize,
    /// Detections per kind family
    pub detected_by_kind: BTreeMap<ConflictKindTag, usize>,
    pub splits_applied: usize,
    pub segments_created: usize,
    pub conflicts_failed: usize,
}

impl ResolveObserver for RecordingObserver {
    fn on_phase_started(&mut self, phase: &PhaseConfig) {
        self.phases_started.push(phase.name.clone());
    }

    fn on_conflict_detected(&mut self, conflict: &Conflict) {
        self.conflicts_detected += 1;
        *self.detected_by_kind.entry(conflict.kind.tag()).or_default() += 1;
    }

    fn on_split_applied(&mut self, applied: &AppliedSplit) {
        self.splits_applied += 1;
        self.segments_created += applied.segments_created();
    }

    fn on_conflict_failed(&mut self, _failed: &FailedConflict) {
        self.conflicts_failed += 1;
    }

    fn on_phase_finished(&mut self, report: &PhaseReport) {
        self.phases_finished.push(report.clone());
    }
}
