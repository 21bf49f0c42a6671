//! Trail Network command line entry point
//!
//! Loads GPX files, resolves every intersection and near-miss endpoint, prints a summary and
//! optionally writes the resolved trails and a JSON report.

mod cli;
mod logging;

use clap::Parser;
use cli::Args;
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use trail_network_lib::{
    GraphSummary, MemoryTrailStore, PipelineConfig, ResolveReport, RoutingGraph, TrailError,
    TrailStore, ingest, resolve,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Trail(#[from] TrailError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything written by `--report-json`
#[derive(Serialize)]
struct JsonReport<'a> {
    config: &'a PipelineConfig,
    report: &'a ResolveReport,
    graph: GraphSummary,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::setup_logging(args.verbose);

    match run(&args) {
        Ok(report) if report.is_converged() && report.errors.is_empty() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<PipelineConfig, CliError> {
    let base = match &args.config {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            serde_json::from_reader(std::io::BufReader::new(file))?
        }
        None => PipelineConfig::default(),
    };
    let config = args.apply_overrides(base);
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<ResolveReport, CliError> {
    let config = load_config(args)?;
    let (trails, projection) = ingest::load_trails(args.gpx_files.as_slice())?;
    let mut store = MemoryTrailStore::from_trails(trails);

    let report = resolve(&mut store, &config)?;

    let live = store.live_trails().map_err(TrailError::from)?;
    let graph = RoutingGraph::build(&live, config.dedup_precision).summary();
    print_summary(&report, &graph);

    if let Some(path) = &args.output {
        ingest::write_trails(path, &live, &projection)?;
        tracing::info!("Wrote {} trails to {:?}", live.len(), path);
    }

    if let Some(path) = &args.report_json {
        let json = JsonReport {
            config: &config,
            report: &report,
            graph,
        };
        write_json(path, &json)?;
    }

    Ok(report)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    if path == Path::new("-") {
        serde_json::to_writer_pretty(std::io::stdout().lock(), value)?;
        println!();
    } else {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    }
    Ok(())
}

fn print_summary(report: &ResolveReport, graph: &GraphSummary) {
    println!("Segments created:      {}", report.segments_created);
    println!("Conflicts processed:   {}", report.conflicts_processed);
    println!("Duplicates removed:    {}", report.duplicates_removed);
    println!("Degenerate removed:    {}", report.degenerate_removed.len());
    for removed in &report.degenerate_removed {
        println!(
            "  {} {} ({:.1} m): {:?}",
            removed.trail,
            removed.name.as_deref().unwrap_or("<unnamed>"),
            removed.length,
            removed.reason
        );
    }
    for phase in &report.phases {
        println!(
            "Phase {:<15} {:?} after {} iterations ({} splits, {} failed)",
            phase.name, phase.termination, phase.iterations, phase.splits_applied, phase.conflicts_failed
        );
    }
    println!(
        "Trails:                {} ({:.1} km, {:.1} km with elevation)",
        report.network.trail_count,
        report.network.total_length / 1000.0,
        report.network.total_length_3d / 1000.0
    );
    println!(
        "Graph:                 {} nodes, {} edges, {} intersections, {} dead ends, {} components",
        graph.node_count, graph.edge_count, graph.intersections, graph.dead_ends, graph.components
    );
    println!("Unresolved endpoints:  {}", report.unresolved_endpoints.len());
    println!("Residual conflicts:    {}", report.residual_conflict_count());
    for conflict in &report.residual_conflicts {
        println!("  {}", conflict);
    }
    for error in &report.errors {
        println!("  error: {}", error);
    }
}
