use clap::Parser;
use std::path::PathBuf;
use trail_network_lib::{ConflictKindTag, PipelineConfig};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Trail Network - Split GPX trails at their intersections into a routable network
pub struct Args {
    /// GPX files to resolve
    #[clap(value_name = "FILE", required = true)]
    pub gpx_files: Vec<PathBuf>,

    /// JSON pipeline configuration; command line options override it
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Distance in meters under which trails interact
    #[clap(long)]
    pub intersection_tolerance: Option<f64>,

    /// Search radius in meters for connecting free endpoints
    #[clap(long)]
    pub snap_tolerance: Option<f64>,

    /// Shortest segment a split may produce, in meters
    #[clap(long)]
    pub min_segment_length: Option<f64>,

    /// Iteration cap applied to every phase
    #[clap(long)]
    pub max_iterations: Option<usize>,

    /// Skip endpoint snapping
    #[clap(long, default_value = "false")]
    pub no_snap: bool,

    /// Write the resolved trails to this GPX file
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write the full JSON report to this file ("-" for stdout)
    #[clap(long, value_name = "FILE")]
    pub report_json: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Apply the command line overrides on top of a base configuration
    pub fn apply_overrides(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(tolerance) = self.intersection_tolerance {
            config.intersection_tolerance = tolerance;
        }
        if let Some(tolerance) = self.snap_tolerance {
            config.snap_tolerance = tolerance;
        }
        if let Some(length) = self.min_segment_length {
            config.min_segment_length = length;
        }
        if let Some(cap) = self.max_iterations {
            for phase in &mut config.phases {
                phase.max_iterations = cap;
            }
        }
        if self.no_snap {
            for phase in &mut config.phases {
                phase.kinds.retain(|k| *k != ConflictKindTag::NearMissEndpoint);
            }
        }
        config
    }
}
