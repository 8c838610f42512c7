pub mod assembly;
pub mod config;
pub mod drill;
pub mod emit;
pub mod error;
pub mod geometry;
pub mod job;
pub mod nesting;
pub mod offset;
pub mod parsers;
pub mod sequence;

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use config::JobConfig;
use drill::NearestNeighbor;
use error::{ParseError, ParseErrorKind, ToolpathError};
use job::{Job, ToolChange};
use sequence::Sequencer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// RS-274X edge cuts.
    Gerber,
    /// Excellon drill file.
    Excellon,
}

/// Detect format from file extension.
pub fn detect_format(path: &Path) -> Option<InputFormat> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("gbr" | "ger" | "gm1" | "gml" | "gko" | "gbl" | "gtl" | "gbs" | "gts" | "gbo"
        | "gto" | "gbp" | "gtp" | "pho" | "art") => Some(InputFormat::Gerber),
        Some("drl" | "xln" | "exc" | "ncd") => Some(InputFormat::Excellon),
        _ => None,
    }
}

/// Detect format from content: an `M48` header means Excellon, a format
/// specification means Gerber.
pub fn sniff_format(text: &str) -> Option<InputFormat> {
    for line in text.lines().map(str::trim) {
        if line.starts_with("M48") {
            return Some(InputFormat::Excellon);
        }
        if line.starts_with("%FS") {
            return Some(InputFormat::Gerber);
        }
    }
    None
}

/// Pick the format for a file: the forced one, then extension, then content.
pub fn resolve_format(
    path: &Path,
    text: &str,
    forced: Option<InputFormat>,
) -> Result<InputFormat, ParseError> {
    forced
        .or_else(|| detect_format(path))
        .or_else(|| sniff_format(text))
        .ok_or_else(|| ParseError::new(1, path.display().to_string(), ParseErrorKind::UnknownFormat))
}

/// Parse an edge-cuts Gerber and plan the router job around its outlines.
pub fn plan_edge_cuts(text: &str, config: &JobConfig) -> Result<Job, ToolpathError> {
    config.validate(InputFormat::Gerber)?;

    let primitives = parsers::gerber::parse(text)?;
    let segments = parsers::gerber::edge_segments(&primitives);
    let loops = assembly::assemble(&segments)?;
    if loops.is_empty() {
        warn!("no closed outlines found; the program will not cut anything");
    }
    let forest = nesting::resolve(loops)?;
    let paths = offset::offset_forest(&forest, config.tool_diameter, config.milling)?;
    let job = Sequencer::new(config).route(&forest, &paths)?;

    info!(
        "edge cuts: {} loops, {} steps",
        forest.len(),
        job.steps().len()
    );
    Ok(job)
}

/// Parse an Excellon file and plan the drilling job, one group per tool.
pub fn plan_drilling(text: &str, config: &JobConfig) -> Result<Job, ToolpathError> {
    config.validate(InputFormat::Excellon)?;

    let file = parsers::excellon::parse(text)?;
    let groups = drill::group_hits(&file.tools, &file.hits, &file.routes)?;
    let groups = drill::order_groups(groups, config.entry, &NearestNeighbor);
    let job = Sequencer::new(config).drill(&groups)?;

    info!(
        "drilling: {} hits and {} slots with {} tools, {} steps",
        file.hits.len(),
        file.routes.len(),
        groups.len(),
        job.steps().len()
    );
    Ok(job)
}

pub fn plan(text: &str, format: InputFormat, config: &JobConfig) -> Result<Job, ToolpathError> {
    match format {
        InputFormat::Gerber => plan_edge_cuts(text, config),
        InputFormat::Excellon => plan_drilling(text, config),
    }
}

/// Output path for one tool of a split drill job: `board_T3(0.8mm).nc`.
pub fn split_output_path(output: &Path, tc: &ToolChange) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!("{stem}_T{}({}mm)", tc.tool.0, tc.hole_diameter);
    if let Some(ext) = output.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    output.with_file_name(name)
}
