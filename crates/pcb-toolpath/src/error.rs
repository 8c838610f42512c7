use thiserror::Error;

use crate::drill::ToolId;
use crate::geometry::Point;
use crate::job::SequenceViolation;
use crate::nesting::LoopId;

/// Top-level error for a conversion run. Every variant aborts the run.
#[derive(Error, Debug)]
pub enum ToolpathError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to persist output: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// The sequencer produced an out-of-order move. Always a bug.
    #[error("internal sequencing error: {0}")]
    Sequence(#[from] SequenceViolation),
}

/// Malformed or unsupported input, with the position it was found at.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("parse error at line {line} (`{command}`): {kind}")]
pub struct ParseError {
    pub line: usize,
    pub command: String,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(line: usize, command: impl Into<String>, kind: ParseErrorKind) -> Self {
        Self {
            line,
            command: command.into(),
            kind,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("unrecognized command")]
    UnknownCommand,

    #[error("unsupported units {0} (only millimetres are accepted)")]
    UnsupportedUnits(String),

    #[error("unsupported feature: {0}")]
    Unsupported(String),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid number `{0}`")]
    InvalidNumber(String),

    #[error("aperture D{0} is not defined")]
    UndefinedAperture(u32),

    #[error("input is empty")]
    Empty,

    #[error("cannot tell whether the input is Gerber or Excellon")]
    UnknownFormat,
}

/// Topology the engine refuses to cut.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("open loop: boundary ends at {at} without closing")]
    OpenLoop { at: Point },

    #[error("ambiguous junction: {degree} segments meet at {at}")]
    AmbiguousJunction { at: Point, degree: usize },

    #[error("invalid nesting of loop {loop_id}: {reason}")]
    InvalidNesting { loop_id: LoopId, reason: String },

    #[error("offset of loop {loop_id} by {distance} mm collapses the path: {reason}")]
    OffsetCollapse {
        loop_id: LoopId,
        distance: f64,
        reason: String,
    },
}

/// Invalid job parameters or references.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{name} must be a finite number, got {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("height order violated: {0}")]
    HeightOrder(String),

    #[error("line {line} references tool {tool}, which is not in the tool table")]
    UnknownTool { tool: ToolId, line: usize },

    #[error("routed slot at line {line} needs tool {tool}, which is wider than the largest drill")]
    SlotWiderThanDrill { tool: ToolId, line: usize },
}
