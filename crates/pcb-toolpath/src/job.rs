use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::drill::ToolId;
use crate::geometry::{serialize_f64_rounded, serialize_opt_point, Point};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CutKind {
    Linear,
    Arc { center: Point, clockwise: bool },
}

/// Feed move at cutting depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cut {
    pub to: Point,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub z: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub feed: f64,
    pub kind: CutKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    /// Travel at retract height.
    Rapid { to: Point },
    /// Drop to the cut-start height above `to`.
    Plunge {
        to: Point,
        #[serde(serialize_with = "serialize_f64_rounded")]
        z: f64,
    },
    Cut(Cut),
    /// Lift back to the retract height.
    Retract {
        to: Point,
        #[serde(serialize_with = "serialize_f64_rounded")]
        z: f64,
    },
}

impl Move {
    pub fn to(&self) -> Point {
        match *self {
            Move::Rapid { to } | Move::Plunge { to, .. } | Move::Retract { to, .. } => to,
            Move::Cut(cut) => cut.to,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Move::Rapid { .. } => "rapid",
            Move::Plunge { .. } => "plunge",
            Move::Cut(_) => "cut",
            Move::Retract { .. } => "retract",
        }
    }
}

/// Marks the start of a drill group. The cutter can be smaller than the hole
/// when the hole is milled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToolChange {
    pub tool: ToolId,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub hole_diameter: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub cutter_diameter: f64,
}

impl ToolChange {
    /// True when the hole is cut out with a smaller cutter.
    pub fn is_milled(&self) -> bool {
        self.cutter_diameter < self.hole_diameter
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    Move(Move),
    ToolChange(ToolChange),
}

impl JobStep {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            JobStep::Move(m) => m.name(),
            JobStep::ToolChange(_) => "tool change",
        }
    }
}

impl From<Move> for JobStep {
    fn from(m: Move) -> Self {
        JobStep::Move(m)
    }
}

impl From<ToolChange> for JobStep {
    fn from(tc: ToolChange) -> Self {
        JobStep::ToolChange(tc)
    }
}

/// Settings the job was planned with. Carried along so renderers can write
/// a self-describing header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobParams {
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub retract: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub cut_start: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub cut_end: f64,
    #[serde(serialize_with = "serialize_opt_point")]
    pub entry: Option<Point>,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub feed: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub plunge_feed: f64,
    /// Router diameter for edge jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutter_diameter: Option<f64>,
    /// Drill tools in the order they are used.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spindle_rpm: Option<u32>,
}

/// Where the spindle is in the cutting cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Idle,
    RapidPositioned,
    Plunged,
    Cutting,
    Retracted,
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MotionState::Idle => "idle",
            MotionState::RapidPositioned => "rapid-positioned",
            MotionState::Plunged => "plunged",
            MotionState::Cutting => "cutting",
            MotionState::Retracted => "retracted",
        };
        f.write_str(s)
    }
}

impl MotionState {
    /// The state after `step`, or `None` when the step is not allowed here.
    pub fn advance(self, step: &JobStep) -> Option<MotionState> {
        use MotionState::*;
        match (self, step) {
            (Idle | Retracted, JobStep::Move(Move::Rapid { .. })) => Some(RapidPositioned),
            (RapidPositioned, JobStep::Move(Move::Plunge { .. })) => Some(Plunged),
            (Plunged | Cutting, JobStep::Move(Move::Cut(_))) => Some(Cutting),
            (Plunged | Cutting, JobStep::Move(Move::Retract { .. })) => Some(Retracted),
            (Idle | Retracted, JobStep::ToolChange(_)) => Some(Idle),
            _ => None,
        }
    }

    /// A job may only end with the tool up.
    pub fn is_terminal(self) -> bool {
        matches!(self, MotionState::Idle | MotionState::Retracted)
    }
}

/// A step that breaks the motion cycle. Only the sequencer builds jobs, so
/// this always points at a bug there.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("step {index}: {action} is not allowed while {state}")]
pub struct SequenceViolation {
    pub index: usize,
    pub action: &'static str,
    pub state: MotionState,
}

/// Replay `steps` through the state machine from `Idle`.
pub fn check_sequence(steps: &[JobStep]) -> Result<MotionState, SequenceViolation> {
    let mut state = MotionState::Idle;
    for (index, step) in steps.iter().enumerate() {
        state = state.advance(step).ok_or(SequenceViolation {
            index,
            action: step.name(),
            state,
        })?;
    }
    Ok(state)
}

/// Ordered moves and tool-change markers. Only [`JobBuilder`] makes one, and
/// it checks every step against the rapid, plunge, cut, retract cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub params: JobParams,
    steps: Vec<JobStep>,
}

impl Job {
    pub fn steps(&self) -> &[JobStep] {
        &self.steps
    }

    pub fn moves(&self) -> impl Iterator<Item = &Move> {
        self.steps.iter().filter_map(|s| match s {
            JobStep::Move(m) => Some(m),
            JobStep::ToolChange(_) => None,
        })
    }

    /// Split a drill job at its tool changes. Each part holds one tool and
    /// is a valid job of its own. A job without tool changes comes back whole.
    pub fn split_by_tool(&self) -> Vec<(Option<ToolChange>, Job)> {
        let mut parts: Vec<(Option<ToolChange>, Vec<JobStep>)> = Vec::new();
        for step in &self.steps {
            match step {
                JobStep::ToolChange(tc) => parts.push((Some(*tc), vec![*step])),
                JobStep::Move(_) => match parts.last_mut() {
                    Some((_, steps)) => steps.push(*step),
                    None => parts.push((None, vec![*step])),
                },
            }
        }
        if parts.is_empty() {
            return vec![(None, self.clone())];
        }
        parts
            .into_iter()
            .map(|(tc, steps)| {
                let mut params = self.params.clone();
                params.tools = tc.into_iter().collect();
                (tc, Job { params, steps })
            })
            .collect()
    }
}

#[cfg(test)]
impl Job {
    /// Bypasses the builder so renderers can be fed a broken job.
    pub(crate) fn from_steps_unchecked(params: JobParams, steps: Vec<JobStep>) -> Self {
        Self { params, steps }
    }
}

/// Collects steps for a [`Job`], rejecting any that break the motion cycle.
#[derive(Debug)]
pub struct JobBuilder {
    params: JobParams,
    steps: Vec<JobStep>,
    state: MotionState,
}

impl JobBuilder {
    pub fn new(params: JobParams) -> Self {
        Self {
            params,
            steps: Vec::new(),
            state: MotionState::Idle,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn push(&mut self, step: impl Into<JobStep>) -> Result<(), SequenceViolation> {
        let step = step.into();
        self.state = self.state.advance(&step).ok_or(SequenceViolation {
            index: self.steps.len(),
            action: step.name(),
            state: self.state,
        })?;
        self.steps.push(step);
        Ok(())
    }

    pub fn rapid(&mut self, to: Point) -> Result<(), SequenceViolation> {
        self.push(Move::Rapid { to })
    }

    pub fn plunge(&mut self, to: Point, z: f64) -> Result<(), SequenceViolation> {
        self.push(Move::Plunge { to, z })
    }

    pub fn cut(&mut self, to: Point, z: f64, feed: f64, kind: CutKind) -> Result<(), SequenceViolation> {
        self.push(Move::Cut(Cut { to, z, feed, kind }))
    }

    pub fn retract(&mut self, to: Point, z: f64) -> Result<(), SequenceViolation> {
        self.push(Move::Retract { to, z })
    }

    pub fn tool_change(&mut self, tc: ToolChange) -> Result<(), SequenceViolation> {
        self.params.tools.push(tc);
        self.push(tc)
    }

    /// Close the job. Fails if the tool is still down or hovering.
    pub fn finish(self) -> Result<Job, SequenceViolation> {
        if !self.state.is_terminal() {
            return Err(SequenceViolation {
                index: self.steps.len(),
                action: "finish",
                state: self.state,
            });
        }
        Ok(Job {
            params: self.params,
            steps: self.steps,
        })
    }
}
