use std::fmt::Write;

use crate::geometry::{round_f64, Point, EPSILON};
use crate::job::{Cut, CutKind, Job, JobStep, Move, MotionState, SequenceViolation, ToolChange};

/// Number formatting: four decimals, no negative zero.
fn num(v: f64) -> String {
    let r = round_f64(v, 4);
    let r = if r == 0.0 { 0.0 } else { r };
    format!("{r:.4}")
}

/// Renders jobs as G-code for GRBL, LinuxCNC or Mach3: metric, absolute, XY
/// plane, arcs with relative centres. Header comments are free text, one
/// line each.
#[derive(Debug, Clone, Default)]
pub struct GcodeEmitter {
    comments: Vec<String>,
}

/// Tracks the machine while rendering so only changed words are written.
struct Cursor {
    state: MotionState,
    at: Option<Point>,
    z: f64,
    feed: Option<f64>,
}

impl GcodeEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a comment line to the program header.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }

    /// Render a whole program. The job is replayed through the motion state
    /// machine; an out-of-order step is refused.
    pub fn render(&self, job: &Job) -> Result<String, SequenceViolation> {
        let mut out = self.header(job);
        let mut cursor = Cursor {
            state: MotionState::Idle,
            at: None,
            z: job.params.retract,
            feed: None,
        };

        for (index, step) in job.steps().iter().enumerate() {
            cursor.state = cursor.state.advance(step).ok_or(SequenceViolation {
                index,
                action: step.name(),
                state: cursor.state,
            })?;
            match step {
                JobStep::ToolChange(tc) => self.tool_change(&mut out, tc, job),
                JobStep::Move(m) => Self::motion(&mut out, &mut cursor, m),
            }
        }
        if !cursor.state.is_terminal() {
            return Err(SequenceViolation {
                index: job.steps().len(),
                action: "finish",
                state: cursor.state,
            });
        }

        out.push_str(&self.footer());
        Ok(out)
    }

    pub fn header(&self, job: &Job) -> String {
        let p = &job.params;
        let mut out = String::new();
        let _ = writeln!(out, "; Generated by pcb-toolpath {}", env!("CARGO_PKG_VERSION"));
        for c in &self.comments {
            let _ = writeln!(out, "; {c}");
        }
        let _ = writeln!(
            out,
            "; Heights: retract {} start {} end {}",
            num(p.retract),
            num(p.cut_start),
            num(p.cut_end)
        );
        let _ = writeln!(
            out,
            "; Feed: {} mm/min, plunge {} mm/min",
            num(p.feed),
            num(p.plunge_feed)
        );
        if let Some(d) = p.cutter_diameter {
            let _ = writeln!(out, "; Tool diameter: {}mm", num(d));
        }
        out.push_str("G21 G90 G17 G94 G40 G49\n");
        if let Some(rpm) = p.spindle_rpm {
            let _ = writeln!(out, "M03 S{rpm}");
        }
        let _ = writeln!(out, "G00 Z{}", num(p.retract));
        out
    }

    pub fn footer(&self) -> String {
        "M05\nM30\n".to_string()
    }

    fn tool_change(&self, out: &mut String, tc: &ToolChange, job: &Job) {
        if tc.is_milled() {
            let _ = writeln!(
                out,
                "T{} M06; {}mm hole, {}mm cutter",
                tc.tool.0,
                num(tc.hole_diameter),
                num(tc.cutter_diameter)
            );
        } else {
            let _ = writeln!(out, "T{} M06; {}mm", tc.tool.0, num(tc.hole_diameter));
        }
        if let Some(rpm) = job.params.spindle_rpm {
            let _ = writeln!(out, "M03 S{rpm}");
        }
    }

    fn motion(out: &mut String, cursor: &mut Cursor, m: &Move) {
        match *m {
            Move::Rapid { to } => {
                let _ = writeln!(out, "G00 X{} Y{}", num(to.x), num(to.y));
                cursor.at = Some(to);
            }
            Move::Plunge { to, z } | Move::Retract { to, z } => {
                if cursor.at.map_or(true, |at| !at.approx_eq(to)) {
                    let _ = writeln!(out, "G00 X{} Y{}", num(to.x), num(to.y));
                }
                let _ = writeln!(out, "G00 Z{}", num(z));
                cursor.at = Some(to);
                cursor.z = z;
            }
            Move::Cut(cut) => Self::cut(out, cursor, &cut),
        }
    }

    fn cut(out: &mut String, cursor: &mut Cursor, cut: &Cut) {
        let from = cursor.at.unwrap_or(cut.to);
        let mut line = match cut.kind {
            CutKind::Linear => "G01".to_string(),
            CutKind::Arc { clockwise: true, .. } => "G02".to_string(),
            CutKind::Arc { clockwise: false, .. } => "G03".to_string(),
        };

        let moves_xy = !from.approx_eq(cut.to);
        if moves_xy || matches!(cut.kind, CutKind::Arc { .. }) {
            let _ = write!(line, " X{} Y{}", num(cut.to.x), num(cut.to.y));
        }
        if (cut.z - cursor.z).abs() > EPSILON {
            let _ = write!(line, " Z{}", num(cut.z));
        }
        if let CutKind::Arc { center, .. } = cut.kind {
            let _ = write!(line, " I{} J{}", num(center.x - from.x), num(center.y - from.y));
        }
        if cursor.feed.map_or(true, |f| (f - cut.feed).abs() > EPSILON) {
            let _ = write!(line, " F{}", num(cut.feed));
            cursor.feed = Some(cut.feed);
        }
        out.push_str(&line);
        out.push('\n');

        cursor.at = Some(cut.to);
        cursor.z = cut.z;
    }
}

/// The job as pretty-printed JSON, coordinates rounded to six decimals.
pub fn to_json(job: &Job) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(job)
}
