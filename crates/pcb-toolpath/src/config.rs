use serde::Serialize;

use crate::error::ConfigError;
use crate::geometry::{Point, EPSILON};
use crate::offset::MillingDirection;
use crate::InputFormat;

/// Everything the user can tune about a run. Heights are in millimetres
/// relative to the stock top, feeds in mm/min.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobConfig {
    /// Safe travel height.
    pub retract: f64,
    /// Height at which feed motion starts.
    pub cut_start: f64,
    /// Final cutting depth.
    pub cut_end: f64,
    /// Router diameter for edge cuts.
    pub tool_diameter: f64,
    /// Preferred start point; every loop or drill group starts nearest to it.
    pub entry: Option<Point>,
    pub feed: f64,
    /// Z feed for plunges and drilling. Falls back to `feed`.
    pub plunge_feed: Option<f64>,
    /// Maximum depth per lap. A single lap when unset.
    pub pass_depth: Option<f64>,
    pub spindle_rpm: Option<u32>,
    /// Holes wider than this are milled with a cutter of this diameter.
    pub max_drill: Option<f64>,
    pub milling: MillingDirection,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            retract: 20.0,
            cut_start: 1.0,
            cut_end: -1.65,
            tool_diameter: 2.0,
            entry: None,
            feed: 100.0,
            plunge_feed: None,
            pass_depth: None,
            spindle_rpm: None,
            max_drill: None,
            milling: MillingDirection::Conventional,
        }
    }
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets retract, cut-start and cut-end heights.
    pub fn with_heights(mut self, retract: f64, cut_start: f64, cut_end: f64) -> Self {
        self.retract = retract;
        self.cut_start = cut_start;
        self.cut_end = cut_end;
        self
    }

    pub fn with_tool_diameter(mut self, diameter: f64) -> Self {
        self.tool_diameter = diameter;
        self
    }

    pub fn with_entry(mut self, x: f64, y: f64) -> Self {
        self.entry = Some(Point::new(x, y));
        self
    }

    pub fn with_feed(mut self, feed: f64) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_plunge_feed(mut self, feed: f64) -> Self {
        self.plunge_feed = Some(feed);
        self
    }

    pub fn with_pass_depth(mut self, depth: f64) -> Self {
        self.pass_depth = Some(depth);
        self
    }

    pub fn with_spindle_rpm(mut self, rpm: u32) -> Self {
        self.spindle_rpm = Some(rpm);
        self
    }

    pub fn with_max_drill(mut self, diameter: f64) -> Self {
        self.max_drill = Some(diameter);
        self
    }

    pub fn with_milling(mut self, milling: MillingDirection) -> Self {
        self.milling = milling;
        self
    }

    /// Z feed actually used.
    pub fn effective_plunge_feed(&self) -> f64 {
        self.plunge_feed.unwrap_or(self.feed)
    }

    /// Depth of each lap, top to bottom, ending exactly at `cut_end`.
    pub fn pass_depths(&self) -> Vec<f64> {
        let Some(step) = self.pass_depth else {
            return vec![self.cut_end];
        };
        let mut depths = Vec::new();
        let mut z = self.cut_start;
        loop {
            z -= step;
            if z <= self.cut_end + EPSILON {
                depths.push(self.cut_end);
                return depths;
            }
            depths.push(z);
        }
    }

    /// Check the parameters before any geometry work. The router diameter
    /// only matters for edge cuts.
    pub fn validate(&self, format: InputFormat) -> Result<(), ConfigError> {
        finite("retract", self.retract)?;
        finite("cut start", self.cut_start)?;
        finite("cut end", self.cut_end)?;
        if let Some(entry) = self.entry {
            finite("entry x", entry.x)?;
            finite("entry y", entry.y)?;
        }

        if self.retract < self.cut_start {
            return Err(ConfigError::HeightOrder(format!(
                "retract {} is below cut start {}",
                self.retract, self.cut_start
            )));
        }
        if self.cut_end >= self.cut_start {
            return Err(ConfigError::HeightOrder(format!(
                "cut end {} is not below cut start {}",
                self.cut_end, self.cut_start
            )));
        }

        if format == InputFormat::Gerber {
            positive("tool diameter", self.tool_diameter)?;
        }
        positive("feed", self.feed)?;
        if let Some(v) = self.plunge_feed {
            positive("plunge feed", v)?;
        }
        if let Some(v) = self.pass_depth {
            positive("pass depth", v)?;
        }
        if let Some(v) = self.max_drill {
            positive("max drill", v)?;
        }
        if self.spindle_rpm == Some(0) {
            return Err(ConfigError::NonPositive {
                name: "spindle rpm",
                value: 0.0,
            });
        }
        Ok(())
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite { name, value })
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}
