use std::f64::consts::{FRAC_PI_2, PI};

use log::{debug, warn};

use crate::error::{ParseError, ParseErrorKind};
use crate::geometry::{Point, Segment, EPSILON};

use super::apertures::ApertureTable;
use super::commands::{ApertureTemplate, FileFunction, GerberCommand, Located, Polarity};
use super::coord::{Axis, CoordinateConverter, Units};

/// A geometric primitive produced by the Gerber state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// A D01 interpolation, either stroked with an aperture or a region edge.
    Draw(Segment),
    /// A D03 flash. Kept so callers can report it; it contributes no boundary.
    Flash(Flash),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flash {
    pub at: Point,
    pub aperture: ApertureTemplate,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpolationMode {
    Linear,
    ClockwiseArc,
    CounterClockwiseArc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuadrantMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Interpolate,
    Move,
    Flash,
}

/// Gerber state machine. Walks commands and produces primitives.
struct Interpreter {
    position: Option<(i64, i64)>,
    aperture: Option<u32>,
    interpolation: InterpolationMode,
    quadrant: QuadrantMode,
    last_operation: Option<Operation>,
    region_active: bool,
    format_set: bool,
    units_set: bool,
    converter: CoordinateConverter,
    apertures: ApertureTable,
    primitives: Vec<Primitive>,
}

impl Interpreter {
    fn new() -> Self {
        Self {
            position: None,
            aperture: None,
            interpolation: InterpolationMode::Linear,
            quadrant: QuadrantMode::Multi,
            last_operation: None,
            region_active: false,
            format_set: false,
            units_set: false,
            converter: CoordinateConverter::default(),
            apertures: ApertureTable::default(),
            primitives: Vec::new(),
        }
    }

    /// Process one command. Returns `false` once the end of file is reached.
    fn process(&mut self, located: &Located) -> Result<bool, ParseError> {
        let err = |kind| located.error(kind);

        match &located.command {
            GerberCommand::FormatSpec(fmt) => {
                self.converter.format = fmt.clone();
                self.format_set = true;
            }
            GerberCommand::Units(Units::Millimeters) => self.units_set = true,
            GerberCommand::Units(Units::Inches) => {
                return Err(err(ParseErrorKind::UnsupportedUnits("inch".to_string())));
            }
            GerberCommand::ApertureDefine { code, template } => {
                if self.apertures.define(*code, template.clone()) {
                    warn!("Gerber: line {}: aperture D{code} redefined", located.line);
                }
            }
            GerberCommand::SelectAperture(code) => self.aperture = Some(*code),
            GerberCommand::LinearMode => self.interpolation = InterpolationMode::Linear,
            GerberCommand::ClockwiseArcMode => {
                self.interpolation = InterpolationMode::ClockwiseArc;
            }
            GerberCommand::CounterClockwiseArcMode => {
                self.interpolation = InterpolationMode::CounterClockwiseArc;
            }
            GerberCommand::SingleQuadrant => self.quadrant = QuadrantMode::Single,
            GerberCommand::MultiQuadrant => self.quadrant = QuadrantMode::Multi,
            GerberCommand::AbsoluteMode => {}
            GerberCommand::IncrementalMode => {
                return Err(err(ParseErrorKind::Unsupported(
                    "incremental coordinates".to_string(),
                )));
            }
            GerberCommand::Polarity(Polarity::Dark) => {}
            GerberCommand::Polarity(Polarity::Clear) => {
                return Err(err(ParseErrorKind::Unsupported(
                    "clear polarity".to_string(),
                )));
            }
            GerberCommand::FileFunction(FileFunction::Profile) => {}
            GerberCommand::FileFunction(FileFunction::Other(func)) => {
                warn!("Gerber: file function is {func}, not Profile; treating draws as board edge");
            }
            GerberCommand::StepRepeat { x_repeat, y_repeat } => {
                if *x_repeat > 1 || *y_repeat > 1 {
                    return Err(err(ParseErrorKind::Unsupported(format!(
                        "step and repeat {x_repeat}x{y_repeat}"
                    ))));
                }
            }
            GerberCommand::RegionBegin => self.region_active = true,
            GerberCommand::RegionEnd => self.region_active = false,
            GerberCommand::Interpolate { x, y, i, j } => {
                self.last_operation = Some(Operation::Interpolate);
                self.interpolate(located, *x, *y, *i, *j)?;
            }
            GerberCommand::Move { x, y } => {
                self.last_operation = Some(Operation::Move);
                let target = self.target(located, *x, *y)?;
                self.position = Some(target);
            }
            GerberCommand::Flash { x, y } => {
                self.last_operation = Some(Operation::Flash);
                self.flash(located, *x, *y)?;
            }
            GerberCommand::Coordinates { x, y, i, j } => match self.last_operation {
                Some(Operation::Interpolate) => self.interpolate(located, *x, *y, *i, *j)?,
                Some(Operation::Move) => {
                    let target = self.target(located, *x, *y)?;
                    self.position = Some(target);
                }
                Some(Operation::Flash) => self.flash(located, *x, *y)?,
                None => return Err(err(ParseErrorKind::MissingField("operation code"))),
            },
            GerberCommand::EndOfFile => return Ok(false),
        }

        Ok(true)
    }

    /// Resolve modal coordinates into an absolute raw position.
    fn target(
        &mut self,
        located: &Located,
        x: Option<i64>,
        y: Option<i64>,
    ) -> Result<(i64, i64), ParseError> {
        if !self.format_set {
            return Err(located.error(ParseErrorKind::MissingField("format specification")));
        }
        if !self.units_set {
            warn!(
                "Gerber: line {}: no unit mode set, assuming millimetres",
                located.line
            );
            self.units_set = true;
        }
        match (self.position, x, y) {
            (_, Some(x), Some(y)) => Ok((x, y)),
            (Some((cx, cy)), x, y) => Ok((x.unwrap_or(cx), y.unwrap_or(cy))),
            (None, _, _) => Err(located.error(ParseErrorKind::MissingField("current point"))),
        }
    }

    fn to_point(&self, (x, y): (i64, i64)) -> Point {
        Point::new(
            self.converter.to_mm(x, Axis::X),
            self.converter.to_mm(y, Axis::Y),
        )
    }

    /// Regions need no aperture; strokes and flashes need a defined one.
    fn require_aperture(&self, located: &Located) -> Result<&ApertureTemplate, ParseError> {
        let code = self.aperture.unwrap_or(0);
        self.apertures
            .get(code)
            .ok_or_else(|| located.error(ParseErrorKind::UndefinedAperture(code)))
    }

    fn interpolate(
        &mut self,
        located: &Located,
        x: Option<i64>,
        y: Option<i64>,
        i: Option<i64>,
        j: Option<i64>,
    ) -> Result<(), ParseError> {
        let target = self.target(located, x, y)?;
        let Some(from) = self.position else {
            return Err(located.error(ParseErrorKind::MissingField("current point")));
        };
        if !self.region_active {
            self.require_aperture(located)?;
        }
        self.position = Some(target);

        let start = self.to_point(from);
        let end = self.to_point(target);

        let segment = match self.interpolation {
            InterpolationMode::Linear => Segment::Line { start, end },
            InterpolationMode::ClockwiseArc | InterpolationMode::CounterClockwiseArc => {
                if i.is_none() && j.is_none() {
                    return Err(located.error(ParseErrorKind::MissingField("I/J")));
                }
                let offset = Point::new(
                    self.converter.to_mm(i.unwrap_or(0), Axis::X),
                    self.converter.to_mm(j.unwrap_or(0), Axis::Y),
                );
                let clockwise = self.interpolation == InterpolationMode::ClockwiseArc;
                let center = match self.quadrant {
                    QuadrantMode::Multi => start + offset,
                    QuadrantMode::Single => {
                        if start.approx_eq(end) {
                            debug!(
                                "Gerber: line {}: zero-length single quadrant arc skipped",
                                located.line
                            );
                            return Ok(());
                        }
                        single_quadrant_center(start, end, offset, clockwise)
                    }
                };
                if start.dist(center) < EPSILON {
                    debug!("Gerber: line {}: zero-radius arc skipped", located.line);
                    return Ok(());
                }
                Segment::Arc {
                    start,
                    end,
                    center,
                    clockwise,
                }
            }
        };

        self.primitives.push(Primitive::Draw(segment));
        Ok(())
    }

    fn flash(&mut self, located: &Located, x: Option<i64>, y: Option<i64>) -> Result<(), ParseError> {
        if self.region_active {
            return Err(located.error(ParseErrorKind::Unsupported(
                "flash inside a region".to_string(),
            )));
        }
        let target = self.target(located, x, y)?;
        let aperture = self.require_aperture(located)?.clone();
        self.position = Some(target);
        self.primitives.push(Primitive::Flash(Flash {
            at: self.to_point(target),
            aperture,
            line: located.line,
        }));
        Ok(())
    }
}

/// Angle swept travelling from `start` to `end` around `center`.
fn sweep(start: Point, end: Point, center: Point, clockwise: bool) -> f64 {
    let a0 = (start.y - center.y).atan2(start.x - center.x);
    let a1 = (end.y - center.y).atan2(end.x - center.x);
    let ccw = (a1 - a0).rem_euclid(2.0 * PI);
    if clockwise {
        (2.0 * PI - ccw).rem_euclid(2.0 * PI)
    } else {
        ccw
    }
}

/// G74 offsets are unsigned. Pick the signed centre that sits equidistant from
/// both endpoints and sweeps no more than a quarter turn.
fn single_quadrant_center(start: Point, end: Point, offset: Point, clockwise: bool) -> Point {
    let (i, j) = (offset.x.abs(), offset.y.abs());
    let candidates = [
        Point::new(i, j),
        Point::new(-i, j),
        Point::new(i, -j),
        Point::new(-i, -j),
    ];

    let score = |c: &Point| {
        let center = start + *c;
        let radius_error = (start.dist(center) - end.dist(center)).abs();
        let over_quarter = sweep(start, end, center, clockwise) > FRAC_PI_2 + 1e-6;
        (over_quarter, radius_error)
    };

    let best = candidates
        .iter()
        .min_by(|a, b| {
            let (qa, ea) = score(a);
            let (qb, eb) = score(b);
            qa.cmp(&qb).then(ea.total_cmp(&eb))
        })
        .copied()
        .unwrap_or_default();
    start + best
}

/// Interpret a sequence of Gerber commands into primitives, in file order.
pub fn interpret(commands: &[Located]) -> Result<Vec<Primitive>, ParseError> {
    let mut interp = Interpreter::new();

    for located in commands {
        if !interp.process(located)? {
            break;
        }
    }

    Ok(interp.primitives)
}
