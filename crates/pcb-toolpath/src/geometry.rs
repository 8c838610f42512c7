use std::f64::consts::PI;
use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::ser::Serializer;
use serde::Serialize;

/// Tolerance in millimetres for endpoint matching and containment tests.
pub const EPSILON: f64 = 1e-6;

/// Maximum sweep of one chord when an arc is approximated by lines (2°).
const ARC_CHORD_SWEEP: f64 = PI / 90.0;

/// Round a float to N decimal places.
pub fn round_f64(v: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (v * factor).round() / factor
}

/// Wrapper that rounds f64 to 6 decimal places on serialization.
pub(crate) fn serialize_f64_rounded<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_f64(*v, 6))
}

pub(crate) fn serialize_opt_point<S: Serializer>(
    p: &Option<Point>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match p {
        Some(pt) => s.serialize_some(pt),
        None => s.serialize_none(),
    }
}

// ─── Point ───────────────────────────────────────────────────────────

/// A position on the board in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dist(self, other: Point) -> f64 {
        self.dist_sq(other).sqrt()
    }

    pub fn dist_sq(self, other: Point) -> f64 {
        let d = self - other;
        d.x * d.x + d.y * d.y
    }

    pub fn approx_eq(self, other: Point) -> bool {
        (self.x - other.x).abs() <= EPSILON && (self.y - other.y).abs() <= EPSILON
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 2D cross product.
    pub fn cross(self, other: Point) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Unit vector in the same direction, or `None` for a zero vector.
    pub fn normalized(self) -> Option<Point> {
        let len = self.length();
        if len <= f64::EPSILON {
            None
        } else {
            Some(Point::new(self.x / len, self.y / len))
        }
    }

    /// Left-hand perpendicular (rotated +90°).
    pub fn perp(self) -> Point {
        Point::new(-self.y, self.x)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.x, self.y)
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        [round_f64(self.x, 6), round_f64(self.y, 6)].serialize(s)
    }
}

// ─── Segment ─────────────────────────────────────────────────────────

/// A drawn boundary piece. Stored as parsed; orientation only matters once a
/// loop has been assembled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    Line {
        start: Point,
        end: Point,
    },
    Arc {
        start: Point,
        end: Point,
        center: Point,
        clockwise: bool,
    },
}

impl Segment {
    pub fn start(&self) -> Point {
        match *self {
            Segment::Line { start, .. } | Segment::Arc { start, .. } => start,
        }
    }

    pub fn end(&self) -> Point {
        match *self {
            Segment::Line { end, .. } | Segment::Arc { end, .. } => end,
        }
    }

    /// The same geometry traversed the other way.
    pub fn reversed(&self) -> Segment {
        match *self {
            Segment::Line { start, end } => Segment::Line {
                start: end,
                end: start,
            },
            Segment::Arc {
                start,
                end,
                center,
                clockwise,
            } => Segment::Arc {
                start: end,
                end: start,
                center,
                clockwise: !clockwise,
            },
        }
    }

    /// A line whose endpoints coincide draws nothing.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Segment::Line { start, end } if start.approx_eq(*end))
    }

    /// An arc returning to its own start sweeps the whole circle.
    pub fn is_full_circle(&self) -> bool {
        matches!(self, Segment::Arc { start, end, .. } if start.approx_eq(*end))
    }

    /// Approximate the segment by a polyline, start and end included.
    pub fn flatten(&self) -> Vec<Point> {
        match *self {
            Segment::Line { start, end } => vec![start, end],
            Segment::Arc {
                start,
                end,
                center,
                clockwise,
            } => arc_points(start, end, center, clockwise),
        }
    }
}

/// Sample an arc at most [`ARC_CHORD_SWEEP`] apart. The final point is the
/// exact arc end so assembled loops stay closed.
fn arc_points(start: Point, end: Point, center: Point, clockwise: bool) -> Vec<Point> {
    let radius = start.dist(center);
    if radius < EPSILON {
        return vec![start, end];
    }

    let start_angle = (start.y - center.y).atan2(start.x - center.x);
    let mut end_angle = (end.y - center.y).atan2(end.x - center.x);

    if start.approx_eq(end) {
        end_angle = if clockwise {
            start_angle - 2.0 * PI
        } else {
            start_angle + 2.0 * PI
        };
    } else if clockwise {
        if end_angle >= start_angle {
            end_angle -= 2.0 * PI;
        }
    } else if end_angle <= start_angle {
        end_angle += 2.0 * PI;
    }

    let sweep = (end_angle - start_angle).abs();
    let num_segments = ((sweep / ARC_CHORD_SWEEP - 1e-9).ceil() as usize).max(2);

    let mut points = Vec::with_capacity(num_segments + 1);
    for k in 0..num_segments {
        let t = k as f64 / num_segments as f64;
        let angle = start_angle + t * (end_angle - start_angle);
        points.push(Point::new(
            center.x + radius * angle.cos(),
            center.y + radius * angle.sin(),
        ));
    }
    points.push(end);
    points
}

// ─── Polygon helpers ─────────────────────────────────────────────────
//
// All rings below are closed: the last point repeats the first.

/// Shoelace area; positive when the ring winds counter-clockwise.
pub fn signed_area(ring: &[Point]) -> f64 {
    ring.windows(2).map(|w| w[0].cross(w[1])).sum::<f64>() / 2.0
}

/// Odd-even ray cast. Points exactly on the boundary may land either way.
pub fn point_in_polygon(pt: Point, ring: &[Point]) -> bool {
    let mut inside = false;
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a.y > pt.y) != (b.y > pt.y) {
            let x_cross = a.x + (pt.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if pt.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b - a).cross(c - a)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

/// True when segments `a1-a2` and `b1-b2` cross or touch.
pub fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);

    if ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
    {
        return true;
    }

    (d1.abs() <= EPSILON && on_segment(b1, b2, a1))
        || (d2.abs() <= EPSILON && on_segment(b1, b2, a2))
        || (d3.abs() <= EPSILON && on_segment(a1, a2, b1))
        || (d4.abs() <= EPSILON && on_segment(a1, a2, b2))
}

/// Closest point to `p` on segment `a-b`.
pub fn closest_point_on_segment(p: Point, a: Point, b: Point) -> Point {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq <= f64::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

// ─── Bounding Box ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub minx: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub miny: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub maxx: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub maxy: f64,
}

impl BBox {
    pub fn empty() -> Self {
        Self {
            minx: f64::INFINITY,
            miny: f64::INFINITY,
            maxx: f64::NEG_INFINITY,
            maxy: f64::NEG_INFINITY,
        }
    }

    pub fn of(points: &[Point]) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.expand_point(p.x, p.y);
        }
        bbox
    }

    pub fn expand_point(&mut self, x: f64, y: f64) {
        self.minx = self.minx.min(x);
        self.miny = self.miny.min(y);
        self.maxx = self.maxx.max(x);
        self.maxy = self.maxy.max(y);
    }

    /// Boxes sharing at least a boundary point (within [`EPSILON`]).
    pub fn overlaps(&self, other: &BBox) -> bool {
        self.minx <= other.maxx + EPSILON
            && other.minx <= self.maxx + EPSILON
            && self.miny <= other.maxy + EPSILON
            && other.miny <= self.maxy + EPSILON
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }
}
