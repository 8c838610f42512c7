use log::debug;
use rayon::prelude::*;
use serde::Serialize;

use crate::assembly::{Circle, Loop};
use crate::error::GeometryError;
use crate::geometry::{signed_area, Point, EPSILON};
use crate::nesting::{LoopForest, LoopId, NestedLoop, OffsetDirection};

/// Longest mitre kept on the expanding side, in tool radii.
pub const MITER_LIMIT: f64 = 4.0;

/// Direction the cutter travels relative to its rotation (spindle clockwise
/// seen from above).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MillingDirection {
    /// Outlines cut counter-clockwise, cut-outs clockwise.
    #[default]
    Conventional,
    /// Outlines cut clockwise, cut-outs counter-clockwise.
    Climb,
}

impl MillingDirection {
    fn wants_counter_clockwise(self, direction: OffsetDirection) -> bool {
        matches!(
            (self, direction),
            (MillingDirection::Conventional, OffsetDirection::Outward)
                | (MillingDirection::Climb, OffsetDirection::Inward)
        )
    }
}

/// Tool-centre path of one loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPath {
    pub loop_id: LoopId,
    pub direction: OffsetDirection,
    /// Closed polygon in cutting order; the last point repeats the first.
    pub vertices: Vec<Point>,
    /// Set when the path is one exact circle, cut as a single arc.
    pub circle: Option<Circle>,
    pub clockwise: bool,
}

/// Offset one loop by half of `tool_diameter` on the side its direction asks
/// for: outside board outlines, inside cut-outs. Corners use the exact
/// intersection of the two shifted edges. On the expanding side a corner whose
/// mitre would reach past [`MITER_LIMIT`] radii is bevelled instead.
pub fn offset_loop(
    nested: &NestedLoop,
    tool_diameter: f64,
    milling: MillingDirection,
) -> Result<ToolPath, GeometryError> {
    let radius = tool_diameter / 2.0;
    let distance = match nested.direction {
        OffsetDirection::Outward => radius,
        OffsetDirection::Inward => -radius,
    };
    let ccw = milling.wants_counter_clockwise(nested.direction);
    let collapse = |reason: String| GeometryError::OffsetCollapse {
        loop_id: nested.id,
        distance: radius,
        reason,
    };

    if let Some(circle) = nested.outline.as_circle() {
        let new_radius = circle.radius + distance;
        if new_radius <= EPSILON {
            return Err(collapse(format!(
                "hole radius {:.4} is not larger than the tool radius",
                circle.radius
            )));
        }
        let path = Loop::circle(circle.center, new_radius, !ccw);
        return Ok(ToolPath {
            loop_id: nested.id,
            direction: nested.direction,
            vertices: path.points,
            circle: Some(Circle {
                center: circle.center,
                radius: new_radius,
            }),
            clockwise: !ccw,
        });
    }

    let mut ring = polygon_vertices(&nested.outline);
    if ring.len() < 3 {
        return Err(collapse("loop has fewer than three distinct vertices".to_string()));
    }
    if signed_area_open(&ring) < 0.0 {
        ring.reverse();
    }

    let mut vertices = offset_ccw_ring(&ring, distance, radius).map_err(&collapse)?;
    vertices.push(vertices[0]);

    let area = signed_area(&vertices);
    if area <= EPSILON * EPSILON {
        return Err(collapse(format!("offset area {area:.6} is not positive")));
    }

    if !ccw {
        vertices.reverse();
    }
    debug!(
        "offset: loop {} {:?} by {radius} -> {} vertices",
        nested.id,
        nested.direction,
        vertices.len()
    );
    Ok(ToolPath {
        loop_id: nested.id,
        direction: nested.direction,
        vertices,
        circle: None,
        clockwise: !ccw,
    })
}

/// Offset every loop of the forest, in parallel. Results are in [`LoopId`]
/// order; the first failing loop in that order is reported.
pub fn offset_forest(
    forest: &LoopForest,
    tool_diameter: f64,
    milling: MillingDirection,
) -> Result<Vec<ToolPath>, GeometryError> {
    let loops: Vec<&NestedLoop> = forest.iter().collect();
    let results: Vec<Result<ToolPath, GeometryError>> = loops
        .par_iter()
        .map(|nested| offset_loop(nested, tool_diameter, milling))
        .collect();
    results.into_iter().collect()
}

/// Distinct polygon vertices without the closing repeat.
fn polygon_vertices(outline: &Loop) -> Vec<Point> {
    let mut ring: Vec<Point> = Vec::with_capacity(outline.points.len());
    for &p in &outline.points {
        if ring.last().map_or(true, |last: &Point| !last.approx_eq(p)) {
            ring.push(p);
        }
    }
    while ring.len() > 1 && ring[0].approx_eq(ring[ring.len() - 1]) {
        ring.pop();
    }
    ring
}

fn signed_area_open(ring: &[Point]) -> f64 {
    let n = ring.len();
    (0..n).map(|i| ring[i].cross(ring[(i + 1) % n])).sum::<f64>() / 2.0
}

/// Offset a counter-clockwise ring; positive `distance` grows it. Returns the
/// open ring of offset vertices, or why the offset collapsed.
///
/// An offset edge that runs against its original edge is swallowed by its
/// neighbours (a fillet tighter than the tool, for instance). Such edges are
/// dropped one at a time, most reversed first, and the neighbours are joined
/// at the intersection of their offset lines.
fn offset_ccw_ring(ring: &[Point], distance: f64, radius: f64) -> Result<Vec<Point>, String> {
    let n = ring.len();
    let dirs: Vec<Point> = (0..n)
        .map(|i| {
            (ring[(i + 1) % n] - ring[i])
                .normalized()
                .ok_or_else(|| format!("edge {i} has zero length"))
        })
        .collect::<Result<_, _>>()?;
    // Right-hand normal points out of a counter-clockwise ring
    let normals: Vec<Point> = dirs.iter().map(|d| d.perp() * -1.0).collect();
    let lines = OffsetLines {
        ring,
        dirs: &dirs,
        normals: &normals,
        distance,
        radius,
    };

    let mut active: Vec<usize> = (0..n).collect();
    loop {
        let m = active.len();
        if m < 3 {
            return Err("offset consumes the whole loop".to_string());
        }
        // joins[k] holds the offset points where active[k] starts. Two edges
        // running parallel in opposite directions close off whatever lies
        // between them, so the second one goes as well.
        let mut joins: Vec<Vec<Point>> = Vec::with_capacity(m);
        for k in 0..m {
            match lines.join(active[(k + m - 1) % m], active[k]) {
                Some(points) => joins.push(points),
                None => break,
            }
        }
        if joins.len() < m {
            active.remove(joins.len());
            continue;
        }

        let mut worst: Option<(usize, f64)> = None;
        for k in 0..m {
            let from = joins[k].last().copied().unwrap_or(ring[active[k]]);
            let to = joins[(k + 1) % m].first().copied().unwrap_or(ring[active[k]]);
            let along = (to - from).dot(dirs[active[k]]);
            if along < -EPSILON && worst.map_or(true, |(_, w)| along < w) {
                worst = Some((k, along));
            }
        }

        match worst {
            Some((k, _)) => {
                active.remove(k);
            }
            None => {
                if m < n {
                    debug!("offset: dropped {} swallowed edges", n - m);
                }
                let mut out: Vec<Point> = Vec::with_capacity(m);
                for p in joins.into_iter().flatten() {
                    if out.last().map_or(true, |last: &Point| !last.approx_eq(p)) {
                        out.push(p);
                    }
                }
                while out.len() > 1 && out[0].approx_eq(out[out.len() - 1]) {
                    out.pop();
                }
                return Ok(out);
            }
        }
    }
}

/// The shifted edge lines of one ring.
struct OffsetLines<'a> {
    ring: &'a [Point],
    dirs: &'a [Point],
    normals: &'a [Point],
    distance: f64,
    radius: f64,
}

impl OffsetLines<'_> {
    fn origin(&self, i: usize) -> Point {
        self.ring[i] + self.normals[i] * self.distance
    }

    /// Offset points joining edge `a` to the following edge `b`: one for a
    /// mitre or intersection, two for a bevel. `None` when the two lines run
    /// parallel in opposite directions and never meet.
    fn join(&self, a: usize, b: usize) -> Option<Vec<Point>> {
        let n = self.ring.len();
        let (d1, d2) = (self.dirs[a], self.dirs[b]);
        let turn = d1.cross(d2);

        if b == (a + 1) % n {
            let (n1, n2) = (self.normals[a], self.normals[b]);
            let v = self.ring[b];
            if turn.abs() < 1e-12 && d1.dot(d2) > 0.0 {
                return Some(vec![v + n1 * self.distance]);
            }
            let denom = 1.0 + n1.dot(n2);
            let expanding = turn * self.distance > 0.0;
            if denom > 1e-12 {
                let m = (n1 + n2) * (self.distance / denom);
                if !expanding || m.length() <= MITER_LIMIT * self.radius {
                    return Some(vec![v + m]);
                }
            }
            return Some(vec![v + n1 * self.distance, v + n2 * self.distance]);
        }

        let (p, q) = (self.origin(a), self.origin(b));
        if turn.abs() < 1e-12 {
            return (d1.dot(d2) > 0.0).then(|| vec![q]);
        }
        let t = (q - p).cross(d2) / turn;
        Some(vec![p + d1 * t])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, Segment};
    use approx::assert_abs_diff_eq;

    fn polygon(pts: &[(f64, f64)]) -> Loop {
        let segments = (0..pts.len())
            .map(|i| {
                let (ax, ay) = pts[i];
                let (bx, by) = pts[(i + 1) % pts.len()];
                Segment::Line {
                    start: Point::new(ax, ay),
                    end: Point::new(bx, by),
                }
            })
            .collect();
        Loop::from_segments(segments)
    }

    fn nested(outline: Loop, direction: OffsetDirection) -> NestedLoop {
        NestedLoop {
            id: LoopId(0),
            outline,
            depth: if direction == OffsetDirection::Outward { 0 } else { 1 },
            parent: None,
            direction,
        }
    }

    fn square(min: f64, max: f64) -> Loop {
        polygon(&[(min, min), (max, min), (max, max), (min, max)])
    }

    #[test]
    fn test_square_outward() {
        let path = offset_loop(
            &nested(square(0.0, 10.0), OffsetDirection::Outward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        assert_eq!(path.vertices.len(), 5);
        let bbox = BBox::of(&path.vertices);
        assert_abs_diff_eq!(bbox.minx, -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bbox.maxy, 11.0, epsilon = 1e-9);
        assert!(signed_area(&path.vertices) > 0.0);
        assert!(!path.clockwise);
    }

    #[test]
    fn test_square_inward_is_clockwise() {
        let path = offset_loop(
            &nested(square(0.0, 10.0), OffsetDirection::Inward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        let bbox = BBox::of(&path.vertices);
        assert_abs_diff_eq!(bbox.minx, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bbox.maxx, 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(signed_area(&path.vertices), -64.0, epsilon = 1e-9);
        assert!(path.clockwise);
    }

    #[test]
    fn test_climb_mirrors_winding() {
        let outline = nested(square(0.0, 10.0), OffsetDirection::Outward);
        let path = offset_loop(&outline, 2.0, MillingDirection::Climb).unwrap();
        assert!(signed_area(&path.vertices) < 0.0);
        let pocket = nested(square(0.0, 10.0), OffsetDirection::Inward);
        let path = offset_loop(&pocket, 2.0, MillingDirection::Climb).unwrap();
        assert!(signed_area(&path.vertices) > 0.0);
    }

    #[test]
    fn test_clockwise_input_normalised() {
        let cw = polygon(&[(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)]);
        assert!(!cw.is_counter_clockwise());
        let path = offset_loop(
            &nested(cw, OffsetDirection::Outward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        assert_abs_diff_eq!(signed_area(&path.vertices), 144.0, epsilon = 1e-9);
    }

    #[test]
    fn test_concave_corner_uses_exact_intersection() {
        // L shape; the reflex corner at (5,5) moves to (6,6) when grown by 1.
        let l = polygon(&[
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 5.0),
            (5.0, 5.0),
            (5.0, 10.0),
            (0.0, 10.0),
        ]);
        let path = offset_loop(
            &nested(l, OffsetDirection::Outward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        assert_eq!(path.vertices.len(), 7);
        assert!(path
            .vertices
            .iter()
            .any(|p| p.approx_eq(Point::new(6.0, 6.0))));
    }

    #[test]
    fn test_sharp_expanding_corner_bevelled() {
        // Narrow spike: apex angle about 11 degrees
        let spike = polygon(&[(0.0, 0.0), (2.0, 0.0), (1.0, 10.0)]);
        let path = offset_loop(
            &nested(spike, OffsetDirection::Outward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        // Apex bevelled into two points; the base corners stay mitred
        assert_eq!(path.vertices.len(), 5);
        for p in &path.vertices {
            assert!(p.dist(Point::new(1.0, 10.0)) <= MITER_LIMIT + 1e-9 || p.y < 10.0);
        }
    }

    #[test]
    fn test_collinear_vertex_shifted() {
        let sq = polygon(&[(0.0, 0.0), (5.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let path = offset_loop(
            &nested(sq, OffsetDirection::Outward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        assert!(path
            .vertices
            .iter()
            .any(|p| p.approx_eq(Point::new(5.0, -1.0))));
    }

    #[test]
    fn test_narrow_pocket_collapses() {
        let slot = polygon(&[(0.0, 0.0), (10.0, 0.0), (10.0, 1.0), (0.0, 1.0)]);
        let err = offset_loop(
            &nested(slot, OffsetDirection::Inward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GeometryError::OffsetCollapse { loop_id: LoopId(0), .. }
        ));
    }

    fn rounded_square(size: f64, r: f64) -> Loop {
        let p = Point::new;
        let line = |start, end| Segment::Line { start, end };
        let fillet = |start, end, center| Segment::Arc {
            start,
            end,
            center,
            clockwise: false,
        };
        let (lo, hi) = (r, size - r);
        Loop::from_segments(vec![
            line(p(lo, 0.0), p(hi, 0.0)),
            fillet(p(hi, 0.0), p(size, lo), p(hi, lo)),
            line(p(size, lo), p(size, hi)),
            fillet(p(size, hi), p(hi, size), p(hi, hi)),
            line(p(hi, size), p(lo, size)),
            fillet(p(lo, size), p(0.0, hi), p(lo, hi)),
            line(p(0.0, hi), p(0.0, lo)),
            fillet(p(0.0, lo), p(lo, 0.0), p(lo, lo)),
        ])
    }

    #[test]
    fn test_fillets_tighter_than_tool_are_swallowed() {
        let path = offset_loop(
            &nested(rounded_square(10.0, 0.5), OffsetDirection::Inward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        let bbox = BBox::of(&path.vertices);
        assert_abs_diff_eq!(bbox.minx, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.miny, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.maxx, 9.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.maxy, 9.0, epsilon = 1e-6);
        assert_eq!(path.vertices.len(), 5);
        assert_abs_diff_eq!(signed_area(&path.vertices), -64.0, epsilon = 1e-6);
        assert!(path.clockwise);
    }

    #[test]
    fn test_fillets_wider_than_tool_are_kept() {
        let path = offset_loop(
            &nested(rounded_square(10.0, 2.0), OffsetDirection::Inward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        let bbox = BBox::of(&path.vertices);
        assert_abs_diff_eq!(bbox.minx, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.maxy, 9.0, epsilon = 1e-6);
        // Each fillet survives as a run of chords
        assert!(path.vertices.len() > 5);
    }

    #[test]
    fn test_rounded_notch_in_outline() {
        // Outline with a 1 mm wide slot whose end is a half circle; a 2 mm
        // router cannot enter it, so the slot mouth is bridged.
        let p = Point::new;
        let line = |start, end| Segment::Line { start, end };
        let outline = Loop::from_segments(vec![
            line(p(0.0, 0.0), p(20.0, 0.0)),
            line(p(20.0, 0.0), p(20.0, 10.0)),
            line(p(20.0, 10.0), p(10.5, 10.0)),
            line(p(10.5, 10.0), p(10.5, 6.0)),
            Segment::Arc {
                start: p(10.5, 6.0),
                end: p(9.5, 6.0),
                center: p(10.0, 6.0),
                clockwise: true,
            },
            line(p(9.5, 6.0), p(9.5, 10.0)),
            line(p(9.5, 10.0), p(0.0, 10.0)),
            line(p(0.0, 10.0), p(0.0, 0.0)),
        ]);
        assert!(outline.is_counter_clockwise());
        let path = offset_loop(
            &nested(outline, OffsetDirection::Outward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        let bbox = BBox::of(&path.vertices);
        assert_abs_diff_eq!(bbox.minx, -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.maxy, 11.0, epsilon = 1e-6);
        assert!(path.vertices.iter().all(|v| v.y < -0.5 || v.y > 10.5 || v.x < -0.5 || v.x > 20.5));
    }

    #[test]
    fn test_pocket_exactly_tool_width_collapses() {
        let err = offset_loop(
            &nested(square(0.0, 2.0), OffsetDirection::Inward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::OffsetCollapse { .. }));
    }

    #[test]
    fn test_circle_offsets_exactly() {
        let c = Loop::circle(Point::new(5.0, 5.0), 3.0, false);
        let out = offset_loop(
            &nested(c.clone(), OffsetDirection::Outward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        assert_abs_diff_eq!(out.circle.unwrap().radius, 4.0);
        assert!(!out.clockwise);

        let inside = offset_loop(
            &nested(c, OffsetDirection::Inward),
            2.0,
            MillingDirection::Conventional,
        )
        .unwrap();
        let circle = inside.circle.unwrap();
        assert_abs_diff_eq!(circle.radius, 2.0);
        assert!(inside.clockwise);
        assert!(signed_area(&inside.vertices) < 0.0);
        for p in &inside.vertices {
            assert_abs_diff_eq!(p.dist(circle.center), 2.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_small_hole_collapses() {
        let c = Loop::circle(Point::new(0.0, 0.0), 0.5, false);
        let err = offset_loop(
            &nested(c, OffsetDirection::Inward),
            1.0,
            MillingDirection::Conventional,
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::OffsetCollapse { .. }));
    }

    #[test]
    fn test_offset_forest_in_id_order() {
        let forest = crate::nesting::resolve(vec![square(0.0, 20.0), square(5.0, 10.0)]).unwrap();
        let paths = offset_forest(&forest, 2.0, MillingDirection::Conventional).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].loop_id, LoopId(0));
        assert_eq!(paths[0].direction, OffsetDirection::Outward);
        assert_eq!(paths[1].direction, OffsetDirection::Inward);
    }
}
