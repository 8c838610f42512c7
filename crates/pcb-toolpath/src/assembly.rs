use std::collections::HashMap;

use log::debug;

use crate::error::GeometryError;
use crate::geometry::{signed_area, BBox, Point, Segment, EPSILON};

/// Grid cell edge for endpoint hashing. Must be at least [`EPSILON`] so that
/// matching endpoints always fall in neighbouring cells.
const CELL: f64 = 4.0 * EPSILON;

/// A closed boundary assembled from draws.
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    /// Segments in traversal order, each oriented along the walk.
    pub segments: Vec<Segment>,
    /// Flattened polygon. The last point repeats the first.
    pub points: Vec<Point>,
    /// Shoelace area, positive when counter-clockwise.
    pub area: f64,
}

/// A loop that is exactly one circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

impl Loop {
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let mut points: Vec<Point> = Vec::new();
        for seg in &segments {
            let flat = seg.flatten();
            let skip = usize::from(!points.is_empty());
            points.extend(flat.into_iter().skip(skip));
        }
        if let (Some(first), Some(last)) = (points.first().copied(), points.last_mut()) {
            *last = first;
        }
        let area = signed_area(&points);
        Self {
            segments,
            points,
            area,
        }
    }

    /// A circle loop of the given radius starting at angle zero.
    pub fn circle(center: Point, radius: f64, clockwise: bool) -> Self {
        let start = center + Point::new(radius, 0.0);
        Self::from_segments(vec![Segment::Arc {
            start,
            end: start,
            center,
            clockwise,
        }])
    }

    pub fn is_counter_clockwise(&self) -> bool {
        self.area > 0.0
    }

    pub fn bbox(&self) -> BBox {
        BBox::of(&self.points)
    }

    /// `Some` when every segment is an arc on one common circle.
    pub fn as_circle(&self) -> Option<Circle> {
        let mut circle: Option<Circle> = None;
        for seg in &self.segments {
            let Segment::Arc { start, center, .. } = *seg else {
                return None;
            };
            let radius = start.dist(center);
            match circle {
                None => circle = Some(Circle { center, radius }),
                Some(c) => {
                    if !c.center.approx_eq(center) || (c.radius - radius).abs() > EPSILON {
                        return None;
                    }
                }
            }
        }
        circle
    }
}

/// Endpoint graph node registry with a spatial hash.
#[derive(Default)]
struct Nodes {
    points: Vec<Point>,
    grid: HashMap<(i64, i64), Vec<usize>>,
}

impl Nodes {
    fn cell(p: Point) -> (i64, i64) {
        ((p.x / CELL).floor() as i64, (p.y / CELL).floor() as i64)
    }

    /// Node id for `p`, creating a new node when none lies within tolerance.
    fn intern(&mut self, p: Point) -> usize {
        let (cx, cy) = Self::cell(p);
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(ids) = self.grid.get(&(cx + dx, cy + dy)) {
                    if let Some(&id) = ids.iter().find(|&&id| self.points[id].approx_eq(p)) {
                        return id;
                    }
                }
            }
        }
        let id = self.points.len();
        self.points.push(p);
        self.grid.entry((cx, cy)).or_default().push(id);
        id
    }
}

struct Edge {
    segment: Segment,
    from: usize,
    to: usize,
}

/// Assemble draws into closed loops, in discovery order. Endpoints are
/// merged into graph nodes within [`EPSILON`]; a well-formed outline gives
/// every node exactly two incident segments.
pub fn assemble(segments: &[Segment]) -> Result<Vec<Loop>, GeometryError> {
    enum Item {
        Circle(Segment),
        Edge(usize),
    }

    let mut nodes = Nodes::default();
    let mut edges: Vec<Edge> = Vec::new();
    let mut items: Vec<Item> = Vec::new();
    let mut skipped = 0usize;

    for seg in segments {
        if seg.is_degenerate() {
            skipped += 1;
            continue;
        }
        if seg.is_full_circle() {
            items.push(Item::Circle(*seg));
            continue;
        }
        let from = nodes.intern(seg.start());
        let to = nodes.intern(seg.end());
        items.push(Item::Edge(edges.len()));
        edges.push(Edge {
            segment: *seg,
            from,
            to,
        });
    }
    if skipped > 0 {
        debug!("assembly: skipped {skipped} zero-length draws");
    }

    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); nodes.points.len()];
    for (i, edge) in edges.iter().enumerate() {
        incident[edge.from].push(i);
        incident[edge.to].push(i);
    }

    for (node, list) in incident.iter().enumerate() {
        let at = nodes.points[node];
        match list.len() {
            2 => {}
            1 => return Err(GeometryError::OpenLoop { at }),
            degree => return Err(GeometryError::AmbiguousJunction { at, degree }),
        }
    }

    let mut used = vec![false; edges.len()];
    let mut loops = Vec::new();

    for item in items {
        let first = match item {
            Item::Circle(seg) => {
                loops.push(Loop::from_segments(vec![seg]));
                continue;
            }
            Item::Edge(i) if used[i] => continue,
            Item::Edge(i) => i,
        };

        used[first] = true;
        let start_node = edges[first].from;
        let mut node = edges[first].to;
        let mut current = first;
        let mut walk = vec![edges[first].segment];

        while node != start_node {
            let next = incident[node]
                .iter()
                .copied()
                .find(|&e| e != current && !used[e])
                .ok_or(GeometryError::OpenLoop {
                    at: nodes.points[node],
                })?;
            used[next] = true;
            let edge = &edges[next];
            if edge.from == node {
                walk.push(edge.segment);
                node = edge.to;
            } else {
                walk.push(edge.segment.reversed());
                node = edge.from;
            }
            current = next;
        }

        loops.push(Loop::from_segments(walk));
    }

    debug!(
        "assembly: {} segments, {} nodes, {} loops",
        segments.len(),
        nodes.points.len(),
        loops.len()
    );
    Ok(loops)
}
