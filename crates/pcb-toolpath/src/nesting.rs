use std::fmt;

use log::debug;
use rayon::prelude::*;
use serde::Serialize;

use crate::assembly::Loop;
use crate::error::GeometryError;
use crate::geometry::{point_in_polygon, segments_intersect, BBox, Point, EPSILON};

/// Index of a loop in its forest, in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LoopId(pub usize);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of the boundary the tool centre runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetDirection {
    Outward,
    Inward,
}

impl OffsetDirection {
    pub fn for_depth(depth: usize) -> Self {
        if depth % 2 == 0 {
            OffsetDirection::Outward
        } else {
            OffsetDirection::Inward
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestedLoop {
    pub id: LoopId,
    pub outline: Loop,
    pub depth: usize,
    /// Immediately enclosing loop. Lookup only; the forest owns every loop.
    pub parent: Option<LoopId>,
    pub direction: OffsetDirection,
}

/// Arena of nested loops indexed by [`LoopId`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopForest {
    loops: Vec<NestedLoop>,
}

impl LoopForest {
    pub fn get(&self, id: LoopId) -> Option<&NestedLoop> {
        self.loops.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Loops in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &NestedLoop> {
        self.loops.iter()
    }

    /// Loops shallowest first, siblings in discovery order.
    pub fn cut_order(&self) -> Vec<&NestedLoop> {
        let mut order: Vec<&NestedLoop> = self.loops.iter().collect();
        order.sort_by_key(|l| (l.depth, l.id));
        order
    }
}

/// A point strictly inside the loop: an edge midpoint nudged towards the
/// interior, confirmed by ray cast.
fn sample_point(outline: &Loop) -> Option<Point> {
    if outline.area.abs() <= EPSILON * EPSILON {
        return None;
    }
    let ccw = outline.is_counter_clockwise();
    outline.points.windows(2).find_map(|w| {
        let (a, b) = (w[0], w[1]);
        let len = a.dist(b);
        let dir = (b - a).normalized()?;
        // Interior is on the left of a counter-clockwise walk.
        let inward = if ccw { dir.perp() } else { dir.perp() * -1.0 };
        let nudge = (len * 0.01).min(1e-3);
        let mid = (a + b) * 0.5;
        let candidate = mid + inward * nudge;
        point_in_polygon(candidate, &outline.points).then_some(candidate)
    })
}

fn boundaries_meet(a: &Loop, a_box: &BBox, b: &Loop, b_box: &BBox) -> bool {
    if !a_box.overlaps(b_box) {
        return false;
    }
    a.points.windows(2).any(|ea| {
        let ea_box = BBox::of(ea);
        if !ea_box.overlaps(b_box) {
            return false;
        }
        b.points.windows(2).any(|eb| {
            ea_box.overlaps(&BBox::of(eb)) && segments_intersect(ea[0], ea[1], eb[0], eb[1])
        })
    })
}

/// Build the containment forest. Depth counts the loops strictly enclosing
/// a loop: even depths are material boundaries cut from outside, odd depths
/// are cut-outs cut from inside.
///
/// Fails when a loop encloses nothing, when two boundaries touch or cross, or
/// when the hierarchy has no single parent.
pub fn resolve(loops: Vec<Loop>) -> Result<LoopForest, GeometryError> {
    let samples: Vec<Point> = loops
        .iter()
        .enumerate()
        .map(|(i, l)| {
            sample_point(l).ok_or_else(|| GeometryError::InvalidNesting {
                loop_id: LoopId(i),
                reason: "loop encloses no area".to_string(),
            })
        })
        .collect::<Result<_, _>>()?;

    let boxes: Vec<BBox> = loops.iter().map(Loop::bbox).collect();

    // Containment and overlap tests are independent per loop.
    let containers: Vec<Result<Vec<usize>, GeometryError>> = (0..loops.len())
        .into_par_iter()
        .map(|i| {
            for j in (i + 1)..loops.len() {
                if boundaries_meet(&loops[i], &boxes[i], &loops[j], &boxes[j]) {
                    return Err(GeometryError::InvalidNesting {
                        loop_id: LoopId(j),
                        reason: format!("boundary touches or crosses loop {}", LoopId(i)),
                    });
                }
            }
            Ok((0..loops.len())
                .filter(|&j| j != i && point_in_polygon(samples[i], &loops[j].points))
                .collect())
        })
        .collect();
    let containers: Vec<Vec<usize>> = containers.into_iter().collect::<Result<_, _>>()?;

    let depths: Vec<usize> = containers.iter().map(Vec::len).collect();

    let mut nested = Vec::with_capacity(loops.len());
    for (i, outline) in loops.into_iter().enumerate() {
        let depth = depths[i];
        let parent = if depth == 0 {
            None
        } else {
            let mut candidates = containers[i].iter().filter(|&&j| depths[j] + 1 == depth);
            match (candidates.next(), candidates.next()) {
                (Some(&p), None) => Some(LoopId(p)),
                (None, _) => {
                    return Err(GeometryError::InvalidNesting {
                        loop_id: LoopId(i),
                        reason: format!("no enclosing loop at depth {}", depth - 1),
                    })
                }
                (Some(&a), Some(&b)) => {
                    return Err(GeometryError::InvalidNesting {
                        loop_id: LoopId(i),
                        reason: format!(
                            "enclosed by both {} and {} at depth {}",
                            LoopId(a),
                            LoopId(b),
                            depth - 1
                        ),
                    })
                }
            }
        };
        nested.push(NestedLoop {
            id: LoopId(i),
            outline,
            depth,
            parent,
            direction: OffsetDirection::for_depth(depth),
        });
    }

    debug!(
        "nesting: {} loops, max depth {}",
        nested.len(),
        depths.iter().max().copied().unwrap_or(0)
    );
    Ok(LoopForest { loops: nested })
}

/// Annotate a stand-alone hole as a cut-out. Its enclosing board outline
/// lives in another file, so it has depth 1 and no parent here.
pub fn resolve_hole(id: LoopId, outline: Loop) -> NestedLoop {
    NestedLoop {
        id,
        outline,
        depth: 1,
        parent: None,
        direction: OffsetDirection::Inward,
    }
}
