use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::Serialize;

use crate::error::ConfigError;
use crate::geometry::{serialize_f64_rounded, Point};

/// Excellon tool number (`Tn`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ToolId(pub u32);

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tool {
    pub id: ToolId,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub diameter: f64,
}

/// Tool definitions keyed by tool number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolTable {
    tools: BTreeMap<ToolId, Tool>,
}

impl ToolTable {
    /// Define or redefine a tool.
    pub fn define(&mut self, id: ToolId, diameter: f64) {
        self.tools.insert(id, Tool { id, diameter });
    }

    pub fn get(&self, id: ToolId) -> Option<&Tool> {
        self.tools.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// One drill hit, with the source line it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrillHit {
    pub at: Point,
    pub tool: ToolId,
    pub line: usize,
}

/// A routed slot: the tool goes down at the first point, follows the
/// polyline and comes back up at the last. `line` is where the plunge was.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRoute {
    pub tool: ToolId,
    pub points: Vec<Point>,
    pub line: usize,
}

/// All hits and routed slots sharing one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct DrillGroup {
    pub tool: Tool,
    pub hits: Vec<DrillHit>,
    /// Slots in file order, cut after the hits.
    pub routes: Vec<SlotRoute>,
}

impl DrillGroup {
    pub fn points(&self) -> Vec<Point> {
        self.hits.iter().map(|h| h.at).collect()
    }
}

/// Partition hits and slots by tool. Every hit and every slot lands in
/// exactly one group.
///
/// Groups come out by ascending diameter, ties by tool number; hits and slots
/// keep their file order. Tools with neither produce no group.
pub fn group_hits(
    tools: &ToolTable,
    hits: &[DrillHit],
    routes: &[SlotRoute],
) -> Result<Vec<DrillGroup>, ConfigError> {
    let mut by_tool: BTreeMap<ToolId, DrillGroup> = BTreeMap::new();
    for hit in hits {
        group_for(&mut by_tool, tools, hit.tool, hit.line)?
            .hits
            .push(*hit);
    }
    for route in routes {
        group_for(&mut by_tool, tools, route.tool, route.line)?
            .routes
            .push(route.clone());
    }

    let mut groups: Vec<DrillGroup> = by_tool.into_values().collect();
    // Stable sort keeps tool-number order among equal diameters
    groups.sort_by(|a, b| a.tool.diameter.total_cmp(&b.tool.diameter));

    debug!(
        "drill: {} hits and {} slots in {} groups",
        hits.len(),
        routes.len(),
        groups.len()
    );
    Ok(groups)
}

fn group_for<'a>(
    by_tool: &'a mut BTreeMap<ToolId, DrillGroup>,
    tools: &ToolTable,
    id: ToolId,
    line: usize,
) -> Result<&'a mut DrillGroup, ConfigError> {
    let tool = tools
        .get(id)
        .ok_or(ConfigError::UnknownTool { tool: id, line })?;
    Ok(by_tool.entry(id).or_insert_with(|| DrillGroup {
        tool: *tool,
        hits: Vec::new(),
        routes: Vec::new(),
    }))
}

/// Orders a point set for visiting, given where the machine starts.
pub trait OrderingStrategy: Sync {
    /// Returns a permutation of `0..points.len()`.
    fn order(&self, points: &[Point], entry: Option<Point>) -> Vec<usize>;
}

/// Greedy nearest-neighbour tour. From the entry point (or the first hit when
/// there is none), repeatedly visit the closest unvisited hit. Equal distances
/// go to the hit that came first in the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbor;

impl NearestNeighbor {
    /// Groups at least this large use the spatial index.
    pub const INDEX_THRESHOLD: usize = 256;

    fn order_scan(points: &[Point], entry: Option<Point>) -> Vec<usize> {
        let mut visited = vec![false; points.len()];
        let mut order = Vec::with_capacity(points.len());
        let mut current = match entry {
            Some(p) => p,
            None => {
                visited[0] = true;
                order.push(0);
                points[0]
            }
        };

        while order.len() < points.len() {
            let mut best: Option<(usize, f64)> = None;
            for (i, p) in points.iter().enumerate() {
                if visited[i] {
                    continue;
                }
                let d = current.dist_sq(*p);
                if best.map_or(true, |(_, bd)| d < bd) {
                    best = Some((i, d));
                }
            }
            let Some((next, _)) = best else { break };
            visited[next] = true;
            order.push(next);
            current = points[next];
        }
        order
    }

    fn order_indexed(points: &[Point], entry: Option<Point>) -> Vec<usize> {
        type Entry = GeomWithData<[f64; 2], usize>;

        let mut tree: RTree<Entry> = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| Entry::new([p.x, p.y], i))
                .collect(),
        );
        let mut order = Vec::with_capacity(points.len());
        let mut current = match entry {
            Some(p) => p,
            None => {
                tree.remove(&Entry::new([points[0].x, points[0].y], 0));
                order.push(0);
                points[0]
            }
        };

        while order.len() < points.len() {
            // The iterator yields by distance; scan the run of equally near
            // hits for the lowest input index.
            let mut best: Option<(usize, f64)> = None;
            for candidate in tree.nearest_neighbor_iter(&[current.x, current.y]) {
                let i = candidate.data;
                let d = current.dist_sq(points[i]);
                match best {
                    Some((_, bd)) if d > bd => break,
                    Some((b, bd)) if d == bd && b < i => {}
                    _ => best = Some((i, d)),
                }
            }
            let Some((next, _)) = best else { break };
            tree.remove(&Entry::new([points[next].x, points[next].y], next));
            order.push(next);
            current = points[next];
        }
        order
    }
}

impl OrderingStrategy for NearestNeighbor {
    fn order(&self, points: &[Point], entry: Option<Point>) -> Vec<usize> {
        if points.is_empty() {
            return Vec::new();
        }
        if points.len() >= Self::INDEX_THRESHOLD {
            Self::order_indexed(points, entry)
        } else {
            Self::order_scan(points, entry)
        }
    }
}

/// Reorder the hits of every group with `strategy`. Groups are processed in
/// parallel; group order is preserved. Ordering is pluggable, and the default
/// greedy [`NearestNeighbor`] switches to an R*-tree for large groups so the
/// nearest query stays sub-linear. Slots keep their file order.
pub fn order_groups<S: OrderingStrategy>(
    groups: Vec<DrillGroup>,
    entry: Option<Point>,
    strategy: &S,
) -> Vec<DrillGroup> {
    groups
        .into_par_iter()
        .map(|group| {
            let order = strategy.order(&group.points(), entry);
            let hits = order.into_iter().map(|i| group.hits[i]).collect();
            DrillGroup {
                tool: group.tool,
                hits,
                routes: group.routes,
            }
        })
        .collect()
}
