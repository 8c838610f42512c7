use std::collections::HashMap;

use log::debug;
use rayon::prelude::*;

use crate::assembly::Loop;
use crate::config::JobConfig;
use crate::drill::{DrillGroup, SlotRoute};
use crate::error::{ConfigError, GeometryError, ToolpathError};
use crate::geometry::{closest_point_on_segment, Point};
use crate::job::{CutKind, Job, JobBuilder, JobParams, ToolChange};
use crate::nesting::{resolve_hole, LoopForest, LoopId};
use crate::offset::{offset_loop, ToolPath};

/// Turns tool paths and drill groups into a [`Job`]. Every loop, hole and
/// slot is one cycle: rapid to the entry, plunge to the cut-start height,
/// feed down, cut, retract.
pub struct Sequencer<'a> {
    config: &'a JobConfig,
}

impl<'a> Sequencer<'a> {
    pub fn new(config: &'a JobConfig) -> Self {
        Self { config }
    }

    fn params(&self, cutter_diameter: Option<f64>) -> JobParams {
        JobParams {
            retract: self.config.retract,
            cut_start: self.config.cut_start,
            cut_end: self.config.cut_end,
            entry: self.config.entry,
            feed: self.config.feed,
            plunge_feed: self.config.effective_plunge_feed(),
            cutter_diameter,
            tools: Vec::new(),
            spindle_rpm: self.config.spindle_rpm,
        }
    }

    /// Sequence the offset paths of an edge-cuts forest.
    ///
    /// Loops are visited by ascending depth; siblings keep their discovery
    /// order.
    pub fn route(&self, forest: &LoopForest, paths: &[ToolPath]) -> Result<Job, ToolpathError> {
        let by_loop: HashMap<LoopId, &ToolPath> = paths.iter().map(|p| (p.loop_id, p)).collect();
        let mut job = JobBuilder::new(self.params(Some(self.config.tool_diameter)));

        for nested in forest.cut_order() {
            let path = by_loop
                .get(&nested.id)
                .ok_or_else(|| GeometryError::InvalidNesting {
                    loop_id: nested.id,
                    reason: "no tool path was generated".to_string(),
                })?;
            self.cut_path(&mut job, path)?;
        }

        let job = job.finish()?;
        debug!("sequence: {} loops, {} steps", paths.len(), job.steps().len());
        Ok(job)
    }

    /// Sequence ordered drill groups. Each group starts with a tool change,
    /// then its hits, then its routed slots. Holes wider than `max_drill` are
    /// milled as circles instead of drilled.
    pub fn drill(&self, groups: &[DrillGroup]) -> Result<Job, ToolpathError> {
        let mut job = JobBuilder::new(self.params(None));
        let plunge_feed = self.config.effective_plunge_feed();

        for group in groups {
            let hole = group.tool.diameter;
            let cutter = match self.config.max_drill {
                Some(max) if hole > max => max,
                _ => hole,
            };
            let change = ToolChange {
                tool: group.tool.id,
                hole_diameter: hole,
                cutter_diameter: cutter,
            };
            job.tool_change(change)?;

            if change.is_milled() {
                if let Some(slot) = group.routes.first() {
                    return Err(ConfigError::SlotWiderThanDrill {
                        tool: slot.tool,
                        line: slot.line,
                    }
                    .into());
                }
                for path in self.hole_paths(group, cutter)? {
                    self.cut_path(&mut job, &path)?;
                }
                continue;
            }

            for hit in &group.hits {
                job.rapid(hit.at)?;
                job.plunge(hit.at, self.config.cut_start)?;
                job.cut(hit.at, self.config.cut_end, plunge_feed, CutKind::Linear)?;
                job.retract(hit.at, self.config.retract)?;
            }
            for slot in &group.routes {
                self.route_slot(&mut job, slot)?;
            }
        }

        let job = job.finish()?;
        debug!("sequence: {} drill groups, {} steps", groups.len(), job.steps().len());
        Ok(job)
    }

    fn hole_paths(&self, group: &DrillGroup, cutter: f64) -> Result<Vec<ToolPath>, GeometryError> {
        let radius = group.tool.diameter / 2.0;
        group
            .hits
            .par_iter()
            .enumerate()
            .map(|(i, hit)| {
                let nested = resolve_hole(LoopId(i), Loop::circle(hit.at, radius, false));
                offset_loop(&nested, cutter, self.config.milling)
            })
            .collect()
    }

    /// Follow a slot's centre line, one lap per pass depth. Laps alternate
    /// direction so each one starts where the previous ended.
    fn route_slot(&self, job: &mut JobBuilder, slot: &SlotRoute) -> Result<(), ToolpathError> {
        let Some(&start) = slot.points.first() else {
            return Ok(());
        };
        let plunge_feed = self.config.effective_plunge_feed();
        job.rapid(start)?;
        job.plunge(start, self.config.cut_start)?;

        let mut at = start;
        for (lap, z) in self.config.pass_depths().into_iter().enumerate() {
            job.cut(at, z, plunge_feed, CutKind::Linear)?;
            let points: Vec<Point> = if lap % 2 == 0 {
                slot.points[1..].to_vec()
            } else {
                slot.points.iter().rev().skip(1).copied().collect()
            };
            for p in points {
                job.cut(p, z, self.config.feed, CutKind::Linear)?;
                at = p;
            }
        }
        job.retract(at, self.config.retract)?;
        Ok(())
    }

    /// One loop cycle over a closed tool path, one lap per pass depth.
    fn cut_path(&self, job: &mut JobBuilder, path: &ToolPath) -> Result<(), ToolpathError> {
        let feed = self.config.feed;
        let plunge_feed = self.config.effective_plunge_feed();

        if let Some(circle) = path.circle {
            let start = match self.config.entry {
                Some(e) => match (e - circle.center).normalized() {
                    Some(dir) => circle.center + dir * circle.radius,
                    None => path.vertices[0],
                },
                None => path.vertices[0],
            };
            job.rapid(start)?;
            job.plunge(start, self.config.cut_start)?;
            for z in self.config.pass_depths() {
                job.cut(start, z, plunge_feed, CutKind::Linear)?;
                job.cut(
                    start,
                    z,
                    feed,
                    CutKind::Arc {
                        center: circle.center,
                        clockwise: path.clockwise,
                    },
                )?;
            }
            job.retract(start, self.config.retract)?;
            return Ok(());
        }

        let ring = entry_ring(&path.vertices, self.config.entry);
        let Some(&start) = ring.first() else {
            return Ok(());
        };
        job.rapid(start)?;
        job.plunge(start, self.config.cut_start)?;
        for z in self.config.pass_depths() {
            job.cut(start, z, plunge_feed, CutKind::Linear)?;
            for &p in &ring[1..] {
                job.cut(p, z, feed, CutKind::Linear)?;
            }
        }
        job.retract(start, self.config.retract)?;
        Ok(())
    }
}

/// Rotate a closed ring so it starts and ends at the point nearest `entry`.
/// A point falling inside an edge is inserted as a new vertex. Without an
/// entry the ring is returned unchanged.
fn entry_ring(closed: &[Point], entry: Option<Point>) -> Vec<Point> {
    let open = &closed[..closed.len().saturating_sub(1)];
    let Some(entry) = entry else {
        return closed.to_vec();
    };
    if open.is_empty() {
        return closed.to_vec();
    }

    let n = open.len();
    let mut best: Option<(usize, Point, f64)> = None;
    for i in 0..n {
        let q = closest_point_on_segment(entry, open[i], open[(i + 1) % n]);
        let d = entry.dist_sq(q);
        if best.map_or(true, |(_, _, bd)| d < bd) {
            best = Some((i, q, d));
        }
    }
    let Some((edge, q, _)) = best else {
        return closed.to_vec();
    };

    let mut ring = Vec::with_capacity(n + 2);
    if q.approx_eq(open[edge]) {
        ring.extend((0..n).map(|k| open[(edge + k) % n]));
    } else if q.approx_eq(open[(edge + 1) % n]) {
        ring.extend((0..n).map(|k| open[(edge + 1 + k) % n]));
    } else {
        ring.push(q);
        ring.extend((0..n).map(|k| open[(edge + 1 + k) % n]));
    }
    ring.push(ring[0]);
    ring
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::assemble;
    use crate::drill::{DrillHit, Tool, ToolId};
    use crate::geometry::{Segment, EPSILON};
    use crate::job::{check_sequence, JobStep, Move};
    use crate::nesting::resolve;
    use crate::offset::offset_forest;
    use approx::assert_relative_eq;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Segment> {
        let p = [
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ];
        (0..4)
            .map(|i| Segment::Line {
                start: p[i],
                end: p[(i + 1) % 4],
            })
            .collect()
    }

    fn board(config: &JobConfig) -> (LoopForest, Vec<ToolPath>) {
        let mut segs = rect(0.0, 0.0, 20.0, 20.0);
        segs.extend(rect(5.0, 5.0, 10.0, 10.0));
        let forest = resolve(assemble(&segs).unwrap()).unwrap();
        let paths = offset_forest(&forest, config.tool_diameter, config.milling).unwrap();
        (forest, paths)
    }

    fn rapids(job: &Job) -> Vec<Point> {
        job.moves()
            .filter_map(|m| match m {
                Move::Rapid { to } => Some(*to),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_route_outer_then_inner() {
        let config = JobConfig::default();
        let (forest, paths) = board(&config);
        let job = Sequencer::new(&config).route(&forest, &paths).unwrap();
        assert!(check_sequence(job.steps()).is_ok());

        let starts = rapids(&job);
        assert_eq!(starts.len(), 2);
        // Outline grows to -1..21, cut-out shrinks to 6..9
        let on_outline = |v: f64| (v + 1.0).abs() < EPSILON || (v - 21.0).abs() < EPSILON;
        assert!(on_outline(starts[0].x) || on_outline(starts[0].y));
        assert!(starts[1].x >= 6.0 - EPSILON && starts[1].x <= 9.0 + EPSILON);
    }

    #[test]
    fn test_cycle_shape() {
        let config = JobConfig::default();
        let (forest, paths) = board(&config);
        let job = Sequencer::new(&config).route(&forest, &paths).unwrap();
        let moves: Vec<&Move> = job.moves().collect();

        assert!(matches!(moves[0], Move::Rapid { .. }));
        assert!(matches!(moves[1], Move::Plunge { z, .. } if *z == 1.0));
        let Move::Cut(first) = moves[2] else {
            panic!("expected a feed-down cut, got {:?}", moves[2]);
        };
        assert_eq!(first.to, moves[0].to());
        assert_relative_eq!(first.z, -1.65);
        // Four edges and the retract back at the start
        assert!(matches!(moves[7], Move::Retract { z, .. } if *z == 20.0));
        assert_eq!(moves[6].to(), moves[0].to());
    }

    #[test]
    fn test_entry_point_is_inserted() {
        let config = JobConfig::default().with_entry(7.5, -50.0);
        let (forest, paths) = board(&config);
        let job = Sequencer::new(&config).route(&forest, &paths).unwrap();
        let starts = rapids(&job);
        assert!(starts[0].approx_eq(Point::new(7.5, -1.0)));
        assert!(starts[1].approx_eq(Point::new(7.5, 6.0)));
    }

    #[test]
    fn test_entry_on_vertex_does_not_duplicate() {
        let ring = vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
            Point::new(0.0, 0.0),
        ];
        let r = entry_ring(&ring, Some(Point::new(5.0, 5.0)));
        assert_eq!(r.len(), 5);
        assert_eq!(r[0], Point::new(4.0, 4.0));
        assert_eq!(r[4], Point::new(4.0, 4.0));
        assert_eq!(r[1], Point::new(0.0, 4.0));

        let r = entry_ring(&ring, Some(Point::new(2.0, -3.0)));
        assert_eq!(r.len(), 6);
        assert_eq!(r[0], Point::new(2.0, 0.0));
        assert_eq!(r[1], Point::new(4.0, 0.0));
    }

    #[test]
    fn test_pass_depth_laps() {
        let config = JobConfig::default().with_pass_depth(1.0);
        let (forest, paths) = board(&config);
        let job = Sequencer::new(&config).route(&forest, &paths).unwrap();
        let mut depths: Vec<f64> = job
            .moves()
            .filter_map(|m| match m {
                Move::Cut(c) => Some(c.z),
                _ => None,
            })
            .collect();
        depths.dedup();
        assert_eq!(depths.len(), 6);
        assert_relative_eq!(depths[2], -1.65);
    }

    fn group(tool: u32, diameter: f64, at: &[(f64, f64)]) -> DrillGroup {
        DrillGroup {
            tool: Tool {
                id: ToolId(tool),
                diameter,
            },
            hits: at
                .iter()
                .enumerate()
                .map(|(i, &(x, y))| DrillHit {
                    at: Point::new(x, y),
                    tool: ToolId(tool),
                    line: i + 1,
                })
                .collect(),
            routes: Vec::new(),
        }
    }

    #[test]
    fn test_drill_cycles() {
        let config = JobConfig::default().with_plunge_feed(30.0);
        let groups = vec![
            group(1, 0.8, &[(1.0, 1.0), (2.0, 1.0)]),
            group(2, 1.0, &[(5.0, 5.0)]),
        ];
        let job = Sequencer::new(&config).drill(&groups).unwrap();
        assert!(check_sequence(job.steps()).is_ok());
        assert_eq!(job.steps().len(), 2 + 3 * 4);
        assert!(matches!(job.steps()[0], JobStep::ToolChange(tc) if tc.tool == ToolId(1)));
        let JobStep::Move(Move::Cut(cut)) = job.steps()[3] else {
            panic!("expected drill cut");
        };
        assert_eq!(cut.to, Point::new(1.0, 1.0));
        assert_eq!(cut.feed, 30.0);
        assert_eq!(job.params.tools.len(), 2);
    }

    #[test]
    fn test_large_holes_are_milled() {
        let config = JobConfig::default().with_max_drill(1.0);
        let groups = vec![group(3, 3.0, &[(10.0, 10.0)])];
        let job = Sequencer::new(&config).drill(&groups).unwrap();
        let JobStep::ToolChange(tc) = job.steps()[0] else {
            panic!("expected tool change");
        };
        assert!(tc.is_milled());
        assert_eq!(tc.cutter_diameter, 1.0);

        let arc = job
            .moves()
            .find_map(|m| match m {
                Move::Cut(c) => match c.kind {
                    CutKind::Arc { center, clockwise } => Some((c.to, center, clockwise)),
                    CutKind::Linear => None,
                },
                _ => None,
            })
            .unwrap();
        assert_eq!(arc.1, Point::new(10.0, 10.0));
        // Hole radius 1.5 less cutter radius 0.5
        assert_relative_eq!(arc.0.dist(arc.1), 1.0, epsilon = 1e-9);
        assert!(arc.2);
    }

    #[test]
    fn test_milled_hole_too_small_for_cutter() {
        let config = JobConfig::default().with_max_drill(1.0);
        let groups = vec![group(3, 1.0 + 1e-9, &[(0.0, 0.0)])];
        let err = Sequencer::new(&config).drill(&groups).unwrap_err();
        assert!(matches!(
            err,
            ToolpathError::Geometry(GeometryError::OffsetCollapse { .. })
        ));
    }

    fn slot(tool: u32, points: &[(f64, f64)]) -> SlotRoute {
        SlotRoute {
            tool: ToolId(tool),
            points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            line: 9,
        }
    }

    #[test]
    fn test_slot_cycle_alternates_laps() {
        let config = JobConfig::default()
            .with_heights(20.0, 1.0, -2.0)
            .with_pass_depth(1.5)
            .with_plunge_feed(30.0);
        let mut g = group(1, 1.0, &[(0.0, 0.0)]);
        g.routes.push(slot(1, &[(5.0, 0.0), (8.0, 0.0), (8.0, 2.0)]));
        let job = Sequencer::new(&config).drill(&[g]).unwrap();
        assert!(check_sequence(job.steps()).is_ok());

        // Tool change, one drill cycle, then the slot
        let slot_steps = &job.steps()[5..];
        assert_eq!(
            slot_steps[0],
            JobStep::Move(Move::Rapid {
                to: Point::new(5.0, 0.0)
            })
        );
        let cuts: Vec<(Point, f64, f64)> = slot_steps
            .iter()
            .filter_map(|s| match s {
                JobStep::Move(Move::Cut(c)) => Some((c.to, c.z, c.feed)),
                _ => None,
            })
            .collect();
        assert_eq!(
            cuts,
            vec![
                (Point::new(5.0, 0.0), -0.5, 30.0),
                (Point::new(8.0, 0.0), -0.5, 100.0),
                (Point::new(8.0, 2.0), -0.5, 100.0),
                (Point::new(8.0, 2.0), -2.0, 30.0),
                (Point::new(8.0, 0.0), -2.0, 100.0),
                (Point::new(5.0, 0.0), -2.0, 100.0),
            ]
        );
        assert_eq!(
            slot_steps.last(),
            Some(&JobStep::Move(Move::Retract {
                to: Point::new(5.0, 0.0),
                z: 20.0
            }))
        );
    }

    #[test]
    fn test_slot_on_milled_tool_rejected() {
        let config = JobConfig::default().with_max_drill(1.0);
        let mut g = group(2, 2.0, &[]);
        g.routes.push(slot(2, &[(0.0, 0.0), (3.0, 0.0)]));
        let err = Sequencer::new(&config).drill(&[g]).unwrap_err();
        assert!(matches!(
            err,
            ToolpathError::Config(ConfigError::SlotWiderThanDrill { line: 9, .. })
        ));
    }
}
