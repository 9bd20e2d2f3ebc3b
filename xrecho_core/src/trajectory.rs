//! Trajectory simplification.
//!
//! A position trace is cut into sections wherever it jumps (teleports), then
//! each section is reduced with Douglas-Peucker before being handed to a
//! [`PolylineSink`] for display.

use crate::dataset::RecordTrace;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Simplification parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySettings {
    /// Largest distance (m) a dropped point may lie from the simplified line
    pub tolerance: f32,

    /// Step length (m) above which a new section starts
    pub teleport_threshold: f32,
}

impl Default for TrajectorySettings {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            teleport_threshold: 0.5,
        }
    }
}

/// Receives the simplified sections of a trajectory, e.g. a line or tube
/// mesh builder.
pub trait PolylineSink {
    fn begin(&mut self) {}
    fn section(&mut self, points: &[Vector3<f32>]);
    fn end(&mut self) {}
}

impl PolylineSink for Vec<Vec<Vector3<f32>>> {
    fn begin(&mut self) {
        self.clear();
    }

    fn section(&mut self, points: &[Vector3<f32>]) {
        self.push(points.to_vec());
    }
}

/// Cuts `positions` wherever two consecutive points are more than
/// `teleport_threshold` apart.
pub fn split_sections(positions: &[Vector3<f32>], teleport_threshold: f32) -> Vec<Vec<Vector3<f32>>> {
    let Some((first, rest)) = positions.split_first() else {
        return Vec::new();
    };

    let limit = teleport_threshold * teleport_threshold;
    let mut sections = vec![vec![*first]];
    let mut last = *first;

    for p in rest {
        if (p - last).norm_squared() > limit {
            sections.push(Vec::new());
        }
        if let Some(current) = sections.last_mut() {
            current.push(*p);
        }
        last = *p;
    }
    sections
}

/// Distance from `p` to the segment `a`-`b`.
fn segment_distance(p: &Vector3<f32>, a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 == 0.0 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Douglas-Peucker reduction. Endpoints are always kept.
pub fn douglas_peucker(points: &[Vector3<f32>], tolerance: f32) -> Vec<Vector3<f32>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    // Explicit stack: long recordings would overflow a recursive version
    let mut stack = vec![(0, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }

        let (index, distance) = (start + 1..end)
            .map(|i| (i, segment_distance(&points[i], &points[start], &points[end])))
            .fold((start, -1.0_f32), |best, cur| if cur.1 > best.1 { cur } else { best });

        if distance > tolerance {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Splits and simplifies `positions`.
pub fn simplify_trajectory(positions: &[Vector3<f32>], settings: &TrajectorySettings) -> Vec<Vec<Vector3<f32>>> {
    let sections: Vec<Vec<Vector3<f32>>> = split_sections(positions, settings.teleport_threshold)
        .iter()
        .map(|section| douglas_peucker(section, settings.tolerance))
        .collect();

    debug!(
        "Trajectory of {} points simplified to {} points in {} sections",
        positions.len(),
        sections.iter().map(Vec::len).sum::<usize>(),
        sections.len()
    );
    sections
}

/// Simplifies a trace and feeds the result to `sink`.
pub fn render_trajectory(trace: &RecordTrace, settings: &TrajectorySettings, sink: &mut dyn PolylineSink) {
    sink.begin();
    for section in simplify_trajectory(&trace.positions, settings) {
        sink.section(&section);
    }
    sink.end();
}
