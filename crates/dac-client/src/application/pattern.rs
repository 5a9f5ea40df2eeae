//! Ready-made point sources.

use std::f64::consts::PI;

use dac_core::Point;

use crate::application::stream::PointSource;

/// An endless colour-cycling circle, useful for checking a projector.
///
/// One revolution is `points_per_frame` points.  Red, green and blue each
/// follow a sine around the circle, a third of a turn apart.
#[derive(Debug, Clone)]
pub struct CirclePattern {
    points_per_frame: usize,
    radius: f64,
    position: usize,
}

impl Default for CirclePattern {
    fn default() -> Self {
        Self::new(600, 20_000)
    }
}

impl CirclePattern {
    pub fn new(points_per_frame: usize, radius: i16) -> Self {
        Self {
            points_per_frame: points_per_frame.max(1),
            radius: f64::from(radius),
            position: 0,
        }
    }

    /// The point at index `k` of a frame.
    pub fn point_at(&self, k: usize) -> Point {
        let angle = 2.0 * PI * (k % self.points_per_frame) as f64 / self.points_per_frame as f64;
        Point::new(
            (angle.cos() * self.radius) as i16,
            (angle.sin() * self.radius) as i16,
            colour_sine(angle),
            colour_sine(angle + 2.0 * PI / 3.0),
            colour_sine(angle + 4.0 * PI / 3.0),
        )
    }
}

impl PointSource for CirclePattern {
    fn next_points(&mut self, max: usize) -> Vec<Point> {
        let points = (0..max).map(|n| self.point_at(self.position + n)).collect();
        self.position = (self.position + max) % self.points_per_frame;
        points
    }
}

/// Maps a sine to the 0..=65535 channel range.
fn colour_sine(angle: f64) -> u16 {
    ((angle.sin() + 1.0) * 32768.0).clamp(0.0, 65535.0) as u16
}

/// Plays a fixed list of points once, then ends the stream.
#[derive(Debug, Clone, Default)]
pub struct PointList {
    points: Vec<Point>,
    cursor: usize,
}

impl PointList {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.points.len() - self.cursor
    }
}

impl PointSource for PointList {
    fn next_points(&mut self, max: usize) -> Vec<Point> {
        let end = (self.cursor + max).min(self.points.len());
        let batch = self.points[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }
}
