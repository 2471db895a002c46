// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use std::ops::Index;

use crate::common::{Point, Rectangle};
use crate::error::{Error, Result};
use crate::math::Mat2;

/// Ordered set of facial landmarks.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Shape {
    points: Vec<Point>,
}

impl Shape {
    pub fn new(points: Vec<Point>) -> Self {
        Shape { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    pub fn translate(&self, offset: Point) -> Shape {
        Shape::new(self.points.iter().map(|p| *p + offset).collect())
    }

    pub fn scale(&self, factor: f32) -> Shape {
        Shape::new(self.points.iter().map(|p| *p * factor).collect())
    }

    /// `rotation * scale * p + translation` for every point.
    pub fn transform(&self, rotation: &Mat2, scale: f32, translation: Point) -> Shape {
        let m = rotation.scaled(scale);
        Shape::new(
            self.points
                .iter()
                .map(|p| m.apply(*p) + translation)
                .collect(),
        )
    }

    pub fn centroid(&self) -> Point {
        if self.points.is_empty() {
            return Point::zero();
        }
        let mut sum = Point::zero();
        for p in &self.points {
            sum += *p;
        }
        sum * (1.0 / self.points.len() as f32)
    }

    /// The same shape moved so that its centroid is at the origin.
    pub fn centered(&self) -> Shape {
        let centroid = self.centroid();
        self.translate(Point::zero() - centroid)
    }

    /// Smallest pixel rectangle covering all landmarks.
    pub fn bounding_box(&self) -> Option<Rectangle> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        let x = min_x.floor() as i32;
        let y = min_y.floor() as i32;
        Some(Rectangle::new(
            x,
            y,
            (max_x.ceil() as i32 - x) as u32,
            (max_y.ceil() as i32 - y) as u32,
        ))
    }
}

impl Index<usize> for Shape {
    type Output = Point;

    fn index(&self, idx: usize) -> &Point {
        &self.points[idx]
    }
}

impl From<Vec<Point>> for Shape {
    fn from(points: Vec<Point>) -> Self {
        Shape::new(points)
    }
}

/// Landmark indices of the outer and inner corner of each eye.
///
/// `first` is the eye appearing on the left of a frontal image, `second` the
/// one on the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EyeLandmarks {
    pub first: (usize, usize),
    pub second: (usize, usize),
}

impl EyeLandmarks {
    /// 68-point iBUG / Multi-PIE annotation scheme.
    pub const IBUG_68: EyeLandmarks = EyeLandmarks {
        first: (36, 39),
        second: (42, 45),
    };

    pub fn new(first: (usize, usize), second: (usize, usize)) -> Self {
        EyeLandmarks { first, second }
    }

    /// Minimum landmark count a shape needs for these indices.
    pub fn required_len(&self) -> usize {
        [self.first.0, self.first.1, self.second.0, self.second.1]
            .iter()
            .max()
            .map_or(0, |max| max + 1)
    }

    pub fn validate(&self, shape: &Shape) -> Result<()> {
        let required = self.required_len();
        if shape.len() < required {
            return Err(Error::ShapeTooSmall {
                required,
                actual: shape.len(),
            });
        }
        Ok(())
    }

    /// Midpoints of both eyes' corner pairs.
    pub fn centers(&self, shape: &Shape) -> Result<(Point, Point)> {
        self.validate(shape)?;
        Ok((
            shape[self.first.0].midpoint(&shape[self.first.1]),
            shape[self.second.0].midpoint(&shape[self.second.1]),
        ))
    }
}

impl Default for EyeLandmarks {
    fn default() -> Self {
        EyeLandmarks::IBUG_68
    }
}

/// Mean of the centroid-centered annotations.
///
/// This is a plain average, the shapes are not rotated or rescaled onto each
/// other first.
pub fn reference_shape(shapes: &[Shape]) -> Result<Shape> {
    let first = shapes.first().ok_or(Error::EmptyDataset)?;
    let len = first.len();

    let mut sum = vec![Point::zero(); len];
    for shape in shapes {
        if shape.len() != len {
            return Err(Error::ShapeMismatch {
                expected: len,
                actual: shape.len(),
            });
        }
        for (acc, p) in sum.iter_mut().zip(shape.centered().iter()) {
            *acc += *p;
        }
    }

    let inv_count = 1.0 / shapes.len() as f32;
    Ok(Shape::new(sum.into_iter().map(|p| p * inv_count).collect()))
}

/// Mean landmark distance between `predicted` and `truth`, relative to the
/// inter-ocular distance of `truth`.
///
/// `None` when the shapes differ in length, lack the eye landmarks, or the
/// ground truth eyes coincide.
pub fn normalized_error(predicted: &Shape, truth: &Shape, eyes: &EyeLandmarks) -> Option<f32> {
    if predicted.len() != truth.len() || truth.is_empty() {
        return None;
    }
    let (left, right) = eyes.centers(truth).ok()?;
    let inter_ocular = left.distance(&right);
    if inter_ocular <= 0.0 {
        return None;
    }

    let total: f32 = predicted
        .iter()
        .zip(truth.iter())
        .map(|(p, t)| p.distance(t))
        .sum();
    Some(total / truth.len() as f32 / inter_ocular)
}
