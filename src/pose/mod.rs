// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

//! Initial placement of a canonical shape inside a detected face.
//!
//! When exactly two eyes are found inside the face, the canonical eye pair is
//! rotated, scaled and moved onto them. Otherwise the shape is only centered
//! on the face box.

use std::cmp::Ordering;

use tracing::{debug, span, Level};

use crate::common::{ImageData, Point, Rectangle};
use crate::error::{Error, Result};
use crate::math::{to_degrees, Mat2};
use crate::shape::{EyeLandmarks, Shape};
use crate::Detector;

/// `point_in_image = rotation * scale * point + translation`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityTransform {
    rotation: Mat2,
    scale: f32,
    translation: Point,
}

impl SimilarityTransform {
    pub fn new(rotation: Mat2, scale: f32, translation: Point) -> Self {
        SimilarityTransform {
            rotation,
            scale,
            translation,
        }
    }

    pub fn identity() -> Self {
        SimilarityTransform::new(Mat2::identity(), 1.0, Point::zero())
    }

    pub fn rotation(&self) -> &Mat2 {
        &self.rotation
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn translation(&self) -> Point {
        self.translation
    }

    /// Rotation angle in degrees, as passed to [`Mat2::rotation`].
    pub fn angle_degrees(&self) -> f64 {
        to_degrees(f64::from(self.rotation.get(0, 1)).atan2(f64::from(self.rotation.get(0, 0))))
    }

    pub fn apply(&self, p: Point) -> Point {
        self.rotation.scaled(self.scale).apply(p) + self.translation
    }

    pub fn apply_shape(&self, shape: &Shape) -> Shape {
        shape.transform(&self.rotation, self.scale, self.translation)
    }
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        SimilarityTransform::identity()
    }
}

/// Outcome of a pose estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InitialPose {
    /// Both eyes were found, the transform maps the canonical eyes onto them.
    Aligned(SimilarityTransform),
    /// Eye detection was inconclusive, only the face box center is known.
    FaceCentered { translation: Point },
}

impl InitialPose {
    pub fn is_aligned(&self) -> bool {
        matches!(self, InitialPose::Aligned(_))
    }

    pub fn translation(&self) -> Point {
        match self {
            InitialPose::Aligned(transform) => transform.translation(),
            InitialPose::FaceCentered { translation } => *translation,
        }
    }

    /// Full transform; identity rotation and unit scale for the face-centered case.
    pub fn transform(&self) -> SimilarityTransform {
        match self {
            InitialPose::Aligned(transform) => *transform,
            InitialPose::FaceCentered { translation } => {
                SimilarityTransform::new(Mat2::identity(), 1.0, *translation)
            }
        }
    }
}

/// Estimates where a canonical, origin-centered shape sits in a face.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoseInitializer {
    eyes: EyeLandmarks,
}

impl PoseInitializer {
    pub fn new(eyes: EyeLandmarks) -> Self {
        PoseInitializer { eyes }
    }

    pub fn eye_landmarks(&self) -> &EyeLandmarks {
        &self.eyes
    }

    /// Estimate the initial pose of `shape` inside `face`.
    ///
    /// `eye_detector` runs on the face crop only and reports rectangles
    /// relative to it. A face with zero width or height fails before the eye
    /// detector is called, before the shape is even looked at. A face box
    /// reaching over the image border is clipped first. Two eye hits sharing
    /// one center count as no eye pair.
    pub fn estimate(
        &self,
        image: &ImageData,
        face: &Rectangle,
        shape: &Shape,
        eye_detector: &mut dyn Detector,
    ) -> Result<InitialPose> {
        if face.is_empty() {
            return Err(Error::EmptyFaceRegion(*face));
        }

        let (e1, e2) = self.eyes.centers(shape)?;
        let half_size = Point::new(image.width() as f32 / 2.0, image.height() as f32 / 2.0);
        let (e1, e2) = (e1 + half_size, e2 + half_size);
        let reference_distance = e1.distance(&e2);
        if reference_distance <= 0.0 {
            return Err(Error::DegenerateShape);
        }

        let outside = || Error::FaceOutsideImage {
            face: *face,
            width: image.width(),
            height: image.height(),
        };
        let roi = image.bounds().intersect(face).ok_or_else(outside)?;
        let face_image = image.crop(&roi).ok_or_else(outside)?;

        let _span = span!(Level::DEBUG, "initial_pose", x = roi.x(), y = roi.y()).entered();

        let eyes = eye_detector.detect(&face_image);
        if eyes.len() != 2 {
            debug!(eyes = eyes.len(), "eye pair not found, centering on face");
            return Ok(InitialPose::FaceCentered {
                translation: face.center(),
            });
        }

        let origin = Point::new(roi.x() as f32, roi.y() as f32);
        let mut centers = [origin + eyes[0].center(), origin + eyes[1].center()];
        centers.sort_by(|a, b| {
            a.x.partial_cmp(&b.x)
                .unwrap_or(Ordering::Equal)
                .then(a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal))
        });
        let [pivot, other] = centers;

        let scale = pivot.distance(&other) / reference_distance;
        if !(scale.is_finite() && scale > 0.0) {
            // concentric hits from different pyramid levels
            debug!(scale, "eye centers coincide, centering on face");
            return Ok(InitialPose::FaceCentered {
                translation: face.center(),
            });
        }
        let a0 = pivot.angle_to(&other);

        let (ey1, ey2) = self.eyes.centers(&shape.scale(scale))?;
        let a1 = ey1.angle_to(&ey2);
        let rotation = Mat2::rotation(to_degrees(a1 - a0), 1.0);

        let base_shape = shape.transform(&rotation, scale, Point::zero());
        let (ey1, _) = self.eyes.centers(&base_shape)?;
        let transform = SimilarityTransform::new(rotation, scale, pivot - ey1);

        debug!(
            scale,
            angle = transform.angle_degrees(),
            tx = transform.translation().x,
            ty = transform.translation().y,
            "eye pair aligned"
        );
        Ok(InitialPose::Aligned(transform))
    }
}
