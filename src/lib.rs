// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

//! Building blocks of an active appearance model trainer: Haar cascade
//! face/eye detection, landmark shapes and their annotation files, and the
//! eye-anchored estimate of a mean shape's initial pose inside a detected face.

mod classifier;
mod common;
mod detector;
mod error;
mod feat;
mod math;
pub mod dataset;
pub mod model;
pub mod pose;
pub mod shape;

pub use crate::common::{resize_image, ImageData, ImagePyramid, Point, Rectangle};
pub use crate::detector::{group_rectangles, CascadeDetector};
pub use crate::error::{Error, Result};
pub use crate::math::{to_degrees, to_radians, Mat2};
pub use crate::model::{load_model, read_cascade_xml, read_model, Model};
pub use crate::pose::{InitialPose, PoseInitializer, SimilarityTransform};
pub use crate::shape::{normalized_error, reference_shape, EyeLandmarks, Shape};

use std::path::Path;

/// Create a cascade detector from a model file (OpenCV Haar XML or binary).
pub fn create_detector<P: AsRef<Path>>(path_to_model: P) -> Result<CascadeDetector> {
    let model = load_model(path_to_model)?;
    Ok(create_detector_with_model(model))
}

/// Create a cascade detector, based on the provided model.
pub fn create_detector_with_model(model: Model) -> CascadeDetector {
    CascadeDetector::new(model)
}

/// Object detector.
///
/// # Examples
///
/// ```rust,no_run
/// use landmark_aam::{Detector, ImageData};
///
/// let mut detector = landmark_aam::create_detector("/path/to/haarcascade_frontalface.bin").unwrap();
/// detector.set_min_object_size(30);
/// detector.set_scale_factor(1.4);
/// detector.set_min_neighbors(2);
///
/// # let (bytes, width, height) = (vec![0u8; 64 * 64], 64, 64);
/// let image = ImageData::new(bytes, width, height);
/// for face in detector.detect(&image) {
///     println!("found face: {:?}", face);
/// }
/// ```
pub trait Detector {
    /// Detect objects on a gray-scale image.
    ///
    /// Returned rectangles are in the coordinates of `image`.
    fn detect(&mut self, image: &ImageData) -> Vec<Rectangle>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image: &ImageData) -> Vec<Rectangle> {
        (**self).detect(image)
    }
}
