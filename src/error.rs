// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use thiserror::Error;

use crate::common::Rectangle;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Malformed cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("Dataset lists differ in length: {images} images, {annotations} annotation files")]
    DatasetMismatch { images: usize, annotations: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("Shape has {actual} landmarks, at least {required} are required")]
    ShapeTooSmall { required: usize, actual: usize },

    #[error("Shapes differ in landmark count: expected {expected}, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Canonical shape has coincident eye centers")]
    DegenerateShape,

    #[error("Face region {0:?} has zero area")]
    EmptyFaceRegion(Rectangle),

    #[error("Face region {face:?} lies outside the {width}x{height} image")]
    FaceOutsideImage {
        face: Rectangle,
        width: u32,
        height: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
