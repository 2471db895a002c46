// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

//! Boosted Haar cascade models and their file formats.
//!
//! [`load_model`] reads OpenCV cascade XML for `.xml` paths and the binary
//! layout below otherwise. All binary values are
//! little-endian:
//!
//! ```text
//! i32 window_width, i32 window_height, i32 num_stages
//! per stage:      f32 threshold, i32 num_weak
//! per weak:       i32 num_rects
//! per rect:       i32 x, i32 y, i32 w, i32 h, f32 weight
//! after rects:    f32 threshold, f32 left_val, f32 right_val
//! ```

mod xml;

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

pub use crate::classifier::{classify, HaarFeature, Score, Stage, WeakClassifier, WeightedRect};
pub use crate::feat::HaarFeatureMap;
use crate::common::Rectangle;
use crate::error::{Error, Result};

pub use self::xml::read_cascade_xml;

const MAX_RECTS_PER_FEATURE: i32 = 3;
const MAX_PREALLOCATED: usize = 4096;

#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
}

impl Model {
    /// Builds a model, checking that every feature lies inside the window.
    pub fn new(window_width: u32, window_height: u32, stages: Vec<Stage>) -> Result<Self> {
        if window_width == 0 || window_height == 0 {
            return Err(Error::InvalidModel(format!(
                "empty detection window {}x{}",
                window_width, window_height
            )));
        }
        if stages.is_empty() {
            return Err(Error::InvalidModel("model has no stages".to_string()));
        }

        for (stage_idx, stage) in stages.iter().enumerate() {
            for weak in stage.weak_classifiers() {
                for r in weak.feature().rects() {
                    if !fits_window(&r.rect, window_width, window_height) {
                        return Err(Error::InvalidModel(format!(
                            "feature rectangle {:?} of stage {} is outside the {}x{} window",
                            r.rect, stage_idx, window_width, window_height
                        )));
                    }
                }
            }
        }

        Ok(Model {
            window_width,
            window_height,
            stages,
        })
    }

    pub fn window_width(&self) -> u32 {
        self.window_width
    }

    pub fn window_height(&self) -> u32 {
        self.window_height
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

/// Non-empty and inside the window, checked without edge overflow.
fn fits_window(rect: &Rectangle, window_width: u32, window_height: u32) -> bool {
    let (x, y) = (i64::from(rect.x()), i64::from(rect.y()));
    !rect.is_empty()
        && x >= 0
        && y >= 0
        && x + i64::from(rect.width()) <= i64::from(window_width)
        && y + i64::from(rect.height()) <= i64::from(window_height)
}

/// Load a cascade model from a file. Files with an `.xml` extension are
/// read as OpenCV cascades, anything else as the binary format.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Model> {
    let is_xml = path
        .as_ref()
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xml"));
    let model = if is_xml {
        read_cascade_xml(&fs::read_to_string(path.as_ref())?)?
    } else {
        read_model(BufReader::new(File::open(path.as_ref())?))?
    };
    debug!(
        path = %path.as_ref().display(),
        stages = model.stages.len(),
        "loaded cascade model"
    );
    Ok(model)
}

/// Read a cascade model from any byte source.
pub fn read_model<R: Read>(reader: R) -> Result<Model> {
    ModelReader::new(reader).read()
}

struct ModelReader<R: Read> {
    reader: R,
}

impl<R: Read> ModelReader<R> {
    fn new(reader: R) -> Self {
        ModelReader { reader }
    }

    fn read(mut self) -> Result<Model> {
        let window_width = self.read_count("window width")? as u32;
        let window_height = self.read_count("window height")? as u32;
        let num_stages = self.read_count("stage count")?;

        let mut stages = Vec::with_capacity(num_stages.min(MAX_PREALLOCATED));
        for _ in 0..num_stages {
            stages.push(self.read_stage()?);
        }

        Model::new(window_width, window_height, stages)
    }

    fn read_stage(&mut self) -> Result<Stage> {
        let threshold = self.read_f32()?;
        let num_weak = self.read_count("weak classifier count")?;

        let mut weak_classifiers = Vec::with_capacity(num_weak.min(MAX_PREALLOCATED));
        for _ in 0..num_weak {
            weak_classifiers.push(self.read_weak_classifier()?);
        }

        Ok(Stage::new(threshold, weak_classifiers))
    }

    fn read_weak_classifier(&mut self) -> Result<WeakClassifier> {
        let num_rects = self.read_i32()?;
        if num_rects <= 0 || num_rects > MAX_RECTS_PER_FEATURE {
            return Err(Error::InvalidModel(format!(
                "unexpected rectangle count: {}",
                num_rects
            )));
        }

        let mut rects = Vec::with_capacity(num_rects as usize);
        for _ in 0..num_rects {
            let x = self.read_i32()?;
            let y = self.read_i32()?;
            let w = self.read_i32()?;
            let h = self.read_i32()?;
            let weight = self.read_f32()?;
            if w < 0 || h < 0 {
                return Err(Error::InvalidModel(format!(
                    "negative rectangle size: {}x{}",
                    w, h
                )));
            }
            rects.push(WeightedRect::new(
                Rectangle::new(x, y, w as u32, h as u32),
                weight,
            ));
        }

        let threshold = self.read_f32()?;
        let left_val = self.read_f32()?;
        let right_val = self.read_f32()?;

        Ok(WeakClassifier::new(
            HaarFeature::new(rects),
            threshold,
            left_val,
            right_val,
        ))
    }

    fn read_count(&mut self, what: &str) -> Result<usize> {
        let value = self.read_i32()?;
        if value < 0 {
            return Err(Error::InvalidModel(format!("negative {}: {}", what, value)));
        }
        Ok(value as usize)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.reader.read_i32::<LittleEndian>()?)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(self.reader.read_f32::<LittleEndian>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;

    fn write_rect(buf: &mut Vec<u8>, x: i32, y: i32, w: i32, h: i32, weight: f32) {
        for v in [x, y, w, h] {
            buf.write_i32::<LittleEndian>(v).unwrap();
        }
        buf.write_f32::<LittleEndian>(weight).unwrap();
    }

    fn edge_model_bytes() -> Vec<u8> {
        let mut buf = vec![];
        buf.write_i32::<LittleEndian>(20).unwrap();
        buf.write_i32::<LittleEndian>(20).unwrap();
        buf.write_i32::<LittleEndian>(1).unwrap();

        buf.write_f32::<LittleEndian>(0.5).unwrap();
        buf.write_i32::<LittleEndian>(1).unwrap();

        buf.write_i32::<LittleEndian>(2).unwrap();
        write_rect(&mut buf, 0, 0, 20, 20, -1.0);
        write_rect(&mut buf, 0, 0, 10, 20, 2.0);
        buf.write_f32::<LittleEndian>(0.5).unwrap();
        buf.write_f32::<LittleEndian>(-1.0).unwrap();
        buf.write_f32::<LittleEndian>(1.0).unwrap();
        buf
    }

    #[test]
    fn test_read_model() {
        let model = read_model(Cursor::new(edge_model_bytes())).unwrap();

        assert_eq!(20, model.window_width());
        assert_eq!(20, model.window_height());
        assert_eq!(1, model.stages().len());

        let stage = &model.stages()[0];
        assert_eq!(0.5, stage.threshold());
        assert_eq!(1, stage.weak_classifiers().len());

        let rects = stage.weak_classifiers()[0].feature().rects();
        assert_eq!(2, rects.len());
        assert_eq!(Rectangle::new(0, 0, 10, 20), rects[1].rect);
        assert_eq!(2.0, rects[1].weight);
    }

    #[test]
    fn test_truncated_model_is_io_error() {
        let mut bytes = edge_model_bytes();
        bytes.truncate(bytes.len() - 3);

        match read_model(Cursor::new(bytes)) {
            Err(Error::Io(_)) => {}
            other => panic!("Expected I/O error, got {:?}", other),
        }
    }

    #[test]
    fn test_rect_outside_window_is_rejected() {
        let mut buf = vec![];
        for v in [10, 10, 1] {
            buf.write_i32::<LittleEndian>(v).unwrap();
        }
        buf.write_f32::<LittleEndian>(0.0).unwrap();
        buf.write_i32::<LittleEndian>(1).unwrap();
        buf.write_i32::<LittleEndian>(1).unwrap();
        write_rect(&mut buf, 5, 5, 10, 10, 1.0);
        for v in [0.0, -1.0, 1.0] {
            buf.write_f32::<LittleEndian>(v).unwrap();
        }

        match read_model(Cursor::new(buf)) {
            Err(Error::InvalidModel(_)) => {}
            other => panic!("Expected invalid model, got {:?}", other),
        }
    }

    #[test]
    fn test_rect_at_extreme_offset_is_rejected() {
        for (x, y) in [(i32::MAX, 0), (0, i32::MAX), (i32::MIN, 0)] {
            let mut buf = vec![];
            for v in [20, 20, 1] {
                buf.write_i32::<LittleEndian>(v).unwrap();
            }
            buf.write_f32::<LittleEndian>(0.0).unwrap();
            buf.write_i32::<LittleEndian>(1).unwrap();
            buf.write_i32::<LittleEndian>(1).unwrap();
            write_rect(&mut buf, x, y, 10, 10, 1.0);
            for v in [0.0, -1.0, 1.0] {
                buf.write_f32::<LittleEndian>(v).unwrap();
            }

            assert!(matches!(
                read_model(Cursor::new(buf)),
                Err(Error::InvalidModel(_))
            ));
        }
    }

    #[test]
    fn test_bad_rect_count_is_rejected() {
        let mut buf = vec![];
        for v in [20, 20, 1] {
            buf.write_i32::<LittleEndian>(v).unwrap();
        }
        buf.write_f32::<LittleEndian>(0.0).unwrap();
        buf.write_i32::<LittleEndian>(1).unwrap();
        buf.write_i32::<LittleEndian>(7).unwrap();

        assert!(matches!(
            read_model(Cursor::new(buf)),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_model("/nonexistent/cascade.bin"),
            Err(Error::Io(_))
        ));
    }
}
