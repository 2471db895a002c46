// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use crate::common::{ImageData, Rectangle};
use crate::math;

/// Summed-area tables of one pyramid level, used to evaluate Haar features.
#[derive(Clone)]
pub struct HaarFeatureMap {
    width: u32,
    int_img: Vec<u32>,
    square_int_img: Vec<u32>,
}

impl HaarFeatureMap {
    #[inline]
    pub fn new() -> Self {
        HaarFeatureMap {
            width: 0,
            int_img: Vec::new(),
            square_int_img: Vec::new(),
        }
    }

    pub fn compute(&mut self, image: &ImageData) {
        let width = image.width();
        let height = image.height();

        if width == 0 || height == 0 {
            panic!("Illegal arguments: width ({}), height ({})", width, height);
        }

        self.width = width;
        self.int_img = math::integral_image(image.data(), width, height, u32::from);
        // overflow does happen here for large images, window sums stay exact
        self.square_int_img = math::integral_image(image.data(), width, height, |v| {
            u32::from(v) * u32::from(v)
        });
    }

    #[inline]
    fn stride(&self) -> usize {
        self.width as usize + 1
    }

    /// Pixel sum over `rect`, given relative to the window origin `(x, y)`.
    #[inline]
    pub fn rect_sum(&self, x: u32, y: u32, rect: &Rectangle) -> u32 {
        math::rect_sum(
            &self.int_img,
            self.stride(),
            (x as i32 + rect.x()) as usize,
            (y as i32 + rect.y()) as usize,
            rect.width() as usize,
            rect.height() as usize,
        )
    }

    /// Standard deviation of the pixel values inside `roi`.
    pub fn get_std_dev(&self, roi: &Rectangle) -> f64 {
        let x = roi.x() as usize;
        let y = roi.y() as usize;
        let w = roi.width() as usize;
        let h = roi.height() as usize;
        let area = (w * h) as f64;

        let sum = math::rect_sum(&self.int_img, self.stride(), x, y, w, h);
        let square_sum = math::rect_sum(&self.square_int_img, self.stride(), x, y, w, h);

        let mean = f64::from(sum) / area;
        let m2 = f64::from(square_sum) / area;
        let variance = m2 - mean * mean;

        if variance > 0.0 {
            variance.sqrt()
        } else {
            0.0
        }
    }
}

impl Default for HaarFeatureMap {
    fn default() -> Self {
        HaarFeatureMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_dev_of_constant_window() {
        let image = ImageData::from_fn(30, 30, |_, _| 200);
        let mut map = HaarFeatureMap::new();
        map.compute(&image);

        assert_eq!(0.0, map.get_std_dev(&Rectangle::new(5, 5, 20, 20)));
    }

    #[test]
    fn test_std_dev_of_two_tone_window() {
        let image = ImageData::from_fn(20, 20, |x, _| if x < 10 { 255 } else { 0 });
        let mut map = HaarFeatureMap::new();
        map.compute(&image);

        let std_dev = map.get_std_dev(&Rectangle::new(0, 0, 20, 20));
        assert!((std_dev - 127.5).abs() < 1e-9);
    }

    #[test]
    fn test_rect_sum_relative_to_window() {
        let image = ImageData::from_fn(8, 8, |x, y| (x + y) as u8);
        let mut map = HaarFeatureMap::new();
        map.compute(&image);

        // window at (2, 3), rect covers pixels (3..5, 4..5)
        let sum = map.rect_sum(2, 3, &Rectangle::new(1, 1, 2, 1));
        assert_eq!((3 + 4) + (4 + 4), sum);
    }
}
