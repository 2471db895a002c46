// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use std::cmp;
use std::fmt;

use image::GrayImage;

use super::Rectangle;

/// Owned 8-bit grayscale image, stored row by row.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ImageData {
    /// # Panics
    ///
    /// Panics if `data` does not hold exactly `width * height` bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize,
            "Image buffer does not match {}x{}",
            width,
            height
        );
        ImageData {
            data,
            width,
            height,
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        ImageData::new(data, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.width, self.height)
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    /// Copy of the part of the image covered by `roi`.
    ///
    /// The region is clipped to the image bounds; `None` is returned when
    /// nothing of it lies inside the image.
    pub fn crop(&self, roi: &Rectangle) -> Option<ImageData> {
        let roi = self.bounds().intersect(roi)?;
        let x = roi.x() as usize;
        let width = roi.width() as usize;

        let mut data = Vec::with_capacity(width * roi.height() as usize);
        for row in roi.y()..roi.bottom() {
            let start = row as usize * self.width as usize + x;
            data.extend_from_slice(&self.data[start..start + width]);
        }

        Some(ImageData::new(data, roi.width(), roi.height()))
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl From<GrayImage> for ImageData {
    fn from(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        ImageData::new(image.into_raw(), width, height)
    }
}

impl From<&GrayImage> for ImageData {
    fn from(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        ImageData::new(image.as_raw().clone(), width, height)
    }
}

/// Successively down-scaled copies of one image.
///
/// Scales start at `max_scale` and are multiplied by `scale_step` until they
/// drop below `min_scale`.
pub struct ImagePyramid {
    image_1x: ImageData,
    max_scale: f32,
    min_scale: f32,
    scale_factor: f32,
    scale_step: f32,
}

impl ImagePyramid {
    pub fn new(image: ImageData) -> Self {
        ImagePyramid {
            image_1x: image,
            max_scale: 1.0,
            min_scale: 1.0,
            scale_factor: 1.0,
            scale_step: 0.8,
        }
    }

    pub fn set_max_scale(&mut self, max_scale: f32) {
        self.max_scale = max_scale;
        self.scale_factor = max_scale;
    }

    pub fn set_min_scale(&mut self, min_scale: f32) {
        self.min_scale = min_scale;
    }

    pub fn set_scale_step(&mut self, scale_step: f32) {
        if scale_step > 0.0 && scale_step < 1.0 {
            self.scale_step = scale_step;
        }
    }

    pub fn get_image_1x(&self) -> &ImageData {
        &self.image_1x
    }

    /// Next pyramid level together with its scale relative to the original image.
    pub fn get_next_scale_image(&mut self) -> Option<(ImageData, f32)> {
        if self.scale_factor < self.min_scale {
            return None;
        }

        let scale_factor = self.scale_factor;
        let width_scaled = (self.image_1x.width() as f32 * scale_factor) as u32;
        let height_scaled = (self.image_1x.height() as f32 * scale_factor) as u32;
        if width_scaled == 0 || height_scaled == 0 {
            return None;
        }

        let img_scaled = resize_image(&self.image_1x, width_scaled, height_scaled);
        self.scale_factor *= self.scale_step;

        Some((img_scaled, scale_factor))
    }
}

/// Bilinear resampling of `src` to `width` x `height`.
pub fn resize_image(src: &ImageData, width: u32, height: u32) -> ImageData {
    if src.width() == width && src.height() == height {
        return src.clone();
    }

    let mut dest = Vec::with_capacity(width as usize * height as usize);
    if src.is_empty() {
        dest.resize(width as usize * height as usize, 0);
        return ImageData::new(dest, width, height);
    }

    let lf_x_scl = f64::from(src.width()) / f64::from(width);
    let lf_y_scl = f64::from(src.height()) / f64::from(height);
    let max_x = src.width() - 1;
    let max_y = src.height() - 1;

    for y in 0..height {
        let lf_y_s = lf_y_scl * f64::from(y);
        let n_y_s = cmp::min(lf_y_s as u32, max_y);
        let n_y_s1 = cmp::min(n_y_s + 1, max_y);
        let lf_weight_y = lf_y_s - f64::from(n_y_s);

        for x in 0..width {
            let lf_x_s = lf_x_scl * f64::from(x);
            let n_x_s = cmp::min(lf_x_s as u32, max_x);
            let n_x_s1 = cmp::min(n_x_s + 1, max_x);
            let lf_weight_x = lf_x_s - f64::from(n_x_s);

            let d1 = f64::from(src.pixel(n_x_s, n_y_s));
            let d2 = f64::from(src.pixel(n_x_s1, n_y_s));
            let d3 = f64::from(src.pixel(n_x_s, n_y_s1));
            let d4 = f64::from(src.pixel(n_x_s1, n_y_s1));

            let dest_val = (1.0 - lf_weight_y) * ((1.0 - lf_weight_x) * d1 + lf_weight_x * d2)
                + lf_weight_y * ((1.0 - lf_weight_x) * d3 + lf_weight_x * d4);

            dest.push(dest_val.round() as u8);
        }
    }

    ImageData::new(dest, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_inside() {
        let image = ImageData::from_fn(10, 8, |x, y| (y * 10 + x) as u8);
        let crop = image.crop(&Rectangle::new(2, 3, 4, 2)).unwrap();

        assert_eq!(4, crop.width());
        assert_eq!(2, crop.height());
        assert_eq!(&[32, 33, 34, 35, 42, 43, 44, 45], crop.data());
    }

    #[test]
    fn test_crop_clipped_and_outside() {
        let image = ImageData::from_fn(10, 8, |x, y| (y * 10 + x) as u8);

        let clipped = image.crop(&Rectangle::new(8, 6, 5, 5)).unwrap();
        assert_eq!((2, 2), (clipped.width(), clipped.height()));
        assert_eq!(&[68, 69, 78, 79], clipped.data());

        assert!(image.crop(&Rectangle::new(10, 0, 5, 5)).is_none());
    }

    #[test]
    fn test_resize_same_size_is_copy() {
        let image = ImageData::from_fn(5, 5, |x, y| (x * y) as u8);
        assert_eq!(image, resize_image(&image, 5, 5));
    }

    #[test]
    fn test_resize_constant_image() {
        let image = ImageData::from_fn(40, 30, |_, _| 77);
        let resized = resize_image(&image, 13, 9);
        assert_eq!(13, resized.width());
        assert_eq!(9, resized.height());
        assert!(resized.data().iter().all(|v| *v == 77));
    }

    #[test]
    fn test_pyramid_scales() {
        let image = ImageData::from_fn(100, 50, |_, _| 0);
        let mut pyramid = ImagePyramid::new(image);
        pyramid.set_scale_step(0.5);
        pyramid.set_min_scale(0.2);

        let mut levels = vec![];
        while let Some((level, scale)) = pyramid.get_next_scale_image() {
            levels.push((level.width(), level.height(), scale));
        }

        assert_eq!(
            vec![(100, 50, 1.0), (50, 25, 0.5), (25, 12, 0.25)],
            levels
        );
    }
}
