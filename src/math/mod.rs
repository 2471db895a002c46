// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use num::traits::{WrappingAdd, WrappingSub};
use num::Zero;

use crate::common::Point;

#[inline]
pub fn to_degrees(radians: f64) -> f64 {
    radians * 180.0 / std::f64::consts::PI
}

#[inline]
pub fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

/// Row-major 2x2 matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat2 {
    m: [[f32; 2]; 2],
}

impl Mat2 {
    pub const fn new(m00: f32, m01: f32, m10: f32, m11: f32) -> Self {
        Mat2 {
            m: [[m00, m01], [m10, m11]],
        }
    }

    pub const fn identity() -> Self {
        Mat2::new(1.0, 0.0, 0.0, 1.0)
    }

    /// Rotation about the origin by `angle` degrees, scaled by `scale`.
    ///
    /// Follows the image-coordinate convention where a positive angle turns
    /// counter-clockwise on screen: `[[a, b], [-b, a]]` with
    /// `a = scale * cos(angle)` and `b = scale * sin(angle)`.
    pub fn rotation(angle: f64, scale: f64) -> Self {
        let theta = to_radians(angle);
        let alpha = (theta.cos() * scale) as f32;
        let beta = (theta.sin() * scale) as f32;
        Mat2::new(alpha, beta, -beta, alpha)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.m[row][col]
    }

    pub fn scaled(&self, factor: f32) -> Mat2 {
        Mat2::new(
            self.m[0][0] * factor,
            self.m[0][1] * factor,
            self.m[1][0] * factor,
            self.m[1][1] * factor,
        )
    }

    #[inline]
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.m[0][0] * p.x + self.m[0][1] * p.y,
            self.m[1][0] * p.x + self.m[1][1] * p.y,
        )
    }

    pub fn determinant(&self) -> f32 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }
}

impl Default for Mat2 {
    fn default() -> Self {
        Mat2::identity()
    }
}

/// Summed-area table of `input` with one leading row and column of zeros.
///
/// Entry `(x, y)` of the `(width + 1) x (height + 1)` table holds the sum of
/// `map(pixel)` over all pixels above and to the left of `(x, y)`. Sums wrap
/// on overflow; rectangle sums taken with [`rect_sum`] are still exact as
/// long as the true sum over the rectangle fits into `T`.
pub fn integral_image<T, F>(input: &[u8], width: u32, height: u32, map: F) -> Vec<T>
where
    T: Copy + Zero + WrappingAdd,
    F: Fn(u8) -> T,
{
    let width = width as usize;
    let height = height as usize;
    assert_eq!(input.len(), width * height);

    let stride = width + 1;
    let mut table = vec![T::zero(); stride * (height + 1)];

    for y in 0..height {
        let mut row_sum = T::zero();
        let src = &input[y * width..(y + 1) * width];
        for x in 0..width {
            row_sum = row_sum.wrapping_add(&map(src[x]));
            let above = table[y * stride + x + 1];
            table[(y + 1) * stride + x + 1] = above.wrapping_add(&row_sum);
        }
    }

    table
}

/// Sum over the `w` x `h` rectangle at `(x, y)` of a table built by [`integral_image`].
#[inline]
pub fn rect_sum<T>(table: &[T], stride: usize, x: usize, y: usize, w: usize, h: usize) -> T
where
    T: Copy + WrappingAdd + WrappingSub,
{
    let top_left = table[y * stride + x];
    let top_right = table[y * stride + x + w];
    let bottom_left = table[(y + h) * stride + x];
    let bottom_right = table[(y + h) * stride + x + w];

    bottom_right
        .wrapping_sub(&bottom_left)
        .wrapping_sub(&top_right)
        .wrapping_add(&top_left)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degrees_radians() {
        assert!((to_degrees(std::f64::consts::PI) - 180.0).abs() < 1e-12);
        assert!((to_radians(90.0) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((to_radians(to_degrees(0.3)) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_matrix() {
        let rot = Mat2::rotation(90.0, 1.0);
        let p = rot.apply(Point::new(1.0, 0.0));
        assert!(p.x.abs() < 1e-6);
        assert!((p.y + 1.0).abs() < 1e-6);

        let scaled = Mat2::rotation(0.0, 2.0);
        assert_eq!(Point::new(2.0, 4.0), scaled.apply(Point::new(1.0, 2.0)));
        assert!((scaled.determinant() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_identity() {
        let p = Point::new(3.5, -1.25);
        assert_eq!(p, Mat2::identity().apply(p));
        assert_eq!(Mat2::identity(), Mat2::rotation(0.0, 1.0));
    }

    #[test]
    fn test_integral_image() {
        let input: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
        let table: Vec<u32> = integral_image(&input, 3, 2, u32::from);

        assert_eq!(vec![0, 0, 0, 0, 0, 1, 3, 6, 0, 5, 12, 21], table);
        assert_eq!(21, rect_sum(&table, 4, 0, 0, 3, 2));
        assert_eq!(11, rect_sum(&table, 4, 1, 1, 2, 1));
        assert_eq!(7, rect_sum(&table, 4, 1, 0, 1, 2));
    }

    #[test]
    fn test_integral_image_of_squares_wraps() {
        let input = vec![255u8; 300 * 300];
        let squares: Vec<u32> = integral_image(&input, 300, 300, |v| u32::from(v) * u32::from(v));

        // the full table overflows u32, a small window is still exact
        assert_eq!(400 * 65025, rect_sum(&squares, 301, 150, 150, 20, 20));
    }
}
