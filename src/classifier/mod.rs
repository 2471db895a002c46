// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use crate::common::Rectangle;
use crate::feat::HaarFeatureMap;

/// Rectangle of a Haar feature together with its weight.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedRect {
    pub rect: Rectangle,
    pub weight: f32,
}

impl WeightedRect {
    pub fn new(rect: Rectangle, weight: f32) -> Self {
        WeightedRect { rect, weight }
    }
}

/// Haar-like feature: weighted sum of pixel sums over rectangles inside the window.
#[derive(Clone, Debug, PartialEq)]
pub struct HaarFeature {
    rects: Vec<WeightedRect>,
}

impl HaarFeature {
    pub fn new(rects: Vec<WeightedRect>) -> Self {
        HaarFeature { rects }
    }

    pub fn rects(&self) -> &[WeightedRect] {
        &self.rects
    }

    #[inline]
    fn evaluate(&self, feature_map: &HaarFeatureMap, x: u32, y: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| f64::from(feature_map.rect_sum(x, y, &r.rect)) * f64::from(r.weight))
            .sum()
    }
}

/// Decision stump over a single feature.
#[derive(Clone, Debug, PartialEq)]
pub struct WeakClassifier {
    feature: HaarFeature,
    threshold: f32,
    left_val: f32,
    right_val: f32,
}

impl WeakClassifier {
    pub fn new(feature: HaarFeature, threshold: f32, left_val: f32, right_val: f32) -> Self {
        WeakClassifier {
            feature,
            threshold,
            left_val,
            right_val,
        }
    }

    pub fn feature(&self) -> &HaarFeature {
        &self.feature
    }

    /// `inv_area` is the reciprocal window area and `norm_factor` the window
    /// standard deviation used for variance normalization.
    #[inline]
    fn classify(
        &self,
        feature_map: &HaarFeatureMap,
        x: u32,
        y: u32,
        inv_area: f64,
        norm_factor: f64,
    ) -> f32 {
        let value = self.feature.evaluate(feature_map, x, y) * inv_area;
        if value < f64::from(self.threshold) * norm_factor {
            self.left_val
        } else {
            self.right_val
        }
    }
}

/// Boosted stage: the window passes when the sum of its weak classifier
/// votes reaches the stage threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    threshold: f32,
    weak_classifiers: Vec<WeakClassifier>,
}

impl Stage {
    pub fn new(threshold: f32, weak_classifiers: Vec<WeakClassifier>) -> Self {
        Stage {
            threshold,
            weak_classifiers,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn weak_classifiers(&self) -> &[WeakClassifier] {
        &self.weak_classifiers
    }
}

/// Result of running the cascade over one window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Score {
    positive: bool,
    score: f32,
}

impl Score {
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.positive
    }

    #[inline]
    pub fn score(&self) -> f32 {
        self.score
    }
}

/// Runs the stages over the window at `(x, y)` of size `wnd_width` x `wnd_height`.
///
/// Evaluation stops at the first rejecting stage; the score is the vote sum
/// of the last evaluated stage.
pub fn classify(
    stages: &[Stage],
    feature_map: &HaarFeatureMap,
    x: u32,
    y: u32,
    wnd_width: u32,
    wnd_height: u32,
) -> Score {
    let roi = Rectangle::new(x as i32, y as i32, wnd_width, wnd_height);
    let inv_area = 1.0 / roi.area() as f64;
    let std_dev = feature_map.get_std_dev(&roi);
    let norm_factor = if std_dev > 0.0 { std_dev } else { 1.0 };

    let mut score = 0.0;
    for stage in stages {
        score = stage
            .weak_classifiers
            .iter()
            .map(|c| c.classify(feature_map, x, y, inv_area, norm_factor))
            .sum();

        if score < stage.threshold {
            return Score {
                positive: false,
                score,
            };
        }
    }

    Score {
        positive: true,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ImageData;

    /// Fires on windows that are bright on the left and dark on the right.
    fn edge_stage() -> Stage {
        let feature = HaarFeature::new(vec![
            WeightedRect::new(Rectangle::new(0, 0, 20, 20), -1.0),
            WeightedRect::new(Rectangle::new(0, 0, 10, 20), 2.0),
        ]);
        Stage::new(0.5, vec![WeakClassifier::new(feature, 0.5, -1.0, 1.0)])
    }

    fn feature_map(image: &ImageData) -> HaarFeatureMap {
        let mut map = HaarFeatureMap::new();
        map.compute(image);
        map
    }

    #[test]
    fn test_edge_window_is_positive() {
        let image = ImageData::from_fn(20, 20, |x, _| if x < 10 { 255 } else { 0 });
        let score = classify(&[edge_stage()], &feature_map(&image), 0, 0, 20, 20);

        assert!(score.is_positive());
        assert_eq!(1.0, score.score());
    }

    #[test]
    fn test_flat_and_inverted_windows_are_rejected() {
        let flat = ImageData::from_fn(20, 20, |_, _| 128);
        let score = classify(&[edge_stage()], &feature_map(&flat), 0, 0, 20, 20);
        assert!(!score.is_positive());
        assert_eq!(-1.0, score.score());

        let inverted = ImageData::from_fn(20, 20, |x, _| if x < 10 { 0 } else { 255 });
        let score = classify(&[edge_stage()], &feature_map(&inverted), 0, 0, 20, 20);
        assert!(!score.is_positive());
    }

    #[test]
    fn test_later_stage_can_reject() {
        let image = ImageData::from_fn(20, 20, |x, _| if x < 10 { 255 } else { 0 });
        let always_reject = Stage::new(
            5.0,
            vec![WeakClassifier::new(
                HaarFeature::new(vec![WeightedRect::new(Rectangle::new(0, 0, 1, 1), 1.0)]),
                0.0,
                1.0,
                1.0,
            )],
        );

        let score = classify(
            &[edge_stage(), always_reject],
            &feature_map(&image),
            0,
            0,
            20,
            20,
        );
        assert!(!score.is_positive());
        assert_eq!(1.0, score.score());
    }
}
