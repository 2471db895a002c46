// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use std::cmp;
use std::sync::Arc;

use tracing::{span, trace, Level};

use crate::classifier;
use crate::common::{ImageData, ImagePyramid, Rectangle, Seq};
use crate::feat::HaarFeatureMap;
use crate::model::Model;
use crate::Detector;

const GROUP_EPS: f32 = 0.2;

/// Multi-scale sliding-window detector driven by a boosted Haar cascade.
///
/// The image, not the cascade, is rescaled between levels. Raw hits are
/// grouped and only groups with more than `min_neighbors` members are
/// reported.
#[derive(Clone)]
pub struct CascadeDetector {
    model: Arc<Model>,
    feature_map: HaarFeatureMap,
    min_object_size: u32,
    max_object_size: u32,
    scale_factor: f32,
    min_neighbors: u32,
}

impl Detector for CascadeDetector {
    fn detect(&mut self, image: &ImageData) -> Vec<Rectangle> {
        if image.is_empty() {
            return vec![];
        }

        let _span = span!(
            Level::TRACE,
            "cascade_detect",
            width = image.width(),
            height = image.height()
        )
        .entered();

        let candidates = self.detect_candidates(image);
        trace!(candidates = candidates.len(), "sliding window pass done");

        group_rectangles(&candidates, self.min_neighbors, GROUP_EPS)
    }
}

impl CascadeDetector {
    pub fn new(model: Model) -> Self {
        CascadeDetector::with_shared_model(Arc::new(model))
    }

    /// Detector reusing an already loaded model, e.g. one per worker thread.
    pub fn with_shared_model(model: Arc<Model>) -> Self {
        CascadeDetector {
            model,
            feature_map: HaarFeatureMap::new(),
            min_object_size: 20,
            max_object_size: 0,
            scale_factor: 1.1,
            min_neighbors: 3,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Set the minimum size of objects to detect.
    ///
    /// # Panics
    ///
    /// Panics if `min_object_size` is 0.
    pub fn set_min_object_size(&mut self, min_object_size: u32) {
        if min_object_size == 0 {
            panic!("Illegal min object size: {}", min_object_size);
        }
        self.min_object_size = min_object_size;
    }

    pub fn min_object_size(&self) -> u32 {
        self.min_object_size
    }

    /// Set the maximum size of objects to detect, 0 for no limit.
    ///
    /// The maximum size actually used is further bounded by the image size.
    #[inline]
    pub fn set_max_object_size(&mut self, max_object_size: u32) {
        self.max_object_size = max_object_size;
    }

    pub fn max_object_size(&self) -> u32 {
        self.max_object_size
    }

    /// Set the factor between object sizes searched at adjacent pyramid levels.
    ///
    /// For example, with 1.25 the image is searched at 1, 0.8, 0.64, ...
    /// of its original size.
    ///
    /// # Panics
    ///
    /// Panics if `scale_factor` is not greater than 1.0.
    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        if !(scale_factor > 1.0 && scale_factor.is_finite()) {
            panic!("Illegal scale factor: {}", scale_factor);
        }
        self.scale_factor = scale_factor;
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Set how many raw hits a group needs beyond the first to be reported.
    ///
    /// With 0, raw hits are returned without grouping.
    pub fn set_min_neighbors(&mut self, min_neighbors: u32) {
        self.min_neighbors = min_neighbors;
    }

    pub fn min_neighbors(&self) -> u32 {
        self.min_neighbors
    }

    fn detect_candidates(&mut self, image: &ImageData) -> Vec<Rectangle> {
        let wnd_width = self.model.window_width();
        let wnd_height = self.model.window_height();

        let mut max_object_size = cmp::min(image.width(), image.height()) as f32;
        if self.max_object_size > 0 {
            max_object_size = max_object_size.min(self.max_object_size as f32);
        }

        // largest scale at which the window still covers min_object_size
        let max_scale = cmp::min(wnd_width, wnd_height) as f32 / self.min_object_size as f32;

        let mut image_pyramid = ImagePyramid::new(image.clone());
        image_pyramid.set_max_scale(max_scale.min(1.0));
        image_pyramid.set_scale_step(1.0 / self.scale_factor);
        image_pyramid.set_min_scale(f32::max(
            wnd_width as f32 / image.width() as f32,
            wnd_height as f32 / image.height() as f32,
        ));

        let mut candidates = vec![];
        while let Some((image_scaled, scale_factor)) = image_pyramid.get_next_scale_image() {
            let object_width = wnd_width as f32 / scale_factor;
            let object_height = wnd_height as f32 / scale_factor;

            if object_width.min(object_height) > max_object_size {
                break;
            }
            if image_scaled.width() < wnd_width || image_scaled.height() < wnd_height {
                break;
            }

            self.feature_map.compute(&image_scaled);

            let step = if 1.0 / scale_factor > 2.0 { 1 } else { 2 };
            let max_x = image_scaled.width() - wnd_width;
            let max_y = image_scaled.height() - wnd_height;

            for y in Seq::new(0, move |n| n + step).take_while(move |n| *n <= max_y) {
                for x in Seq::new(0, move |n| n + step).take_while(move |n| *n <= max_x) {
                    let score = classifier::classify(
                        self.model.stages(),
                        &self.feature_map,
                        x,
                        y,
                        wnd_width,
                        wnd_height,
                    );
                    if score.is_positive() {
                        candidates.push(Rectangle::new(
                            (x as f32 / scale_factor + 0.5) as i32,
                            (y as f32 / scale_factor + 0.5) as i32,
                            (object_width + 0.5) as u32,
                            (object_height + 0.5) as u32,
                        ));
                    }
                }
            }
        }

        candidates
    }
}

/// Clusters overlapping hits and averages each cluster.
///
/// Two rectangles belong to the same cluster when all their edges are within
/// `eps * (min width + min height) / 2` of each other (transitively). Clusters
/// with `min_neighbors` or fewer members are dropped, as are clusters lying
/// inside a better supported one. `min_neighbors == 0` disables grouping.
pub fn group_rectangles(rects: &[Rectangle], min_neighbors: u32, eps: f32) -> Vec<Rectangle> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let (labels, num_classes) = partition(rects, |a, b| similar_rects(a, b, eps));

    let mut sums = vec![[0f64; 4]; num_classes];
    let mut counts = vec![0u32; num_classes];
    for (rect, &label) in rects.iter().zip(labels.iter()) {
        let sum = &mut sums[label];
        sum[0] += f64::from(rect.x());
        sum[1] += f64::from(rect.y());
        sum[2] += f64::from(rect.width());
        sum[3] += f64::from(rect.height());
        counts[label] += 1;
    }

    let groups: Vec<(Rectangle, u32)> = sums
        .iter()
        .zip(counts.iter())
        .map(|(sum, &n)| {
            let s = 1.0 / f64::from(n);
            let rect = Rectangle::new(
                (sum[0] * s).round() as i32,
                (sum[1] * s).round() as i32,
                (sum[2] * s).round() as u32,
                (sum[3] * s).round() as u32,
            );
            (rect, n)
        })
        .collect();

    let mut result = vec![];
    for (i, &(r1, n1)) in groups.iter().enumerate() {
        if n1 <= min_neighbors {
            continue;
        }

        let nested = groups.iter().enumerate().any(|(j, &(r2, n2))| {
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width() as f32 * eps).round() as i32;
            let dy = (r2.height() as f32 * eps).round() as i32;

            r1.x() >= r2.x() - dx
                && r1.y() >= r2.y() - dy
                && r1.right() <= r2.right() + dx
                && r1.bottom() <= r2.bottom() + dy
                && (n2 > cmp::max(3, n1) || n1 < 3)
        });

        if !nested {
            result.push(r1);
        }
    }

    result
}

fn similar_rects(r1: &Rectangle, r2: &Rectangle, eps: f32) -> bool {
    let delta = eps
        * (cmp::min(r1.width(), r2.width()) + cmp::min(r1.height(), r2.height())) as f32
        * 0.5;

    (r1.x() - r2.x()).abs() as f32 <= delta
        && (r1.y() - r2.y()).abs() as f32 <= delta
        && (r1.right() - r2.right()).abs() as f32 <= delta
        && (r1.bottom() - r2.bottom()).abs() as f32 <= delta
}

/// Splits `items` into equivalence classes of the transitive closure of `same`.
///
/// Returns the class label of every item and the number of classes; labels
/// are numbered in order of first appearance.
fn partition<T, F>(items: &[T], same: F) -> (Vec<usize>, usize)
where
    F: Fn(&T, &T) -> bool,
{
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut parent: Vec<usize> = (0..items.len()).collect();
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if same(&items[i], &items[j]) {
                let root_i = find(&mut parent, i);
                let root_j = find(&mut parent, j);
                if root_i != root_j {
                    parent[root_j] = root_i;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; items.len()];
    let mut num_classes = 0;
    let mut labels = Vec::with_capacity(items.len());
    for i in 0..items.len() {
        let root = find(&mut parent, i);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = num_classes;
            num_classes += 1;
        }
        labels.push(class_of_root[root]);
    }

    (labels, num_classes)
}
