// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use landmark_aam::dataset::{self, Sample};
use landmark_aam::{
    normalized_error, reference_shape, CascadeDetector, Detector, EyeLandmarks, ImageData,
    InitialPose, Point, PoseInitializer, Rectangle, Shape,
};

/// Prepare AAM training: detect faces and eyes on every training image and
/// place the reference shape in each of them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Cascade model for the face detector (OpenCV Haar XML or binary)
    face_cascade: PathBuf,

    /// Cascade model for the eye detector (OpenCV Haar XML or binary)
    eyes_cascade: PathBuf,

    /// Where to save the reference shape (.pts)
    model_path: PathBuf,

    /// Text file listing the training images, one per line
    images: PathBuf,

    /// Text file listing the annotation files, one per line
    annotations: PathBuf,

    /// Use this shape instead of the mean of the annotations
    #[arg(long, value_name = "FILE")]
    mean_shape: Option<PathBuf>,

    /// Write per-sample results to this file
    #[arg(short, long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Save every image with its face box and shapes drawn into this directory
    #[arg(short, long, value_name = "DIR")]
    draw_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1.4)]
    face_scale_factor: f32,

    #[arg(long, default_value_t = 2)]
    face_min_neighbors: u32,

    #[arg(long, default_value_t = 30)]
    face_min_size: u32,

    #[arg(long, default_value_t = 1.1)]
    eye_scale_factor: f32,

    #[arg(long, default_value_t = 2)]
    eye_min_neighbors: u32,

    #[arg(long, default_value_t = 20)]
    eye_min_size: u32,

    /// Worker threads, all cores when unset
    #[arg(short, long)]
    threads: Option<usize>,
}

/// What happened to one training sample.
#[derive(Debug)]
enum Outcome {
    Initialized {
        face: Rectangle,
        pose: InitialPose,
        error: Option<f32>,
    },
    NoFace,
    Failed(String),
}

struct SampleReport {
    image: PathBuf,
    outcome: Outcome,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    validate(&args)?;

    configure_threads(args.threads)?;

    let mut face_detector = landmark_aam::create_detector(&args.face_cascade)
        .with_context(|| format!("failed to load {}", args.face_cascade.display()))?;
    face_detector.set_scale_factor(args.face_scale_factor);
    face_detector.set_min_neighbors(args.face_min_neighbors);
    face_detector.set_min_object_size(args.face_min_size);

    let mut eye_detector = landmark_aam::create_detector(&args.eyes_cascade)
        .with_context(|| format!("failed to load {}", args.eyes_cascade.display()))?;
    eye_detector.set_scale_factor(args.eye_scale_factor);
    eye_detector.set_min_neighbors(args.eye_min_neighbors);
    eye_detector.set_min_object_size(args.eye_min_size);

    let samples = dataset::load_dataset_list(&args.images, &args.annotations)
        .context("failed to load the dataset lists")?;
    if samples.is_empty() {
        bail!("the dataset is empty");
    }

    let annotations = samples
        .iter()
        .map(|s| {
            dataset::load_face_points(&s.annotation)
                .with_context(|| format!("failed to load {}", s.annotation.display()))
        })
        .collect::<Result<Vec<Shape>>>()?;

    let eyes = EyeLandmarks::default();
    let mean = match &args.mean_shape {
        Some(path) => dataset::load_face_points(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .centered(),
        None => reference_shape(&annotations).context("failed to build the reference shape")?,
    };
    eyes.validate(&mean)
        .context("the reference shape lacks the eye landmarks")?;
    info!(
        samples = samples.len(),
        landmarks = mean.len(),
        "dataset loaded"
    );

    if let Some(dir) = &args.draw_dir {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let trainer = Trainer {
        initializer: PoseInitializer::new(eyes),
        eyes,
        mean: &mean,
        draw_dir: args.draw_dir.as_deref(),
    };

    let now = Instant::now();
    let reports = run(&trainer, &samples, &annotations, &face_detector, &eye_detector);
    info!("processed {} samples in {:?}", reports.len(), now.elapsed());

    save_shape(&args.model_path, &mean)?;
    info!("reference shape saved to {}", args.model_path.display());

    if let Some(path) = &args.report {
        write_report(path, &reports)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("report saved to {}", path.display());
    }

    summarize(&reports);
    Ok(())
}

fn validate(args: &Args) -> Result<()> {
    for (name, value) in [
        ("face scale factor", args.face_scale_factor),
        ("eye scale factor", args.eye_scale_factor),
    ] {
        if !(value.is_finite() && value > 1.0) {
            bail!("{} must be greater than 1, got {}", name, value);
        }
    }
    if args.face_min_size == 0 || args.eye_min_size == 0 {
        bail!("minimum object sizes must be positive");
    }
    if args.threads == Some(0) {
        bail!("thread count must be positive");
    }
    Ok(())
}

#[cfg(feature = "rayon")]
fn configure_threads(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to set up worker threads")?;
    }
    Ok(())
}

#[cfg(not(feature = "rayon"))]
fn configure_threads(threads: Option<usize>) -> Result<()> {
    if threads.is_some() {
        warn!("built without rayon, --threads is ignored");
    }
    Ok(())
}

#[cfg(feature = "rayon")]
fn run(
    trainer: &Trainer,
    samples: &[Sample],
    annotations: &[Shape],
    face_detector: &CascadeDetector,
    eye_detector: &CascadeDetector,
) -> Vec<SampleReport> {
    samples
        .par_iter()
        .zip(annotations.par_iter())
        .enumerate()
        .map_init(
            || (face_detector.clone(), eye_detector.clone()),
            |(faces, eyes), (idx, (sample, truth))| trainer.process(idx, sample, truth, faces, eyes),
        )
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn run(
    trainer: &Trainer,
    samples: &[Sample],
    annotations: &[Shape],
    face_detector: &CascadeDetector,
    eye_detector: &CascadeDetector,
) -> Vec<SampleReport> {
    let mut faces = face_detector.clone();
    let mut eyes = eye_detector.clone();
    samples
        .iter()
        .zip(annotations)
        .enumerate()
        .map(|(idx, (sample, truth))| trainer.process(idx, sample, truth, &mut faces, &mut eyes))
        .collect()
}

struct Trainer<'a> {
    initializer: PoseInitializer,
    eyes: EyeLandmarks,
    mean: &'a Shape,
    draw_dir: Option<&'a Path>,
}

impl<'a> Trainer<'a> {
    fn process(
        &self,
        idx: usize,
        sample: &Sample,
        truth: &Shape,
        face_detector: &mut CascadeDetector,
        eye_detector: &mut CascadeDetector,
    ) -> SampleReport {
        let _span = span!(Level::DEBUG, "sample", idx).entered();

        let outcome = self
            .initialize(idx, sample, truth, face_detector, eye_detector)
            .unwrap_or_else(|e| {
                warn!("{}: {:#}", sample.image.display(), e);
                Outcome::Failed(format!("{:#}", e))
            });
        debug!(image = %sample.image.display(), ?outcome, "sample done");

        SampleReport {
            image: sample.image.clone(),
            outcome,
        }
    }

    fn initialize(
        &self,
        idx: usize,
        sample: &Sample,
        truth: &Shape,
        face_detector: &mut CascadeDetector,
        eye_detector: &mut CascadeDetector,
    ) -> Result<Outcome> {
        let image = image::open(&sample.image)
            .with_context(|| format!("failed to read {}", sample.image.display()))?;
        let gray = image.to_luma8();

        let faces = detect_faces(face_detector, &gray);
        let face = match choose_face(&faces, truth) {
            Some(face) => face,
            None => return Ok(Outcome::NoFace),
        };

        let pose = self.initializer.estimate(
            &ImageData::from(&gray),
            &face,
            self.mean,
            eye_detector,
        )?;
        let initial = pose.transform().apply_shape(self.mean);
        let error = normalized_error(&initial, truth, &self.eyes);

        if let Some(dir) = self.draw_dir {
            let stem = sample
                .image
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let path = dir.join(format!("{:04}_{}.png", idx, stem));
            draw(image.to_rgb8(), &face, truth, &initial)
                .save(&path)
                .with_context(|| format!("failed to save {}", path.display()))?;
        }

        Ok(Outcome::Initialized { face, pose, error })
    }
}

/// Face detection input is histogram-equalized, eye detection input is not.
fn detect_faces(detector: &mut CascadeDetector, gray: &GrayImage) -> Vec<Rectangle> {
    let equalized = imageproc::contrast::equalize_histogram(gray);
    detector.detect(&ImageData::from(equalized))
}

/// The face containing the annotation centroid, else the largest one.
fn choose_face(faces: &[Rectangle], truth: &Shape) -> Option<Rectangle> {
    let centroid = truth.centroid();
    faces
        .iter()
        .filter(|f| f.contains(centroid))
        .max_by_key(|f| f.area())
        .or_else(|| faces.iter().max_by_key(|f| f.area()))
        .copied()
}

fn draw(mut rgb: RgbImage, face: &Rectangle, truth: &Shape, initial: &Shape) -> RgbImage {
    let rect = Rect::at(face.x(), face.y()).of_size(face.width(), face.height());
    draw_hollow_rect_mut(&mut rgb, rect, Rgb([255, 0, 0]));

    for (shape, color) in [(truth, Rgb([0, 255, 0])), (initial, Rgb([0, 128, 255]))] {
        for p in shape.iter() {
            draw_filled_circle_mut(&mut rgb, (p.x.round() as i32, p.y.round() as i32), 2, color);
        }
    }
    rgb
}

fn save_shape(path: &Path, shape: &Shape) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    dataset::write_face_points(&mut writer, shape)?;
    writer.flush()?;
    Ok(())
}

fn write_report(path: &Path, reports: &[SampleReport]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "image\tstatus\tface\tscale\tangle\ttx\tty\terror")?;
    for report in reports {
        let image = report.image.display();
        match &report.outcome {
            Outcome::Initialized { face, pose, error } => {
                let transform = pose.transform();
                let Point { x: tx, y: ty } = transform.translation();
                let status = if pose.is_aligned() {
                    "aligned"
                } else {
                    "face-centered"
                };
                let error = error.map_or_else(|| "-".to_string(), |e| format!("{:.4}", e));
                writeln!(
                    w,
                    "{}\t{}\t{},{},{},{}\t{:.4}\t{:.2}\t{:.2}\t{:.2}\t{}",
                    image,
                    status,
                    face.x(),
                    face.y(),
                    face.width(),
                    face.height(),
                    transform.scale(),
                    transform.angle_degrees(),
                    tx,
                    ty,
                    error
                )?;
            }
            Outcome::NoFace => writeln!(w, "{}\tno-face\t-\t-\t-\t-\t-\t-", image)?,
            Outcome::Failed(reason) => writeln!(w, "{}\tfailed: {}\t-\t-\t-\t-\t-\t-", image, reason)?,
        }
    }
    w.flush()?;
    Ok(())
}

fn summarize(reports: &[SampleReport]) {
    let (mut aligned, mut centered, mut no_face, mut failed) = (0, 0, 0, 0);
    let mut aligned_errors = vec![];
    let mut all_errors = vec![];

    for report in reports {
        match &report.outcome {
            Outcome::Initialized { pose, error, .. } => {
                if pose.is_aligned() {
                    aligned += 1;
                    aligned_errors.extend(*error);
                } else {
                    centered += 1;
                }
                all_errors.extend(*error);
            }
            Outcome::NoFace => no_face += 1,
            Outcome::Failed(_) => failed += 1,
        }
    }

    info!(aligned, centered, no_face, failed, "initialization summary");
    if let Some(mean) = mean(&aligned_errors) {
        info!("mean normalized error of eye-aligned samples: {:.4}", mean);
    }
    if let Some(mean) = mean(&all_errors) {
        info!("mean normalized error of all initialized samples: {:.4}", mean);
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_face_prefers_annotated_face() {
        let truth = Shape::new(vec![Point::new(100.0, 100.0), Point::new(120.0, 120.0)]);
        let small = Rectangle::new(80, 80, 60, 60);
        let large = Rectangle::new(200, 0, 150, 150);

        assert_eq!(Some(small), choose_face(&[large, small], &truth));
        assert_eq!(Some(large), choose_face(&[large], &truth));
        assert_eq!(None, choose_face(&[], &truth));
    }

    #[test]
    fn test_mean() {
        assert_eq!(None, mean(&[]));
        assert_eq!(Some(2.0), mean(&[1.0, 3.0]));
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "aam-train",
            "face.bin",
            "eyes.bin",
            "aam.pts",
            "images.txt",
            "points.txt",
            "--threads",
            "2",
        ])
        .unwrap();
        assert_eq!(1.4, args.face_scale_factor);
        assert_eq!(20, args.eye_min_size);
        assert_eq!(Some(2), args.threads);
        assert!(validate(&args).is_ok());

        assert!(Args::try_parse_from(["aam-train", "face.bin"]).is_err());
    }
}
