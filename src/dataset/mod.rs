// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

//! Training set lists and `.pts` landmark annotations.
//!
//! A list file holds one path per line. An annotation file looks like
//!
//! ```text
//! version: 1
//! n_points:  68
//! {
//! 115.167660 220.807529
//! ...
//! }
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::Point;
use crate::error::{Error, Result};
use crate::shape::Shape;

/// One training image with its annotation file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub image: PathBuf,
    pub annotation: PathBuf,
}

/// Read a path list, skipping blank lines.
pub fn read_dataset_list<R: BufRead>(reader: R) -> Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            paths.push(PathBuf::from(line));
        }
    }
    Ok(paths)
}

/// Pair up the entries of an image list and an annotation list.
pub fn load_dataset_list<P, Q>(images: P, annotations: Q) -> Result<Vec<Sample>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let image_paths = read_dataset_list(BufReader::new(File::open(images.as_ref())?))?;
    let annotation_paths = read_dataset_list(BufReader::new(File::open(annotations.as_ref())?))?;

    if image_paths.len() != annotation_paths.len() {
        return Err(Error::DatasetMismatch {
            images: image_paths.len(),
            annotations: annotation_paths.len(),
        });
    }
    debug!(samples = image_paths.len(), "loaded dataset lists");

    Ok(image_paths
        .into_iter()
        .zip(annotation_paths)
        .map(|(image, annotation)| Sample { image, annotation })
        .collect())
}

pub fn parse_face_points(text: &str) -> Result<Shape> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let mut declared = None;
    loop {
        let line = lines
            .next()
            .ok_or_else(|| Error::InvalidAnnotation("missing '{'".to_string()))?;
        if line == "{" {
            break;
        }
        if let Some(count) = line.strip_prefix("n_points:") {
            let count = count.trim().parse::<usize>().map_err(|_| {
                Error::InvalidAnnotation(format!("bad point count: {}", count.trim()))
            })?;
            declared = Some(count);
        } else if !line.starts_with("version:") {
            return Err(Error::InvalidAnnotation(format!(
                "unexpected header line: {}",
                line
            )));
        }
    }

    let mut points = Vec::with_capacity(declared.unwrap_or(0).min(1024));
    let mut closed = false;
    for line in lines {
        if line == "}" {
            closed = true;
            break;
        }
        points.push(parse_point(line)?);
    }

    if !closed {
        return Err(Error::InvalidAnnotation("missing '}'".to_string()));
    }
    if let Some(declared) = declared {
        if declared != points.len() {
            return Err(Error::InvalidAnnotation(format!(
                "declared {} points, found {}",
                declared,
                points.len()
            )));
        }
    }

    Ok(Shape::new(points))
}

fn parse_point(line: &str) -> Result<Point> {
    let mut it = line.split_whitespace().map(str::parse::<f32>);
    match (it.next(), it.next(), it.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Ok(Point::new(x, y)),
        _ => Err(Error::InvalidAnnotation(format!("bad point: {}", line))),
    }
}

pub fn load_face_points<P: AsRef<Path>>(path: P) -> Result<Shape> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_face_points(&text).map_err(|e| match e {
        Error::InvalidAnnotation(msg) => {
            Error::InvalidAnnotation(format!("{}: {}", path.as_ref().display(), msg))
        }
        e => e,
    })
}

pub fn write_face_points<W: Write>(mut writer: W, shape: &Shape) -> Result<()> {
    writeln!(writer, "version: 1")?;
    writeln!(writer, "n_points:  {}", shape.len())?;
    writeln!(writer, "{{")?;
    for p in shape.iter() {
        writeln!(writer, "{:.6} {:.6}", p.x, p.y)?;
    }
    writeln!(writer, "}}")?;
    Ok(())
}
