// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use landmark_aam::dataset::{load_face_points, write_face_points};
use landmark_aam::{
    create_detector, CascadeDetector, Detector, EyeLandmarks, ImageData, InitialPose, Point,
    PoseInitializer, Rectangle, Shape,
};

/// Writes a one-stage cascade firing on bright-left / dark-right 20x20 windows.
fn write_edge_cascade(path: &Path) {
    let mut buf = vec![];
    for v in [20, 20, 1] {
        buf.write_i32::<LittleEndian>(v).unwrap();
    }
    buf.write_f32::<LittleEndian>(0.5).unwrap();
    buf.write_i32::<LittleEndian>(1).unwrap();

    buf.write_i32::<LittleEndian>(2).unwrap();
    for (w, weight) in [(20, -1.0), (10, 2.0)] {
        for v in [0, 0, w, 20] {
            buf.write_i32::<LittleEndian>(v).unwrap();
        }
        buf.write_f32::<LittleEndian>(weight).unwrap();
    }
    for v in [0.5, -1.0, 1.0] {
        buf.write_f32::<LittleEndian>(v).unwrap();
    }

    File::create(path).unwrap().write_all(&buf).unwrap();
}

/// The same cascade in the layout `opencv_traincascade` writes.
const EDGE_CASCADE_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>20</height>
  <width>20</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.5</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 0.5</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 20 20 -1.</_>
        <_>
          0 0 10 20 2.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#;

fn eye_detector(dir: &Path) -> CascadeDetector {
    let path = dir.join("eyes.bin");
    write_edge_cascade(&path);
    tuned(create_detector(&path).unwrap())
}

fn tuned(mut detector: CascadeDetector) -> CascadeDetector {
    detector.set_min_object_size(20);
    detector.set_max_object_size(20);
    detector.set_min_neighbors(2);
    detector
}

/// Gray canvas with a 20x20 bright/dark "eye" at each of `eyes`.
fn face_image(eyes: &[(u32, u32)]) -> ImageData {
    ImageData::from_fn(200, 200, |x, y| {
        for &(px, py) in eyes {
            if x >= px && x < px + 20 && y >= py && y < py + 20 {
                return if x < px + 10 { 255 } else { 0 };
            }
        }
        128
    })
}

/// 68-point shape with only the eye corners set.
fn canonical_shape() -> Shape {
    let mut points = vec![Point::zero(); 68];
    points[36] = Point::new(-74.0, -50.0);
    points[39] = Point::new(-66.0, -50.0);
    points[42] = Point::new(-34.0, -50.0);
    points[45] = Point::new(-26.0, -50.0);
    Shape::new(points)
}

#[test]
fn test_eyes_found_by_cascade_anchor_the_shape() {
    let dir = tempfile::tempdir().unwrap();
    let mut eyes = eye_detector(dir.path());
    let image = face_image(&[(60, 80), (120, 80)]);
    let face = Rectangle::new(40, 40, 120, 120);
    let shape = canonical_shape();

    let pose = PoseInitializer::default()
        .estimate(&image, &face, &shape, &mut eyes)
        .unwrap();
    let transform = match pose {
        InitialPose::Aligned(transform) => transform,
        other => panic!("Expected aligned pose, got {:?}", other),
    };

    assert!((transform.scale() - 1.5).abs() < 0.1, "{:?}", transform);
    assert!(transform.angle_degrees().abs() < 5.0, "{:?}", transform);

    let placed = transform.apply_shape(&shape);
    let (left, right) = EyeLandmarks::IBUG_68.centers(&placed).unwrap();
    assert!(left.distance(&Point::new(70.0, 90.0)) < 3.0, "{:?}", left);
    assert!(right.distance(&Point::new(130.0, 90.0)) < 3.0, "{:?}", right);
}

#[test]
fn test_xml_cascade_matches_binary_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let xml_path = dir.path().join("eyes.xml");
    std::fs::write(&xml_path, EDGE_CASCADE_XML).unwrap();
    let mut from_xml = tuned(create_detector(&xml_path).unwrap());
    let mut from_bin = eye_detector(dir.path());

    let image = face_image(&[(60, 80), (120, 80)]);
    let found = from_xml.detect(&image);
    assert_eq!(2, found.len(), "detections: {:?}", found);
    assert_eq!(from_bin.detect(&image), found);

    let face = Rectangle::new(40, 40, 120, 120);
    let pose = PoseInitializer::default()
        .estimate(&image, &face, &canonical_shape(), &mut from_xml)
        .unwrap();
    assert!(pose.is_aligned());
}

#[test]
fn test_single_eye_falls_back_to_face_center() {
    let dir = tempfile::tempdir().unwrap();
    let mut eyes = eye_detector(dir.path());
    let image = face_image(&[(60, 80)]);
    let face = Rectangle::new(40, 40, 120, 120);

    let pose = PoseInitializer::default()
        .estimate(&image, &face, &canonical_shape(), &mut eyes)
        .unwrap();

    assert!(!pose.is_aligned());
    assert_eq!(Point::new(100.0, 100.0), pose.translation());
    assert_eq!(1.0, pose.transform().scale());
}

#[test]
fn test_saved_reference_shape_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aam.pts");
    let shape = canonical_shape();

    write_face_points(File::create(&path).unwrap(), &shape).unwrap();
    assert_eq!(shape, load_face_points(&path).unwrap());
}
