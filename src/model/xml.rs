// This file is part of landmark-aam, a face landmark training driver built on
// boosted cascade detection and eye-anchored initial pose estimation.
//
// As an open-source face analysis tool: you can redistribute landmark-aam source codes
// and/or modify it under the terms of the BSD 2-Clause License.
//
// You should have received a copy of the BSD 2-Clause License along with the software.
// If not, see < https://opensource.org/licenses/BSD-2-Clause>.

//! OpenCV Haar cascade XML, as written by `opencv_traincascade`.
//!
//! ```text
//! opencv_storage/cascade
//!     width, height
//!     stages/_
//!         stageThreshold
//!         weakClassifiers/_
//!             internalNodes   left right feature_idx threshold
//!             leafValues      left_val right_val
//!     features/_
//!         rects/_           x y w h weight
//!         tilted            (optional, must be 0)
//! ```
//!
//! Only stumps (a single internal node per weak classifier) and upright
//! features are supported.

use std::fmt::Display;
use std::str::FromStr;

use roxmltree::{Document, Node};

use super::{HaarFeature, Model, Stage, WeakClassifier, WeightedRect, MAX_RECTS_PER_FEATURE};
use crate::common::Rectangle;
use crate::error::{Error, Result};

/// Parse a cascade from the text of an OpenCV XML file.
pub fn read_cascade_xml(text: &str) -> Result<Model> {
    let document = Document::parse(text)?;
    let cascade = child(document.root_element(), "cascade")?;

    if let Some(kind) = cascade
        .children()
        .find(|n| n.has_tag_name("featureType"))
        .and_then(|n| n.text())
    {
        if !kind.trim().eq_ignore_ascii_case("HAAR") {
            return Err(Error::InvalidModel(format!(
                "unsupported feature type: {}",
                kind.trim()
            )));
        }
    }

    let width = value::<u32>(cascade, "width")?;
    let height = value::<u32>(cascade, "height")?;

    let features = items(child(cascade, "features")?)
        .map(read_feature)
        .collect::<Result<Vec<_>>>()?;
    let stages = items(child(cascade, "stages")?)
        .map(|stage| read_stage(stage, &features))
        .collect::<Result<Vec<_>>>()?;

    Model::new(width, height, stages)
}

fn read_stage(node: Node, features: &[HaarFeature]) -> Result<Stage> {
    let threshold = value::<f32>(node, "stageThreshold")?;
    let weak_classifiers = items(child(node, "weakClassifiers")?)
        .map(|weak| read_weak_classifier(weak, features))
        .collect::<Result<Vec<_>>>()?;
    Ok(Stage::new(threshold, weak_classifiers))
}

fn read_weak_classifier(node: Node, features: &[HaarFeature]) -> Result<WeakClassifier> {
    let nodes = tokens(child(node, "internalNodes")?);
    let leaves = tokens(child(node, "leafValues")?);
    if nodes.len() != 4 || leaves.len() != 2 {
        return Err(Error::InvalidModel(format!(
            "only stump classifiers are supported, found {} node values and {} leaves",
            nodes.len(),
            leaves.len()
        )));
    }

    // leaves are addressed as non-positive indices: 0 is left, -1 is right
    if parse::<i32>(nodes[0], "left child")? != 0 || parse::<i32>(nodes[1], "right child")? != -1
    {
        return Err(Error::InvalidModel(format!(
            "unexpected stump children: {} {}",
            nodes[0], nodes[1]
        )));
    }

    let feature_idx = parse::<usize>(nodes[2], "feature index")?;
    let feature = features.get(feature_idx).cloned().ok_or_else(|| {
        Error::InvalidModel(format!(
            "feature index {} out of range ({} features)",
            feature_idx,
            features.len()
        ))
    })?;

    Ok(WeakClassifier::new(
        feature,
        parse(nodes[3], "node threshold")?,
        parse(leaves[0], "left leaf")?,
        parse(leaves[1], "right leaf")?,
    ))
}

fn read_feature(node: Node) -> Result<HaarFeature> {
    let tilted = node
        .children()
        .find(|n| n.has_tag_name("tilted"))
        .and_then(|n| n.text())
        .map(str::trim);
    if matches!(tilted, Some(flag) if flag != "0") {
        return Err(Error::InvalidModel(
            "tilted Haar features are not supported".to_string(),
        ));
    }

    let rects = items(child(node, "rects")?)
        .map(read_rect)
        .collect::<Result<Vec<_>>>()?;
    if rects.is_empty() || rects.len() > MAX_RECTS_PER_FEATURE as usize {
        return Err(Error::InvalidModel(format!(
            "unexpected rectangle count: {}",
            rects.len()
        )));
    }

    Ok(HaarFeature::new(rects))
}

fn read_rect(node: Node) -> Result<WeightedRect> {
    let values = tokens(node);
    if values.len() != 5 {
        return Err(Error::InvalidModel(format!(
            "feature rectangle needs 5 values, found {}",
            values.len()
        )));
    }

    let x = parse::<i32>(values[0], "rectangle x")?;
    let y = parse::<i32>(values[1], "rectangle y")?;
    let w = parse::<u32>(values[2], "rectangle width")?;
    let h = parse::<u32>(values[3], "rectangle height")?;
    let weight = parse::<f32>(values[4], "rectangle weight")?;

    Ok(WeightedRect::new(Rectangle::new(x, y, w, h), weight))
}

/// OpenCV stores sequence elements as `<_>` children.
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.has_tag_name("_"))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| {
            Error::InvalidModel(format!(
                "<{}> has no <{}> element",
                node.tag_name().name(),
                name
            ))
        })
}

fn tokens<'a>(node: Node<'a, '_>) -> Vec<&'a str> {
    node.text()
        .map(|text| text.split_whitespace().collect())
        .unwrap_or_default()
}

fn value<T>(node: Node, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let text = child(node, name)?.text().unwrap_or_default();
    parse(text.trim(), name)
}

fn parse<T>(text: &str, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    text.parse().map_err(|e| {
        Error::InvalidModel(format!("bad {} {:?}: {}", what, text, e))
    })
}
