//! Labelme-compatible per-image annotation descriptors.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::submission::Polygon;

pub const LABELME_VERSION: &str = "3.16.2";
pub const LINE_COLOR: [u8; 4] = [0, 255, 0, 128];
pub const FILL_COLOR: [u8; 4] = [255, 0, 0, 128];
pub const SHAPE_TYPE_POLYGON: &str = "polygon";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelmeShape {
    pub label: String,
    pub line_color: Option<[u8; 4]>,
    pub fill_color: Option<[u8; 4]>,
    pub points: Vec<[f64; 2]>,
    pub shape_type: String,
    pub flags: Map<String, Value>,
}

impl LabelmeShape {
    pub fn polygon(label: impl Into<String>, points: Vec<[f64; 2]>) -> Self {
        Self {
            label: label.into(),
            line_color: None,
            fill_color: None,
            points,
            shape_type: SHAPE_TYPE_POLYGON.to_string(),
            flags: Map::new(),
        }
    }

    /// Shapes for every polygon with at least three vertices.
    pub fn from_polygons(polygons: &[Polygon]) -> Vec<Self> {
        polygons
            .iter()
            .filter(|p| p.points.len() >= 3)
            .map(|p| Self::polygon(p.tag.as_str(), p.points.iter().map(|pt| [pt.x, pt.y]).collect()))
            .collect()
    }
}

/// Field order matches what labelme writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelmeDocument {
    pub version: String,
    pub flags: Map<String, Value>,
    pub shapes: Vec<LabelmeShape>,
    pub line_color: [u8; 4],
    pub fill_color: [u8; 4],
    pub image_path: String,
    pub image_data: String,
    pub image_height: u32,
    pub image_width: u32,
}

impl LabelmeDocument {
    pub fn new(
        shapes: Vec<LabelmeShape>,
        image_path: impl Into<String>,
        image_bytes: &[u8],
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            version: LABELME_VERSION.to_string(),
            flags: Map::new(),
            shapes,
            line_color: LINE_COLOR,
            fill_color: FILL_COLOR,
            image_path: image_path.into(),
            image_data: STANDARD.encode(image_bytes),
            image_height: height,
            image_width: width,
        }
    }

    /// Point lists of the shapes carrying `label`.
    pub fn points_labeled<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a [[f64; 2]]> + 'a {
        self.shapes
            .iter()
            .filter(move |s| s.label == label)
            .map(|s| s.points.as_slice())
    }
}
