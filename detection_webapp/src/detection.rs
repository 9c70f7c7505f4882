use serde::{Deserialize, Serialize};
use yolo_prediction::BoundingBox;

pub const DOCUMENT_FILE_NAME: &str = "detections.json";

/// One row of `detections.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Detection {
    pub class: u32,
    pub confidence: f64,
    pub width: f64,
    pub height: f64,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

impl From<&BoundingBox> for Detection {
    fn from(bbox: &BoundingBox) -> Self {
        let confidence = (bbox.confidence as f64).clamp(0., 1.);
        Self {
            class: bbox.class_id,
            confidence: round_to(confidence, 2),
            width: round_to(bbox.x2 as f64 - bbox.x1 as f64, 0),
            height: round_to(bbox.y2 as f64 - bbox.y1 as f64, 0),
        }
    }
}

/// Keeps the model's box order and applies no filtering.
pub fn format_detections<'a>(boxes: impl IntoIterator<Item = &'a BoundingBox>) -> Vec<Detection> {
    boxes.into_iter().map(Detection::from).collect()
}

/// Pretty JSON with 4-space indentation.
pub fn to_json_document(detections: &[Detection]) -> Result<String, serde_json::Error> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    detections.serialize(&mut serializer)?;

    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
