use yolo_prediction::{BoundingBox, ColorLabel};

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBoxWithLabels {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: u32,
    pub class_label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub confidence: f32,
}

impl BoundingBoxWithLabels {
    pub fn new(bbox: &BoundingBox, color_label: Option<&ColorLabel>) -> Self {
        let (class_label, red, green, blue) = match color_label {
            Some(color_label) => (
                color_label.label.clone(),
                color_label.red,
                color_label.green,
                color_label.blue,
            ),
            None => (format!("Unknown class {}", bbox.class_id), 0, 0, 0),
        };

        Self {
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
            class_id: bbox.class_id,
            class_label,
            red,
            green,
            blue,
            confidence: bbox.confidence,
        }
    }
}
