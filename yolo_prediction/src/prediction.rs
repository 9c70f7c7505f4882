/// Encoded image handed to the model, as uploaded or staged on disk.
#[derive(Debug, Clone, Default)]
pub struct ImageFrame {
    pub image_data: Vec<u8>,
    pub timestamp: i64,
}

/// Axis-aligned box in original image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub class_id: u32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredictionBatch {
    pub detections: Vec<BoundingBox>,
    pub timestamp: i64,
    pub image_width: u32,
    pub image_height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorLabel {
    pub label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}
