use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ModelService, PredictionError},
    prediction::{BoundingBox, ImageFrame, PredictionBatch},
};
use async_trait::async_trait;
use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix2, Ix4, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let width = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let height = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    width.max(0.) * height.max(0.)
}

fn union(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    box1.area() + box2.area() - intersection(box1, box2)
}

fn iou(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

/// Greedy per-class suppression; the result is ordered by descending confidence.
pub fn non_max_suppression(
    mut boxes: Vec<BoundingBox>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<BoundingBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result = Vec::new();
    while !boxes.is_empty() && result.len() < max_detections {
        let best = boxes.remove(0);
        boxes.retain(|other| other.class_id != best.class_id || iou(&best, other) < iou_threshold);
        result.push(best);
    }
    result
}

fn transform_image_frame(
    image_frame: &ImageFrame,
    input_size: u32,
) -> Result<(Array<f32, Ix4>, u32, u32), PredictionError> {
    let image_data = &image_frame.image_data;

    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| PredictionError::ImageTransform(format!("Error decoding image: {}", e)))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| PredictionError::ImageTransform(format!("Error decoding image: {}", e)))?;

    let (img_width, img_height) = original_img.dimensions();
    let img = original_img.resize_exact(input_size, input_size, FilterType::CatmullRom);

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_height, img_width))
}

/// Turns the raw `[1, 4 + classes, candidates]` YOLO head into boxes.
#[derive(Debug, Clone)]
pub struct OutputDecoder {
    pub input_size: u32,
    pub min_probability: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&ModelConfig> for OutputDecoder {
    fn from(config: &ModelConfig) -> Self {
        Self {
            input_size: config.input_size,
            min_probability: config.min_probability,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }
}

impl OutputDecoder {
    pub fn decode(
        &self,
        outputs: ArrayViewD<f32>,
        img_width: u32,
        img_height: u32,
    ) -> Result<Vec<BoundingBox>, PredictionError> {
        let shape = outputs.shape().to_vec();
        if shape.len() != 3 || shape[0] == 0 || shape[1] <= 4 {
            return Err(PredictionError::InvalidOutput(format!(
                "unexpected output shape {:?}",
                shape
            )));
        }

        let output = outputs
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| PredictionError::InvalidOutput(e.to_string()))?;

        let scale_x = img_width as f32 / self.input_size as f32;
        let scale_y = img_height as f32 / self.input_size as f32;
        let max_x = img_width as f32;
        let max_y = img_height as f32;

        let mut boxes = Vec::new();
        for candidate in output.axis_iter(Axis(1)) {
            let best_class = candidate
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .reduce(|accum, row| if row.1 > accum.1 { row } else { accum });
            let Some((class_id, prob)) = best_class else {
                continue;
            };

            if prob < self.min_probability {
                continue;
            }

            let xc = candidate[0] * scale_x;
            let yc = candidate[1] * scale_y;
            let w = candidate[2] * scale_x;
            let h = candidate[3] * scale_y;

            boxes.push(BoundingBox {
                class_id: class_id as u32,
                confidence: prob,
                x1: (xc - w / 2.).clamp(0., max_x),
                y1: (yc - h / 2.).clamp(0., max_y),
                x2: (xc + w / 2.).clamp(0., max_x),
                y2: (yc + h / 2.).clamp(0., max_y),
            });
        }

        Ok(non_max_suppression(
            boxes,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

/// Sessions are created once at startup and shared by every request.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    decoder: OutputDecoder,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, PredictionError> {
        model_config
            .validate()
            .map_err(PredictionError::ModelNotFound)?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            decoder: OutputDecoder::from(model_config),
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, PredictionError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| PredictionError::SessionPoisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) = outputs["output0"].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

        let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| PredictionError::InvalidOutput(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }

    fn predict_blocking(&self, frame: &ImageFrame) -> Result<PredictionBatch, PredictionError> {
        let (input, img_height, img_width) =
            transform_image_frame(frame, self.decoder.input_size)?;
        let outputs = self.run_inference(&input)?;
        let detections = self.decoder.decode(outputs.view(), img_width, img_height)?;

        Ok(PredictionBatch {
            detections,
            timestamp: frame.timestamp,
            image_width: img_width,
            image_height: img_height,
        })
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, frame: ImageFrame) -> Result<PredictionBatch, PredictionError> {
        let service = self.clone();
        let batch = tokio::task::spawn_blocking(move || service.predict_blocking(&frame))
            .await
            .map_err(|e| PredictionError::TaskFailed(e.to_string()))??;

        tracing::debug!("Returning {} detections", batch.detections.len());
        for (i, detection) in batch.detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                detection.confidence,
                detection.x1,
                detection.y1,
                detection.x2,
                detection.y2
            );
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn bbox(class_id: u32, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox {
            class_id,
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    fn decoder() -> OutputDecoder {
        OutputDecoder {
            input_size: 640,
            min_probability: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
        }
    }

    /// Builds a `[1, 4 + classes, candidates]` head from per-candidate rows.
    fn head(rows: &[Vec<f32>]) -> ArrayD<f32> {
        let features = rows[0].len();
        let mut array = ArrayD::zeros(IxDyn(&[1, features, rows.len()]));
        for (candidate, row) in rows.iter().enumerate() {
            for (feature, value) in row.iter().enumerate() {
                array[[0, feature, candidate]] = *value;
            }
        }
        array
    }

    #[test]
    fn test_transform_image_frame() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 80, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();

        let image_frame = ImageFrame {
            image_data: cursor.get_ref().to_vec(),
            timestamp: 0,
        };

        let (input_array, img_height, img_width) =
            transform_image_frame(&image_frame, 640).unwrap();

        assert_eq!(input_array.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 80);
        assert_eq!(input_array[[0, 0, 10, 10]], 1.0);
        assert_eq!(input_array[[0, 1, 10, 10]], 0.0);
    }

    #[test]
    fn test_transform_image_frame_rejects_garbage() {
        let image_frame = ImageFrame {
            image_data: vec![0; 100],
            timestamp: 0,
        };

        assert!(matches!(
            transform_image_frame(&image_frame, 640),
            Err(PredictionError::ImageTransform(_))
        ));
    }

    #[test]
    fn test_decode_scales_to_original_image() {
        let outputs = head(&[
            vec![320., 320., 64., 128., 0.1, 0.9],
            vec![100., 100., 10., 10., 0.1, 0.2],
        ]);

        let boxes = decoder().decode(outputs.view(), 1280, 640).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 1);
        assert_eq!(boxes[0].confidence, 0.9);
        assert_eq!(
            (boxes[0].x1, boxes[0].y1, boxes[0].x2, boxes[0].y2),
            (576., 256., 704., 384.)
        );
    }

    #[test]
    fn test_decode_clips_boxes_to_image() {
        let outputs = head(&[vec![5., 5., 40., 40., 0.8]]);

        let boxes = decoder().decode(outputs.view(), 640, 640).unwrap();

        assert_eq!(boxes[0].x1, 0.);
        assert_eq!(boxes[0].y1, 0.);
        assert_eq!(boxes[0].x2, 25.);
        assert!(boxes[0].width() >= 0. && boxes[0].height() >= 0.);
    }

    #[test]
    fn test_decode_rejects_unexpected_shape() {
        let outputs = ArrayD::<f32>::zeros(IxDyn(&[1, 4]));

        assert!(matches!(
            decoder().decode(outputs.view(), 640, 640),
            Err(PredictionError::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_non_max_suppression_is_per_class() {
        let boxes = vec![
            bbox(0, 0.6, 10., 10., 110., 110.),
            bbox(0, 0.9, 12., 12., 112., 112.),
            bbox(1, 0.8, 10., 10., 110., 110.),
            bbox(0, 0.5, 300., 300., 400., 400.),
        ];

        let kept = non_max_suppression(boxes, 0.7, 300);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
        assert_eq!(kept[2].x1, 300.);
    }

    #[test]
    fn test_non_max_suppression_caps_detections() {
        let boxes = (0..10)
            .map(|i| bbox(0, 0.5, i as f32 * 50., 0., i as f32 * 50. + 10., 10.))
            .collect();

        assert_eq!(non_max_suppression(boxes, 0.7, 4).len(), 4);
    }

    #[test]
    fn test_iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0, 0.5, 0., 0., 10., 10.);
        let b = bbox(0, 0.5, 20., 20., 30., 30.);

        assert_eq!(iou(&a, &b), 0.);
        assert_eq!(iou(&a, &a), 1.);
    }
}
