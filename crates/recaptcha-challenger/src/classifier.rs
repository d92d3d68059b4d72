//! Tile classification via a YOLOv5 ONNX detector.

use std::path::{Path, PathBuf};

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::capture::decode_tile;
use crate::types::{ChallengeError, ChallengeResult};

/// Default model filename inside the model directory.
pub const MODEL_FILENAME: &str = "yolov5s6.onnx";

/// YOLOv5 input resolution.
const YOLO_IMAGE_SIZE: u32 = 640;

/// Box (4) + objectness (1) ahead of the class scores in every output row.
const YOLO_ROW_HEADER: usize = 5;

/// COCO categories, in the model's output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Classification collaborator: is the canonical label present in the image?
pub trait ImageClassifier: Send + Sync {
    /// Short model identifier, used in screenshot names.
    fn flag(&self) -> &str;

    /// `true` if `label` is present in the encoded image.
    fn classify(&mut self, image: &[u8], label: &str) -> ChallengeResult<bool>;
}

/// Index of a canonical label in the COCO category list.
pub fn class_index(label: &str) -> Option<usize> {
    COCO_CLASSES.iter().position(|c| *c == label)
}

/// Whether any row of a flattened `[N, 5 + classes]` output hits `class_idx`.
///
/// A row hits when its best class is `class_idx` and objectness times class
/// score reaches `threshold`.
pub fn detections_hit(output: &[f32], num_classes: usize, class_idx: usize, threshold: f32) -> bool {
    let stride = YOLO_ROW_HEADER + num_classes;
    if class_idx >= num_classes {
        return false;
    }
    output.chunks_exact(stride).any(|row| {
        let objectness = row[4];
        if objectness < threshold {
            return false;
        }
        let scores = &row[YOLO_ROW_HEADER..];
        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i);
        best == Some(class_idx) && objectness * scores[class_idx] >= threshold
    })
}

/// YOLOv5 detector behind ONNX Runtime.
pub struct YoloClassifier {
    session: Session,
    flag: String,
    threshold: f32,
}

impl YoloClassifier {
    /// Load the default model from a model directory.
    pub fn from_model_dir(model_dir: &Path, threshold: f32) -> ChallengeResult<Self> {
        Self::new(&default_model_path(model_dir), threshold)
    }

    /// Load a YOLOv5 model from an ONNX file.
    pub fn new(model_path: &Path, threshold: f32) -> ChallengeResult<Self> {
        if !model_path.exists() {
            return Err(ChallengeError::ModelNotAvailable(format!(
                "{} (run `recaptcha-challenger install` first)",
                model_path.display()
            )));
        }

        tracing::info!("Loading YOLO model from {}", model_path.display());

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| ChallengeError::Model(format!("Failed to load ONNX model: {e}")))?;

        tracing::info!("YOLO model loaded successfully");
        Ok(Self {
            session,
            flag: model_flag(model_path),
            threshold,
        })
    }
}

impl ImageClassifier for YoloClassifier {
    fn flag(&self) -> &str {
        &self.flag
    }

    fn classify(&mut self, image: &[u8], label: &str) -> ChallengeResult<bool> {
        let class_idx = class_index(label).ok_or_else(|| {
            ChallengeError::Model(format!("Label {label} is not a model category"))
        })?;

        let img = decode_tile(image)?;
        let resized = img.resize_exact(
            YOLO_IMAGE_SIZE,
            YOLO_IMAGE_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let rgb = resized.to_rgb8();

        // NCHW [1, 3, 640, 640], scaled to [0, 1]
        let side = YOLO_IMAGE_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3usize {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        let input_tensor = Tensor::from_array(tensor)
            .map_err(|e| ChallengeError::Model(format!("Failed to create input tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ChallengeError::Model(format!("ONNX inference failed: {e}")))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ChallengeError::Model(format!("Failed to extract output: {e}")))?;

        let hit = detections_hit(data, COCO_CLASSES.len(), class_idx, self.threshold);
        tracing::debug!(label, hit, "Tile classified");
        Ok(hit)
    }
}

fn model_flag(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| "yolo".to_string())
}

/// Default model location inside a model directory.
pub fn default_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(MODEL_FILENAME)
}
