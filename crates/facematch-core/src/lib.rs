//! facematch-core — Face matching capability.
//!
//! Decodes uploaded image bytes, detects faces with SCRFD, extracts ArcFace
//! embeddings and compares them by cosine similarity. Both networks run via
//! ONNX Runtime for CPU inference.

pub mod alignment;
pub mod capability;
pub mod detector;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use capability::{
    decode_image, FaceRecognition, MatchError, OnnxFaceRecognition, DEFAULT_MATCH_THRESHOLD,
};
pub use detector::{DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use types::{BoundingBox, CosineMatcher, Embedding, ImagePixels, MatchResult, Matcher};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Directory holding the ONNX models: `FACEMATCH_MODEL_DIR`, else `./models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("FACEMATCH_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models"))
}
