//! The face matching capability: decode, encode, compare.
//!
//! [`FaceRecognition`] is the seam consumers program against;
//! [`OnnxFaceRecognition`] is the SCRFD + ArcFace implementation.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, CosineMatcher, Embedding, ImagePixels, MatchResult, Matcher};
use crate::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};
use std::path::Path;
use thiserror::Error;

/// Cosine similarity at or above which two ArcFace embeddings are the same identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.40;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Decode raw upload bytes (any format the `image` crate recognises) into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<ImagePixels, MatchError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

/// Operations the HTTP service needs from a face recognition backend.
///
/// Implementations may keep inference state, hence `&mut self` for encoding.
pub trait FaceRecognition: Send {
    fn decode_image(&self, bytes: &[u8]) -> Result<ImagePixels, MatchError> {
        decode_image(bytes)
    }

    /// Encoding of the first face the backend reports; fails when there is none.
    fn extract_face_encoding(&mut self, image: &ImagePixels) -> Result<Embedding, MatchError>;

    /// Same-identity decision under the backend's fixed default threshold.
    fn compare_encodings(&self, first: &Embedding, second: &Embedding) -> bool;
}

/// The face an encoding is taken from: the first one reported.
///
/// Detector output is sorted by descending confidence, so this is the most
/// confident face; any others are ignored.
pub fn primary_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.first()
}

/// SCRFD detector + ArcFace recognizer + cosine matcher.
pub struct OnnxFaceRecognition {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    matcher: CosineMatcher,
}

impl OnnxFaceRecognition {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path, intra_threads: usize) -> Result<Self, MatchError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), intra_threads)?;
        let recognizer =
            FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE), intra_threads)?;
        Ok(Self {
            detector,
            recognizer,
            matcher: CosineMatcher,
        })
    }

    /// All faces in the image, in detector order (descending confidence).
    pub fn detect(&mut self, image: &ImagePixels) -> Result<Vec<BoundingBox>, MatchError> {
        Ok(self.detector.detect(image)?)
    }

    /// Compare with the similarity exposed, for diagnostics.
    pub fn compare_detailed(&self, first: &Embedding, second: &Embedding) -> MatchResult {
        self.matcher.compare(first, second, DEFAULT_MATCH_THRESHOLD)
    }
}

impl FaceRecognition for OnnxFaceRecognition {
    fn extract_face_encoding(&mut self, image: &ImagePixels) -> Result<Embedding, MatchError> {
        let faces = self.detector.detect(image)?;
        let face = primary_face(&faces).ok_or(MatchError::NoFaceDetected)?;
        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            "encoding first detected face"
        );
        Ok(self.recognizer.extract(image, face)?)
    }

    fn compare_encodings(&self, first: &Embedding, second: &Embedding) -> bool {
        let result = self.compare_detailed(first, second);
        tracing::debug!(
            similarity = result.similarity,
            matched = result.matched,
            "compared encodings"
        );
        result.matched
    }
}
