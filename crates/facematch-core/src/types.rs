use serde::{Deserialize, Serialize};

/// Decoded 8-bit RGB raster handed between the pipeline stages.
pub type ImagePixels = image::RgbImage;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero vector on
    /// either side yields 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Outcome of comparing two face embeddings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the pair [-1, 1].
    pub similarity: f32,
}

/// Strategy for deciding whether two embeddings belong to the same identity.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, candidate: &Embedding, threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher: a pair matches when similarity >= threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, candidate: &Embedding, threshold: f32) -> MatchResult {
        let similarity = probe.similarity(candidate);
        MatchResult {
            matched: similarity >= threshold,
            similarity,
        }
    }
}
