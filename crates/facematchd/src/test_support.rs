//! Stub face recognition backend for router and engine tests.
//!
//! A solid-colour image "contains" one face whose encoding is its mean
//! colour; an all-black image contains none. A 13-pixel-wide image makes the
//! backend panic.

use facematch_core::{CosineMatcher, Embedding, FaceRecognition, ImagePixels, MatchError, Matcher};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const RED: [u8; 3] = [220, 20, 20];
pub const GREEN: [u8; 3] = [20, 220, 20];
pub const BLUE: [u8; 3] = [20, 20, 220];
pub const BLACK: [u8; 3] = [0, 0, 0];

const PANIC_WIDTH: u32 = 13;

#[derive(Default)]
pub struct StubRecognition {
    /// Number of `extract_face_encoding` calls.
    pub calls: Arc<AtomicUsize>,
}

impl FaceRecognition for StubRecognition {
    fn extract_face_encoding(&mut self, image: &ImagePixels) -> Result<Embedding, MatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if image.width() == PANIC_WIDTH {
            panic!("stub backend exploded");
        }

        let mut sums = [0f32; 3];
        for px in image.pixels() {
            for (sum, &channel) in sums.iter_mut().zip(px.0.iter()) {
                *sum += channel as f32;
            }
        }
        if sums.iter().all(|&s| s == 0.0) {
            return Err(MatchError::NoFaceDetected);
        }

        let count = (image.width() * image.height()) as f32;
        Ok(Embedding {
            values: sums.iter().map(|s| s / count).collect(),
        })
    }

    fn compare_encodings(&self, first: &Embedding, second: &Embedding) -> bool {
        CosineMatcher.compare(first, second, 0.99).matched
    }
}

fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode test png");
    buf.into_inner()
}

/// A 16×16 PNG filled with `colour`.
pub fn png(colour: [u8; 3]) -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(16, 16, Rgb(colour)))
}

/// A PNG the stub backend panics on.
pub fn panicking_png() -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(PANIC_WIDTH, 4, Rgb(RED)))
}
