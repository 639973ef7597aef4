//! Detection + embedding behind one trait, so the pipeline can run without models.

use crate::detector::{DetectionMode, DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceLocation};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// A face found in an image together with its embedding.
#[derive(Debug, Clone)]
pub struct EncodedFace {
    pub location: FaceLocation,
    pub embedding: Embedding,
    /// Detector confidence.
    pub score: f32,
}

/// Finds and embeds every face in an image, best detection first.
pub trait FaceEncoder: Send {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError>;

    fn set_detection_mode(&mut self, mode: DetectionMode);
}

/// SCRFD + ArcFace.
pub struct OnnxEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEncoder {
    pub fn load(scrfd_path: &str, arcface_path: &str, mode: DetectionMode) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(scrfd_path, mode)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                continue;
            }
            let embedding = self.recognizer.extract(image, &bbox)?;
            faces.push(EncodedFace {
                location: bbox.to_location(image.width(), image.height()),
                embedding,
                score: bbox.confidence,
            });
        }
        Ok(faces)
    }

    fn set_detection_mode(&mut self, mode: DetectionMode) {
        if self.detector.mode() != mode {
            tracing::info!(%mode, "detection mode changed");
            self.detector.set_mode(mode);
        }
    }
}
