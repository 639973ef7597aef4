//! Training the gallery from the library, and recognizing faces in frames.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::library::{FaceLibrary, LibraryError};
use crate::types::{FaceLocation, KnownFace, Matcher, UNKNOWN_PERSON};
use chrono::Utc;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Instant;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub total_people: usize,
    pub total_encodings: usize,
    /// Wall-clock seconds.
    pub training_time: f64,
    /// Photos that failed to decode or contained no face.
    pub skipped: usize,
}

/// One recognized (or unknown) face in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub name: String,
    pub confidence: f32,
    pub location: FaceLocation,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_detected: Option<bool>,
}

impl FaceDetection {
    pub fn is_known(&self) -> bool {
        self.name != UNKNOWN_PERSON
    }
}

/// Encode the first face of every photo in the library.
///
/// Unreadable photos and photos without a face are skipped.
pub fn train(
    library: &FaceLibrary,
    encoder: &mut dyn FaceEncoder,
) -> Result<(Vec<KnownFace>, TrainingReport), LibraryError> {
    let started = Instant::now();
    let set = library.training_set()?;
    let total_people = set.len();
    let mut faces = Vec::new();
    let mut skipped = 0usize;

    for (name, photos) in set {
        tracing::info!(person = %name, photos = photos.len(), "encoding photos");
        for path in photos {
            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot decode photo");
                    skipped += 1;
                    continue;
                }
            };
            match encoder.encode(&image) {
                Ok(found) => match found.into_iter().next() {
                    Some(face) => faces.push(KnownFace { name: name.clone(), embedding: face.embedding }),
                    None => {
                        tracing::warn!(path = %path.display(), "no face found");
                        skipped += 1;
                    }
                },
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "encoding failed");
                    skipped += 1;
                }
            }
        }
    }

    let report = TrainingReport {
        total_people,
        total_encodings: faces.len(),
        training_time: started.elapsed().as_secs_f64(),
        skipped,
    };
    tracing::info!(?report, "training complete");
    Ok((faces, report))
}

/// Detect and identify every face in `image`.
///
/// Returns nothing without running inference when the gallery is empty.
pub fn recognize(
    image: &RgbImage,
    gallery: &[KnownFace],
    tolerance: f32,
    encoder: &mut dyn FaceEncoder,
    matcher: &dyn Matcher,
) -> Result<Vec<FaceDetection>, EncoderError> {
    if gallery.is_empty() {
        return Ok(Vec::new());
    }

    let timestamp = Utc::now().to_rfc3339();
    let detections = encoder
        .encode(image)?
        .into_iter()
        .map(|face| {
            let result = matcher.compare(&face.embedding, gallery, tolerance);
            FaceDetection {
                name: result.name,
                confidence: result.confidence,
                location: face.location,
                timestamp: timestamp.clone(),
                motion_detected: None,
            }
        })
        .collect::<Vec<_>>();

    if !detections.is_empty() {
        tracing::debug!(
            faces = detections.len(),
            names = ?detections.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "recognized faces"
        );
    }
    Ok(detections)
}

/// Outline each detection: green for known people, red for unknown faces.
pub fn annotate(image: &mut RgbImage, detections: &[FaceDetection]) {
    for det in detections {
        let color = if det.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
        draw_rect(image, &det.location, color);
    }
}

fn draw_rect(image: &mut RgbImage, loc: &FaceLocation, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || loc.left > loc.right || loc.top > loc.bottom {
        return;
    }
    let right = loc.right.min(w - 1);
    let bottom = loc.bottom.min(h - 1);

    for t in 0..BOX_THICKNESS {
        for x in loc.left..=right {
            for y in [loc.top.saturating_add(t), bottom.saturating_sub(t)] {
                if y < h {
                    image.put_pixel(x, y, color);
                }
            }
        }
        for y in loc.top..=bottom {
            for x in [loc.left.saturating_add(t), right.saturating_sub(t)] {
                if x < w {
                    image.put_pixel(x, y, color);
                }
            }
        }
    }
}
