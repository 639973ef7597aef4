use serde::{Deserialize, Serialize};

/// Label given to a face that matches nobody in the gallery.
pub const UNKNOWN_PERSON: &str = "Unknown";

/// Raw detector output in original image coordinates, with optional landmarks.
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

impl BoundingBox {
    /// Convert to integer edges, clamped to an image of the given size.
    pub fn to_location(&self, width: u32, height: u32) -> FaceLocation {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        FaceLocation {
            top: self.y.clamp(0.0, max_y).round() as u32,
            left: self.x.clamp(0.0, max_x).round() as u32,
            bottom: (self.y + self.height).clamp(0.0, max_y).round() as u32,
            right: (self.x + self.width).clamp(0.0, max_x).round() as u32,
        }
    }
}

/// Pixel edges of a face inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions.
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

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).clamp(0.0, 2.0)
    }
}

/// One enrolled encoding in the recognition gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFace {
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Matched person, or [`UNKNOWN_PERSON`].
    pub name: String,
    /// Distance to the closest gallery entry (2.0 when the gallery is empty).
    pub distance: f32,
    /// `1 - distance` for a match, 0 otherwise.
    pub confidence: f32,
}

impl MatchResult {
    fn unknown(distance: f32) -> Self {
        Self {
            matched: false,
            name: UNKNOWN_PERSON.to_string(),
            distance,
            confidence: 0.0,
        }
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownFace], tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour matcher on cosine distance.
///
/// Walks the whole gallery every time; ties keep the earliest entry.
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownFace], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, known) in gallery.iter().enumerate() {
            let dist = probe.distance(&known.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => MatchResult {
                matched: true,
                name: gallery[idx].name.clone(),
                distance: best_dist,
                confidence: 1.0 - best_dist,
            },
            Some(_) => MatchResult::unknown(best_dist),
            None => MatchResult::unknown(2.0),
        }
    }
}
