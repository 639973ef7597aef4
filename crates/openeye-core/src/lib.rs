//! openeye-core: face library, recognition gallery and inference pipeline.
//!
//! Faces are detected with SCRFD and embedded with ArcFace, both running on
//! ONNX Runtime. People and their photos live in a plain directory tree; the
//! trained encodings are kept in a (optionally encrypted) gallery file.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod gallery;
pub mod library;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use detector::DetectionMode;
pub use encoder::{EncodedFace, EncoderError, FaceEncoder, OnnxEncoder};
pub use gallery::{Gallery, GalleryError};
pub use library::{FaceLibrary, LibraryError, Person, PhotoInfo};
pub use pipeline::{FaceDetection, TrainingReport};
pub use types::{DistanceMatcher, Embedding, FaceLocation, KnownFace, MatchResult, Matcher, UNKNOWN_PERSON};

/// Default directory holding `det_10g.onnx` and `w600k_r50.onnx`.
pub fn default_model_dir() -> std::path::PathBuf {
    data_dir().join("models")
}

/// `$XDG_DATA_HOME/openeye`, falling back to `~/.local/share/openeye`.
pub fn data_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("openeye")
}
