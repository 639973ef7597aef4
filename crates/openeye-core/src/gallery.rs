//! Persisted recognition gallery: trained encodings plus matcher settings.
//!
//! Stored as JSON. With a passphrase the file is AES-256-GCM sealed:
//! `nonce (12 bytes) || ciphertext`, keyed by SHA-256 of the passphrase.

use crate::detector::DetectionMode;
use crate::types::KnownFace;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_TOLERANCE: f32 = 0.6;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("malformed gallery file: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("gallery file could not be decrypted (wrong key or corrupt file)")]
    Decrypt,
    #[error("gallery encryption failed")]
    Encrypt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gallery {
    pub faces: Vec<KnownFace>,
    /// Maximum distance for a match, in [0, 1]. Lower = stricter.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    #[serde(default)]
    pub detection_mode: DetectionMode,
}

fn default_tolerance() -> f32 {
    DEFAULT_TOLERANCE
}

impl Default for Gallery {
    fn default() -> Self {
        Self {
            faces: Vec::new(),
            tolerance: DEFAULT_TOLERANCE,
            detection_mode: DetectionMode::default(),
        }
    }
}

impl Gallery {
    pub fn encodings_count(&self) -> usize {
        self.faces.len()
    }

    pub fn people_count(&self) -> usize {
        self.faces.iter().map(|f| f.name.as_str()).collect::<HashSet<_>>().len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Drop every encoding of `name`. Returns how many were removed.
    pub fn forget(&mut self, name: &str) -> usize {
        let before = self.faces.len();
        self.faces.retain(|f| f.name != name);
        before - self.faces.len()
    }

    /// Relabel the encodings of `old` as `new`. Returns how many changed.
    pub fn rename(&mut self, old: &str, new: &str) -> usize {
        let mut changed = 0;
        for face in self.faces.iter_mut().filter(|f| f.name == old) {
            face.name = new.to_string();
            changed += 1;
        }
        changed
    }

    /// Clamp and set the match tolerance.
    pub fn set_tolerance(&mut self, tolerance: f32) {
        self.tolerance = if tolerance.is_nan() { DEFAULT_TOLERANCE } else { tolerance.clamp(0.0, 1.0) };
    }

    /// Load from `path`; a missing file yields an empty default gallery.
    pub fn load(path: &Path, passphrase: Option<&str>) -> Result<Self, GalleryError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no encodings file, starting empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let json = match passphrase {
            Some(p) => open(&bytes, p)?,
            None => bytes,
        };
        let mut gallery: Gallery = serde_json::from_slice(&json)?;
        gallery.set_tolerance(gallery.tolerance);

        tracing::info!(
            path = %path.display(),
            encodings = gallery.encodings_count(),
            people = gallery.people_count(),
            "loaded encodings"
        );
        Ok(gallery)
    }

    /// Write to `path` via a temp file and rename.
    pub fn save(&self, path: &Path, passphrase: Option<&str>) -> Result<(), GalleryError> {
        let json = serde_json::to_vec(self)?;
        let bytes = match passphrase {
            Some(p) => seal(&json, p)?,
            None => json,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;

        tracing::info!(path = %path.display(), encodings = self.encodings_count(), "saved encodings");
        Ok(())
    }
}

fn cipher(passphrase: &str) -> Aes256Gcm {
    let digest = Sha256::digest(passphrase.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest))
}

fn seal(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, GalleryError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher(passphrase)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| GalleryError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(sealed: &[u8], passphrase: &str) -> Result<Vec<u8>, GalleryError> {
    if sealed.len() < NONCE_LEN {
        return Err(GalleryError::Decrypt);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher(passphrase)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| GalleryError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;
    use tempfile::TempDir;

    fn sample() -> Gallery {
        let face = |name: &str, v: f32| KnownFace {
            name: name.into(),
            embedding: Embedding { values: vec![v, 1.0 - v], model_version: Some("w600k_r50".into()) },
        };
        Gallery {
            faces: vec![face("ann", 0.1), face("ann", 0.2), face("ben", 0.9)],
            tolerance: 0.5,
            detection_mode: DetectionMode::Accurate,
        }
    }

    #[test]
    fn test_counts() {
        let g = sample();
        assert_eq!(g.encodings_count(), 3);
        assert_eq!(g.people_count(), 2);
    }

    #[test]
    fn test_forget_and_rename() {
        let mut g = sample();
        assert_eq!(g.rename("ann", "anna"), 2);
        assert_eq!(g.rename("nobody", "x"), 0);
        assert_eq!(g.forget("ben"), 1);
        assert_eq!(g.people_count(), 1);
        assert!(g.faces.iter().all(|f| f.name == "anna"));
    }

    #[test]
    fn test_missing_file_is_empty_default() {
        let dir = TempDir::new().unwrap();
        let g = Gallery::load(&dir.path().join("none.json"), None).unwrap();
        assert!(g.is_empty());
        assert_eq!(g.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(g.detection_mode, DetectionMode::Fast);
    }

    #[test]
    fn test_plain_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/enc.json");
        sample().save(&path, None).unwrap();
        let loaded = Gallery::load(&path, None).unwrap();
        assert_eq!(loaded.people_count(), 2);
        assert_eq!(loaded.tolerance, 0.5);
        assert_eq!(loaded.detection_mode, DetectionMode::Accurate);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_encrypted_file_needs_right_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("enc.bin");
        sample().save(&path, Some("hunter2")).unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(serde_json::from_slice::<Gallery>(&raw).is_err());

        assert_eq!(Gallery::load(&path, Some("hunter2")).unwrap().encodings_count(), 3);
        assert!(matches!(Gallery::load(&path, Some("wrong")), Err(GalleryError::Decrypt)));
    }

    #[test]
    fn test_legacy_fields_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.json");
        fs::write(&path, r#"{"faces": [], "detection_mode": "hog", "tolerance": 3.0}"#).unwrap();
        let g = Gallery::load(&path, None).unwrap();
        assert_eq!(g.detection_mode, DetectionMode::Fast);
        assert_eq!(g.tolerance, 1.0);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(Gallery::load(&path, None), Err(GalleryError::Malformed(_))));
    }
}
