//! Per-camera face-detection state: enable flag, cooldown and recent buffer.

use chrono::{DateTime, Utc};
use openeye_core::FaceDetection;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CAMERA: &str = "mock_cam_1";
const RECENT_CAPACITY: usize = 10;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatistics {
    pub enabled: bool,
    pub total_detections: usize,
    pub unique_people_detected: usize,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub face_manager_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraDetections {
    pub recent_faces: Vec<FaceDetection>,
    pub statistics: CameraStatistics,
}

struct CameraState {
    enabled: bool,
    recent: VecDeque<FaceDetection>,
    last_detection: Option<DateTime<Utc>>,
}

impl CameraState {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            last_detection: None,
        }
    }
}

pub struct CameraRegistry {
    cooldown: Duration,
    cameras: Mutex<BTreeMap<String, CameraState>>,
}

impl CameraRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            cameras: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, CameraState>> {
        self.cameras.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a camera; an existing one keeps its state.
    pub fn register(&self, id: &str, enabled: bool) {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| CameraState::new(enabled));
        tracing::info!(camera = id, enabled, "camera registered");
    }

    pub fn enable_face_detection(&self, id: &str, enabled: bool) -> Result<(), CameraError> {
        let mut cameras = self.lock();
        let camera = cameras.get_mut(id).ok_or_else(|| CameraError::NotFound(id.to_string()))?;
        camera.enabled = enabled;
        tracing::info!(camera = id, enabled, "face detection toggled");
        Ok(())
    }

    /// Claim the camera for one frame at `now`. False when detection is off,
    /// the gallery is empty, or the previous frame is inside the cooldown.
    pub fn should_process(&self, id: &str, gallery_ready: bool, now: DateTime<Utc>) -> Result<bool, CameraError> {
        let mut cameras = self.lock();
        let camera = cameras.get_mut(id).ok_or_else(|| CameraError::NotFound(id.to_string()))?;
        if !camera.enabled || !gallery_ready {
            return Ok(false);
        }
        if let Some(last) = camera.last_detection {
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < self.cooldown {
                return Ok(false);
            }
        }
        camera.last_detection = Some(now);
        Ok(true)
    }

    /// Append detections to the camera's buffer, keeping the newest ten.
    pub fn record(&self, id: &str, detections: &[FaceDetection]) -> Result<(), CameraError> {
        let mut cameras = self.lock();
        let camera = cameras.get_mut(id).ok_or_else(|| CameraError::NotFound(id.to_string()))?;
        for det in detections {
            if camera.recent.len() == RECENT_CAPACITY {
                camera.recent.pop_front();
            }
            camera.recent.push_back(det.clone());
        }
        Ok(())
    }

    pub fn all_detections(&self, face_manager_ready: bool) -> BTreeMap<String, CameraDetections> {
        self.lock()
            .iter()
            .map(|(id, camera)| {
                let unique: HashSet<&str> = camera
                    .recent
                    .iter()
                    .filter(|d| d.is_known())
                    .map(|d| d.name.as_str())
                    .collect();
                let entry = CameraDetections {
                    recent_faces: camera.recent.iter().cloned().collect(),
                    statistics: CameraStatistics {
                        enabled: camera.enabled,
                        total_detections: camera.recent.len(),
                        unique_people_detected: unique.len(),
                        last_detection_time: camera.last_detection,
                        face_manager_ready,
                    },
                };
                (id.clone(), entry)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openeye_core::{FaceLocation, UNKNOWN_PERSON};

    fn det(name: &str) -> FaceDetection {
        FaceDetection {
            name: name.into(),
            confidence: 0.7,
            location: FaceLocation { top: 0, right: 1, bottom: 1, left: 0 },
            timestamp: Utc::now().to_rfc3339(),
            motion_detected: Some(false),
        }
    }

    #[test]
    fn test_unknown_camera() {
        let reg = CameraRegistry::new(Duration::from_secs(2));
        assert!(matches!(reg.enable_face_detection("nope", true), Err(CameraError::NotFound(_))));
        assert!(reg.should_process("nope", true, Utc::now()).is_err());
    }

    #[test]
    fn test_should_process_respects_flags_and_cooldown() {
        let reg = CameraRegistry::new(Duration::from_secs(2));
        reg.register(DEFAULT_CAMERA, true);
        let t0 = Utc::now();

        assert!(!reg.should_process(DEFAULT_CAMERA, false, t0).unwrap());
        assert!(reg.should_process(DEFAULT_CAMERA, true, t0).unwrap());
        assert!(!reg.should_process(DEFAULT_CAMERA, true, t0 + chrono::Duration::milliseconds(1500)).unwrap());
        assert!(reg.should_process(DEFAULT_CAMERA, true, t0 + chrono::Duration::seconds(2)).unwrap());

        reg.enable_face_detection(DEFAULT_CAMERA, false).unwrap();
        assert!(!reg.should_process(DEFAULT_CAMERA, true, t0 + chrono::Duration::seconds(10)).unwrap());
    }

    #[test]
    fn test_buffer_keeps_newest_ten() {
        let reg = CameraRegistry::new(Duration::ZERO);
        reg.register("cam", true);
        let batch: Vec<_> = (0..12).map(|i| det(&format!("p{i}"))).collect();
        reg.record("cam", &batch).unwrap();
        reg.record("cam", &[det(UNKNOWN_PERSON)]).unwrap();

        let all = reg.all_detections(true);
        let cam = &all["cam"];
        assert_eq!(cam.recent_faces.len(), 10);
        assert_eq!(cam.recent_faces[0].name, "p3");
        assert_eq!(cam.recent_faces[9].name, UNKNOWN_PERSON);
        assert_eq!(cam.statistics.total_detections, 10);
        assert_eq!(cam.statistics.unique_people_detected, 9);
        assert!(cam.statistics.face_manager_ready);
    }

    #[test]
    fn test_register_keeps_existing_state() {
        let reg = CameraRegistry::new(Duration::ZERO);
        reg.register("cam", false);
        reg.register("cam", true);
        assert!(!reg.all_detections(false)["cam"].statistics.enabled);
    }
}
