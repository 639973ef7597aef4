use chrono::{DateTime, NaiveDate, Utc};
use image::RgbImage;
use openeye_core::{DetectionMode, FaceDetection, FaceLibrary, Gallery, Person, TrainingReport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::cameras::CameraRegistry;
use crate::engine::EngineHandle;
use crate::error::ApiError;
use crate::store::{DetectionStore, NewDetection};

/// Camera id recorded for frames posted without one.
pub const DIRECT_SOURCE: &str = "api";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceStatistics {
    pub total_people: usize,
    pub total_encodings: usize,
    pub recognitions_today: u64,
    pub last_recognition: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceSettings {
    pub enabled: bool,
    pub detection_method: DetectionMode,
    pub recognition_threshold: f32,
    pub faces_folder: String,
}

/// Partial settings change; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub detection_method: Option<String>,
    pub recognition_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    /// False when the frame was skipped (disabled, empty gallery or cooldown).
    pub processed: bool,
    pub detections: Vec<FaceDetection>,
}

impl Recognition {
    fn skipped() -> Self {
        Self { processed: false, detections: Vec::new() }
    }
}

struct RecognitionCounter {
    day: NaiveDate,
    today: u64,
    last: Option<DateTime<Utc>>,
}

impl RecognitionCounter {
    fn add(&mut self, faces: usize, now: DateTime<Utc>) {
        let day = now.date_naive();
        if day != self.day {
            self.day = day;
            self.today = 0;
        }
        self.today += faces as u64;
        self.last = Some(now);
    }
}

pub struct FaceService {
    library: FaceLibrary,
    encodings_path: PathBuf,
    encodings_key: Option<String>,
    engine: EngineHandle,
    gallery: RwLock<Arc<Gallery>>,
    /// Serializes gallery rewrites (training and settings).
    update: tokio::sync::Mutex<()>,
    enabled: AtomicBool,
    counter: Mutex<RecognitionCounter>,
    cameras: CameraRegistry,
    store: DetectionStore,
}

impl FaceService {
    pub fn new(
        library: FaceLibrary,
        gallery: Gallery,
        encodings_path: PathBuf,
        encodings_key: Option<String>,
        engine: EngineHandle,
        cameras: CameraRegistry,
        store: DetectionStore,
    ) -> Self {
        Self {
            library,
            encodings_path,
            encodings_key,
            engine,
            gallery: RwLock::new(Arc::new(gallery)),
            update: tokio::sync::Mutex::new(()),
            enabled: AtomicBool::new(true),
            counter: Mutex::new(RecognitionCounter {
                day: Utc::now().date_naive(),
                today: 0,
                last: None,
            }),
            cameras,
            store,
        }
    }

    pub fn library(&self) -> &FaceLibrary {
        &self.library
    }

    pub fn cameras(&self) -> &CameraRegistry {
        &self.cameras
    }

    pub fn store(&self) -> &DetectionStore {
        &self.store
    }

    pub async fn gallery(&self) -> Arc<Gallery> {
        self.gallery.read().await.clone()
    }

    async fn replace_gallery(&self, next: Gallery) -> Result<(), ApiError> {
        next.save(&self.encodings_path, self.encodings_key.as_deref())?;
        *self.gallery.write().await = Arc::new(next);
        Ok(())
    }

    /// Re-encode the whole library and persist the new gallery.
    pub async fn train(&self) -> Result<TrainingReport, ApiError> {
        let _guard = self.update.lock().await;
        tracing::info!("starting face recognition training");
        let out = self.engine.train(self.library.clone()).await?;
        let mut next = Gallery::clone(&*self.gallery().await);
        next.faces = out.faces;
        self.replace_gallery(next).await?;
        Ok(out.report)
    }

    /// Rename a person's folder and relabel their trained encodings.
    pub async fn rename_person(&self, old: &str, new: &str) -> Result<Person, ApiError> {
        let _guard = self.update.lock().await;
        let person = self.library.rename_person(old, new)?;
        if person.name != old {
            let mut next = Gallery::clone(&*self.gallery().await);
            if next.rename(old, &person.name) > 0 {
                if let Err(e) = self.replace_gallery(next).await {
                    // Put the folder back so it keeps matching the stored labels.
                    if let Err(undo) = self.library.rename_person(&person.name, old) {
                        tracing::error!(from = %person.name, to = old, error = %undo, "failed to undo person rename");
                    }
                    return Err(e);
                }
            }
        }
        Ok(person)
    }

    /// Remove a person and their photos, then retrain so they stop matching.
    pub async fn delete_person(&self, name: &str) -> Result<TrainingReport, ApiError> {
        self.library.delete_person(name)?;
        self.train().await
    }

    pub async fn statistics(&self) -> FaceStatistics {
        let gallery = self.gallery().await;
        let counter = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        let today = if counter.day == Utc::now().date_naive() { counter.today } else { 0 };
        FaceStatistics {
            total_people: gallery.people_count(),
            total_encodings: gallery.encodings_count(),
            recognitions_today: today,
            last_recognition: counter.last,
        }
    }

    pub async fn settings(&self) -> FaceSettings {
        let gallery = self.gallery().await;
        FaceSettings {
            enabled: self.enabled.load(Ordering::Relaxed),
            detection_method: gallery.detection_mode,
            recognition_threshold: gallery.tolerance,
            faces_folder: self.library.root().to_string_lossy().into_owned(),
        }
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<FaceSettings, ApiError> {
        let mode = update
            .detection_method
            .as_deref()
            .map(str::parse::<DetectionMode>)
            .transpose()
            .map_err(ApiError::BadRequest)?;

        {
            let _guard = self.update.lock().await;
            let mut next = Gallery::clone(&*self.gallery().await);
            if let Some(mode) = mode {
                self.engine.set_detection_mode(mode).await?;
                next.detection_mode = mode;
            }
            if let Some(threshold) = update.recognition_threshold {
                next.set_tolerance(threshold);
            }
            if mode.is_some() || update.recognition_threshold.is_some() {
                self.replace_gallery(next).await?;
            }
        }
        if let Some(enabled) = update.enabled {
            self.enabled.store(enabled, Ordering::Relaxed);
        }

        let settings = self.settings().await;
        tracing::info!(?settings, "face settings updated");
        Ok(settings)
    }

    /// Recognize faces in one frame. With a camera id the camera's enable
    /// flag and cooldown apply, and detections land in its recent buffer.
    /// Every detection is written to the history store.
    pub async fn recognize(
        &self,
        image: RgbImage,
        camera_id: Option<&str>,
        motion_detected: bool,
    ) -> Result<Recognition, ApiError> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(Recognition::skipped());
        }
        let gallery = self.gallery().await;
        let now = Utc::now();
        let ready = match camera_id {
            Some(id) => self.cameras.should_process(id, !gallery.is_empty(), now)?,
            None => !gallery.is_empty(),
        };
        if !ready {
            return Ok(Recognition::skipped());
        }

        let mut detections = self.engine.recognize(image, gallery).await?;
        for det in &mut detections {
            det.motion_detected = Some(motion_detected);
        }
        if detections.is_empty() {
            return Ok(Recognition { processed: true, detections });
        }

        self.counter
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .add(detections.len(), now);
        if let Some(id) = camera_id {
            self.cameras.record(id, &detections)?;
        }
        tracing::info!(
            camera = camera_id.unwrap_or(DIRECT_SOURCE),
            faces = detections.len(),
            names = ?detections.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "faces detected"
        );

        for det in &detections {
            let event = NewDetection {
                camera_id: camera_id.unwrap_or(DIRECT_SOURCE).to_string(),
                person_name: det.name.clone(),
                confidence: det.confidence,
                location: det.location,
                motion_detected,
                detected_at: now,
            };
            if let Err(e) = self.store.record_detection(event).await {
                tracing::warn!(error = %e, "failed to record detection event");
            }
        }

        Ok(Recognition { processed: true, detections })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{add_photo, fixture};
    use super::*;
    use crate::cameras::DEFAULT_CAMERA;
    use crate::store::RecentQuery;
    use openeye_core::UNKNOWN_PERSON;
    use std::time::Duration;

    fn frame(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(8, 8, image::Rgb(color))
    }

    #[tokio::test]
    async fn test_train_saves_gallery_and_updates_statistics() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;
        svc.library().add_person("ann").unwrap();
        svc.library().add_person("ben").unwrap();
        add_photo(svc, "ann", "a.png", [220, 0, 0]);
        add_photo(svc, "ben", "b.png", [0, 0, 220]);

        let report = svc.train().await.unwrap();
        assert_eq!(report.total_people, 2);
        assert_eq!(report.total_encodings, 2);

        let stats = svc.statistics().await;
        assert_eq!(stats.total_people, 2);
        assert_eq!(stats.total_encodings, 2);
        assert_eq!(stats.recognitions_today, 0);

        let saved = Gallery::load(&fx.dir.path().join("encodings.json"), None).unwrap();
        assert_eq!(saved.encodings_count(), 2);
    }

    #[tokio::test]
    async fn test_recognize_records_everywhere() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;
        svc.library().add_person("ann").unwrap();
        add_photo(svc, "ann", "a.png", [220, 0, 0]);
        svc.train().await.unwrap();

        let out = svc.recognize(frame([210, 5, 0]), Some(DEFAULT_CAMERA), true).await.unwrap();
        assert!(out.processed);
        assert_eq!(out.detections[0].name, "ann");
        assert_eq!(out.detections[0].motion_detected, Some(true));

        let out = svc.recognize(frame([0, 200, 0]), None, false).await.unwrap();
        assert_eq!(out.detections[0].name, UNKNOWN_PERSON);

        let stats = svc.statistics().await;
        assert_eq!(stats.recognitions_today, 2);
        assert!(stats.last_recognition.is_some());

        let cams = svc.cameras().all_detections(true);
        assert_eq!(cams[DEFAULT_CAMERA].recent_faces.len(), 1);

        let events = svc
            .store()
            .recent_detections(RecentQuery { limit: 50, hours: 1, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events.iter().filter(|e| e.camera_id == DIRECT_SOURCE).count(), 1);
    }

    #[tokio::test]
    async fn test_recognize_skips_empty_gallery_and_cooldown() {
        let fx = fixture(Duration::from_secs(60)).await;
        let svc = &fx.service;

        let out = svc.recognize(frame([200, 0, 0]), Some(DEFAULT_CAMERA), false).await.unwrap();
        assert!(!out.processed);

        svc.library().add_person("ann").unwrap();
        add_photo(svc, "ann", "a.png", [220, 0, 0]);
        svc.train().await.unwrap();
        let trained_calls = fx.calls.load(Ordering::SeqCst);

        assert!(svc.recognize(frame([200, 0, 0]), Some(DEFAULT_CAMERA), false).await.unwrap().processed);
        assert!(!svc.recognize(frame([200, 0, 0]), Some(DEFAULT_CAMERA), false).await.unwrap().processed);
        assert_eq!(fx.calls.load(Ordering::SeqCst), trained_calls + 1);

        assert!(matches!(
            svc.recognize(frame([200, 0, 0]), Some("garage"), false).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_direct_frame_with_empty_gallery_is_skipped() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;
        let out = svc.recognize(frame([200, 0, 0]), None, false).await.unwrap();
        assert!(!out.processed);
        assert!(out.detections.is_empty());
        assert_eq!(svc.statistics().await.last_recognition, None);
    }

    #[tokio::test]
    async fn test_disabled_service_skips_frames() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;
        svc.update_settings(SettingsUpdate { enabled: Some(false), ..Default::default() })
            .await
            .unwrap();
        let out = svc.recognize(frame([200, 0, 0]), None, false).await.unwrap();
        assert!(!out.processed);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_settings_update_validates_and_persists() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;

        let err = svc
            .update_settings(SettingsUpdate { detection_method: Some("laser".into()), ..Default::default() })
            .await;
        assert!(matches!(err, Err(ApiError::BadRequest(_))));

        let settings = svc
            .update_settings(SettingsUpdate {
                enabled: None,
                detection_method: Some("cnn".into()),
                recognition_threshold: Some(1.7),
            })
            .await
            .unwrap();
        assert_eq!(settings.detection_method, DetectionMode::Accurate);
        assert_eq!(settings.recognition_threshold, 1.0);
        assert!(settings.enabled);
        assert!(settings.faces_folder.ends_with("faces"));

        let saved = Gallery::load(&fx.dir.path().join("encodings.json"), None).unwrap();
        assert_eq!(saved.detection_mode, DetectionMode::Accurate);
    }

    #[tokio::test]
    async fn test_delete_person_retrains() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;
        svc.library().add_person("ann").unwrap();
        svc.library().add_person("ben").unwrap();
        add_photo(svc, "ann", "a.png", [220, 0, 0]);
        add_photo(svc, "ben", "b.png", [0, 0, 220]);
        svc.train().await.unwrap();

        svc.delete_person("ann").await.unwrap();
        let gallery = svc.gallery().await;
        assert_eq!(gallery.people_count(), 1);
        assert!(gallery.faces.iter().all(|f| f.name == "ben"));
        assert!(matches!(svc.delete_person("ann").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rename_relabels_encodings() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;
        svc.library().add_person("ann").unwrap();
        add_photo(svc, "ann", "a.png", [220, 0, 0]);
        svc.train().await.unwrap();

        let person = svc.rename_person("ann", "Anna").await.unwrap();
        assert_eq!(person.name, "Anna");
        let out = svc.recognize(frame([215, 2, 0]), None, false).await.unwrap();
        assert_eq!(out.detections[0].name, "Anna");
    }

    #[tokio::test]
    async fn test_rename_rolls_back_when_gallery_save_fails() {
        let fx = fixture(Duration::ZERO).await;
        let svc = &fx.service;
        svc.library().add_person("ann").unwrap();
        add_photo(svc, "ann", "a.png", [220, 0, 0]);
        svc.train().await.unwrap();

        // A directory where the encodings file belongs makes the save fail.
        let encodings = fx.dir.path().join("encodings.json");
        std::fs::remove_file(&encodings).unwrap();
        std::fs::create_dir(&encodings).unwrap();

        assert!(svc.rename_person("ann", "Anna").await.is_err());
        assert!(svc.library().get_person("ann").is_ok());
        assert!(svc.library().get_person("Anna").is_err());
        assert!(svc.gallery().await.faces.iter().all(|f| f.name == "ann"));
    }

    #[test]
    fn test_counter_resets_on_new_day() {
        let day1 = DateTime::parse_from_rfc3339("2026-03-01T23:59:00Z").unwrap().with_timezone(&Utc);
        let day2 = DateTime::parse_from_rfc3339("2026-03-02T00:01:00Z").unwrap().with_timezone(&Utc);
        let mut counter = RecognitionCounter { day: day1.date_naive(), today: 0, last: None };
        counter.add(3, day1);
        counter.add(2, day2);
        assert_eq!(counter.today, 2);
        assert_eq!(counter.last, Some(day2));
    }
}
