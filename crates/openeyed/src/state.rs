use anyhow::Context;
use openeye_core::{FaceEncoder, FaceLibrary, Gallery};
use std::sync::Arc;

use crate::auth::Authenticator;
use crate::cameras::{CameraRegistry, DEFAULT_CAMERA};
use crate::config::Config;
use crate::engine::spawn_engine;
use crate::faces::FaceService;
use crate::store::DetectionStore;

pub struct AppState {
    pub faces: FaceService,
    pub auth: Authenticator,
}

impl AppState {
    /// Open the library, gallery and history database, and start the engine
    /// thread around `encoder`.
    pub async fn new(config: &Config, encoder: Box<dyn FaceEncoder>) -> anyhow::Result<Arc<Self>> {
        let library = FaceLibrary::open(&config.faces_dir)
            .with_context(|| format!("cannot open faces folder {}", config.faces_dir.display()))?;
        let gallery = Gallery::load(&config.encodings_path, config.encodings_key.as_deref())
            .with_context(|| format!("cannot load encodings from {}", config.encodings_path.display()))?;
        let store = DetectionStore::open(&config.db_path)
            .await
            .with_context(|| format!("cannot open database {}", config.db_path.display()))?;

        let cameras = CameraRegistry::new(config.detection_cooldown);
        cameras.register(DEFAULT_CAMERA, true);

        let engine = spawn_engine(encoder)?;
        let mode = gallery.detection_mode;
        engine.set_detection_mode(mode).await?;

        let faces = FaceService::new(
            library,
            gallery,
            config.encodings_path.clone(),
            config.encodings_key.clone(),
            engine,
            cameras,
            store,
        );

        Ok(Arc::new(Self {
            faces,
            auth: Authenticator::from_config(config),
        }))
    }
}
