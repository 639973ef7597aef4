use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8000).
    pub bind: String,
    /// Faces folder: one sub-directory of photos per person.
    pub faces_dir: PathBuf,
    /// Trained encodings file.
    pub encodings_path: PathBuf,
    /// Passphrase for encrypting the encodings file at rest.
    pub encodings_key: Option<String>,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite detection-history database.
    pub db_path: PathBuf,
    /// Minimum time between processed frames per camera.
    pub detection_cooldown: Duration,
    pub admin_tokens: Vec<String>,
    pub user_tokens: Vec<String>,
    pub viewer_tokens: Vec<String>,
}

impl Config {
    /// Load configuration from `OPENEYE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = openeye_core::data_dir();

        Self {
            bind: std::env::var("OPENEYE_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            faces_dir: env_path("OPENEYE_FACES_DIR").unwrap_or_else(|| PathBuf::from("faces")),
            encodings_path: env_path("OPENEYE_ENCODINGS_PATH")
                .unwrap_or_else(|| PathBuf::from("face_encodings.json")),
            encodings_key: std::env::var("OPENEYE_ENCODINGS_KEY").ok().filter(|k| !k.is_empty()),
            model_dir: env_path("OPENEYE_MODEL_DIR").unwrap_or_else(openeye_core::default_model_dir),
            db_path: env_path("OPENEYE_DB_PATH").unwrap_or_else(|| data_dir.join("openeye.db")),
            detection_cooldown: cooldown(env_f32("OPENEYE_DETECTION_COOLDOWN_SECS", DEFAULT_COOLDOWN.as_secs_f32())),
            admin_tokens: env_list("OPENEYE_ADMIN_TOKENS"),
            user_tokens: env_list("OPENEYE_USER_TOKENS"),
            viewer_tokens: env_list("OPENEYE_VIEWER_TOKENS"),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Negative values mean no cooldown; values too large for a `Duration` fall back to the default.
fn cooldown(secs: f32) -> Duration {
    Duration::try_from_secs_f32(secs.max(0.0)).unwrap_or_else(|e| {
        tracing::warn!(secs, error = %e, "invalid detection cooldown, using default");
        DEFAULT_COOLDOWN
    })
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key).map(|v| split_list(&v)).unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
