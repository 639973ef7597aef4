use image::RgbImage;
use openeye_core::pipeline;
use openeye_core::{
    DetectionMode, DistanceMatcher, EncoderError, FaceDetection, FaceEncoder, FaceLibrary, Gallery, KnownFace,
    LibraryError, TrainingReport,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("library error: {0}")]
    Library(#[from] LibraryError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Output of a training run: fresh gallery encodings plus the run summary.
pub struct TrainOutput {
    pub faces: Vec<KnownFace>,
    pub report: TrainingReport,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Train {
        library: FaceLibrary,
        reply: oneshot::Sender<Result<TrainOutput, EngineError>>,
    },
    Recognize {
        image: RgbImage,
        gallery: Arc<Gallery>,
        reply: oneshot::Sender<Result<Vec<FaceDetection>, EngineError>>,
    },
    SetDetectionMode {
        mode: DetectionMode,
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Re-encode every photo in the library.
    pub async fn train(&self, library: FaceLibrary) -> Result<TrainOutput, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Train { library, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect faces in one frame and match them against `gallery` at its tolerance.
    pub async fn recognize(&self, image: RgbImage, gallery: Arc<Gallery>) -> Result<Vec<FaceDetection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                gallery,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn set_detection_mode(&self, mode: DetectionMode) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SetDetectionMode { mode, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The encoder is moved onto the thread and owned there; inference never
/// runs on the async runtime.
pub fn spawn_engine(mut encoder: Box<dyn FaceEncoder>) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("openeye-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Train { library, reply } => {
                        let result = pipeline::train(&library, encoder.as_mut())
                            .map(|(faces, report)| TrainOutput { faces, report })
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, gallery, reply } => {
                        let result = pipeline::recognize(
                            &image,
                            &gallery.faces,
                            gallery.tolerance,
                            encoder.as_mut(),
                            &DistanceMatcher,
                        )
                        .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::SetDetectionMode { mode, reply } => {
                        encoder.set_detection_mode(mode);
                        let _ = reply.send(());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
