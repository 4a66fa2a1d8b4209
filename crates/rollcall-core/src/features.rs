//! Feature service boundary — descriptor extraction and distance scoring.
//!
//! Extraction is blocking (model inference, image decoding), so extractors run
//! on a dedicated OS thread and async callers talk to it through a
//! [`FeatureWorker`] handle.

use crate::error::RosterError;
use crate::types::{CapturedImage, Descriptor};
use std::future::Future;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("no face detected")]
    NoFace,
    #[error("multiple faces detected ({0})")]
    MultipleFaces(usize),
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("feature worker exited")]
    Unavailable,
}

impl From<FeatureError> for RosterError {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::NoFace => RosterError::NoFaceDetected,
            FeatureError::MultipleFaces(_) => RosterError::MultipleFacesDetected,
            other => RosterError::FeatureService(other.to_string()),
        }
    }
}

/// Async capability consumed by the enrollment/verification engine.
pub trait FeatureService: Send + Sync {
    /// Detect exactly one face in `image` and return its descriptor.
    fn extract_descriptor(
        &self,
        image: &CapturedImage,
    ) -> impl Future<Output = Result<Descriptor, FeatureError>> + Send;

    /// Non-negative dissimilarity between two descriptors.
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Blocking descriptor extractor, run on the worker thread.
pub trait DescriptorExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Descriptor, FeatureError>;
}

struct ExtractRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<Descriptor, FeatureError>>,
}

/// Clone-safe handle to the feature worker thread.
#[derive(Clone)]
pub struct FeatureWorker {
    tx: mpsc::Sender<ExtractRequest>,
}

impl FeatureWorker {
    /// Spawn `extractor` on a dedicated OS thread.
    ///
    /// The thread exits once every handle has been dropped.
    pub fn spawn<X>(extractor: X) -> std::io::Result<Self>
    where
        X: DescriptorExtractor + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ExtractRequest>(4);
        let mut extractor = extractor;

        std::thread::Builder::new()
            .name("rollcall-features".into())
            .spawn(move || {
                tracing::info!("feature worker started");
                while let Some(req) = rx.blocking_recv() {
                    // A caller that gave up has dropped its receiver; skip the work.
                    if req.reply.is_closed() {
                        tracing::debug!("extract request abandoned before start");
                        continue;
                    }
                    let result = extractor.extract(&req.image);
                    if let Err(err) = &result {
                        tracing::debug!(error = %err, "extraction rejected capture");
                    }
                    let _ = req.reply.send(result);
                }
                tracing::info!("feature worker exiting");
            })?;

        Ok(Self { tx })
    }
}

impl FeatureService for FeatureWorker {
    async fn extract_descriptor(&self, image: &CapturedImage) -> Result<Descriptor, FeatureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ExtractRequest {
                image: image.bytes.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| FeatureError::Unavailable)?;
        reply_rx.await.map_err(|_| FeatureError::Unavailable)?
    }
}
