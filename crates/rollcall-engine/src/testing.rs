//! Scripted feature service for engine tests.

use rollcall_core::{CapturedImage, Descriptor, FeatureError, FeatureService};
use std::collections::{HashMap, HashSet};

/// Answers each image (keyed by its bytes) with a fixed outcome. Unknown
/// images have no face.
#[derive(Default)]
pub(crate) struct ScriptedFeatures {
    outcomes: HashMap<Vec<u8>, Result<Descriptor, FeatureError>>,
    stalled: HashSet<Vec<u8>>,
}

impl ScriptedFeatures {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn face(mut self, image: &[u8], values: Vec<f32>) -> Self {
        self.outcomes.insert(image.to_vec(), Ok(Descriptor::new(values)));
        self
    }

    pub(crate) fn reject(mut self, image: &[u8], err: FeatureError) -> Self {
        self.outcomes.insert(image.to_vec(), Err(err));
        self
    }

    /// Never answer for `image`.
    pub(crate) fn hang(mut self, image: &[u8]) -> Self {
        self.stalled.insert(image.to_vec());
        self
    }
}

impl FeatureService for ScriptedFeatures {
    async fn extract_descriptor(&self, image: &CapturedImage) -> Result<Descriptor, FeatureError> {
        if self.stalled.contains(&image.bytes) {
            std::future::pending::<()>().await;
        }
        self.outcomes
            .get(&image.bytes)
            .cloned()
            .unwrap_or(Err(FeatureError::NoFace))
    }
}
