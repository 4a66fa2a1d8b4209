use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Face descriptor: a fixed-length feature vector produced by the feature service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Extractor that produced this descriptor (e.g., "thumbnail-16x8").
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two descriptors. Smaller = more similar.
    ///
    /// Descriptors of different lengths are compared over the shared prefix,
    /// with every unmatched component counted against the pair.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        let shared: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();

        let (longer, n) = if self.values.len() > other.values.len() {
            (&self.values, other.values.len())
        } else {
            (&other.values, self.values.len())
        };
        let tail: f32 = longer[n..].iter().map(|v| v * v).sum();

        (shared + tail).sqrt()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Raw bytes of a captured image (JPEG/PNG as delivered by the capture layer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
}

impl CapturedImage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Lowercase hex SHA-256 of the image bytes.
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }

    /// Reference under which the bytes are stored in the image table.
    pub fn to_ref(&self) -> ImageRef {
        ImageRef {
            digest: self.digest(),
            byte_len: self.bytes.len(),
        }
    }
}

/// Content-addressed pointer to a stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub digest: String,
    pub byte_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Descriptor::new(vec![0.25, -0.5, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_symmetric_with_length_mismatch() {
        let a = Descriptor::new(vec![1.0, 0.0, 2.0]);
        let b = Descriptor::new(vec![1.0]);
        let d = a.euclidean_distance(&b);
        assert!((d - 2.0).abs() < 1e-6);
        assert_eq!(d, b.euclidean_distance(&a));
    }

    #[test]
    fn test_image_digest_is_stable_hex() {
        let img = CapturedImage::new(b"abc".to_vec());
        assert_eq!(
            img.digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let r = img.to_ref();
        assert_eq!(r.byte_len, 3);
        assert_eq!(r.digest, img.digest());
    }
}
