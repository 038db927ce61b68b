//! Contract for the external face embedding model.

use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("no face found in crop")]
    NoFace,
    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Turns an aligned face crop into a fixed-length feature vector.
///
/// Vectors from one embedder must always have [`Embedder::dimension`]
/// components, and Euclidean distance between them must be meaningful
/// (roughly 0 for the same face, around 0.6 and above for different people).
pub trait Embedder: Send {
    fn embed(&mut self, face: &GrayImage) -> Result<Vec<f32>, EmbedError>;

    fn dimension(&self) -> usize;
}
