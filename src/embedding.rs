use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::error::EmbedError;

/// Sentence embedding collaborator.
///
/// One call embeds a whole batch: the result has one vector per input text, in input order, and
/// every vector of one model has the same dimension. The same text must always map to the same
/// vector for a given model.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed(texts)
    }
}

impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed(texts)
    }
}

/// Adapts a model that needs `&mut self` to embed (e.g. it owns a decode context) into a shared
/// [`Embedder`]. Calls are serialized.
pub struct Serialized<M> {
    inner: Mutex<M>,
}

pub trait EmbedMut: Send {
    fn embed_mut(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

impl<M: EmbedMut> Serialized<M> {
    pub fn new(model: M) -> Self {
        Self {
            inner: Mutex::new(model),
        }
    }
}

impl<M: EmbedMut> Embedder for Serialized<M> {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.embed_mut(texts)
    }
}

/// Opens the model on the first batch instead of up front, so a document that fails to parse or
/// has nothing left to compare never loads it. A failed open is retried on the next call.
pub struct LazyEmbedder<F> {
    open: F,
    model: OnceCell<Arc<dyn Embedder>>,
}

impl<F> LazyEmbedder<F>
where
    F: Fn() -> Result<Arc<dyn Embedder>, EmbedError> + Send + Sync,
{
    pub fn new(open: F) -> Self {
        Self {
            open,
            model: OnceCell::new(),
        }
    }
}

impl<F> Embedder for LazyEmbedder<F>
where
    F: Fn() -> Result<Arc<dyn Embedder>, EmbedError> + Send + Sync,
{
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let model = self.model.get_or_try_init(|| (self.open)())?;
        model.embed(texts)
    }
}

/// Cosine similarity in [-1, 1]. A zero-magnitude (or non-finite) vector scores 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a * norm_b);
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
