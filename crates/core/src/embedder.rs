/// External capability: text → fixed-dimension float vector.
///
/// The core never ships a concrete model. Callers inject whichever
/// embedder they like (a local ONNX model, a remote API, a test double)
/// at build time and at `initialize` time.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, String>;

    /// Batched form used by the builder. The default implementation calls
    /// `embed` once per input; implementations backed by a batching model
    /// should override this for throughput.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}
