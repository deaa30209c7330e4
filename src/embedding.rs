//! Deterministic stand-in text embedder.
//!
//! The real embedding model ("a small multilingual sentence encoder", §4.5)
//! is an external collaborator out of this core's scope. This hash-based
//! projection fills the same seam — fixed dimension, stable for identical
//! input — so `VectorIndex` callers and tests don't depend on a live model.

use crate::types::EMBEDDING_DIM;

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for (i, token) in text.to_ascii_lowercase().split_whitespace().enumerate() {
        let hash = fnv1a(token);
        let slot = (hash as usize) % EMBEDDING_DIM;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign / ((i + 1) as f32).sqrt();
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_fixed_dimension() {
        assert_eq!(embed_text("customer orders").len(), EMBEDDING_DIM);
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(embed_text("hello world"), embed_text("hello world"));
    }

    #[test]
    fn is_unit_normalized() {
        let v = embed_text("customer orders payments");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
