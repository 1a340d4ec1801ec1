
use crate::{RagError, Result};

/// Characters per token used by the budget heuristic
const CHARS_PER_TOKEN: usize = 4;

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_same_dimension(a, b)?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

#[inline]
pub fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Cosine similarity in `[-1, 1]`.
///
/// Returns `0.0` when either vector has zero magnitude and a validation error
/// when the lengths differ.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let norm_a = magnitude(a);
    let norm_b = magnitude(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Scale to unit magnitude. The zero vector is returned unchanged.
#[inline]
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = magnitude(vector);
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Token estimate used for context budgeting: `ceil(chars / 4)`
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn ensure_same_dimension(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(RagError::Validation(format!(
            "Vector dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(())
}
