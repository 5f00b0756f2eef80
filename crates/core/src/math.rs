//! Cosine similarity/distance over equal-length real vectors (spec §4.1).

use crate::error::RouxError;

/// Cosine similarity in `[-1, 1]` (subject to floating-point precision).
///
/// Returns `0` when either vector has zero magnitude. Fails with
/// `DimensionMismatch` when the lengths differ, and `InvalidInput` when
/// either vector is empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, RouxError> {
    if a.is_empty() || b.is_empty() {
        return Err(RouxError::invalid_input("cosine_similarity: vectors must not be empty"));
    }
    if a.len() != b.len() {
        return Err(RouxError::dimension_mismatch(a.len(), b.len()));
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// `1 - cosine_similarity(a, b)`, except both-zero vectors return `1` (not
/// `0`) to express "unknown / no signal" rather than "identical".
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, RouxError> {
    if a.is_empty() || b.is_empty() {
        return Err(RouxError::invalid_input("cosine_distance: vectors must not be empty"));
    }
    if a.len() != b.len() {
        return Err(RouxError::dimension_mismatch(a.len(), b.len()));
    }

    let both_zero = a.iter().all(|&x| x == 0.0) && b.iter().all(|&x| x == 0.0);
    if both_zero {
        return Ok(1.0);
    }

    cosine_similarity(a, b).map(|sim| 1.0 - sim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_similarity_one() {
        let a = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_similarity_zero() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_similarity_minus_one() {
        let a = [1.0, 0.0];
        let b = [-1.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_similarity_is_zero_not_error() {
        let a = [0.0, 0.0];
        let b = [1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn dimension_mismatch_errors() {
        let a = [1.0, 2.0];
        let b = [1.0, 2.0, 3.0];
        let err = cosine_similarity(&a, &b).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DimensionMismatch);
    }

    #[test]
    fn empty_vectors_are_invalid_input() {
        let a: [f32; 0] = [];
        let b: [f32; 0] = [];
        let err = cosine_similarity(&a, &b).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn both_zero_distance_is_one() {
        let a = [0.0, 0.0, 0.0];
        assert_eq!(cosine_distance(&a, &a).unwrap(), 1.0);
    }

    #[test]
    fn distance_is_one_minus_similarity() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        let dist = cosine_distance(&a, &b).unwrap();
        assert!((dist - (1.0 - sim)).abs() < 1e-6);
    }
}
