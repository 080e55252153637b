use std::cmp::Ordering;

use crate::core::errors::ApiError;

fn check_dimensions(query: &[f32], candidate: &[f32]) -> Result<(), ApiError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(ApiError::BadRequest(
            "Vectors must not be empty".to_string(),
        ));
    }
    if query.len() != candidate.len() {
        return Err(ApiError::DimensionMismatch {
            expected: candidate.len(),
            actual: query.len(),
        });
    }
    Ok(())
}

pub fn dot(query: &[f32], candidate: &[f32]) -> Result<f32, ApiError> {
    check_dimensions(query, candidate)?;
    Ok(query.iter().zip(candidate).map(|(a, b)| a * b).sum())
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, ApiError> {
    let dot = dot(query, candidate)?;
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok(dot / denom)
}

pub fn euclidean_distance(query: &[f32], candidate: &[f32]) -> Result<f32, ApiError> {
    check_dimensions(query, candidate)?;
    Ok(query
        .iter()
        .zip(candidate)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt())
}

/// Orders `(index, score)` pairs by score, highest first. Equal scores keep their input order.
pub fn sort_descending(scores: &mut [(usize, f32)]) {
    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let vec = vec![1.0, 2.0, 3.0, 4.0];
        let score = cosine_similarity(&vec, &vec).expect("cosine should work");
        assert!(approx_eq(score, 1.0));
    }

    #[test]
    fn cosine_is_zero_for_orthogonal_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("cosine should work");
        assert!(approx_eq(score, 0.0));
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        let score = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).expect("cosine should work");
        assert!(approx_eq(score, 0.0));
    }

    #[test]
    fn mismatched_dimensions_fail_fast() {
        let err = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0]).expect_err("must fail");
        assert!(matches!(
            err,
            ApiError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn euclidean_distance_matches_pythagoras() {
        let distance = euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]).expect("distance");
        assert!(approx_eq(distance, 5.0));
    }

    #[test]
    fn sort_keeps_ties_in_input_order() {
        let mut scores = vec![(0, 0.5), (1, 0.9), (2, 0.5), (3, 0.1)];
        sort_descending(&mut scores);

        let order: Vec<usize> = scores.iter().map(|(idx, _)| *idx).collect();
        assert_eq!(order, vec![1, 0, 2, 3]);
    }
}
