//! Enrollment prototypes: one representative vector per user.

use crate::error::MatchError;
use crate::metric::Metric;
use crate::types::{l2_normalize, Embedding};
use ndarray::{Array2, Axis};

/// Element-wise mean of `samples`, renormalized to unit length when the
/// metric compares directions (cosine). A zero mean stays zero.
///
/// The prototype keeps the samples' model version only when all of them agree.
pub fn prototype(samples: &[Embedding], metric: Metric) -> Result<Embedding, MatchError> {
    let first = samples.first().ok_or(MatchError::NoSamples)?;
    let dim = first.dim();

    let mut flat = Vec::with_capacity(samples.len() * dim);
    for sample in samples {
        if sample.dim() != dim {
            return Err(MatchError::ShapeMismatch {
                expected: dim,
                actual: sample.dim(),
            });
        }
        flat.extend_from_slice(&sample.values);
    }

    let matrix = Array2::from_shape_vec((samples.len(), dim), flat).map_err(|_| {
        MatchError::ShapeMismatch {
            expected: dim,
            actual: 0,
        }
    })?;
    let mean: Vec<f32> = matrix
        .mean_axis(Axis(0))
        .map(|m| m.to_vec())
        .unwrap_or_else(|| vec![0.0; dim]);

    let values = if metric.normalizes() {
        l2_normalize(&mean)
    } else {
        mean
    };

    let model_version = first
        .model_version
        .as_ref()
        .filter(|v| samples.iter().all(|s| s.model_version.as_ref() == Some(*v)))
        .cloned();

    Ok(Embedding {
        values,
        model_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_duplicates_yield_the_sample() {
        let e = emb(&[0.6, 0.8]);
        let p = prototype(&[e.clone(), e.clone()], Metric::Cosine).unwrap();
        assert!((p.values[0] - 0.6).abs() < 1e-6);
        assert!((p.values[1] - 0.8).abs() < 1e-6);

        let raw = emb(&[2.0, -3.0, 5.0]);
        let p = prototype(&[raw.clone(), raw.clone()], Metric::Euclidean).unwrap();
        assert_eq!(p.values, raw.values);
    }

    #[test]
    fn test_euclidean_keeps_raw_mean() {
        let p = prototype(&[emb(&[1.0, 0.0]), emb(&[3.0, 2.0])], Metric::Euclidean).unwrap();
        assert!((p.values[0] - 2.0).abs() < 1e-6);
        assert!((p.values[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_renormalizes_mean() {
        let p = prototype(&[emb(&[1.0, 0.0]), emb(&[0.0, 1.0])], Metric::Cosine).unwrap();
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((p.values[0] - expected).abs() < 1e-6);
        assert!((p.values[1] - expected).abs() < 1e-6);
        assert!((p.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_mean_stays_zero() {
        let p = prototype(&[emb(&[1.0, 0.0]), emb(&[-1.0, 0.0])], Metric::Cosine).unwrap();
        assert_eq!(p.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_empty_samples() {
        assert!(matches!(
            prototype(&[], Metric::Cosine),
            Err(MatchError::NoSamples)
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let result = prototype(&[emb(&[1.0, 0.0]), emb(&[1.0, 0.0, 0.0])], Metric::Euclidean);
        assert!(matches!(
            result,
            Err(MatchError::ShapeMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_model_version_only_when_uniform() {
        let a = emb(&[1.0]).with_model_version("w600k_r50");
        let b = emb(&[2.0]).with_model_version("w600k_r50");
        let c = emb(&[3.0]);
        assert_eq!(
            prototype(&[a.clone(), b], Metric::Euclidean).unwrap().model_version.as_deref(),
            Some("w600k_r50")
        );
        assert!(prototype(&[a, c], Metric::Euclidean).unwrap().model_version.is_none());
    }
}
