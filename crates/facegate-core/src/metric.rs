//! Distance metrics over face embeddings.
//!
//! Both metrics return a dissimilarity: smaller means closer, zero means the
//! same identity direction (cosine) or the same point (Euclidean).

use crate::error::MatchError;
use crate::types::{l2_norm, Embedding};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance function used to compare embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// `1 - cos(a, b)`, in [0, 2].
    #[default]
    Cosine,
    /// `||a - b||`.
    Euclidean,
}

impl Metric {
    /// Distance between two embeddings of equal dimension.
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> Result<f32, MatchError> {
        check_dims(a, b)?;
        Ok(match self {
            Metric::Cosine => cosine_distance(&a.values, &b.values),
            Metric::Euclidean => euclidean_distance(&a.values, &b.values),
        })
    }

    /// Whether prototypes compared under this metric live on the unit sphere.
    pub fn normalizes(&self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Threshold used when none is configured. The two metrics have different
    /// natural ranges, so the values are not interchangeable.
    pub fn default_threshold(&self) -> f32 {
        match self {
            Metric::Cosine => 0.45,
            Metric::Euclidean => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" => Ok(Metric::Euclidean),
            _ => Err(MatchError::UnknownMetric(s.to_string())),
        }
    }
}

fn check_dims(a: &Embedding, b: &Embedding) -> Result<(), MatchError> {
    if a.dim() != b.dim() {
        return Err(MatchError::ShapeMismatch {
            expected: a.dim(),
            actual: b.dim(),
        });
    }
    Ok(())
}

/// Zero-norm inputs are left unscaled, so their dot product is 0 and the
/// distance is exactly 1. Accumulation is in f64 (see `l2_norm`).
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    let scale_a = if norm_a > 0.0 { 1.0 / norm_a } else { 1.0 };
    let scale_b = if norm_b > 0.0 { 1.0 / norm_b } else { 1.0 };

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (f64::from(x) * scale_a) * (f64::from(y) * scale_b))
        .sum();

    (1.0 - dot).clamp(0.0, 2.0) as f32
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (f64::from(x) - f64::from(y)).powi(2))
        .sum::<f64>()
        .sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn random_embedding(rng: &mut impl Rng, dim: usize) -> Embedding {
        Embedding::new((0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
    }

    #[test]
    fn test_cosine_identical() {
        let a = emb(&[1.0, 2.0, 3.0]);
        assert!(Metric::Cosine.distance(&a, &a).unwrap() < 1e-6);
    }

    #[test]
    fn test_cosine_proportional_is_zero() {
        let a = emb(&[1.0, 2.0, 3.0]);
        let b = emb(&[2.0, 4.0, 6.0]);
        assert!(Metric::Cosine.distance(&a, &b).unwrap() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!((Metric::Cosine.distance(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((Metric::Cosine.distance(&a, &b).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let zero = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(Metric::Cosine.distance(&zero, &b).unwrap(), 1.0);
        assert_eq!(Metric::Cosine.distance(&zero, &zero).unwrap(), 1.0);
    }

    #[test]
    fn test_euclidean_known_value() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((Metric::Euclidean.distance(&a, &b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_identical_is_zero() {
        let a = emb(&[0.3, -1.2, 7.5]);
        assert_eq!(Metric::Euclidean.distance(&a, &a).unwrap(), 0.0);
        let zero = emb(&[0.0, 0.0]);
        assert_eq!(Metric::Euclidean.distance(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_self_distance_extreme_magnitudes() {
        for value in [1e-23f32, 1e20] {
            let a = emb(&[value; 4]);
            assert!(Metric::Cosine.distance(&a, &a).unwrap() < 1e-6, "{value}");
            assert_eq!(Metric::Euclidean.distance(&a, &a).unwrap(), 0.0);
        }

        let tiny = emb(&[1e-23, 0.0]);
        let other = emb(&[0.0, 1e-23]);
        assert!((Metric::Cosine.distance(&tiny, &other).unwrap() - 1.0).abs() < 1e-6);

        let big = emb(&[3e20, 0.0]);
        let origin = emb(&[0.0, 4e20]);
        let d = Metric::Euclidean.distance(&big, &origin).unwrap();
        assert!((d / 5e20 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = emb(&[1.0, 0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        for metric in [Metric::Cosine, Metric::Euclidean] {
            match metric.distance(&a, &b) {
                Err(MatchError::ShapeMismatch { expected, actual }) => {
                    assert_eq!(expected, 3);
                    assert_eq!(actual, 2);
                }
                other => panic!("expected ShapeMismatch, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_symmetry_and_self_distance_random() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let a = random_embedding(&mut rng, 128);
            let b = random_embedding(&mut rng, 128);
            for metric in [Metric::Cosine, Metric::Euclidean] {
                let ab = metric.distance(&a, &b).unwrap();
                let ba = metric.distance(&b, &a).unwrap();
                assert!((ab - ba).abs() < 1e-5, "{metric}: {ab} vs {ba}");
                assert!(ab >= 0.0);
                assert!(metric.distance(&a, &a).unwrap() < 1e-5);
            }
        }
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!(" Euclidean ".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!(matches!(
            "manhattan".parse::<Metric>(),
            Err(MatchError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_default_thresholds_differ() {
        assert_eq!(Metric::Cosine.default_threshold(), 0.45);
        assert_eq!(Metric::Euclidean.default_threshold(), 0.6);
    }
}
