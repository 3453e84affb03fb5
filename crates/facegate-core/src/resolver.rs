//! Identity resolution: which enrolled user, if any, a probe embedding belongs to.

use crate::backend::EmbeddingBackend;
use crate::error::MatchError;
use crate::metric::Metric;
use crate::store::{EmbeddingStore, Enrollment};
use crate::types::{Embedding, MatchResult, UserId};
use serde::{Deserialize, Serialize};

/// Metric and acceptance threshold, fixed for the lifetime of a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub metric: Metric,
    /// A match is accepted only when its distance is strictly below this.
    pub threshold: f32,
}

impl ResolverConfig {
    pub fn new(metric: Metric, threshold: f32) -> Result<Self, MatchError> {
        validate_threshold(threshold)?;
        Ok(Self { metric, threshold })
    }

    /// Config using the metric's default threshold.
    pub fn for_metric(metric: Metric) -> Self {
        Self {
            metric,
            threshold: metric.default_threshold(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::for_metric(Metric::default())
    }
}

fn validate_threshold(threshold: f32) -> Result<(), MatchError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(MatchError::InvalidThreshold(threshold))
    }
}

/// Resolves probe embeddings against the enrolled gallery.
///
/// Each user is scored by the smaller of the distance to their prototype and
/// the distance to their closest raw sample, so one good sample is not
/// diluted by averaging with poorer ones.
pub struct IdentityResolver<B> {
    store: EmbeddingStore<B>,
    threshold: f32,
}

impl<B: EmbeddingBackend> IdentityResolver<B> {
    /// The resolver compares under the store's metric.
    pub fn new(store: EmbeddingStore<B>, threshold: f32) -> Result<Self, MatchError> {
        validate_threshold(threshold)?;
        Ok(Self { store, threshold })
    }

    pub fn with_config(backend: B, config: ResolverConfig) -> Result<Self, MatchError> {
        Self::new(EmbeddingStore::new(backend, config.metric), config.threshold)
    }

    pub fn metric(&self) -> Metric {
        self.store.metric()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &EmbeddingStore<B> {
        &self.store
    }

    /// Find the closest enrolled user.
    ///
    /// Returns `EmptyEnrollment` when nobody is enrolled and `ShapeMismatch`
    /// when the probe's dimension differs from the gallery's; neither yields a
    /// partial result. Ties keep the first user in gallery order.
    pub fn resolve(&self, query: &Embedding) -> Result<MatchResult, MatchError> {
        let gallery = self.store.refresh(false)?;
        if gallery.is_empty() {
            tracing::info!("resolve: no users enrolled");
            return Err(MatchError::EmptyEnrollment);
        }
        if let Some(dim) = gallery.dim() {
            if query.dim() != dim {
                return Err(MatchError::ShapeMismatch {
                    expected: dim,
                    actual: query.dim(),
                });
            }
        }
        query.validate()?;

        let metric = self.store.metric();
        let mut best: Option<(&UserId, f32)> = None;

        // Every user is scored; no early exit on a perfect match.
        for enrollment in gallery.iter() {
            let score = user_score(metric, query, enrollment)?;
            tracing::debug!(user = %enrollment.user_id, score, "resolve: candidate");
            if best.map_or(true, |(_, best_score)| score < best_score) {
                best = Some((&enrollment.user_id, score));
            }
        }

        let (user_id, distance) = best.ok_or(MatchError::EmptyEnrollment)?;

        if distance < self.threshold {
            tracing::info!(user = %user_id, distance, threshold = self.threshold, %metric, "resolve: accepted");
            Ok(MatchResult::Accepted {
                user_id: user_id.clone(),
                distance,
            })
        } else {
            tracing::info!(best_distance = distance, threshold = self.threshold, %metric, "resolve: rejected");
            Ok(MatchResult::Rejected {
                best_distance: distance,
            })
        }
    }

    /// Store a new sample for an existing user and reload the gallery.
    ///
    /// A sample that is empty, non-finite or whose dimension differs from the
    /// enrolled gallery is refused before it reaches the backend. If the reload
    /// after a successful write fails, the cache is dropped so the next call
    /// reloads instead of serving the pre-enrollment gallery.
    pub fn enroll(&self, user_id: &UserId, embedding: &Embedding) -> Result<(), MatchError> {
        embedding.validate()?;
        let gallery = self.store.refresh(false)?;
        if let Some(dim) = gallery.dim() {
            if embedding.dim() != dim {
                return Err(MatchError::ShapeMismatch {
                    expected: dim,
                    actual: embedding.dim(),
                });
            }
        }

        if self.store.backend().get_user(user_id)?.is_none() {
            return Err(MatchError::UnknownUser(user_id.clone()));
        }

        self.store.backend().add_embedding(user_id, embedding)?;
        let gallery = match self.store.refresh(true) {
            Ok(gallery) => gallery,
            Err(err) => {
                self.store.invalidate();
                tracing::warn!(user = %user_id, error = %err, "enroll: reload failed, cache dropped");
                return Err(err);
            }
        };

        tracing::info!(
            user = %user_id,
            samples = gallery.get(user_id).map_or(0, |e| e.samples.len()),
            "enrolled sample"
        );
        Ok(())
    }
}

/// `min(d(query, prototype), min over samples d(query, sample))`.
fn user_score(metric: Metric, query: &Embedding, enrollment: &Enrollment) -> Result<f32, MatchError> {
    let mut score = metric.distance(query, &enrollment.prototype)?;
    for sample in &enrollment.samples {
        score = score.min(metric.distance(query, sample)?);
    }
    Ok(score)
}
