use crate::error::MatchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face embedding vector (128-dimensional for dlib, 512 for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "dlib_resnet_v1").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values) as f32
    }

    /// Reject empty vectors and non-finite components.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.values.is_empty() {
            return Err(MatchError::InvalidEmbedding("embedding is empty".into()));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(MatchError::InvalidEmbedding(
                "embedding contains non-finite values".into(),
            ));
        }
        Ok(())
    }

    /// Unit-length copy of this embedding. A zero vector is returned as is.
    pub fn normalized(&self) -> Embedding {
        Embedding {
            values: l2_normalize(&self.values),
            model_version: self.model_version.clone(),
        }
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Accumulated in f64 so tiny vectors do not underflow to zero and large
/// ones do not overflow to infinity.
pub(crate) fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

pub(crate) fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = l2_norm(values);
    if norm > 0.0 {
        values.iter().map(|&x| (f64::from(x) / norm) as f32).collect()
    } else {
        values.to_vec()
    }
}

/// Opaque identifier of an enrolled user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One stored sample as returned by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub user_id: UserId,
    pub embedding: Embedding,
}

/// An enrolled identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 time of the last granted access, if any.
    pub last_access: Option<String>,
}

/// Outcome of resolving a probe embedding against the enrolled gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchResult {
    Accepted { user_id: UserId, distance: f32 },
    /// `best_distance` is diagnostic only and must never drive access.
    Rejected { best_distance: f32 },
}

impl MatchResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Accepted { user_id, .. } => Some(user_id),
            Self::Rejected { .. } => None,
        }
    }

    /// Best distance observed, whether accepted or not.
    pub fn distance(&self) -> f32 {
        match self {
            Self::Accepted { distance, .. } => *distance,
            Self::Rejected { best_distance } => *best_distance,
        }
    }
}
