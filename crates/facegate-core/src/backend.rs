//! Collaborator traits the core is wired to at construction time.

use crate::error::BackendError;
use crate::types::{Embedding, EmbeddingRecord, UserId, UserRecord};
use serde::{Deserialize, Serialize};

/// Persistence for enrolled users and their embedding samples.
pub trait EmbeddingBackend {
    /// Every stored sample, in a stable order (insertion order for the
    /// bundled backends).
    fn list_embeddings(&self) -> Result<Vec<EmbeddingRecord>, BackendError>;

    fn get_user(&self, id: &UserId) -> Result<Option<UserRecord>, BackendError>;

    /// Append a sample for an existing user.
    fn add_embedding(&self, id: &UserId, embedding: &Embedding) -> Result<(), BackendError>;
}

/// One access attempt as reported by the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// `None` for an unrecognized face.
    pub user_id: Option<UserId>,
    pub success: bool,
    pub distance: Option<f32>,
    pub info: Option<String>,
}

/// Audit trail of access attempts.
pub trait AccessLog {
    fn record_attempt(&self, attempt: &Attempt) -> Result<(), BackendError>;

    /// Stamp the user's last granted access with the current time.
    fn touch_last_access(&self, id: &UserId) -> Result<(), BackendError>;
}
