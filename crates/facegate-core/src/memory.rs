//! In-process backend for tests and embedding the core without a database.

use crate::backend::{AccessLog, Attempt, EmbeddingBackend};
use crate::error::BackendError;
use crate::types::{Embedding, EmbeddingRecord, UserId, UserRecord};
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
struct Inner {
    users: Vec<UserRecord>,
    samples: Vec<EmbeddingRecord>,
    attempts: Vec<Attempt>,
}

/// Thread-safe in-memory store of users, samples and access attempts.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user whose id is the given name.
    pub fn create_user(&self, name: &str) -> UserId {
        self.add_user(name, name)
    }

    /// Register a user under an explicit id. Re-adding an id renames it.
    pub fn add_user(&self, id: impl Into<UserId>, name: &str) -> UserId {
        let id = id.into();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.users.iter().position(|u| u.id == id) {
            Some(i) => inner.users[i].name = name.to_string(),
            None => inner.users.push(UserRecord {
                id: id.clone(),
                name: name.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                last_access: None,
            }),
        }
        id
    }

    /// Remove a user and all of their samples. Returns false if unknown.
    pub fn remove_user(&self, id: &UserId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.users.len();
        inner.users.retain(|u| &u.id != id);
        inner.samples.retain(|s| &s.user_id != id);
        inner.users.len() != before
    }

    pub fn users(&self) -> Vec<UserRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .clone()
    }

    /// Attempts recorded so far, oldest first.
    pub fn attempts(&self) -> Vec<Attempt> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .attempts
            .clone()
    }
}

impl EmbeddingBackend for MemoryBackend {
    fn list_embeddings(&self) -> Result<Vec<EmbeddingRecord>, BackendError> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .clone())
    }

    fn get_user(&self, id: &UserId) -> Result<Option<UserRecord>, BackendError> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .iter()
            .find(|u| &u.id == id)
            .cloned())
    }

    fn add_embedding(&self, id: &UserId, embedding: &Embedding) -> Result<(), BackendError> {
        embedding.validate().map_err(BackendError::new)?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.users.iter().any(|u| &u.id == id) {
            return Err(BackendError::msg(format!("user {id} does not exist")));
        }
        inner.samples.push(EmbeddingRecord {
            user_id: id.clone(),
            embedding: embedding.clone(),
        });
        Ok(())
    }
}

impl AccessLog for MemoryBackend {
    fn record_attempt(&self, attempt: &Attempt) -> Result<(), BackendError> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .attempts
            .push(attempt.clone());
        Ok(())
    }

    fn touch_last_access(&self, id: &UserId) -> Result<(), BackendError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let user = inner
            .users
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| BackendError::msg(format!("user {id} does not exist")))?;
        user.last_access = Some(chrono::Utc::now().to_rfc3339());
        Ok(())
    }
}
