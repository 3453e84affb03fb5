//! Cached enrollment gallery.
//!
//! The gallery (per-user samples plus their prototypes) is loaded from the
//! backend on first use and kept until a forced refresh or an invalidation.
//! `refresh` is the only writer and holds the write lock for the whole
//! fetch-and-rebuild; readers receive an `Arc` snapshot and scan it without
//! holding any lock.

use crate::aggregator;
use crate::backend::EmbeddingBackend;
use crate::error::MatchError;
use crate::metric::Metric;
use crate::types::{Embedding, EmbeddingRecord, UserId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// All samples enrolled for one user, with their derived prototype.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub user_id: UserId,
    pub samples: Vec<Embedding>,
    pub prototype: Embedding,
}

/// Immutable snapshot of the enrollment and prototype sets.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    /// Users in first-seen backend order.
    entries: Vec<Enrollment>,
    dim: Option<usize>,
}

impl Gallery {
    /// Group backend records by user and derive one prototype per user.
    ///
    /// Fails with `ShapeMismatch` if any two samples differ in dimension.
    pub fn build(records: Vec<EmbeddingRecord>, metric: Metric) -> Result<Self, MatchError> {
        let mut dim: Option<usize> = None;
        let mut index: HashMap<UserId, usize> = HashMap::new();
        let mut grouped: Vec<(UserId, Vec<Embedding>)> = Vec::new();

        for record in records {
            let expected = *dim.get_or_insert(record.embedding.dim());
            if record.embedding.dim() != expected {
                return Err(MatchError::ShapeMismatch {
                    expected,
                    actual: record.embedding.dim(),
                });
            }

            match index.get(&record.user_id) {
                Some(&i) => grouped[i].1.push(record.embedding),
                None => {
                    index.insert(record.user_id.clone(), grouped.len());
                    grouped.push((record.user_id, vec![record.embedding]));
                }
            }
        }

        let entries = grouped
            .into_iter()
            .map(|(user_id, samples)| {
                let prototype = aggregator::prototype(&samples, metric)?;
                Ok(Enrollment {
                    user_id,
                    samples,
                    prototype,
                })
            })
            .collect::<Result<Vec<_>, MatchError>>()?;

        Ok(Self { entries, dim })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of enrolled users.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total number of stored samples across all users.
    pub fn sample_count(&self) -> usize {
        self.entries.iter().map(|e| e.samples.len()).sum()
    }

    /// Shared embedding dimension, `None` when nothing is enrolled.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn iter(&self) -> impl Iterator<Item = &Enrollment> {
        self.entries.iter()
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Enrollment> {
        self.entries.iter().find(|e| &e.user_id == user_id)
    }

    pub fn prototype(&self, user_id: &UserId) -> Option<&Embedding> {
        self.get(user_id).map(|e| &e.prototype)
    }
}

/// Lazily populated cache of the backend's enrollments.
pub struct EmbeddingStore<B> {
    backend: B,
    metric: Metric,
    cache: RwLock<Option<Arc<Gallery>>>,
}

impl<B: EmbeddingBackend> EmbeddingStore<B> {
    /// Prototypes are built for `metric`; the resolver using this store
    /// compares under the same metric.
    pub fn new(backend: B, metric: Metric) -> Self {
        Self {
            backend,
            metric,
            cache: RwLock::new(None),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Return the cached gallery, loading it from the backend on first use or
    /// when `force` is set. A failed load leaves the previous snapshot in place.
    pub fn refresh(&self, force: bool) -> Result<Arc<Gallery>, MatchError> {
        if !force {
            if let Some(gallery) = self.cached() {
                tracing::trace!("gallery cache hit");
                return Ok(gallery);
            }
        }

        let mut slot = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have loaded it while we waited for the lock.
        if !force {
            if let Some(gallery) = slot.as_ref() {
                return Ok(Arc::clone(gallery));
            }
        }

        let records = self.backend.list_embeddings()?;
        let gallery = Arc::new(Gallery::build(records, self.metric)?);
        tracing::info!(
            users = gallery.len(),
            samples = gallery.sample_count(),
            dim = ?gallery.dim(),
            metric = %self.metric,
            force,
            "gallery loaded"
        );

        *slot = Some(Arc::clone(&gallery));
        Ok(gallery)
    }

    /// Current snapshot without touching the backend.
    pub fn cached(&self) -> Option<Arc<Gallery>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the cached gallery; the next `refresh` reloads from the backend.
    pub fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("gallery cache invalidated");
    }
}
