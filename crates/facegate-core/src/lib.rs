//! facegate-core — Face embedding matching engine.
//!
//! Compares probe embeddings against enrolled users under a cosine or
//! Euclidean metric, using per-user prototypes plus raw samples, and gates
//! access on a configurable distance threshold.

pub mod aggregator;
pub mod backend;
pub mod error;
pub mod gate;
pub mod memory;
pub mod metric;
pub mod resolver;
pub mod store;
pub mod types;

pub use backend::{AccessLog, Attempt, EmbeddingBackend};
pub use error::{BackendError, MatchError};
pub use gate::{AccessGate, Embedded, FaceEmbedder};
pub use memory::MemoryBackend;
pub use metric::Metric;
pub use resolver::{IdentityResolver, ResolverConfig};
pub use store::{EmbeddingStore, Enrollment, Gallery};
pub use types::{Embedding, EmbeddingRecord, MatchResult, UserId, UserRecord};
