//! Access gate: embed captured frames, resolve them, and keep an audit trail.

use crate::backend::{AccessLog, Attempt, EmbeddingBackend};
use crate::error::MatchError;
use crate::resolver::IdentityResolver;
use crate::types::{Embedding, MatchResult};

/// What the face detector + encoder produced for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Embedded {
    Face(Embedding),
    /// The detector found no face.
    NoFace,
    /// A face was found but the encoder could not produce an embedding.
    Unusable,
}

/// Upstream detector/encoder pair, treated as a black box.
pub trait FaceEmbedder {
    type Frame: ?Sized;

    fn embed(&mut self, frame: &Self::Frame) -> Embedded;
}

/// Decides access for a capture sequence and records every attempt.
pub struct AccessGate<B> {
    resolver: IdentityResolver<B>,
}

impl<B: EmbeddingBackend + AccessLog> AccessGate<B> {
    pub fn new(resolver: IdentityResolver<B>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &IdentityResolver<B> {
        &self.resolver
    }

    /// Embed each frame, resolve every usable embedding and keep the closest
    /// result across frames.
    ///
    /// On accept the user's last access time is updated. Every outcome,
    /// including capture failures, is written to the access log. Errors from
    /// writing the log after a decision are returned to the caller.
    pub fn authenticate<'f, E>(
        &self,
        embedder: &mut E,
        frames: impl IntoIterator<Item = &'f E::Frame>,
    ) -> Result<MatchResult, MatchError>
    where
        E: FaceEmbedder,
        E::Frame: 'f,
    {
        let mut faces_seen = 0usize;
        let mut frames_seen = 0usize;
        let mut best: Option<MatchResult> = None;

        for frame in frames {
            frames_seen += 1;
            let embedding = match embedder.embed(frame) {
                Embedded::Face(embedding) => {
                    faces_seen += 1;
                    embedding
                }
                Embedded::NoFace => continue,
                Embedded::Unusable => {
                    faces_seen += 1;
                    continue;
                }
            };

            let result = match self.resolver.resolve(&embedding) {
                Ok(result) => result,
                Err(err) => return Err(self.fail(err)),
            };
            if best.as_ref().map_or(true, |b| result.distance() < b.distance()) {
                best = Some(result);
            }
        }

        tracing::debug!(frames = frames_seen, faces = faces_seen, "authenticate: frames embedded");

        let Some(result) = best else {
            let err = if faces_seen == 0 {
                MatchError::NoFaceDetected
            } else {
                MatchError::EmbeddingUnavailable
            };
            return Err(self.fail(err));
        };

        let log = self.resolver.store().backend();
        match &result {
            MatchResult::Accepted { user_id, distance } => {
                log.record_attempt(&Attempt {
                    user_id: Some(user_id.clone()),
                    success: true,
                    distance: Some(*distance),
                    info: Some("access granted".into()),
                })?;
                log.touch_last_access(user_id)?;
            }
            MatchResult::Rejected { best_distance } => {
                tracing::warn!(best_distance, "authenticate: unrecognized face");
                log.record_attempt(&Attempt {
                    user_id: None,
                    success: false,
                    distance: Some(*best_distance),
                    info: Some("unrecognized face".into()),
                })?;
            }
        }

        Ok(result)
    }

    /// Log a failed attempt and hand the error back. A failure to write the
    /// log entry is only warned about so the original error is not masked.
    fn fail(&self, err: MatchError) -> MatchError {
        let attempt = Attempt {
            user_id: None,
            success: false,
            distance: None,
            info: Some(err.to_string()),
        };
        if let Err(log_err) = self.resolver.store().backend().record_attempt(&attempt) {
            tracing::warn!(error = %log_err, "failed to record access attempt");
        }
        tracing::info!(error = %err, "authenticate: failed");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::metric::Metric;
    use crate::resolver::ResolverConfig;

    /// Frames are pre-baked detector/encoder outputs.
    struct Scripted;

    impl FaceEmbedder for Scripted {
        type Frame = Embedded;

        fn embed(&mut self, frame: &Embedded) -> Embedded {
            frame.clone()
        }
    }

    fn face(values: &[f32]) -> Embedded {
        Embedded::Face(Embedding::new(values.to_vec()))
    }

    fn gate_with_alice() -> AccessGate<MemoryBackend> {
        let backend = MemoryBackend::new();
        let alice = backend.create_user("alice");
        backend
            .add_embedding(&alice, &Embedding::new(vec![1.0, 0.0, 0.0]))
            .unwrap();
        let config = ResolverConfig::new(Metric::Cosine, 0.45).unwrap();
        AccessGate::new(IdentityResolver::with_config(backend, config).unwrap())
    }

    #[test]
    fn test_accept_records_and_touches_user() {
        let gate = gate_with_alice();
        let frames = [Embedded::NoFace, face(&[0.0, 1.0, 0.0]), face(&[1.0, 0.01, 0.0])];
        let result = gate.authenticate(&mut Scripted, &frames).unwrap();
        assert_eq!(result.user_id().map(|u| u.as_str()), Some("alice"));

        let backend = gate.resolver().store().backend();
        let attempts = backend.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
        assert_eq!(attempts[0].user_id.as_ref().map(|u| u.as_str()), Some("alice"));
        let user = backend.get_user(&"alice".into()).unwrap().unwrap();
        assert!(user.last_access.is_some());
    }

    #[test]
    fn test_reject_records_unknown_attempt() {
        let gate = gate_with_alice();
        let result = gate
            .authenticate(&mut Scripted, &[face(&[-1.0, 0.0, 0.0])])
            .unwrap();
        assert!(!result.is_accepted());

        let attempts = gate.resolver().store().backend().attempts();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert!(attempts[0].user_id.is_none());
        assert!((attempts[0].distance.unwrap() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_no_face_vs_unusable() {
        let gate = gate_with_alice();
        assert!(matches!(
            gate.authenticate(&mut Scripted, &[Embedded::NoFace, Embedded::NoFace]),
            Err(MatchError::NoFaceDetected)
        ));
        assert!(matches!(
            gate.authenticate(&mut Scripted, &[Embedded::NoFace, Embedded::Unusable]),
            Err(MatchError::EmbeddingUnavailable)
        ));
        assert!(matches!(
            gate.authenticate(&mut Scripted, &[] as &[Embedded]),
            Err(MatchError::NoFaceDetected)
        ));
        assert_eq!(gate.resolver().store().backend().attempts().len(), 3);
    }

    #[test]
    fn test_empty_enrollment_is_distinct() {
        let gate = AccessGate::new(
            IdentityResolver::with_config(MemoryBackend::new(), ResolverConfig::default()).unwrap(),
        );
        let err = gate
            .authenticate(&mut Scripted, &[face(&[1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, MatchError::EmptyEnrollment));
        assert!(!err.is_capture_failure());
    }

    #[test]
    fn test_shape_mismatch_aborts_sequence() {
        let gate = gate_with_alice();
        let frames = [face(&[1.0, 0.0, 0.0]), face(&[1.0, 0.0])];
        assert!(matches!(
            gate.authenticate(&mut Scripted, &frames),
            Err(MatchError::ShapeMismatch { .. })
        ));
    }
}
