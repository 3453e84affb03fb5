//! Embedding files produced by an external detector/encoder.
//!
//! A file holds either a JSON array of floats, an object
//! `{"values": [...], "model_version": "..."}`, or `null` when the detector
//! found no face in the frame.

use anyhow::{bail, Context, Result};
use facegate_core::{Embedded, Embedding, FaceEmbedder, MatchError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Bare(Vec<f32>),
    Full(Embedding),
}

/// Read one embedding file. `Ok(None)` means "no face in this frame".
pub fn load(path: &Path) -> Result<Option<Embedding>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse(text: &str) -> Result<Option<Embedding>> {
    let file: Option<EmbeddingFile> = serde_json::from_str(text)?;
    Ok(file.map(|f| match f {
        EmbeddingFile::Bare(values) => Embedding::new(values),
        EmbeddingFile::Full(embedding) => embedding,
    }))
}

/// Check a batch of enrollment samples before any of them is stored.
///
/// Every file must hold a face, a valid embedding, and the same dimension as
/// the first one; otherwise nothing is enrolled.
pub fn collect_samples(loaded: Vec<(PathBuf, Option<Embedding>)>) -> Result<Vec<Embedding>> {
    let mut samples: Vec<Embedding> = Vec::with_capacity(loaded.len());
    for (path, embedding) in loaded {
        let Some(embedding) = embedding else {
            bail!("{}: {}", path.display(), MatchError::NoFaceDetected);
        };
        embedding
            .validate()
            .with_context(|| path.display().to_string())?;
        if let Some(first) = samples.first() {
            if first.dim() != embedding.dim() {
                let err = MatchError::ShapeMismatch {
                    expected: first.dim(),
                    actual: embedding.dim(),
                };
                bail!("{}: {err}", path.display());
            }
        }
        samples.push(embedding);
    }
    Ok(samples)
}

/// Embedder over frames whose embeddings were computed ahead of time.
pub struct Precomputed;

impl FaceEmbedder for Precomputed {
    type Frame = Option<Embedding>;

    fn embed(&mut self, frame: &Option<Embedding>) -> Embedded {
        match frame {
            None => Embedded::NoFace,
            Some(e) if e.values.is_empty() => Embedded::Unusable,
            Some(e) => Embedded::Face(e.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        assert_eq!(parse("[0.5, -1.0]").unwrap().unwrap().values, vec![0.5, -1.0]);

        let full = parse(r#"{"values": [1.0], "model_version": "dlib_resnet_v1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(full.model_version.as_deref(), Some("dlib_resnet_v1"));

        assert!(parse("null").unwrap().is_none());
        assert!(parse(r#"{"vals": [1.0]}"#).is_err());
    }

    fn sample(name: &str, values: Option<&[f32]>) -> (PathBuf, Option<Embedding>) {
        (PathBuf::from(name), values.map(|v| Embedding::new(v.to_vec())))
    }

    #[test]
    fn test_collect_samples_all_or_nothing() {
        let ok = collect_samples(vec![
            sample("a.json", Some(&[1.0, 0.0])),
            sample("b.json", Some(&[0.0, 1.0])),
        ])
        .unwrap();
        assert_eq!(ok.len(), 2);

        let err = collect_samples(vec![
            sample("a.json", Some(&[1.0, 0.0])),
            sample("b.json", None),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("b.json"));

        assert!(collect_samples(vec![
            sample("a.json", Some(&[1.0, 0.0])),
            sample("b.json", Some(&[1.0, 0.0, 0.0])),
        ])
        .is_err());

        assert!(collect_samples(vec![sample("a.json", Some(&[f32::NAN]))]).is_err());
        assert!(collect_samples(vec![sample("a.json", Some(&[]))]).is_err());
    }

    #[test]
    fn test_precomputed_embedder() {
        let mut embedder = Precomputed;
        assert_eq!(embedder.embed(&None), Embedded::NoFace);
        assert_eq!(embedder.embed(&Some(Embedding::new(vec![]))), Embedded::Unusable);
        assert!(matches!(
            embedder.embed(&Some(Embedding::new(vec![1.0]))),
            Embedded::Face(_)
        ));
    }
}
