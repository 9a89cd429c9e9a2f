//! Voice profile persistence (spec §4.8, component C8): a JSON sidecar
//! describing which sources contributed and which speaker model
//! embedded them, plus a flat binary file of their raw embeddings.
//! Rewrites are atomic (write to a temp path, rename over the original)
//! so a crash mid-write never leaves a profile the next run can only
//! half-trust.

use crate::{cosine_similarity, EMBEDDING_DIM};
use chaffee_common::IngestError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "voice_profile.json";
const EMBEDDINGS_FILE: &str = "voice_profile.bin";

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    source_ids: Vec<String>,
    dim: usize,
    updated_at: chrono::DateTime<chrono::Utc>,
    /// Identity of the speaker model that produced these embeddings
    /// (`VoiceConfig::model_id`). Missing on profiles persisted before
    /// this field existed, in which case it loads as `"unknown"` rather
    /// than failing.
    #[serde(default = "unknown_model_id")]
    model_id: String,
}

fn unknown_model_id() -> String {
    "unknown".to_string()
}

/// The primary speaker's reference embedding, built up from one or more
/// source recordings. `centroid` is the mean of all contributing
/// embeddings; similarity queries compare against it, not against any
/// individual recording.
#[derive(Debug, Clone)]
pub struct VoiceProfile {
    dir: PathBuf,
    source_ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    centroid: Vec<f32>,
    model_id: String,
}

fn recompute_centroid(embeddings: &[Vec<f32>]) -> Vec<f32> {
    if embeddings.is_empty() {
        return vec![0.0; EMBEDDING_DIM];
    }
    let mut sum = vec![0.0f32; embeddings[0].len()];
    for emb in embeddings {
        for (s, v) in sum.iter_mut().zip(emb.iter()) {
            *s += v;
        }
    }
    let n = embeddings.len() as f32;
    sum.iter().map(|v| v / n).collect()
}

impl VoiceProfile {
    /// True if a profile already exists on disk at `dir`.
    #[must_use]
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists() && dir.join(EMBEDDINGS_FILE).exists()
    }

    /// Loads a previously persisted profile.
    pub fn load(dir: &Path) -> Result<Self, IngestError> {
        let metadata_raw = std::fs::read(dir.join(METADATA_FILE)).map_err(IngestError::Io)?;
        let metadata: Metadata = serde_json::from_slice(&metadata_raw).map_err(|e| {
            IngestError::Config(format!("corrupt voice profile metadata: {e}"))
        })?;

        let embeddings_raw = std::fs::read(dir.join(EMBEDDINGS_FILE)).map_err(IngestError::Io)?;
        let embeddings = unflatten(&embeddings_raw, metadata.dim)?;

        if embeddings.len() != metadata.source_ids.len() {
            return Err(IngestError::Config(
                "voice profile metadata/embedding count mismatch".to_string(),
            ));
        }

        let centroid = recompute_centroid(&embeddings);
        Ok(Self {
            dir: dir.to_path_buf(),
            source_ids: metadata.source_ids,
            embeddings,
            centroid,
            model_id: metadata.model_id,
        })
    }

    /// Cosine similarity between `embedding` and the profile centroid.
    #[must_use]
    pub fn similarity(&self, embedding: &[f32]) -> f32 {
        cosine_similarity(&self.centroid, embedding)
    }

    #[must_use]
    pub fn source_ids(&self) -> &[String] {
        &self.source_ids
    }

    /// Identity of the speaker model this profile's embeddings were
    /// produced with. A caller embedding with a different model should
    /// rebuild rather than reuse this profile.
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Adds embeddings contributed by `source_id` and atomically
    /// rewrites both files. A source already present is not
    /// re-appended; callers that want to replace a source's
    /// contribution should use [`rebuild`](Self::rebuild).
    pub fn append(&mut self, embeddings: &[Vec<f32>], source_id: &str) -> Result<(), IngestError> {
        if embeddings.is_empty() {
            return Ok(());
        }
        for emb in embeddings {
            self.embeddings.push(emb.clone());
            self.source_ids.push(source_id.to_string());
        }
        self.centroid = recompute_centroid(&self.embeddings);
        self.persist()
    }

    /// Rebuilds a profile from scratch given every contributing
    /// source's embeddings, replacing whatever was on disk. `model_id`
    /// identifies the speaker model that produced `all_embeddings` and
    /// is persisted alongside them so a later run can tell whether the
    /// model has since changed.
    pub fn rebuild(dir: &Path, model_id: &str, all_embeddings: &[(String, Vec<f32>)]) -> Result<Self, IngestError> {
        let source_ids = all_embeddings.iter().map(|(id, _)| id.clone()).collect();
        let embeddings: Vec<Vec<f32>> = all_embeddings.iter().map(|(_, e)| e.clone()).collect();
        let centroid = recompute_centroid(&embeddings);
        let profile = Self {
            dir: dir.to_path_buf(),
            source_ids,
            embeddings,
            centroid,
            model_id: model_id.to_string(),
        };
        profile.persist()?;
        Ok(profile)
    }

    fn persist(&self) -> Result<(), IngestError> {
        std::fs::create_dir_all(&self.dir).map_err(IngestError::Io)?;

        let metadata = Metadata {
            source_ids: self.source_ids.clone(),
            dim: self.embeddings.first().map_or(EMBEDDING_DIM, Vec::len),
            updated_at: chrono::Utc::now(),
            model_id: self.model_id.clone(),
        };
        let metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| IngestError::Config(format!("failed to serialize voice profile: {e}")))?;
        let embeddings_flat = flatten(&self.embeddings);

        atomic_write(&self.dir.join(METADATA_FILE), &metadata_json)?;
        atomic_write(&self.dir.join(EMBEDDINGS_FILE), &embeddings_flat)?;
        Ok(())
    }
}

fn flatten(embeddings: &[Vec<f32>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embeddings.iter().map(Vec::len).sum::<usize>() * 4);
    for emb in embeddings {
        for v in emb {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

fn unflatten(raw: &[u8], dim: usize) -> Result<Vec<Vec<f32>>, IngestError> {
    if dim == 0 || raw.len() % (dim * 4) != 0 {
        return Err(IngestError::Config("malformed voice profile embedding file".to_string()));
    }
    let mut out = Vec::with_capacity(raw.len() / (dim * 4));
    for chunk in raw.chunks(dim * 4) {
        let row = chunk
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        out.push(row);
    }
    Ok(out)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), IngestError> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data).map_err(IngestError::Io)?;
    std::fs::rename(&tmp_path, path).map_err(IngestError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn exists_is_false_before_first_write() {
        let dir = tempdir().unwrap();
        assert!(!VoiceProfile::exists(dir.path()));
    }

    #[test]
    fn rebuild_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let all = vec![
            ("video1".to_string(), vec![1.0f32, 0.0, 0.0]),
            ("video2".to_string(), vec![0.0f32, 1.0, 0.0]),
        ];
        VoiceProfile::rebuild(dir.path(), "test-model", &all).unwrap();
        assert!(VoiceProfile::exists(dir.path()));

        let loaded = VoiceProfile::load(dir.path()).unwrap();
        assert_eq!(loaded.source_ids(), &["video1".to_string(), "video2".to_string()]);
        assert_eq!(loaded.model_id(), "test-model");
    }

    #[test]
    fn append_updates_centroid_and_persists() {
        let dir = tempdir().unwrap();
        let mut profile = VoiceProfile::rebuild(dir.path(), "test-model", &[("v1".to_string(), vec![1.0, 0.0])]).unwrap();
        profile.append(&[vec![1.0, 0.0]], "v2").unwrap();

        let reloaded = VoiceProfile::load(dir.path()).unwrap();
        assert_eq!(reloaded.source_ids().len(), 2);
        assert!((reloaded.similarity(&[1.0, 0.0]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similarity_against_orthogonal_embedding_is_near_zero() {
        let dir = tempdir().unwrap();
        let profile = VoiceProfile::rebuild(dir.path(), "test-model", &[("v1".to_string(), vec![1.0, 0.0])]).unwrap();
        assert!(profile.similarity(&[0.0, 1.0]).abs() < 1e-5);
    }
}
