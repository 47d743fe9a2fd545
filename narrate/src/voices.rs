// Voice store: voice id -> embedding, loaded once at startup

use crate::error::{NarrateError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Style embedding for one voice
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceEmbedding {
    pub id: String,
    pub data: Vec<f32>,
}

impl VoiceEmbedding {
    /// A voice the engine resolves by id alone
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Vec::new(),
        }
    }
}

/// All voices available to the engine
#[derive(Debug, Clone, Default)]
pub struct VoiceStore {
    voices: BTreeMap<String, Arc<VoiceEmbedding>>,
}

impl VoiceStore {
    /// Load a JSON resource of the form `{"af_heart": [0.1, ...], ...}`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| NarrateError::VoiceStore {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|message| NarrateError::VoiceStore {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_json(content: &str) -> std::result::Result<Self, String> {
        let raw: BTreeMap<String, Vec<f32>> =
            serde_json::from_str(content).map_err(|e| e.to_string())?;
        Ok(Self::from_embeddings(raw))
    }

    pub fn from_embeddings(embeddings: impl IntoIterator<Item = (String, Vec<f32>)>) -> Self {
        let voices = embeddings
            .into_iter()
            .map(|(id, data)| {
                let voice = Arc::new(VoiceEmbedding {
                    id: id.clone(),
                    data,
                });
                (id, voice)
            })
            .collect();
        Self { voices }
    }

    /// Store holding only `ids`, with empty embeddings
    pub fn named(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::from_embeddings(ids.into_iter().map(|id| (id.into(), Vec::new())))
    }

    pub fn get(&self, id: &str) -> Result<Arc<VoiceEmbedding>> {
        self.voices
            .get(id)
            .cloned()
            .ok_or_else(|| NarrateError::UnknownVoice {
                voice: id.to_string(),
                available: self.ids().join(", "),
            })
    }

    /// Voice ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
