// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Artifact configuration (`config.json`)

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{OcrError, Result};

/// Image preprocessing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Target size as `[width, height]`
    pub image_size: [u32; 2],
    /// Multiplier applied to raw 8-bit pixel values (typically 1/255)
    pub rescale_factor: f64,
    /// Per-channel mean (R, G, B)
    pub image_mean: [f32; 3],
    /// Per-channel standard deviation (R, G, B)
    pub image_std: [f32; 3],
}

impl PreprocessorConfig {
    pub fn width(&self) -> u32 {
        self.image_size[0]
    }

    pub fn height(&self) -> u32 {
        self.image_size[1]
    }
}

/// Generation parameters for the decode loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub decoder_start_token_id: i64,
    pub eos_token_id: i64,
    /// Upper bound on decode iterations; must be positive
    pub max_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialToken {
    pub id: usize,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub pad: SpecialToken,
    pub unk: SpecialToken,
    pub cls: SpecialToken,
    pub sep: SpecialToken,
    pub mask: SpecialToken,
}

impl SpecialTokens {
    /// All special tokens in a fixed order (pad, unk, cls, sep, mask)
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SpecialToken)> {
        [
            ("pad", &self.pad),
            ("unk", &self.unk),
            ("cls", &self.cls),
            ("sep", &self.sep),
            ("mask", &self.mask),
        ]
        .into_iter()
    }
}

/// Complete artifact configuration, loaded once and never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub preprocessor: PreprocessorConfig,
    #[serde(rename = "model")]
    pub generation: GenerationConfig,
    pub special_tokens: SpecialTokens,
}

impl ModelConfig {
    /// Load and validate `config.json`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OcrError::ArtifactMissing {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| OcrError::invalid_artifact(path, format!("unreadable: {}", e)))?;
        let config = Self::from_json(&content)
            .map_err(|reason| OcrError::invalid_artifact(path, reason))?;

        debug!(
            "Loaded model config: image_size={:?}, max_length={}",
            config.preprocessor.image_size, config.generation.max_length
        );
        Ok(config)
    }

    /// Parse and validate a JSON document
    ///
    /// Errors are returned as a plain reason so the caller can attach the path.
    pub fn from_json(content: &str) -> std::result::Result<Self, String> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| format!("malformed JSON: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> std::result::Result<(), String> {
        let pre = &self.preprocessor;
        if pre.width() == 0 || pre.height() == 0 {
            return Err(format!("image_size must be non-zero, got {:?}", pre.image_size));
        }
        if !pre.rescale_factor.is_finite() {
            return Err("rescale_factor must be finite".to_string());
        }
        if pre.image_std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(format!("image_std must be finite and non-zero, got {:?}", pre.image_std));
        }
        if pre.image_mean.iter().any(|m| !m.is_finite()) {
            return Err(format!("image_mean must be finite, got {:?}", pre.image_mean));
        }
        if self.generation.max_length == 0 {
            return Err("max_length must be a positive integer".to_string());
        }
        if self.generation.decoder_start_token_id < 0 || self.generation.eos_token_id < 0 {
            return Err("token ids must be non-negative".to_string());
        }
        Ok(())
    }
}
