// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the OCR engine
//!
//! Construction errors (`ArtifactMissing`, `ArtifactInvalid`, `InvalidOptions`)
//! mean no engine is produced. Per-call errors (`InvalidImage`,
//! `InferenceFailure`, `Cancelled`) abort only that call.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the OCR engine
#[derive(Debug, Error)]
pub enum OcrError {
    /// A required artifact file is absent
    #[error("Required artifact not found: {path:?}")]
    ArtifactMissing { path: PathBuf },

    /// An artifact exists but is malformed (config, vocabulary, graph or shape mismatch)
    #[error("Invalid artifact {path:?}: {reason}")]
    ArtifactInvalid { path: PathBuf, reason: String },

    /// The input could not be decoded as an image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Graph execution failed mid-call
    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    /// A decoded id fell outside the vocabulary.
    ///
    /// Recovered locally by the tokenizer (the id is skipped); never returned
    /// from a public operation.
    #[error("Token id {id} is outside the vocabulary (size {vocab_size})")]
    OutOfRangeToken { id: i64, vocab_size: usize },

    /// The caller cancelled the call between decode iterations
    #[error("Recognition cancelled after {steps} decode steps")]
    Cancelled { steps: usize },

    /// Runtime options could not be parsed or are out of range
    #[error("Invalid engine options: {0}")]
    InvalidOptions(String),
}

impl OcrError {
    pub(crate) fn invalid_artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArtifactInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inference(context: &str, err: impl std::fmt::Display) -> Self {
        Self::InferenceFailure(format!("{}: {}", context, err))
    }

    /// Whether this error was raised while constructing the engine
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::ArtifactMissing { .. } | Self::ArtifactInvalid { .. } | Self::InvalidOptions(_)
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, OcrError>;
