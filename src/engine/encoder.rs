// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision encoder graph
//!
//! Runs once per image and produces the hidden state the decoder attends to.

use ndarray::{Array3, Array4, Ix3};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::session::{require_inputs, select_output, GraphSession, TensorView};
use crate::error::{OcrError, Result};

/// Encoder input name
pub const PIXEL_VALUES: &str = "pixel_values";

/// Preferred encoder output name
pub const LAST_HIDDEN_STATE: &str = "last_hidden_state";

/// Encoder graph wrapper
#[derive(Clone)]
pub struct VisionEncoder {
    session: Arc<dyn GraphSession>,
    output_name: String,
    artifact: PathBuf,
}

impl std::fmt::Debug for VisionEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionEncoder")
            .field("output_name", &self.output_name)
            .field("artifact", &self.artifact)
            .finish_non_exhaustive()
    }
}

impl VisionEncoder {
    /// Wrap a loaded encoder graph
    ///
    /// `artifact` names the graph in error messages.
    ///
    /// # Errors
    /// `ArtifactInvalid` if the graph has no `pixel_values` input or no outputs
    pub fn new(session: Arc<dyn GraphSession>, artifact: impl AsRef<Path>) -> Result<Self> {
        let artifact = artifact.as_ref();
        require_inputs(session.as_ref(), artifact, &[PIXEL_VALUES])?;
        let output_name = select_output(session.as_ref(), artifact, LAST_HIDDEN_STATE)?;

        Ok(Self {
            session,
            output_name,
            artifact: artifact.to_path_buf(),
        })
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Encode a preprocessed `[1, 3, H, W]` pixel tensor
    ///
    /// Returns the hidden state as `[1, seq_len, hidden_dim]`.
    pub fn encode(&self, pixel_values: &Array4<f32>) -> Result<Array3<f32>> {
        let shape = pixel_values.shape();
        if shape[0] != 1 || shape[1] != 3 {
            return Err(OcrError::InferenceFailure(format!(
                "Invalid pixel tensor shape: {:?}, expected [1, 3, H, W]",
                shape
            )));
        }

        let outputs = self.session.run(&[(
            PIXEL_VALUES,
            TensorView::F32(pixel_values.view().into_dyn()),
        )])?;

        let hidden = outputs
            .take_or_first(&self.output_name)
            .ok_or_else(|| {
                OcrError::InferenceFailure(format!(
                    "{} produced no outputs",
                    self.artifact.display()
                ))
            })?
            .into_f32()?;

        debug!("Encoder output shape: {:?}", hidden.shape());

        if hidden.ndim() != 3 || hidden.shape()[0] != 1 {
            return Err(OcrError::InferenceFailure(format!(
                "Invalid hidden state shape: {:?}, expected [1, seq_len, hidden_dim]",
                hidden.shape()
            )));
        }

        hidden
            .into_dimensionality::<Ix3>()
            .map_err(|e| OcrError::inference("Failed to reshape hidden state", e))
    }
}
