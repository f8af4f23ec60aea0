// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text decoder graph and greedy generation
//!
//! The decoder has no KV cache: every step feeds the full id sequence so far
//! and reads the logits at the last position.

use ndarray::{Array2, Array3, ArrayD, Axis};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::{require_inputs, select_output, GraphSession, TensorView};
use crate::config::GenerationConfig;
use crate::error::{OcrError, Result};

pub const INPUT_IDS: &str = "input_ids";
pub const ENCODER_HIDDEN_STATES: &str = "encoder_hidden_states";
pub const ATTENTION_MASK: &str = "attention_mask";

/// Preferred decoder output name
pub const LOGITS: &str = "logits";

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The end-of-sequence id was produced
    Eos,
    /// `max_length` steps ran without an end-of-sequence id; output may be truncated
    LengthLimit,
}

/// Output of one decode loop
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Every id including the leading start id (and the trailing eos, if any)
    pub ids: Vec<i64>,
    pub finish_reason: FinishReason,
}

impl Generation {
    /// Ids produced by the decoder, without the start id
    pub fn generated(&self) -> &[i64] {
        self.ids.get(1..).unwrap_or(&[])
    }

    /// Number of decoder runs it took
    pub fn steps(&self) -> usize {
        self.generated().len()
    }
}

/// Index of the largest value
///
/// The first maximum wins on ties and NaN never wins. `None` for an empty or
/// all-NaN slice.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, max)) if v <= max => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Decoder graph wrapper
#[derive(Clone)]
pub struct TextDecoder {
    session: Arc<dyn GraphSession>,
    output_name: String,
    artifact: PathBuf,
    generation: GenerationConfig,
}

impl std::fmt::Debug for TextDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextDecoder")
            .field("output_name", &self.output_name)
            .field("artifact", &self.artifact)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl TextDecoder {
    /// Wrap a loaded decoder graph
    ///
    /// # Errors
    /// `ArtifactInvalid` if the graph lacks `input_ids`,
    /// `encoder_hidden_states` or `attention_mask`, or declares no outputs
    pub fn new(
        session: Arc<dyn GraphSession>,
        artifact: impl AsRef<Path>,
        generation: GenerationConfig,
    ) -> Result<Self> {
        let artifact = artifact.as_ref();
        if generation.max_length == 0 {
            return Err(OcrError::invalid_artifact(
                artifact,
                "max_length must be a positive integer",
            ));
        }

        require_inputs(
            session.as_ref(),
            artifact,
            &[INPUT_IDS, ENCODER_HIDDEN_STATES, ATTENTION_MASK],
        )?;
        let output_name = select_output(session.as_ref(), artifact, LOGITS)?;

        Ok(Self {
            session,
            output_name,
            artifact: artifact.to_path_buf(),
            generation,
        })
    }

    pub fn max_length(&self) -> usize {
        self.generation.max_length
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Logits for the token following `ids`
    pub fn next_token_logits(&self, hidden: &Array3<f32>, ids: &[i64]) -> Result<Vec<f32>> {
        let seq_len = ids.len();
        let input_ids = Array2::from_shape_vec((1, seq_len), ids.to_vec())
            .map_err(|e| OcrError::inference("Failed to build input_ids", e))?;
        let attention_mask = Array2::<i64>::ones((1, seq_len));

        let outputs = self.session.run(&[
            (INPUT_IDS, TensorView::I64(input_ids.view().into_dyn())),
            (
                ENCODER_HIDDEN_STATES,
                TensorView::F32(hidden.view().into_dyn()),
            ),
            (ATTENTION_MASK, TensorView::I64(attention_mask.view().into_dyn())),
        ])?;

        let logits = outputs
            .take_or_first(&self.output_name)
            .ok_or_else(|| {
                OcrError::InferenceFailure(format!(
                    "{} produced no outputs",
                    self.artifact.display()
                ))
            })?
            .into_f32()?;

        last_position(logits, seq_len)
    }

    /// Greedy decode from the encoder hidden state
    ///
    /// Runs at most `max_length` decoder steps. `cancel` is checked before
    /// each step.
    pub fn generate(
        &self,
        hidden: &Array3<f32>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Generation> {
        let GenerationConfig {
            decoder_start_token_id,
            eos_token_id,
            max_length,
        } = self.generation;

        let mut ids = Vec::with_capacity(max_length + 1);
        ids.push(decoder_start_token_id);

        for step in 0..max_length {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                debug!("Generation cancelled after {} steps", step);
                return Err(OcrError::Cancelled { steps: step });
            }

            let logits = self.next_token_logits(hidden, &ids)?;
            let next = argmax(&logits).ok_or_else(|| {
                OcrError::InferenceFailure(format!(
                    "decoder produced no usable logits at step {}",
                    step
                ))
            })? as i64;

            ids.push(next);

            if next == eos_token_id {
                debug!("Generation stopped at EOS after {} steps", step + 1);
                return Ok(Generation {
                    ids,
                    finish_reason: FinishReason::Eos,
                });
            }
        }

        debug!("Generation hit max_length ({}) without EOS", max_length);
        Ok(Generation {
            ids,
            finish_reason: FinishReason::LengthLimit,
        })
    }
}

/// Slice the final sequence position out of `[1, n, V]` or `[n, V]` logits
fn last_position(logits: ArrayD<f32>, seq_len: usize) -> Result<Vec<f32>> {
    let shape = logits.shape().to_vec();
    let rows = match shape.as_slice() {
        [1, n, v] if *n == seq_len && *v > 0 => logits.index_axis_move(Axis(0), 0),
        [n, v] if *n == seq_len && *v > 0 => logits,
        _ => {
            return Err(OcrError::InferenceFailure(format!(
                "Invalid logits shape: {:?}, expected [1, {}, vocab] or [{}, vocab]",
                shape, seq_len, seq_len
            )))
        }
    };

    Ok(rows.index_axis(Axis(0), seq_len - 1).iter().copied().collect())
}
