// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the OCR engine
//!
//! - `model` - the artifact-side `config.json` (preprocessing, generation, special tokens)
//! - `options` - runtime options (execution provider, threads, optimization level)

pub mod model;
pub mod options;

pub use model::{GenerationConfig, ModelConfig, PreprocessorConfig, SpecialToken, SpecialTokens};
pub use options::{EngineOptions, ExecutionProviderKind};
