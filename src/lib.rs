// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Japanese manga text recognition on ONNX encoder/decoder graphs
//!
//! ```no_run
//! use manga_ocr_engine::{EngineOptions, OcrEngine};
//!
//! # fn main() -> manga_ocr_engine::Result<()> {
//! let engine = OcrEngine::load("./models/manga-ocr-onnx", &EngineOptions::default())?;
//! let text = engine.infer_path("bubble.png")?;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod postprocess;
pub mod tokenizer;
pub mod version;
pub mod vision;

pub use config::{EngineOptions, ExecutionProviderKind, ModelConfig};
pub use engine::{FinishReason, GraphSession, OcrEngine, Recognition};
pub use error::{OcrError, Result};
pub use tokenizer::{Tokenizer, Vocabulary};
