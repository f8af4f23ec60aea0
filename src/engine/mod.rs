// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! OCR engine
//!
//! Ties the pipeline together:
//! image → grayscale round trip → pixel tensor → encoder → greedy decode loop
//! → tokenizer → text normalization.
//!
//! An [`OcrEngine`] is built once from an artifact directory and shared.
//! All state it holds is read-only, so calls can run from many threads.

pub mod decoder;
pub mod encoder;
pub mod session;

pub use decoder::{argmax, FinishReason, Generation, TextDecoder};
pub use encoder::VisionEncoder;
pub use session::{GraphOutputs, GraphSession, OrtSession, Tensor, TensorView};

use image::DynamicImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{EngineOptions, ModelConfig};
use crate::error::{OcrError, Result};
use crate::postprocess;
use crate::tokenizer::Tokenizer;
use crate::vision::{image_utils, to_grayscale_rgb, ImageProcessor};

/// Artifact configuration file name
pub const CONFIG_FILE: &str = "config.json";
/// Vocabulary file name
pub const VOCAB_FILE: &str = "vocab.txt";
/// Encoder graph file name
pub const ENCODER_FILE: &str = "encoder.onnx";
/// Decoder graph file name
pub const DECODER_FILE: &str = "decoder.onnx";

/// Detailed result of one recognition call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    /// Normalized text
    pub text: String,
    pub finish_reason: FinishReason,
    /// Decoder output ids without the start id
    pub token_ids: Vec<i64>,
    pub processing_time_ms: u64,
}

impl Recognition {
    /// Whether the text may be cut short by `max_length`
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FinishReason::LengthLimit
    }
}

/// Encoder/decoder OCR engine
#[derive(Clone)]
pub struct OcrEngine {
    config: Arc<ModelConfig>,
    processor: Arc<ImageProcessor>,
    tokenizer: Arc<Tokenizer>,
    encoder: VisionEncoder,
    decoder: TextDecoder,
}

impl std::fmt::Debug for OcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrEngine")
            .field("image_size", &self.config.preprocessor.image_size)
            .field("vocab_size", &self.tokenizer.vocab_size())
            .field("max_length", &self.decoder.max_length())
            .finish_non_exhaustive()
    }
}

impl OcrEngine {
    /// Load the engine on the blocking thread pool
    ///
    /// # Arguments
    /// - `model_dir`: directory holding `config.json`, `vocab.txt`,
    ///   `encoder.onnx` and `decoder.onnx`
    /// - `options`: runtime options (provider, threads, overrides)
    pub async fn new<P: AsRef<Path>>(model_dir: P, options: EngineOptions) -> Result<Self> {
        let model_dir = model_dir.as_ref().to_path_buf();
        let dir_for_error = model_dir.clone();

        tokio::task::spawn_blocking(move || Self::load(&model_dir, &options))
            .await
            .map_err(|e| {
                OcrError::invalid_artifact(dir_for_error, format!("loader task failed: {}", e))
            })?
    }

    /// Load the engine from an artifact directory
    ///
    /// Nothing is returned unless every artifact loads and validates.
    ///
    /// # Errors
    /// - `ArtifactMissing` if any of the four files is absent
    /// - `ArtifactInvalid` if a file is malformed or a graph does not match
    ///   the expected inputs
    /// - `InvalidOptions` if `options` are out of range
    pub fn load<P: AsRef<Path>>(model_dir: P, options: &EngineOptions) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        options.validate()?;

        info!("Loading manga-ocr artifacts from {}", model_dir.display());
        let start = Instant::now();

        let config = ModelConfig::from_file(model_dir.join(CONFIG_FILE))?;
        let tokenizer = Tokenizer::from_file(model_dir.join(VOCAB_FILE), &config.special_tokens)?;
        info!("Loaded vocabulary with {} tokens", tokenizer.vocab_size());

        let encoder_path = model_dir.join(ENCODER_FILE);
        let decoder_path = model_dir.join(DECODER_FILE);
        if !encoder_path.exists() {
            return Err(OcrError::ArtifactMissing { path: encoder_path });
        }
        if !decoder_path.exists() {
            return Err(OcrError::ArtifactMissing { path: decoder_path });
        }

        let encoder: Arc<dyn GraphSession> = Arc::new(OrtSession::load(&encoder_path, options)?);
        let decoder: Arc<dyn GraphSession> = Arc::new(OrtSession::load(&decoder_path, options)?);

        let engine = Self::assemble(
            config,
            tokenizer,
            (encoder, encoder_path),
            (decoder, decoder_path),
            options,
        )?;

        info!(
            "✅ manga-ocr engine ready in {}ms (max_length={})",
            start.elapsed().as_millis(),
            engine.decoder.max_length()
        );
        Ok(engine)
    }

    /// Build an engine around already-loaded graph sessions
    pub fn from_parts(
        config: ModelConfig,
        tokenizer: Tokenizer,
        encoder: Arc<dyn GraphSession>,
        decoder: Arc<dyn GraphSession>,
        options: &EngineOptions,
    ) -> Result<Self> {
        options.validate()?;
        config
            .validate()
            .map_err(|reason| OcrError::invalid_artifact(CONFIG_FILE, reason))?;

        Self::assemble(
            config,
            tokenizer,
            (encoder, PathBuf::from(ENCODER_FILE)),
            (decoder, PathBuf::from(DECODER_FILE)),
            options,
        )
    }

    fn assemble(
        config: ModelConfig,
        tokenizer: Tokenizer,
        (encoder, encoder_path): (Arc<dyn GraphSession>, PathBuf),
        (decoder, decoder_path): (Arc<dyn GraphSession>, PathBuf),
        options: &EngineOptions,
    ) -> Result<Self> {
        let mut generation = config.generation.clone();
        if let Some(max_length) = options.max_length {
            debug!(
                "Overriding max_length {} -> {}",
                generation.max_length, max_length
            );
            generation.max_length = max_length;
        }

        let encoder = VisionEncoder::new(encoder, &encoder_path)?;
        let decoder = TextDecoder::new(decoder, &decoder_path, generation)?;
        let processor = ImageProcessor::new(config.preprocessor.clone());

        Ok(Self {
            config: Arc::new(config),
            processor: Arc::new(processor),
            tokenizer: Arc::new(tokenizer),
            encoder,
            decoder,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Effective decode bound (after any override)
    pub fn max_length(&self) -> usize {
        self.decoder.max_length()
    }

    /// Recognize the text in an image
    pub fn infer(&self, image: &DynamicImage) -> Result<String> {
        self.recognize(image).map(|r| r.text)
    }

    /// Recognize text from encoded image bytes
    pub fn infer_bytes(&self, bytes: &[u8]) -> Result<String> {
        let (image, _) = image_utils::decode_image_bytes(bytes)?;
        self.infer(&image)
    }

    /// Recognize text from a base64-encoded image
    pub fn infer_base64(&self, data: &str) -> Result<String> {
        let (image, _) = image_utils::decode_base64_image(data)?;
        self.infer(&image)
    }

    /// Recognize text from an image file
    pub fn infer_path<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let (image, _) = image_utils::load_image_file(path)?;
        self.infer(&image)
    }

    /// Recognize an image, returning ids, stop reason and timing with the text
    pub fn recognize(&self, image: &DynamicImage) -> Result<Recognition> {
        self.run(image, None)
    }

    /// Like [`recognize`](Self::recognize), but stops with `Cancelled` once
    /// `cancel` fires. The token is checked between decode steps.
    pub fn recognize_with_cancel(
        &self,
        image: &DynamicImage,
        cancel: &CancellationToken,
    ) -> Result<Recognition> {
        self.run(image, Some(cancel))
    }

    fn run(&self, image: &DynamicImage, cancel: Option<&CancellationToken>) -> Result<Recognition> {
        let start = Instant::now();

        let gray = to_grayscale_rgb(image);
        let pixel_values = self.processor.process_rgb(&gray)?;
        debug!("Pixel tensor shape: {:?}", pixel_values.shape());

        let hidden = self.encoder.encode(&pixel_values)?;
        let generation = self.decoder.generate(&hidden, cancel)?;

        let raw = self.tokenizer.decode(generation.generated(), true);
        let text = postprocess::normalize(&raw);

        let processing_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Recognized {} chars in {} steps ({:?}, {}ms)",
            text.chars().count(),
            generation.steps(),
            generation.finish_reason,
            processing_time_ms
        );

        Ok(Recognition {
            text,
            finish_reason: generation.finish_reason,
            token_ids: generation.generated().to_vec(),
            processing_time_ms,
        })
    }
}
