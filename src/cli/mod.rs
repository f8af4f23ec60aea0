// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Command-line front end

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::EngineOptions;
use crate::engine::{OcrEngine, Recognition};
use crate::version;
use crate::vision::image_utils;

/// Artifact directory used when none is configured
pub const DEFAULT_MODEL_DIR: &str = "./models/manga-ocr-onnx";

/// Manga OCR command line
#[derive(Parser, Debug)]
#[command(name = "manga-ocr")]
#[command(version = version::VERSION)]
#[command(about = "Recognize Japanese manga text with ONNX encoder/decoder graphs", long_about = None)]
pub struct Cli {
    /// Directory with config.json, vocab.txt, encoder.onnx and decoder.onnx
    #[arg(long, env = "MANGA_OCR_MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
    pub model_dir: PathBuf,

    /// TOML file with engine options
    #[arg(long, env = "MANGA_OCR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print one JSON object per image instead of plain text
    #[arg(long)]
    pub json: bool,

    /// Images to recognize
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
}

/// Options from the optional TOML file, then `MANGA_OCR_*` overrides
pub fn engine_options(config: Option<&Path>) -> Result<EngineOptions> {
    let options = match config {
        Some(path) => EngineOptions::from_file(path)
            .with_context(|| format!("Failed to load engine options from {}", path.display()))?,
        None => EngineOptions::default(),
    };
    options
        .with_env_overrides()
        .context("Invalid MANGA_OCR_* environment override")
}

fn format_line(image: &Path, recognition: &Recognition, json: bool) -> Result<String> {
    if json {
        let line = serde_json::json!({
            "image": image.display().to_string(),
            "recognition": recognition,
        });
        Ok(serde_json::to_string(&line)?)
    } else {
        Ok(recognition.text.clone())
    }
}

/// Load the engine and recognize every image in order
///
/// Fails if the engine cannot be constructed, or after all images were
/// attempted if any of them failed.
pub async fn execute(cli: Cli) -> Result<()> {
    info!("{}", version::get_version_string());

    let options = engine_options(cli.config.as_deref())?;
    let engine = OcrEngine::new(&cli.model_dir, options)
        .await
        .with_context(|| format!("Failed to load OCR engine from {}", cli.model_dir.display()))?;

    let mut failures = 0usize;
    for path in &cli.images {
        let worker = engine.clone();
        let image_path = path.clone();
        let result = tokio::task::spawn_blocking(move || -> crate::Result<Recognition> {
            let (image, _) = image_utils::load_image_file(&image_path)?;
            worker.recognize(&image)
        })
        .await
        .context("Recognition task panicked")?;

        match result {
            Ok(recognition) => {
                if recognition.is_truncated() {
                    info!(
                        "{}: output reached max_length and may be truncated",
                        path.display()
                    );
                }
                println!("{}", format_line(path, &recognition, cli.json)?);
            }
            Err(e) => {
                error!("❌ {}: {}", path.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} images failed", failures, cli.images.len());
    }
    Ok(())
}
