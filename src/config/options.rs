// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Runtime options for graph execution
//!
//! These are not part of the artifact contract: the same artifacts can run on
//! CPU or CUDA, with any thread count. Options come from defaults, an optional
//! TOML file and `MANGA_OCR_*` environment variables, in that order.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{OcrError, Result};

/// Default intra-op thread count (matches the CPU sessions of the node)
pub const DEFAULT_INTRA_THREADS: usize = 4;

/// Highest ONNX Runtime graph optimization level
pub const MAX_OPTIMIZATION_LEVEL: u8 = 3;

/// Execution provider used to run both graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProviderKind {
    Cpu,
    /// CUDA with automatic CPU fallback when the provider cannot be registered
    Cuda,
}

impl Default for ExecutionProviderKind {
    fn default() -> Self {
        Self::Cpu
    }
}

impl FromStr for ExecutionProviderKind {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(OcrError::InvalidOptions(format!(
                "unknown execution provider '{}', expected cpu or cuda",
                other
            ))),
        }
    }
}

/// Runtime configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub execution_provider: ExecutionProviderKind,
    pub intra_threads: usize,
    /// 0 = disabled, 1 = basic, 2 = extended, 3 = all
    pub optimization_level: u8,
    /// Overrides `model.max_length` from `config.json` when set
    pub max_length: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProviderKind::Cpu,
            intra_threads: DEFAULT_INTRA_THREADS,
            optimization_level: MAX_OPTIMIZATION_LEVEL,
            max_length: None,
        }
    }
}

impl EngineOptions {
    /// Load options from a TOML file
    ///
    /// Missing keys keep their defaults. Options may sit at the top level or
    /// under an `[engine]` table.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OcrError::InvalidOptions(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse options from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(content)
            .map_err(|e| OcrError::InvalidOptions(format!("malformed TOML: {}", e)))?;

        let table = value.get("engine").cloned().unwrap_or(value);
        let options: Self = table
            .try_into()
            .map_err(|e: toml::de::Error| OcrError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `MANGA_OCR_*` environment overrides on top of these options
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("MANGA_OCR_PROVIDER") {
            self.execution_provider = val.parse()?;
        }
        if let Some(val) = lookup("MANGA_OCR_THREADS") {
            self.intra_threads = parse_number("MANGA_OCR_THREADS", &val)?;
        }
        if let Some(val) = lookup("MANGA_OCR_OPT_LEVEL") {
            self.optimization_level = parse_number("MANGA_OCR_OPT_LEVEL", &val)?;
        }
        if let Some(val) = lookup("MANGA_OCR_MAX_LENGTH") {
            self.max_length = Some(parse_number("MANGA_OCR_MAX_LENGTH", &val)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.intra_threads == 0 {
            return Err(OcrError::InvalidOptions(
                "intra_threads must be at least 1".to_string(),
            ));
        }
        if self.optimization_level > MAX_OPTIMIZATION_LEVEL {
            return Err(OcrError::InvalidOptions(format!(
                "optimization_level must be 0..={}, got {}",
                MAX_OPTIMIZATION_LEVEL, self.optimization_level
            )));
        }
        if self.max_length == Some(0) {
            return Err(OcrError::InvalidOptions(
                "max_length override must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| OcrError::InvalidOptions(format!("{} must be a number, got '{}'", key, val)))
}
