// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the manga OCR engine

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Full version string with feature description
pub const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"), "-onnx-greedy");

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "onnx-runtime",
    "cuda-fallback",
    "pillow-bilinear",
    "greedy-decode",
    "cancellation",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("Manga OCR Engine {}", VERSION_NUMBER)
}

/// Get full version info as JSON
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "version": VERSION_NUMBER,
        "build": VERSION,
        "features": FEATURES,
    })
}
