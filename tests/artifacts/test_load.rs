// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Artifact directory loading tests
//!
//! Construction must fail before any engine exists when a file is missing
//! or malformed.

use manga_ocr_engine::{EngineOptions, ExecutionProviderKind, OcrEngine, OcrError};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CONFIG: &str = r#"{
    "preprocessor": {
        "image_size": [224, 224],
        "rescale_factor": 0.00392156862745098,
        "image_mean": [0.5, 0.5, 0.5],
        "image_std": [0.5, 0.5, 0.5]
    },
    "model": {"decoder_start_token_id": 2, "eos_token_id": 3, "max_length": 300},
    "special_tokens": {
        "pad": {"id": 0, "token": "[PAD]"},
        "unk": {"id": 1, "token": "[UNK]"},
        "cls": {"id": 2, "token": "[CLS]"},
        "sep": {"id": 3, "token": "[SEP]"},
        "mask": {"id": 4, "token": "[MASK]"}
    }
}"#;

const VOCAB: &str = "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\n漫\n画\n";

fn artifact_dir(files: &[(&str, &[u8])]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

fn load(dir: &Path) -> OcrError {
    OcrEngine::load(dir, &EngineOptions::default()).unwrap_err()
}

fn assert_missing(err: OcrError, file: &str) {
    match err {
        OcrError::ArtifactMissing { path } => assert!(path.ends_with(file), "{:?}", path),
        other => panic!("expected ArtifactMissing({}), got {:?}", file, other),
    }
}

#[test]
fn test_missing_config() {
    let dir = artifact_dir(&[("vocab.txt", VOCAB.as_bytes())]);
    assert_missing(load(dir.path()), "config.json");
}

#[test]
fn test_missing_vocab() {
    let dir = artifact_dir(&[("config.json", CONFIG.as_bytes())]);
    let err = load(dir.path());
    assert!(err.is_construction_error());
    assert_missing(err, "vocab.txt");
}

#[test]
fn test_missing_encoder_graph() {
    let dir = artifact_dir(&[
        ("config.json", CONFIG.as_bytes()),
        ("vocab.txt", VOCAB.as_bytes()),
        ("decoder.onnx", b"\x08\x07"),
    ]);
    assert_missing(load(dir.path()), "encoder.onnx");
}

#[test]
fn test_missing_decoder_graph() {
    let dir = artifact_dir(&[
        ("config.json", CONFIG.as_bytes()),
        ("vocab.txt", VOCAB.as_bytes()),
        ("encoder.onnx", b"\x08\x07"),
    ]);
    assert_missing(load(dir.path()), "decoder.onnx");
}

#[test]
fn test_malformed_config() {
    let dir = artifact_dir(&[
        ("config.json", b"{\"preprocessor\": "),
        ("vocab.txt", VOCAB.as_bytes()),
    ]);
    match load(dir.path()) {
        OcrError::ArtifactInvalid { path, .. } => assert!(path.ends_with("config.json")),
        other => panic!("expected ArtifactInvalid, got {:?}", other),
    }
}

#[test]
fn test_config_with_zero_max_length() {
    let config = CONFIG.replace("\"max_length\": 300", "\"max_length\": 0");
    let dir = artifact_dir(&[
        ("config.json", config.as_bytes()),
        ("vocab.txt", VOCAB.as_bytes()),
    ]);
    assert!(matches!(load(dir.path()), OcrError::ArtifactInvalid { .. }));
}

#[test]
fn test_empty_vocab() {
    let dir = artifact_dir(&[
        ("config.json", CONFIG.as_bytes()),
        ("vocab.txt", b""),
    ]);
    match load(dir.path()) {
        OcrError::ArtifactInvalid { path, reason } => {
            assert!(path.ends_with("vocab.txt"));
            assert!(reason.contains("empty"));
        }
        other => panic!("expected ArtifactInvalid, got {:?}", other),
    }
}

#[test]
fn test_corrupt_graphs() {
    let dir = artifact_dir(&[
        ("config.json", CONFIG.as_bytes()),
        ("vocab.txt", VOCAB.as_bytes()),
        ("encoder.onnx", b"not a protobuf graph"),
        ("decoder.onnx", b"not a protobuf graph"),
    ]);
    match load(dir.path()) {
        OcrError::ArtifactInvalid { path, .. } => assert!(path.ends_with("encoder.onnx")),
        other => panic!("expected ArtifactInvalid, got {:?}", other),
    }
}

#[test]
fn test_options_validated_before_artifacts() {
    let dir = artifact_dir(&[]);
    let options = EngineOptions {
        optimization_level: 9,
        ..EngineOptions::default()
    };
    let err = OcrEngine::load(dir.path(), &options).unwrap_err();
    assert!(matches!(err, OcrError::InvalidOptions(_)));
}

#[tokio::test]
async fn test_async_load_reports_missing_artifacts() {
    let dir = artifact_dir(&[("config.json", CONFIG.as_bytes())]);
    let err = OcrEngine::new(dir.path(), EngineOptions::default())
        .await
        .unwrap_err();
    assert_missing(err, "vocab.txt");
}

#[test]
fn test_engine_options_from_toml_file() {
    let dir = artifact_dir(&[(
        "engine.toml",
        b"[engine]\nexecution_provider = \"cuda\"\nintra_threads = 2\nmax_length = 120\n",
    )]);
    let options = EngineOptions::from_file(dir.path().join("engine.toml")).unwrap();

    assert_eq!(options.execution_provider, ExecutionProviderKind::Cuda);
    assert_eq!(options.intra_threads, 2);
    assert_eq!(options.optimization_level, 3);
    assert_eq!(options.max_length, Some(120));
}

#[test]
#[ignore] // Requires exported manga-ocr ONNX artifacts
fn test_real_artifacts_load() {
    let dir = std::env::var("MANGA_OCR_MODEL_DIR")
        .unwrap_or_else(|_| "./models/manga-ocr-onnx".to_string());
    let engine = OcrEngine::load(&dir, &EngineOptions::default()).unwrap();

    assert_eq!(engine.config().preprocessor.image_size, [224, 224]);
    assert_eq!(engine.max_length(), 300);
    assert!(engine.tokenizer().vocab_size() > 5);
}
