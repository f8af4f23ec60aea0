// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Scripted graph sessions for driving the engine without ONNX artifacts

#![allow(dead_code)]

use manga_ocr_engine::engine::{GraphOutputs, GraphSession, Tensor, TensorView};
use manga_ocr_engine::{EngineOptions, ModelConfig, OcrEngine, OcrError, Result, Tokenizer, Vocabulary};
use ndarray::{ArrayD, IxDyn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CLS: i64 = 2;
pub const SEP: i64 = 3;
pub const MAN: i64 = 5;
pub const GA: i64 = 6;
pub const SUB_GA: i64 = 7;
pub const DESU: i64 = 8;
pub const ELLIPSIS: i64 = 9;
pub const MIDDLE_DOT: i64 = 10;

pub const VOCAB: &str = "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\n漫\n画\n##画\nです\n…\n・\n";
pub const VOCAB_SIZE: usize = 11;

pub const IMAGE_SIZE: usize = 16;
pub const HIDDEN_LEN: usize = 4;
pub const HIDDEN_DIM: usize = 8;

pub fn config_json(max_length: usize) -> String {
    format!(
        r#"{{
            "preprocessor": {{
                "image_size": [{size}, {size}],
                "rescale_factor": 0.00392156862745098,
                "image_mean": [0.5, 0.5, 0.5],
                "image_std": [0.5, 0.5, 0.5]
            }},
            "model": {{
                "decoder_start_token_id": 2,
                "eos_token_id": 3,
                "max_length": {max_length}
            }},
            "special_tokens": {{
                "pad": {{"id": 0, "token": "[PAD]"}},
                "unk": {{"id": 1, "token": "[UNK]"}},
                "cls": {{"id": 2, "token": "[CLS]"}},
                "sep": {{"id": 3, "token": "[SEP]"}},
                "mask": {{"id": 4, "token": "[MASK]"}}
            }}
        }}"#,
        size = IMAGE_SIZE,
        max_length = max_length
    )
}

pub fn model_config(max_length: usize) -> ModelConfig {
    ModelConfig::from_json(&config_json(max_length)).unwrap()
}

pub fn tokenizer(config: &ModelConfig) -> Tokenizer {
    Tokenizer::new(Vocabulary::parse(VOCAB).unwrap(), &config.special_tokens)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Encoder that records the pixel tensors it receives
pub struct ScriptedEncoder {
    pub inputs: Vec<String>,
    pub calls: AtomicUsize,
    pub last_pixels: Mutex<Option<ArrayD<f32>>>,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self {
            inputs: names(&["pixel_values"]),
            calls: AtomicUsize::new(0),
            last_pixels: Mutex::new(None),
        }
    }
}

impl GraphSession for ScriptedEncoder {
    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_names(&self) -> Vec<String> {
        names(&["last_hidden_state"])
    }

    fn run(&self, inputs: &[(&str, TensorView<'_>)]) -> Result<GraphOutputs> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_, pixels) = inputs
            .iter()
            .find(|(name, _)| *name == "pixel_values")
            .ok_or_else(|| OcrError::InferenceFailure("pixel_values not fed".into()))?;
        assert_eq!(pixels.shape(), &[1, 3, IMAGE_SIZE, IMAGE_SIZE]);

        if let Tensor::F32(array) = pixels.to_owned() {
            *self.last_pixels.lock().unwrap() = Some(array);
        }

        let mut outputs = GraphOutputs::new();
        outputs.push(
            "last_hidden_state",
            Tensor::F32(ArrayD::from_elem(IxDyn(&[1, HIDDEN_LEN, HIDDEN_DIM]), 0.25)),
        );
        Ok(outputs)
    }
}

type NextToken = dyn Fn(&[i64]) -> i64 + Send + Sync;

/// Decoder whose next token is a function of the ids fed so far
pub struct ScriptedDecoder {
    next: Box<NextToken>,
    pub calls: AtomicUsize,
    pub longest_input: AtomicUsize,
    /// Fail with `InferenceFailure` on this call (0-based)
    pub fail_on_call: Option<usize>,
    /// Report logits for this many positions instead of the fed length
    pub positions_override: Option<usize>,
}

impl ScriptedDecoder {
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(&[i64]) -> i64 + Send + Sync + 'static,
    {
        Self {
            next: Box::new(next),
            calls: AtomicUsize::new(0),
            longest_input: AtomicUsize::new(0),
            fail_on_call: None,
            positions_override: None,
        }
    }

    /// Emit `tokens` in order, then `[SEP]`
    pub fn emitting(tokens: &[i64]) -> Self {
        let tokens = tokens.to_vec();
        Self::new(move |ids| tokens.get(ids.len() - 1).copied().unwrap_or(SEP))
    }

    /// Never emit `[SEP]`
    pub fn endless(token: i64) -> Self {
        Self::new(move |_| token)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GraphSession for ScriptedDecoder {
    fn input_names(&self) -> Vec<String> {
        names(&["input_ids", "encoder_hidden_states", "attention_mask"])
    }

    fn output_names(&self) -> Vec<String> {
        names(&["logits"])
    }

    fn run(&self, inputs: &[(&str, TensorView<'_>)]) -> Result<GraphOutputs> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(OcrError::InferenceFailure(format!("scripted failure on call {}", call)));
        }

        let find = |wanted: &str| {
            inputs
                .iter()
                .find(|(name, _)| *name == wanted)
                .map(|(_, t)| t.to_owned())
                .unwrap_or_else(|| panic!("{} not fed", wanted))
        };

        let Tensor::I64(input_ids) = find("input_ids") else {
            panic!("input_ids must be i64");
        };
        let Tensor::I64(mask) = find("attention_mask") else {
            panic!("attention_mask must be i64");
        };
        let hidden = find("encoder_hidden_states");

        assert_eq!(input_ids.shape()[0], 1);
        assert_eq!(mask.shape(), input_ids.shape());
        assert!(mask.iter().all(|&m| m == 1));
        assert_eq!(hidden.shape(), &[1, HIDDEN_LEN, HIDDEN_DIM]);

        let ids: Vec<i64> = input_ids.iter().copied().collect();
        self.longest_input.fetch_max(ids.len(), Ordering::SeqCst);

        let next = (self.next)(&ids) as usize;
        let positions = self.positions_override.unwrap_or(ids.len());
        let mut logits = ArrayD::<f32>::zeros(IxDyn(&[1, positions, VOCAB_SIZE]));
        if positions > 0 {
            logits[IxDyn(&[0, positions - 1, next])] = 10.0;
        }

        let mut outputs = GraphOutputs::new();
        outputs.push("logits", Tensor::F32(logits));
        Ok(outputs)
    }
}

pub struct Harness {
    pub engine: OcrEngine,
    pub encoder: Arc<ScriptedEncoder>,
    pub decoder: Arc<ScriptedDecoder>,
}

pub fn harness_with(decoder: ScriptedDecoder, max_length: usize, options: &EngineOptions) -> Harness {
    let config = model_config(max_length);
    let tokenizer = tokenizer(&config);
    let encoder = Arc::new(ScriptedEncoder::new());
    let decoder = Arc::new(decoder);

    let engine = OcrEngine::from_parts(
        config,
        tokenizer,
        encoder.clone(),
        decoder.clone(),
        options,
    )
    .unwrap();

    Harness {
        engine,
        encoder,
        decoder,
    }
}

pub fn harness(decoder: ScriptedDecoder, max_length: usize) -> Harness {
    harness_with(decoder, max_length, &EngineOptions::default())
}

pub fn page(width: u32, height: u32) -> image::DynamicImage {
    image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 180])
    }))
}
