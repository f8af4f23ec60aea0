// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Greedy decode loop tests
//!
//! Verifies termination, the max_length bound, cancellation and failure
//! propagation against scripted encoder/decoder sessions.

use super::support::*;
use manga_ocr_engine::engine::FinishReason;
use manga_ocr_engine::{EngineOptions, OcrError};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

#[test]
fn test_stops_at_eos() {
    let h = harness(ScriptedDecoder::emitting(&[MAN, GA, DESU]), 300);

    let result = h.engine.recognize(&page(40, 20)).unwrap();

    assert_eq!(result.text, "漫画です");
    assert_eq!(result.finish_reason, FinishReason::Eos);
    assert_eq!(result.token_ids, vec![MAN, GA, DESU, SEP]);
    assert!(!result.is_truncated());
    assert_eq!(h.decoder.calls(), 4);
    assert_eq!(h.encoder.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_first_step_sees_only_start_token() {
    let h = harness(
        ScriptedDecoder::new(|ids| {
            assert_eq!(ids[0], CLS);
            SEP
        }),
        300,
    );

    let result = h.engine.recognize(&page(8, 8)).unwrap();

    assert_eq!(result.text, "");
    assert_eq!(result.token_ids, vec![SEP]);
    assert_eq!(h.decoder.longest_input.load(Ordering::SeqCst), 1);
}

#[test]
fn test_length_limit_without_eos() {
    let max_length = 7;
    let h = harness(ScriptedDecoder::endless(MAN), max_length);

    let result = h.engine.recognize(&page(30, 30)).unwrap();

    assert_eq!(result.finish_reason, FinishReason::LengthLimit);
    assert!(result.is_truncated());
    assert!(!result.text.is_empty());
    assert_eq!(result.text, "漫".repeat(max_length));
    assert_eq!(result.token_ids.len(), max_length);
    assert_eq!(h.decoder.calls(), max_length);
    // Sequence grows to at most max_length + 1 including the start id
    assert_eq!(h.decoder.longest_input.load(Ordering::SeqCst), max_length);
}

#[test]
fn test_loop_never_exceeds_max_length() {
    for max_length in [1, 2, 5, 16] {
        let h = harness(ScriptedDecoder::endless(GA), max_length);
        let result = h.engine.recognize(&page(10, 10)).unwrap();
        assert!(result.token_ids.len() <= max_length);
        assert!(h.decoder.calls() <= max_length);
    }
}

#[test]
fn test_eos_on_last_allowed_step_is_done() {
    let h = harness(ScriptedDecoder::emitting(&[MAN, GA]), 3);

    let result = h.engine.recognize(&page(10, 10)).unwrap();

    assert_eq!(result.finish_reason, FinishReason::Eos);
    assert_eq!(result.token_ids, vec![MAN, GA, SEP]);
}

#[test]
fn test_max_length_override() {
    let options = EngineOptions {
        max_length: Some(3),
        ..EngineOptions::default()
    };
    let h = harness_with(ScriptedDecoder::endless(DESU), 300, &options);

    assert_eq!(h.engine.max_length(), 3);
    let result = h.engine.recognize(&page(10, 10)).unwrap();
    assert_eq!(result.token_ids.len(), 3);
    assert_eq!(result.finish_reason, FinishReason::LengthLimit);
}

#[test]
fn test_cancelled_before_first_step() {
    let h = harness(ScriptedDecoder::endless(MAN), 50);
    let token = CancellationToken::new();
    token.cancel();

    let err = h.engine.recognize_with_cancel(&page(10, 10), &token).unwrap_err();

    assert!(matches!(err, OcrError::Cancelled { steps: 0 }));
    assert_eq!(h.decoder.calls(), 0);
}

#[test]
fn test_cancelled_mid_generation() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let h = harness(
        ScriptedDecoder::new(move |ids| {
            if ids.len() == 3 {
                trigger.cancel();
            }
            MAN
        }),
        50,
    );

    let err = h.engine.recognize_with_cancel(&page(10, 10), &token).unwrap_err();

    assert!(matches!(err, OcrError::Cancelled { steps: 3 }));
    assert_eq!(h.decoder.calls(), 3);
}

#[test]
fn test_uncancelled_token_runs_to_completion() {
    let h = harness(ScriptedDecoder::emitting(&[MAN]), 50);
    let token = CancellationToken::new();

    let result = h.engine.recognize_with_cancel(&page(10, 10), &token).unwrap();
    assert_eq!(result.text, "漫");
}

#[test]
fn test_decoder_failure_is_fatal_for_call_only() {
    let mut decoder = ScriptedDecoder::emitting(&[MAN, GA]);
    decoder.fail_on_call = Some(1);
    let h = harness(decoder, 50);

    let err = h.engine.recognize(&page(10, 10)).unwrap_err();
    assert!(matches!(err, OcrError::InferenceFailure(_)));
    assert!(!err.is_construction_error());

    // The engine stays usable; the scripted failure only fires once
    let result = h.engine.recognize(&page(10, 10)).unwrap();
    assert_eq!(result.text, "漫画");
}

#[test]
fn test_logits_length_mismatch_is_inference_failure() {
    let mut decoder = ScriptedDecoder::endless(MAN);
    decoder.positions_override = Some(5);
    let h = harness(decoder, 10);

    let err = h.engine.recognize(&page(10, 10)).unwrap_err();
    assert!(matches!(err, OcrError::InferenceFailure(_)));
}
