// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text normalization applied to decoded output

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Runs of two or more middle dots / periods
const DOT_RUN_PATTERN: &str = r"[・.]{2,}";

fn dot_run_regex() -> &'static Regex {
    static DOT_RUN: OnceLock<Regex> = OnceLock::new();
    DOT_RUN.get_or_init(|| Regex::new(DOT_RUN_PATTERN).expect("static pattern is valid"))
}

/// Whitespace as understood by Python's `str.split()`
fn is_split_whitespace(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Normalize recognized text
///
/// In order:
/// 1. drop all whitespace
/// 2. `…` becomes `...`
/// 3. a run of 2+ characters from {`・`, `.`} becomes the same number of periods
pub fn normalize(text: &str) -> String {
    let compact: String = text.chars().filter(|c| !is_split_whitespace(*c)).collect();
    let expanded = compact.replace('…', "...");

    dot_run_regex()
        .replace_all(&expanded, |caps: &Captures| ".".repeat(caps[0].chars().count()))
        .into_owned()
}
