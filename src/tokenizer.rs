// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vocabulary-indexed tokenizer for decoder output
//!
//! The decoder emits ids into a WordPiece vocabulary (`vocab.txt`, one token per
//! line, id = line index). Decoding concatenates tokens without a separator,
//! since the target script has no inter-word spacing, and strips the `##`
//! continuation marker.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::SpecialTokens;
use crate::error::{OcrError, Result};

/// WordPiece continuation marker
pub const SUBWORD_PREFIX: &str = "##";

/// Ordered token list with bidirectional lookup
///
/// Ids are dense: `0..len()`.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Vocabulary {
    /// Load `vocab.txt`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OcrError::ArtifactMissing {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path)
            .map_err(|e| OcrError::invalid_artifact(path, format!("cannot open: {}", e)))?;

        let mut tokens = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                OcrError::invalid_artifact(path, format!("line {}: {}", line_no + 1, e))
            })?;
            tokens.push(line.trim().to_string());
        }

        Self::from_tokens(tokens).map_err(|reason| OcrError::invalid_artifact(path, reason))
    }

    /// Build a vocabulary from the contents of a vocabulary file
    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        Self::from_tokens(content.lines().map(|line| line.trim().to_string()).collect())
    }

    fn from_tokens(tokens: Vec<String>) -> std::result::Result<Self, String> {
        if tokens.is_empty() {
            return Err("vocabulary is empty".to_string());
        }

        // Later duplicates win, as with a dict built line by line
        let ids = tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id))
            .collect();

        Ok(Self { tokens, ids })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token for an id; `None` for negative or out-of-range ids
    pub fn id_to_token(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.tokens.get(idx))
            .map(String::as_str)
    }

    pub fn token_to_id(&self, token: &str) -> Option<usize> {
        self.ids.get(token).copied()
    }
}

/// Id-to-text decoder over a [`Vocabulary`]
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Vocabulary,
    special_tokens: HashSet<String>,
}

impl Tokenizer {
    pub fn new(vocab: Vocabulary, special: &SpecialTokens) -> Self {
        for (name, special_token) in special.iter() {
            match vocab.id_to_token(special_token.id as i64) {
                Some(token) if token == special_token.token => {}
                found => warn!(
                    "Special token {} configured as id {} = '{}' but vocabulary has {:?}",
                    name, special_token.id, special_token.token, found
                ),
            }
        }

        let special_tokens = special.iter().map(|(_, t)| t.token.clone()).collect();

        Self {
            vocab,
            special_tokens,
        }
    }

    /// Load the vocabulary file and attach the configured special tokens
    pub fn from_file<P: AsRef<Path>>(vocab_path: P, special: &SpecialTokens) -> Result<Self> {
        Ok(Self::new(Vocabulary::from_file(vocab_path)?, special))
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_special(&self, token: &str) -> bool {
        self.special_tokens.contains(token)
    }

    /// Decode ids to text
    ///
    /// Ids outside the vocabulary are skipped. Whether such ids indicate an
    /// upstream id-range defect is unverified, so they are logged rather than
    /// treated as errors.
    pub fn decode(&self, ids: &[i64], skip_special: bool) -> String {
        let mut text = String::new();

        for &id in ids {
            let Some(token) = self.vocab.id_to_token(id) else {
                let skipped = OcrError::OutOfRangeToken {
                    id,
                    vocab_size: self.vocab.len(),
                };
                debug!("Skipping token: {}", skipped);
                continue;
            };

            if skip_special && self.is_special(token) {
                continue;
            }
            text.push_str(token);
        }

        text.replace(SUBWORD_PREFIX, "")
    }
}
