// ============================================================
// Layer 4 — Parallel Corpus Reader
// ============================================================
// Reads line-aligned text files into a ParallelCorpus:
//
//   train.de  ─┐
//              ├─ clean ─ vocabulary.encode ─ SequencePair
//   train.en  ─┘
//
// The target file is optional (a test split may be source-only).
// When both sides are given they must have the same number of
// lines.
//
// Training splits may drop pairs longer than `max_len` tokens
// on either side. Decoding splits are never filtered: the
// translator writes exactly one output line per input line.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::data::preprocessor::Preprocessor;
use crate::data::vocabulary::Vocabulary;
use crate::domain::sequence::{ParallelCorpus, SequencePair};

/// Read and clean every line of `path`.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read corpus file '{}'", path.display()))?;
    let pre = Preprocessor::new();
    Ok(text.lines().map(|l| pre.clean(l)).collect())
}

/// Source and (optional) target sentences of one split, still as text.
#[derive(Debug, Clone)]
pub struct RawSplit {
    pub name:    String,
    pub sources: Vec<String>,
    pub targets: Option<Vec<String>>,
}

impl RawSplit {
    pub fn read(name: &str, src: &Path, trg: Option<&Path>) -> Result<Self> {
        let sources = read_lines(src)?;
        let targets = trg.map(read_lines).transpose()?;
        if let Some(t) = &targets {
            anyhow::ensure!(
                t.len() == sources.len(),
                "split '{name}': {} source lines but {} target lines",
                sources.len(),
                t.len()
            );
        }
        tracing::debug!("split '{name}': {} sentences", sources.len());
        Ok(Self { name: name.to_string(), sources, targets })
    }

    /// Map both sides to ids, keeping only pairs of at most `max_len`
    /// tokens per side (0 keeps everything).
    pub fn encode(&self, src_vocab: &Vocabulary, trg_vocab: &Vocabulary, max_len: usize) -> Result<ParallelCorpus> {
        let mut pairs = Vec::with_capacity(self.sources.len());
        let mut dropped = 0usize;

        for (i, src_text) in self.sources.iter().enumerate() {
            let src = src_vocab.encode(src_text)?;
            let trg = match &self.targets {
                Some(t) => Some(trg_vocab.encode(&t[i])?),
                None => None,
            };
            let too_long = max_len > 0
                && (src.len() > max_len || trg.as_ref().map_or(false, |t| t.len() > max_len));
            if too_long {
                dropped += 1;
                continue;
            }
            pairs.push(SequencePair { src, trg });
        }

        if dropped > 0 {
            tracing::info!(
                "split '{}': dropped {dropped} of {} pairs longer than {max_len} tokens",
                self.name,
                self.sources.len()
            );
        }
        Ok(ParallelCorpus::new(self.name.clone(), pairs))
    }
}
