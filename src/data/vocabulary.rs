// ============================================================
// Layer 4 — Vocabulary
// ============================================================
// A word-level vocabulary for one side (source or target) of a
// parallel corpus, backed by a HuggingFace `tokenizers` model.
//
// The tokenizer JSON is written by hand rather than through the
// tokenizers trainer API (Trainer::Model must equal ModelWrapper
// in tokenizers 0.15, which does not fit WordLevel training).
//
// Special tokens have fixed ids in every vocabulary:
//   <pad>=0  <bos>=1  <eos>=2  <unk>=3
//
// Words are ordered by descending frequency, ties broken
// alphabetically, so building twice from the same text yields
// the same ids.
//
// Reference: Sennrich et al. (2016) Neural Machine Translation
//            of Rare Words with Subword Units

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use tokenizers::Tokenizer;

use crate::domain::error::RunnerError;
use crate::domain::sequence::{TokenId, BOS_ID, EOS_ID, PAD_ID, UNK_ID};

const SPECIALS: [(&str, TokenId); 4] = [
    ("<pad>", PAD_ID),
    ("<bos>", BOS_ID),
    ("<eos>", EOS_ID),
    ("<unk>", UNK_ID),
];

pub struct Vocabulary {
    tokenizer: Tokenizer,
}

impl Vocabulary {
    /// Use the vocabulary at `path`, or build one from `texts` and save it there.
    pub fn load_or_build(path: &Path, texts: &[String], max_size: usize) -> Result<Self> {
        if path.exists() {
            tracing::info!("Loading vocabulary from '{}'", path.display());
            return Self::load(path);
        }
        tracing::info!("Building vocabulary '{}' from {} sentences", path.display(), texts.len());
        let vocab = Self::build(texts, max_size)?;
        vocab.save(path)?;
        Ok(vocab)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Cannot load vocabulary from '{}': {e}", path.display()))?;
        for (tok, id) in SPECIALS {
            anyhow::ensure!(
                tokenizer.token_to_id(tok) == Some(id),
                "vocabulary '{}' does not map {tok} to id {id}",
                path.display()
            );
        }
        Ok(Self { tokenizer })
    }

    /// Load the `side` ("src"/"trg") vocabulary a checkpoint's configuration names.
    pub fn configured(path: Option<&Path>, side: &str) -> Result<Self> {
        let path = path.ok_or_else(|| {
            RunnerError::config(format!("configuration has no 'vocabulary.{side}' path"))
        })?;
        Self::load(path)
    }

    /// Build from whitespace-tokenised sentences. `max_size` caps the
    /// total size including the four specials; 0 means unlimited.
    pub fn build(texts: &[String], max_size: usize) -> Result<Self> {
        // ── Step 1: Count word frequencies ────────────────────────────────────
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for text in texts {
            for word in text.split_whitespace() {
                *freq.entry(word).or_insert(0) += 1;
            }
        }
        let mut words: Vec<(&str, usize)> = freq
            .into_iter()
            .filter(|(w, _)| SPECIALS.iter().all(|(s, _)| s != w))
            .collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        if max_size > 0 {
            words.truncate(max_size.saturating_sub(SPECIALS.len()));
        }

        // ── Step 2: Assign ids after the specials ─────────────────────────────
        let mut vocab = serde_json::Map::new();
        for (tok, id) in SPECIALS {
            vocab.insert(tok.to_string(), serde_json::json!(id));
        }
        for (i, (word, _)) in words.iter().enumerate() {
            vocab.insert(word.to_string(), serde_json::json!(SPECIALS.len() + i));
        }

        // ── Step 3: Tokenizer JSON in HuggingFace format ──────────────────────
        let added_tokens: Vec<serde_json::Value> = SPECIALS
            .iter()
            .map(|(tok, id)| {
                serde_json::json!({
                    "id": id, "content": tok, "single_word": false, "lstrip": false,
                    "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": null,
            "pre_tokenizer": { "type": "WhitespaceSplit" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "<unk>"
            }
        });

        let tokenizer = Tokenizer::from_str(&tokenizer_json.to_string())
            .map_err(|e| anyhow::anyhow!("Cannot construct vocabulary: {e}"))?;
        tracing::debug!("Vocabulary built with {} entries", words.len() + SPECIALS.len());
        Ok(Self { tokenizer })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create vocabulary directory '{}'", dir.display()))?;
        }
        self.tokenizer
            .save(path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write vocabulary '{}': {e}", path.display()))?;
        tracing::info!("Vocabulary ({} entries) saved to '{}'", self.len(), path.display());
        Ok(())
    }

    /// Number of ids, specials included.
    pub fn len(&self) -> usize {
        self.tokenizer.get_vocab_size(false)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map a sentence to ids; unknown words become <unk>. No <bos>/<eos>.
    pub fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    /// Space-joined words; <pad>, <bos> and <eos> are dropped, <unk> is kept.
    pub fn decode(&self, ids: &[TokenId]) -> String {
        ids.iter()
            .filter(|&&id| id != PAD_ID && id != BOS_ID && id != EOS_ID)
            .map(|&id| self.tokenizer.id_to_token(id).unwrap_or_else(|| "<unk>".to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn texts() -> Vec<String> {
        vec!["the cat sat".into(), "the dog sat down".into(), "the end".into()]
    }

    #[test]
    fn test_specials_and_frequency_order() {
        let v = Vocabulary::build(&texts(), 0).unwrap();
        // 4 specials + the, sat, cat, dog, down, end
        assert_eq!(v.len(), 10);
        assert_eq!(v.encode("the sat").unwrap(), vec![4, 5]);
        // ties ordered alphabetically: cat < dog < down < end
        assert_eq!(v.encode("cat dog down end").unwrap(), vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let v = Vocabulary::build(&texts(), 0).unwrap();
        assert_eq!(v.encode("the zebra").unwrap(), vec![4, UNK_ID]);
        assert_eq!(v.decode(&[BOS_ID, 4, UNK_ID, 5, EOS_ID, PAD_ID]), "the <unk> sat");
    }

    #[test]
    fn test_max_size_counts_specials() {
        let v = Vocabulary::build(&texts(), 6).unwrap();
        assert_eq!(v.len(), 6);
        assert_eq!(v.encode("cat").unwrap(), vec![UNK_ID]);
    }

    #[test]
    fn test_load_or_build_reuses_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab").join("src.json");
        let built = Vocabulary::load_or_build(&path, &texts(), 0).unwrap();
        assert!(path.exists());
        // a different corpus is ignored once the file exists
        let loaded = Vocabulary::load_or_build(&path, &["other words".to_string()], 0).unwrap();
        assert_eq!(loaded.len(), built.len());
        assert_eq!(loaded.encode("dog").unwrap(), built.encode("dog").unwrap());
    }
}
