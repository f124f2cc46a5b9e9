// ============================================================
// Layer 4 — Output Text Filters
// ============================================================
// Post-processing applied to decoded hypotheses before they are
// written out, configured as a comma list in `data.filters`:
//
//   bpe   "new@@ york" → "newyork"      (subword-nmt joiners)
//   spm   "▁new ▁york" → "new york"     (sentencepiece pieces)
//
// Filters run left to right. `--disable-filters` bypasses the
// whole chain.

use std::str::FromStr;

use crate::domain::error::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFilter {
    Bpe,
    SentencePiece,
}

impl TextFilter {
    pub fn apply(&self, text: &str) -> String {
        match self {
            TextFilter::Bpe => {
                let joined = text.replace("@@ ", "");
                joined.strip_suffix("@@").unwrap_or(&joined).to_string()
            }
            TextFilter::SentencePiece => text
                .replace(' ', "")
                .replace('\u{2581}', " ")
                .trim()
                .to_string(),
        }
    }
}

impl FromStr for TextFilter {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "bpe" | "de-bpe" => Ok(TextFilter::Bpe),
            "spm" | "de-spm" => Ok(TextFilter::SentencePiece),
            other => Err(RunnerError::config(format!("unknown output filter '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    filters: Vec<TextFilter>,
}

impl FilterChain {
    /// Parse a comma-separated list; the empty string is an empty chain.
    pub fn parse(spec: &str) -> Result<Self, RunnerError> {
        let filters = spec
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        self.filters
            .iter()
            .fold(text.to_string(), |acc, f| f.apply(&acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpe_joins_subwords() {
        assert_eq!(TextFilter::Bpe.apply("the new@@ york@@ er came"), "the newyorker came");
        assert_eq!(TextFilter::Bpe.apply("trailing@@"), "trailing");
    }

    #[test]
    fn test_sentencepiece_restores_spaces() {
        assert_eq!(TextFilter::SentencePiece.apply("▁new ▁yor k ▁city"), "new york city");
    }

    #[test]
    fn test_chain_parsing_and_order() {
        assert!(FilterChain::parse("").unwrap().is_empty());
        assert!(FilterChain::parse("bpe,unknown").is_err());
        let chain = FilterChain::parse("bpe, spm").unwrap();
        assert_eq!(chain.apply("▁ne@@ w ▁york"), "new york");
    }
}
