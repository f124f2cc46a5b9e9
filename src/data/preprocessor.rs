// ============================================================
// Layer 4 — Sentence Preprocessor
// ============================================================
// Cleans one line of a corpus file before tokenisation.
//
// Corpus files are line-aligned: line i of the source file is
// the translation of line i of the target file. Cleaning must
// therefore never merge or split lines, it only normalises the
// whitespace inside a sentence:
//
//   1. Unicode whitespace variants (NBSP, zero-width space, BOM)
//      and tabs become a plain space
//   2. Control characters become a space
//   3. Runs of spaces collapse into one
//   4. Leading/trailing spaces are trimmed
//
// Reference: Rust Book §8 (Strings in Rust)

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Clean a single sentence.
    pub fn clean(&self, line: &str) -> String {
        let mut out        = String::with_capacity(line.len());
        let mut last_space = true;

        for c in line.chars() {
            let c = match c {
                '\t' | '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() => ' ',
                c => c,
            };
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }

        if out.ends_with(' ') {
            out.pop();
        }
        out
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_multiple_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("hello   world"), "hello world");
    }

    #[test]
    fn test_trims_edges() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("  hello world \r"), "hello world");
    }

    #[test]
    fn test_unicode_spaces_and_control_chars() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("a\u{00A0}b\tc\x01d\u{FEFF}"), "a b c d");
    }

    #[test]
    fn test_empty_string() {
        let p = Preprocessor::new();
        assert_eq!(p.clean(""), "");
        assert_eq!(p.clean("   "), "");
    }
}
