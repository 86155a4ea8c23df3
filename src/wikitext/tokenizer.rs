//! Wiki markup tokenizer
//!
//! The pipeline consumes tokens through the [`Tokenizer`] trait. The crate
//! ships [`WikiTokenizer`], a reference implementation covering the markup
//! the stages work on: lists, indented lines, quotes, headings, tables,
//! templates and template arguments, links, behaviour switches, comments,
//! literal HTML tags and registered extension tags. Anything it does not
//! recognise is text.
//!
//! Output contract: every tag, newline and comment token carries a source
//! range into the top-level source, and the stream ends with exactly one
//! [`Token::EndOfInput`].

mod attributes;
mod scanner;

use crate::wikitext::config::SiteConfig;
use crate::wikitext::token::{Kv, Token};
use scanner::Scanner;

pub trait Tokenizer {
    /// Tokenize `text`, which starts at `offset` in the top-level source.
    fn tokenize(&self, text: &str, offset: usize) -> Vec<Token>;

    /// Tokenize an attribute list (`class="a" id=b`).
    fn tokenize_attributes(&self, text: &str, offset: usize) -> Vec<Kv>;
}

#[derive(Debug, Clone, Default)]
pub struct WikiTokenizer {
    extension_tags: Vec<String>,
}

impl WikiTokenizer {
    pub fn new(site: &SiteConfig) -> Self {
        WikiTokenizer {
            extension_tags: site
                .extension_tags
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Tokenizer for WikiTokenizer {
    fn tokenize(&self, text: &str, offset: usize) -> Vec<Token> {
        let mut tokens = Scanner::new(text, offset, &self.extension_tags).run();
        tokens.push(Token::EndOfInput);
        tokens
    }

    fn tokenize_attributes(&self, text: &str, offset: usize) -> Vec<Kv> {
        Scanner::new(text, offset, &self.extension_tags).attribute_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::token::utils::{collect_tsrs, count_eof};
    use proptest::prelude::*;

    fn tokenizer() -> WikiTokenizer {
        WikiTokenizer::new(&SiteConfig::default())
    }

    #[test]
    fn test_single_trailing_eof() {
        let toks = tokenizer().tokenize("a\n* b", 0);
        assert_eq!(count_eof(&toks), 1);
        assert!(toks.last().unwrap().is_eof());
    }

    #[test]
    fn test_attribute_soup_keeps_templates() {
        let kvs = tokenizer().tokenize_attributes("class=\"x\" {{t}}", 5);
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[0].value_text(), "x");
        assert_eq!(kvs[0].src_offsets, Some([5, 10, 12, 13]));
        assert!(kvs[1].k.needs_expansion());
    }

    proptest! {
        #[test]
        fn prop_tsr_within_source(src in "[a-z '*#:;={}|\\[\\]<>!\n-]{0,60}") {
            let toks = tokenizer().tokenize(&src, 0);
            prop_assert_eq!(count_eof(&toks), 1);
            let mut ranges = Vec::new();
            collect_tsrs(&toks, &mut ranges);
            for r in ranges {
                prop_assert!(r.start <= r.end && r.end <= src.len(), "{:?} in {:?}", r, src);
            }
        }
    }
}
