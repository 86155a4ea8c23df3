//! Attribute key/value pairs

use super::utils::tokens_to_string;
use super::Token;
use serde::{Deserialize, Serialize};

/// Key or value of an attribute: plain text, or a token sequence still
/// awaiting expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KvValue {
    Str(String),
    Tokens(Vec<Token>),
}

impl KvValue {
    /// Borrow the text of a plain value. A token sequence made of a single
    /// text token counts as plain.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KvValue::Str(s) => Some(s),
            KvValue::Tokens(toks) => match toks.as_slice() {
                [Token::Text(s)] => Some(s),
                _ => None,
            },
        }
    }

    /// Flatten to text, dropping any markup.
    pub fn to_text(&self) -> String {
        match self {
            KvValue::Str(s) => s.clone(),
            KvValue::Tokens(toks) => tokens_to_string(toks),
        }
    }

    /// View the value as a token sequence.
    pub fn to_tokens(&self) -> Vec<Token> {
        match self {
            KvValue::Str(s) if s.is_empty() => Vec::new(),
            KvValue::Str(s) => vec![Token::Text(s.clone())],
            KvValue::Tokens(toks) => toks.clone(),
        }
    }

    /// True when the value holds anything other than text.
    pub fn needs_expansion(&self) -> bool {
        match self {
            KvValue::Str(_) => false,
            KvValue::Tokens(toks) => toks.iter().any(|t| t.as_text().is_none()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            KvValue::Str(s) => s.is_empty(),
            KvValue::Tokens(toks) => toks.is_empty(),
        }
    }
}

impl Default for KvValue {
    fn default() -> Self {
        KvValue::Str(String::new())
    }
}

impl From<&str> for KvValue {
    fn from(s: &str) -> Self {
        KvValue::Str(s.to_string())
    }
}

impl From<String> for KvValue {
    fn from(s: String) -> Self {
        KvValue::Str(s)
    }
}

impl From<Vec<Token>> for KvValue {
    fn from(toks: Vec<Token>) -> Self {
        KvValue::Tokens(toks)
    }
}

/// One attribute. `src_offsets` holds `[key start, key end, value start,
/// value end]` into the top-level source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Kv {
    pub k: KvValue,
    pub v: KvValue,
    #[serde(default, rename = "srcOffsets", skip_serializing_if = "Option::is_none")]
    pub src_offsets: Option<[usize; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ksrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsrc: Option<String>,
}

impl Kv {
    pub fn new(k: impl Into<KvValue>, v: impl Into<KvValue>) -> Self {
        Kv {
            k: k.into(),
            v: v.into(),
            ..Default::default()
        }
    }

    pub fn with_offsets(mut self, offsets: [usize; 4]) -> Self {
        self.src_offsets = Some(offsets);
        self
    }

    pub fn key_text(&self) -> String {
        self.k.to_text()
    }

    pub fn value_text(&self) -> String {
        self.v.to_text()
    }

    /// Shift all source offsets by `delta`.
    pub fn shift_offsets(&mut self, delta: usize) {
        if let Some(offs) = self.src_offsets.as_mut() {
            for o in offs.iter_mut() {
                *o += delta;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_token_values() {
        let plain = KvValue::from("x");
        assert_eq!(plain.as_str(), Some("x"));
        assert!(!plain.needs_expansion());

        let single = KvValue::Tokens(vec![Token::text("y")]);
        assert_eq!(single.as_str(), Some("y"));
        assert!(!single.needs_expansion());

        let tpl = KvValue::Tokens(vec![Token::text("a"), Token::self_closing("template")]);
        assert_eq!(tpl.as_str(), None);
        assert!(tpl.needs_expansion());
        assert_eq!(tpl.to_text(), "a");
    }

    #[test]
    fn test_shift_offsets() {
        let mut kv = Kv::new("a", "b").with_offsets([0, 1, 2, 3]);
        kv.shift_offsets(10);
        assert_eq!(kv.src_offsets, Some([10, 11, 12, 13]));
    }
}
