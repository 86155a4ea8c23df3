//! Token model for the transformation pipeline
//!
//! The tokenizer produces a flat sequence of [`Token`]s; every stage consumes
//! and produces the same type. Tag tokens carry an ordered attribute list
//! ([`Kv`]) and a round-trip metadata bag ([`DataAttribs`]) whose source
//! ranges always index the original top-level source.
//!
//! # Design
//!
//! Tokens are plain values. A stage owns whatever token it currently holds and
//! hands ownership on through its return value. Per-run scratch data that
//! must never be serialized lives in a side-table keyed by [`TokenId`] (see
//! [`crate::wikitext::env::ScratchTable`]); clones keep their id so scratch
//! entries follow a token through buffering stages.

pub mod kv;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub use kv::{Kv, KvValue};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a tag token, used to key scratch data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl TokenId {
    pub fn fresh() -> Self {
        TokenId(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Half-open byte range into the top-level source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
}

impl SourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        SourceRange { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the range by `delta`, as done when a nested tokenization is
    /// spliced back into its parent source.
    pub fn shifted(&self, delta: usize) -> Self {
        SourceRange::new(self.start + delta, self.end + delta)
    }

    pub fn slice<'a>(&self, source: &'a str) -> Option<&'a str> {
        source.get(self.start..self.end)
    }
}

/// Which surface syntax produced a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    /// Literal HTML tag in the source (`<td>` rather than `|`)
    Html,
    /// Same-line continuation (`;term:definition`, `||`, `!!`)
    Row,
    /// Piped link or argument form
    Piped,
}

/// Round-trip metadata attached to tag tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAttribs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsr: Option<SourceRange>,
    /// End offset for markers whose start is not known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsr_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stx: Option<Syntax>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_inserted_start: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_inserted_end: bool,
}

impl DataAttribs {
    pub fn with_tsr(tsr: SourceRange) -> Self {
        DataAttribs {
            tsr: Some(tsr),
            ..Default::default()
        }
    }
}

/// Name, attributes and metadata of a start, end or self-closing tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagToken {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribs: Vec<Kv>,
    #[serde(default)]
    pub data: DataAttribs,
    #[serde(skip)]
    pub id: TokenId,
}

impl PartialEq for TagToken {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.attribs == other.attribs && self.data == other.data
    }
}

impl TagToken {
    pub fn new(name: impl Into<String>) -> Self {
        TagToken {
            name: name.into(),
            attribs: Vec::new(),
            data: DataAttribs::default(),
            id: TokenId::fresh(),
        }
    }

    pub fn with_attribs(name: impl Into<String>, attribs: Vec<Kv>) -> Self {
        TagToken {
            attribs,
            ..TagToken::new(name)
        }
    }

    pub fn with_data(mut self, data: DataAttribs) -> Self {
        self.data = data;
        self
    }

    /// Value of the first attribute whose key stringifies to `key`.
    pub fn get_attribute(&self, key: &str) -> Option<&KvValue> {
        self.attribs
            .iter()
            .find(|kv| kv.k.as_str() == Some(key))
            .map(|kv| &kv.v)
    }

    /// Attribute value flattened to a string.
    pub fn attribute_string(&self, key: &str) -> Option<String> {
        self.get_attribute(key).map(KvValue::to_text)
    }

    /// Replace the value of `key` or append a new attribute.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<KvValue>) {
        let value = value.into();
        match self.attribs.iter_mut().find(|kv| kv.k.as_str() == Some(key)) {
            Some(kv) => kv.v = value,
            None => self.attribs.push(Kv::new(key, value)),
        }
    }

    /// Append an attribute unconditionally.
    pub fn add_attribute(&mut self, key: &str, value: impl Into<KvValue>) {
        self.attribs.push(Kv::new(key, value));
    }

    /// Add `value` to a space separated attribute such as `typeof`.
    pub fn add_space_separated_attribute(&mut self, key: &str, value: &str) {
        match self.attribute_string(key) {
            Some(existing) if !existing.is_empty() => {
                if !existing.split(' ').any(|v| v == value) {
                    self.set_attribute(key, format!("{} {}", existing, value));
                }
            }
            _ => self.set_attribute(key, value.to_string()),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) {
        self.attribs.retain(|kv| kv.k.as_str() != Some(key));
    }

    pub fn has_typeof(&self, ty: &str) -> bool {
        self.attribute_string("typeof")
            .map(|t| t.split_whitespace().any(|v| v == ty))
            .unwrap_or(false)
    }
}

/// A single lexical or structural token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    StartTag(TagToken),
    EndTag(TagToken),
    SelfClosingTag(TagToken),
    Text(String),
    Newline {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tsr: Option<SourceRange>,
    },
    Comment {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tsr: Option<SourceRange>,
    },
    EndOfInput,
}

impl Token {
    pub fn start_tag(name: impl Into<String>) -> Self {
        Token::StartTag(TagToken::new(name))
    }

    pub fn end_tag(name: impl Into<String>) -> Self {
        Token::EndTag(TagToken::new(name))
    }

    pub fn self_closing(name: impl Into<String>) -> Self {
        Token::SelfClosingTag(TagToken::new(name))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Token::Text(value.into())
    }

    pub fn newline(tsr: Option<SourceRange>) -> Self {
        Token::Newline { tsr }
    }

    pub fn comment(value: impl Into<String>, tsr: Option<SourceRange>) -> Self {
        Token::Comment {
            value: value.into(),
            tsr,
        }
    }

    pub fn tag(&self) -> Option<&TagToken> {
        match self {
            Token::StartTag(t) | Token::EndTag(t) | Token::SelfClosingTag(t) => Some(t),
            _ => None,
        }
    }

    pub fn tag_mut(&mut self) -> Option<&mut TagToken> {
        match self {
            Token::StartTag(t) | Token::EndTag(t) | Token::SelfClosingTag(t) => Some(t),
            _ => None,
        }
    }

    /// Tag name, or `None` for non-tag tokens.
    pub fn name(&self) -> Option<&str> {
        self.tag().map(|t| t.name.as_str())
    }

    pub fn is_start_tag(&self) -> bool {
        matches!(self, Token::StartTag(_))
    }

    pub fn is_end_tag(&self) -> bool {
        matches!(self, Token::EndTag(_))
    }

    pub fn is_self_closing(&self) -> bool {
        matches!(self, Token::SelfClosingTag(_))
    }

    pub fn is_newline(&self) -> bool {
        matches!(self, Token::Newline { .. })
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Token::EndOfInput)
    }

    pub fn is_start_tag_named(&self, name: &str) -> bool {
        matches!(self, Token::StartTag(t) if t.name == name)
    }

    pub fn is_end_tag_named(&self, name: &str) -> bool {
        matches!(self, Token::EndTag(t) if t.name == name)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Token::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn tsr(&self) -> Option<SourceRange> {
        match self {
            Token::StartTag(t) | Token::EndTag(t) | Token::SelfClosingTag(t) => t.data.tsr,
            Token::Newline { tsr } | Token::Comment { tsr, .. } => *tsr,
            _ => None,
        }
    }

    pub fn set_tsr(&mut self, range: Option<SourceRange>) {
        match self {
            Token::StartTag(t) | Token::EndTag(t) | Token::SelfClosingTag(t) => t.data.tsr = range,
            Token::Newline { tsr } | Token::Comment { tsr, .. } => *tsr = range,
            _ => {}
        }
    }

    pub fn data(&self) -> Option<&DataAttribs> {
        self.tag().map(|t| &t.data)
    }

    pub fn data_mut(&mut self) -> Option<&mut DataAttribs> {
        self.tag_mut().map(|t| &mut t.data)
    }

    pub fn id(&self) -> Option<TokenId> {
        self.tag().map(|t| t.id)
    }

    pub fn attribute_string(&self, key: &str) -> Option<String> {
        self.tag().and_then(|t| t.attribute_string(key))
    }

    /// Builder-style helper: set the tsr and return the token.
    pub fn at(mut self, start: usize, end: usize) -> Self {
        self.set_tsr(Some(SourceRange::new(start, end)));
        self
    }

    /// Builder-style helper: append an attribute and return the token.
    pub fn with_attr(mut self, key: &str, value: impl Into<KvValue>) -> Self {
        if let Some(t) = self.tag_mut() {
            t.add_attribute(key, value);
        }
        self
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Text(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Text(s)
    }
}
