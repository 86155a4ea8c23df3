//! Attribute list parsing
//!
//! HTML-ish attribute lists (`class="a" id=b {{tpl}}`) are lexed with logos
//! and parsed with chumsky into key/value source ranges. Keys or values that
//! contain wiki markup are handed back to the scanner for tokenization, so
//! templated attributes arrive as token sequences.
//!
//! Grammar: `<list> = <junk>* (<attr> <junk>*)*`
//! Where: `<attr> = <word>+ (<ws>? "=" <ws>? (<quoted> | <word>+))?`

use crate::wikitext::token::{Kv, KvValue};
use chumsky::{prelude::*, Stream};
use logos::Logos;
use std::ops::Range;

#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum AttrToken {
    #[regex(r"\{\{[^{}]*\}\}", priority = 5)]
    Template,

    #[regex(r#"[^\s=<>"'{}]+"#)]
    Word,

    #[token("=")]
    Equals,

    #[regex(r"\s+")]
    Space,

    #[regex(r#""[^"]*""#)]
    DoubleQuoted,

    #[regex(r"'[^']*'")]
    SingleQuoted,

    #[regex(r"[{}<>]")]
    Stray,
}

type Lexeme = (AttrToken, Range<usize>);
type ParserError = Simple<Lexeme>;

/// Key and optional value ranges, relative to the attribute text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawAttribute {
    pub(crate) key: Range<usize>,
    pub(crate) value: Option<Range<usize>>,
}

pub(crate) fn lex(text: &str) -> Vec<Lexeme> {
    let mut lexer = AttrToken::lexer(text);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        // Unterminated quotes and the like are kept as junk.
        let token = result.unwrap_or(AttrToken::Stray);
        tokens.push((token, lexer.span()));
    }
    tokens
}

fn join(spans: &[Range<usize>]) -> Range<usize> {
    let start = spans.first().map(|r| r.start).unwrap_or(0);
    let end = spans.last().map(|r| r.end).unwrap_or(start);
    start..end
}

fn attribute_list() -> impl Parser<Lexeme, Vec<RawAttribute>, Error = ParserError> {
    let word = filter::<Lexeme, _, ParserError>(|(token, _): &Lexeme| {
        matches!(token, AttrToken::Word | AttrToken::Template)
    })
    .map(|(_, span): Lexeme| span)
    .repeated()
    .at_least(1)
    .map(|spans: Vec<Range<usize>>| join(&spans));

    let space = filter::<Lexeme, _, ParserError>(|(token, _): &Lexeme| {
        matches!(token, AttrToken::Space)
    })
    .ignored();

    let equals = filter::<Lexeme, _, ParserError>(|(token, _): &Lexeme| {
        matches!(token, AttrToken::Equals)
    })
    .ignored();

    let quoted = filter::<Lexeme, _, ParserError>(|(token, _): &Lexeme| {
        matches!(token, AttrToken::DoubleQuoted | AttrToken::SingleQuoted)
    })
    .map(|(_, span): Lexeme| span.start + 1..span.end - 1);

    let value = space
        .clone()
        .or_not()
        .ignore_then(equals)
        .ignore_then(space.or_not())
        .ignore_then(quoted.or(word.clone()));

    let attribute = word
        .then(value.or_not())
        .map(|(key, value)| RawAttribute { key, value });

    let junk = filter::<Lexeme, _, ParserError>(|(token, _): &Lexeme| {
        !matches!(token, AttrToken::Word | AttrToken::Template)
    })
    .ignored();

    junk.clone()
        .repeated()
        .ignore_then(attribute.then_ignore(junk.repeated()).repeated())
        .then_ignore(end())
}

/// Parse `text` into raw attribute ranges. Unparseable input yields no
/// attributes.
pub(crate) fn parse(text: &str) -> Vec<RawAttribute> {
    let lexemes = lex(text);
    if lexemes.is_empty() {
        return Vec::new();
    }
    let len = text.len();
    let stream = Stream::from_iter(
        len..len,
        lexemes
            .into_iter()
            .map(|(token, span)| ((token, span.clone()), span)),
    );
    attribute_list().parse(stream).unwrap_or_default()
}

/// Build attributes for `text`, which starts at absolute offset `offset`.
/// `value_of` turns a relative range into an attribute value.
pub(crate) fn to_kvs(
    text: &str,
    offset: usize,
    value_of: &dyn Fn(Range<usize>) -> KvValue,
) -> Vec<Kv> {
    parse(text)
        .into_iter()
        .map(|raw| {
            let value_range = raw.value.clone().unwrap_or(raw.key.end..raw.key.end);
            let v = if raw.value.is_some() {
                value_of(value_range.clone())
            } else {
                KvValue::default()
            };
            let mut kv = Kv::new(value_of(raw.key.clone()), v).with_offsets([
                offset + raw.key.start,
                offset + raw.key.end,
                offset + value_range.start,
                offset + value_range.end,
            ]);
            kv.ksrc = Some(text[raw.key.clone()].to_string());
            kv.vsrc = Some(text[value_range].to_string());
            kv
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<(String, Option<String>)> {
        parse(input)
            .into_iter()
            .map(|a| {
                (
                    input[a.key].to_string(),
                    a.value.map(|v| input[v].to_string()),
                )
            })
            .collect()
    }

    #[test]
    fn test_lex_basic() {
        let kinds: Vec<AttrToken> = lex("a=\"b c\"").into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![AttrToken::Word, AttrToken::Equals, AttrToken::DoubleQuoted]
        );
    }

    #[test]
    fn test_parse_quoted_unquoted_and_bare() {
        assert_eq!(
            texts(r#" class="a b" id=x disabled title='t' "#),
            vec![
                ("class".into(), Some("a b".into())),
                ("id".into(), Some("x".into())),
                ("disabled".into(), None),
                ("title".into(), Some("t".into())),
            ]
        );
    }

    #[test]
    fn test_spaces_around_equals() {
        assert_eq!(texts("a = b"), vec![("a".into(), Some("b".into()))]);
    }

    #[test]
    fn test_template_key_is_one_word() {
        assert_eq!(
            texts("{{echo|class=x}} id=y"),
            vec![
                ("{{echo|class=x}}".into(), None),
                ("id".into(), Some("y".into())),
            ]
        );
    }

    #[test]
    fn test_junk_is_skipped() {
        assert_eq!(texts("= < a=1"), vec![("a".into(), Some("1".into()))]);
        assert!(texts("").is_empty());
    }

    #[test]
    fn test_offsets_are_absolute() {
        let kvs = to_kvs("id=\"x\"", 10, &|r| KvValue::Str("id=\"x\""[r].to_string()));
        assert_eq!(kvs[0].src_offsets, Some([10, 12, 14, 15]));
        assert_eq!(kvs[0].value_text(), "x");
    }
}
