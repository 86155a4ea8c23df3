//! Token classification and conversion helpers shared by the stages

use super::{Kv, SourceRange, Syntax, TagToken, Token};
use once_cell::sync::Lazy;
use regex::Regex;

/// HTML elements that start a block context.
pub const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "caption", "center", "dd", "details", "div",
    "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4",
    "h5", "h6", "header", "hgroup", "hr", "li", "main", "menu", "nav", "ol", "p", "pre",
    "section", "summary", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Inline formatting elements.
pub const FORMATTING_TAGS: &[&str] = &[
    "a", "b", "big", "code", "em", "font", "i", "nobr", "s", "small", "strike", "strong", "tt",
    "u",
];

pub const TABLE_TAGS: &[&str] = &["table", "tbody", "caption", "tr", "td", "th"];

static ENCAPSULATION_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(mw:(?:Transclusion|Param|LanguageVariant|Extension/[^\s]+|Includes/[^\s]+)(?:/End)?)(?:\s|$)")
        .expect("valid encapsulation regex")
});

pub fn is_block_tag_name(name: &str) -> bool {
    BLOCK_TAGS.contains(&name.to_ascii_lowercase().as_str())
}

pub fn is_block_tag(token: &Token) -> bool {
    token.name().map(is_block_tag_name).unwrap_or(false)
}

pub fn is_formatting_tag_name(name: &str) -> bool {
    FORMATTING_TAGS.contains(&name)
}

pub fn is_table_tag(token: &Token) -> bool {
    token.name().map(|n| TABLE_TAGS.contains(&n)).unwrap_or(false)
}

/// True for tags written as literal HTML in the source.
pub fn is_html_tag(token: &Token) -> bool {
    token
        .data()
        .map(|d| d.stx == Some(Syntax::Html))
        .unwrap_or(false)
}

pub fn is_template_token(token: &Token) -> bool {
    matches!(token.name(), Some("template") | Some("templatearg"))
}

/// Typeof value of a wrapper marker meta (`mw:Transclusion`,
/// `mw:Param/End`, ...).
pub fn encapsulation_type(tag: &TagToken) -> Option<String> {
    let ty = tag.attribute_string("typeof")?;
    ENCAPSULATION_TYPE
        .captures(&ty)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// A wrapper start marker (not an end marker).
pub fn is_encapsulation_start(token: &Token) -> bool {
    match token {
        Token::SelfClosingTag(t) if t.name == "meta" => encapsulation_type(t)
            .map(|ty| !ty.ends_with("/End"))
            .unwrap_or(false),
        _ => false,
    }
}

pub fn is_encapsulation_end(token: &Token) -> bool {
    match token {
        Token::SelfClosingTag(t) if t.name == "meta" => encapsulation_type(t)
            .map(|ty| ty.ends_with("/End"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Start and end wrapper markers for an encapsulated construct. The start
/// marker carries the construct's tsr and source; the end marker only its
/// end offset.
pub fn wrapper_markers(
    ty: &str,
    about: &str,
    tsr: Option<SourceRange>,
    src: Option<String>,
) -> (Token, Token) {
    let mut start = TagToken::with_attribs(
        "meta",
        vec![Kv::new("typeof", ty), Kv::new("about", about)],
    );
    start.data.tsr = tsr;
    start.data.src = src;
    let mut end = TagToken::with_attribs(
        "meta",
        vec![Kv::new("typeof", format!("{}/End", ty)), Kv::new("about", about)],
    );
    end.data.tsr_end = tsr.map(|r| r.end);
    (Token::SelfClosingTag(start), Token::SelfClosingTag(end))
}

/// Tokens that do not change start-of-line status: whitespace-only text,
/// comments, category links and non-HTML metas (behaviour switches,
/// wrapper markers).
pub fn is_sol_transparent(token: &Token) -> bool {
    match token {
        Token::Text(s) => s.chars().all(|c| c == ' ' || c == '\t'),
        Token::Comment { .. } => true,
        Token::SelfClosingTag(t) if t.name == "meta" => t.data.stx != Some(Syntax::Html),
        Token::SelfClosingTag(t) if t.name == "wikilink" => t
            .attribute_string("href")
            .map(|h| h.to_ascii_lowercase().starts_with("category:"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Flatten tokens to text. Newlines are kept only with `retain_newlines`;
/// tags and comments are dropped.
pub fn tokens_to_string_with(tokens: &[Token], retain_newlines: bool) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(s) => out.push_str(s),
            Token::Newline { .. } if retain_newlines => out.push('\n'),
            _ => {}
        }
    }
    out
}

pub fn tokens_to_string(tokens: &[Token]) -> String {
    tokens_to_string_with(tokens, false)
}

/// Flatten a token list that must consist of text only. On failure returns
/// the index of the first token that is not plain text.
pub fn tokens_to_string_strict(tokens: &[Token]) -> Result<String, usize> {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Text(s) => out.push_str(s),
            Token::Comment { .. } => {}
            _ => return Err(i),
        }
    }
    Ok(out)
}

/// Trim whitespace off both ends of a token list, looking through text
/// tokens that trim to nothing.
pub fn trim_tokens(mut tokens: Vec<Token>) -> Vec<Token> {
    while let Some(Token::Text(s)) = tokens.first_mut() {
        *s = s.trim_start().to_string();
        if !s.is_empty() {
            break;
        }
        tokens.remove(0);
    }
    while let Some(Token::Text(s)) = tokens.last_mut() {
        *s = s.trim_end().to_string();
        if !s.is_empty() {
            break;
        }
        tokens.pop();
    }
    tokens
}

/// Shift every tsr in `tokens` (including nested attribute tokens) by `delta`.
pub fn shift_tsr(tokens: &mut [Token], delta: usize) {
    if delta == 0 {
        return;
    }
    for token in tokens.iter_mut() {
        if let Some(tsr) = token.tsr() {
            token.set_tsr(Some(tsr.shifted(delta)));
        }
        if let Some(tag) = token.tag_mut() {
            if let Some(end) = tag.data.tsr_end.as_mut() {
                *end += delta;
            }
            for kv in tag.attribs.iter_mut() {
                kv.shift_offsets(delta);
                for value in [&mut kv.k, &mut kv.v] {
                    if let super::KvValue::Tokens(nested) = value {
                        shift_tsr(nested, delta);
                    }
                }
            }
        }
    }
}

/// Drop every source range; used for content that did not come from the
/// top-level source.
pub fn strip_tsr(tokens: &mut [Token]) {
    for token in tokens.iter_mut() {
        token.set_tsr(None);
        if let Some(tag) = token.tag_mut() {
            tag.data.tsr_end = None;
            for kv in tag.attribs.iter_mut() {
                kv.src_offsets = None;
                for value in [&mut kv.k, &mut kv.v] {
                    if let super::KvValue::Tokens(nested) = value {
                        strip_tsr(nested);
                    }
                }
            }
        }
    }
}

/// Collect every tsr in `tokens`, nested attribute tokens included.
pub fn collect_tsrs(tokens: &[Token], out: &mut Vec<SourceRange>) {
    for token in tokens {
        if let Some(tsr) = token.tsr() {
            out.push(tsr);
        }
        if let Some(tag) = token.tag() {
            for kv in &tag.attribs {
                for value in [&kv.k, &kv.v] {
                    if let super::KvValue::Tokens(nested) = value {
                        collect_tsrs(nested, out);
                    }
                }
            }
        }
    }
}

pub fn count_eof(tokens: &[Token]) -> usize {
    tokens.iter().filter(|t| t.is_eof()).count()
}

/// Merge adjacent text tokens.
pub fn normalize_text(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Token::Text(s) = &token {
            if s.is_empty() {
                continue;
            }
            if let Some(Token::Text(prev)) = out.last_mut() {
                prev.push_str(s);
                continue;
            }
        }
        out.push(token);
    }
    out
}

/// One-line-per-construct rendering used by the CLI and snapshot tests:
/// `<p>`, `</p>`, `<meta typeof="mw:Transclusion"/>`, text verbatim,
/// newlines as `\n` line breaks, `<!--c-->` and `<EOF>`.
pub fn to_compact_string(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::StartTag(t) => {
                out.push('<');
                push_tag_body(&mut out, t);
                out.push('>');
            }
            Token::EndTag(t) => {
                out.push_str("</");
                out.push_str(&t.name);
                out.push('>');
            }
            Token::SelfClosingTag(t) => {
                out.push('<');
                push_tag_body(&mut out, t);
                out.push_str("/>");
            }
            Token::Text(s) => out.push_str(s),
            Token::Newline { .. } => out.push('\n'),
            Token::Comment { value, .. } => {
                out.push_str("<!--");
                out.push_str(value);
                out.push_str("-->");
            }
            Token::EndOfInput => out.push_str("<EOF>"),
        }
    }
    out
}

fn push_tag_body(out: &mut String, tag: &TagToken) {
    out.push_str(&tag.name);
    for kv in &tag.attribs {
        out.push(' ');
        push_value(out, &kv.k);
        if !kv.v.is_empty() {
            out.push('=');
            out.push('"');
            push_value(out, &kv.v);
            out.push('"');
        }
    }
}

fn push_value(out: &mut String, value: &super::KvValue) {
    match value {
        super::KvValue::Str(s) => out.push_str(s),
        super::KvValue::Tokens(toks) => {
            out.push('[');
            out.push_str(&to_compact_string(toks));
            out.push(']');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::token::KvValue;

    #[test]
    fn test_sol_transparency() {
        assert!(is_sol_transparent(&Token::text("  \t")));
        assert!(!is_sol_transparent(&Token::text(" a")));
        assert!(is_sol_transparent(&Token::comment("x", None)));
        assert!(is_sol_transparent(
            &Token::self_closing("meta").with_attr("property", "mw:PageProp/notoc")
        ));
        assert!(is_sol_transparent(
            &Token::self_closing("wikilink").with_attr("href", "Category:Foo")
        ));
        assert!(!is_sol_transparent(
            &Token::self_closing("wikilink").with_attr("href", ":Category:Foo")
        ));
        assert!(!is_sol_transparent(&Token::start_tag("b")));
    }

    #[test]
    fn test_encapsulation_markers() {
        let start = Token::self_closing("meta").with_attr("typeof", "mw:Transclusion");
        let end = Token::self_closing("meta").with_attr("typeof", "mw:Transclusion/End");
        let ext = Token::self_closing("meta").with_attr("typeof", "mw:Extension/nowiki");
        let other = Token::self_closing("meta").with_attr("typeof", "mw:Placeholder");
        assert!(is_encapsulation_start(&start));
        assert!(is_encapsulation_end(&end));
        assert!(!is_encapsulation_start(&end));
        assert!(is_encapsulation_start(&ext));
        assert!(!is_encapsulation_start(&other));
    }

    #[test]
    fn test_wrapper_markers_pair_up() {
        let (start, end) = wrapper_markers(
            "mw:Extension/nowiki",
            "#mwt3",
            Some(SourceRange::new(4, 20)),
            Some("<nowiki>x</nowiki>".into()),
        );
        assert!(is_encapsulation_start(&start));
        assert!(is_encapsulation_end(&end));
        assert_eq!(start.tsr(), Some(SourceRange::new(4, 20)));
        assert_eq!(end.tsr(), None);
        assert_eq!(end.data().and_then(|d| d.tsr_end), Some(20));
        assert_eq!(end.attribute_string("about").as_deref(), Some("#mwt3"));
    }

    #[test]
    fn test_tokens_to_string() {
        let toks = vec![
            Token::text("a"),
            Token::newline(None),
            Token::start_tag("b"),
            Token::comment("c", None),
            Token::text("d"),
        ];
        assert_eq!(tokens_to_string(&toks), "ad");
        assert_eq!(tokens_to_string_with(&toks, true), "a\nd");
        assert_eq!(tokens_to_string_strict(&toks), Err(1));
    }

    #[test]
    fn test_shift_tsr_reaches_attributes() {
        let mut toks = vec![Token::SelfClosingTag(TagToken::with_attribs(
            "template",
            vec![Kv::new(
                KvValue::Tokens(vec![Token::start_tag("b").at(2, 5)]),
                "",
            )
            .with_offsets([2, 5, 5, 5])],
        ))
        .at(0, 7)];
        shift_tsr(&mut toks, 10);
        let mut all = Vec::new();
        collect_tsrs(&toks, &mut all);
        assert_eq!(all, vec![SourceRange::new(10, 17), SourceRange::new(12, 15)]);
        assert_eq!(
            toks[0].tag().unwrap().attribs[0].src_offsets,
            Some([12, 15, 15, 15])
        );
    }

    #[test]
    fn test_compact_rendering() {
        let toks = vec![
            Token::start_tag("p").with_attr("class", "x"),
            Token::text("a"),
            Token::self_closing("br"),
            Token::end_tag("p"),
            Token::newline(None),
            Token::EndOfInput,
        ];
        assert_eq!(to_compact_string(&toks), "<p class=\"x\">a<br/></p>\n<EOF>");
    }

    #[test]
    fn test_normalize_text() {
        let toks = normalize_text(vec![
            Token::text("a"),
            Token::text(""),
            Token::text("b"),
            Token::newline(None),
            Token::text("c"),
        ]);
        assert_eq!(
            toks,
            vec![Token::text("ab"), Token::newline(None), Token::text("c")]
        );
    }

    #[test]
    fn test_trim_tokens() {
        let toks = trim_tokens(vec![
            Token::text("  "),
            Token::text(" a "),
            Token::start_tag("b"),
            Token::text(" \n"),
        ]);
        assert_eq!(toks, vec![Token::text("a "), Token::start_tag("b")]);
    }
}
