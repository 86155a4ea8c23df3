//! Hand-written scanner for the wiki markup subset the stages consume
//!
//! The scanner walks the source once, emitting tokens with source ranges
//! relative to the pipeline's top-level source (`base` + local offset).
//! Nested constructs (template parameters, link targets, headings) are
//! scanned by sub-scanners bounded to their byte range, so every offset
//! stays absolute.

use super::attributes;
use crate::wikitext::token::{DataAttribs, Kv, KvValue, SourceRange, Syntax, TagToken, Token};
use std::ops::Range;

/// Literal HTML tags recognised in the source.
const HTML_TAGS: &[&str] = &[
    "abbr", "b", "bdi", "bdo", "big", "blockquote", "br", "caption", "center", "cite", "code",
    "dd", "del", "dfn", "div", "dl", "dt", "em", "font", "h1", "h2", "h3", "h4", "h5", "h6",
    "hr", "i", "ins", "kbd", "li", "mark", "ol", "p", "pre", "q", "rb", "rp", "rt", "ruby", "s",
    "samp", "small", "span", "strike", "strong", "sub", "sup", "table", "td", "th", "tr", "tt",
    "u", "ul", "var", "wbr",
];

const VOID_TAGS: &[&str] = &["br", "hr", "wbr"];

/// End of a construct opened just before `p` and closed by `close`,
/// skipping nested templates, arguments, links and comments.
fn skip_nested(src: &str, mut p: usize, bound: usize, close: &str) -> Option<usize> {
    while p < bound {
        let rest = &src[p..bound];
        if rest.starts_with("<!--") {
            p = rest.find("-->").map(|i| p + i + 3).unwrap_or(bound);
            continue;
        }
        if rest.starts_with(close) {
            return Some(p + close.len());
        }
        let nested = if rest.starts_with("{{{") {
            skip_nested(src, p + 3, bound, "}}}")
                .or_else(|| skip_nested(src, p + 2, bound, "}}"))
        } else if rest.starts_with("{{") {
            skip_nested(src, p + 2, bound, "}}")
        } else if rest.starts_with("[[") {
            skip_nested(src, p + 2, bound, "]]")
        } else {
            None
        };
        p = match nested {
            Some(end) => end,
            None => p + rest.chars().next().map(char::len_utf8).unwrap_or(1),
        };
    }
    None
}

/// Positions of `needle` in `[start, end)` outside nested constructs.
fn top_level_positions(src: &str, start: usize, end: usize, needle: char) -> Vec<usize> {
    let mut out = Vec::new();
    let mut p = start;
    while p < end {
        let rest = &src[p..end];
        if rest.starts_with("<!--") {
            p = rest.find("-->").map(|i| p + i + 3).unwrap_or(end);
            continue;
        }
        let nested = if rest.starts_with("{{{") {
            skip_nested(src, p + 3, end, "}}}").or_else(|| skip_nested(src, p + 2, end, "}}"))
        } else if rest.starts_with("{{") {
            skip_nested(src, p + 2, end, "}}")
        } else if rest.starts_with("[[") {
            skip_nested(src, p + 2, end, "]]")
        } else {
            None
        };
        if let Some(e) = nested {
            p = e;
            continue;
        }
        let c = rest.chars().next().unwrap_or(needle);
        if c == needle {
            out.push(p);
        }
        p += c.len_utf8();
    }
    out
}

fn split_top_level(src: &str, start: usize, end: usize, sep: char) -> Vec<Range<usize>> {
    let mut parts = Vec::new();
    let mut from = start;
    for pos in top_level_positions(src, start, end, sep) {
        parts.push(from..pos);
        from = pos + sep.len_utf8();
    }
    parts.push(from..end);
    parts
}

pub(crate) struct Scanner<'a> {
    src: &'a str,
    base: usize,
    pos: usize,
    end: usize,
    out: Vec<Token>,
    text: String,
    sol: bool,
    /// Bullets of the current line when it is a `;` definition line
    dt_bullets: Option<String>,
    table_depth: usize,
    th_line: bool,
    ext_tags: &'a [String],
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(src: &'a str, base: usize, ext_tags: &'a [String]) -> Self {
        Scanner {
            src,
            base,
            pos: 0,
            end: src.len(),
            out: Vec::new(),
            text: String::new(),
            sol: true,
            dt_bullets: None,
            table_depth: 0,
            th_line: false,
            ext_tags,
        }
    }

    /// A scanner for `range` of the same source, starting mid-line.
    fn sub(&self, range: Range<usize>) -> Scanner<'a> {
        Scanner {
            src: self.src,
            base: self.base,
            pos: range.start,
            end: range.end,
            out: Vec::new(),
            text: String::new(),
            sol: false,
            dt_bullets: None,
            table_depth: 0,
            th_line: false,
            ext_tags: self.ext_tags,
        }
    }

    fn tokens_of(&self, range: Range<usize>) -> Vec<Token> {
        self.sub(range).run()
    }

    /// Attribute value for `range`: plain text when it holds no markup.
    fn value_of(&self, range: Range<usize>) -> KvValue {
        let tokens = self.tokens_of(range);
        if tokens.iter().all(|t| t.as_text().is_some()) {
            KvValue::Str(tokens.iter().filter_map(Token::as_text).collect())
        } else {
            KvValue::Tokens(tokens)
        }
    }

    fn tsr(&self, start: usize, end: usize) -> SourceRange {
        SourceRange::new(self.base + start, self.base + end)
    }

    fn data(&self, start: usize, end: usize) -> DataAttribs {
        DataAttribs::with_tsr(self.tsr(start, end))
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.out.push(Token::Text(std::mem::take(&mut self.text)));
        }
    }

    fn emit(&mut self, token: Token) {
        self.flush_text();
        self.out.push(token);
    }

    fn push_char(&mut self) {
        if let Some(c) = self.src[self.pos..self.end].chars().next() {
            self.text.push(c);
            self.pos += c.len_utf8();
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..self.end]
    }

    fn line_end(&self) -> usize {
        self.rest()
            .find('\n')
            .map(|i| self.pos + i)
            .unwrap_or(self.end)
    }

    pub(crate) fn run(mut self) -> Vec<Token> {
        while self.pos < self.end {
            if self.sol {
                self.sol = false;
                if self.line_start() {
                    continue;
                }
            }
            let rest = self.rest();
            let handled = match rest.as_bytes()[0] {
                b'\n' => {
                    let tsr = self.tsr(self.pos, self.pos + 1);
                    self.emit(Token::newline(Some(tsr)));
                    self.pos += 1;
                    self.sol = true;
                    self.dt_bullets = None;
                    self.th_line = false;
                    true
                }
                b'<' => self.comment() || self.extension_tag() || self.html_tag(),
                b'{' => self.template_arg() || self.template(),
                b'[' => self.wikilink(),
                b'\'' => self.quotes(),
                b'_' => self.behavior_switch(),
                b'|' => self.inline_cell("||", "td"),
                b'!' => self.th_line && self.inline_cell("!!", "th"),
                b':' => self.dd_row(),
                _ => false,
            };
            if !handled {
                self.push_char();
            }
        }
        self.flush_text();
        self.out
    }

    /// Constructs that only exist at the start of a line.
    fn line_start(&mut self) -> bool {
        let rest = self.rest();
        let bullets: String = rest
            .chars()
            .take_while(|c| matches!(c, '*' | '#' | ':' | ';'))
            .collect();
        if !bullets.is_empty() {
            let start = self.pos;
            let mut tag = TagToken::with_attribs(
                "listItem",
                vec![Kv::new("bullets", bullets.as_str())],
            )
            .with_data(self.data(start, start + bullets.len()));
            tag.data.src = Some(bullets.clone());
            self.emit(Token::StartTag(tag));
            self.pos += bullets.len();
            if bullets.ends_with(';') {
                self.dt_bullets = Some(bullets);
            }
            return true;
        }

        if rest.starts_with("----") {
            let len = rest.chars().take_while(|c| *c == '-').count();
            let tag = TagToken::new("hr").with_data(self.data(self.pos, self.pos + len));
            self.emit(Token::SelfClosingTag(tag));
            self.pos += len;
            return true;
        }

        if rest.starts_with('=') && self.heading() {
            return true;
        }

        self.table_line()
    }

    fn heading(&mut self) -> bool {
        let start = self.pos;
        let eol = self.line_end();
        let line = &self.src[start..eol];
        let trimmed = line.trim_end_matches([' ', '\t']);
        let lead = trimmed.chars().take_while(|c| *c == '=').count();
        let trail = trimmed.chars().rev().take_while(|c| *c == '=').count();
        let level = lead.min(trail).min(6);
        if level == 0 || trimmed.len() <= 2 * level {
            return false;
        }
        let name = format!("h{}", level);
        let close = start + trimmed.len();
        self.emit(Token::StartTag(
            TagToken::new(name.as_str()).with_data(self.data(start, start + level)),
        ));
        let inner = self.tokens_of(start + level..close - level);
        self.out.extend(inner);
        self.out.push(Token::EndTag(
            TagToken::new(name.as_str()).with_data(self.data(close - level, close)),
        ));
        if close < eol {
            self.text.push_str(&self.src[close..eol]);
        }
        self.pos = eol;
        true
    }

    fn table_line(&mut self) -> bool {
        let start = self.pos;
        let rest = self.rest();
        if rest.starts_with("{|") {
            let eol = self.line_end();
            let attribs = self.attributes(start + 2..eol);
            let tag = TagToken::with_attribs("table", attribs).with_data(self.data(start, eol));
            self.emit(Token::StartTag(tag));
            self.table_depth += 1;
            self.pos = eol;
            return true;
        }
        if self.table_depth == 0 {
            return false;
        }
        if rest.starts_with("|}") {
            self.emit(Token::EndTag(TagToken::new("table").with_data(self.data(start, start + 2))));
            self.table_depth -= 1;
            self.pos += 2;
            return true;
        }
        if rest.starts_with("|-") {
            let eol = self.line_end();
            let dashes = rest.chars().skip(1).take_while(|c| *c == '-').count();
            let attribs = self.attributes(start + 1 + dashes..eol);
            let tag = TagToken::with_attribs("tr", attribs).with_data(self.data(start, eol));
            self.emit(Token::StartTag(tag));
            self.pos = eol;
            return true;
        }
        if rest.starts_with("|+") {
            self.emit(Token::StartTag(
                TagToken::new("caption").with_data(self.data(start, start + 2)),
            ));
            self.pos += 2;
            return true;
        }
        if rest.starts_with('|') {
            self.emit(Token::StartTag(TagToken::new("td").with_data(self.data(start, start + 1))));
            self.pos += 1;
            return true;
        }
        if rest.starts_with('!') {
            self.emit(Token::StartTag(TagToken::new("th").with_data(self.data(start, start + 1))));
            self.th_line = true;
            self.pos += 1;
            return true;
        }
        false
    }

    fn inline_cell(&mut self, marker: &str, name: &str) -> bool {
        if self.table_depth == 0 || !self.rest().starts_with(marker) {
            return false;
        }
        let start = self.pos;
        let mut data = self.data(start, start + marker.len());
        data.stx = Some(Syntax::Row);
        self.emit(Token::StartTag(TagToken::new(name).with_data(data)));
        self.pos += marker.len();
        true
    }

    /// `;term:definition` on one line. The dd bullets replace the
    /// trailing `;` of the dt bullets with `:`.
    fn dd_row(&mut self) -> bool {
        let Some(mut bullets) = self.dt_bullets.take() else {
            return false;
        };
        bullets.pop();
        let start = self.pos;
        let mut data = self.data(start, start + 1);
        data.stx = Some(Syntax::Row);
        let tag = TagToken::with_attribs(
            "listItem",
            vec![Kv::new("bullets", format!("{}:", bullets))],
        )
        .with_data(data);
        self.emit(Token::StartTag(tag));
        self.pos += 1;
        true
    }

    fn comment(&mut self) -> bool {
        let rest = self.rest();
        if !rest.starts_with("<!--") {
            return false;
        }
        let start = self.pos;
        let (value, end) = match rest[4..].find("-->") {
            Some(i) => (&rest[4..4 + i], start + 4 + i + 3),
            None => (&rest[4..], self.end),
        };
        let tsr = self.tsr(start, end);
        self.emit(Token::comment(value, Some(tsr)));
        self.pos = end;
        true
    }

    /// Name of the tag opening at the cursor, with closing flag and the
    /// offset just past the name.
    fn tag_name(&self) -> Option<(String, bool, usize)> {
        let rest = self.rest();
        let closing = rest.starts_with("</");
        let from = if closing { 2 } else { 1 };
        let name: String = rest[from..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        if !name.chars().next()?.is_ascii_alphabetic() {
            return None;
        }
        let end = self.pos + from + name.len();
        Some((name, closing, end))
    }

    /// Offset of the `>` closing a tag whose attributes start at `from`.
    fn tag_close(&self, from: usize) -> Option<usize> {
        let mut p = from;
        let mut quote: Option<char> = None;
        while p < self.end {
            let rest = &self.src[p..self.end];
            let c = rest.chars().next()?;
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '"' || c == '\'' => quote = Some(c),
                None if c == '>' => return Some(p),
                None if c == '<' => return None,
                None if rest.starts_with("{{") => {
                    p = skip_nested(self.src, p + 2, self.end, "}}")?;
                    continue;
                }
                None => {}
            }
            p += c.len_utf8();
        }
        None
    }

    /// The whole source as one attribute list.
    pub(crate) fn attribute_list(&self) -> Vec<Kv> {
        self.attributes(0..self.end)
    }

    fn attributes(&self, range: Range<usize>) -> Vec<Kv> {
        let text = &self.src[range.clone()];
        let start = range.start;
        attributes::to_kvs(text, self.base + start, &|r: Range<usize>| {
            self.value_of(start + r.start..start + r.end)
        })
    }

    fn html_tag(&mut self) -> bool {
        let Some((name, closing, name_end)) = self.tag_name() else {
            return false;
        };
        let lower = name.to_ascii_lowercase();
        if !HTML_TAGS.contains(&lower.as_str()) {
            return false;
        }
        let Some(gt) = self.tag_close(name_end) else {
            return false;
        };
        let start = self.pos;
        let end = gt + 1;
        let self_closing = self.src[..gt].ends_with('/');
        let attr_end = if self_closing { gt - 1 } else { gt };
        let attribs = if closing || attr_end <= name_end {
            Vec::new()
        } else {
            self.attributes(name_end..attr_end)
        };
        let mut data = self.data(start, end);
        data.stx = Some(Syntax::Html);
        let tag = TagToken::with_attribs(lower.as_str(), attribs).with_data(data);
        let token = if closing {
            Token::EndTag(tag)
        } else if self_closing || VOID_TAGS.contains(&lower.as_str()) {
            Token::SelfClosingTag(tag)
        } else {
            Token::StartTag(tag)
        };
        self.emit(token);
        self.pos = end;
        true
    }

    fn extension_tag(&mut self) -> bool {
        let Some((name, closing, name_end)) = self.tag_name() else {
            return false;
        };
        let lower = name.to_ascii_lowercase();
        if closing || !self.ext_tags.iter().any(|t| *t == lower) {
            return false;
        }
        let Some(gt) = self.tag_close(name_end) else {
            return false;
        };
        let start = self.pos;
        let self_closing = self.src[..gt].ends_with('/');
        let attr_end = if self_closing { gt - 1 } else { gt };
        let options = self.src[name_end..attr_end].trim().to_string();

        let (content, end) = if self_closing {
            (None, gt + 1)
        } else {
            let body_start = gt + 1;
            let close_tag = format!("</{}", lower);
            let body = self.src[body_start..self.end].to_ascii_lowercase();
            let Some(i) = body.find(&close_tag) else {
                return false;
            };
            let close_start = body_start + i;
            let Some(close_gt) = self.src[close_start..self.end].find('>') else {
                return false;
            };
            (
                Some(self.src[body_start..close_start].to_string()),
                close_start + close_gt + 1,
            )
        };

        let src = self.src[start..end].to_string();
        let mut attribs = vec![
            Kv::new("name", lower.as_str()),
            Kv::new("source", src.as_str()),
            Kv::new("options", options),
        ];
        if let Some(content) = content {
            attribs.push(Kv::new("content", content));
        }
        let mut data = self.data(start, end);
        data.src = Some(src);
        self.emit(Token::SelfClosingTag(
            TagToken::with_attribs("extension", attribs).with_data(data),
        ));
        self.pos = end;
        true
    }

    /// Key/value attributes for `{{target|p1|k=v}}`-shaped bodies.
    fn invocation_params(&self, parts: &[Range<usize>]) -> Vec<Kv> {
        let mut attribs = Vec::new();
        if let Some(target) = parts.first() {
            let mut kv = Kv::new(self.value_of(target.clone()), "").with_offsets([
                self.base + target.start,
                self.base + target.end,
                self.base + target.end,
                self.base + target.end,
            ]);
            kv.ksrc = Some(self.src[target.clone()].to_string());
            attribs.push(kv);
        }
        for part in parts.iter().skip(1) {
            let eq = top_level_positions(self.src, part.start, part.end, '=')
                .first()
                .copied();
            let kv = match eq {
                Some(eq) => {
                    let mut kv = Kv::new(
                        self.value_of(part.start..eq),
                        self.value_of(eq + 1..part.end),
                    )
                    .with_offsets([
                        self.base + part.start,
                        self.base + eq,
                        self.base + eq + 1,
                        self.base + part.end,
                    ]);
                    kv.ksrc = Some(self.src[part.start..eq].to_string());
                    kv.vsrc = Some(self.src[eq + 1..part.end].to_string());
                    kv
                }
                None => {
                    let mut kv = Kv::new("", self.value_of(part.clone())).with_offsets([
                        self.base + part.start,
                        self.base + part.start,
                        self.base + part.start,
                        self.base + part.end,
                    ]);
                    kv.vsrc = Some(self.src[part.clone()].to_string());
                    kv
                }
            };
            attribs.push(kv);
        }
        attribs
    }

    fn invocation(&mut self, name: &str, open: usize) -> bool {
        let start = self.pos;
        let close = "}".repeat(open);
        let Some(end) = skip_nested(self.src, start + open, self.end, &close) else {
            return false;
        };
        let parts = split_top_level(self.src, start + open, end - open, '|');
        let attribs = self.invocation_params(&parts);
        let mut data = self.data(start, end);
        data.src = Some(self.src[start..end].to_string());
        self.emit(Token::SelfClosingTag(
            TagToken::with_attribs(name, attribs).with_data(data),
        ));
        self.pos = end;
        true
    }

    fn template_arg(&mut self) -> bool {
        self.rest().starts_with("{{{") && self.invocation("templatearg", 3)
    }

    fn template(&mut self) -> bool {
        self.rest().starts_with("{{") && self.invocation("template", 2)
    }

    fn wikilink(&mut self) -> bool {
        if !self.rest().starts_with("[[") {
            return false;
        }
        let start = self.pos;
        let Some(end) = skip_nested(self.src, start + 2, self.end, "]]") else {
            return false;
        };
        let parts = split_top_level(self.src, start + 2, end - 2, '|');
        let target = parts[0].clone();
        let mut attribs = vec![Kv::new("href", self.value_of(target.clone())).with_offsets([
            self.base + target.start,
            self.base + target.start,
            self.base + target.start,
            self.base + target.end,
        ])];
        let mut data = self.data(start, end);
        if parts.len() > 1 {
            let content = parts[1].start..end - 2;
            attribs.push(Kv::new("content", self.value_of(content)));
            data.stx = Some(Syntax::Piped);
        }
        data.src = Some(self.src[start..end].to_string());
        self.emit(Token::SelfClosingTag(
            TagToken::with_attribs("wikilink", attribs).with_data(data),
        ));
        self.pos = end;
        true
    }

    fn quotes(&mut self) -> bool {
        let run = self.rest().chars().take_while(|c| *c == '\'').count();
        if run < 2 {
            return false;
        }
        let marker = match run {
            2 | 3 | 5 => run,
            4 => 3,
            _ => 5,
        };
        for _ in 0..run - marker {
            self.text.push('\'');
        }
        let start = self.pos + run - marker;
        let preceding: String = {
            let before: Vec<char> = self.src[..start].chars().rev().take(2).collect();
            before.into_iter().rev().collect()
        };
        let tag = TagToken::with_attribs(
            "mw-quote",
            vec![
                Kv::new("value", "'".repeat(marker)),
                Kv::new("preceding-2chars", preceding),
            ],
        )
        .with_data(self.data(start, start + marker));
        self.emit(Token::SelfClosingTag(tag));
        self.pos += run;
        true
    }

    fn behavior_switch(&mut self) -> bool {
        let rest = self.rest();
        if !rest.starts_with("__") {
            return false;
        }
        let word: String = rest[2..]
            .chars()
            .take_while(|c| c.is_ascii_uppercase())
            .collect();
        if word.is_empty() || !rest[2 + word.len()..].starts_with("__") {
            return false;
        }
        let start = self.pos;
        let end = start + word.len() + 4;
        let mut data = self.data(start, end);
        data.src = Some(self.src[start..end].to_string());
        let tag = TagToken::with_attribs(
            "meta",
            vec![Kv::new(
                "property",
                format!("mw:PageProp/{}", word.to_ascii_lowercase()),
            )],
        )
        .with_data(data);
        self.emit(Token::SelfClosingTag(tag));
        self.pos = end;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(src: &str) -> Vec<Token> {
        let ext = vec!["nowiki".to_string()];
        Scanner::new(src, 0, &ext).run()
    }

    #[test]
    fn test_skip_nested_templates() {
        let src = "{{a|{{b}}}}x";
        assert_eq!(skip_nested(src, 2, src.len(), "}}"), Some(11));
        let src = "{{{1|{{b}}}}}";
        assert_eq!(skip_nested(src, 3, src.len(), "}}}"), Some(13));
        assert_eq!(skip_nested("{{a", 2, 3, "}}"), None);
    }

    #[test]
    fn test_split_ignores_nested_pipes() {
        let src = "a|{{b|c}}|[[d|e]]";
        let parts: Vec<&str> = split_top_level(src, 0, src.len(), '|')
            .into_iter()
            .map(|r| &src[r])
            .collect();
        assert_eq!(parts, vec!["a", "{{b|c}}", "[[d|e]]"]);
    }

    #[test]
    fn test_plain_text_and_newlines() {
        let toks = scan("a b\nc");
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[0], Token::text("a b"));
        assert_eq!(toks[1].tsr(), Some(SourceRange::new(3, 4)));
        assert_eq!(toks[2], Token::text("c"));
    }

    #[test]
    fn test_list_bullets_and_dd_row() {
        let toks = scan(";a:b");
        assert!(toks[0].is_start_tag_named("listItem"));
        assert_eq!(toks[0].attribute_string("bullets").as_deref(), Some(";"));
        assert_eq!(toks[1], Token::text("a"));
        assert_eq!(toks[2].attribute_string("bullets").as_deref(), Some(":"));
        assert_eq!(toks[2].data().and_then(|d| d.stx), Some(Syntax::Row));
        assert_eq!(toks[2].tsr(), Some(SourceRange::new(2, 3)));
    }

    #[test]
    fn test_quote_runs() {
        let toks = scan("l''''x");
        assert_eq!(toks[0], Token::text("l'"));
        assert_eq!(toks[1].attribute_string("value").as_deref(), Some("'''"));
        assert_eq!(toks[1].attribute_string("preceding-2chars").as_deref(), Some("l'"));
        assert_eq!(toks[1].tsr(), Some(SourceRange::new(2, 5)));
    }

    #[test]
    fn test_template_params_and_offsets() {
        let toks = scan("{{foo|a|k = v}}");
        assert_eq!(toks.len(), 1);
        let tag = toks[0].tag().unwrap();
        assert_eq!(tag.name, "template");
        assert_eq!(tag.attribs[0].key_text(), "foo");
        assert_eq!(tag.attribs[0].src_offsets, Some([2, 5, 5, 5]));
        assert_eq!(tag.attribs[1].src_offsets, Some([6, 6, 6, 7]));
        assert_eq!(tag.attribs[2].key_text(), "k ");
        assert_eq!(tag.attribs[2].value_text(), " v");
        assert_eq!(tag.attribs[2].src_offsets, Some([8, 10, 11, 13]));
        assert_eq!(tag.data.src.as_deref(), Some("{{foo|a|k = v}}"));
        assert_eq!(tag.data.tsr, Some(SourceRange::new(0, 15)));
    }

    #[test]
    fn test_nested_template_value_is_tokens() {
        let toks = scan("{{a|{{b}}}}");
        let tag = toks[0].tag().unwrap();
        assert!(tag.attribs[1].v.needs_expansion());
    }

    #[test]
    fn test_template_argument() {
        let toks = scan("{{{1|def}}}");
        let tag = toks[0].tag().unwrap();
        assert_eq!(tag.name, "templatearg");
        assert_eq!(tag.attribs[0].key_text(), "1");
        assert_eq!(tag.attribs[1].value_text(), "def");
    }

    #[test]
    fn test_html_tag_with_attributes() {
        let toks = scan("<div class=\"x\">t</div>");
        let open = toks[0].tag().unwrap();
        assert!(toks[0].is_start_tag_named("div"));
        assert_eq!(open.data.stx, Some(Syntax::Html));
        assert_eq!(open.attribute_string("class").as_deref(), Some("x"));
        assert!(toks[2].is_end_tag_named("div"));
        assert_eq!(toks[2].tsr(), Some(SourceRange::new(16, 22)));
    }

    #[test]
    fn test_unknown_tag_is_text() {
        assert_eq!(scan("<foo>"), vec![Token::text("<foo>")]);
    }

    #[test]
    fn test_heading_and_table() {
        let toks = scan("== T ==\n{|\n|a||b\n|}");
        assert!(toks[0].is_start_tag_named("h2"));
        assert_eq!(toks[1], Token::text(" T "));
        assert!(toks[2].is_end_tag_named("h2"));
        assert_eq!(toks[2].tsr(), Some(SourceRange::new(5, 7)));
        let names: Vec<_> = toks.iter().filter_map(|t| t.name()).collect();
        assert_eq!(names, vec!["h2", "h2", "table", "td", "td", "table"]);
    }

    #[test]
    fn test_extension_and_comment() {
        let toks = scan("<nowiki>''x''</nowiki><!-- c -->");
        let ext = toks[0].tag().unwrap();
        assert_eq!(ext.name, "extension");
        assert_eq!(ext.attribute_string("content").as_deref(), Some("''x''"));
        assert!(matches!(&toks[1], Token::Comment { value, .. } if value == " c "));
    }

    #[test]
    fn test_base_offset_applies() {
        let ext = Vec::new();
        let toks = Scanner::new("a\n", 10, &ext).run();
        assert_eq!(toks[1].tsr(), Some(SourceRange::new(11, 12)));
    }
}
