//! Bold and italic resolution
//!
//! The tokenizer emits `mw-quote` markers for apostrophe runs of length 2, 3
//! or 5. This stage buffers a line as alternating content and marker chunks
//! and resolves the markers into `<i>` / `<b>` tags when the line ends (a
//! newline, the end of input, or a wikitext table cell).
//!
//! When both the italic and the bold counts of a line are odd, one bold
//! marker is demoted to an apostrophe plus an italic marker. The bold to
//! demote is, in order of preference, the first one preceded by a
//! single-letter word, the first one preceded by a longer word, or the first
//! one preceded by a space.
//!
//! Markers are then converted with the state machine of the legacy parser
//! (states `''`, `b`, `i`, `bi`, `ib` and the deferred `both`), and tags
//! still open at the end of the line are closed with `auto_inserted_end` set
//! on their start tag.

use crate::wikitext::pipeline::handler::{Dispatch, HandlerContext, TokenHandler, TokenResult};
use crate::wikitext::token::{Kv, SourceRange, Syntax, TagToken, Token};
use tracing::trace;

pub const RANK: f64 = 2.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    None,
    B,
    I,
    BI,
    IB,
    Both,
}

/// Position of a converted tag: chunk index and offset inside the chunk.
type TagRef = (usize, usize);

#[derive(Default)]
pub struct QuoteTransformer {
    /// Content chunks at even indices, single-marker chunks at odd ones
    chunks: Vec<Vec<Token>>,
    current_chunk: Vec<Token>,
    last_b: Option<TagRef>,
    last_i: Option<TagRef>,
    on_any_enabled: bool,
}

fn quote_len(token: &Token) -> usize {
    token
        .attribute_string("value")
        .map(|v| v.len())
        .unwrap_or(0)
}

impl QuoteTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.chunks.clear();
        self.current_chunk.clear();
        self.last_b = None;
        self.last_i = None;
        self.on_any_enabled = false;
    }

    fn start_new_chunk(&mut self) {
        self.chunks.push(std::mem::take(&mut self.current_chunk));
    }

    fn on_quote(&mut self, token: Token) -> TokenResult {
        trace!(token = ?token, "quote: marker");
        self.on_any_enabled = true;
        self.start_new_chunk();
        self.current_chunk.push(token);
        self.start_new_chunk();
        TokenResult::consumed()
    }

    fn marker(&self, i: usize) -> &Token {
        &self.chunks[i][0]
    }

    fn process_quotes(&mut self, token: Token) -> TokenResult {
        if !self.on_any_enabled {
            return TokenResult::Unchanged(token);
        }

        // Only wikitext table cells end the quote scope.
        if matches!(token.name(), Some("td") | Some("th"))
            && token.data().map(|d| d.stx == Some(Syntax::Html)).unwrap_or(false)
        {
            return TokenResult::tokens(vec![token]);
        }

        let mut num_bold = 0;
        let mut num_italics = 0;
        for i in (1..self.chunks.len()).step_by(2) {
            let len = quote_len(self.marker(i));
            if len == 2 || len == 5 {
                num_italics += 1;
            }
            if len == 3 || len == 5 {
                num_bold += 1;
            }
        }

        if num_italics % 2 == 1 && num_bold % 2 == 1 {
            self.balance();
        }

        self.convert_quotes_to_tags();

        self.current_chunk.push(token);
        self.start_new_chunk();
        let tokens: Vec<Token> = std::mem::take(&mut self.chunks).into_iter().flatten().collect();
        trace!(tokens = tokens.len(), "quote: line resolved");
        self.reset();
        TokenResult::tokens(tokens)
    }

    /// Demote one bold marker so the line has even counts.
    fn balance(&mut self) {
        let mut first_single_letter_word = None;
        let mut first_multi_letter_word = None;
        let mut first_space = None;
        for i in (1..self.chunks.len()).step_by(2) {
            if quote_len(self.marker(i)) != 3 {
                continue;
            }
            let ctx: Vec<char> = self
                .marker(i)
                .attribute_string("preceding-2chars")
                .unwrap_or_default()
                .chars()
                .collect();
            let last = ctx.last().copied();
            let second_to_last = ctx.len().checked_sub(2).map(|k| ctx[k]);
            if last == Some(' ') {
                if first_space.is_none() {
                    first_space = Some(i);
                }
            } else if second_to_last == Some(' ') && first_single_letter_word.is_none() {
                first_single_letter_word = Some(i);
                break;
            } else if first_multi_letter_word.is_none() {
                first_multi_letter_word = Some(i);
            }
        }

        // All three can be unset, e.g. a lone `'''''` on the line.
        if let Some(i) = first_single_letter_word
            .or(first_multi_letter_word)
            .or(first_space)
        {
            self.convert_bold(i);
        }
    }

    /// Turn a bold marker into an apostrophe plus an italic marker.
    fn convert_bold(&mut self, i: usize) {
        self.chunks[i - 1].push(Token::text("'"));
        let mut italic = TagToken::with_attribs("mw-quote", vec![Kv::new("value", "''")]);
        italic.data.tsr = self.marker(i).tsr().map(|r| SourceRange::new(r.start + 1, r.end));
        self.chunks[i] = vec![Token::SelfClosingTag(italic)];
    }

    fn convert_quotes_to_tags(&mut self) {
        use QuoteState::*;

        let mut last_both: Option<usize> = Option::None;
        let mut state = None;

        for i in (1..self.chunks.len()).step_by(2) {
            match quote_len(self.marker(i)) {
                2 => {
                    state = match state {
                        I => {
                            self.quote_to_tag(i, vec![Token::end_tag("i")], false);
                            QuoteState::None
                        }
                        BI => {
                            self.quote_to_tag(i, vec![Token::end_tag("i")], false);
                            B
                        }
                        IB => {
                            self.quote_to_tag(
                                i,
                                vec![Token::end_tag("b"), Token::end_tag("i"), Token::start_tag("b")],
                                true,
                            );
                            B
                        }
                        Both => {
                            if let Some(lb) = last_both {
                                self.quote_to_tag(
                                    lb,
                                    vec![Token::start_tag("b"), Token::start_tag("i")],
                                    false,
                                );
                            }
                            self.quote_to_tag(i, vec![Token::end_tag("i")], false);
                            B
                        }
                        B => {
                            self.quote_to_tag(i, vec![Token::start_tag("i")], false);
                            BI
                        }
                        QuoteState::None => {
                            self.quote_to_tag(i, vec![Token::start_tag("i")], false);
                            I
                        }
                    };
                }
                3 => {
                    state = match state {
                        B => {
                            self.quote_to_tag(i, vec![Token::end_tag("b")], false);
                            QuoteState::None
                        }
                        IB => {
                            self.quote_to_tag(i, vec![Token::end_tag("b")], false);
                            I
                        }
                        BI => {
                            self.quote_to_tag(
                                i,
                                vec![Token::end_tag("i"), Token::end_tag("b"), Token::start_tag("i")],
                                true,
                            );
                            I
                        }
                        Both => {
                            if let Some(lb) = last_both {
                                self.quote_to_tag(
                                    lb,
                                    vec![Token::start_tag("i"), Token::start_tag("b")],
                                    false,
                                );
                            }
                            self.quote_to_tag(i, vec![Token::end_tag("b")], false);
                            I
                        }
                        I => {
                            self.quote_to_tag(i, vec![Token::start_tag("b")], false);
                            IB
                        }
                        QuoteState::None => {
                            self.quote_to_tag(i, vec![Token::start_tag("b")], false);
                            B
                        }
                    };
                }
                5 => {
                    state = match state {
                        B => {
                            self.quote_to_tag(
                                i,
                                vec![Token::end_tag("b"), Token::start_tag("i")],
                                false,
                            );
                            I
                        }
                        I => {
                            self.quote_to_tag(
                                i,
                                vec![Token::end_tag("i"), Token::start_tag("b")],
                                false,
                            );
                            B
                        }
                        BI => {
                            self.quote_to_tag(i, vec![Token::end_tag("i"), Token::end_tag("b")], false);
                            QuoteState::None
                        }
                        IB => {
                            self.quote_to_tag(i, vec![Token::end_tag("b"), Token::end_tag("i")], false);
                            QuoteState::None
                        }
                        Both => {
                            if let Some(lb) = last_both {
                                self.quote_to_tag(
                                    lb,
                                    vec![Token::start_tag("i"), Token::start_tag("b")],
                                    false,
                                );
                            }
                            self.quote_to_tag(i, vec![Token::end_tag("b"), Token::end_tag("i")], false);
                            QuoteState::None
                        }
                        QuoteState::None => {
                            last_both = Some(i);
                            Both
                        }
                    };
                }
                _ => {}
            }
        }

        // Close what is still open; the order matters.
        if state == Both {
            if let Some(lb) = last_both {
                self.quote_to_tag(lb, vec![Token::start_tag("b"), Token::start_tag("i")], false);
            }
            state = BI;
        }
        if state == B || state == IB {
            self.current_chunk.push(Token::end_tag("b"));
            self.mark_auto_inserted_end("b");
        }
        if state == I || state == BI || state == IB {
            self.current_chunk.push(Token::end_tag("i"));
            self.mark_auto_inserted_end("i");
        }
        if state == BI {
            self.current_chunk.push(Token::end_tag("b"));
            self.mark_auto_inserted_end("b");
        }
    }

    fn last_ref(&mut self, name: &str) -> &mut Option<TagRef> {
        if name == "b" {
            &mut self.last_b
        } else {
            &mut self.last_i
        }
    }

    fn mark_auto_inserted_end(&mut self, name: &str) {
        if let Some((c, p)) = *self.last_ref(name) {
            if let Some(data) = self.chunks[c][p].data_mut() {
                data.auto_inserted_end = true;
            }
        }
    }

    /// Replace marker chunk `chunk` with `tags`, slicing the marker's source
    /// range among them (3 characters per bold, 2 per italic). With
    /// `bogus_two` the first tag closes an auto-inserted end and the third
    /// reopens with an auto-inserted start.
    fn quote_to_tag(&mut self, chunk: usize, mut tags: Vec<Token>, bogus_two: bool) {
        let tsr = self.marker(chunk).tsr();
        let mut start = tsr.map(|r| r.start).unwrap_or(0);
        for (i, tag) in tags.iter_mut().enumerate() {
            let name = tag.name().unwrap_or_default().to_string();
            if tsr.is_some() {
                if i == 0 && bogus_two {
                    self.mark_auto_inserted_end(&name);
                } else if i == 2 && bogus_two {
                    if let Some(data) = tag.data_mut() {
                        data.auto_inserted_start = true;
                    }
                } else {
                    let width = if name == "b" { 3 } else { 2 };
                    tag.set_tsr(Some(SourceRange::new(start, start + width)));
                    start += width;
                }
            }
            *self.last_ref(&name) = if tag.is_end_tag() {
                None
            } else {
                Some((chunk, i))
            };
        }
        self.chunks[chunk] = tags;
    }
}

impl TokenHandler for QuoteTransformer {
    fn name(&self) -> &'static str {
        "QuoteTransformer"
    }

    fn rank(&self) -> f64 {
        RANK
    }

    fn registrations(&self) -> Vec<Dispatch> {
        vec![
            Dispatch::tag("mw-quote"),
            Dispatch::tag("td"),
            Dispatch::tag("th"),
            Dispatch::Newline,
            Dispatch::End,
            Dispatch::Any,
        ]
    }

    fn on_tag(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        match token.name() {
            Some("mw-quote") => self.on_quote(token),
            Some("td") | Some("th") => self.process_quotes(token),
            _ => TokenResult::Unchanged(token),
        }
    }

    fn on_newline(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        self.process_quotes(token)
    }

    fn on_end(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        self.process_quotes(token)
    }

    fn on_any(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        if self.on_any_enabled {
            self.current_chunk.push(token);
            TokenResult::consumed()
        } else {
            TokenResult::Unchanged(token)
        }
    }

    fn on_any_enabled(&self) -> bool {
        self.on_any_enabled
    }

    fn reset_state(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::testing;
    use rstest::rstest;

    fn quote(len: usize, start: usize, preceding: &str) -> Token {
        Token::SelfClosingTag(TagToken::with_attribs(
            "mw-quote",
            vec![
                Kv::new("value", "'".repeat(len)),
                Kv::new("preceding-2chars", preceding),
            ],
        ))
        .at(start, start + len)
    }

    fn run(tokens: Vec<Token>) -> Vec<Token> {
        testing::run_stage(QuoteTransformer::new(), tokens)
    }

    #[test]
    fn test_italic_pair() {
        let out = run(vec![quote(2, 0, ""), Token::text("a"), quote(2, 3, "'a"), Token::EndOfInput]);
        assert_eq!(
            out,
            vec![
                Token::start_tag("i").at(0, 2),
                Token::text("a"),
                Token::end_tag("i").at(3, 5),
                Token::EndOfInput
            ]
        );
    }

    #[test]
    fn test_unclosed_bold_is_auto_closed() {
        let nl = Token::newline(Some(SourceRange::new(4, 5)));
        let out = run(vec![quote(3, 0, ""), Token::text("a"), nl.clone(), Token::EndOfInput]);
        let mut open = Token::start_tag("b").at(0, 3);
        open.data_mut().unwrap().auto_inserted_end = true;
        assert_eq!(
            out,
            vec![open, Token::text("a"), Token::end_tag("b"), nl, Token::EndOfInput]
        );
    }

    #[test]
    fn test_single_letter_word_bold_is_demoted() {
        // a l'''x''
        let out = run(vec![
            Token::text("a l"),
            quote(3, 3, " l"),
            Token::text("x"),
            quote(2, 7, "'x"),
            Token::EndOfInput,
        ]);
        assert_eq!(
            out,
            vec![
                Token::text("a l"),
                Token::text("'"),
                Token::start_tag("i").at(4, 6),
                Token::text("x"),
                Token::end_tag("i").at(7, 9),
                Token::EndOfInput
            ]
        );
    }

    #[test]
    fn test_single_letter_preferred_over_earlier_space() {
        let out = run(vec![
            Token::text("a "),
            quote(3, 2, "a "),
            Token::text("b x"),
            quote(3, 8, " x"),
            Token::text("c"),
            quote(2, 12, "'c"),
            Token::EndOfInput,
        ]);
        // The second bold (after the single-letter word) was demoted.
        assert_eq!(out[1], Token::start_tag("b").at(2, 5));
        assert_eq!(out[3], Token::text("'"));
        assert_eq!(out[4], Token::start_tag("i").at(9, 11));
    }

    #[test]
    fn test_bold_italic_five() {
        let out = run(vec![quote(5, 0, ""), Token::text("x"), quote(5, 6, "'x"), Token::EndOfInput]);
        assert_eq!(
            out,
            vec![
                Token::start_tag("i").at(0, 2),
                Token::start_tag("b").at(2, 5),
                Token::text("x"),
                Token::end_tag("b").at(6, 9),
                Token::end_tag("i").at(9, 11),
                Token::EndOfInput
            ]
        );
    }

    #[test]
    fn test_bogus_two_reopens_bold() {
        // ''a'''b''c'''
        let out = run(vec![
            quote(2, 0, ""),
            Token::text("a"),
            quote(3, 3, "'a"),
            Token::text("b"),
            quote(2, 7, "'b"),
            Token::text("c"),
            quote(3, 10, "'c"),
            Token::EndOfInput,
        ]);
        let mut b_open = Token::start_tag("b").at(3, 6);
        b_open.data_mut().unwrap().auto_inserted_end = true;
        let mut b_reopen = Token::start_tag("b");
        b_reopen.data_mut().unwrap().auto_inserted_start = true;
        assert_eq!(
            out,
            vec![
                Token::start_tag("i").at(0, 2),
                Token::text("a"),
                b_open,
                Token::text("b"),
                Token::end_tag("b"),
                Token::end_tag("i").at(7, 9),
                b_reopen,
                Token::text("c"),
                Token::end_tag("b").at(10, 13),
                Token::EndOfInput
            ]
        );
    }

    #[test]
    fn test_html_cell_does_not_end_line() {
        let mut td = Token::start_tag("td").at(3, 7);
        td.data_mut().unwrap().stx = Some(Syntax::Html);
        let out = run(vec![quote(2, 0, ""), Token::text("a"), td.clone(), Token::EndOfInput]);
        assert_eq!(out[0], td);
        assert_eq!(testing::tag_names(&out), vec!["td", "i", "/i"]);
    }

    #[rstest]
    #[case(vec![Token::text("plain"), Token::EndOfInput])]
    #[case(vec![Token::start_tag("b"), Token::newline(None), Token::EndOfInput])]
    fn test_lines_without_markers_pass_through(#[case] input: Vec<Token>) {
        assert_eq!(run(input.clone()), input);
    }

    #[rstest]
    // a l'''x'''
    #[case::even_bold(
        vec![
            Token::text("a l"),
            quote(3, 3, " l"),
            Token::text("x"),
            quote(3, 7, "'x"),
            Token::EndOfInput,
        ],
        vec!["b", "/b"],
    )]
    // a l'''x''' ''y''
    #[case::even_bold_and_italic(
        vec![
            Token::text("a l"),
            quote(3, 3, " l"),
            Token::text("x"),
            quote(3, 7, "'x"),
            Token::text(" "),
            quote(2, 11, "' "),
            Token::text("y"),
            quote(2, 14, "'y"),
            Token::EndOfInput,
        ],
        vec!["b", "/b", "i", "/i"],
    )]
    fn test_even_counts_keep_every_bold(#[case] input: Vec<Token>, #[case] tags: Vec<&str>) {
        let out = run(input);
        assert_eq!(testing::tag_names(&out), tags);
        assert!(out.iter().all(|t| t.as_text() != Some("'")));
        assert_eq!(out[1], Token::start_tag("b").at(3, 6));
        assert_eq!(out[3], Token::end_tag("b").at(7, 10));
    }
}
