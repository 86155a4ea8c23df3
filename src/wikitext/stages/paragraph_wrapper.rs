//! Paragraph wrapping
//!
//! Inserts `<p>` tags around runs of inline content, mimicking the legacy
//! block-level pass:
//!
//! - a line that opens or closes a block element closes any open paragraph
//!   and never starts one
//! - one newline continues the paragraph
//! - two newlines close it and start a new one
//! - every further pair of blank lines yields a literal `<br/>`
//!
//! Tokens are held in three buffers, always emitted in this order: the
//! token buffer (earlier lines, while newlines are pending), the
//! newline/whitespace buffer, and the current line.

use crate::wikitext::pipeline::handler::{
    Dispatch, HandlerContext, StageOptions, TokenHandler, TokenResult,
};
use crate::wikitext::token::utils::{is_formatting_tag_name, is_html_tag, is_sol_transparent};
use crate::wikitext::token::Token;
use std::collections::VecDeque;
use tracing::{error, trace};

pub const RANK: f64 = 2.95;

const BLOCK_ELEMS: &[&str] = &[
    "table", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "p", "ul", "ol", "dl",
];
const ANTI_BLOCK_ELEMS: &[&str] = &["td", "th"];
const ALWAYS_SUPPRESS: &[&str] = &["tr", "dt", "dd", "li"];
const NEVER_SUPPRESS: &[&str] = &["center", "blockquote", "div", "hr", "figure"];

#[derive(Default)]
struct CurrentLine {
    tokens: Vec<Token>,
    has_wrappable_tokens: bool,
    open_match: bool,
    close_match: bool,
}

#[derive(Default)]
pub struct ParagraphWrapper {
    disabled: bool,
    in_pre: bool,
    has_open_p_tag: bool,
    in_block_elem: bool,
    token_buffer: Vec<Token>,
    nl_ws_tokens: VecDeque<Token>,
    new_line_count: usize,
    curr_line: CurrentLine,
}

fn is_transclusion_meta(token: &Token) -> Option<bool> {
    if token.name() != Some("meta") {
        return None;
    }
    let ty = token.attribute_string("typeof")?;
    if ty == "mw:Transclusion" {
        Some(true)
    } else if ty.starts_with("mw:Transclusion") {
        Some(false)
    } else {
        None
    }
}

fn is_empty_line_meta(token: &Token) -> bool {
    token.name() == Some("meta")
        && token.attribute_string("typeof").as_deref() == Some("mw:EmptyLine")
}

/// Insert `<p>` after the leading newlines and sol-transparent tokens of
/// `out`, but before a transclusion start marker among them.
fn open_p_tag(out: &mut Vec<Token>, has_open_p_tag: &mut bool) {
    if *has_open_p_tag {
        return;
    }
    let mut i = 0;
    let mut tpl_start = None;
    while i < out.len() {
        let t = &out[i];
        match is_transclusion_meta(t) {
            Some(true) => {
                tpl_start = Some(i);
                i += 1;
                continue;
            }
            Some(false) => {
                tpl_start = None;
                i += 1;
                continue;
            }
            None => {}
        }
        if !is_sol_transparent(t) && !t.is_newline() {
            break;
        }
        i += 1;
    }
    out.insert(tpl_start.unwrap_or(i), Token::start_tag("p"));
    *has_open_p_tag = true;
}

/// Insert `</p>` before the trailing newlines and sol-transparent tokens of
/// `out`, keeping a trailing transclusion end marker outside.
fn close_open_p_tag(out: &mut Vec<Token>, has_open_p_tag: &mut bool) {
    if !*has_open_p_tag {
        return;
    }
    // Position after which `</p>` goes; `None` is the very front.
    let mut i = out.len().checked_sub(1);
    let mut tpl_end = None;
    while let Some(k) = i {
        let t = &out[k];
        match is_transclusion_meta(t) {
            Some(true) => {
                tpl_end = None;
                i = k.checked_sub(1);
                continue;
            }
            Some(false) => {
                tpl_end = Some(k);
                i = k.checked_sub(1);
                continue;
            }
            None => {}
        }
        if !is_sol_transparent(t) && !t.is_newline() {
            break;
        }
        i = k.checked_sub(1);
    }
    let at = match tpl_end.or(i) {
        Some(k) => k + 1,
        None => 0,
    };
    out.insert(at, Token::end_tag("p"));
    *has_open_p_tag = false;
}

impl ParagraphWrapper {
    pub fn new(options: StageOptions) -> Self {
        ParagraphWrapper {
            disabled: options.inline_context,
            ..Default::default()
        }
    }

    fn reset(&mut self) {
        self.reset_buffers();
        self.reset_curr_line();
        self.has_open_p_tag = false;
        self.in_pre = false;
        self.in_block_elem = false;
    }

    fn reset_buffers(&mut self) {
        self.token_buffer.clear();
        self.nl_ws_tokens.clear();
        self.new_line_count = 0;
    }

    fn reset_curr_line(&mut self) {
        if self.curr_line.open_match || self.curr_line.close_match {
            self.in_block_elem = !self.curr_line.close_match;
        }
        self.curr_line = CurrentLine::default();
    }

    fn process_buffers(&mut self, token: Token, flush_current_line: bool) -> Vec<Token> {
        let mut res = self.process_pending_nls();
        self.curr_line.tokens.push(token);
        if flush_current_line {
            res.append(&mut self.curr_line.tokens);
            self.reset_curr_line();
        }
        trace!(tokens = res.len(), "p-wrap: emit");
        res
    }

    fn flush_buffers(&mut self) -> Vec<Token> {
        if self.new_line_count > 0 {
            error!(
                newlines = self.new_line_count,
                buffered = self.nl_ws_tokens.len(),
                "p-wrap: flushing with pending newlines"
            );
        }
        let mut res = std::mem::take(&mut self.token_buffer);
        res.extend(self.nl_ws_tokens.drain(..));
        self.reset_buffers();
        res
    }

    /// Move buffered tokens to `out` up to the first newline, which is
    /// returned.
    fn discard_one_nl(&mut self, out: &mut Vec<Token>) -> Option<Token> {
        while let Some(t) = self.nl_ws_tokens.pop_front() {
            if t.is_newline() {
                return Some(t);
            }
            out.push(t);
        }
        None
    }

    fn process_pending_nls(&mut self) -> Vec<Token> {
        let mut res = std::mem::take(&mut self.token_buffer);
        let mut new_line_count = self.new_line_count;
        trace!(newlines = new_line_count, "p-wrap: pending newlines");

        if new_line_count >= 2 && !self.in_block_elem {
            close_open_p_tag(&mut res, &mut self.has_open_p_tag);

            // The first newline stays literal.
            let first = self.discard_one_nl(&mut res);
            res.extend(first);
            new_line_count -= 1;

            let remainder = new_line_count % 2;
            while new_line_count > 0 {
                let nl = self.discard_one_nl(&mut res);
                if new_line_count % 2 == remainder {
                    if self.has_open_p_tag {
                        res.push(Token::end_tag("p"));
                        self.has_open_p_tag = false;
                    }
                    if new_line_count > 1 {
                        res.push(Token::start_tag("p"));
                        self.has_open_p_tag = true;
                    }
                } else {
                    res.push(Token::self_closing("br"));
                }
                res.extend(nl);
                new_line_count -= 1;
            }
        }

        if self.curr_line.open_match || self.curr_line.close_match {
            close_open_p_tag(&mut res, &mut self.has_open_p_tag);
            if new_line_count == 1 {
                let nl = self.discard_one_nl(&mut res);
                res.extend(nl);
            }
        }

        res.extend(self.nl_ws_tokens.drain(..));
        self.reset_buffers();
        res
    }

    fn on_newline_or_eof(&mut self, token: Token) -> TokenResult {
        trace!(token = ?token, "p-wrap: line end");
        if self.curr_line.open_match || self.curr_line.close_match {
            close_open_p_tag(&mut self.curr_line.tokens, &mut self.has_open_p_tag);
        } else if !self.in_block_elem && !self.has_open_p_tag && self.curr_line.has_wrappable_tokens {
            open_p_tag(&mut self.curr_line.tokens, &mut self.has_open_p_tag);
        }

        if self.new_line_count > 0 && !self.curr_line.tokens.is_empty() {
            error!(
                newlines = self.new_line_count,
                line = self.curr_line.tokens.len(),
                "p-wrap: line tokens with pending newlines"
            );
        }
        self.token_buffer.append(&mut self.curr_line.tokens);

        if token.is_eof() {
            self.nl_ws_tokens.push_back(token);
            close_open_p_tag(&mut self.token_buffer, &mut self.has_open_p_tag);
            let res = self.process_pending_nls();
            self.reset();
            TokenResult::tokens(res)
        } else {
            self.reset_curr_line();
            self.new_line_count += 1;
            self.nl_ws_tokens.push_back(token);
            TokenResult::consumed()
        }
    }

    /// Comments, blank text and sol-transparent tags: attach to the current
    /// line when no newline is pending.
    fn flush_with_current_line(&mut self, token: Token) -> TokenResult {
        self.curr_line.tokens.push(token);
        TokenResult::tokens(self.flush_buffers())
    }
}

impl TokenHandler for ParagraphWrapper {
    fn name(&self) -> &'static str {
        "ParagraphWrapper"
    }

    fn rank(&self) -> f64 {
        RANK
    }

    fn registrations(&self) -> Vec<Dispatch> {
        vec![Dispatch::Newline, Dispatch::End, Dispatch::Any]
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn on_newline(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        if self.in_pre {
            TokenResult::Unchanged(token)
        } else {
            self.on_newline_or_eof(token)
        }
    }

    fn on_end(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        self.on_newline_or_eof(token)
    }

    fn on_any(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        let indent_pre = token.name() == Some("pre") && !is_html_tag(&token);

        if indent_pre && token.is_start_tag() {
            if self.in_block_elem {
                // No indent-pre inside block tags.
                self.curr_line.tokens.push(Token::text(" "));
                return TokenResult::consumed();
            }
            self.in_pre = true;
            self.curr_line.open_match = true;
            return TokenResult::tokens(self.process_buffers(token, true));
        }

        if indent_pre && token.is_end_tag() {
            if self.in_block_elem && !self.in_pre {
                return TokenResult::consumed();
            }
            self.in_pre = false;
            self.curr_line.close_match = true;
            return TokenResult::tokens(vec![token]);
        }

        if token.is_eof() || self.in_pre {
            return TokenResult::tokens(vec![token]);
        }

        let blank_text = token
            .as_text()
            .map(|s| s.chars().all(|c| c == ' ' || c == '\t'))
            .unwrap_or(false);
        if matches!(token, Token::Comment { .. }) || blank_text || is_empty_line_meta(&token) {
            if self.new_line_count == 0 {
                return self.flush_with_current_line(token);
            }
            self.nl_ws_tokens.push_back(token);
            return TokenResult::consumed();
        }

        if token.as_text().is_none() && (is_sol_transparent(&token) || token.name() == Some("style")) {
            return match self.new_line_count {
                0 => self.flush_with_current_line(token),
                1 => {
                    // Swallow the newline, whitespace and the current line.
                    self.token_buffer.extend(self.nl_ws_tokens.drain(..));
                    self.token_buffer.append(&mut self.curr_line.tokens);
                    self.new_line_count = 0;
                    self.reset_curr_line();
                    self.curr_line.tokens.push(token);
                    TokenResult::consumed()
                }
                _ => TokenResult::tokens(self.process_buffers(token, false)),
            };
        }

        let name = token.name().unwrap_or_default().to_ascii_lowercase();
        let name = name.as_str();
        let is_end = token.is_end_tag();
        if (BLOCK_ELEMS.contains(&name) && !is_end)
            || (ANTI_BLOCK_ELEMS.contains(&name) && is_end)
            || ALWAYS_SUPPRESS.contains(&name)
        {
            self.curr_line.open_match = true;
        }
        if (BLOCK_ELEMS.contains(&name) && is_end)
            || (ANTI_BLOCK_ELEMS.contains(&name) && !is_end)
            || NEVER_SUPPRESS.contains(&name)
        {
            self.curr_line.close_match = true;
        }
        self.curr_line.has_wrappable_tokens = true;
        TokenResult::tokens(self.process_buffers(token, false))
    }

    fn reset_state(&mut self) {
        self.reset();
    }
}

/// Formatting tags and empty text: nothing a paragraph needs wrapping for.
fn is_empty_filler(token: &Token) -> bool {
    match token {
        Token::Text(s) => s.is_empty(),
        other => other
            .tag()
            .map(|tag| is_formatting_tag_name(&tag.name))
            .unwrap_or(false),
    }
}

/// Drop paragraph wrappers around nothing or around formatting tags only,
/// e.g. `<p></p>` or `<p><b></p>` left next to block content. The wrapped
/// tokens are kept.
pub fn remove_useless_p_wrappers(tokens: Vec<Token>) -> Vec<Token> {
    let is_wrapper_start = |t: &Token| t.is_start_tag_named("p") && !is_html_tag(t);
    let is_wrapper_end = |t: &Token| t.is_end_tag_named("p") && !is_html_tag(t);

    let mut drop = vec![false; tokens.len()];
    for i in 0..tokens.len() {
        if !is_wrapper_start(&tokens[i]) {
            continue;
        }
        let close = tokens[i + 1..]
            .iter()
            .position(|t| !is_empty_filler(t))
            .map(|k| i + 1 + k);
        if let Some(j) = close {
            if is_wrapper_end(&tokens[j]) {
                drop[i] = true;
                drop[j] = true;
            }
        }
    }

    if !drop.contains(&true) {
        return tokens;
    }
    tokens
        .into_iter()
        .zip(drop)
        .filter_map(|(t, d)| (!d).then_some(t))
        .collect()
}
