//! Indent-pre detection
//!
//! Lines starting with a single space become `<pre>` blocks. The stage is a
//! five-state machine driven line by line:
//!
//! | state          | token            | next           | action                          |
//! |----------------|------------------|----------------|---------------------------------|
//! | SOL            | newline / eof    | SOL            | purge                           |
//! | SOL            | leading space    | PRE            | save the space                  |
//! | SOL            | sol-transparent  | SOL            | buffer                          |
//! | SOL            | other            | IGNORE         | purge                           |
//! | PRE            | newline / eof    | SOL            | purge                           |
//! | PRE            | block/table tag  | IGNORE         | purge                           |
//! | PRE            | sol-transparent  | PRE            | buffer                          |
//! | PRE            | other            | PRE_COLLECT    | start collecting the line       |
//! | PRE_COLLECT    | newline          | MULTILINE_PRE  | save the newline                |
//! | PRE_COLLECT    | eof              | SOL            | emit the pre                    |
//! | PRE_COLLECT    | block tag        | IGNORE         | emit earlier lines, purge line  |
//! | PRE_COLLECT    | other            | PRE_COLLECT    | collect                         |
//! | MULTILINE_PRE  | newline / eof    | SOL            | emit the pre                    |
//! | MULTILINE_PRE  | leading space    | PRE_COLLECT    | extend the same pre             |
//! | MULTILINE_PRE  | sol-transparent  | MULTILINE_PRE  | buffer                          |
//! | MULTILINE_PRE  | other            | IGNORE         | emit the pre                    |
//! | IGNORE         | newline / eof    | SOL            | pass through                    |
//!
//! "Purge" passes everything buffered on, followed by the current token.
//! The `<pre>` start tag gets the source range of the line's leading space
//! when the line start offset is known.

use crate::wikitext::pipeline::handler::{
    Dispatch, HandlerContext, StageOptions, TokenHandler, TokenResult,
};
use crate::wikitext::token::utils::{is_block_tag, is_html_tag, is_sol_transparent, is_table_tag};
use crate::wikitext::token::{SourceRange, TagToken, Token};
use tracing::{error, trace};

pub const RANK: f64 = 2.051;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sol,
    Pre,
    PreCollect,
    MultilinePre,
    Ignore,
}

pub struct PreHandler {
    disabled: bool,
    src_offset: usize,
    state: State,
    last_nl: Option<Token>,
    /// Offset of the current line start; `None` when it cannot be known
    pre_tsr: Option<usize>,
    tokens: Vec<Token>,
    current_line: Vec<Token>,
    pre_ws: Option<Token>,
    multiline_pre_ws: Option<Token>,
    sol_transparent: Vec<Token>,
    on_any_enabled: bool,
}

impl PreHandler {
    pub fn new(options: StageOptions) -> Self {
        PreHandler {
            disabled: options.inline_context,
            src_offset: 0,
            state: State::Sol,
            last_nl: None,
            pre_tsr: Some(0),
            tokens: Vec::new(),
            current_line: Vec::new(),
            pre_ws: None,
            multiline_pre_ws: None,
            sol_transparent: Vec::new(),
            on_any_enabled: true,
        }
    }

    /// Offset of the first line inside the top-level source.
    pub fn with_src_offset(mut self, offset: usize) -> Self {
        self.src_offset = offset;
        self.pre_tsr = Some(offset);
        self
    }

    fn reset(&mut self) {
        self.state = State::Sol;
        self.last_nl = None;
        self.pre_tsr = Some(self.src_offset);
        self.tokens.clear();
        self.current_line.clear();
        self.pre_ws = None;
        self.multiline_pre_ws = None;
        self.sol_transparent.clear();
        self.on_any_enabled = true;
    }

    fn move_to_ignore(&mut self) {
        self.on_any_enabled = false;
        self.state = State::Ignore;
    }

    fn reset_current_line(&mut self) {
        if !self.current_line.is_empty() {
            self.tokens.append(&mut self.current_line);
            // The multiline pre materialized; its whitespace is content now.
            self.multiline_pre_ws = None;
        }
    }

    fn result_and_reset(&mut self, token: Token) -> Vec<Token> {
        if let Some(nl) = self.last_nl.take() {
            self.tokens.push(nl);
        }
        let mut ret = std::mem::take(&mut self.tokens);
        if let Some(ws) = self.pre_ws.take() {
            ret.push(ws);
        }
        ret.append(&mut self.sol_transparent);
        ret.push(token);
        self.multiline_pre_ws = None;
        ret
    }

    fn process_pre(&mut self, token: Option<Token>) -> Vec<Token> {
        let mut ret = Vec::new();
        if !self.tokens.is_empty() {
            let mut pre = TagToken::new("pre");
            pre.data.tsr = self.pre_tsr.map(|t| SourceRange::new(t, t + 1));
            ret.push(Token::StartTag(pre));
            ret.append(&mut self.tokens);
            ret.push(Token::end_tag("pre"));
        }
        if let Some(ws) = self.multiline_pre_ws.take() {
            ret.push(ws);
        }
        if let Some(nl) = self.last_nl.take() {
            ret.push(nl);
        }
        ret.append(&mut self.sol_transparent);
        ret.extend(token);
        ret
    }

    fn encountered_block_while_collecting(&mut self, token: Token) -> Vec<Token> {
        let mlp = self.multiline_pre_ws.take();
        let mut ret = Vec::new();

        if !self.tokens.is_empty() {
            let mut i = self.tokens.len() - 1;
            while i > 0 && is_sol_transparent(&self.tokens[i]) {
                i -= 1;
            }
            let mut sol_toks = self.tokens.split_off(i);
            let first = sol_toks.remove(0);
            if first.is_newline() {
                self.last_nl = Some(first);
            } else {
                error!(token = ?first, "pre: expected a newline before trailing sol tokens");
                self.tokens.push(first);
            }
            ret = self.process_pre(None);
            ret.extend(sol_toks);
        }

        if let Some(ws) = self.pre_ws.take().or(mlp) {
            ret.push(ws);
        }

        self.reset_current_line();
        ret.extend(self.result_and_reset(token));
        ret
    }

    fn updated_pre_tsr(&self, token: &Token) -> Option<usize> {
        match token {
            Token::Comment { tsr: Some(tsr), .. } => Some(tsr.end),
            // `<!--` and `-->`
            Token::Comment { value, .. } => self.pre_tsr.map(|t| t + value.len() + 7),
            Token::SelfClosingTag(_) => None,
            Token::Text(s) => self.pre_tsr.map(|t| t + s.len()),
            _ => self.pre_tsr,
        }
    }

    /// Feed one non-newline token through the state machine.
    fn feed(&mut self, token: Token) -> Vec<Token> {
        let mut ret = Vec::new();
        match self.state {
            State::Sol => {
                if let Some(rest) = leading_space_rest(&token) {
                    ret = std::mem::take(&mut self.tokens);
                    self.pre_ws = Some(Token::text(" "));
                    self.state = State::Pre;
                    if let Some(rest) = rest {
                        self.feed(Token::Text(rest));
                    }
                } else if is_sol_transparent(&token) {
                    self.pre_tsr = self.updated_pre_tsr(&token);
                    self.tokens.push(token);
                } else {
                    ret = self.result_and_reset(token);
                    self.move_to_ignore();
                }
            }
            State::Pre => {
                if is_sol_transparent(&token) {
                    self.sol_transparent.push(token);
                } else if is_table_tag(&token) || (is_html_tag(&token) && is_block_tag(&token)) {
                    ret = self.result_and_reset(token);
                    self.move_to_ignore();
                } else {
                    self.current_line = std::mem::take(&mut self.sol_transparent);
                    self.current_line.push(token);
                    self.state = State::PreCollect;
                }
            }
            State::PreCollect => {
                if is_block_tag(&token) {
                    ret = self.encountered_block_while_collecting(token);
                    self.move_to_ignore();
                } else {
                    self.current_line.push(token);
                }
            }
            State::MultilinePre => {
                if let Some(rest) = leading_space_rest(&token) {
                    if let Some(nl) = self.last_nl.take() {
                        self.tokens.push(nl);
                    }
                    self.state = State::PreCollect;
                    self.pre_ws = None;
                    self.tokens.append(&mut self.sol_transparent);
                    self.multiline_pre_ws = Some(Token::text(" "));
                    if let Some(rest) = rest {
                        self.feed(Token::Text(rest));
                    }
                } else if is_sol_transparent(&token) {
                    self.sol_transparent.push(token);
                } else {
                    ret = self.process_pre(Some(token));
                    self.move_to_ignore();
                }
            }
            State::Ignore => {
                error!(token = ?token, "pre: token reached the catch-all in ignore state");
                ret.push(token);
            }
        }
        ret
    }
}

/// For text starting with a space: `Some(rest after the space)`, where the
/// rest is `None` when the text is exactly one space.
fn leading_space_rest(token: &Token) -> Option<Option<String>> {
    let s = token.as_text()?;
    let rest = s.strip_prefix(' ')?;
    Some((!rest.is_empty()).then(|| rest.to_string()))
}

fn line_start_after(nl: &Token) -> Option<usize> {
    nl.tsr().map(|r| r.end).filter(|end| *end != 0)
}

impl TokenHandler for PreHandler {
    fn name(&self) -> &'static str {
        "PreHandler"
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
        trace!(state = ?self.state, "pre: newline");
        let line_start = line_start_after(&token);
        let ret = match self.state {
            State::Sol => {
                let ret = self.result_and_reset(token);
                self.pre_tsr = line_start;
                ret
            }
            State::Pre => {
                let ret = self.result_and_reset(token);
                self.pre_tsr = line_start;
                self.state = State::Sol;
                ret
            }
            State::PreCollect => {
                self.reset_current_line();
                self.last_nl = Some(token);
                self.state = State::MultilinePre;
                Vec::new()
            }
            State::MultilinePre => {
                self.pre_ws = None;
                self.multiline_pre_ws = None;
                let ret = self.process_pre(Some(token));
                self.pre_tsr = line_start;
                self.state = State::Sol;
                ret
            }
            State::Ignore => {
                self.reset();
                self.pre_tsr = line_start;
                vec![token]
            }
        };
        TokenResult::tokens(ret)
    }

    fn on_end(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        trace!(state = ?self.state, "pre: end");
        let ret = match self.state {
            State::Sol | State::Pre => self.result_and_reset(token),
            State::PreCollect | State::MultilinePre => {
                self.pre_ws = None;
                self.multiline_pre_ws = None;
                self.reset_current_line();
                self.process_pre(Some(token))
            }
            State::Ignore => vec![token],
        };
        self.reset();
        TokenResult::tokens(ret)
    }

    fn on_any(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        trace!(state = ?self.state, token = ?token, "pre: any");
        TokenResult::tokens(self.feed(token))
    }

    fn on_any_enabled(&self) -> bool {
        self.on_any_enabled
    }

    fn reset_state(&mut self) {
        self.reset();
    }
}
