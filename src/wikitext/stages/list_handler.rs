//! List construction
//!
//! Turns `listItem` tokens (one per bulleted line, carrying the bullet
//! string) into nested `ul`/`ol`/`dl` containers with `li`/`dt`/`dd` items.
//! Bullets map as `*` → `ul/li`, `#` → `ol/li`, `;` → `dl/dt` and
//! `:` → `dl/dd`.
//!
//! The stage keeps one list frame per table nesting level: a table opened
//! inside a list item suspends the outer frame until the table closes. Lines
//! without bullets close every open list; sol-transparent tokens seen after
//! a newline are held back until the stage knows whether the list goes on.

use crate::wikitext::pipeline::handler::{Dispatch, HandlerContext, TokenHandler, TokenResult};
use crate::wikitext::token::utils::{is_block_tag_name, is_sol_transparent};
use crate::wikitext::token::{DataAttribs, SourceRange, Syntax, TagToken, Token};
use tracing::trace;

pub const RANK: f64 = 2.49;

/// Container and item tag names for a bullet character.
fn bullet_tags(bullet: char) -> Option<(&'static str, &'static str)> {
    match bullet {
        '*' => Some(("ul", "li")),
        '#' => Some(("ol", "li")),
        ';' => Some(("dl", "dt")),
        ':' => Some(("dl", "dd")),
        _ => None,
    }
}

fn is_dt_dd(a: char, b: char) -> bool {
    (a == ';' && b == ':') || (a == ':' && b == ';')
}

fn common_prefix_len(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

struct ListFrame {
    /// A line without bullets ends the list block
    at_eol: bool,
    /// Newline that set `at_eol`
    nl_tk: Option<Token>,
    sol_tokens: Vec<Token>,
    /// Bullets of the previous item
    bstack: Vec<char>,
    /// Pending end tags, container and item interleaved
    endtags: Vec<Token>,
    num_open_block_tags: usize,
    /// Open tags on the current line; a `:` bullet inside one is literal
    num_open_tags: usize,
}

impl ListFrame {
    fn new() -> Self {
        ListFrame {
            at_eol: true,
            nl_tk: None,
            sol_tokens: Vec::new(),
            bstack: Vec::new(),
            endtags: Vec::new(),
            num_open_block_tags: 0,
            num_open_tags: 0,
        }
    }

    fn pop_tags(&mut self, n: usize) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(n * 2);
        for _ in 0..n {
            // item, then container
            tokens.extend(self.endtags.pop());
            tokens.extend(self.endtags.pop());
        }
        tokens
    }

    fn push_list(&mut self, list: &str, item: &str, list_dp: DataAttribs, item_dp: DataAttribs) -> [Token; 2] {
        self.endtags.push(Token::end_tag(list));
        self.endtags.push(Token::end_tag(item));
        [
            Token::StartTag(TagToken::new(list).with_data(list_dp)),
            Token::StartTag(TagToken::new(item).with_data(item_dp)),
        ]
    }
}

#[derive(Default)]
pub struct ListHandler {
    current: Option<ListFrame>,
    /// Frames suspended by tables opened inside a list
    list_frames: Vec<ListFrame>,
    nested_table_count: usize,
    on_any_enabled: bool,
}

impl ListHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.on_any_enabled = false;
        self.nested_table_count = 0;
        self.current = None;
    }

    fn close_lists(&mut self, token: Token) -> Vec<Token> {
        let mut tokens = Vec::new();
        if let Some(mut frame) = self.current.take() {
            let depth = frame.bstack.len();
            tokens = frame.pop_tags(depth);
            tokens.append(&mut frame.sol_tokens);
            tokens.extend(frame.nl_tk.take());
        }
        tokens.push(token);

        if self.list_frames.is_empty() {
            self.on_any_enabled = false;
        }
        trace!(tokens = tokens.len(), "list: closing all lists");
        tokens
    }

    fn on_list_item(&mut self, token: Token) -> TokenResult {
        if !token.is_start_tag() {
            return TokenResult::Unchanged(token);
        }
        self.on_any_enabled = true;
        let bullets: Vec<char> = token
            .attribute_string("bullets")
            .unwrap_or_default()
            .chars()
            .collect();

        if let Some(frame) = &self.current {
            if bullets.last() == Some(&':') && frame.num_open_tags > 0 {
                return TokenResult::tokens(vec![Token::text(":")]);
            }
        }
        if self.current.is_none() {
            self.current = Some(ListFrame::new());
        }

        let tokens = match self.current.as_mut() {
            Some(frame) => do_list_item(frame, bullets, &token),
            None => vec![token],
        };
        TokenResult::tokens(tokens)
    }
}

/// Emit the tags that take the list nesting from the frame's previous
/// bullets to `bn`.
fn do_list_item(frame: &mut ListFrame, bn: Vec<char>, token: &Token) -> Vec<Token> {
    let bs = std::mem::replace(&mut frame.bstack, bn.clone());
    let prefix_len = common_prefix_len(&bs, &bn);
    let dp = token.data().cloned().unwrap_or_default();
    let make_dp = |k: usize, j: usize| {
        let mut data = dp.clone();
        data.tsr = dp.tsr.map(|r| SourceRange::new(r.start + k, r.start + j));
        data
    };
    trace!(bs = ?bs, bn = ?bn, "list: item");

    let res = if prefix_len == bs.len() && bn.len() == bs.len() {
        // Same types, same nesting: close the item and reopen it with all
        // the bullets.
        let mut res = Vec::new();
        if let Some(item_end) = frame.endtags.pop() {
            let item = item_end.name().unwrap_or("li").to_string();
            frame.endtags.push(Token::end_tag(item.as_str()));
            res.push(item_end);
            res.append(&mut frame.sol_tokens);
            res.extend(frame.nl_tk.take());
            res.push(Token::StartTag(TagToken::new(item).with_data(make_dp(0, bn.len()))));
        }
        res
    } else {
        let mut prefix_correction = 0;
        let mut tokens: Vec<Token>;
        if bs.len() > prefix_len && bn.len() > prefix_len && is_dt_dd(bs[prefix_len], bn[prefix_len]) {
            // dt/dd transition, e.g. `;a:b` or `**;::` followed by `**:::`
            let popped = frame.pop_tags(bs.len() - prefix_len - 1);
            tokens = std::mem::take(&mut frame.sol_tokens);
            tokens.extend(popped);
            let new_name = bullet_tags(bn[prefix_len]).map(|(_, item)| item).unwrap_or("dd");
            tokens.extend(frame.endtags.pop());
            frame.endtags.push(Token::end_tag(new_name));

            // Only single-line dt/dd rows carry the `row` syntax; their dd
            // marker is one character wide.
            let item_dp = if dp.stx == Some(Syntax::Row) {
                make_dp(0, 1)
            } else {
                make_dp(0, prefix_len + 1)
            };
            tokens.extend(frame.nl_tk.take());
            tokens.push(Token::StartTag(TagToken::new(new_name).with_data(item_dp)));
            prefix_correction = 1;
        } else {
            let popped = frame.pop_tags(bs.len() - prefix_len);
            tokens = std::mem::take(&mut frame.sol_tokens);
            tokens.extend(popped);
            tokens.extend(frame.nl_tk.take());
            if prefix_len > 0 && bn.len() == prefix_len {
                if let Some(item_end) = frame.endtags.pop() {
                    let item = item_end.name().unwrap_or("li").to_string();
                    tokens.push(item_end);
                    tokens.push(Token::StartTag(
                        TagToken::new(item.as_str()).with_data(make_dp(0, bn.len())),
                    ));
                    frame.endtags.push(Token::end_tag(item));
                }
            }
        }

        for i in (prefix_len + prefix_correction)..bn.len() {
            let Some((list, item)) = bullet_tags(bn[i]) else {
                continue;
            };
            // The first new level also owns the shared prefix bullets.
            let (list_dp, item_dp) = if i == prefix_len {
                (make_dp(0, 0), make_dp(0, i + 1))
            } else {
                (make_dp(i, i), make_dp(i, i + 1))
            };
            tokens.extend(frame.push_list(list, item, list_dp, item_dp));
        }
        tokens
    };

    frame.sol_tokens.clear();
    frame.nl_tk = None;
    frame.at_eol = false;
    res
}

impl TokenHandler for ListHandler {
    fn name(&self) -> &'static str {
        "ListHandler"
    }

    fn rank(&self) -> f64 {
        RANK
    }

    fn registrations(&self) -> Vec<Dispatch> {
        vec![Dispatch::tag("listItem"), Dispatch::End, Dispatch::Any]
    }

    fn on_tag(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        if token.name() == Some("listItem") {
            self.on_list_item(token)
        } else {
            TokenResult::Unchanged(token)
        }
    }

    fn on_end(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        self.list_frames.clear();
        if self.current.is_none() {
            self.current = Some(ListFrame::new());
        }
        let tokens = self.close_lists(token);
        self.reset();
        TokenResult::tokens(tokens)
    }

    fn on_any(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        let Some(frame) = self.current.as_mut() else {
            // Inside a table that was opened in list context.
            match &token {
                Token::EndTag(t) if t.name == "table" => {
                    if self.nested_table_count == 0 {
                        self.current = self.list_frames.pop();
                    } else {
                        self.nested_table_count -= 1;
                    }
                }
                Token::StartTag(t) if t.name == "table" => self.nested_table_count += 1,
                _ => {}
            }
            return TokenResult::tokens(vec![token]);
        };

        match &token {
            Token::StartTag(t) if t.name != "table" => frame.num_open_tags += 1,
            Token::EndTag(_) if frame.num_open_tags > 0 => frame.num_open_tags -= 1,
            _ => {}
        }

        if let Token::EndTag(t) = &token {
            if t.name == "table" {
                let tokens = self.close_lists(token);
                self.current = self.list_frames.pop();
                return TokenResult::tokens(tokens);
            } else if is_block_tag_name(&t.name) {
                if frame.num_open_block_tags == 0 {
                    // Unbalanced block end tag closes the lists.
                    return TokenResult::tokens(self.close_lists(token));
                }
                frame.num_open_block_tags -= 1;
                return TokenResult::tokens(vec![token]);
            }
        }

        if frame.at_eol {
            if !token.is_newline() && is_sol_transparent(&token) {
                if let Some(nl) = frame.nl_tk.take() {
                    frame.sol_tokens.push(nl);
                }
                frame.sol_tokens.push(token);
                return TokenResult::consumed();
            }
            return TokenResult::tokens(self.close_lists(token));
        }

        if token.is_newline() {
            frame.at_eol = true;
            frame.nl_tk = Some(token);
            frame.num_open_tags = 0;
            return TokenResult::consumed();
        }

        if let Token::StartTag(t) = &token {
            if t.name == "table" {
                if let Some(frame) = self.current.take() {
                    self.list_frames.push(frame);
                }
            } else if is_block_tag_name(&t.name) {
                frame.num_open_block_tags += 1;
            }
        }
        TokenResult::tokens(vec![token])
    }

    fn on_any_enabled(&self) -> bool {
        self.on_any_enabled
    }

    fn reset_state(&mut self) {
        self.list_frames.clear();
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::testing;
    use crate::wikitext::token::Kv;

    fn item(bullets: &str, start: usize) -> Token {
        Token::StartTag(TagToken::with_attribs("listItem", vec![Kv::new("bullets", bullets)]))
            .at(start, start + bullets.len())
    }

    fn nl(at: usize) -> Token {
        Token::newline(Some(SourceRange::new(at, at + 1)))
    }

    fn run(tokens: Vec<Token>) -> Vec<Token> {
        testing::run_stage(ListHandler::new(), tokens)
    }

    #[test]
    fn test_flat_list() {
        // * a\n* b
        let out = run(vec![
            item("*", 0),
            Token::text(" a"),
            nl(3),
            item("*", 4),
            Token::text(" b"),
            Token::EndOfInput,
        ]);
        assert_eq!(
            out,
            vec![
                Token::start_tag("ul").at(0, 0),
                Token::start_tag("li").at(0, 1),
                Token::text(" a"),
                Token::end_tag("li"),
                nl(3),
                Token::start_tag("li").at(4, 5),
                Token::text(" b"),
                Token::end_tag("li"),
                Token::end_tag("ul"),
                Token::EndOfInput
            ]
        );
    }

    #[test]
    fn test_nesting_and_type_change() {
        // *a\n**b\n#c
        let out = run(vec![
            item("*", 0),
            Token::text("a"),
            nl(2),
            item("**", 3),
            Token::text("b"),
            nl(6),
            item("#", 7),
            Token::text("c"),
            Token::EndOfInput,
        ]);
        assert_eq!(
            testing::tag_names(&out),
            vec!["ul", "li", "ul", "li", "/li", "/ul", "/li", "/ul", "ol", "li", "/li", "/ol"]
        );
        // The first new level owns the shared bullet too.
        assert_eq!(out[4].tsr(), Some(SourceRange::new(3, 3)));
        assert_eq!(out[5].tsr(), Some(SourceRange::new(3, 5)));
    }

    #[test]
    fn test_shared_prefix_gets_all_bullets() {
        // **a\n****b: the first new level's item spans three bullets
        let out = run(vec![item("**", 0), Token::text("a"), nl(3), item("****", 4), Token::EndOfInput]);
        let starts: Vec<_> = out
            .iter()
            .filter(|t| t.is_start_tag())
            .map(|t| (t.name().unwrap_or_default().to_string(), t.tsr()))
            .collect();
        assert_eq!(starts[4], ("ul".to_string(), Some(SourceRange::new(4, 4))));
        assert_eq!(starts[5], ("li".to_string(), Some(SourceRange::new(4, 7))));
        assert_eq!(starts[7], ("li".to_string(), Some(SourceRange::new(7, 8))));
    }

    #[test]
    fn test_plain_line_closes_list() {
        let out = run(vec![item("*", 0), Token::text("a"), nl(2), Token::text("b"), Token::EndOfInput]);
        assert_eq!(
            out,
            vec![
                Token::start_tag("ul").at(0, 0),
                Token::start_tag("li").at(0, 1),
                Token::text("a"),
                Token::end_tag("li"),
                Token::end_tag("ul"),
                nl(2),
                Token::text("b"),
                Token::EndOfInput
            ]
        );
    }

    #[test]
    fn test_sol_transparent_tokens_are_held_back() {
        let comment = Token::comment("x", Some(SourceRange::new(3, 11)));
        let out = run(vec![
            item("*", 0),
            Token::text("a"),
            nl(2),
            comment.clone(),
            item("*", 11),
            Token::EndOfInput,
        ]);
        // The newline and comment stay inside the list, ahead of the
        // reopened item.
        assert_eq!(out[3], Token::end_tag("li"));
        assert_eq!(out[4], nl(2));
        assert_eq!(out[5], comment);
        assert_eq!(out[6], Token::start_tag("li").at(11, 12));
    }

    #[test]
    fn test_blank_line_ends_list() {
        let out = run(vec![item("*", 0), Token::text("a"), nl(2), nl(3), item("*", 4), Token::EndOfInput]);
        assert_eq!(
            testing::tag_names(&out),
            vec!["ul", "li", "/li", "/ul", "ul", "li", "/li", "/ul"]
        );
    }

    #[test]
    fn test_single_line_dt_dd() {
        let mut dd = item(":", 2);
        dd.data_mut().unwrap().stx = Some(Syntax::Row);
        let out = run(vec![item(";", 0), Token::text("a"), dd, Token::text("b"), Token::EndOfInput]);
        assert_eq!(testing::tag_names(&out), vec!["dl", "dt", "/dt", "dd", "/dd", "/dl"]);
        let dd_start = out.iter().find(|t| t.is_start_tag_named("dd")).unwrap();
        assert_eq!(dd_start.tsr(), Some(SourceRange::new(2, 3)));
    }

    #[test]
    fn test_colon_inside_open_tag_is_literal() {
        let out = run(vec![
            item(";", 0),
            Token::start_tag("span"),
            item(":", 7),
            Token::end_tag("span"),
            Token::EndOfInput,
        ]);
        assert!(out.contains(&Token::text(":")));
        assert!(!out.iter().any(|t| t.is_start_tag_named("dd")));
    }

    #[test]
    fn test_table_suspends_list() {
        let out = run(vec![
            item("*", 0),
            Token::start_tag("table"),
            Token::text("x"),
            nl(5),
            Token::text("y"),
            Token::end_tag("table"),
            Token::EndOfInput,
        ]);
        assert_eq!(
            testing::tag_names(&out),
            vec!["ul", "li", "table", "/table", "/li", "/ul"]
        );
        // The newline inside the table is not held back.
        assert_eq!(out[4], nl(5));
    }

    #[test]
    fn test_no_list_passes_through() {
        let input = vec![Token::text("a"), nl(1), Token::text("b"), Token::EndOfInput];
        assert_eq!(run(input.clone()), input);
    }
}
