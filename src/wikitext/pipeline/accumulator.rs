//! Token accumulators for in-order delivery of out-of-band expansions
//!
//! When a stage suspends on token K, the manager creates an accumulator that
//! owns "the rest of the stream after K". It has two inputs:
//!
//! - the child channel, which receives K's expansion
//! - the sibling channel, which receives everything produced after K
//!
//! Sibling output is buffered while the child is pending. Once the child is
//! done, the child output goes up first, followed by the buffered sibling
//! output; from then on sibling output passes straight through. Accumulators
//! chain (the sibling channel of one is the parent of the next), so any
//! number of suspensions resolve in submission order regardless of the order
//! in which they complete.

use crate::wikitext::token::Token;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// A chunk of fully processed tokens. `is_async` means more output follows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenChunk {
    pub tokens: Vec<Token>,
    pub is_async: bool,
}

impl TokenChunk {
    pub fn new(tokens: Vec<Token>, is_async: bool) -> Self {
        TokenChunk { tokens, is_async }
    }

    /// A terminal chunk.
    pub fn done(tokens: Vec<Token>) -> Self {
        TokenChunk::new(tokens, false)
    }
}

/// Receiver of token chunks.
pub type ChunkSink = Rc<dyn Fn(TokenChunk)>;

#[derive(Debug)]
struct AccumState {
    wait_for_child: bool,
    wait_for_sibling: bool,
    sibling_buf: Vec<Token>,
}

/// Joins a child expansion with the sibling stream that follows it.
pub struct TokenAccumulator {
    parent: ChunkSink,
    state: RefCell<AccumState>,
}

impl TokenAccumulator {
    pub fn new(parent: ChunkSink) -> Rc<Self> {
        Rc::new(TokenAccumulator {
            parent,
            state: RefCell::new(AccumState {
                wait_for_child: true,
                wait_for_sibling: true,
                sibling_buf: Vec::new(),
            }),
        })
    }

    /// Output of the suspended token's expansion.
    pub fn receive_from_child(&self, chunk: TokenChunk) {
        let out = {
            let mut state = self.state.borrow_mut();
            let mut tokens = chunk.tokens;
            if !chunk.is_async && !state.sibling_buf.is_empty() {
                tokens.append(&mut state.sibling_buf);
            }
            let is_async =
                chunk.is_async || state.wait_for_sibling || !state.sibling_buf.is_empty();
            if !chunk.is_async {
                state.wait_for_child = false;
            }
            trace!(
                child_done = !chunk.is_async,
                wait_for_sibling = state.wait_for_sibling,
                "accumulator: from child"
            );
            TokenChunk::new(tokens, is_async)
        };
        (self.parent)(out);
    }

    /// Output of the stream after the suspended token.
    pub fn receive_from_sibling(&self, chunk: TokenChunk) {
        let out = {
            let mut state = self.state.borrow_mut();
            if !chunk.is_async {
                state.wait_for_sibling = false;
            }
            if state.wait_for_child {
                state.sibling_buf.extend(chunk.tokens);
                None
            } else if state.wait_for_sibling {
                Some(TokenChunk::new(chunk.tokens, true))
            } else {
                let mut tokens = std::mem::take(&mut state.sibling_buf);
                tokens.extend(chunk.tokens);
                Some(TokenChunk::done(tokens))
            }
        };
        if let Some(out) = out {
            (self.parent)(out);
        }
    }

    /// Mark the end of the sibling stream (tail of a chain).
    pub fn sibling_done(&self) {
        self.receive_from_sibling(TokenChunk::done(Vec::new()));
    }

    /// Append tokens as sibling output, keeping the current sibling state.
    pub fn append(&self, tokens: Vec<Token>) {
        let is_async = self.state.borrow().wait_for_sibling;
        self.receive_from_sibling(TokenChunk::new(tokens, is_async));
    }

    pub fn is_waiting_for_child(&self) -> bool {
        self.state.borrow().wait_for_child
    }

    pub fn child_sink(self: &Rc<Self>) -> ChunkSink {
        let acc = Rc::clone(self);
        Rc::new(move |chunk| acc.receive_from_child(chunk))
    }

    pub fn sibling_sink(self: &Rc<Self>) -> ChunkSink {
        let acc = Rc::clone(self);
        Rc::new(move |chunk| acc.receive_from_sibling(chunk))
    }
}

/// The accumulator chain built up while one token list is transformed.
///
/// Tokens finished before the first suspension land in `first` and are
/// returned directly; after each suspension, output goes to the sibling
/// channel of the most recent accumulator.
pub(crate) struct AccumChain {
    first: Vec<Token>,
    accum: Option<Rc<TokenAccumulator>>,
    next: Rc<TokenAccumulator>,
    nodes: usize,
}

impl AccumChain {
    pub(crate) fn new(parent: ChunkSink) -> Self {
        AccumChain {
            first: Vec::new(),
            accum: None,
            next: TokenAccumulator::new(parent),
            nodes: 1,
        }
    }

    pub(crate) fn push(&mut self, token: Token) {
        self.append(vec![token]);
    }

    pub(crate) fn append(&mut self, tokens: Vec<Token>) {
        if tokens.is_empty() {
            return;
        }
        match &self.accum {
            Some(acc) => acc.append(tokens),
            None => self.first.extend(tokens),
        }
    }

    /// Sink for the expansion of the suspension being registered now.
    pub(crate) fn child_sink(&self) -> ChunkSink {
        self.next.child_sink()
    }

    /// Close the current link: later output becomes sibling output of it.
    pub(crate) fn add_node(&mut self) {
        let acc = Rc::clone(&self.next);
        self.next = TokenAccumulator::new(acc.sibling_sink());
        self.accum = Some(acc);
        self.nodes += 1;
    }

    /// Finished tokens plus the tail accumulator, if anything suspended.
    pub(crate) fn finish(self) -> (Vec<Token>, Option<Rc<TokenAccumulator>>) {
        let tail = if self.nodes > 1 { self.accum } else { None };
        (self.first, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (ChunkSink, Rc<RefCell<Vec<TokenChunk>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink_seen = Rc::clone(&seen);
        let sink: ChunkSink = Rc::new(move |chunk| sink_seen.borrow_mut().push(chunk));
        (sink, seen)
    }

    fn texts(chunks: &[TokenChunk]) -> Vec<String> {
        chunks
            .iter()
            .flat_map(|c| c.tokens.iter())
            .filter_map(|t| t.as_text().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_sibling_output_waits_for_child() {
        let (sink, seen) = collector();
        let acc = TokenAccumulator::new(sink);
        acc.append(vec![Token::text("after")]);
        acc.sibling_done();
        assert!(seen.borrow().is_empty());

        acc.receive_from_child(TokenChunk::done(vec![Token::text("child")]));
        let chunks = seen.borrow();
        assert_eq!(texts(&chunks), vec!["child", "after"]);
        assert!(!chunks.last().unwrap().is_async);
    }

    #[test]
    fn test_sibling_passes_through_after_child() {
        let (sink, seen) = collector();
        let acc = TokenAccumulator::new(sink);
        acc.receive_from_child(TokenChunk::done(vec![Token::text("child")]));
        assert!(seen.borrow()[0].is_async);

        acc.append(vec![Token::text("a")]);
        acc.append(vec![Token::text("b")]);
        acc.sibling_done();
        let chunks = seen.borrow();
        assert_eq!(texts(&chunks), vec!["child", "a", "b"]);
        assert!(chunks[..chunks.len() - 1].iter().all(|c| c.is_async));
        assert!(!chunks.last().unwrap().is_async);
    }

    #[test]
    fn test_partial_child_output_keeps_buffer() {
        let (sink, seen) = collector();
        let acc = TokenAccumulator::new(sink);
        acc.append(vec![Token::text("s")]);
        acc.receive_from_child(TokenChunk::new(vec![Token::text("c1")], true));
        assert_eq!(texts(&seen.borrow()), vec!["c1"]);
        acc.receive_from_child(TokenChunk::done(vec![Token::text("c2")]));
        assert_eq!(texts(&seen.borrow()), vec!["c1", "c2", "s"]);
    }

    #[test]
    fn test_chain_resolves_in_submission_order() {
        let (sink, seen) = collector();
        let mut chain = AccumChain::new(sink);
        chain.push(Token::text("0"));
        let first = chain.child_sink();
        chain.add_node();
        chain.push(Token::text("2"));
        let second = chain.child_sink();
        chain.add_node();
        chain.push(Token::text("4"));
        let (ready, tail) = chain.finish();
        assert_eq!(texts(&[TokenChunk::done(ready)]), vec!["0"]);
        let tail = tail.expect("suspended");
        tail.sibling_done();

        second(TokenChunk::done(vec![Token::text("3")]));
        assert!(seen.borrow().is_empty());
        first(TokenChunk::done(vec![Token::text("1")]));

        let chunks = seen.borrow();
        assert_eq!(texts(&chunks), vec!["1", "2", "3", "4"]);
        assert!(!chunks.last().unwrap().is_async);
    }

    #[test]
    fn test_chain_without_suspension_has_no_tail() {
        let (sink, seen) = collector();
        let mut chain = AccumChain::new(sink);
        chain.push(Token::text("x"));
        let (ready, tail) = chain.finish();
        assert_eq!(ready, vec![Token::text("x")]);
        assert!(tail.is_none());
        assert!(seen.borrow().is_empty());
    }
}
