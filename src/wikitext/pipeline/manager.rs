//! Ranked token dispatch for one pipeline phase
//!
//! The manager owns the stages of a phase and a registry of their hooks
//! ordered by rank. For each token it walks the registry upwards from the
//! token's current rank, calling at each rank the most specific hook that
//! matches (named tag, any tag, newline or end-of-input) and then the
//! catch-all hook if the stage wants it.
//!
//! # Reprocessing
//!
//! Replacement tokens are pushed on a work stack and continue from the
//! producing stage's rank (or an explicit rank the stage asked for), so a
//! stage never sees its own output again unless it asks to. Tokens with the
//! phase end rank are final.
//!
//! # Suspensions
//!
//! A suspended token's ready tokens are processed first; then its pending
//! expansion is spawned on the current `LocalSet`, wired to the child channel
//! of a new accumulator, and everything after it flows into that
//! accumulator's sibling channel. When the expansion completes, its tokens
//! are run through the remaining ranks of the phase before they are
//! delivered. The manager must therefore run inside a
//! [`tokio::task::LocalSet`].

use super::accumulator::{AccumChain, ChunkSink, TokenAccumulator, TokenChunk};
use super::handler::{
    Dispatch, HandlerContext, Registration, RegistryChange, StageId, TokenHandler, TokenOutput,
    TokenResult,
};
use super::LocalFuture;
use crate::wikitext::token::Token;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, error, trace};

/// Output of one `transform_tokens` pass.
pub struct TransformResult {
    /// Tokens finished before the first suspension
    pub ready: Vec<Token>,
    /// Tail of the accumulator chain when something suspended
    pub tail: Option<Rc<TokenAccumulator>>,
}

struct WorkChunk {
    tokens: std::vec::IntoIter<Token>,
    rank: f64,
    pending: Option<LocalFuture<TokenOutput>>,
}

enum Dispatched {
    /// Survived every stage unchanged
    Done(Token),
    /// Replacement tokens final for this phase
    Final(Vec<Token>),
    Reprocess {
        tokens: Vec<Token>,
        rank: f64,
    },
    Suspended {
        ready: Vec<Token>,
        rank: f64,
        pending: LocalFuture<TokenOutput>,
    },
}

struct ManagerState {
    label: String,
    stages: Vec<Box<dyn TokenHandler>>,
    registry: Vec<Registration>,
    cx: HandlerContext,
    min_rank: f64,
    phase_end: f64,
    tail: Option<Rc<TokenAccumulator>>,
    output: ChunkSink,
}

/// Shared handle to a phase manager.
#[derive(Clone)]
pub struct TransformManager {
    inner: Rc<RefCell<ManagerState>>,
}

impl TransformManager {
    /// Create a manager for ranks `(min_rank, phase_end)` delivering
    /// finished chunks to `output`.
    pub fn new(
        label: impl Into<String>,
        mut cx: HandlerContext,
        min_rank: f64,
        phase_end: f64,
        output: ChunkSink,
    ) -> Self {
        let label = label.into();
        cx.pipeline_id = label.clone();
        cx.phase_end = phase_end;
        let output = if cx.frame.depth() == 0 {
            eof_checked(output)
        } else {
            output
        };
        TransformManager {
            inner: Rc::new(RefCell::new(ManagerState {
                label,
                stages: Vec::new(),
                registry: Vec::new(),
                cx,
                min_rank,
                phase_end,
                tail: None,
                output,
            })),
        }
    }

    /// Add a stage and register its hooks, unless it is disabled.
    pub fn add_stage(&self, stage: Box<dyn TokenHandler>) -> StageId {
        let mut state = self.inner.borrow_mut();
        let id = state.stages.len();
        if stage.is_disabled() {
            debug!(stage = stage.name(), pipeline = %state.label, "stage disabled");
        } else {
            let rank = stage.rank();
            for dispatch in stage.registrations() {
                state.insert_registration(Registration {
                    rank,
                    dispatch,
                    stage: id,
                });
            }
        }
        state.stages.push(stage);
        id
    }

    pub fn add_registration(&self, registration: Registration) {
        self.inner.borrow_mut().insert_registration(registration);
    }

    pub fn remove_registration(&self, stage: StageId, dispatch: &Dispatch) {
        self.inner
            .borrow_mut()
            .registry
            .retain(|r| !(r.stage == stage && &r.dispatch == dispatch));
    }

    /// Snapshot of the registry in dispatch order.
    pub fn registrations(&self) -> Vec<Registration> {
        self.inner.borrow().registry.clone()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.inner.borrow().stages.iter().map(|s| s.name()).collect()
    }

    pub fn phase_end(&self) -> f64 {
        self.inner.borrow().phase_end
    }

    /// Clear per-document state of every stage and drop pending chains.
    /// Registrations are kept.
    pub fn reset(&self) {
        let mut state = self.inner.borrow_mut();
        state.tail = None;
        for stage in state.stages.iter_mut() {
            stage.reset_state();
        }
    }

    pub fn set_output(&self, output: ChunkSink) {
        let mut state = self.inner.borrow_mut();
        state.output = if state.cx.frame.depth() == 0 {
            eof_checked(output)
        } else {
            output
        };
    }

    /// Process a complete token list and signal the end of input.
    pub fn process(&self, tokens: Vec<Token>) {
        self.on_chunk(tokens);
        self.on_end();
    }

    /// Transform one chunk of input. Output is emitted directly, or appended
    /// behind the chain of a previous chunk that is still waiting.
    pub fn on_chunk(&self, tokens: Vec<Token>) {
        let (min_rank, parent, tail, output) = {
            let state = self.inner.borrow();
            let parent = match &state.tail {
                Some(tail) => tail.sibling_sink(),
                None => Rc::clone(&state.output),
            };
            (
                state.min_rank,
                parent,
                state.tail.clone(),
                Rc::clone(&state.output),
            )
        };

        let res = self.transform_tokens(tokens, min_rank, parent);
        if !res.ready.is_empty() {
            match &tail {
                Some(tail) => tail.append(res.ready),
                None => output(TokenChunk::new(res.ready, true)),
            }
        }
        if let Some(new_tail) = res.tail {
            self.inner.borrow_mut().tail = Some(new_tail);
        }
    }

    /// End of input: close the chain, or emit the terminal chunk directly.
    pub fn on_end(&self) {
        let (tail, output) = {
            let mut state = self.inner.borrow_mut();
            (state.tail.take(), Rc::clone(&state.output))
        };
        match tail {
            Some(tail) => {
                trace!("manager end: closing accumulator chain");
                tail.sibling_done();
            }
            None => output(TokenChunk::done(Vec::new())),
        }
    }

    /// Run `tokens` through every rank above `min_rank`.
    ///
    /// Returns the tokens that finished synchronously, plus the tail of the
    /// accumulator chain when a stage suspended. The caller must feed later
    /// siblings into that tail or call `sibling_done` on it.
    pub fn transform_tokens(
        &self,
        tokens: Vec<Token>,
        min_rank: f64,
        parent: ChunkSink,
    ) -> TransformResult {
        if tokens.is_empty() {
            return TransformResult {
                ready: tokens,
                tail: None,
            };
        }

        let mut chain = AccumChain::new(parent);
        let mut spawns: Vec<(LocalFuture<TokenOutput>, f64, ChunkSink)> = Vec::new();
        {
            let mut state = self.inner.borrow_mut();
            let mut work = vec![WorkChunk {
                tokens: tokens.into_iter(),
                rank: min_rank,
                pending: None,
            }];

            while let Some(chunk) = work.last_mut() {
                let rank = chunk.rank;
                match chunk.tokens.next() {
                    Some(token) => match state.dispatch(token, rank) {
                        Dispatched::Done(token) => chain.push(token),
                        Dispatched::Final(tokens) => chain.append(tokens),
                        Dispatched::Reprocess { tokens, rank } => work.push(WorkChunk {
                            tokens: tokens.into_iter(),
                            rank,
                            pending: None,
                        }),
                        Dispatched::Suspended {
                            ready,
                            rank,
                            pending,
                        } => work.push(WorkChunk {
                            tokens: ready.into_iter(),
                            rank,
                            pending: Some(pending),
                        }),
                    },
                    None => {
                        if let Some(pending) = work.pop().and_then(|c| c.pending) {
                            spawns.push((pending, rank, chain.child_sink()));
                            chain.add_node();
                        }
                    }
                }
            }
        }

        for (pending, rank, sink) in spawns {
            self.spawn_expansion(pending, rank, sink);
        }

        let (ready, tail) = chain.finish();
        TransformResult { ready, tail }
    }

    fn spawn_expansion(&self, pending: LocalFuture<TokenOutput>, rank: f64, sink: ChunkSink) {
        let manager = self.clone();
        tokio::task::spawn_local(async move {
            let out = pending.await;
            manager.deliver(out, rank, sink);
        });
    }

    /// Finish an expansion: run it through the ranks it has not seen yet and
    /// hand it to the accumulator that was waiting for it.
    fn deliver(&self, out: TokenOutput, producer_rank: f64, sink: ChunkSink) {
        let rank = out.rank.unwrap_or(producer_rank);
        let phase_end = self.phase_end();
        trace!(rank, tokens = out.tokens.len(), "expansion delivered");
        if out.tokens.is_empty() || rank >= phase_end {
            sink(TokenChunk::done(out.tokens));
            return;
        }

        let res = self.transform_tokens(out.tokens, rank, Rc::clone(&sink));
        match res.tail {
            Some(tail) => {
                sink(TokenChunk::new(res.ready, true));
                tail.sibling_done();
            }
            None => sink(TokenChunk::done(res.ready)),
        }
    }
}

impl ManagerState {
    fn insert_registration(&mut self, registration: Registration) {
        self.registry.push(registration);
        self.registry
            .sort_by(|a, b| a.rank.total_cmp(&b.rank).then(a.stage.cmp(&b.stage)));
    }

    fn apply_changes(&mut self) {
        for change in self.cx.take_changes() {
            match change {
                RegistryChange::Add(registration) => self.insert_registration(registration),
                RegistryChange::Remove { stage, dispatch } => self
                    .registry
                    .retain(|r| !(r.stage == stage && r.dispatch == dispatch)),
            }
        }
    }

    fn dispatch(&mut self, token: Token, min_rank: f64) -> Dispatched {
        let result = self.dispatch_inner(token, min_rank);
        self.apply_changes();
        result
    }

    fn dispatch_inner(&mut self, mut token: Token, min_rank: f64) -> Dispatched {
        let mut i = self.registry.partition_point(|r| r.rank <= min_rank);
        while i < self.registry.len() {
            let rank = self.registry[i].rank;
            let stage_id = self.registry[i].stage;

            let mut best: Option<(u8, Dispatch)> = None;
            let mut has_any = false;
            while i < self.registry.len()
                && self.registry[i].rank == rank
                && self.registry[i].stage == stage_id
            {
                let dispatch = &self.registry[i].dispatch;
                if *dispatch == Dispatch::Any {
                    has_any = true;
                } else if let Some(score) = specificity(dispatch, &token) {
                    if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                        best = Some((score, dispatch.clone()));
                    }
                }
                i += 1;
            }

            let stage = &mut self.stages[stage_id];
            if best.is_none() && !(has_any && stage.on_any_enabled()) {
                continue;
            }

            trace!(
                pipeline = %self.label,
                stage = stage.name(),
                rank,
                token = ?token,
                "dispatch"
            );
            self.cx.enter(stage_id, rank);
            let mut result = match best.map(|(_, d)| d) {
                Some(Dispatch::Tag(_)) => stage.on_tag(token, &mut self.cx),
                Some(Dispatch::Newline) => stage.on_newline(token, &mut self.cx),
                Some(Dispatch::End) => stage.on_end(token, &mut self.cx),
                _ => TokenResult::Unchanged(token),
            };
            if let TokenResult::Unchanged(tok) = result {
                result = if has_any && stage.on_any_enabled() {
                    stage.on_any(tok, &mut self.cx)
                } else {
                    TokenResult::Unchanged(tok)
                };
            }

            match result {
                TokenResult::Unchanged(tok) | TokenResult::PassThrough(tok) => token = tok,
                TokenResult::Output(out) => {
                    let next_rank = out.rank.unwrap_or(rank);
                    return if next_rank >= self.phase_end {
                        Dispatched::Final(out.tokens)
                    } else {
                        Dispatched::Reprocess {
                            tokens: out.tokens,
                            rank: next_rank,
                        }
                    };
                }
                TokenResult::Async(expansion) => {
                    trace!(pipeline = %self.label, rank, "suspended");
                    return Dispatched::Suspended {
                        ready: expansion.ready,
                        rank,
                        pending: expansion.pending,
                    };
                }
            }
        }
        Dispatched::Done(token)
    }
}

/// How well `dispatch` matches `token`; `None` when it does not apply.
fn specificity(dispatch: &Dispatch, token: &Token) -> Option<u8> {
    match (dispatch, token) {
        (Dispatch::Tag(Some(name)), t) if t.name() == Some(name.as_str()) => Some(3),
        (Dispatch::Tag(None), t) if t.tag().is_some() => Some(2),
        (Dispatch::Newline, Token::Newline { .. }) => Some(1),
        (Dispatch::End, Token::EndOfInput) => Some(1),
        _ => None,
    }
}

/// Wrap a sink with end-of-input sanity checks: an EOF must be the very last
/// token of the stream. A lost EOF is logged and reinserted.
fn eof_checked(sink: ChunkSink) -> ChunkSink {
    let last_was_eof = Cell::new(false);
    Rc::new(move |mut chunk: TokenChunk| {
        if let Some(last) = chunk.tokens.len().checked_sub(1) {
            if chunk.tokens[..last].iter().any(Token::is_eof) {
                error!("end-of-input token in the middle of a chunk");
            }
            last_was_eof.set(chunk.tokens[last].is_eof());
        }
        if !chunk.is_async && !last_was_eof.get() {
            error!("end-of-input token went missing; reinserting");
            chunk.tokens.push(Token::EndOfInput);
            last_was_eof.set(true);
        }
        sink(chunk)
    })
}
