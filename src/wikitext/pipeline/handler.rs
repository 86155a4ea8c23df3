//! Stage contract for token transformations
//!
//! Every stage implements [`TokenHandler`]. The manager calls the most
//! specific hook that matches a token (`on_tag`, `on_newline`, `on_end`) and
//! then, if the stage asks for it, the catch-all `on_any`. All hooks have
//! pass-through defaults, so stages only override what they care about.
//!
//! # Return protocol
//!
//! - [`TokenResult::Unchanged`]: the token is untouched; `on_any` may still run
//! - [`TokenResult::PassThrough`]: the token is untouched and `on_any` is skipped
//! - [`TokenResult::Output`]: replacement tokens (possibly none), reprocessed
//!   by stages ranked above the producer unless an explicit rank is given
//! - [`TokenResult::Async`]: ready tokens now, the rest out of band
//!
//! # Examples
//!
//! ```ignore
//! struct Upcase;
//!
//! impl TokenHandler for Upcase {
//!     fn name(&self) -> &'static str { "Upcase" }
//!     fn rank(&self) -> f64 { 2.5 }
//!     fn registrations(&self) -> Vec<Dispatch> { vec![Dispatch::Any] }
//!     fn on_any(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
//!         match token {
//!             Token::Text(s) => TokenResult::tokens(vec![Token::Text(s.to_uppercase())]),
//!             other => TokenResult::Unchanged(other),
//!         }
//!     }
//! }
//! ```

use super::{LocalFuture, SubPipelineInvoker};
use crate::wikitext::env::Env;
use crate::wikitext::frame::Frame;
use crate::wikitext::token::Token;
use std::fmt;
use std::rc::Rc;

/// Index of a stage inside its manager.
pub type StageId = usize;

/// Which token kinds a registration listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Start, end and self-closing tags; optionally only those with this name
    Tag(Option<String>),
    Newline,
    /// End-of-input
    End,
    /// Catch-all
    Any,
}

impl Dispatch {
    pub fn tag(name: &str) -> Self {
        Dispatch::Tag(Some(name.to_string()))
    }
}

/// A stage hook bound to a rank.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub rank: f64,
    pub dispatch: Dispatch,
    pub stage: StageId,
}

/// Pending edit of the registry, applied once the current token is done.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Add(Registration),
    Remove { stage: StageId, dispatch: Dispatch },
}

/// Replacement tokens with an optional continuation rank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenOutput {
    pub tokens: Vec<Token>,
    /// `None` reprocesses from the producing stage's rank.
    pub rank: Option<f64>,
}

impl TokenOutput {
    pub fn new(tokens: Vec<Token>) -> Self {
        TokenOutput { tokens, rank: None }
    }

    pub fn with_rank(tokens: Vec<Token>, rank: f64) -> Self {
        TokenOutput {
            tokens,
            rank: Some(rank),
        }
    }
}

/// A suspension: `ready` goes downstream immediately, `pending` resolves
/// later and its output is slotted in right after `ready`.
pub struct AsyncExpansion {
    pub ready: Vec<Token>,
    pub pending: LocalFuture<TokenOutput>,
}

impl fmt::Debug for AsyncExpansion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncExpansion")
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

/// What a hook did with its token.
#[derive(Debug)]
pub enum TokenResult {
    Unchanged(Token),
    PassThrough(Token),
    Output(TokenOutput),
    Async(AsyncExpansion),
}

impl TokenResult {
    pub fn tokens(tokens: Vec<Token>) -> Self {
        TokenResult::Output(TokenOutput::new(tokens))
    }

    pub fn with_rank(tokens: Vec<Token>, rank: f64) -> Self {
        TokenResult::Output(TokenOutput::with_rank(tokens, rank))
    }

    /// The token was buffered; nothing goes downstream for now.
    pub fn consumed() -> Self {
        TokenResult::Output(TokenOutput::default())
    }

    pub fn suspend(ready: Vec<Token>, pending: LocalFuture<TokenOutput>) -> Self {
        TokenResult::Async(AsyncExpansion { ready, pending })
    }
}

/// Per-pipeline flags a stage is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOptions {
    /// Expand and wrap top-level constructs
    pub expand_templates: bool,
    /// Processing a template body or argument
    pub in_template: bool,
    /// Content that will not be wrapped in block structure
    pub inline_context: bool,
}

impl StageOptions {
    pub fn top_level() -> Self {
        StageOptions {
            expand_templates: true,
            in_template: false,
            inline_context: false,
        }
    }

    /// Options for template bodies.
    pub fn template_body() -> Self {
        StageOptions {
            expand_templates: false,
            in_template: true,
            inline_context: false,
        }
    }

    /// Whether wrapper markers should be produced.
    pub fn wrap_templates(&self) -> bool {
        !self.in_template
    }
}

impl Default for StageOptions {
    fn default() -> Self {
        Self::top_level()
    }
}

/// Services a hook can reach while it runs.
pub struct HandlerContext {
    pub env: Rc<Env>,
    pub frame: Rc<Frame>,
    pub invoker: Rc<dyn SubPipelineInvoker>,
    pub options: StageOptions,
    pub phase_end: f64,
    pub pipeline_id: String,
    current: Option<(StageId, f64)>,
    changes: Vec<RegistryChange>,
}

impl HandlerContext {
    pub fn new(
        env: Rc<Env>,
        frame: Rc<Frame>,
        invoker: Rc<dyn SubPipelineInvoker>,
        options: StageOptions,
        phase_end: f64,
    ) -> Self {
        HandlerContext {
            env,
            frame,
            invoker,
            options,
            phase_end,
            pipeline_id: String::new(),
            current: None,
            changes: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, stage: StageId, rank: f64) {
        self.current = Some((stage, rank));
    }

    pub(crate) fn take_changes(&mut self) -> Vec<RegistryChange> {
        std::mem::take(&mut self.changes)
    }

    /// Register another hook for the running stage. Takes effect from the
    /// next token on.
    pub fn add_registration(&mut self, dispatch: Dispatch, rank: Option<f64>) {
        if let Some((stage, own_rank)) = self.current {
            self.changes.push(RegistryChange::Add(Registration {
                rank: rank.unwrap_or(own_rank),
                dispatch,
                stage,
            }));
        }
    }

    /// Drop a hook of the running stage. Takes effect from the next token on.
    pub fn remove_registration(&mut self, dispatch: Dispatch) {
        if let Some((stage, _)) = self.current {
            self.changes
                .push(RegistryChange::Remove { stage, dispatch });
        }
    }

    /// True at the outermost frame of an untemplated pipeline.
    pub fn at_top_level(&self) -> bool {
        self.frame.depth() == 0 && !self.options.in_template
    }
}

/// A token stream rewriting stage.
///
/// Stages are instance-scoped: all per-document state lives in the stage and
/// is cleared by [`TokenHandler::reset_state`].
pub trait TokenHandler {
    fn name(&self) -> &'static str;

    fn rank(&self) -> f64;

    /// Hooks this stage listens to, all at [`TokenHandler::rank`].
    fn registrations(&self) -> Vec<Dispatch> {
        vec![Dispatch::Tag(None), Dispatch::Newline, Dispatch::End, Dispatch::Any]
    }

    /// Disabled stages register no hooks at all.
    fn is_disabled(&self) -> bool {
        false
    }

    fn on_tag(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        TokenResult::Unchanged(token)
    }

    fn on_newline(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        TokenResult::Unchanged(token)
    }

    fn on_end(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        TokenResult::Unchanged(token)
    }

    fn on_any(&mut self, token: Token, _cx: &mut HandlerContext) -> TokenResult {
        TokenResult::Unchanged(token)
    }

    /// Gate for the catch-all hook; stages flip this as they change state.
    fn on_any_enabled(&self) -> bool {
        true
    }

    fn reset_state(&mut self) {}
}
