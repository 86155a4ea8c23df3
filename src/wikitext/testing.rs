//! Testing utilities
//!
//! Helpers shared by the unit tests and the integration tests under
//! `tests/`:
//!
//! - environments and handler contexts wired to an in-memory
//!   [`MockDataAccess`]
//! - sinks that drop or record chunks
//! - a blocking driver for futures that need a `LocalSet`
//! - runners for whole recipes and for a single stage
//!
//! ## Checking token streams
//!
//! Prefer [`compact`] plus an inline snapshot over field-by-field asserts:
//!
//! ```rust-example
//! let out = testing::run_recipe(recipes::TEXT_FULL, "''a''", testing::mock_data_access());
//! insta::assert_snapshot!(testing::compact(&out), @"<p><i>a</i></p><EOF>");
//! ```

use crate::wikitext::config::PipelineOptions;
use crate::wikitext::data_access::{DataAccess, MockDataAccess};
use crate::wikitext::env::Env;
use crate::wikitext::frame::Frame;
use crate::wikitext::pipeline::accumulator::{ChunkSink, TokenChunk};
use crate::wikitext::pipeline::executor::run_local;
use crate::wikitext::pipeline::handler::{HandlerContext, StageOptions, TokenHandler};
use crate::wikitext::pipeline::{
    PipelineFactory, SubPipelineInvoker, TransformManager, PHASE1_END, PHASE2_END, PHASE3_END,
};
use crate::wikitext::token::utils::to_compact_string;
use crate::wikitext::token::Token;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

pub fn mock_data_access() -> MockDataAccess {
    MockDataAccess::new()
}

/// Document environment with default options.
pub fn env(data: impl DataAccess + 'static) -> Rc<Env> {
    env_with_options(PipelineOptions::default(), data)
}

pub fn env_with_options(options: PipelineOptions, data: impl DataAccess + 'static) -> Rc<Env> {
    Rc::new(Env::new(options, Rc::new(data)))
}

pub fn factory(data: impl DataAccess + 'static) -> PipelineFactory {
    PipelineFactory::new(env(data))
}

/// Default environment plus a factory-backed invoker sharing it.
pub fn env_and_invoker() -> (Rc<Env>, Rc<dyn SubPipelineInvoker>) {
    let env = env(mock_data_access());
    let invoker: Rc<dyn SubPipelineInvoker> = Rc::new(PipelineFactory::new(Rc::clone(&env)));
    (env, invoker)
}

/// Top-level handler context for a phase ending at `phase_end`.
pub fn handler_context(phase_end: f64) -> HandlerContext {
    let (env, invoker) = env_and_invoker();
    HandlerContext::new(env, Frame::top(""), invoker, StageOptions::default(), phase_end)
}

pub fn discard_sink() -> ChunkSink {
    Rc::new(|_chunk: TokenChunk| {})
}

/// A sink that records every chunk it receives.
pub fn collecting_sink() -> (ChunkSink, Rc<RefCell<Vec<TokenChunk>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let sink: ChunkSink = Rc::new(move |chunk: TokenChunk| log.borrow_mut().push(chunk));
    (sink, seen)
}

/// Block on `fut` inside a fresh `LocalSet`.
pub fn block_on_local<F: Future>(fut: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime");
    tokio::task::LocalSet::new().block_on(&runtime, fut)
}

/// Run a text recipe over `source` and return the whole output.
pub fn run_recipe(recipe: &str, source: &str, data: MockDataAccess) -> Vec<Token> {
    run_recipe_with(recipe, source, PipelineOptions::default(), data)
}

pub fn run_recipe_with(
    recipe: &str,
    source: &str,
    options: PipelineOptions,
    data: MockDataAccess,
) -> Vec<Token> {
    run_recipe_env(recipe, source, env_with_options(options, data))
}

/// Run a text recipe against an environment the caller keeps, so scratch
/// entries and caches can be inspected afterwards.
pub fn run_recipe_env(recipe: &str, source: &str, env: Rc<Env>) -> Vec<Token> {
    let stage_options = StageOptions {
        expand_templates: env.options().expand_templates,
        in_template: false,
        inline_context: env.options().inline_context,
    };
    let factory = PipelineFactory::new(env);
    let source = source.to_string();
    let recipe = recipe.to_string();
    run_local(async move {
        let mut pipeline = factory.build(&recipe, Frame::top(source.as_str()), stage_options, None)?;
        pipeline.process_text(&source)?;
        pipeline.collect().await
    })
    .expect("recipe run")
}

/// Run one synchronous stage over `tokens` as a structure-phase manager
/// would, end-of-input included.
pub fn run_stage(stage: impl TokenHandler + 'static, tokens: Vec<Token>) -> Vec<Token> {
    let (sink, chunks) = collecting_sink();
    let manager = TransformManager::new(
        "stage-test",
        handler_context(PHASE3_END),
        PHASE2_END,
        PHASE3_END,
        sink,
    );
    manager.add_stage(Box::new(stage));
    manager.process(tokens);
    let chunks = std::mem::take(&mut *chunks.borrow_mut());
    chunks.into_iter().flat_map(|c| c.tokens).collect()
}

/// Run one expansion-phase stage over `tokens`, driving suspensions to
/// completion.
pub fn run_expansion_stage(
    stage: impl TokenHandler + 'static,
    env: Rc<Env>,
    frame: Rc<Frame>,
    options: StageOptions,
    tokens: Vec<Token>,
) -> Vec<Token> {
    let invoker: Rc<dyn SubPipelineInvoker> = Rc::new(PipelineFactory::new(Rc::clone(&env)));
    block_on_local(async move {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let sink: ChunkSink = Rc::new(move |chunk: TokenChunk| {
            let _ = sender.send(chunk);
        });
        let cx = HandlerContext::new(env, frame, invoker, options, PHASE2_END);
        let manager = TransformManager::new("stage-test", cx, PHASE1_END, PHASE2_END, sink);
        manager.add_stage(Box::new(stage));
        manager.process(tokens);
        let mut out = Vec::new();
        while let Some(chunk) = receiver.recv().await {
            out.extend(chunk.tokens);
            if !chunk.is_async {
                break;
            }
        }
        out
    })
}

/// Compact rendering for snapshots.
pub fn compact(tokens: &[Token]) -> String {
    to_compact_string(tokens)
}

/// Names of the tag tokens, prefixed with `/` for end tags.
pub fn tag_names(tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .filter_map(|t| match t {
            Token::StartTag(tag) | Token::SelfClosingTag(tag) => Some(tag.name.clone()),
            Token::EndTag(tag) => Some(format!("/{}", tag.name)),
            _ => None,
        })
        .collect()
}
