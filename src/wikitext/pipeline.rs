//! Token transformation pipeline
//!
//! A pipeline is a tokenizer (for text input) followed by up to three
//! transformation phases and an optional post pass. Each phase is run by a
//! [`manager::TransformManager`] that dispatches every token to the stages
//! registered in the phase's rank range, in ascending rank order.
//!
//! | phase | ranks  | stages                                              |
//! |-------|--------|-----------------------------------------------------|
//! | 1     | [0,1)  | none by default                                     |
//! | 2     | [1,2)  | templates, extensions, attribute expansion (async)  |
//! | 3     | [2,3)  | pre, quotes, lists, paragraphs                      |
//!
//! Pipelines are assembled from named recipes ([`config::RecipeRegistry`]) by
//! the [`factory::PipelineFactory`], which also serves nested expansions
//! through [`SubPipelineInvoker`].

pub mod accumulator;
pub mod builder;
pub mod config;
pub mod executor;
pub mod factory;
pub mod handler;
pub mod manager;

use crate::wikitext::frame::Frame;
use crate::wikitext::token::Token;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

pub use accumulator::{ChunkSink, TokenAccumulator, TokenChunk};
pub use builder::{Pipeline, PipelineBuilder};
pub use config::{Recipe, RecipeRegistry};
pub use executor::PipelineExecutor;
pub use factory::PipelineFactory;
pub use handler::{
    AsyncExpansion, Dispatch, HandlerContext, Registration, StageOptions, TokenHandler,
    TokenOutput, TokenResult,
};
pub use manager::TransformManager;

/// Boxed single-threaded future.
pub type LocalFuture<T> = Pin<Box<dyn Future<Output = T>>>;

pub const PHASE1_END: f64 = 1.0;
pub const PHASE2_END: f64 = 2.0;
pub const PHASE3_END: f64 = 3.0;

pub mod recipes {
    //! Names of the built-in recipes.

    /// Full document: tokenize, expand, build block structure, clean up.
    pub const TEXT_FULL: &str = "text/wiki/full";
    /// Template bodies: tokenize and expand.
    pub const TEXT: &str = "text/wiki";
    /// Re-expansion of literal token sequences.
    pub const TOKENS: &str = "tokens/wiki";
    /// Attribute and argument expansion.
    pub const TOKENS_EXPANDED: &str = "tokens/wiki/expanded";
}

/// What a nested pipeline should run on and how.
#[derive(Debug, Clone)]
pub struct SubPipelineRequest {
    pub recipe: &'static str,
    pub frame: Rc<Frame>,
    pub options: StageOptions,
    /// Offset of the input inside the top-level source, for text input
    pub src_offset: Option<usize>,
}

impl SubPipelineRequest {
    pub fn new(recipe: &'static str, frame: Rc<Frame>, options: StageOptions) -> Self {
        SubPipelineRequest {
            recipe,
            frame,
            options,
            src_offset: None,
        }
    }

    pub fn at_offset(mut self, offset: usize) -> Self {
        self.src_offset = Some(offset);
        self
    }
}

/// Runs nested pipelines on behalf of stages. Results never contain the
/// end-of-input token.
pub trait SubPipelineInvoker {
    fn process_tokens(&self, tokens: Vec<Token>, request: SubPipelineRequest)
        -> LocalFuture<Vec<Token>>;

    fn process_text(&self, text: String, request: SubPipelineRequest) -> LocalFuture<Vec<Token>>;
}
