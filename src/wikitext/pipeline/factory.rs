//! Builds pipelines from recipes
//!
//! The factory owns the document environment and the recipe registry. Every
//! build creates fresh stage instances, so nested pipelines never share
//! stage state with their parents. The factory also serves nested
//! expansions as the [`SubPipelineInvoker`] handed to stages.

use super::builder::{Pipeline, PipelineBuilder};
use super::config::{Phase, RecipeRegistry};
use super::handler::{StageOptions, TokenHandler};
use super::{LocalFuture, SubPipelineInvoker, SubPipelineRequest};
use crate::wikitext::env::Env;
use crate::wikitext::errors::PipelineError;
use crate::wikitext::frame::Frame;
use crate::wikitext::stages::{
    AttributeExpander, ExtensionHandler, ListHandler, ParagraphWrapper, PreHandler,
    QuoteTransformer, TemplateHandler,
};
use crate::wikitext::token::Token;
use std::rc::Rc;
use tracing::{debug, warn};

struct FactoryInner {
    env: Rc<Env>,
    registry: RecipeRegistry,
}

/// Cheap to clone; clones share the environment and registry.
#[derive(Clone)]
pub struct PipelineFactory {
    inner: Rc<FactoryInner>,
}

impl PipelineFactory {
    pub fn new(env: Rc<Env>) -> Self {
        Self::with_registry(env, RecipeRegistry::with_defaults())
    }

    pub fn with_registry(env: Rc<Env>, registry: RecipeRegistry) -> Self {
        PipelineFactory {
            inner: Rc::new(FactoryInner { env, registry }),
        }
    }

    pub fn env(&self) -> &Rc<Env> {
        &self.inner.env
    }

    pub fn registry(&self) -> &RecipeRegistry {
        &self.inner.registry
    }

    /// Build a pipeline for `recipe`.
    pub fn build(
        &self,
        recipe: &str,
        frame: Rc<Frame>,
        options: StageOptions,
        src_offset: Option<usize>,
    ) -> Result<Pipeline, PipelineError> {
        let spec = self
            .inner
            .registry
            .get(recipe)
            .ok_or_else(|| PipelineError::RecipeNotFound(recipe.to_string()))?;

        let invoker: Rc<dyn SubPipelineInvoker> = Rc::new(self.clone());
        let mut builder = PipelineBuilder::new(
            format!("{}@{}", spec.name, frame.depth()),
            spec.input,
            Rc::clone(&self.inner.env),
            frame,
            invoker,
        )
        .options(options)
        .src_offset(src_offset.unwrap_or(0))
        .post_process(spec.post_process);

        for phase in &spec.phases {
            let stages = self.stages_for(*phase, options, src_offset.unwrap_or(0));
            builder = builder.add_phase(*phase, stages);
        }
        debug!(recipe, "pipeline built");
        Ok(builder.build())
    }

    /// Fresh stage instances for one phase.
    fn stages_for(
        &self,
        phase: Phase,
        options: StageOptions,
        src_offset: usize,
    ) -> Vec<Box<dyn TokenHandler>> {
        match phase {
            Phase::Input => Vec::new(),
            Phase::Expansion => vec![
                Box::new(TemplateHandler::new()),
                Box::new(ExtensionHandler::new()),
                Box::new(AttributeExpander::new()),
            ],
            Phase::Structure => vec![
                Box::new(PreHandler::new(options).with_src_offset(src_offset)),
                Box::new(QuoteTransformer::new()),
                Box::new(ListHandler::new()),
                Box::new(ParagraphWrapper::new(options)),
            ],
        }
    }

    async fn run(
        self,
        input: SubInput,
        request: SubPipelineRequest,
    ) -> Result<Vec<Token>, PipelineError> {
        let mut pipeline = self.build(
            request.recipe,
            request.frame,
            request.options,
            request.src_offset,
        )?;
        match input {
            SubInput::Text(text) => pipeline.process_text(&text)?,
            SubInput::Tokens(mut tokens) => {
                if !tokens.last().map(Token::is_eof).unwrap_or(false) {
                    tokens.push(Token::EndOfInput);
                }
                pipeline.process_tokens(tokens)?
            }
        }
        let mut out = pipeline.collect().await?;
        out.retain(|t| !t.is_eof());
        Ok(out)
    }
}

enum SubInput {
    Text(String),
    Tokens(Vec<Token>),
}

impl SubPipelineInvoker for PipelineFactory {
    fn process_tokens(
        &self,
        tokens: Vec<Token>,
        request: SubPipelineRequest,
    ) -> LocalFuture<Vec<Token>> {
        let factory = self.clone();
        Box::pin(async move {
            let fallback = tokens.clone();
            let recipe = request.recipe;
            match factory.run(SubInput::Tokens(tokens), request).await {
                Ok(out) => out,
                Err(err) => {
                    warn!(recipe, error = %err, "nested pipeline failed; keeping input");
                    fallback.into_iter().filter(|t| !t.is_eof()).collect()
                }
            }
        })
    }

    fn process_text(&self, text: String, request: SubPipelineRequest) -> LocalFuture<Vec<Token>> {
        let factory = self.clone();
        Box::pin(async move {
            let fallback = text.clone();
            let recipe = request.recipe;
            match factory.run(SubInput::Text(text), request).await {
                Ok(out) => out,
                Err(err) => {
                    warn!(recipe, error = %err, "nested pipeline failed; keeping source text");
                    vec![Token::Text(fallback)]
                }
            }
        })
    }
}
