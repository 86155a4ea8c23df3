//! Pipeline executor that runs named recipes
//!
//! The executor is the blocking entry point: it creates a fresh document
//! environment per run, builds the recipe's pipeline and drives it on a
//! current-thread tokio runtime inside a `LocalSet` until the terminal chunk
//! arrives.

use super::config::{Recipe, RecipeRegistry};
use super::factory::PipelineFactory;
use super::handler::StageOptions;
use crate::wikitext::config::PipelineOptions;
use crate::wikitext::data_access::{DataAccess, MockDataAccess};
use crate::wikitext::env::Env;
use crate::wikitext::errors::PipelineError;
use crate::wikitext::frame::Frame;
use crate::wikitext::stages::extension_handler::ExtensionRenderer;
use crate::wikitext::token::Token;
use std::rc::Rc;
use tokio::task::LocalSet;
use tracing::info;

/// Executes recipes on source text or token streams.
pub struct PipelineExecutor {
    registry: RecipeRegistry,
    options: PipelineOptions,
    data_access: Rc<dyn DataAccess>,
    extensions: Vec<(String, Rc<dyn ExtensionRenderer>)>,
}

impl PipelineExecutor {
    /// Executor with default options and no template sources.
    pub fn new() -> Self {
        Self::with_options(PipelineOptions::default(), Rc::new(MockDataAccess::new()))
    }

    pub fn with_options(options: PipelineOptions, data_access: Rc<dyn DataAccess>) -> Self {
        PipelineExecutor {
            registry: RecipeRegistry::with_defaults(),
            options,
            data_access,
            extensions: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: RecipeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register an extension tag renderer for every run.
    pub fn with_extension(mut self, name: &str, renderer: Rc<dyn ExtensionRenderer>) -> Self {
        self.extensions.push((name.to_string(), renderer));
        self
    }

    pub fn registry(&self) -> &RecipeRegistry {
        &self.registry
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn list_recipes(&self) -> Vec<&Recipe> {
        self.registry.list_all()
    }

    /// Run a text recipe on `source`.
    pub fn execute(&self, recipe: &str, source: &str) -> Result<Vec<Token>, PipelineError> {
        let factory = self.factory();
        let source = source.to_string();
        let recipe = recipe.to_string();
        let options = self.top_level_options();
        run_local(async move {
            let frame = Frame::top(source.as_str());
            let mut pipeline = factory.build(&recipe, frame, options, None)?;
            pipeline.process_text(&source)?;
            let out = pipeline.collect().await?;
            info!(recipe = %recipe, tokens = out.len(), "document done");
            Ok(out)
        })
    }

    /// Run a token recipe on `tokens`. `source` is the text the tokens'
    /// source ranges refer to.
    pub fn execute_tokens(
        &self,
        recipe: &str,
        tokens: Vec<Token>,
        source: &str,
    ) -> Result<Vec<Token>, PipelineError> {
        let factory = self.factory();
        let frame_src = source.to_string();
        let recipe = recipe.to_string();
        let options = self.top_level_options();
        run_local(async move {
            let frame = Frame::top(frame_src.as_str());
            let mut pipeline = factory.build(&recipe, frame, options, None)?;
            pipeline.process_tokens(tokens)?;
            pipeline.collect().await
        })
    }

    fn top_level_options(&self) -> StageOptions {
        StageOptions {
            expand_templates: self.options.expand_templates,
            in_template: false,
            inline_context: self.options.inline_context,
        }
    }

    /// A fresh environment per document.
    fn factory(&self) -> PipelineFactory {
        let mut env = Env::new(self.options.clone(), Rc::clone(&self.data_access));
        for (name, renderer) in &self.extensions {
            env = env.with_extension(name, Rc::clone(renderer));
        }
        PipelineFactory::with_registry(Rc::new(env), self.registry.clone())
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive `fut` to completion on a current-thread runtime inside a
/// `LocalSet`.
pub fn run_local<F, T>(fut: F) -> Result<T, PipelineError>
where
    F: std::future::Future<Output = Result<T, PipelineError>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    runtime.block_on(local.run_until(fut))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::pipeline::recipes;

    #[test]
    fn test_unknown_recipe() {
        let err = PipelineExecutor::new().execute("nope", "x").unwrap_err();
        assert!(matches!(err, PipelineError::RecipeNotFound(_)));
    }

    #[test]
    fn test_list_recipes() {
        let exec = PipelineExecutor::new();
        assert_eq!(exec.list_recipes().len(), 4);
    }

    #[test]
    fn test_execute_plain_paragraph() {
        let out = PipelineExecutor::new()
            .execute(recipes::TEXT_FULL, "hello")
            .unwrap();
        assert_eq!(
            out,
            vec![
                Token::start_tag("p"),
                Token::text("hello"),
                Token::end_tag("p"),
                Token::EndOfInput
            ]
        );
    }

    #[test]
    fn test_execute_tokens_rejects_text_recipe() {
        let err = PipelineExecutor::new()
            .execute_tokens(recipes::TEXT_FULL, vec![Token::EndOfInput], "")
            .unwrap_err();
        assert!(matches!(err, PipelineError::WrongInput(_, _)));
    }
}
