//! Pipeline assembly
//!
//! A [`Pipeline`] chains one [`TransformManager`] per phase. The output sink
//! of each manager feeds the next one; the last phase delivers into an
//! optional post pass and from there into an unbounded channel the caller
//! drains with [`Pipeline::next_chunk`] or [`Pipeline::collect`].
//!
//! # Design
//!
//! Sinks are built back to front: the channel sink first, then the post pass
//! wrapping it, then each manager wrapping the sink of the phase after it.
//! A manager sink forwards every chunk and signals end-of-input to the next
//! phase once it sees a terminal chunk.
//!
//! # Examples
//!
//! ```ignore
//! let mut pipeline = PipelineBuilder::new("doc", InputKind::Text, env, frame, invoker)
//!     .add_phase(Phase::Structure, vec![Box::new(QuoteTransformer::new())])
//!     .build();
//! pipeline.process_text("''a''")?;
//! let tokens = pipeline.collect().await?;
//! ```

use super::accumulator::{ChunkSink, TokenChunk};
use super::config::{InputKind, Phase};
use super::handler::{HandlerContext, StageOptions, TokenHandler};
use super::manager::TransformManager;
use super::SubPipelineInvoker;
use crate::wikitext::env::Env;
use crate::wikitext::errors::PipelineError;
use crate::wikitext::frame::Frame;
use crate::wikitext::stages::paragraph_wrapper::remove_useless_p_wrappers;
use crate::wikitext::token::Token;
use crate::wikitext::tokenizer::Tokenizer;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc;
use tracing::debug;

/// Collects the stages of each phase and wires them into a [`Pipeline`].
pub struct PipelineBuilder {
    label: String,
    input: InputKind,
    env: Rc<Env>,
    frame: Rc<Frame>,
    invoker: Rc<dyn SubPipelineInvoker>,
    options: StageOptions,
    src_offset: usize,
    phases: Vec<(Phase, Vec<Box<dyn TokenHandler>>)>,
    post_process: bool,
}

impl PipelineBuilder {
    pub fn new(
        label: impl Into<String>,
        input: InputKind,
        env: Rc<Env>,
        frame: Rc<Frame>,
        invoker: Rc<dyn SubPipelineInvoker>,
    ) -> Self {
        PipelineBuilder {
            label: label.into(),
            input,
            env,
            frame,
            invoker,
            options: StageOptions::default(),
            src_offset: 0,
            phases: Vec::new(),
            post_process: false,
        }
    }

    pub fn options(mut self, options: StageOptions) -> Self {
        self.options = options;
        self
    }

    /// Offset of text input inside the top-level source.
    pub fn src_offset(mut self, offset: usize) -> Self {
        self.src_offset = offset;
        self
    }

    /// Add a phase. Phases run in the order they are added.
    pub fn add_phase(mut self, phase: Phase, stages: Vec<Box<dyn TokenHandler>>) -> Self {
        self.phases.push((phase, stages));
        self
    }

    /// Run the useless-paragraph cleanup after the last phase.
    pub fn post_process(mut self, enabled: bool) -> Self {
        self.post_process = enabled;
        self
    }

    pub fn build(self) -> Pipeline {
        let (sender, receiver) = mpsc::unbounded_channel();
        let label = self.label;

        let channel_label = label.clone();
        let channel: ChunkSink = Rc::new(move |chunk: TokenChunk| {
            if sender.send(chunk).is_err() {
                debug!(pipeline = %channel_label, "output receiver dropped");
            }
        });

        let post = self.post_process.then(|| Rc::new(PostPass::default()));
        let mut sink = match &post {
            Some(post) => post.sink(channel),
            None => channel,
        };

        let mut managers = Vec::with_capacity(self.phases.len());
        for (phase, stages) in self.phases.into_iter().rev() {
            let cx = HandlerContext::new(
                Rc::clone(&self.env),
                Rc::clone(&self.frame),
                Rc::clone(&self.invoker),
                self.options,
                phase.end_rank(),
            );
            let manager = TransformManager::new(
                format!("{}:{}", label, phase.label()),
                cx,
                phase.min_rank(),
                phase.end_rank(),
                sink,
            );
            for stage in stages {
                manager.add_stage(stage);
            }
            sink = manager_sink(manager.clone());
            managers.push(manager);
        }
        managers.reverse();

        Pipeline {
            label,
            input: self.input,
            tokenizer: self.env.tokenizer(),
            src_offset: self.src_offset,
            entry: sink,
            managers,
            post,
            receiver,
        }
    }
}

/// Forward chunks into `manager`, ending its input on the terminal chunk.
fn manager_sink(manager: TransformManager) -> ChunkSink {
    Rc::new(move |chunk: TokenChunk| {
        manager.on_chunk(chunk.tokens);
        if !chunk.is_async {
            manager.on_end();
        }
    })
}

/// Buffers the whole stream and removes useless paragraph wrappers once the
/// terminal chunk arrives.
#[derive(Default)]
struct PostPass {
    buf: RefCell<Vec<Token>>,
}

impl PostPass {
    fn sink(self: &Rc<Self>, next: ChunkSink) -> ChunkSink {
        let post = Rc::clone(self);
        Rc::new(move |chunk: TokenChunk| {
            let done = {
                let mut buf = post.buf.borrow_mut();
                buf.extend(chunk.tokens);
                if chunk.is_async {
                    None
                } else {
                    Some(std::mem::take(&mut *buf))
                }
            };
            if let Some(tokens) = done {
                next(TokenChunk::done(remove_useless_p_wrappers(tokens)));
            }
        })
    }

    fn reset(&self) {
        self.buf.borrow_mut().clear();
    }
}

/// An assembled pipeline. Must be driven from inside a
/// [`tokio::task::LocalSet`] when any stage can suspend.
pub struct Pipeline {
    label: String,
    input: InputKind,
    tokenizer: Rc<dyn Tokenizer>,
    src_offset: usize,
    entry: ChunkSink,
    managers: Vec<TransformManager>,
    post: Option<Rc<PostPass>>,
    receiver: mpsc::UnboundedReceiver<TokenChunk>,
}

impl Pipeline {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn input(&self) -> InputKind {
        self.input
    }

    /// Tokenize `text` and push the tokens through every phase.
    pub fn process_text(&mut self, text: &str) -> Result<(), PipelineError> {
        if self.input != InputKind::Text {
            return Err(PipelineError::WrongInput(self.label.clone(), "token"));
        }
        let tokens = self.tokenizer.tokenize(text, self.src_offset);
        debug!(pipeline = %self.label, tokens = tokens.len(), "tokenized");
        self.push(tokens);
        Ok(())
    }

    /// Push an already tokenized stream through every phase. The stream
    /// should end with [`Token::EndOfInput`].
    pub fn process_tokens(&mut self, tokens: Vec<Token>) -> Result<(), PipelineError> {
        if self.input != InputKind::Tokens {
            return Err(PipelineError::WrongInput(self.label.clone(), "text"));
        }
        self.push(tokens);
        Ok(())
    }

    fn push(&self, tokens: Vec<Token>) {
        match self.managers.first() {
            Some(first) => first.process(tokens),
            None => (self.entry)(TokenChunk::done(tokens)),
        }
    }

    /// Next output chunk, or `None` once every sender is gone.
    pub async fn next_chunk(&mut self) -> Option<TokenChunk> {
        self.receiver.recv().await
    }

    /// Wait for the terminal chunk and return the whole output.
    pub async fn collect(&mut self) -> Result<Vec<Token>, PipelineError> {
        let mut out = Vec::new();
        loop {
            match self.receiver.recv().await {
                Some(chunk) => {
                    out.extend(chunk.tokens);
                    if !chunk.is_async {
                        return Ok(out);
                    }
                }
                None => return Err(PipelineError::OutputClosed),
            }
        }
    }

    /// Names of the stages per phase, in registration order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.managers.iter().flat_map(|m| m.stage_names()).collect()
    }

    /// Clear all per-document state so the pipeline can take a new document.
    pub fn reset(&mut self) {
        for manager in &self.managers {
            manager.reset();
        }
        if let Some(post) = &self.post {
            post.reset();
        }
        while self.receiver.try_recv().is_ok() {}
    }
}
