//! Page source retrieval
//!
//! The pipeline never talks to a wiki directly. Template sources and remote
//! preprocessing go through a [`DataAccess`] implementation; two are provided:
//! an in-memory [`MockDataAccess`] with optional per-title latency, and
//! [`DirDataAccess`], which reads `*.wiki` files from a directory.

use crate::wikitext::errors::FetchError;
use crate::wikitext::pipeline::LocalFuture;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

pub trait DataAccess {
    /// Raw wiki source of `title` (for example `Template:Foo`).
    fn fetch_template_source(&self, title: &str) -> LocalFuture<Result<String, FetchError>>;

    /// Expand a complete invocation remotely and return the expanded source.
    fn preprocess(&self, title: &str, text: &str) -> LocalFuture<Result<String, FetchError>>;
}

#[derive(Default)]
struct MockState {
    pages: HashMap<String, String>,
    expansions: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    fetches: Vec<String>,
}

/// In-memory data access for tests.
///
/// Cloning shares the underlying tables, so a test can keep a handle to
/// inspect the fetch log after handing a clone to the pipeline.
#[derive(Clone, Default)]
pub struct MockDataAccess {
    state: Rc<RefCell<MockState>>,
}

impl MockDataAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, title: &str, source: &str) -> Self {
        self.state
            .borrow_mut()
            .pages
            .insert(title.to_string(), source.to_string());
        self
    }

    /// Canned result for remote preprocessing of exactly `text`.
    pub fn with_expansion(self, text: &str, expanded: &str) -> Self {
        self.state
            .borrow_mut()
            .expansions
            .insert(text.to_string(), expanded.to_string());
        self
    }

    /// Delay answers about `title` (page fetches and preprocessing).
    pub fn with_delay(self, title: &str, delay: Duration) -> Self {
        self.state
            .borrow_mut()
            .delays
            .insert(title.to_string(), delay);
        self
    }

    /// Titles fetched so far, in request order.
    pub fn fetches(&self) -> Vec<String> {
        self.state.borrow().fetches.clone()
    }

    fn delay_for(&self, title: &str) -> Option<Duration> {
        self.state.borrow().delays.get(title).copied()
    }
}

impl DataAccess for MockDataAccess {
    fn fetch_template_source(&self, title: &str) -> LocalFuture<Result<String, FetchError>> {
        let delay = self.delay_for(title);
        let result = {
            let mut state = self.state.borrow_mut();
            state.fetches.push(title.to_string());
            state
                .pages
                .get(title)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(title.to_string()))
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn preprocess(&self, title: &str, text: &str) -> LocalFuture<Result<String, FetchError>> {
        let delay = self.delay_for(title);
        let result = self
            .state
            .borrow()
            .expansions
            .get(text)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(title.to_string()));
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

/// Reads template sources from `<root>/<name>.wiki`.
///
/// `Template:Foo bar` is looked up as `Foo_bar.wiki` first and then as
/// `Template:Foo_bar.wiki`.
#[derive(Debug, Clone)]
pub struct DirDataAccess {
    root: PathBuf,
}

impl DirDataAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirDataAccess { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, title: &str) -> Vec<PathBuf> {
        let file = title.replace(' ', "_");
        let mut out = Vec::new();
        if let Some((_, name)) = file.split_once(':') {
            out.push(self.root.join(format!("{}.wiki", name)));
        }
        out.push(self.root.join(format!("{}.wiki", file)));
        out
    }
}

impl DataAccess for DirDataAccess {
    fn fetch_template_source(&self, title: &str) -> LocalFuture<Result<String, FetchError>> {
        let candidates = self.candidates(title);
        let title = title.to_string();
        Box::pin(async move {
            for path in candidates {
                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => {
                        debug!(path = %path.display(), "template source loaded");
                        return Ok(text);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        return Err(FetchError::Transport {
                            title,
                            message: e.to_string(),
                        })
                    }
                }
            }
            Err(FetchError::NotFound(title))
        })
    }

    fn preprocess(&self, title: &str, _text: &str) -> LocalFuture<Result<String, FetchError>> {
        let title = title.to_string();
        Box::pin(async move {
            Err(FetchError::Transport {
                title,
                message: "remote preprocessing is not available for local directories".into(),
            })
        })
    }
}
