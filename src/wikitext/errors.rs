//! Error types
//!
//! Stages never fail: malformed or unexpandable constructs degrade to
//! literal text with inline error markers. The errors here cover pipeline
//! set-up, configuration and the data-access collaborator.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from setting up or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("recipe '{0}' not found")]
    RecipeNotFound(String),

    #[error("recipe '{0}' expects {1} input")]
    WrongInput(String, &'static str),

    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("pipeline output closed before the end of the stream")]
    OutputClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from fetching or preprocessing page sources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("page '{0}' not found")]
    NotFound(String),

    #[error("page / template fetching disabled, and no cache for {0}")]
    Disabled(String),

    #[error("fetch of '{title}' failed: {message}")]
    Transport { title: String, message: String },
}

/// Errors from extension tag renderers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    #[error("no renderer registered for <{0}>")]
    Unregistered(String),

    #[error("<{name}> failed: {message}")]
    Render { name: String, message: String },
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
