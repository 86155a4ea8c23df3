//! # wikiflow
//!
//! Converts wiki markup into an HTML-shaped token stream.
//!
//! The heart of the crate is a pipeline of independent rewriting stages,
//! ordered by rank, that transform a flat lexical token stream into one whose
//! shape mirrors the target HTML tree. Stages may suspend on a token to
//! expand it out of band (templates, templated attributes); the pipeline keeps
//! output in source order regardless of when expansions complete.
//!
//! See the [wikitext module](wikitext) for the building blocks and
//! [`wikitext::pipeline::PipelineExecutor`] for the entry point.

pub mod wikitext;
