//! Main module for wikitext-to-token-stream functionality
//!
//! Layout, leaf to root:
//!
//! - [`token`]: token, attribute and source-range model
//! - [`tokenizer`]: reference tokenizer producing the lexical stream
//! - [`pipeline`]: stage contract, ranked dispatch, accumulators, recipes
//! - [`stages`]: the individual rewriting stages
//! - [`env`], [`frame`], [`config`], [`data_access`]: shared services

pub mod config;
pub mod data_access;
pub mod env;
pub mod errors;
pub mod frame;
pub mod pipeline;
pub mod stages;
pub mod testing;
pub mod token;
pub mod tokenizer;
