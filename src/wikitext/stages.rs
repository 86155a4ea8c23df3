//! Token stream rewriting stages
//!
//! | stage                | rank  | phase     | handles                                   |
//! |----------------------|-------|-----------|-------------------------------------------|
//! | [`TemplateHandler`]  | 1.1   | expansion | `template`, `templatearg`                 |
//! | [`ExtensionHandler`] | 1.11  | expansion | `extension`                               |
//! | [`AttributeExpander`]| 1.12  | expansion | tags with token-valued attributes         |
//! | [`PreHandler`]       | 2.051 | structure | indent-pre lines                          |
//! | [`QuoteTransformer`] | 2.1   | structure | `''` / `'''` / `'''''` runs               |
//! | [`ListHandler`]      | 2.49  | structure | `listItem` bullets                        |
//! | [`ParagraphWrapper`] | 2.95  | structure | paragraphs and blank-line breaks          |
//!
//! Each stage is a [`crate::wikitext::pipeline::TokenHandler`]; the
//! [`crate::wikitext::pipeline::PipelineFactory`] creates fresh instances for
//! every pipeline it builds.

pub mod attribute_expander;
pub mod extension_handler;
pub mod list_handler;
pub mod paragraph_wrapper;
pub mod parser_functions;
pub mod pre_handler;
pub mod quote_transformer;
pub mod template_handler;

pub use attribute_expander::AttributeExpander;
pub use extension_handler::ExtensionHandler;
pub use list_handler::ListHandler;
pub use paragraph_wrapper::ParagraphWrapper;
pub use pre_handler::PreHandler;
pub use quote_transformer::QuoteTransformer;
pub use template_handler::TemplateHandler;
