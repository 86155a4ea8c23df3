//! Extension tags
//!
//! The tokenizer turns registered extension tags (`<nowiki>`, ...) into
//! self-closing `extension` tokens carrying the tag name, the raw option
//! string, the body and the complete source. This stage hands them to the
//! [`ExtensionRenderer`] registered under that name and wraps the result in
//! `mw:Extension/<name>` markers at top level.
//!
//! A renderer either returns finished tokens or wikitext, which is expanded
//! in a nested pipeline before wrapping. Unregistered tags and renderer
//! failures degrade to the literal source behind an `mw:Error` marker.

use crate::wikitext::errors::ExtensionError;
use crate::wikitext::pipeline::handler::{
    Dispatch, HandlerContext, StageOptions, TokenHandler, TokenOutput, TokenResult,
};
use crate::wikitext::pipeline::{recipes, SubPipelineRequest};
use crate::wikitext::token::utils::{strip_tsr, wrapper_markers};
use crate::wikitext::token::{SourceRange, Token};
use serde_json::json;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};

pub const RANK: f64 = 1.11;

/// One extension tag occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionCall {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// Body; `None` for self-closing tags
    pub content: Option<String>,
    pub source: String,
}

pub enum ExtensionOutput {
    Tokens(Vec<Token>),
    /// Wikitext to expand in place of the tag
    Wikitext(String),
}

pub trait ExtensionRenderer {
    fn render(&self, call: &ExtensionCall) -> Result<ExtensionOutput, ExtensionError>;
}

/// `<nowiki>`: the body as plain text.
struct Nowiki;

impl ExtensionRenderer for Nowiki {
    fn render(&self, call: &ExtensionCall) -> Result<ExtensionOutput, ExtensionError> {
        Ok(ExtensionOutput::Tokens(
            call.content.iter().map(Token::text).collect(),
        ))
    }
}

/// Renderers by lower-case tag name.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    renderers: HashMap<String, Rc<dyn ExtensionRenderer>>,
}

impl ExtensionRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register("nowiki", Rc::new(Nowiki));
        registry
    }

    pub fn register(&mut self, name: &str, renderer: Rc<dyn ExtensionRenderer>) {
        self.renderers.insert(name.to_ascii_lowercase(), renderer);
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn ExtensionRenderer>> {
        self.renderers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.renderers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Default)]
pub struct ExtensionHandler;

impl ExtensionHandler {
    pub fn new() -> Self {
        ExtensionHandler
    }
}

fn call_from_token(token: &Token, cx: &HandlerContext) -> ExtensionCall {
    let source = token
        .attribute_string("source")
        .or_else(|| token.data().and_then(|d| d.src.clone()))
        .unwrap_or_default();
    let options = token.attribute_string("options").unwrap_or_default();
    let attrs = cx
        .env
        .tokenizer()
        .tokenize_attributes(&options, 0)
        .iter()
        .map(|kv| (kv.key_text(), kv.value_text()))
        .collect();
    ExtensionCall {
        name: token.attribute_string("name").unwrap_or_default(),
        attrs,
        content: token.attribute_string("content"),
        source,
    }
}

/// Wrap `content` in extension markers at top level; nested content is
/// returned as is.
fn encapsulate(
    cx_top_level: bool,
    about: impl FnOnce() -> String,
    call: &ExtensionCall,
    tsr: Option<SourceRange>,
    content: Vec<Token>,
) -> Vec<Token> {
    if !cx_top_level {
        return content;
    }
    let (mut start, end) = wrapper_markers(
        &format!("mw:Extension/{}", call.name),
        &about(),
        tsr,
        Some(call.source.clone()),
    );
    let attrs: serde_json::Map<String, serde_json::Value> = call
        .attrs
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();
    let mut data_mw = json!({ "name": call.name, "attrs": attrs });
    if let Some(body) = &call.content {
        data_mw["body"] = json!({ "extsrc": body });
    }
    if let Some(tag) = start.tag_mut() {
        tag.add_attribute("data-mw", data_mw.to_string());
    }
    let mut out = Vec::with_capacity(content.len() + 2);
    out.push(start);
    out.extend(content);
    out.push(end);
    out
}

/// Literal source preceded by an error marker.
fn degrade(call: &ExtensionCall, err: &ExtensionError, tsr: Option<SourceRange>) -> Vec<Token> {
    warn!(extension = %call.name, error = %err, "extension rendered as literal source");
    let data_mw = json!({
        "errors": [{ "key": "mw-extension-error", "message": err.to_string() }]
    });
    let mut marker = Token::self_closing("meta")
        .with_attr("typeof", "mw:Error")
        .with_attr("data-mw", data_mw.to_string());
    if let Some(r) = tsr {
        marker = marker.at(r.start, r.start);
    }
    vec![marker, Token::text(call.source.as_str())]
}

impl TokenHandler for ExtensionHandler {
    fn name(&self) -> &'static str {
        "ExtensionHandler"
    }

    fn rank(&self) -> f64 {
        RANK
    }

    fn registrations(&self) -> Vec<Dispatch> {
        vec![Dispatch::tag("extension")]
    }

    fn on_tag(&mut self, token: Token, cx: &mut HandlerContext) -> TokenResult {
        if !token.is_self_closing() {
            return TokenResult::Unchanged(token);
        }
        let call = call_from_token(&token, cx);
        let tsr = token.tsr();
        let top_level = cx.at_top_level();
        let phase_end = cx.phase_end;
        debug!(extension = %call.name, "extension tag");

        let rendered = cx
            .env
            .extensions()
            .get(&call.name)
            .ok_or_else(|| ExtensionError::Unregistered(call.name.clone()))
            .and_then(|renderer| renderer.render(&call));

        match rendered {
            Ok(ExtensionOutput::Tokens(tokens)) => {
                let env = Rc::clone(&cx.env);
                let out = encapsulate(top_level, || env.new_about_id(), &call, tsr, tokens);
                TokenResult::with_rank(out, phase_end)
            }
            Ok(ExtensionOutput::Wikitext(text)) => {
                let env = Rc::clone(&cx.env);
                let invoker = Rc::clone(&cx.invoker);
                let options = StageOptions {
                    in_template: true,
                    ..cx.options
                };
                let request = SubPipelineRequest::new(recipes::TEXT, Rc::clone(&cx.frame), options);
                TokenResult::suspend(
                    Vec::new(),
                    Box::pin(async move {
                        let mut expanded = invoker.process_text(text, request).await;
                        strip_tsr(&mut expanded);
                        let out = encapsulate(top_level, || env.new_about_id(), &call, tsr, expanded);
                        TokenOutput::with_rank(out, phase_end)
                    }),
                )
            }
            Err(err) => TokenResult::with_rank(degrade(&call, &err, tsr), phase_end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::config::PipelineOptions;
    use crate::wikitext::env::Env;
    use crate::wikitext::frame::Frame;
    use crate::wikitext::testing;
    use crate::wikitext::token::{Kv, TagToken};

    fn extension(name: &str, options: &str, content: Option<&str>, source: &str) -> Token {
        let mut attribs = vec![
            Kv::new("name", name),
            Kv::new("source", source),
            Kv::new("options", options),
        ];
        if let Some(c) = content {
            attribs.push(Kv::new("content", c));
        }
        Token::SelfClosingTag(TagToken::with_attribs("extension", attribs)).at(0, source.len())
    }

    struct Shout;

    impl ExtensionRenderer for Shout {
        fn render(&self, call: &ExtensionCall) -> Result<ExtensionOutput, ExtensionError> {
            match &call.content {
                Some(c) => Ok(ExtensionOutput::Wikitext(format!("''{}''", c.to_uppercase()))),
                None => Err(ExtensionError::Render {
                    name: call.name.clone(),
                    message: "empty body".into(),
                }),
            }
        }
    }

    fn shout_env() -> Rc<Env> {
        Rc::new(
            Env::new(PipelineOptions::default(), Rc::new(testing::mock_data_access()))
                .with_extension("shout", Rc::new(Shout)),
        )
    }

    fn run(env: Rc<Env>, token: Token) -> Vec<Token> {
        testing::run_expansion_stage(
            ExtensionHandler::new(),
            env,
            Frame::top(""),
            StageOptions::top_level(),
            vec![token, Token::EndOfInput],
        )
    }

    #[test]
    fn test_nowiki_is_wrapped_plain_text() {
        let env = testing::env(testing::mock_data_access());
        let out = run(env, extension("nowiki", "", Some("''x''"), "<nowiki>''x''</nowiki>"));
        assert_eq!(out.len(), 4);
        assert_eq!(
            out[0].attribute_string("typeof").as_deref(),
            Some("mw:Extension/nowiki")
        );
        assert_eq!(out[0].tsr(), Some(SourceRange::new(0, 22)));
        assert_eq!(out[1], Token::text("''x''"));
        assert_eq!(
            out[2].attribute_string("typeof").as_deref(),
            Some("mw:Extension/nowiki/End")
        );
        let data_mw: serde_json::Value =
            serde_json::from_str(&out[0].attribute_string("data-mw").unwrap()).unwrap();
        assert_eq!(data_mw["body"]["extsrc"], "''x''");
    }

    #[test]
    fn test_wikitext_output_is_expanded() {
        let out = run(shout_env(), extension("shout", "lang=\"en\"", Some("hi"), "<shout lang=\"en\">hi</shout>"));
        let names = testing::tag_names(&out);
        assert_eq!(names, vec!["meta", "mw-quote", "mw-quote", "meta"]);
        assert!(out.iter().any(|t| t.as_text() == Some("HI")));
        let data_mw: serde_json::Value =
            serde_json::from_str(&out[0].attribute_string("data-mw").unwrap()).unwrap();
        assert_eq!(data_mw["attrs"]["lang"], "en");
    }

    #[test]
    fn test_failures_degrade_to_source() {
        let env = shout_env();
        let out = run(Rc::clone(&env), extension("shout", "", None, "<shout/>"));
        assert_eq!(out[0].attribute_string("typeof").as_deref(), Some("mw:Error"));
        assert_eq!(out[1], Token::text("<shout/>"));

        let out = run(env, extension("poem", "", Some("x"), "<poem>x</poem>"));
        assert!(out[0]
            .attribute_string("data-mw")
            .unwrap()
            .contains("no renderer registered for <poem>"));
    }

    #[test]
    fn test_registry_names() {
        let mut registry = ExtensionRegistry::with_defaults();
        registry.register("Shout", Rc::new(Shout));
        assert_eq!(registry.names(), vec!["nowiki", "shout"]);
        assert!(registry.get("SHOUT").is_some());
    }
}
