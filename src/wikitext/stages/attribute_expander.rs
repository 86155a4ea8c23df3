//! Attribute expansion
//!
//! Tags whose attribute keys or values still hold markup (templates,
//! arguments, extension tags) get every such key and value expanded in a
//! `tokens/wiki/expanded` sub-pipeline. The expanded output is then cleaned
//! up:
//!
//! - Wrapper markers are stripped. A value that came out of a template marks
//!   the attribute as templated; templated attributes are recorded in a
//!   `data-mw` attribute and the tag becomes `mw:ExpandedAttrs`.
//! - On table tags written in wikitext syntax a newline inside an expanded
//!   key or value ends the tag: the tokens after it become siblings and the
//!   template's start marker is hoisted in front of the tag, so the whole
//!   construct is wrapped as one unit.
//! - A key that expands to `k=v` text with an empty value is re-tokenized as
//!   an attribute list (`<div {{echo|style="x"}}>`).
//!
//! Results that need no further wrapping are emitted at [`SKIP_RANK`] so the
//! stage does not see them again.

use crate::wikitext::env::Env;
use crate::wikitext::frame::Frame;
use crate::wikitext::pipeline::handler::{
    Dispatch, HandlerContext, StageOptions, TokenHandler, TokenOutput, TokenResult,
};
use crate::wikitext::pipeline::{recipes, LocalFuture, SubPipelineInvoker, SubPipelineRequest};
use crate::wikitext::token::utils::{
    is_html_tag, is_table_tag, is_template_token, tokens_to_string,
};
use crate::wikitext::token::{Kv, KvValue, SourceRange, Syntax, Token};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::rc::Rc;
use tracing::{debug, trace};

pub const RANK: f64 = 1.12;
/// Rank for tokens this stage is done with.
pub const SKIP_RANK: f64 = 1.13;

static INCLUDE_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)mw:Includes/(?:No|Only)?Include(?:Only)?(/.*)?(?:\s|$)")
        .expect("valid include regex")
});

static WRAPPER_META_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(mw:(LanguageVariant|Transclusion|Param|Includes/)(.*)?$)")
        .expect("valid wrapper meta regex")
});

static SKIPPED_META_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"mw:(TSRMarker|Placeholder|Transclusion|Param|Includes)")
        .expect("valid meta regex")
});

/// What an expansion runs against; owned so it can move into a future.
#[derive(Clone)]
pub struct ExpansionScope {
    pub env: Rc<Env>,
    pub frame: Rc<Frame>,
    pub invoker: Rc<dyn SubPipelineInvoker>,
    pub options: StageOptions,
}

impl ExpansionScope {
    pub fn from_context(cx: &HandlerContext) -> Self {
        ExpansionScope {
            env: Rc::clone(&cx.env),
            frame: Rc::clone(&cx.frame),
            invoker: Rc::clone(&cx.invoker),
            options: cx.options,
        }
    }

    /// Expand one token sequence in an expansion-only sub-pipeline.
    pub async fn expand_value(&self, tokens: Vec<Token>) -> Vec<Token> {
        let request = SubPipelineRequest::new(
            recipes::TOKENS_EXPANDED,
            Rc::clone(&self.frame),
            self.options,
        );
        self.invoker.process_tokens(tokens, request).await
    }
}

#[derive(Default)]
pub struct AttributeExpander;

impl AttributeExpander {
    pub fn new() -> Self {
        AttributeExpander
    }
}

/// Tags with at least one key or value that still needs expanding.
pub fn needs_expansion(token: &Token) -> bool {
    let tag = match token {
        Token::StartTag(t) | Token::SelfClosingTag(t) => t,
        _ => return false,
    };
    if is_template_token(token) {
        return false;
    }
    if tag.name == "meta"
        && tag
            .attribute_string("typeof")
            .map(|ty| SKIPPED_META_TYPE.is_match(&ty))
            .unwrap_or(false)
    {
        return false;
    }
    tag.attribs
        .iter()
        .any(|kv| kv.k.needs_expansion() || kv.v.needs_expansion())
}

/// Expand the attributes of `token` and rebuild it. The result holds any
/// hoisted start marker, the token and any content split off after it.
pub fn expand_token(token: Token, scope: ExpansionScope) -> LocalFuture<TokenOutput> {
    Box::pin(async move {
        let attribs = token.tag().map(|t| t.attribs.clone()).unwrap_or_default();
        let mut expanded = Vec::with_capacity(attribs.len());
        for kv in &attribs {
            let mut out = kv.clone();
            if kv.k.needs_expansion() {
                out.k = KvValue::Tokens(scope.expand_value(kv.k.to_tokens()).await);
            }
            if kv.v.needs_expansion() {
                out.v = KvValue::Tokens(scope.expand_value(kv.v.to_tokens()).await);
            }
            expanded.push(out);
        }
        build_expanded_attrs(token, &attribs, expanded, &scope)
    })
}

/// Index of the first newline outside an include region, unless newlines
/// are fine for this tag.
fn nl_index(nl_okay: bool, tokens: &[Token]) -> Option<usize> {
    if nl_okay {
        return None;
    }
    let mut in_include = false;
    for (i, t) in tokens.iter().enumerate() {
        match t {
            Token::SelfClosingTag(tag) => {
                let ty = tag.attribute_string("typeof").unwrap_or_default();
                if let Some(caps) = INCLUDE_TYPE.captures(&ty) {
                    in_include = caps
                        .get(1)
                        .map(|m| !m.as_str().ends_with("/End"))
                        .unwrap_or(true);
                }
            }
            Token::Newline { .. } if !in_include => return Some(i),
            _ => {}
        }
    }
    None
}

fn wrapper_type(token: &Token) -> Option<String> {
    match token {
        Token::StartTag(t) | Token::SelfClosingTag(t) => {
            let ty = t.attribute_string("typeof")?;
            WRAPPER_META_TYPE
                .captures(&ty)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        }
        _ => None,
    }
}

/// A value cut at its first newline.
struct Split {
    meta_tokens: Vec<Token>,
    pre_nl: Vec<Token>,
    post_nl: Vec<Token>,
}

fn syntax_name(stx: Syntax) -> &'static str {
    match stx {
        Syntax::Html => "html",
        Syntax::Row => "row",
        Syntax::Piped => "piped",
    }
}

fn split_tokens(
    env: &Env,
    frame: &Frame,
    owner: &Token,
    nl_pos: usize,
    mut tokens: Vec<Token>,
    wrap: bool,
) -> Split {
    let post_nl = tokens.split_off(nl_pos.min(tokens.len()));
    let start_meta = if wrap {
        tokens.iter().rposition(|t| {
            t.is_self_closing()
                && wrapper_type(t)
                    .map(|ty| !ty.ends_with("/End"))
                    .unwrap_or(false)
        })
    } else {
        None
    };

    let Some(idx) = start_meta else {
        tokens.extend(post_nl);
        return Split {
            meta_tokens: Vec::new(),
            pre_nl: tokens,
            post_nl: Vec::new(),
        };
    };

    // Hoist the start marker in front of the owning token.
    let mut meta = tokens.remove(idx);
    let owner_start = owner.tsr().map(|r| r.start);
    if let (Some(start), Some(meta_tsr), Some(id)) = (owner_start, meta.tsr(), meta.id()) {
        let unwrapped = frame
            .src_text()
            .get(start..meta_tsr.start)
            .unwrap_or_default()
            .to_string();
        let name = owner.name().unwrap_or_default().to_ascii_uppercase();
        let first_node = match owner.data().and_then(|d| d.stx) {
            Some(stx) => format!("{}_{}", name, syntax_name(stx)),
            None => name,
        };
        env.with_scratch(id, |s| {
            s.unwrapped_wt = Some(unwrapped);
            s.first_wikitext_node = Some(first_node);
        });
        meta.set_tsr(Some(SourceRange::new(start, meta_tsr.end)));
    }
    Split {
        meta_tokens: vec![meta],
        pre_nl: tokens,
        post_nl,
    }
}

/// Drop wrapper markers from an expanded value. Reports whether a start
/// marker was seen, i.e. whether the value was generated.
fn strip_meta_tags(tokens: Vec<Token>, wrap: bool) -> (Vec<Token>, bool) {
    let mut generated = false;
    let mut out = Vec::with_capacity(tokens.len());
    for t in tokens {
        if !(t.is_start_tag() || t.is_self_closing()) {
            out.push(t);
            continue;
        }
        if wrap {
            match wrapper_type(&t) {
                Some(ty) => {
                    if !ty.ends_with("/End") {
                        generated = true;
                    }
                }
                None => {
                    out.push(t);
                    continue;
                }
            }
        }
        if t.name() != Some("meta") {
            out.push(t);
        }
    }
    (out, generated)
}

/// Template invocations in re-tokenized attribute soup go back to source.
fn templates_to_source(value: KvValue) -> KvValue {
    match value {
        KvValue::Tokens(tokens) => KvValue::Tokens(
            tokens
                .into_iter()
                .map(|t| {
                    if is_template_token(&t) {
                        Token::text(t.data().and_then(|d| d.src.clone()).unwrap_or_default())
                    } else {
                        t
                    }
                })
                .collect(),
        ),
        other => other,
    }
}

fn offsets_json(offsets: Option<[usize; 4]>, range: std::ops::Range<usize>) -> Option<Value> {
    offsets.map(|o| json!(o[range].to_vec()))
}

fn build_expanded_attrs(
    mut token: Token,
    old_attribs: &[Kv],
    expanded: Vec<Kv>,
    scope: &ExpansionScope,
) -> TokenOutput {
    let wrap = !scope.options.in_template;
    let nl_okay = is_html_tag(&token) || !is_table_tag(&token);
    let mut meta_tokens: Vec<Token> = Vec::new();
    let mut post_nl: Vec<Token> = Vec::new();
    let mut new_attrs: Option<Vec<Kv>> = None;
    let mut done: Vec<Kv> = Vec::with_capacity(expanded.len());
    let mut templated: Vec<(String, Value, Value)> = Vec::new();

    for (old, mut exp) in old_attribs.iter().zip(expanded) {
        exp.ksrc = old.ksrc.clone();
        exp.vsrc = old.vsrc.clone();
        exp.src_offsets = old.src_offsets;

        let orig_k = exp.k.clone();
        let orig_v = exp.v.clone();
        let mut k_generated = None;
        let mut v_generated = None;
        let mut expanded_k = exp.k.clone();
        let mut reparsed = false;

        if old.k.needs_expansion() {
            let toks = expanded_k.to_tokens();
            let (value, generated) = match nl_index(nl_okay, &toks) {
                Some(pos) => {
                    let split = split_tokens(&scope.env, &scope.frame, &token, pos, toks, wrap);
                    post_nl = split.post_nl;
                    meta_tokens = split.meta_tokens;
                    (split.pre_nl, false)
                }
                None => strip_meta_tags(toks, wrap),
            };
            k_generated = Some(generated);
            expanded_k = KvValue::Tokens(value);
            exp.k = expanded_k.clone();

            if exp.v.is_empty() {
                let k_str = expanded_k.to_text().trim().to_string();
                if k_str.contains('=') {
                    let mut kvs = scope.env.tokenizer().tokenize_attributes(&k_str, 0);
                    if !kvs.is_empty() {
                        let base = exp.src_offsets.map(|o| o[0]).unwrap_or(0);
                        for kv in kvs.iter_mut() {
                            kv.k = templates_to_source(std::mem::take(&mut kv.k));
                            kv.v = templates_to_source(std::mem::take(&mut kv.v));
                            if exp.src_offsets.is_some() {
                                kv.shift_offsets(base);
                            }
                        }
                        trace!(attributes = kvs.len(), "attribute soup re-tokenized");
                        expanded_k = kvs[0].k.clone();
                        reparsed = true;
                        new_attrs
                            .get_or_insert_with(|| done.clone())
                            .extend(kvs);
                    }
                }
            }
        }

        if expanded_k.as_str().is_some() && old.v.needs_expansion() {
            if !expanded_k.to_text().starts_with("mw:") {
                let toks = orig_v.to_tokens();
                let (value, generated) = match nl_index(nl_okay, &toks) {
                    Some(pos) => {
                        let split = split_tokens(&scope.env, &scope.frame, &token, pos, toks, wrap);
                        post_nl = split.post_nl;
                        meta_tokens = split.meta_tokens;
                        (split.pre_nl, false)
                    }
                    None => strip_meta_tags(toks, wrap),
                };
                v_generated = Some(generated);
                exp.v = KvValue::Tokens(value);
            }
        }

        let k_gen = k_generated.unwrap_or(false);
        let v_gen = v_generated.unwrap_or(false);
        if (reparsed && (k_gen || !meta_tokens.is_empty())) || k_gen || v_gen {
            let key = expanded_k.to_text();
            let mut k_json = json!({ "txt": key });
            if reparsed || k_gen {
                k_json["html"] = json!(tokens_to_string(&orig_k.to_tokens()));
            }
            if let Some(o) = offsets_json(exp.src_offsets, 0..2) {
                k_json["srcOffsets"] = o;
            }
            let mut v_json = json!({
                "html": if reparsed { String::new() } else { tokens_to_string(&orig_v.to_tokens()) }
            });
            if let Some(o) = offsets_json(exp.src_offsets, 2..4) {
                v_json["srcOffsets"] = o;
            }
            match templated.iter_mut().find(|(k, _, _)| *k == key) {
                Some(entry) => *entry = (key, k_json, v_json),
                None => templated.push((key, k_json, v_json)),
            }
        }

        if let Some(attrs) = new_attrs.as_mut() {
            if !reparsed {
                attrs.push(exp.clone());
            }
        }
        done.push(exp);
    }

    let has_about = token.attribute_string("about").is_some();
    let is_template = is_template_token(&token);
    if let Some(tag) = token.tag_mut() {
        tag.attribs = new_attrs.unwrap_or(done);
        if !has_about && !templated.is_empty() {
            let records: Vec<Value> = templated
                .into_iter()
                .map(|(_, k, v)| json!([k, v]))
                .collect();
            if is_template {
                let id = tag.id;
                scope
                    .env
                    .with_scratch(id, |s| s.templated_attribs = Some(Value::Array(records)));
            } else {
                tag.add_attribute("about", scope.env.new_about_id());
                tag.add_space_separated_attribute("typeof", "mw:ExpandedAttrs");
                tag.add_attribute("data-mw", json!({ "attribs": records }).to_string());
            }
        }
    }

    debug!(hoisted = meta_tokens.len(), trailing = post_nl.len(), "attributes expanded");
    let hoisted = !meta_tokens.is_empty();
    let mut tokens = meta_tokens;
    tokens.push(token);
    tokens.extend(post_nl);
    if hoisted {
        TokenOutput::new(tokens)
    } else {
        TokenOutput::with_rank(tokens, SKIP_RANK)
    }
}

impl TokenHandler for AttributeExpander {
    fn name(&self) -> &'static str {
        "AttributeExpander"
    }

    fn rank(&self) -> f64 {
        RANK
    }

    fn registrations(&self) -> Vec<Dispatch> {
        vec![Dispatch::Tag(None)]
    }

    fn on_tag(&mut self, token: Token, cx: &mut HandlerContext) -> TokenResult {
        if !needs_expansion(&token) {
            return TokenResult::Unchanged(token);
        }
        trace!(token = ?token.name(), "expanding attributes");
        TokenResult::suspend(Vec::new(), expand_token(token, ExpansionScope::from_context(cx)))
    }
}
